use crate::backend::AudioCodec;
use crate::core::{AudioBuffer, AudioParams, PcmFrame};
use crate::pipeline::message::{DecodedMsg, PacketMsg, PacketQueue, SeekEpoch};
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::resample::{AudioConverter, ResampledChunk};
use crate::pipeline::worker::{log_ctx, WorkStatus, Worker};
use log::{debug, info, trace, warn};
use std::sync::Arc;

pub type AudioBufferQueue = BoundedQueue<DecodedMsg<AudioBuffer>>;

/// 线性音量渐变
///
/// 每个缓冲从上一次使用的音量渐变到当前请求的音量，避免中途改音量时产生爆音。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeRamp {
    last: f32,
    target: f32,
}

impl VolumeRamp {
    pub fn new(volume: f32) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        Self {
            last: volume,
            target: volume,
        }
    }

    pub fn set_target(&mut self, volume: f32) {
        self.target = volume.clamp(0.0, 1.0);
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// 对交错采样应用渐变，返回 (起点, 终点) 音量
    ///
    /// 第 i 帧的增益为 `start + (end - start) * (i + 1) / frames`，最后一帧正好到达目标。
    pub fn apply(&mut self, samples: &mut [f32], channels: u16) -> (f32, f32) {
        let (start, end) = (self.last, self.target);
        let channels = channels.max(1) as usize;
        let frames = samples.len() / channels;
        if frames > 0 {
            if start == end {
                if end != 1.0 {
                    samples.iter_mut().for_each(|s| *s *= end);
                }
            } else {
                for (i, frame) in samples.chunks_exact_mut(channels).enumerate() {
                    let gain = start + (end - start) * ((i + 1) as f32 / frames as f32);
                    frame.iter_mut().for_each(|s| *s *= gain);
                }
            }
            self.last = end;
        }
        (start, end)
    }
}

/// 音频解码状态（同步解码器直接调用，异步解码器包在 AudioDecodeWorker 里）
pub struct AudioFrameDecoder {
    codec: Box<dyn AudioCodec>,
    converter: AudioConverter,
    ramp: VolumeRamp,
    epoch: SeekEpoch,
    preroll_target: Option<f64>,
    eof: bool,
    errors: u64,
}

impl AudioFrameDecoder {
    pub fn new(codec: Box<dyn AudioCodec>, output: AudioParams, volume: f32) -> Self {
        Self {
            codec,
            converter: AudioConverter::new(output),
            ramp: VolumeRamp::new(volume),
            epoch: 0,
            preroll_target: None,
            eof: false,
            errors: 0,
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.ramp.set_target(volume);
    }

    pub fn volume(&self) -> f32 {
        self.ramp.target()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn epoch(&self) -> SeekEpoch {
        self.epoch
    }

    pub fn codec(&self) -> &dyn AudioCodec {
        self.codec.as_ref()
    }

    pub fn handle(&mut self, msg: PacketMsg) -> Vec<DecodedMsg<AudioBuffer>> {
        match msg {
            PacketMsg::Packet(packet) => {
                if self.eof {
                    return Vec::new();
                }
                match self.codec.decode(&packet) {
                    Ok(frames) => self.convert(frames),
                    Err(e) => {
                        self.errors += 1;
                        warn!("{} ⚠ 音频解码错误（已跳过，第 {} 次）: {}", log_ctx(), self.errors, e);
                        Vec::new()
                    }
                }
            }
            PacketMsg::SeekDone { epoch, time } => {
                debug!("{} 音频解码收到 SeekDone: {:.3}s (epoch {})", log_ctx(), time, epoch);
                self.codec.reset();
                self.converter.reset();
                self.epoch = epoch;
                self.preroll_target = Some(time);
                self.eof = false;
                vec![DecodedMsg::SeekDone { epoch, time }]
            }
            PacketMsg::EndOfFile => {
                if self.eof {
                    return Vec::new();
                }
                let frames = self.codec.flush().unwrap_or_else(|e| {
                    warn!("{} ⚠ 音频解码器 flush 失败: {}", log_ctx(), e);
                    Vec::new()
                });
                let mut out = self.convert(frames);
                let tail = self.converter.flush();
                out.extend(self.finish_chunks(tail));
                self.eof = true;
                info!("{} 📄 音频流结束（错误 {} 次）", log_ctx(), self.errors);
                out.push(DecodedMsg::EndOfStream { epoch: self.epoch });
                out
            }
        }
    }

    fn convert(&mut self, frames: Vec<PcmFrame>) -> Vec<DecodedMsg<AudioBuffer>> {
        let mut chunks = Vec::new();
        for pcm in frames {
            match self.converter.convert(pcm) {
                Ok(converted) => chunks.extend(converted),
                Err(e) => warn!("{} ⚠ 音频格式转换失败（已跳过）: {}", log_ctx(), e),
            }
        }
        self.finish_chunks(chunks)
    }

    /// 预滚裁剪 + 音量渐变
    fn finish_chunks(&mut self, chunks: Vec<ResampledChunk>) -> Vec<DecodedMsg<AudioBuffer>> {
        let output = self.converter.output();
        let channels = output.channels.max(1) as usize;
        let mut out = Vec::new();
        for mut chunk in chunks {
            if let Some(target) = self.preroll_target {
                let frames = chunk.samples.len() / channels;
                let skip = ((target - chunk.time) * output.sample_rate as f64).round();
                if skip >= frames as f64 {
                    trace!("预滚丢弃音频 {:.3}s（目标 {:.3}s）", chunk.time, target);
                    continue;
                }
                if skip > 0.0 {
                    let skip = skip as usize;
                    chunk.samples.drain(..skip * channels);
                    chunk.time += skip as f64 / output.sample_rate as f64;
                }
                self.preroll_target = None;
            }
            if chunk.samples.is_empty() {
                continue;
            }
            let (start_volume, end_volume) = self.ramp.apply(&mut chunk.samples, output.channels);
            out.push(DecodedMsg::Data {
                epoch: self.epoch,
                item: AudioBuffer {
                    time: chunk.time,
                    sample_rate: output.sample_rate,
                    channels: output.channels,
                    samples: chunk.samples,
                    start_volume,
                    end_volume,
                },
            });
        }
        out
    }
}

/// 音频解码线程命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCommand {
    SetVolume(f32),
}

/// 音频解码线程
pub struct AudioDecodeWorker {
    decoder: AudioFrameDecoder,
    packets: Arc<PacketQueue>,
    output: Arc<AudioBufferQueue>,
}

impl AudioDecodeWorker {
    pub fn new(decoder: AudioFrameDecoder, packets: Arc<PacketQueue>, output: Arc<AudioBufferQueue>) -> Self {
        Self {
            decoder,
            packets,
            output,
        }
    }
}

impl Worker for AudioDecodeWorker {
    type Command = AudioCommand;

    fn name(&self) -> &str {
        "audio-decode"
    }

    fn init(&mut self) -> crate::core::Result<()> {
        let output = self.decoder.converter.output();
        info!(
            "{} 🔊 音频解码器: {} -> {} Hz {} 声道",
            log_ctx(),
            self.decoder.codec().name(),
            output.sample_rate,
            output.channels
        );
        Ok(())
    }

    fn work(&mut self) -> WorkStatus {
        let msg = match self.packets.pop(true) {
            Ok(Some(msg)) => msg,
            Ok(None) => return WorkStatus::Continue,
            Err(_) => return WorkStatus::Finished,
        };
        for out in self.decoder.handle(msg) {
            if self.output.push(out).is_err() {
                return WorkStatus::Finished;
            }
        }
        WorkStatus::Continue
    }

    fn handle_commands(&mut self, commands: Vec<AudioCommand>) {
        // 只有最后一次音量有意义
        if let Some(AudioCommand::SetVolume(volume)) = commands.into_iter().last() {
            self.decoder.set_volume(volume);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Container, MediaBackend, SyntheticAudio, SyntheticBackend, SyntheticMedia};
    use std::path::Path;

    fn open(audio: SyntheticAudio) -> Box<dyn Container> {
        SyntheticBackend::new()
            .with_media("a.synth", SyntheticMedia::new().with_audio(audio))
            .open(Path::new("a.synth"))
            .unwrap()
    }

    fn buffers(msgs: Vec<DecodedMsg<AudioBuffer>>) -> Vec<AudioBuffer> {
        msgs.into_iter()
            .filter_map(|m| match m {
                DecodedMsg::Data { item, .. } => Some(item),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_volume_ramp_is_monotonic_and_continuous() {
        let mut ramp = VolumeRamp::new(1.0);
        ramp.set_target(0.0);
        let mut gains = Vec::new();
        for _ in 0..4 {
            let mut samples = vec![1.0f32; 100 * 2];
            ramp.apply(&mut samples, 2);
            gains.extend(samples.iter().step_by(2).copied());
            // 之后的缓冲保持在 0
        }
        let step = 1.0 / 100.0;
        assert!(gains.windows(2).all(|w| w[1] <= w[0] + 1e-6));
        assert!(gains.windows(2).all(|w| (w[0] - w[1]).abs() <= step + 1e-5));
        assert_eq!(gains[99], 0.0);
        assert!(gains[100..].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_decoded_buffers_carry_ramp_metadata() {
        let mut container = open(SyntheticAudio::new(48000, 2, 0.1).with_amplitude(1.0));
        let codec = container.open_audio_codec(0).unwrap();
        let mut decoder = AudioFrameDecoder::new(codec, AudioParams::default(), 1.0);
        let first = container.read_packet().unwrap().unwrap();
        let b1 = buffers(decoder.handle(PacketMsg::Packet(first)));
        assert_eq!((b1[0].start_volume, b1[0].end_volume), (1.0, 1.0));

        decoder.set_volume(0.5);
        let second = container.read_packet().unwrap().unwrap();
        let b2 = buffers(decoder.handle(PacketMsg::Packet(second)));
        assert_eq!((b2[0].start_volume, b2[0].end_volume), (1.0, 0.5));
        assert!((b2[0].samples.last().copied().unwrap() - 0.5).abs() < 1e-6);
        assert!((b2[0].time - 1024.0 / 48000.0).abs() < 1e-9);
    }

    #[test]
    fn test_preroll_trims_samples_before_target() {
        let mut container = open(SyntheticAudio::new(48000, 2, 1.0));
        let codec = container.open_audio_codec(0).unwrap();
        let mut decoder = AudioFrameDecoder::new(codec, AudioParams::default(), 1.0);
        container.seek(0.5).unwrap();
        decoder.handle(PacketMsg::SeekDone { epoch: 1, time: 0.5 });
        let packet = container.read_packet().unwrap().unwrap();
        let out = buffers(decoder.handle(PacketMsg::Packet(packet)));
        assert!((out[0].time - 0.5).abs() < 1.0 / 48000.0);
    }

    #[test]
    fn test_mono_input_upmixed_to_engine_channels() {
        let mut container = open(SyntheticAudio::new(48000, 1, 0.1));
        let codec = container.open_audio_codec(0).unwrap();
        let mut decoder = AudioFrameDecoder::new(codec, AudioParams::default(), 1.0);
        let packet = container.read_packet().unwrap().unwrap();
        let out = buffers(decoder.handle(PacketMsg::Packet(packet)));
        assert_eq!(out[0].channels, 2);
        assert_eq!(out[0].frames(), 1024);
    }

    #[test]
    fn test_end_of_file_emits_end_of_stream_once() {
        let mut container = open(SyntheticAudio::new(48000, 2, 0.05));
        let codec = container.open_audio_codec(0).unwrap();
        let mut decoder = AudioFrameDecoder::new(codec, AudioParams::default(), 1.0);
        while let Some(packet) = container.read_packet().unwrap() {
            decoder.handle(PacketMsg::Packet(packet));
        }
        let out = decoder.handle(PacketMsg::EndOfFile);
        assert_eq!(out.last(), Some(&DecodedMsg::EndOfStream { epoch: 0 }));
        assert!(decoder.is_eof());
        assert!(decoder.handle(PacketMsg::EndOfFile).is_empty());
    }
}
