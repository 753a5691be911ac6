use super::StreamClock;
use crate::backend::AudioCodec;
use crate::core::{DecoderError, Packet, PcmFrame, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Sample;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, warn};

const PACKED_F32: Sample = Sample::F32(format::sample::Type::Packed);

/// FFmpeg 音频解码器，输出原始采样率与声道数的交错 f32
pub struct FfmpegAudioCodec {
    decoder: codec::decoder::Audio,
    clock: StreamClock,
    name: String,
    /// (重采样器, 输入格式, 声道布局, 采样率)
    resampler: Option<(software::resampling::Context, (Sample, ChannelLayout, u32))>,
}

// SwrContext 本身不是 Send，但每个解码器实例只会在一个线程中使用
unsafe impl Send for FfmpegAudioCodec {}

impl FfmpegAudioCodec {
    pub fn open(stream: &format::stream::Stream, clock: StreamClock) -> Result<Self> {
        let parameters = stream.parameters();
        let name = parameters.id().name().to_string();
        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|c| c.decoder().audio())
            .map_err(|e| DecoderError::CodecInitError(format!("{}: {}", name, e)))?;

        debug!(
            "音频解码器 {}: {} Hz, {} 声道, 格式: {:?}",
            name,
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            clock,
            name,
            resampler: None,
        })
    }

    fn receive_frames(&mut self) -> Vec<PcmFrame> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => match self.to_pcm(decoded) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => warn!("音频帧转换失败（已跳过）: {}", e),
                },
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("音频解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        frames
    }

    /// 转换为交错 f32（采样率与声道不变）
    fn to_pcm(&mut self, mut frame: util::frame::Audio) -> Result<PcmFrame> {
        let channels = frame.channels();
        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(ChannelLayout::default(i32::from(channels)));
        }
        let pts = frame.timestamp().map(|t| self.clock.to_seconds(t));
        let rate = frame.rate();

        let samples = if frame.format() == PACKED_F32 {
            read_packed_f32(&frame, channels)
        } else {
            let key = (frame.format(), frame.channel_layout(), rate);
            if !matches!(&self.resampler, Some((_, k)) if *k == key) {
                debug!("🔧 初始化音频格式转换: {:?} -> f32 packed, {} Hz, {} 声道", key.0, rate, channels);
                let resampler = software::resampling::Context::get(key.0, key.1, rate, PACKED_F32, key.1, rate)?;
                self.resampler = Some((resampler, key));
            }
            let (resampler, _) = self
                .resampler
                .as_mut()
                .ok_or_else(|| DecoderError::DecodeError("音频格式转换器未初始化".to_string()))?;
            let mut converted = util::frame::Audio::empty();
            resampler.run(&frame, &mut converted)?;
            read_packed_f32(&converted, channels)
        };

        Ok(PcmFrame {
            pts,
            sample_rate: rate,
            channels,
            samples,
        })
    }
}

fn read_packed_f32(frame: &util::frame::Audio, channels: u16) -> Vec<f32> {
    let count = frame.samples() * channels as usize;
    frame
        .data(0)
        .chunks_exact(4)
        .take(count)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl AudioCodec for FfmpegAudioCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmFrame>> {
        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts.map(|t| self.clock.to_timestamp(t)));
        av_packet.set_dts(packet.dts.map(|t| self.clock.to_timestamp(t)));

        match self.decoder.send_packet(&av_packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(DecoderError::DecodeError(e.to_string())),
        }
        Ok(self.receive_frames())
    }

    fn flush(&mut self) -> Result<Vec<PcmFrame>> {
        if let Err(e) = self.decoder.send_eof() {
            debug!("send_eof 失败: {}", e);
        }
        let frames = self.receive_frames();
        self.decoder.flush();
        Ok(frames)
    }

    fn reset(&mut self) {
        self.decoder.flush();
    }
}
