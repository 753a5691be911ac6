//! 音频格式转换：声道重排 + 采样率转换
//!
//! 解码输出与音频引擎格式一致时直接透传；采样率不同时用 rubato 的 FFT 重采样器，
//! 以固定 20ms 的输出批次产生数据，时间戳从第一批输入的 pts 开始按输出采样数累加。

use crate::core::{AudioParams, DecoderError, PcmFrame, Result};
use log::{debug, error};
use rubato::{FftFixedOut, Resampler as _};
use std::time::Duration;

const SAMPLE_BATCH_DURATION: Duration = Duration::from_millis(20);

/// 转换后的一段交错 PCM
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledChunk {
    pub time: f64,
    pub samples: Vec<f32>,
}

/// 把解码器输出转换为引擎格式
pub struct AudioConverter {
    output: AudioParams,
    input_sample_rate: u32,
    input_channels: u16,
    resampler: Option<Box<FftResampler>>,
    /// 透传模式下缺失 pts 时用来外推的时间
    next_time: Option<f64>,
}

impl AudioConverter {
    pub fn new(output: AudioParams) -> Self {
        Self {
            output,
            input_sample_rate: 0,
            input_channels: 0,
            resampler: None,
            next_time: None,
        }
    }

    pub fn output(&self) -> AudioParams {
        self.output
    }

    /// 转换一帧 PCM，可能输出 0~n 段（重采样器凑满一个批次才输出）
    pub fn convert(&mut self, pcm: PcmFrame) -> Result<Vec<ResampledChunk>> {
        if pcm.sample_rate == 0 || pcm.channels == 0 {
            return Err(DecoderError::UnsupportedSampleFormat(format!(
                "{} Hz / {} 声道",
                pcm.sample_rate, pcm.channels
            )));
        }
        if pcm.sample_rate != self.input_sample_rate || pcm.channels != self.input_channels {
            debug!(
                "音频输入格式: {} Hz {} 声道 -> {} Hz {} 声道",
                pcm.sample_rate, pcm.channels, self.output.sample_rate, self.output.channels
            );
            self.input_sample_rate = pcm.sample_rate;
            self.input_channels = pcm.channels;
            self.resampler = None;
        }

        let samples = remix_channels(&pcm.samples, pcm.channels, self.output.channels);

        if pcm.sample_rate == self.output.sample_rate {
            let time = pcm.pts.or(self.next_time).unwrap_or(0.0);
            let frames = samples.len() / self.output.channels.max(1) as usize;
            self.next_time = Some(time + frames as f64 / self.output.sample_rate as f64);
            return Ok(vec![ResampledChunk { time, samples }]);
        }

        if self.resampler.is_none() {
            self.resampler = Some(Box::new(FftResampler::new(
                pcm.sample_rate,
                self.output.sample_rate,
                self.output.channels,
            )?));
        }
        Ok(match self.resampler.as_mut() {
            Some(resampler) => resampler.resample(pcm.pts, &samples),
            None => Vec::new(),
        })
    }

    /// 取出重采样器中剩余的数据（流结束时调用）
    pub fn flush(&mut self) -> Vec<ResampledChunk> {
        match self.resampler.as_mut() {
            Some(resampler) => resampler.flush(),
            None => Vec::new(),
        }
    }

    /// Seek 后丢弃内部状态
    pub fn reset(&mut self) {
        self.resampler = None;
        self.next_time = None;
    }
}

/// 声道数转换（交错采样）
///
/// 升混按 `out % in` 复制声道；降混把多余声道平均到前面的声道上。
pub fn remix_channels(samples: &[f32], in_channels: u16, out_channels: u16) -> Vec<f32> {
    let (inc, outc) = (in_channels as usize, out_channels as usize);
    if inc == outc || inc == 0 || outc == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / inc;
    let mut out = Vec::with_capacity(frames * outc);
    for frame in samples.chunks_exact(inc) {
        if outc > inc {
            out.extend((0..outc).map(|c| frame[c % inc]));
        } else {
            for c in 0..outc {
                let (sum, count) = frame
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % outc == c)
                    .fold((0.0f32, 0usize), |(s, n), (_, v)| (s + v, n + 1));
                out.push(if count > 0 { sum / count as f32 } else { 0.0 });
            }
        }
    }
    out
}

struct FftResampler {
    input_sample_rate: u32,
    output_sample_rate: u32,
    channels: usize,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    resampler: FftFixedOut<f32>,
    first_batch_pts: Option<f64>,
    resampler_output_samples: u64,
}

impl FftResampler {
    fn new(input_sample_rate: u32, output_sample_rate: u32, channels: u16) -> Result<Self> {
        const SUB_CHUNKS: usize = 2;
        let channels = channels as usize;
        let output_batch_size =
            (output_sample_rate as f64 * SAMPLE_BATCH_DURATION.as_secs_f64()).round() as usize;

        let resampler = FftFixedOut::<f32>::new(
            input_sample_rate as usize,
            output_sample_rate as usize,
            output_batch_size,
            SUB_CHUNKS,
            channels,
        )
        .map_err(|e| DecoderError::AudioError(format!("无法创建重采样器: {}", e)))?;

        debug!(
            "创建重采样器: {} Hz -> {} Hz, {} 声道, 批次 {} 帧",
            input_sample_rate, output_sample_rate, channels, output_batch_size
        );

        Ok(Self {
            input_sample_rate,
            output_sample_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
            output_buffer: vec![vec![0.0; output_batch_size]; channels],
            resampler,
            first_batch_pts: None,
            resampler_output_samples: 0,
        })
    }

    fn resample(&mut self, pts: Option<f64>, interleaved: &[f32]) -> Vec<ResampledChunk> {
        if self.first_batch_pts.is_none() {
            self.first_batch_pts = Some(pts.unwrap_or(0.0));
        }
        for frame in interleaved.chunks_exact(self.channels) {
            for (channel, sample) in self.input_buffer.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut resampled = Vec::new();
        while self.resampler.input_frames_next() <= self.input_buffer[0].len() {
            let time = self.output_batch_pts();
            match self
                .resampler
                .process_into_buffer(self.input_buffer.as_slice(), self.output_buffer.as_mut_slice(), None)
            {
                Ok((used, produced)) => {
                    for channel in self.input_buffer.iter_mut() {
                        channel.drain(0..used);
                    }
                    resampled.push(self.read_output_buffer(time, produced));
                }
                Err(e) => {
                    error!("重采样失败: {}", e);
                    break;
                }
            }
        }
        resampled
    }

    fn flush(&mut self) -> Vec<ResampledChunk> {
        if self.input_buffer[0].is_empty() {
            return Vec::new();
        }
        let time = self.output_batch_pts();
        let pending = self.input_buffer[0].len();
        let result = self.resampler.process_partial_into_buffer(
            Some(self.input_buffer.as_slice()),
            self.output_buffer.as_mut_slice(),
            None,
        );
        for channel in self.input_buffer.iter_mut() {
            channel.clear();
        }
        match result {
            Ok((_, produced)) => {
                // 只保留与剩余输入时长相当的部分，其余是补零产生的尾巴
                let expected = (pending as f64 * self.output_sample_rate as f64
                    / self.input_sample_rate as f64)
                    .ceil() as usize;
                vec![self.read_output_buffer(time, produced.min(expected))]
            }
            Err(e) => {
                error!("重采样 flush 失败: {}", e);
                Vec::new()
            }
        }
    }

    fn read_output_buffer(&mut self, time: f64, produced: usize) -> ResampledChunk {
        let mut samples = Vec::with_capacity(produced * self.channels);
        for i in 0..produced {
            for channel in &self.output_buffer {
                samples.push(channel[i]);
            }
        }
        self.resampler_output_samples += produced as u64;
        ResampledChunk { time, samples }
    }

    fn output_batch_pts(&self) -> f64 {
        self.first_batch_pts.unwrap_or(0.0)
            + self.resampler_output_samples as f64 / self.output_sample_rate as f64
    }
}
