//! FFmpeg 后端（ffmpeg-next）
//!
//! - container: 解封装、Seek、流信息
//! - video: 视频解码（可选硬件加速，硬件帧传回内存）
//! - convert: swscale 像素格式转换（只转换交付的帧）
//! - audio: 音频解码，统一输出交错 f32

mod audio;
mod container;
mod convert;
mod video;

pub use container::FfmpegContainer;
pub use convert::FfmpegFrameConverter;

use crate::backend::{Container, MediaBackend};
use crate::core::{DecoderError, Result};
use ffmpeg_next as ffmpeg;
use log::info;
use std::path::Path;

/// 基于 FFmpeg 的多媒体库入口
#[derive(Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "FFmpeg"
    }

    fn init(&self) -> Result<()> {
        ffmpeg::init().map_err(|e| DecoderError::CodecInitError(format!("FFmpeg 初始化失败: {}", e)))?;
        info!("✅ FFmpeg 初始化成功");
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Container>> {
        Ok(Box::new(FfmpegContainer::open(path)?))
    }
}

/// 时间基转换为秒
pub(crate) fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// 流时间戳（time_base 单位）与秒之间的换算
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamClock {
    pub time_base: f64,
    /// 流起始时间戳，换算时减去
    pub start: i64,
}

impl StreamClock {
    pub fn new(stream: &ffmpeg::format::stream::Stream) -> Self {
        let start = stream.start_time();
        Self {
            time_base: rational_to_f64(stream.time_base()),
            start: if start == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { start },
        }
    }

    pub fn to_seconds(&self, ts: i64) -> f64 {
        (ts - self.start) as f64 * self.time_base
    }

    pub fn to_timestamp(&self, seconds: f64) -> i64 {
        if self.time_base <= 0.0 {
            return self.start;
        }
        (seconds / self.time_base).round() as i64 + self.start
    }
}
