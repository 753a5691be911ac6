//! 解码器外观
//!
//! 同步与异步两种实现共用一个接口，由 `create_decoder` 根据配置选择。
//! 状态机：Closed -> Opened -> Decoding -> Closed，在错误的状态下调用返回 `InvalidState`。

mod async_decoder;
mod audio_pull;
mod media;
mod selector;
mod sync_decoder;

pub use async_decoder::AsyncVideoDecoder;
pub use audio_pull::AudioPullHandle;
pub use selector::FrameStats;
pub use sync_decoder::SyncVideoDecoder;

use crate::core::{
    AudioParams, DecoderConfig, DecoderError, DecoderState, FrameAvailable, MediaContext, PixelFormat, Result,
    StreamSelect, VideoInfo,
};
use log::info;
use std::path::Path;
use std::sync::Arc;

/// 解码器接口
pub trait VideoDecoder: Send {
    /// 打开文件，选择第一个可用的视频流和（启用声音时）第一个可用的音频流
    fn open(&mut self, path: &Path, use_hw_accel: bool, enable_sound: bool) -> Result<()>;

    /// 停止所有线程并释放资源；任何状态下都可以调用，重复调用无副作用
    fn close(&mut self);

    fn state(&self) -> DecoderState;

    /// 分配队列、启动线程，并决定交付的像素格式
    fn start_decoding(&mut self, want_ycbcr: bool, audio_params: AudioParams) -> Result<()>;

    /// Seek 到指定时间（负数按 0 处理）
    fn seek(&mut self, time: f64) -> Result<()>;

    fn loop_to_start(&mut self) -> Result<()> {
        self.seek(0.0)
    }

    /// 取 time 时刻应当显示的帧
    fn render_to_bmps(&mut self, time: f64) -> Result<FrameAvailable>;

    /// 与 render_to_bmps 相同的选帧过程，但丢弃结果
    fn throw_away_frame(&mut self, time: f64) -> Result<()>;

    fn is_eof(&self, stream: StreamSelect) -> bool;

    fn cur_time(&self, stream: StreamSelect) -> f64;

    fn cur_frame(&self) -> u64;

    /// 容器声明的帧率
    fn nominal_fps(&self) -> f64;

    /// 实际使用的帧率（固定帧率覆盖时为覆盖值）
    fn fps(&self) -> f64;

    /// 0 表示使用容器时间戳
    fn set_fps(&mut self, fps: f64) -> Result<()>;

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    fn size(&self) -> (u32, u32);

    /// start_decoding 之后才确定
    fn pixel_format(&self) -> Option<PixelFormat>;

    fn video_info(&self) -> Result<VideoInfo>;

    fn has_video(&self) -> bool;

    fn has_audio(&self) -> bool;

    /// 填充交错 f32 音频缓冲，返回真实采样帧数；永不阻塞，欠载部分补静音
    fn fill_audio_buffer(&mut self, out: &mut [f32]) -> usize;

    fn frame_stats(&self) -> FrameStats;

    /// 可以交给音频回调线程的拉取句柄
    ///
    /// 只有异步解码器提供；同步解码器的音频必须在调用线程通过 fill_audio_buffer 拉取。
    fn audio_pull_handle(&self) -> Option<AudioPullHandle> {
        None
    }
}

/// 根据配置创建同步或异步解码器
pub fn create_decoder(ctx: Arc<MediaContext>, config: DecoderConfig) -> Result<Box<dyn VideoDecoder>> {
    config.validate()?;
    info!("创建解码器: {}", if config.threaded { "异步（多线程）" } else { "同步" });
    if config.threaded {
        Ok(Box::new(AsyncVideoDecoder::new(ctx, config)))
    } else {
        Ok(Box::new(SyncVideoDecoder::new(ctx, config)))
    }
}

fn check_state(op: &'static str, state: DecoderState, expected: DecoderState) -> Result<()> {
    if state == expected {
        Ok(())
    } else {
        Err(DecoderError::InvalidState { op, state })
    }
}

fn frame_period(fps: f64) -> f64 {
    if fps > 0.0 {
        1.0 / fps
    } else {
        1.0 / crate::pipeline::FALLBACK_FPS
    }
}
