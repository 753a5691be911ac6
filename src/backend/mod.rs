//! 多媒体库抽象
//!
//! 容器解析与编解码交给外部多媒体库，解码管线只通过这里的 trait 与其交互：
//! 打开文件得到流列表、读取数据包、Seek、把数据包解码成帧。

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

use crate::core::{PcmFrame, PixelFormat, Packet, RawVideoFrame, Result, StreamIndex, StreamInfo, VideoFrame};
use std::path::Path;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegBackend;
pub use synthetic::{SyntheticAudio, SyntheticBackend, SyntheticFrameConverter, SyntheticMedia, SyntheticVideo};

/// 多媒体库入口
pub trait MediaBackend: Send + Sync {
    /// 后端名称（用于日志）
    fn name(&self) -> &str;

    /// 全局初始化，由 MediaContext 保证只调用一次
    fn init(&self) -> Result<()>;

    /// 打开容器并解析头部
    fn open(&self, path: &Path) -> Result<Box<dyn Container>>;
}

/// 已打开的容器（对应一次 open 的文件）
///
/// 不要求线程安全：同一时刻只被一个线程使用（同步解码器的调用线程，或解封装线程）。
pub trait Container: Send {
    /// 所有流的信息
    fn streams(&self) -> &[StreamInfo];

    /// 总时长（秒）
    fn duration(&self) -> f64;

    /// 总比特率（bit/s），未知时为 0
    fn bitrate(&self) -> u64 {
        0
    }

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek 到目标时间之前（含）最近的关键帧
    fn seek(&mut self, time: f64) -> Result<()>;

    /// 为指定视频流创建解码器
    fn open_video_codec(&self, stream: StreamIndex, use_hw_accel: bool) -> Result<Box<dyn VideoCodec>>;

    /// 为指定音频流创建解码器
    fn open_audio_codec(&self, stream: StreamIndex) -> Result<Box<dyn AudioCodec>>;

    /// 描述信息（用于调试）
    fn description(&self) -> String;
}

/// 视频解码器
pub trait VideoCodec: Send {
    fn name(&self) -> &str;

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    /// 解码输出的原生像素格式
    fn native_format(&self) -> PixelFormat;

    /// 创建与该解码器输出配套的像素格式转换器
    ///
    /// 解码器会被移入解码线程，转换器留在显示引擎一侧，只转换真正交付的帧。
    fn frame_converter(&self) -> Box<dyn FrameConverter>;

    /// 解码一个数据包，可能输出 0~n 帧（time 字段由解码线程填写）
    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawVideoFrame>>;

    /// 送入空包，取出编解码器内部延迟的帧
    fn flush(&mut self) -> Result<Vec<RawVideoFrame>>;

    /// 丢弃内部状态（Seek 后调用）
    fn reset(&mut self);
}

/// 把原生格式的帧转换为显示引擎要求的格式
pub trait FrameConverter: Send {
    fn convert(&mut self, raw: &RawVideoFrame, target: PixelFormat) -> Result<VideoFrame>;
}

/// 音频解码器
pub trait AudioCodec: Send {
    fn name(&self) -> &str;

    /// 解码一个数据包，输出交错 f32 PCM（原始采样率与声道数）
    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmFrame>>;

    fn flush(&mut self) -> Result<Vec<PcmFrame>>;

    fn reset(&mut self);
}
