use crate::core::types::DecoderState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开文件 {path}: {reason}")]
    OpenError { path: String, reason: String },

    #[error("不支持的容器格式: {0}")]
    UnsupportedFormat(String),

    #[error("找不到可解码的音视频流")]
    NoDecodableStream,

    #[error("不支持的像素格式: {0}")]
    UnsupportedPixelFormat(String),

    #[error("不支持的采样格式: {0}")]
    UnsupportedSampleFormat(String),

    #[error("找不到解码器: {0}")]
    CodecNotFound(String),

    #[error("解码器初始化失败: {0}")]
    CodecInitError(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("当前状态 {state} 下不能调用 {op}")]
    InvalidState { op: &'static str, state: DecoderState },

    #[error("无效的帧率: {0}")]
    InvalidFps(f64),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("线程错误: {0}")]
    ThreadError(String),
}

impl DecoderError {
    pub fn open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DecoderError::OpenError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 单个数据包解码失败属于可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecoderError::DecodeError(_))
    }
}

pub type Result<T> = std::result::Result<T, DecoderError>;
