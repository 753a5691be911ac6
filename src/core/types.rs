use serde::{Deserialize, Serialize};
use std::fmt;

/// 子流索引（容器内的流编号，文件打开期间保持不变）
pub type StreamIndex = usize;

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    /// 字幕、数据流等，解码管线不处理
    Other,
}

/// 查询 EOF / 当前时间时选择的流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelect {
    Video,
    Audio,
    All,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Rgb24,
    Bgr24,
    /// 平面 YCbCr 4:2:0
    Yuv420p,
    /// 半平面 YCbCr 4:2:0（UV 交错）
    Nv12,
}

impl PixelFormat {
    /// 是否为 YCbCr 格式
    pub fn is_ycbcr(self) -> bool {
        matches!(self, PixelFormat::Yuv420p | PixelFormat::Nv12)
    }

    /// 打包格式每像素字节数，平面格式返回 None
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuv420p | PixelFormat::Nv12 => None,
        }
    }

    /// 平面数量
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Yuv420p => "YUV420P",
            PixelFormat::Nv12 => "NV12",
        };
        f.write_str(name)
    }
}

/// 视频流参数
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamParams {
    pub width: u32,
    pub height: u32,
    /// 容器声明的帧率
    pub fps: f64,
    /// 解码器原生输出格式，None 表示管线不支持该格式
    pub pixel_format: Option<PixelFormat>,
}

/// 音频流参数
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// 采样格式能否转换为 f32
    pub sample_format_supported: bool,
}

/// 流参数
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Video(VideoStreamParams),
    Audio(AudioStreamParams),
    Other,
}

/// 容器内单个流的描述
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: StreamIndex,
    pub codec_name: String,
    pub params: StreamParams,
}

impl StreamInfo {
    pub fn kind(&self) -> MediaKind {
        match self.params {
            StreamParams::Video(_) => MediaKind::Video,
            StreamParams::Audio(_) => MediaKind::Audio,
            StreamParams::Other => MediaKind::Other,
        }
    }
}

/// 压缩数据包（由 Demuxer 产生，解码线程消费）
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream: StreamIndex,
    pub data: Vec<u8>,
    /// 解码时间戳（秒，相对流起点），None 表示无时间戳
    pub dts: Option<f64>,
    /// 显示时间戳（秒）
    pub pts: Option<f64>,
    pub keyframe: bool,
}

impl Packet {
    pub fn new(stream: StreamIndex, data: Vec<u8>) -> Self {
        Self {
            stream,
            data,
            dts: None,
            pts: None,
            keyframe: false,
        }
    }

    /// 优先使用 pts，缺失时退回 dts
    pub fn timestamp(&self) -> Option<f64> {
        self.pts.or(self.dts)
    }
}

/// 图像平面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// 每行字节数
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }
}

/// YCbCr -> RGB 矩阵
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorMatrix {
    #[default]
    Bt601,
    Bt709,
    Bt2020,
}

/// 帧的色彩描述，只对 YCbCr 格式有意义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorInfo {
    pub matrix: ColorMatrix,
    /// true: 0-255 全范围（JPEG）；false: 16-235 有限范围
    pub full_range: bool,
}

/// 解码器输出的原始帧（编解码器原生格式，尚未转换）
#[derive(Debug, Clone, PartialEq)]
pub struct RawVideoFrame {
    /// 编解码器给出的时间戳（秒）
    pub pts: Option<f64>,
    /// 解码线程计算出的显示时间（秒）
    pub time: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub color: ColorInfo,
    pub planes: Vec<Plane>,
}

/// 交给显示引擎的视频帧（已转换为目标像素格式）
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// 显示时间（秒）
    pub time: f64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// 编解码器输出的 PCM（原始采样率与声道数，交错 f32）
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub pts: Option<f64>,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// 解码完成的音频缓冲（已重采样到引擎格式并应用音量渐变）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// 第一个采样的显示时间（秒）
    pub time: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 交错 f32 采样
    pub samples: Vec<f32>,
    /// 音量渐变起点
    pub start_volume: f32,
    /// 音量渐变终点
    pub end_volume: f32,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// 缓冲时长（秒）
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// 音频引擎的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// render_to_bmps 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAvailable {
    /// 新的一帧，需要上传显示
    NewFrame(VideoFrame),
    /// 继续显示上一帧
    UseLastFrame,
}

impl FrameAvailable {
    pub fn is_new_frame(&self) -> bool {
        matches!(self, FrameAvailable::NewFrame(_))
    }
}

/// 解码器状态机：Closed -> Opened -> Decoding -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderState {
    Closed,
    Opened,
    Decoding,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecoderState::Closed => "CLOSED",
            DecoderState::Opened => "OPENED",
            DecoderState::Decoding => "DECODING",
        };
        f.write_str(name)
    }
}

/// 媒体信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// 总时长（秒）
    pub duration: f64,
    /// 比特率（bit/s）
    pub bitrate: u64,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_codec: String,
    pub audio_codec: String,
    pub width: u32,
    pub height: u32,
    pub nominal_fps: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 是否启用了硬件加速
    pub hw_accelerated: bool,
    /// 数据源描述
    pub source: String,
}

impl Default for VideoInfo {
    fn default() -> Self {
        Self {
            duration: 0.0,
            bitrate: 0,
            has_video: false,
            has_audio: false,
            video_codec: "none".to_string(),
            audio_codec: "none".to_string(),
            width: 0,
            height: 0,
            nominal_fps: 0.0,
            sample_rate: 0,
            channels: 0,
            hw_accelerated: false,
            source: String::new(),
        }
    }
}
