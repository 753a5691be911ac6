use crate::core::error::{DecoderError, Result};
use crate::core::types::{AudioParams, PixelFormat};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 解码器配置
///
/// 所有字段都有默认值，JSON 配置文件里只需写需要覆盖的部分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// true: 解封装/视频/音频各一个线程；false: 单线程同步解码
    pub threaded: bool,
    /// 每个子流的数据包队列容量
    pub packet_queue_capacity: usize,
    /// 已解码视频帧队列容量（帧数小，限制延迟）
    pub video_queue_capacity: usize,
    /// 已解码音频缓冲队列容量
    pub audio_queue_capacity: usize,
    /// 非 YCbCr 输出时使用的打包格式
    pub packed_format: PixelFormat,
    /// render_to_bmps 等待解码帧的最长时间（毫秒）
    pub render_timeout_ms: u64,
    pub use_hw_accel: bool,
    pub enable_sound: bool,
    /// 0 表示使用容器帧率和每帧时间戳
    pub fps: f64,
    pub audio: AudioParams,
}

/// 约 1~2 帧的时间：解码跟不上时显示引擎沿用上一帧，不长时间阻塞
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 50;

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threaded: true,
            packet_queue_capacity: 100,
            video_queue_capacity: 8,
            audio_queue_capacity: 32,
            packed_format: PixelFormat::Bgra,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            use_hw_accel: false,
            enable_sound: true,
            fps: 0.0,
            audio: AudioParams::default(),
        }
    }
}

impl DecoderConfig {
    /// 从 JSON 文件加载配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: DecoderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("已加载解码器配置: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_queue_capacity == 0
            || self.video_queue_capacity == 0
            || self.audio_queue_capacity == 0
        {
            return Err(DecoderError::ConfigError("队列容量必须大于 0".to_string()));
        }
        if self.packed_format.is_ycbcr() {
            return Err(DecoderError::ConfigError(format!(
                "packed_format 必须是打包 RGB 格式，而不是 {}",
                self.packed_format
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(DecoderError::ConfigError("音频参数无效".to_string()));
        }
        validate_fps(self.fps)?;
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

/// 帧率校验：0 表示使用容器时间戳，负数或非有限值拒绝
pub fn validate_fps(fps: f64) -> Result<()> {
    if !fps.is_finite() || fps < 0.0 {
        return Err(DecoderError::InvalidFps(fps));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{ "threaded": false, "fps": 30.0 }"#).unwrap();
        assert!(!config.threaded);
        assert_eq!(config.fps, 30.0);
        assert_eq!(config.packet_queue_capacity, 100);
        assert_eq!(config.render_timeout(), Duration::from_millis(DEFAULT_RENDER_TIMEOUT_MS));
        assert_eq!(config.audio, AudioParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DecoderConfig::default();
        config.video_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = DecoderConfig::default();
        config.packed_format = PixelFormat::Yuv420p;
        assert!(config.validate().is_err());

        let mut config = DecoderConfig::default();
        config.fps = -1.0;
        assert!(matches!(config.validate(), Err(DecoderError::InvalidFps(_))));
    }

    #[test]
    fn test_validate_fps() {
        assert!(validate_fps(0.0).is_ok());
        assert!(validate_fps(29.97).is_ok());
        assert!(validate_fps(-25.0).is_err());
        assert!(validate_fps(f64::NAN).is_err());
        assert!(validate_fps(f64::INFINITY).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("myy_decode_cfg_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "packet_queue_capacity": 16, "packed_format": "Rgba" }"#).unwrap();
        let config = DecoderConfig::from_json_file(&path).unwrap();
        assert_eq!(config.packet_queue_capacity, 16);
        assert_eq!(config.packed_format, PixelFormat::Rgba);
        let _ = std::fs::remove_file(&path);
    }
}
