use crate::core::{AudioParams, DecoderError, Result};
use crate::decoder::AudioPullHandle;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};

/// 设备不支持请求的格式时依次尝试的配置
const FALLBACK_CONFIGS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];

/// 音频输出 - 使用 cpal 播放解码器拉取的音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send，AudioOutput 只在创建它的线程中启动和停止
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出（设备不支持请求的配置时自动回退）
    pub fn new(requested: AudioParams) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", requested.sample_rate, requested.channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DecoderError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| DecoderError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let candidates = std::iter::once((requested.sample_rate, requested.channels)).chain(FALLBACK_CONFIGS);
        for (rate, channels) in candidates {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if supported.iter().any(|s| Self::is_config_compatible(&config, s)) {
                if (rate, channels) != (requested.sample_rate, requested.channels) {
                    warn!("⚠️  音频设备不支持请求的配置，回退到 {} Hz, {} 声道", rate, channels);
                }
                return Ok(Self {
                    device,
                    config,
                    stream: None,
                });
            }
        }

        Err(DecoderError::AudioError(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            requested.sample_rate, requested.channels
        )))
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        supported.sample_format() == cpal::SampleFormat::F32
            && config.channels == supported.channels()
            && config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0
    }

    /// 实际使用的输出格式，作为 start_decoding 的音频参数
    pub fn params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    /// 开始播放，回调中从解码器拉取采样
    pub fn start(&mut self, handle: AudioPullHandle) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if handle.channels() != self.config.channels || handle.sample_rate() != self.config.sample_rate.0 {
            return Err(DecoderError::AudioError(format!(
                "解码器输出 {} Hz/{} 声道与设备配置 {} Hz/{} 声道不一致",
                handle.sample_rate(),
                handle.channels(),
                self.config.sample_rate.0,
                self.config.channels
            )));
        }

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    handle.fill(data);
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| DecoderError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| DecoderError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("音频输出已启动");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
