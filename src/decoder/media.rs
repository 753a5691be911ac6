use crate::backend::{AudioCodec, Container, VideoCodec};
use crate::core::{
    AudioStreamParams, DecoderError, MediaContext, PixelFormat, Result, StreamIndex, StreamParams,
    VideoInfo, VideoStreamParams,
};
use log::{debug, info, warn};
use std::path::Path;

pub(crate) struct VideoTrack {
    pub stream: StreamIndex,
    pub params: VideoStreamParams,
    pub codec: Box<dyn VideoCodec>,
}

pub(crate) struct AudioTrack {
    pub stream: StreamIndex,
    pub params: AudioStreamParams,
    pub codec: Box<dyn AudioCodec>,
}

/// open() 的结果：容器 + 选中的音视频流及其解码器
pub(crate) struct OpenedMedia {
    pub container: Box<dyn Container>,
    pub info: VideoInfo,
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
}

/// 打开文件并选择第一个可用的视频流和（启用声音时）第一个可用的音频流
pub(crate) fn open_media(
    ctx: &MediaContext,
    path: &Path,
    use_hw_accel: bool,
    enable_sound: bool,
) -> Result<OpenedMedia> {
    ctx.ensure_initialized()?;
    info!("📂 打开文件: {}", path.display());
    let container = ctx.backend().open(path)?;

    let mut video_params = None;
    let mut audio_params = None;
    let mut unsupported_video = None;
    let mut unsupported_audio = None;

    for stream in container.streams() {
        match &stream.params {
            StreamParams::Video(params) if video_params.is_none() => {
                if params.pixel_format.is_some() {
                    video_params = Some((stream.index, params.clone()));
                } else {
                    warn!("⚠ 视频流 {} ({}) 像素格式不支持，跳过", stream.index, stream.codec_name);
                    unsupported_video.get_or_insert_with(|| stream.codec_name.clone());
                }
            }
            StreamParams::Audio(params) if enable_sound && audio_params.is_none() => {
                if params.sample_format_supported {
                    audio_params = Some((stream.index, params.clone()));
                } else {
                    warn!("⚠ 音频流 {} ({}) 采样格式不支持，跳过", stream.index, stream.codec_name);
                    unsupported_audio.get_or_insert_with(|| stream.codec_name.clone());
                }
            }
            _ => debug!("忽略流 {} ({:?})", stream.index, stream.kind()),
        }
    }

    if video_params.is_none() {
        if let Some(codec) = unsupported_video {
            return Err(DecoderError::UnsupportedPixelFormat(codec));
        }
    }
    if audio_params.is_none() {
        if let Some(codec) = unsupported_audio {
            return Err(DecoderError::UnsupportedSampleFormat(codec));
        }
    }
    if video_params.is_none() && audio_params.is_none() {
        return Err(DecoderError::NoDecodableStream);
    }

    let video = match video_params {
        Some((stream, params)) => Some(VideoTrack {
            stream,
            codec: open_video_codec(container.as_ref(), stream, use_hw_accel)?,
            params,
        }),
        None => None,
    };
    let audio = match audio_params {
        Some((stream, params)) => Some(AudioTrack {
            stream,
            codec: container.open_audio_codec(stream)?,
            params,
        }),
        None => None,
    };

    let info = build_info(container.as_ref(), video.as_ref(), audio.as_ref());
    info!(
        "✅ 文件已打开: {:.2}s, 视频 {} {}x{} @ {:.3}fps{}, 音频 {}",
        info.duration,
        info.video_codec,
        info.width,
        info.height,
        info.nominal_fps,
        if info.hw_accelerated { " (硬件)" } else { "" },
        info.audio_codec
    );

    Ok(OpenedMedia {
        container,
        info,
        video,
        audio,
    })
}

/// 优先硬件解码，失败时回退到软件解码
fn open_video_codec(container: &dyn Container, stream: StreamIndex, use_hw_accel: bool) -> Result<Box<dyn VideoCodec>> {
    if use_hw_accel {
        match container.open_video_codec(stream, true) {
            Ok(codec) => {
                if !codec.is_hardware_accelerated() {
                    info!("硬件加速不可用，使用软件解码");
                }
                return Ok(codec);
            }
            Err(e) => warn!("⚠ 硬件解码器创建失败，回退到软件解码: {}", e),
        }
    }
    container.open_video_codec(stream, false)
}

fn build_info(container: &dyn Container, video: Option<&VideoTrack>, audio: Option<&AudioTrack>) -> VideoInfo {
    let mut info = VideoInfo {
        duration: container.duration(),
        bitrate: container.bitrate(),
        source: container.description(),
        ..Default::default()
    };
    if let Some(video) = video {
        info.has_video = true;
        info.video_codec = video.codec.name().to_string();
        info.width = video.params.width;
        info.height = video.params.height;
        info.nominal_fps = video.params.fps;
        info.hw_accelerated = video.codec.is_hardware_accelerated();
    }
    if let Some(audio) = audio {
        info.has_audio = true;
        info.audio_codec = audio.codec.name().to_string();
        info.sample_rate = audio.params.sample_rate;
        info.channels = audio.params.channels;
    }
    info
}

/// 决定交付给显示引擎的像素格式
///
/// 需要 YCbCr 且解码器原生输出 YCbCr 时交付平面 YUV420P（不做颜色空间转换），
/// 否则交付配置的打包格式。
pub(crate) fn choose_pixel_format(native: PixelFormat, want_ycbcr: bool, packed: PixelFormat) -> PixelFormat {
    if want_ycbcr && native.is_ycbcr() {
        PixelFormat::Yuv420p
    } else {
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SyntheticAudio, SyntheticBackend, SyntheticMedia, SyntheticVideo};
    use std::sync::Arc;

    fn ctx_with(media: SyntheticMedia) -> Arc<MediaContext> {
        MediaContext::new(Arc::new(SyntheticBackend::new().with_media("m.synth", media)))
    }

    fn open(media: SyntheticMedia, enable_sound: bool) -> Result<OpenedMedia> {
        open_media(&ctx_with(media), Path::new("m.synth"), true, enable_sound)
    }

    #[test]
    fn test_selects_video_and_audio() {
        let opened = open(
            SyntheticMedia::new()
                .with_video(SyntheticVideo::new(25.0, 1.0).with_hw_accel())
                .with_audio(SyntheticAudio::new(44100, 2, 1.0))
                .with_data_stream(),
            true,
        )
        .unwrap();
        assert_eq!(opened.video.as_ref().map(|v| v.stream), Some(0));
        assert_eq!(opened.audio.as_ref().map(|a| a.stream), Some(1));
        assert!(opened.info.hw_accelerated);
        assert_eq!(opened.info.sample_rate, 44100);
        assert_eq!(opened.info.bitrate, 1_000_000);
    }

    #[test]
    fn test_sound_disabled_skips_audio() {
        let opened = open(
            SyntheticMedia::new()
                .with_video(SyntheticVideo::new(25.0, 1.0))
                .with_audio(SyntheticAudio::new(44100, 2, 1.0)),
            false,
        )
        .unwrap();
        assert!(opened.audio.is_none());
        assert!(!opened.info.has_audio);
        assert!(!opened.info.hw_accelerated);
    }

    #[test]
    fn test_open_errors() {
        assert!(matches!(
            open(SyntheticMedia::new().with_video(SyntheticVideo::new(25.0, 1.0).with_unsupported_format()), true),
            Err(DecoderError::UnsupportedPixelFormat(_))
        ));
        assert!(matches!(
            open(SyntheticMedia::new().with_audio(SyntheticAudio::new(48000, 2, 1.0).with_unsupported_sample_format()), true),
            Err(DecoderError::UnsupportedSampleFormat(_))
        ));
        assert!(matches!(
            open(SyntheticMedia::new().with_data_stream(), true),
            Err(DecoderError::NoDecodableStream)
        ));
        assert!(matches!(
            open(SyntheticMedia::new().with_audio(SyntheticAudio::new(48000, 2, 1.0)), false),
            Err(DecoderError::NoDecodableStream)
        ));
        assert!(matches!(
            open(SyntheticMedia::new().with_video(SyntheticVideo::new(25.0, 1.0).with_failing_codec()), true),
            Err(DecoderError::CodecInitError(_))
        ));
    }

    #[test]
    fn test_pixel_format_choice() {
        assert_eq!(choose_pixel_format(PixelFormat::Nv12, true, PixelFormat::Bgra), PixelFormat::Yuv420p);
        assert_eq!(choose_pixel_format(PixelFormat::Yuv420p, false, PixelFormat::Bgra), PixelFormat::Bgra);
        assert_eq!(choose_pixel_format(PixelFormat::Rgba, true, PixelFormat::Rgb24), PixelFormat::Rgb24);
    }
}
