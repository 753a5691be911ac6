use super::audio::FfmpegAudioCodec;
use super::video::{map_pixel_format, FfmpegVideoCodec};
use super::{rational_to_f64, StreamClock};
use crate::backend::{AudioCodec, Container, VideoCodec};
use crate::core::{
    AudioStreamParams, DecoderError, Packet, Result, StreamIndex, StreamInfo, StreamParams, VideoStreamParams,
};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info, warn};
use std::path::Path;

/// FFmpeg 容器 - 读取数据包并按流分发
pub struct FfmpegContainer {
    input_ctx: format::context::Input,
    streams: Vec<StreamInfo>,
    clocks: Vec<StreamClock>,
    /// 容器起始时间（微秒）
    start_time: i64,
    duration: f64,
    bitrate: u64,
    source_path: String,
}

// AVFormatContext 不是 Send，但容器同一时刻只被一个线程使用
unsafe impl Send for FfmpegContainer {}

impl FfmpegContainer {
    pub fn open(path: &Path) -> Result<Self> {
        let source_path = path.to_string_lossy().to_string();
        let input_ctx = open_input(&source_path)?;

        let mut streams = Vec::new();
        let mut clocks = Vec::new();
        for stream in input_ctx.streams() {
            clocks.push(StreamClock::new(&stream));
            streams.push(describe_stream(&stream));
        }

        let start_time = unsafe { (*input_ctx.as_ptr()).start_time };
        let start_time = if start_time == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { start_time };
        let duration = (input_ctx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)).max(0.0);
        let bitrate = input_ctx.bit_rate().max(0) as u64;

        debug!("容器 {}: {} 个流, {:.2}s, {} bit/s", source_path, streams.len(), duration, bitrate);

        Ok(Self {
            input_ctx,
            streams,
            clocks,
            start_time,
            duration,
            bitrate,
            source_path,
        })
    }

    fn stream(&self, index: StreamIndex) -> Result<format::stream::Stream<'_>> {
        self.input_ctx
            .stream(index)
            .ok_or_else(|| DecoderError::CodecNotFound(format!("流 {} 不存在", index)))
    }
}

/// 打开本地文件或网络流
fn open_input(path: &str) -> Result<format::context::Input> {
    let is_network = path.starts_with("http://")
        || path.starts_with("https://")
        || path.starts_with("rtsp://")
        || path.starts_with("rtmp://")
        || path.contains(".m3u8");

    let result = if is_network {
        info!("🌐 检测到网络流，应用网络选项");
        let mut options = ffmpeg::Dictionary::new();
        options.set("fflags", "+discardcorrupt+genpts");
        options.set("timeout", "15000000");
        options.set("rw_timeout", "8000000");
        options.set("reconnect", "1");
        options.set("reconnect_streamed", "1");
        format::input_with_dictionary(&path, options)
    } else {
        format::input(&path)
    };

    result.map_err(|e| match e {
        ffmpeg::Error::InvalidData => DecoderError::UnsupportedFormat(path.to_string()),
        e => DecoderError::open(path, e.to_string()),
    })
}

fn describe_stream(stream: &format::stream::Stream) -> StreamInfo {
    let parameters = stream.parameters();
    let codec_name = parameters.id().name().to_string();
    let medium = parameters.medium();

    let params = match medium {
        media::Type::Video => {
            let mut fps = rational_to_f64(stream.avg_frame_rate());
            if fps <= 0.0 {
                fps = rational_to_f64(stream.rate());
            }
            match codec::context::Context::from_parameters(parameters).and_then(|c| c.decoder().video()) {
                Ok(decoder) => StreamParams::Video(VideoStreamParams {
                    width: decoder.width(),
                    height: decoder.height(),
                    fps,
                    pixel_format: map_pixel_format(decoder.format()),
                }),
                Err(e) => {
                    warn!("⚠ 视频流 {} ({}) 无法创建解码器: {}", stream.index(), codec_name, e);
                    StreamParams::Video(VideoStreamParams {
                        width: 0,
                        height: 0,
                        fps,
                        pixel_format: None,
                    })
                }
            }
        }
        media::Type::Audio => {
            match codec::context::Context::from_parameters(parameters).and_then(|c| c.decoder().audio()) {
                Ok(decoder) => StreamParams::Audio(AudioStreamParams {
                    sample_rate: decoder.rate(),
                    channels: decoder.channels(),
                    sample_format_supported: decoder.format() != ffmpeg::format::Sample::None
                        && decoder.rate() > 0
                        && decoder.channels() > 0,
                }),
                Err(e) => {
                    warn!("⚠ 音频流 {} ({}) 无法创建解码器: {}", stream.index(), codec_name, e);
                    StreamParams::Audio(AudioStreamParams {
                        sample_rate: 0,
                        channels: 0,
                        sample_format_supported: false,
                    })
                }
            }
        }
        _ => StreamParams::Other,
    };

    StreamInfo {
        index: stream.index(),
        codec_name,
        params,
    }
}

impl Container for FfmpegContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn bitrate(&self) -> u64 {
        self.bitrate
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some((stream, packet)) = self.input_ctx.packets().next() else {
            return Ok(None);
        };
        let index = stream.index();
        let clock = self.clocks.get(index).copied().unwrap_or(StreamClock {
            time_base: rational_to_f64(stream.time_base()),
            start: 0,
        });
        Ok(Some(Packet {
            stream: index,
            data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            dts: packet.dts().map(|t| clock.to_seconds(t)),
            pts: packet.pts().map(|t| clock.to_seconds(t)),
            keyframe: packet.is_key(),
        }))
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        let timestamp = (time.max(0.0) * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64 + self.start_time;
        // 上界为目标时间：落在目标之前（含）最近的关键帧。
        // 时间戳相同的多个关键帧取哪一个由 libavformat 决定（通用索引查找取最后一个）
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .map_err(|e| DecoderError::SeekError(format!("{:.3}s: {}", time, e)))
    }

    fn open_video_codec(&self, stream: StreamIndex, use_hw_accel: bool) -> Result<Box<dyn VideoCodec>> {
        let stream = self.stream(stream)?;
        Ok(Box::new(FfmpegVideoCodec::open(&stream, self.clocks[stream.index()], use_hw_accel)?))
    }

    fn open_audio_codec(&self, stream: StreamIndex) -> Result<Box<dyn AudioCodec>> {
        let stream = self.stream(stream)?;
        Ok(Box::new(FfmpegAudioCodec::open(&stream, self.clocks[stream.index()])?))
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
