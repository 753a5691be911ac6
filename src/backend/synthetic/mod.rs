//! 内存中的测试图案后端
//!
//! 不依赖任何本地库，按描述生成交错的音视频数据包，并提供能"解码"这些包的编解码器。
//! 可以模拟编解码器延迟帧、损坏的数据包、缺失/重复的时间戳、不支持的格式和初始化失败，
//! 用于在没有真实媒体文件的情况下检验整条解码管线。

mod convert;

pub use convert::SyntheticFrameConverter;

use crate::backend::{AudioCodec, Container, FrameConverter, MediaBackend, VideoCodec};
use crate::core::{
    AudioStreamParams, ColorInfo, DecoderError, Packet, PcmFrame, PixelFormat, Plane, RawVideoFrame, Result,
    StreamIndex, StreamInfo, StreamParams, VideoStreamParams,
};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

const MAGIC: u8 = 0xA5;
const KIND_VIDEO: u8 = 1;
const KIND_AUDIO: u8 = 2;
const KIND_DATA: u8 = 3;

/// 视频流描述
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticVideo {
    pub fps: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// None 表示管线不支持的像素格式
    pub format: Option<PixelFormat>,
    pub keyframe_interval: usize,
    /// 编解码器内部缓存的帧数，只有 flush 才能取出最后这些帧
    pub codec_delay: usize,
    /// 这些帧的数据包损坏，解码报错
    pub corrupt_frames: Vec<usize>,
    /// 这些帧的数据包在容器里出现两次（时间戳相同）
    pub duplicated_frames: Vec<usize>,
    pub timestamps: bool,
    pub hw_capable: bool,
    pub fail_codec_init: bool,
}

impl SyntheticVideo {
    pub fn new(fps: f64, duration: f64) -> Self {
        Self {
            fps,
            duration,
            width: 32,
            height: 18,
            format: Some(PixelFormat::Yuv420p),
            keyframe_interval: 12,
            codec_delay: 0,
            corrupt_frames: Vec::new(),
            duplicated_frames: Vec::new(),
            timestamps: true,
            hw_capable: false,
            fail_codec_init: false,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_unsupported_format(mut self) -> Self {
        self.format = None;
        self
    }

    pub fn with_keyframe_interval(mut self, interval: usize) -> Self {
        self.keyframe_interval = interval.max(1);
        self
    }

    pub fn with_codec_delay(mut self, frames: usize) -> Self {
        self.codec_delay = frames;
        self
    }

    pub fn with_corrupt_frames(mut self, frames: Vec<usize>) -> Self {
        self.corrupt_frames = frames;
        self
    }

    pub fn with_duplicated_frames(mut self, frames: Vec<usize>) -> Self {
        self.duplicated_frames = frames;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn with_hw_accel(mut self) -> Self {
        self.hw_capable = true;
        self
    }

    pub fn with_failing_codec(mut self) -> Self {
        self.fail_codec_init = true;
        self
    }

    pub fn frame_count(&self) -> usize {
        (self.duration * self.fps).round() as usize
    }

    fn frame_time(&self, index: usize) -> f64 {
        index as f64 / self.fps
    }
}

/// 音频流描述
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: f64,
    /// 每个数据包的采样帧数
    pub packet_frames: usize,
    /// 解码输出的恒定采样值
    pub amplitude: f32,
    pub corrupt_packets: Vec<usize>,
    pub sample_format_supported: bool,
    pub fail_codec_init: bool,
}

impl SyntheticAudio {
    pub fn new(sample_rate: u32, channels: u16, duration: f64) -> Self {
        Self {
            sample_rate,
            channels,
            duration,
            packet_frames: 1024,
            amplitude: 0.5,
            corrupt_packets: Vec::new(),
            sample_format_supported: true,
            fail_codec_init: false,
        }
    }

    pub fn with_packet_frames(mut self, frames: usize) -> Self {
        self.packet_frames = frames.max(1);
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_corrupt_packets(mut self, packets: Vec<usize>) -> Self {
        self.corrupt_packets = packets;
        self
    }

    pub fn with_unsupported_sample_format(mut self) -> Self {
        self.sample_format_supported = false;
        self
    }

    pub fn with_failing_codec(mut self) -> Self {
        self.fail_codec_init = true;
        self
    }

    pub fn total_frames(&self) -> usize {
        (self.duration * self.sample_rate as f64).round() as usize
    }

    fn packet_count(&self) -> usize {
        self.total_frames().div_ceil(self.packet_frames)
    }
}

/// 一个虚拟媒体文件
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyntheticMedia {
    pub video: Option<SyntheticVideo>,
    pub audio: Option<SyntheticAudio>,
    /// 额外加一条管线不处理的数据流
    pub data_stream: bool,
    /// 模拟无法识别的容器
    pub unrecognized: bool,
    pub bitrate: u64,
}

impl SyntheticMedia {
    pub fn new() -> Self {
        Self {
            bitrate: 1_000_000,
            ..Default::default()
        }
    }

    pub fn with_video(mut self, video: SyntheticVideo) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_audio(mut self, audio: SyntheticAudio) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_data_stream(mut self) -> Self {
        self.data_stream = true;
        self
    }

    pub fn unrecognized(mut self) -> Self {
        self.unrecognized = true;
        self
    }

    pub fn duration(&self) -> f64 {
        let video = self.video.as_ref().map(|v| v.duration).unwrap_or(0.0);
        let audio = self.audio.as_ref().map(|a| a.duration).unwrap_or(0.0);
        video.max(audio)
    }
}

/// 测试图案后端
pub struct SyntheticBackend {
    media: Mutex<HashMap<String, SyntheticMedia>>,
    init_count: AtomicUsize,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            media: Mutex::new(HashMap::new()),
            init_count: AtomicUsize::new(0),
        }
    }

    /// 注册一个虚拟文件
    pub fn with_media(self, path: impl Into<String>, media: SyntheticMedia) -> Self {
        self.add_media(path, media);
        self
    }

    pub fn add_media(&self, path: impl Into<String>, media: SyntheticMedia) {
        self.media.lock().insert(path.into(), media);
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn init(&self) -> Result<()> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Container>> {
        let key = path.to_string_lossy().to_string();
        let media = self
            .media
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| DecoderError::open(key.clone(), "文件不存在"))?;
        if media.unrecognized {
            return Err(DecoderError::UnsupportedFormat(key));
        }
        Ok(Box::new(SyntheticContainer::new(key, media)))
    }
}

/// 包在交错列表中的来源
#[derive(Debug, Clone, Copy)]
enum PacketSource {
    Video { frame: usize },
    Audio { packet: usize },
    Data,
}

struct PacketEntry {
    time: f64,
    source: PacketSource,
    duplicate: bool,
}

/// 虚拟容器
pub struct SyntheticContainer {
    path: String,
    media: SyntheticMedia,
    streams: Vec<StreamInfo>,
    video_index: Option<StreamIndex>,
    audio_index: Option<StreamIndex>,
    data_index: Option<StreamIndex>,
    entries: Vec<PacketEntry>,
    position: usize,
}

impl SyntheticContainer {
    fn new(path: String, media: SyntheticMedia) -> Self {
        let mut streams = Vec::new();
        let mut video_index = None;
        let mut audio_index = None;
        let mut data_index = None;

        if let Some(video) = &media.video {
            video_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                codec_name: "synthetic-video".to_string(),
                params: StreamParams::Video(VideoStreamParams {
                    width: video.width,
                    height: video.height,
                    fps: video.fps,
                    pixel_format: video.format,
                }),
            });
        }
        if let Some(audio) = &media.audio {
            audio_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                codec_name: "synthetic-audio".to_string(),
                params: StreamParams::Audio(AudioStreamParams {
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    sample_format_supported: audio.sample_format_supported,
                }),
            });
        }
        if media.data_stream {
            data_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                codec_name: "synthetic-data".to_string(),
                params: StreamParams::Other,
            });
        }

        let entries = Self::build_entries(&media);
        debug!("虚拟容器 {}: {} 个流, {} 个包", path, streams.len(), entries.len());

        Self {
            path,
            media,
            streams,
            video_index,
            audio_index,
            data_index,
            entries,
            position: 0,
        }
    }

    /// 按时间交错排列所有数据包（时间相同时视频在前，保持稳定排序）
    fn build_entries(media: &SyntheticMedia) -> Vec<PacketEntry> {
        let mut entries = Vec::new();
        if let Some(video) = &media.video {
            for frame in 0..video.frame_count() {
                let time = video.frame_time(frame);
                entries.push(PacketEntry {
                    time,
                    source: PacketSource::Video { frame },
                    duplicate: false,
                });
                if video.duplicated_frames.contains(&frame) {
                    entries.push(PacketEntry {
                        time,
                        source: PacketSource::Video { frame },
                        duplicate: true,
                    });
                }
            }
        }
        if let Some(audio) = &media.audio {
            for packet in 0..audio.packet_count() {
                let time = (packet * audio.packet_frames) as f64 / audio.sample_rate as f64;
                entries.push(PacketEntry {
                    time,
                    source: PacketSource::Audio { packet },
                    duplicate: false,
                });
            }
        }
        if media.data_stream {
            let duration = media.duration();
            let mut time = 0.0;
            while time < duration {
                entries.push(PacketEntry {
                    time,
                    source: PacketSource::Data,
                    duplicate: false,
                });
                time += 0.5;
            }
        }
        let rank = |source: &PacketSource| match source {
            PacketSource::Video { .. } => 0,
            PacketSource::Audio { .. } => 1,
            PacketSource::Data => 2,
        };
        entries.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| rank(&a.source).cmp(&rank(&b.source)))
        });
        entries
    }

    fn make_packet(&self, entry: &PacketEntry) -> Option<Packet> {
        match entry.source {
            PacketSource::Video { frame } => {
                let video = self.media.video.as_ref()?;
                let stream = self.video_index?;
                let corrupt = video.corrupt_frames.contains(&frame);
                let mut data = vec![if corrupt { 0 } else { MAGIC }, KIND_VIDEO];
                data.extend_from_slice(&(frame as u32).to_le_bytes());
                data.push(entry.duplicate as u8);
                let mut packet = Packet::new(stream, data);
                if video.timestamps {
                    packet.dts = Some(entry.time);
                    packet.pts = Some(entry.time);
                }
                packet.keyframe = frame % video.keyframe_interval == 0;
                Some(packet)
            }
            PacketSource::Audio { packet: index } => {
                let audio = self.media.audio.as_ref()?;
                let stream = self.audio_index?;
                let corrupt = audio.corrupt_packets.contains(&index);
                let start = index * audio.packet_frames;
                let frames = audio.packet_frames.min(audio.total_frames() - start);
                let mut data = vec![if corrupt { 0 } else { MAGIC }, KIND_AUDIO];
                data.extend_from_slice(&(start as u32).to_le_bytes());
                data.extend_from_slice(&(frames as u32).to_le_bytes());
                let mut packet = Packet::new(stream, data);
                packet.dts = Some(entry.time);
                packet.pts = Some(entry.time);
                packet.keyframe = true;
                Some(packet)
            }
            PacketSource::Data => {
                let stream = self.data_index?;
                let mut packet = Packet::new(stream, vec![MAGIC, KIND_DATA]);
                packet.dts = Some(entry.time);
                Some(packet)
            }
        }
    }
}

impl Container for SyntheticContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.media.duration()
    }

    fn bitrate(&self) -> u64 {
        self.media.bitrate
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        while let Some(entry) = self.entries.get(self.position) {
            self.position += 1;
            if let Some(packet) = self.make_packet(entry) {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        let time = time.max(0.0);
        const EPSILON: f64 = 1e-9;

        // 目标之前（含）最近的关键帧；时间戳相同的多个关键帧取靠后的那个
        let mut target = 0;
        if let Some(video) = &self.media.video {
            for (position, entry) in self.entries.iter().enumerate() {
                if let PacketSource::Video { frame } = entry.source {
                    if frame % video.keyframe_interval == 0 && entry.time <= time + EPSILON {
                        target = position;
                    }
                }
            }
        } else {
            for (position, entry) in self.entries.iter().enumerate() {
                if matches!(entry.source, PacketSource::Audio { .. }) && entry.time <= time + EPSILON {
                    target = position;
                }
            }
        }
        debug!("虚拟容器 Seek {:.3}s -> 包位置 {}", time, target);
        self.position = target;
        Ok(())
    }

    fn open_video_codec(&self, stream: StreamIndex, use_hw_accel: bool) -> Result<Box<dyn VideoCodec>> {
        let video = match (&self.media.video, self.video_index) {
            (Some(video), Some(index)) if index == stream => video.clone(),
            _ => return Err(DecoderError::CodecNotFound(format!("流 {} 不是视频流", stream))),
        };
        if video.fail_codec_init {
            return Err(DecoderError::CodecInitError("synthetic-video 初始化失败".to_string()));
        }
        let format = video
            .format
            .ok_or_else(|| DecoderError::UnsupportedPixelFormat("synthetic".to_string()))?;
        Ok(Box::new(SyntheticVideoCodec {
            hw: use_hw_accel && video.hw_capable,
            format,
            video,
            delayed: VecDeque::new(),
        }))
    }

    fn open_audio_codec(&self, stream: StreamIndex) -> Result<Box<dyn AudioCodec>> {
        let audio = match (&self.media.audio, self.audio_index) {
            (Some(audio), Some(index)) if index == stream => audio.clone(),
            _ => return Err(DecoderError::CodecNotFound(format!("流 {} 不是音频流", stream))),
        };
        if audio.fail_codec_init {
            return Err(DecoderError::CodecInitError("synthetic-audio 初始化失败".to_string()));
        }
        Ok(Box::new(SyntheticAudioCodec { audio }))
    }

    fn description(&self) -> String {
        format!("Synthetic Demuxer: {}", self.path)
    }
}

fn parse_header(data: &[u8], kind: u8) -> Result<u32> {
    if data.len() < 6 || data[0] != MAGIC || data[1] != kind {
        return Err(DecoderError::DecodeError("数据包损坏".to_string()));
    }
    Ok(u32::from_le_bytes([data[2], data[3], data[4], data[5]]))
}

/// 虚拟视频解码器
struct SyntheticVideoCodec {
    video: SyntheticVideo,
    format: PixelFormat,
    hw: bool,
    delayed: VecDeque<RawVideoFrame>,
}

impl SyntheticVideoCodec {
    fn make_frame(&self, frame: usize) -> RawVideoFrame {
        let (w, h) = (self.video.width as usize, self.video.height as usize);
        let value = (frame % 256) as u8;
        let planes = match self.format {
            PixelFormat::Yuv420p => vec![
                Plane::new(vec![value; w * h], w),
                Plane::new(vec![128; (w / 2) * (h / 2)], w / 2),
                Plane::new(vec![128; (w / 2) * (h / 2)], w / 2),
            ],
            PixelFormat::Nv12 => vec![
                Plane::new(vec![value; w * h], w),
                Plane::new(vec![128; w * (h / 2)], w),
            ],
            packed => {
                let bpp = packed.bytes_per_pixel().unwrap_or(4);
                vec![Plane::new(vec![value; w * h * bpp], w * bpp)]
            }
        };
        RawVideoFrame {
            pts: self.video.timestamps.then(|| self.video.frame_time(frame)),
            time: 0.0,
            width: self.video.width,
            height: self.video.height,
            format: self.format,
            color: ColorInfo::default(),
            planes,
        }
    }
}

impl VideoCodec for SyntheticVideoCodec {
    fn name(&self) -> &str {
        "synthetic-video"
    }

    fn is_hardware_accelerated(&self) -> bool {
        self.hw
    }

    fn native_format(&self) -> PixelFormat {
        self.format
    }

    fn frame_converter(&self) -> Box<dyn FrameConverter> {
        Box::new(SyntheticFrameConverter)
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawVideoFrame>> {
        let frame = parse_header(&packet.data, KIND_VIDEO)? as usize;
        self.delayed.push_back(self.make_frame(frame));
        let mut out = Vec::new();
        while self.delayed.len() > self.video.codec_delay {
            if let Some(frame) = self.delayed.pop_front() {
                out.push(frame);
            }
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<RawVideoFrame>> {
        Ok(self.delayed.drain(..).collect())
    }

    fn reset(&mut self) {
        self.delayed.clear();
    }
}

/// 虚拟音频解码器
struct SyntheticAudioCodec {
    audio: SyntheticAudio,
}

impl AudioCodec for SyntheticAudioCodec {
    fn name(&self) -> &str {
        "synthetic-audio"
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<PcmFrame>> {
        let start = parse_header(&packet.data, KIND_AUDIO)? as usize;
        if packet.data.len() < 10 {
            return Err(DecoderError::DecodeError("音频包长度不足".to_string()));
        }
        let frames = u32::from_le_bytes([packet.data[6], packet.data[7], packet.data[8], packet.data[9]]) as usize;
        Ok(vec![PcmFrame {
            pts: Some(start as f64 / self.audio.sample_rate as f64),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            samples: vec![self.audio.amplitude; frames * self.audio.channels as usize],
        }])
    }

    fn flush(&mut self) -> Result<Vec<PcmFrame>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(media: SyntheticMedia) -> Box<dyn Container> {
        SyntheticBackend::new()
            .with_media("a.synth", media)
            .open(Path::new("a.synth"))
            .unwrap()
    }

    #[test]
    fn test_unknown_path_fails_to_open() {
        let backend = SyntheticBackend::new();
        assert!(matches!(
            backend.open(Path::new("missing.synth")),
            Err(DecoderError::OpenError { .. })
        ));
    }

    #[test]
    fn test_unrecognized_container() {
        let backend = SyntheticBackend::new().with_media("x", SyntheticMedia::new().unrecognized());
        assert!(matches!(
            backend.open(Path::new("x")),
            Err(DecoderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_packets_are_interleaved_by_time() {
        let mut container = open(
            SyntheticMedia::new()
                .with_video(SyntheticVideo::new(25.0, 1.0))
                .with_audio(SyntheticAudio::new(48000, 2, 1.0))
                .with_data_stream(),
        );
        assert_eq!(container.streams().len(), 3);
        let mut last = -1.0;
        let mut count = 0;
        while let Some(packet) = container.read_packet().unwrap() {
            let time = packet.dts.unwrap();
            assert!(time >= last);
            last = time;
            count += 1;
        }
        // 25 视频 + 47 音频 + 2 数据
        assert_eq!(count, 25 + 47 + 2);
    }

    #[test]
    fn test_codec_delay_holds_frames_until_flush() {
        let mut container = open(
            SyntheticMedia::new().with_video(SyntheticVideo::new(10.0, 0.5).with_codec_delay(2)),
        );
        let mut codec = container.open_video_codec(0, false).unwrap();
        let mut decoded = 0;
        while let Some(packet) = container.read_packet().unwrap() {
            decoded += codec.decode(&packet).unwrap().len();
        }
        assert_eq!(decoded, 3);
        assert_eq!(codec.flush().unwrap().len(), 2);
    }

    #[test]
    fn test_codec_converter_handles_native_frames() {
        let mut container = open(
            SyntheticMedia::new().with_video(SyntheticVideo::new(10.0, 0.5).with_format(PixelFormat::Nv12)),
        );
        let mut codec = container.open_video_codec(0, false).unwrap();
        let mut converter = codec.frame_converter();
        let packet = container.read_packet().unwrap().unwrap();
        let raw = codec.decode(&packet).unwrap().remove(0);
        assert_eq!(raw.format, PixelFormat::Nv12);

        let planar = converter.convert(&raw, PixelFormat::Yuv420p).unwrap();
        assert_eq!(planar.planes.len(), 3);
        assert_eq!(planar.planes[0], raw.planes[0]);

        let packed = converter.convert(&raw, PixelFormat::Bgra).unwrap();
        assert_eq!(packed.format, PixelFormat::Bgra);
        assert_eq!(packed.planes[0].stride, raw.width as usize * 4);
    }

    #[test]
    fn test_corrupt_packet_fails_to_decode() {
        let mut container = open(
            SyntheticMedia::new().with_video(SyntheticVideo::new(10.0, 0.3).with_corrupt_frames(vec![1])),
        );
        let mut codec = container.open_video_codec(0, false).unwrap();
        let results: Vec<bool> = std::iter::from_fn(|| container.read_packet().unwrap())
            .map(|p| codec.decode(&p).is_ok())
            .collect();
        assert_eq!(results, vec![true, false, true]);
    }

    #[test]
    fn test_seek_prefers_later_duplicate_keyframe() {
        let mut container = open(
            SyntheticMedia::new().with_video(
                SyntheticVideo::new(10.0, 2.0)
                    .with_keyframe_interval(5)
                    .with_duplicated_frames(vec![10]),
            ),
        );
        container.seek(1.2).unwrap();
        let packet = container.read_packet().unwrap().unwrap();
        assert_eq!(packet.dts, Some(1.0));
        assert!(packet.keyframe);
        // 重复包的最后一个字节为 1
        assert_eq!(packet.data[6], 1);
    }

    #[test]
    fn test_failing_codec_init() {
        let container = open(SyntheticMedia::new().with_video(SyntheticVideo::new(10.0, 1.0).with_failing_codec()));
        assert!(matches!(
            container.open_video_codec(0, false),
            Err(DecoderError::CodecInitError(_))
        ));
    }
}
