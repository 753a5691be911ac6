use crate::backend::FrameConverter;
use crate::core::{
    validate_fps, AudioBuffer, AudioParams, DecoderConfig, DecoderError, DecoderState, FrameAvailable, MediaContext,
    PixelFormat, RawVideoFrame, Result, StreamIndex, StreamSelect, VideoInfo,
};
use crate::decoder::audio_pull::AudioPullState;
use crate::decoder::media::{choose_pixel_format, open_media, OpenedMedia};
use crate::decoder::selector::{classify, Classified, FrameSelector, FrameSource, FrameStats, NextFrame, Selection};
use crate::decoder::{check_state, frame_period, VideoDecoder};
use crate::pipeline::{
    AudioFrameDecoder, DecodedMsg, Demuxer, SeekEpoch, SyncDemuxer, VideoFrameDecoder,
};
use log::{debug, info};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

struct SyncVideo {
    stream: StreamIndex,
    decoder: VideoFrameDecoder,
    ready: VecDeque<DecodedMsg<RawVideoFrame>>,
}

struct SyncAudio {
    stream: StreamIndex,
    decoder: AudioFrameDecoder,
    ready: VecDeque<DecodedMsg<AudioBuffer>>,
}

/// 调用线程里现场读包、解码
struct SyncFrameSource<'a> {
    demuxer: &'a mut SyncDemuxer,
    video: &'a mut SyncVideo,
    epoch: SeekEpoch,
    seek_pending: &'a mut bool,
}

impl FrameSource for SyncFrameSource<'_> {
    fn next_frame(&mut self) -> Result<NextFrame> {
        loop {
            if let Some(msg) = self.video.ready.pop_front() {
                match classify(msg, self.epoch) {
                    Classified::Stale => {}
                    Classified::Resync(_) => *self.seek_pending = false,
                    Classified::Item(frame) => return Ok(NextFrame::Frame(frame)),
                    Classified::End => return Ok(NextFrame::EndOfStream),
                }
                continue;
            }
            // Seek 之后解码器处理 SeekDone 之前，is_eof 仍是旧 epoch 的状态
            if self.video.decoder.is_eof() && self.video.decoder.epoch() == self.epoch {
                return Ok(NextFrame::EndOfStream);
            }
            let msg = self.demuxer.get_packet(self.video.stream)?;
            let decoded = self.video.decoder.handle(msg);
            self.video.ready.extend(decoded);
        }
    }
}

/// 同步解码器：所有工作都在调用线程完成
pub struct SyncVideoDecoder {
    ctx: Arc<MediaContext>,
    config: DecoderConfig,
    state: DecoderState,
    info: Option<VideoInfo>,
    opened: Option<OpenedMedia>,
    demuxer: Option<SyncDemuxer>,
    video: Option<SyncVideo>,
    audio: Option<SyncAudio>,
    audio_pull: Option<AudioPullState>,
    selector: FrameSelector,
    epoch: SeekEpoch,
    seek_time: f64,
    video_seek_pending: bool,
    video_eof: bool,
    fps: f64,
    volume: f32,
    target_format: Option<PixelFormat>,
    /// 只转换真正交付的帧
    converter: Option<Box<dyn FrameConverter>>,
}

impl SyncVideoDecoder {
    pub fn new(ctx: Arc<MediaContext>, config: DecoderConfig) -> Self {
        let fps = config.fps;
        Self {
            ctx,
            config,
            state: DecoderState::Closed,
            info: None,
            opened: None,
            demuxer: None,
            video: None,
            audio: None,
            audio_pull: None,
            selector: FrameSelector::new(),
            epoch: 0,
            seek_time: 0.0,
            video_seek_pending: false,
            video_eof: false,
            fps,
            volume: 1.0,
            target_format: None,
            converter: None,
        }
    }

    fn seek_pending(&self) -> bool {
        self.video_seek_pending || self.audio_pull.as_ref().is_some_and(|a| a.seek_pending())
    }

    fn select_frame(&mut self, op: &'static str, time: f64) -> Result<Option<RawVideoFrame>> {
        check_state(op, self.state, DecoderState::Decoding)?;
        let period = frame_period(self.fps());
        let seek_pending = self.seek_pending();
        let (Some(demuxer), Some(video)) = (self.demuxer.as_mut(), self.video.as_mut()) else {
            return Ok(None);
        };
        if self.video_eof {
            return Ok(None);
        }
        let mut source = SyncFrameSource {
            demuxer,
            video,
            epoch: self.epoch,
            seek_pending: &mut self.video_seek_pending,
        };
        match self.selector.select(&mut source, time, period, seek_pending)? {
            Selection::Frame(frame) => Ok(Some(frame)),
            Selection::UseLast => Ok(None),
            Selection::EndOfStream => {
                info!("📄 视频播放到末尾");
                self.video_eof = true;
                Ok(None)
            }
        }
    }
}

impl VideoDecoder for SyncVideoDecoder {
    fn open(&mut self, path: &Path, use_hw_accel: bool, enable_sound: bool) -> Result<()> {
        check_state("open", self.state, DecoderState::Closed)?;
        let ctx = self.ctx.clone();
        let _guard = ctx.lock_open_close();
        let opened = open_media(&ctx, path, use_hw_accel, enable_sound)?;
        self.info = Some(opened.info.clone());
        self.opened = Some(opened);
        ctx.register_decoder();
        self.state = DecoderState::Opened;
        Ok(())
    }

    fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }
        let ctx = self.ctx.clone();
        let _guard = ctx.lock_open_close();
        debug!("关闭同步解码器");
        self.opened = None;
        self.demuxer = None;
        self.video = None;
        self.audio = None;
        self.audio_pull = None;
        self.info = None;
        self.selector = FrameSelector::new();
        self.target_format = None;
        self.converter = None;
        self.video_eof = false;
        self.video_seek_pending = false;
        ctx.unregister_decoder();
        self.state = DecoderState::Closed;
    }

    fn state(&self) -> DecoderState {
        self.state
    }

    fn start_decoding(&mut self, want_ycbcr: bool, audio_params: AudioParams) -> Result<()> {
        check_state("start_decoding", self.state, DecoderState::Opened)?;
        if audio_params.sample_rate == 0 || audio_params.channels == 0 {
            return Err(DecoderError::ConfigError("音频参数无效".to_string()));
        }
        let Some(opened) = self.opened.take() else {
            return Err(DecoderError::InvalidState {
                op: "start_decoding",
                state: self.state,
            });
        };

        let mut demuxer =
            SyncDemuxer::new(opened.container).with_backlog_limit(self.config.packet_queue_capacity);
        if let Some(track) = opened.video {
            demuxer.enable_stream(track.stream);
            let native = track.codec.native_format();
            self.target_format = Some(choose_pixel_format(native, want_ycbcr, self.config.packed_format));
            self.converter = Some(track.codec.frame_converter());
            self.video = Some(SyncVideo {
                stream: track.stream,
                decoder: VideoFrameDecoder::new(track.codec, track.params.fps, self.fps),
                ready: VecDeque::new(),
            });
        }
        if let Some(track) = opened.audio {
            demuxer.enable_stream(track.stream);
            self.audio = Some(SyncAudio {
                stream: track.stream,
                decoder: AudioFrameDecoder::new(track.codec, audio_params, self.volume),
                ready: VecDeque::new(),
            });
            self.audio_pull = Some(AudioPullState::new(audio_params.channels, audio_params.sample_rate));
        }
        self.demuxer = Some(demuxer);
        self.state = DecoderState::Decoding;
        info!(
            "▶ 同步解码开始，输出格式 {}",
            self.target_format.map(|f| f.to_string()).unwrap_or_else(|| "无视频".to_string())
        );
        Ok(())
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        check_state("seek", self.state, DecoderState::Decoding)?;
        let time = time.max(0.0);
        self.epoch += 1;
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.seek(time, self.epoch)?;
        }
        if let Some(video) = self.video.as_mut() {
            video.ready.clear();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.ready.clear();
        }
        if let Some(pull) = self.audio_pull.as_mut() {
            pull.reset_for_seek(self.epoch, time);
        }
        self.selector.reset();
        self.seek_time = time;
        self.video_seek_pending = self.video.is_some();
        self.video_eof = false;
        Ok(())
    }

    fn render_to_bmps(&mut self, time: f64) -> Result<FrameAvailable> {
        match self.select_frame("render_to_bmps", time)? {
            Some(raw) => {
                let format = self.target_format.unwrap_or(self.config.packed_format);
                match self.converter.as_mut() {
                    Some(converter) => Ok(FrameAvailable::NewFrame(converter.convert(&raw, format)?)),
                    None => Ok(FrameAvailable::UseLastFrame),
                }
            }
            None => Ok(FrameAvailable::UseLastFrame),
        }
    }

    fn throw_away_frame(&mut self, time: f64) -> Result<()> {
        self.select_frame("throw_away_frame", time).map(|_| ())
    }

    fn is_eof(&self, stream: StreamSelect) -> bool {
        let video = self.video.is_none() || self.video_eof;
        let audio = self.audio_pull.as_ref().map_or(true, |a| a.is_eof());
        match stream {
            StreamSelect::Video => video,
            StreamSelect::Audio => audio,
            StreamSelect::All => video && audio,
        }
    }

    fn cur_time(&self, stream: StreamSelect) -> f64 {
        let video = self.selector.last_time().unwrap_or(self.seek_time);
        let audio = self.audio_pull.as_ref().map_or(0.0, |a| a.time());
        match stream {
            StreamSelect::Video => video,
            StreamSelect::Audio => audio,
            StreamSelect::All => {
                if self.has_video() {
                    video
                } else {
                    audio
                }
            }
        }
    }

    fn cur_frame(&self) -> u64 {
        (self.cur_time(StreamSelect::Video) * self.fps()).round().max(0.0) as u64
    }

    fn nominal_fps(&self) -> f64 {
        self.info.as_ref().map_or(0.0, |i| i.nominal_fps)
    }

    fn fps(&self) -> f64 {
        if self.fps > 0.0 {
            self.fps
        } else {
            self.nominal_fps()
        }
    }

    fn set_fps(&mut self, fps: f64) -> Result<()> {
        validate_fps(fps)?;
        self.fps = fps;
        if let Some(video) = self.video.as_mut() {
            video.decoder.set_fps(fps);
        }
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.set_volume(self.volume);
        }
    }

    fn size(&self) -> (u32, u32) {
        self.info.as_ref().map_or((0, 0), |i| (i.width, i.height))
    }

    fn pixel_format(&self) -> Option<PixelFormat> {
        self.target_format
    }

    fn video_info(&self) -> Result<VideoInfo> {
        self.info.clone().ok_or(DecoderError::InvalidState {
            op: "video_info",
            state: self.state,
        })
    }

    fn has_video(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.has_video)
    }

    fn has_audio(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.has_audio)
    }

    fn fill_audio_buffer(&mut self, out: &mut [f32]) -> usize {
        let (Some(pull), Some(audio), Some(demuxer)) =
            (self.audio_pull.as_mut(), self.audio.as_mut(), self.demuxer.as_mut())
        else {
            out.fill(0.0);
            return 0;
        };
        let epoch = self.epoch;
        pull.fill(out, || loop {
            if let Some(msg) = audio.ready.pop_front() {
                return Some(msg);
            }
            if audio.decoder.is_eof() && audio.decoder.epoch() == epoch {
                return None;
            }
            match demuxer.get_packet(audio.stream) {
                Ok(msg) => {
                    let decoded = audio.decoder.handle(msg);
                    audio.ready.extend(decoded);
                }
                Err(_) => return None,
            }
        })
    }

    fn frame_stats(&self) -> FrameStats {
        self.selector.stats()
    }
}

impl Drop for SyncVideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
