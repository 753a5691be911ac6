use crate::backend::FrameConverter;
use crate::core::{
    validate_fps, AudioParams, DecoderConfig, DecoderError, DecoderState, FrameAvailable, MediaContext, PixelFormat,
    RawVideoFrame, Result, StreamSelect, VideoInfo,
};
use crate::decoder::audio_pull::{AudioPullHandle, AudioPullShared, AudioPullState};
use crate::decoder::media::{choose_pixel_format, open_media, OpenedMedia};
use crate::decoder::selector::{classify, Classified, FrameSelector, FrameSource, FrameStats, NextFrame, Selection};
use crate::decoder::{check_state, frame_period, VideoDecoder};
use crate::pipeline::{
    AudioBufferQueue, AudioCommand, AudioDecodeWorker, AudioFrameDecoder, Demuxer, SeekEpoch,
    ThreadedDemuxer, VideoCommand, VideoDecodeWorker, VideoFrameDecoder, VideoFrameQueue, WorkerThread,
};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

struct AsyncVideo {
    thread: WorkerThread<VideoCommand>,
    frames: Arc<VideoFrameQueue>,
}

struct AsyncAudio {
    thread: WorkerThread<AudioCommand>,
    shared: Arc<AudioPullShared>,
    handle: AudioPullHandle,
}

/// 从视频解码线程的输出队列取帧，等待时间有上限
struct QueueFrameSource<'a> {
    frames: &'a VideoFrameQueue,
    epoch: SeekEpoch,
    seek_pending: &'a mut bool,
    deadline: Instant,
}

impl FrameSource for QueueFrameSource<'_> {
    fn next_frame(&mut self) -> Result<NextFrame> {
        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            let msg = match self.frames.pop_timeout(remaining) {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    warn!("⚠ 等待视频帧超时");
                    return Ok(NextFrame::Pending);
                }
                // 队列已关闭，不会再有帧
                Err(_) => return Ok(NextFrame::EndOfStream),
            };
            match classify(msg, self.epoch) {
                Classified::Stale => {}
                Classified::Resync(time) => {
                    debug!("视频 Seek 完成: {:.3}s", time);
                    *self.seek_pending = false;
                }
                Classified::Item(frame) => return Ok(NextFrame::Frame(frame)),
                Classified::End => return Ok(NextFrame::EndOfStream),
            }
        }
    }
}

/// 异步解码器：解封装、视频解码、音频解码各占一个线程
///
/// 线程之间只通过有界队列和命令通道通信。
pub struct AsyncVideoDecoder {
    ctx: Arc<MediaContext>,
    config: DecoderConfig,
    state: DecoderState,
    info: Option<VideoInfo>,
    opened: Option<OpenedMedia>,
    demuxer: Option<ThreadedDemuxer>,
    video: Option<AsyncVideo>,
    audio: Option<AsyncAudio>,
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

impl AsyncVideoDecoder {
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

    fn spawn_pipeline(&mut self, opened: OpenedMedia, want_ycbcr: bool, audio_params: AudioParams) -> Result<()> {
        let mut demuxer = ThreadedDemuxer::new(opened.container, self.config.packet_queue_capacity);
        let video_track = opened.video;
        let audio_track = opened.audio;
        if let Some(track) = &video_track {
            demuxer.enable_stream(track.stream);
        }
        if let Some(track) = &audio_track {
            demuxer.enable_stream(track.stream);
        }

        if let Some(track) = video_track {
            let packets = demuxer
                .packet_queue(track.stream)
                .ok_or_else(|| DecoderError::ThreadError("视频数据包队列不存在".to_string()))?;
            let frames = Arc::new(VideoFrameQueue::new(self.config.video_queue_capacity));
            self.target_format = Some(choose_pixel_format(
                track.codec.native_format(),
                want_ycbcr,
                self.config.packed_format,
            ));
            self.converter = Some(track.codec.frame_converter());
            let decoder = VideoFrameDecoder::new(track.codec, track.params.fps, self.fps);
            let thread = WorkerThread::spawn(VideoDecodeWorker::new(decoder, packets, frames.clone()))?;
            self.video = Some(AsyncVideo { thread, frames });
        }

        if let Some(track) = audio_track {
            let packets = demuxer
                .packet_queue(track.stream)
                .ok_or_else(|| DecoderError::ThreadError("音频数据包队列不存在".to_string()))?;
            let queue = Arc::new(AudioBufferQueue::new(self.config.audio_queue_capacity));
            let decoder = AudioFrameDecoder::new(track.codec, audio_params, self.volume);
            let thread = WorkerThread::spawn(AudioDecodeWorker::new(decoder, packets, queue.clone()))?;
            let shared = Arc::new(AudioPullShared::new(
                AudioPullState::new(audio_params.channels, audio_params.sample_rate),
                queue,
            ));
            let handle = AudioPullHandle::new(shared.clone());
            self.audio = Some(AsyncAudio { thread, shared, handle });
        }

        demuxer.start()?;
        self.demuxer = Some(demuxer);
        Ok(())
    }

    /// 停止并 join 所有线程
    ///
    /// 先停解封装线程并关闭数据包队列（解码线程的 pop 随之返回），
    /// 再关闭输出队列（解除阻塞在 push 上的解码线程），最后 join。
    fn stop_threads(&mut self) {
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.stop();
        }
        if let Some(mut video) = self.video.take() {
            video.thread.request_stop();
            video.frames.close();
            video.thread.join();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.thread.request_stop();
            audio.shared.queue.close();
            audio.thread.join();
        }
    }

    fn seek_pending(&self) -> bool {
        self.video_seek_pending
            || self.audio.as_ref().is_some_and(|a| a.shared.status.seek_pending())
    }

    fn select_frame(&mut self, op: &'static str, time: f64) -> Result<Option<RawVideoFrame>> {
        check_state(op, self.state, DecoderState::Decoding)?;
        let period = frame_period(self.fps());
        let seek_pending = self.seek_pending();
        let Some(video) = self.video.as_ref() else {
            return Ok(None);
        };
        if self.video_eof {
            return Ok(None);
        }
        let mut source = QueueFrameSource {
            frames: &video.frames,
            epoch: self.epoch,
            seek_pending: &mut self.video_seek_pending,
            deadline: Instant::now() + self.config.render_timeout(),
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

impl VideoDecoder for AsyncVideoDecoder {
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
        info!("🛑 关闭异步解码器");
        self.stop_threads();
        self.opened = None;
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
        if let Err(e) = self.spawn_pipeline(opened, want_ycbcr, audio_params) {
            warn!("⚠ 启动解码线程失败: {}", e);
            self.close();
            return Err(e);
        }
        self.state = DecoderState::Decoding;
        info!(
            "▶ 异步解码开始，输出格式 {}",
            self.target_format.map(|f| f.to_string()).unwrap_or_else(|| "无视频".to_string())
        );
        Ok(())
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        check_state("seek", self.state, DecoderState::Decoding)?;
        let time = time.max(0.0);
        self.epoch += 1;
        debug!("⏩ Seek {:.3}s (epoch {})", time, self.epoch);

        if let Some(audio) = self.audio.as_ref() {
            audio.shared.state.lock().reset_for_seek(self.epoch, time);
            audio.shared.queue.clear();
        }
        if let Some(video) = self.video.as_ref() {
            video.frames.clear();
        }
        self.selector.reset();
        self.seek_time = time;
        self.video_seek_pending = self.video.is_some();
        self.video_eof = false;

        match self.demuxer.as_mut() {
            Some(demuxer) => demuxer.seek(time, self.epoch),
            None => Ok(()),
        }
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
        let audio = self.audio.as_ref().map_or(true, |a| a.shared.status.is_eof());
        match stream {
            StreamSelect::Video => video,
            StreamSelect::Audio => audio,
            StreamSelect::All => video && audio,
        }
    }

    fn cur_time(&self, stream: StreamSelect) -> f64 {
        let video = self.selector.last_time().unwrap_or(self.seek_time);
        let audio = self.audio.as_ref().map_or(0.0, |a| a.shared.status.time());
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
        if let Some(video) = self.video.as_ref() {
            video.thread.send(VideoCommand::SetFps(fps));
        }
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(audio) = self.audio.as_ref() {
            audio.thread.send(AudioCommand::SetVolume(self.volume));
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
        match self.audio.as_ref() {
            Some(audio) => audio.handle.fill(out),
            None => {
                out.fill(0.0);
                0
            }
        }
    }

    fn frame_stats(&self) -> FrameStats {
        self.selector.stats()
    }

    /// 没有音频流或尚未开始解码时为 None
    fn audio_pull_handle(&self) -> Option<AudioPullHandle> {
        self.audio.as_ref().map(|a| a.handle.clone())
    }
}

impl Drop for AsyncVideoDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
