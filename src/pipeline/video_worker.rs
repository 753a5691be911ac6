use crate::backend::VideoCodec;
use crate::core::RawVideoFrame;
use crate::pipeline::message::{DecodedMsg, PacketMsg, PacketQueue, SeekEpoch};
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::worker::{log_ctx, WorkStatus, Worker};
use log::{debug, info, trace, warn};
use std::sync::Arc;

/// 容器没有声明帧率时使用的帧率
pub const FALLBACK_FPS: f64 = 25.0;

pub type VideoFrameQueue = BoundedQueue<DecodedMsg<RawVideoFrame>>;

/// 视频解码状态（同步解码器直接调用，异步解码器包在 VideoDecodeWorker 里）
///
/// 负责把数据包消息变成带显示时间的原始帧：
/// - fps 为 0 时使用帧自身的时间戳，缺失时从上一帧外推
/// - fps 非 0 时从上一帧按 1/fps 递增
/// - SeekDone 之后丢弃早于目标时间半帧以上的帧（预滚）
/// - EndOfFile 时 flush 编解码器，取出延迟帧后再发 EndOfStream
pub struct VideoFrameDecoder {
    codec: Box<dyn VideoCodec>,
    nominal_fps: f64,
    fps: f64,
    epoch: SeekEpoch,
    last_time: Option<f64>,
    /// Seek 后的基准时间（固定帧率模式下第一帧没有时间戳时使用）
    seek_time: f64,
    preroll_target: Option<f64>,
    eof: bool,
    frames_decoded: u64,
    errors: u64,
}

impl VideoFrameDecoder {
    pub fn new(codec: Box<dyn VideoCodec>, nominal_fps: f64, fps: f64) -> Self {
        Self {
            codec,
            nominal_fps,
            fps,
            epoch: 0,
            last_time: None,
            seek_time: 0.0,
            preroll_target: None,
            eof: false,
            frames_decoded: 0,
            errors: 0,
        }
    }

    pub fn set_fps(&mut self, fps: f64) {
        debug!("视频帧率模式: {}", if fps > 0.0 { format!("固定 {:.3} fps", fps) } else { "容器时间戳".to_string() });
        self.fps = fps;
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// 帧间隔（秒）
    pub fn frame_period(&self) -> f64 {
        let fps = if self.fps > 0.0 {
            self.fps
        } else if self.nominal_fps > 0.0 {
            self.nominal_fps
        } else {
            FALLBACK_FPS
        };
        1.0 / fps
    }

    /// 已发出 EndOfStream（直到下一次 Seek）
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn epoch(&self) -> SeekEpoch {
        self.epoch
    }

    pub fn codec(&self) -> &dyn VideoCodec {
        self.codec.as_ref()
    }

    /// 处理一条数据包消息
    pub fn handle(&mut self, msg: PacketMsg) -> Vec<DecodedMsg<RawVideoFrame>> {
        match msg {
            PacketMsg::Packet(packet) => {
                if self.eof {
                    trace!("EOF 之后收到数据包，忽略");
                    return Vec::new();
                }
                match self.codec.decode(&packet) {
                    Ok(frames) => self.stamp_frames(frames),
                    Err(e) => {
                        // 单个损坏的包：记录并跳过
                        self.errors += 1;
                        warn!("{} ⚠ 视频解码错误（已跳过，第 {} 次）: {}", log_ctx(), self.errors, e);
                        Vec::new()
                    }
                }
            }
            PacketMsg::SeekDone { epoch, time } => {
                debug!("{} 视频解码收到 SeekDone: {:.3}s (epoch {})", log_ctx(), time, epoch);
                self.codec.reset();
                self.epoch = epoch;
                self.last_time = None;
                self.seek_time = time;
                self.preroll_target = Some(time);
                self.eof = false;
                vec![DecodedMsg::SeekDone { epoch, time }]
            }
            PacketMsg::EndOfFile => {
                if self.eof {
                    return Vec::new();
                }
                let mut out = match self.codec.flush() {
                    Ok(frames) => {
                        if !frames.is_empty() {
                            debug!("{} flush 取出 {} 个延迟帧", log_ctx(), frames.len());
                        }
                        self.stamp_frames(frames)
                    }
                    Err(e) => {
                        warn!("{} ⚠ 视频解码器 flush 失败: {}", log_ctx(), e);
                        Vec::new()
                    }
                };
                self.eof = true;
                info!(
                    "{} 📄 视频流结束（解码 {} 帧，错误 {} 次）",
                    log_ctx(),
                    self.frames_decoded,
                    self.errors
                );
                out.push(DecodedMsg::EndOfStream { epoch: self.epoch });
                out
            }
        }
    }

    fn stamp_frames(&mut self, frames: Vec<RawVideoFrame>) -> Vec<DecodedMsg<RawVideoFrame>> {
        let epoch = self.epoch;
        frames
            .into_iter()
            .filter_map(|frame| self.stamp(frame))
            .map(|item| DecodedMsg::Data { epoch, item })
            .collect()
    }

    /// 计算显示时间；预滚阶段的帧返回 None
    fn stamp(&mut self, mut frame: RawVideoFrame) -> Option<RawVideoFrame> {
        let period = self.frame_period();
        let time = if self.fps > 0.0 {
            match self.last_time {
                Some(last) => last + period,
                None => frame.pts.unwrap_or(self.seek_time),
            }
        } else {
            match (frame.pts, self.last_time) {
                (Some(pts), _) => pts,
                (None, Some(last)) => last + period,
                (None, None) => self.seek_time,
            }
        };
        self.last_time = Some(time);
        frame.time = time;

        if let Some(target) = self.preroll_target {
            if time < target - period / 2.0 {
                trace!("预滚丢弃帧 {:.3}s（目标 {:.3}s）", time, target);
                return None;
            }
            self.preroll_target = None;
        }
        self.frames_decoded += 1;
        Some(frame)
    }
}

/// 视频解码线程命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoCommand {
    SetFps(f64),
}

/// 视频解码线程
pub struct VideoDecodeWorker {
    decoder: VideoFrameDecoder,
    packets: Arc<PacketQueue>,
    output: Arc<VideoFrameQueue>,
}

impl VideoDecodeWorker {
    pub fn new(decoder: VideoFrameDecoder, packets: Arc<PacketQueue>, output: Arc<VideoFrameQueue>) -> Self {
        Self {
            decoder,
            packets,
            output,
        }
    }
}

impl Worker for VideoDecodeWorker {
    type Command = VideoCommand;

    fn name(&self) -> &str {
        "video-decode"
    }

    fn init(&mut self) -> crate::core::Result<()> {
        info!(
            "{} 🎞 视频解码器: {}{}",
            log_ctx(),
            self.decoder.codec().name(),
            if self.decoder.codec().is_hardware_accelerated() { "（硬件）" } else { "" }
        );
        Ok(())
    }

    fn work(&mut self) -> WorkStatus {
        // 取数据包是唯一的阻塞点；队列关闭即退出
        let msg = match self.packets.pop(true) {
            Ok(Some(msg)) => msg,
            Ok(None) => return WorkStatus::Continue,
            Err(_) => return WorkStatus::Finished,
        };
        for out in self.decoder.handle(msg) {
            if self.output.push(out).is_err() {
                return WorkStatus::Finished;
            }
        }
        WorkStatus::Continue
    }

    fn handle_commands(&mut self, commands: Vec<VideoCommand>) {
        for cmd in commands {
            match cmd {
                VideoCommand::SetFps(fps) => self.decoder.set_fps(fps),
            }
        }
    }

    fn deinit(&mut self) {
        debug!("{} 视频解码线程清理", log_ctx());
    }
}
