use crate::core::{RawVideoFrame, Result};
use crate::pipeline::{DecodedMsg, SeekEpoch};
use log::trace;
use serde::Serialize;

/// 帧来源（同步解码器现场解码，异步解码器从队列取）
pub(crate) trait FrameSource {
    fn next_frame(&mut self) -> Result<NextFrame>;
}

/// 取下一帧的结果
#[derive(Debug)]
pub(crate) enum NextFrame {
    Frame(RawVideoFrame),
    /// 当前 epoch 的流已结束
    EndOfStream,
    /// 等待超时，暂时没有帧
    Pending,
}

/// 对解码输出消息按 epoch 分类
#[derive(Debug, PartialEq)]
pub(crate) enum Classified<T> {
    /// 旧 epoch 的残留，丢弃
    Stale,
    /// 当前 epoch 的 SeekDone
    Resync(f64),
    Item(T),
    End,
}

pub(crate) fn classify<T>(msg: DecodedMsg<T>, current: SeekEpoch) -> Classified<T> {
    if msg.epoch() != current {
        return Classified::Stale;
    }
    match msg {
        DecodedMsg::Data { item, .. } => Classified::Item(item),
        DecodedMsg::SeekDone { time, .. } => Classified::Resync(time),
        DecodedMsg::EndOfStream { .. } => Classified::End,
    }
}

/// 帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// 以 NewFrame 交付的帧数
    pub delivered: u64,
    /// 因为过时而丢弃的帧数
    pub dropped: u64,
}

/// 选帧结果
#[derive(Debug)]
pub(crate) enum Selection {
    Frame(RawVideoFrame),
    UseLast,
    EndOfStream,
}

/// 基于时间的选帧
///
/// - 距上次交付的帧不到半帧且没有待完成的 Seek：直接沿用上一帧，不取新帧
/// - 早于 `t - 半帧` 的帧直接丢弃
/// - 晚于 `t + 半帧` 的帧留到之后的调用
#[derive(Debug, Default)]
pub(crate) struct FrameSelector {
    last_time: Option<f64>,
    held: Option<RawVideoFrame>,
    stats: FrameStats,
}

impl FrameSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seek 后丢弃暂存帧和时间基准
    pub fn reset(&mut self) {
        self.last_time = None;
        self.held = None;
    }

    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn select(
        &mut self,
        source: &mut dyn FrameSource,
        time: f64,
        period: f64,
        seek_pending: bool,
    ) -> Result<Selection> {
        let half = period / 2.0;
        if !seek_pending {
            if let Some(last) = self.last_time {
                if (time - last).abs() < half {
                    return Ok(Selection::UseLast);
                }
            }
        }

        loop {
            let frame = match self.held.take() {
                Some(frame) => frame,
                None => match source.next_frame()? {
                    NextFrame::Frame(frame) => frame,
                    NextFrame::EndOfStream => return Ok(Selection::EndOfStream),
                    NextFrame::Pending => return Ok(Selection::UseLast),
                },
            };

            if frame.time < time - half {
                trace!("丢弃过时帧 {:.3}s（需要 {:.3}s）", frame.time, time);
                self.stats.dropped += 1;
                continue;
            }
            if frame.time > time + half {
                trace!("帧 {:.3}s 尚未到时间（需要 {:.3}s），暂存", frame.time, time);
                self.held = Some(frame);
                return Ok(Selection::UseLast);
            }

            self.last_time = Some(frame.time);
            self.stats.delivered += 1;
            return Ok(Selection::Frame(frame));
        }
    }
}
