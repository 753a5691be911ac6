use crate::core::AudioBuffer;
use crate::decoder::selector::{classify, Classified};
use crate::pipeline::{AudioBufferQueue, DecodedMsg, SeekEpoch};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// 拉取状态中对外可见的部分
///
/// 渲染线程频繁查询 EOF / 时间 / Seek 标记，这些值放在原子变量里，
/// 查询不碰 `AudioPullState` 的锁，音频回调的 try_lock 因而不会被查询挤掉。
#[derive(Debug)]
pub(crate) struct AudioPullStatus {
    channels: u16,
    sample_rate: u32,
    seek_pending: AtomicBool,
    eof: AtomicBool,
    /// 下一个采样的显示时间（f64 位模式）
    time_bits: AtomicU64,
}

impl AudioPullStatus {
    fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            seek_pending: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            time_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::Acquire)
    }

    pub fn time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Acquire))
    }

    fn set_eof(&self, eof: bool) {
        self.eof.store(eof, Ordering::Release);
    }

    fn set_seek_pending(&self, pending: bool) {
        self.seek_pending.store(pending, Ordering::Release);
    }

    fn set_time(&self, time: f64) {
        self.time_bits.store(time.to_bits(), Ordering::Release);
    }
}

/// 音频拉取状态：当前未播完的缓冲 + Seek/EOF 标记
///
/// 由音频引擎的实时回调驱动，任何路径都不能阻塞。
#[derive(Debug)]
pub(crate) struct AudioPullState {
    status: Arc<AudioPullStatus>,
    epoch: SeekEpoch,
    current: Option<AudioBuffer>,
    /// current 中已消费的采样数（交错）
    offset: usize,
    underruns: u64,
}

impl AudioPullState {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            status: Arc::new(AudioPullStatus::new(channels.max(1), sample_rate)),
            epoch: 0,
            current: None,
            offset: 0,
            underruns: 0,
        }
    }

    /// 不经过锁即可读取的状态
    pub fn status(&self) -> Arc<AudioPullStatus> {
        self.status.clone()
    }

    pub fn reset_for_seek(&mut self, epoch: SeekEpoch, time: f64) {
        self.epoch = epoch;
        self.current = None;
        self.offset = 0;
        self.status.set_seek_pending(true);
        self.status.set_eof(false);
        self.status.set_time(time);
    }

    pub fn is_eof(&self) -> bool {
        self.status.is_eof()
    }

    pub fn seek_pending(&self) -> bool {
        self.status.seek_pending()
    }

    pub fn time(&self) -> f64 {
        self.status.time()
    }

    /// 填充交错 f32 缓冲，返回填入的真实采样帧数，其余部分补静音
    pub fn fill(
        &mut self,
        out: &mut [f32],
        mut next: impl FnMut() -> Option<DecodedMsg<AudioBuffer>>,
    ) -> usize {
        let channels = self.status.channels as usize;
        let sample_rate = self.status.sample_rate.max(1) as f64;
        let mut filled = 0;

        while filled < out.len() {
            if let Some(buffer) = &self.current {
                let available = buffer.samples.len() - self.offset;
                let n = available.min(out.len() - filled);
                out[filled..filled + n].copy_from_slice(&buffer.samples[self.offset..self.offset + n]);
                filled += n;
                self.offset += n;
                self.status
                    .set_time(buffer.time + (self.offset / channels) as f64 / sample_rate);
                if self.offset >= buffer.samples.len() {
                    self.current = None;
                    self.offset = 0;
                }
                continue;
            }

            if self.status.is_eof() {
                break;
            }
            let Some(msg) = next() else {
                break;
            };
            match classify(msg, self.epoch) {
                Classified::Stale => trace!("丢弃旧 epoch 的音频缓冲"),
                Classified::Resync(time) => {
                    debug!("音频 Seek 完成: {:.3}s", time);
                    self.status.set_seek_pending(false);
                    self.status.set_time(time);
                }
                Classified::Item(buffer) => {
                    if buffer.channels != self.status.channels {
                        debug!("音频缓冲声道数不符 ({} != {})，丢弃", buffer.channels, self.status.channels);
                        continue;
                    }
                    self.current = Some(buffer);
                    self.offset = 0;
                }
                Classified::End => {
                    debug!("音频拉取到达流末尾");
                    self.status.set_eof(true);
                }
            }
        }

        if filled < out.len() {
            if !self.status.is_eof() && !out.is_empty() {
                self.underruns += 1;
                trace!("音频欠载 #{}: {}/{}", self.underruns, filled, out.len());
            }
            out[filled..].fill(0.0);
        }
        filled / channels
    }
}

pub(crate) struct AudioPullShared {
    /// 只有音频回调和 Seek 会加锁；查询走 `status`
    pub state: Mutex<AudioPullState>,
    pub status: Arc<AudioPullStatus>,
    pub queue: Arc<AudioBufferQueue>,
}

impl AudioPullShared {
    pub fn new(state: AudioPullState, queue: Arc<AudioBufferQueue>) -> Self {
        Self {
            status: state.status(),
            state: Mutex::new(state),
            queue,
        }
    }
}

/// 给音频回调线程用的拉取句柄
///
/// 可以跨线程复制；填充时只 try_lock，拿不到锁（解码器正在 Seek）就输出静音。
#[derive(Clone)]
pub struct AudioPullHandle {
    shared: Arc<AudioPullShared>,
}

impl AudioPullHandle {
    pub(crate) fn new(shared: Arc<AudioPullShared>) -> Self {
        Self { shared }
    }

    /// 填充交错 f32 缓冲，返回真实采样帧数
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let Some(mut state) = self.shared.state.try_lock() else {
            out.fill(0.0);
            return 0;
        };
        let queue = &self.shared.queue;
        state.fill(out, || queue.pop(false).ok().flatten())
    }

    pub fn channels(&self) -> u16 {
        self.shared.status.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.status.sample_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn buffer(time: f64, frames: usize, value: f32) -> AudioBuffer {
        AudioBuffer {
            time,
            sample_rate: 100,
            channels: 2,
            samples: vec![value; frames * 2],
            start_volume: 1.0,
            end_volume: 1.0,
        }
    }

    #[test]
    fn test_fill_spans_buffers_and_pads_silence() {
        let mut msgs: VecDeque<_> = vec![
            DecodedMsg::Data { epoch: 0, item: buffer(0.0, 3, 0.5) },
            DecodedMsg::Data { epoch: 0, item: buffer(0.03, 3, 0.25) },
        ]
        .into();
        let mut state = AudioPullState::new(2, 100);
        let mut out = vec![9.0; 8 * 2];
        let frames = state.fill(&mut out, || msgs.pop_front());
        assert_eq!(frames, 6);
        assert_eq!(&out[..6], &[0.5; 6]);
        assert_eq!(&out[6..12], &[0.25; 6]);
        assert!(out[12..].iter().all(|&s| s == 0.0));
        assert!((state.time() - 0.06).abs() < 1e-9);
        assert!(!state.is_eof());
    }

    #[test]
    fn test_stale_buffers_skipped_after_seek() {
        let mut msgs: VecDeque<_> = vec![
            DecodedMsg::Data { epoch: 0, item: buffer(0.0, 4, 0.5) },
            DecodedMsg::SeekDone { epoch: 1, time: 2.0 },
            DecodedMsg::Data { epoch: 1, item: buffer(2.0, 4, 0.75) },
            DecodedMsg::EndOfStream { epoch: 1 },
        ]
        .into();
        let mut state = AudioPullState::new(2, 100);
        state.reset_for_seek(1, 2.0);
        assert!(state.seek_pending());
        let mut out = vec![0.0; 16];
        let frames = state.fill(&mut out, || msgs.pop_front());
        assert_eq!(frames, 4);
        assert_eq!(out[0], 0.75);
        assert!(!state.seek_pending());
        assert!(state.is_eof());
    }

    #[test]
    fn test_handle_fills_silence_when_queue_empty() {
        let shared = Arc::new(AudioPullShared::new(
            AudioPullState::new(2, 48000),
            Arc::new(AudioBufferQueue::new(4)),
        ));
        let handle = AudioPullHandle::new(shared);
        let mut out = vec![1.0; 32];
        assert_eq!(handle.fill(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_status_readable_while_state_locked() {
        let queue = Arc::new(AudioBufferQueue::new(4));
        let shared = Arc::new(AudioPullShared::new(AudioPullState::new(2, 100), queue.clone()));
        queue.push(DecodedMsg::Data { epoch: 0, item: buffer(1.0, 5, 0.5) }).unwrap();
        queue.push(DecodedMsg::EndOfStream { epoch: 0 }).unwrap();

        let handle = AudioPullHandle::new(shared.clone());
        let mut out = vec![0.0; 4 * 2];
        assert_eq!(handle.fill(&mut out), 4);
        assert!((shared.status.time() - 1.04).abs() < 1e-9);

        // 回调持锁期间，查询不会阻塞
        let guard = shared.state.lock();
        assert!(!shared.status.is_eof());
        assert!(!shared.status.seek_pending());
        assert!((shared.status.time() - 1.04).abs() < 1e-9);
        assert_eq!(handle.channels(), 2);
        drop(guard);

        let mut out = vec![0.0; 4 * 2];
        assert_eq!(handle.fill(&mut out), 1);
        assert!(shared.status.is_eof());
    }
}
