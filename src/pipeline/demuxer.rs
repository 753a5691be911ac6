use crate::backend::Container;
use crate::core::{Result, StreamIndex, StreamInfo};
use crate::pipeline::message::{PacketMsg, SeekEpoch};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, VecDeque};

/// 解封装器接口
///
/// 同步实现直接读容器；线程实现由后台线程读容器，get_packet 只是出队。
pub trait Demuxer: Send {
    /// 登记需要接收数据包的子流，未登记子流的数据包直接丢弃
    fn enable_stream(&mut self, stream: StreamIndex);

    /// 取指定子流的下一条消息，EndOfFile 表示容器已读完
    fn get_packet(&mut self, stream: StreamIndex) -> Result<PacketMsg>;

    /// Seek 到 time 之前最近的关键帧，之后每个已登记子流先收到一条 SeekDone
    fn seek(&mut self, time: f64, epoch: SeekEpoch) -> Result<()>;

    fn streams(&self) -> &[StreamInfo];
}

/// 每个子流的辅助队列
#[derive(Default)]
struct StreamSlot {
    /// 已读出但尚未被该子流取走的数据包
    pending: VecDeque<PacketMsg>,
    /// Seek 之后尚未送出的 SeekDone
    seek_done: Option<(SeekEpoch, f64)>,
    /// 积压超限已告警，清空后复位
    backlog_warned: bool,
}

/// 同步解封装器
///
/// 一次顺序读取同时满足多个子流：读到其他已登记子流的包时暂存到对应辅助队列，
/// 不重复读文件。只能在单个线程中使用。
pub struct SyncDemuxer {
    container: Box<dyn Container>,
    slots: BTreeMap<StreamIndex, StreamSlot>,
    eof: bool,
    packets_read: usize,
    backlog_limit: usize,
}

/// 辅助队列积压告警阈值（默认）
const DEFAULT_BACKLOG_LIMIT: usize = 100;

impl SyncDemuxer {
    pub fn new(container: Box<dyn Container>) -> Self {
        info!("创建同步 Demuxer: {}", container.description());
        Self {
            container,
            slots: BTreeMap::new(),
            eof: false,
            packets_read: 0,
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }

    /// 辅助队列超过 limit 个包时告警（调用方只拉取了部分子流）
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit.max(1);
        self
    }

    /// 子流辅助队列是否超过告警阈值
    pub fn is_backlogged(&self, stream: StreamIndex) -> bool {
        self.pending_packets(stream) > self.backlog_limit
    }

    /// 辅助队列中暂存的数据包数量
    pub fn pending_packets(&self, stream: StreamIndex) -> usize {
        self.slots.get(&stream).map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn container(&self) -> &dyn Container {
        self.container.as_ref()
    }
}

impl Demuxer for SyncDemuxer {
    fn enable_stream(&mut self, stream: StreamIndex) {
        debug!("同步 Demuxer 启用子流 {}", stream);
        self.slots.entry(stream).or_default();
    }

    fn get_packet(&mut self, stream: StreamIndex) -> Result<PacketMsg> {
        {
            let slot = self.slots.entry(stream).or_default();
            if let Some((epoch, time)) = slot.seek_done.take() {
                return Ok(PacketMsg::SeekDone { epoch, time });
            }
            if let Some(msg) = slot.pending.pop_front() {
                if slot.pending.is_empty() {
                    slot.backlog_warned = false;
                }
                return Ok(msg);
            }
        }
        if self.eof {
            return Ok(PacketMsg::EndOfFile);
        }

        loop {
            let packet = match self.container.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("📄 同步 Demuxer 到达文件末尾（共读取 {} 个包）", self.packets_read);
                    self.eof = true;
                    return Ok(PacketMsg::EndOfFile);
                }
                Err(e) => {
                    error!("❌ 读取包失败，按文件结束处理: {}", e);
                    self.eof = true;
                    return Ok(PacketMsg::EndOfFile);
                }
            };
            self.packets_read += 1;

            if packet.stream == stream {
                return Ok(PacketMsg::Packet(packet));
            }
            let other = packet.stream;
            match self.slots.get_mut(&other) {
                Some(slot) => {
                    slot.pending.push_back(PacketMsg::Packet(packet));
                    if slot.pending.len() > self.backlog_limit && !slot.backlog_warned {
                        slot.backlog_warned = true;
                        warn!(
                            "⚠ 子流 {} 积压 {} 个未取走的数据包（只拉取子流 {}？）",
                            other,
                            slot.pending.len(),
                            stream
                        );
                    }
                }
                None => {
                    // 未登记的子流，丢弃
                }
            }
        }
    }

    fn seek(&mut self, time: f64, epoch: SeekEpoch) -> Result<()> {
        info!("⏩ 同步 Demuxer Seek: {:.3}s", time);
        self.container.seek(time)?;
        self.eof = false;
        for slot in self.slots.values_mut() {
            slot.pending.clear();
            slot.backlog_warned = false;
            slot.seek_done = Some((epoch, time));
        }
        Ok(())
    }

    fn streams(&self) -> &[StreamInfo] {
        self.container.streams()
    }
}
