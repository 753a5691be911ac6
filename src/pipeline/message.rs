use crate::core::Packet;
use crate::pipeline::queue::BoundedQueue;

/// Seek 序号，每次 Seek 加一
pub type SeekEpoch = u64;

/// 数据包队列里的消息
#[derive(Debug, Clone, PartialEq)]
pub enum PacketMsg {
    Packet(Packet),
    /// 之后的数据包都来自 Seek 后的新位置
    SeekDone { epoch: SeekEpoch, time: f64 },
    /// 容器读完，不会再有数据包
    EndOfFile,
}

/// 解码输出队列里的消息（视频帧或音频缓冲）
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMsg<T> {
    Data { epoch: SeekEpoch, item: T },
    SeekDone { epoch: SeekEpoch, time: f64 },
    /// 数据包耗尽且编解码器已 flush
    EndOfStream { epoch: SeekEpoch },
}

impl<T> DecodedMsg<T> {
    pub fn epoch(&self) -> SeekEpoch {
        match self {
            DecodedMsg::Data { epoch, .. }
            | DecodedMsg::SeekDone { epoch, .. }
            | DecodedMsg::EndOfStream { epoch } => *epoch,
        }
    }
}

/// 单个子流的数据包队列
pub type PacketQueue = BoundedQueue<PacketMsg>;
