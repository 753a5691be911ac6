// 解码管线：解封装 -> 数据包队列 -> 解码线程 -> 解码输出队列

pub mod audio_worker;
pub mod demuxer;
pub mod demuxer_thread;
pub mod message;
pub mod queue;
pub mod resample;
pub mod video_worker;
pub mod worker;

pub use audio_worker::{AudioBufferQueue, AudioCommand, AudioDecodeWorker, AudioFrameDecoder, VolumeRamp};
pub use demuxer::{Demuxer, SyncDemuxer};
pub use demuxer_thread::{DemuxerCommand, ThreadedDemuxer};
pub use message::{DecodedMsg, PacketMsg, PacketQueue, SeekEpoch};
pub use queue::{BoundedQueue, QueueClosed, TryPushError};
pub use resample::{remix_channels, AudioConverter, ResampledChunk};
pub use video_worker::{VideoCommand, VideoDecodeWorker, VideoFrameDecoder, VideoFrameQueue, FALLBACK_FPS};
pub use worker::{WorkStatus, Worker, WorkerThread};
