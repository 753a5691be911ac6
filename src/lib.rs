//! myy_decode - 多线程音视频解码与同步管线
//!
//! 解封装线程把数据包分发到每个子流的有界队列，视频/音频解码线程各自消费，
//! 解码器外观按显示引擎给出的时间选帧，并为音频引擎提供非阻塞的采样拉取。
//! Seek 通过 epoch 编号丢弃过期数据。

pub mod backend;
pub mod core;
pub mod decoder;
#[cfg(feature = "audio-output")]
pub mod output;
pub mod pipeline;

pub use crate::core::{
    AudioBuffer, AudioParams, DecoderConfig, DecoderError, DecoderState, FrameAvailable, MediaContext, PixelFormat,
    PlaybackClock, Result, StreamSelect, VideoFrame, VideoInfo,
};
pub use crate::decoder::{
    create_decoder, AsyncVideoDecoder, AudioPullHandle, FrameStats, SyncVideoDecoder, VideoDecoder,
};
