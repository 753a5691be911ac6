use crate::backend::Container;
use crate::core::{DecoderError, Result, StreamIndex, StreamInfo};
use crate::pipeline::demuxer::Demuxer;
use crate::pipeline::message::{PacketMsg, PacketQueue, SeekEpoch};
use crate::pipeline::worker::{log_ctx, WorkStatus, Worker, WorkerThread};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Demuxer 线程命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemuxerCommand {
    Seek { time: f64, epoch: SeekEpoch },
}

/// 运行在解封装线程中的部分
struct DemuxWorker {
    container: Box<dyn Container>,
    queues: BTreeMap<StreamIndex, Arc<PacketQueue>>,
    eof: bool,
    packet_count: usize,
}

// 阈值（仅用于日志）
const LOG_FIRST_N: usize = 5;

impl DemuxWorker {
    fn seek(&mut self, time: f64, epoch: SeekEpoch) -> WorkStatus {
        info!("{} ⏩ Demuxer 线程执行 Seek: {:.3}s (epoch {})", log_ctx(), time, epoch);
        if let Err(e) = self.container.seek(time) {
            // 位置不变，但仍需发出 SeekDone，否则下游会一直等待
            error!("{} ❌ Seek 失败: {}", log_ctx(), e);
        }
        self.eof = false;
        self.packet_count = 0;

        for (stream, queue) in &self.queues {
            let cleared = queue.clear();
            if cleared > 0 {
                debug!("{} 🧹 子流 {} 清空 {} 个旧包", log_ctx(), stream, cleared);
            }
            if queue.push(PacketMsg::SeekDone { epoch, time }).is_err() {
                return WorkStatus::Finished;
            }
        }
        WorkStatus::Continue
    }

    fn push_end_of_file(&mut self) -> WorkStatus {
        self.eof = true;
        for queue in self.queues.values() {
            if queue.push(PacketMsg::EndOfFile).is_err() {
                return WorkStatus::Finished;
            }
        }
        // 到达 EOF：保持线程存活，等待 Seek/Stop
        WorkStatus::Idle
    }
}

impl Worker for DemuxWorker {
    type Command = DemuxerCommand;

    fn name(&self) -> &str {
        "demux"
    }

    fn work(&mut self) -> WorkStatus {
        if self.eof {
            return WorkStatus::Idle;
        }

        match self.container.read_packet() {
            Ok(Some(packet)) => {
                let Some(queue) = self.queues.get(&packet.stream) else {
                    // 跳过未启用的流
                    return WorkStatus::Continue;
                };
                self.packet_count += 1;
                if self.packet_count <= LOG_FIRST_N || self.packet_count % 500 == 0 {
                    debug!(
                        "{} 📦 Demuxer 读取包 #{}（子流 {}，队列 {}/{}）",
                        log_ctx(),
                        self.packet_count,
                        packet.stream,
                        queue.len(),
                        queue.capacity()
                    );
                }
                // 队列满时 push 阻塞，起到背压
                match queue.push(PacketMsg::Packet(packet)) {
                    Ok(()) => WorkStatus::Continue,
                    Err(_) => WorkStatus::Finished,
                }
            }
            Ok(None) => {
                info!("{} 📄 Demuxer 到达文件末尾，等待命令（Seek/Stop）...", log_ctx());
                self.push_end_of_file()
            }
            Err(e) => {
                error!("{} ❌ 读取包失败，按文件结束处理: {}", log_ctx(), e);
                self.push_end_of_file()
            }
        }
    }

    fn handle_commands(&mut self, commands: Vec<DemuxerCommand>) {
        // 多个 seek 命令堆积时只执行最后一个
        let mut last_seek = None;
        for cmd in commands {
            match cmd {
                DemuxerCommand::Seek { time, epoch } => {
                    if let Some((old_time, _)) = last_seek {
                        debug!("{} 跳过旧的 seek 命令: {:.3}s", log_ctx(), old_time);
                    }
                    last_seek = Some((time, epoch));
                }
            }
        }
        if let Some((time, epoch)) = last_seek {
            if self.seek(time, epoch) == WorkStatus::Finished {
                debug!("{} Seek 时队列已关闭", log_ctx());
            }
        }
    }
}

/// 线程化解封装器
///
/// 后台线程持续读包并推入各子流的有界队列；消费者对队列 pop 即可。
pub struct ThreadedDemuxer {
    streams: Vec<StreamInfo>,
    queues: BTreeMap<StreamIndex, Arc<PacketQueue>>,
    queue_capacity: usize,
    container: Option<Box<dyn Container>>,
    thread: Option<WorkerThread<DemuxerCommand>>,
}

impl ThreadedDemuxer {
    pub fn new(container: Box<dyn Container>, queue_capacity: usize) -> Self {
        Self {
            streams: container.streams().to_vec(),
            queues: BTreeMap::new(),
            queue_capacity,
            container: Some(container),
            thread: None,
        }
    }

    /// 启动解封装线程，之后不能再启用新的子流
    pub fn start(&mut self) -> Result<()> {
        let container = self
            .container
            .take()
            .ok_or_else(|| DecoderError::ThreadError("Demuxer 线程已启动".to_string()))?;
        info!("{} 🎬 启动 Demuxer 线程: {}", log_ctx(), container.description());
        let worker = DemuxWorker {
            container,
            queues: self.queues.clone(),
            eof: false,
            packet_count: 0,
        };
        self.thread = Some(WorkerThread::spawn(worker)?);
        Ok(())
    }

    /// 子流的数据包队列（交给解码线程）
    pub fn packet_queue(&self, stream: StreamIndex) -> Option<Arc<PacketQueue>> {
        self.queues.get(&stream).cloned()
    }

    /// 清空所有数据包队列（解除被背压阻塞的解封装线程）
    pub fn clear_queues(&self) {
        for queue in self.queues.values() {
            queue.clear();
        }
    }

    /// 停止线程
    /// - 发送 Stop 命令
    /// - 关闭队列（唤醒阻塞在 push/pop 上的线程）
    /// - join 线程
    pub fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            info!("{} 🛑 停止 Demuxer 线程", log_ctx());
            thread.request_stop();
            for queue in self.queues.values() {
                queue.close();
            }
            thread.join();
        } else {
            for queue in self.queues.values() {
                queue.close();
            }
        }
    }
}

impl Demuxer for ThreadedDemuxer {
    fn enable_stream(&mut self, stream: StreamIndex) {
        if self.thread.is_some() {
            warn!("{} ⚠ Demuxer 线程已启动，忽略启用子流 {}", log_ctx(), stream);
            return;
        }
        let capacity = self.queue_capacity;
        self.queues
            .entry(stream)
            .or_insert_with(|| Arc::new(PacketQueue::new(capacity)));
    }

    fn get_packet(&mut self, stream: StreamIndex) -> Result<PacketMsg> {
        let queue = self
            .queues
            .get(&stream)
            .ok_or_else(|| DecoderError::ThreadError(format!("子流 {} 未启用", stream)))?;
        match queue.pop(true) {
            Ok(Some(msg)) => Ok(msg),
            // 队列已关闭，不会再有数据
            Ok(None) | Err(_) => Ok(PacketMsg::EndOfFile),
        }
    }

    fn seek(&mut self, time: f64, epoch: SeekEpoch) -> Result<()> {
        let thread = self
            .thread
            .as_ref()
            .ok_or_else(|| DecoderError::SeekError("Demuxer 线程未启动".to_string()))?;
        // 先清空队列，让可能阻塞在 push 上的线程尽快处理命令
        self.clear_queues();
        thread.send(DemuxerCommand::Seek { time, epoch });
        Ok(())
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }
}

impl Drop for ThreadedDemuxer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MediaBackend, SyntheticAudio, SyntheticBackend, SyntheticMedia, SyntheticVideo};
    use std::path::Path;

    fn open(media: SyntheticMedia) -> Box<dyn Container> {
        SyntheticBackend::new()
            .with_media("test.synth", media)
            .open(Path::new("test.synth"))
            .unwrap()
    }

    #[test]
    fn test_threaded_demuxer_routes_packets() {
        let media = SyntheticMedia::new()
            .with_video(SyntheticVideo::new(25.0, 1.0))
            .with_audio(SyntheticAudio::new(44100, 2, 1.0));
        let mut demuxer = ThreadedDemuxer::new(open(media), 8);
        demuxer.enable_stream(0);
        demuxer.enable_stream(1);
        demuxer.start().unwrap();

        let audio_queue = demuxer.packet_queue(1).unwrap();
        let audio_reader = std::thread::spawn(move || {
            let mut count = 0;
            loop {
                match audio_queue.pop(true) {
                    Ok(Some(PacketMsg::Packet(p))) => {
                        assert_eq!(p.stream, 1);
                        count += 1;
                    }
                    Ok(Some(PacketMsg::EndOfFile)) | Err(_) => break,
                    _ => {}
                }
            }
            count
        });

        let mut video = 0;
        loop {
            match demuxer.get_packet(0).unwrap() {
                PacketMsg::Packet(p) => {
                    assert_eq!(p.stream, 0);
                    video += 1;
                }
                PacketMsg::EndOfFile => break,
                PacketMsg::SeekDone { .. } => panic!("no seek was issued"),
            }
        }
        assert_eq!(video, 25);
        assert!(audio_reader.join().unwrap() > 0);
        demuxer.stop();
    }

    #[test]
    fn test_seek_after_eof_resumes_reading() {
        let media = SyntheticMedia::new().with_video(SyntheticVideo::new(10.0, 1.0));
        let mut demuxer = ThreadedDemuxer::new(open(media), 4);
        demuxer.enable_stream(0);
        demuxer.start().unwrap();

        while demuxer.get_packet(0).unwrap() != PacketMsg::EndOfFile {}

        demuxer.seek(0.0, 1).unwrap();
        assert_eq!(demuxer.get_packet(0).unwrap(), PacketMsg::SeekDone { epoch: 1, time: 0.0 });
        let mut count = 0;
        while let PacketMsg::Packet(_) = demuxer.get_packet(0).unwrap() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_stop_unblocks_full_queue() {
        let media = SyntheticMedia::new().with_video(SyntheticVideo::new(25.0, 10.0));
        let mut demuxer = ThreadedDemuxer::new(open(media), 2);
        demuxer.enable_stream(0);
        demuxer.start().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        // 队列已满，线程阻塞在 push 上
        demuxer.stop();
        assert_eq!(demuxer.get_packet(0).unwrap(), PacketMsg::EndOfFile);
    }
}
