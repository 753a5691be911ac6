use crate::core::{DecoderError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::process;
use std::thread::{self, JoinHandle};

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// work() 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// 继续下一轮
    Continue,
    /// 暂时没有工作，阻塞等待下一条命令
    Idle,
    /// 线程结束（队列关闭等）
    Finished,
}

/// 工作线程的主体
///
/// 线程循环：init() → { 处理命令 → work() } → deinit()
pub trait Worker: Send + 'static {
    type Command: Send + 'static;

    fn name(&self) -> &str;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// 一次工作（通常是处理一个数据包），唯一允许阻塞的地方是取数据包
    fn work(&mut self) -> WorkStatus;

    /// 处理本轮收到的全部命令（按到达顺序）
    fn handle_commands(&mut self, commands: Vec<Self::Command>);

    fn deinit(&mut self) {}
}

enum ThreadCommand<C> {
    Stop,
    Worker(C),
}

/// 带命令队列的工作线程
pub struct WorkerThread<C: Send + 'static> {
    name: String,
    handle: Option<JoinHandle<()>>,
    command_tx: Sender<ThreadCommand<C>>,
}

impl<C: Send + 'static> WorkerThread<C> {
    /// 启动线程
    pub fn spawn<W>(worker: W) -> Result<Self>
    where
        W: Worker<Command = C>,
    {
        let (command_tx, command_rx) = unbounded::<ThreadCommand<C>>();
        let name = worker.name().to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(worker, command_rx))
            .map_err(|e| DecoderError::ThreadError(format!("无法启动线程 {}: {}", name, e)))?;

        Ok(Self {
            name,
            handle: Some(handle),
            command_tx,
        })
    }

    fn run<W>(mut worker: W, command_rx: Receiver<ThreadCommand<C>>)
    where
        W: Worker<Command = C>,
    {
        info!("{} 🚀 {} 线程启动", log_ctx(), worker.name());

        if let Err(e) = worker.init() {
            error!("{} ❌ {} 初始化失败: {}", log_ctx(), worker.name(), e);
            return;
        }

        let mut idle = false;
        loop {
            let mut received = Vec::new();

            // 空闲时阻塞等待命令，避免忙等
            if idle {
                match command_rx.recv() {
                    Ok(cmd) => received.push(cmd),
                    Err(_) => {
                        warn!("{} ⚠ {} 命令通道已断开", log_ctx(), worker.name());
                        break;
                    }
                }
            }

            // 非阻塞取出所有命令
            loop {
                match command_rx.try_recv() {
                    Ok(cmd) => received.push(cmd),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            let mut stop = false;
            let mut commands = Vec::new();
            for cmd in received {
                match cmd {
                    ThreadCommand::Stop => stop = true,
                    ThreadCommand::Worker(cmd) => commands.push(cmd),
                }
            }
            if stop {
                info!("{} ⏹ {} 线程收到停止命令", log_ctx(), worker.name());
                break;
            }
            if !commands.is_empty() {
                worker.handle_commands(commands);
            }

            match worker.work() {
                WorkStatus::Continue => idle = false,
                WorkStatus::Idle => idle = true,
                WorkStatus::Finished => {
                    debug!("{} {} 工作结束", log_ctx(), worker.name());
                    break;
                }
            }
        }

        worker.deinit();
        info!("{} 🛑 {} 线程退出", log_ctx(), worker.name());
    }

    /// 发送命令，线程已退出时忽略
    pub fn send(&self, cmd: C) {
        if self.command_tx.send(ThreadCommand::Worker(cmd)).is_err() {
            debug!("{} 线程已退出，命令被丢弃", self.name);
        }
    }

    /// 请求停止（不等待）
    pub fn request_stop(&self) {
        let _ = self.command_tx.send(ThreadCommand::Stop);
    }

    /// 等待线程结束；调用前需先 request_stop 并关闭线程可能阻塞的队列
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ {} 线程 panic", log_ctx(), self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C: Send + 'static> Drop for WorkerThread<C> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("{} ⚠ {} 被 drop 时仍在运行，正在尝试停止", log_ctx(), self.name);
            self.request_stop();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingWorker {
        count: Arc<AtomicUsize>,
        commands: Arc<AtomicUsize>,
        idle_after: usize,
        deinit: Arc<AtomicUsize>,
    }

    impl Worker for CountingWorker {
        type Command = usize;

        fn name(&self) -> &str {
            "counting"
        }

        fn work(&mut self) -> WorkStatus {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.idle_after {
                WorkStatus::Idle
            } else {
                WorkStatus::Continue
            }
        }

        fn handle_commands(&mut self, commands: Vec<usize>) {
            self.commands.fetch_add(commands.iter().sum::<usize>(), Ordering::SeqCst);
        }

        fn deinit(&mut self) {
            self.deinit.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_idle_worker_wakes_on_command_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let commands = Arc::new(AtomicUsize::new(0));
        let deinit = Arc::new(AtomicUsize::new(0));
        let mut worker_thread = WorkerThread::spawn(CountingWorker {
            count: count.clone(),
            commands: commands.clone(),
            idle_after: 3,
            deinit: deinit.clone(),
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 3, "空闲后不应继续调用 work()");

        worker_thread.send(5);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(commands.load(Ordering::SeqCst), 5);
        assert_eq!(count.load(Ordering::SeqCst), 4);

        worker_thread.request_stop();
        worker_thread.join();
        assert_eq!(deinit.load(Ordering::SeqCst), 1);
        assert!(!worker_thread.is_running());
    }
}
