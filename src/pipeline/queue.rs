use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// 队列已关闭（正常的退出信号，不是错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("队列已关闭")
    }
}

impl std::error::Error for QueueClosed {}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// 有界线程安全 FIFO
///
/// - push 在队列满时阻塞，直到有空位或队列关闭
/// - pop(true) 在队列空时阻塞，直到有数据或队列关闭
/// - close() 唤醒所有阻塞的生产者和消费者，之后的 pop 都返回 QueueClosed
/// - clear() 丢弃全部数据（Seek 时使用）并唤醒被阻塞的生产者
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "队列容量必须大于 0");
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// 入队，队列满时阻塞
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        let mut inner = self.inner.lock();
        while inner.items.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(QueueClosed);
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 非阻塞入队，队列满时把数据还给调用方
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TryPushError::Closed(item));
        }
        if inner.items.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 出队
    ///
    /// - wait = true: 阻塞直到有数据或队列关闭
    /// - wait = false: 队列为空时立即返回 Ok(None)
    pub fn pop(&self, wait: bool) -> Result<Option<T>, QueueClosed> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if !wait {
                return Ok(None);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// 最多等待 timeout，超时返回 Ok(None)
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(QueueClosed);
            }
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                if inner.closed {
                    return Err(QueueClosed);
                }
                let item = inner.items.pop_front();
                if item.is_some() {
                    self.not_full.notify_one();
                }
                return Ok(item);
            }
        }
    }

    /// 清空队列，返回丢弃的数量
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.items.len();
        inner.items.clear();
        self.not_full.notify_all();
        count
    }

    /// 关闭队列并丢弃剩余数据
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.items.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// try_push 失败时归还数据
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(16);
        for i in 0..10 {
            queue.push(i).unwrap();
        }
        let popped: Vec<i32> = (0..10).map(|_| queue.pop(false).unwrap().unwrap()).collect();
        assert_eq!(popped, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_fifo_across_threads() {
        let queue = Arc::new(BoundedQueue::new(4));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    queue.push(i).unwrap();
                }
            })
        };
        let mut received = Vec::new();
        while received.len() < 500 {
            received.push(queue.pop(true).unwrap().unwrap());
        }
        producer.join().unwrap();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_non_blocking_pop_on_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(2);
        let start = Instant::now();
        assert_eq!(queue.pop(false), Ok(None));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_push_blocks_until_pop() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();
        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                queue.push(2).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "队列满时 push 不应返回");
        assert_eq!(queue.pop(true), Ok(Some(1)));
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.pop(false), Ok(Some(2)));
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop(true))
        };
        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        queue.close();
        assert_eq!(consumer.join().unwrap(), Err(QueueClosed));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(0u8).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(1))
        };
        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(QueueClosed));
        assert_eq!(queue.pop(false), Err(QueueClosed));
    }

    #[test]
    fn test_clear_unblocks_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(0u8).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(7))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.clear(), 1);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.pop(false), Ok(Some(7)));
    }

    #[test]
    fn test_pop_timeout() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(25));
        queue.push(3).unwrap();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), Ok(Some(3)));
    }

    #[test]
    fn test_try_push_full() {
        let queue = BoundedQueue::new(1);
        assert!(queue.try_push(1).is_ok());
        assert_eq!(queue.try_push(2), Err(TryPushError::Full(2)));
        queue.close();
        assert_eq!(queue.try_push(3), Err(TryPushError::Closed(3)));
    }
}
