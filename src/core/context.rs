use crate::backend::MediaBackend;
use crate::core::error::Result;
use log::info;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 解码管线的共享上下文
///
/// 由调用方显式创建并传给每个解码器，生命周期跟随进程或测试夹具：
/// - 多媒体库的一次性初始化（带锁的标志位）
/// - 串行化 open/close（多媒体库的全局上下文不可重入）
/// - 存活解码器计数（用于检查泄漏）
pub struct MediaContext {
    backend: Arc<dyn MediaBackend>,
    initialized: Mutex<bool>,
    open_close_lock: Mutex<()>,
    live_decoders: AtomicUsize,
}

impl MediaContext {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            initialized: Mutex::new(false),
            open_close_lock: Mutex::new(()),
            live_decoders: AtomicUsize::new(0),
        })
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// 初始化多媒体库，重复调用无副作用
    pub fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.initialized.lock();
        if !*initialized {
            self.backend.init()?;
            *initialized = true;
            info!("✅ 多媒体库初始化完成: {}", self.backend.name());
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// 打开/关闭文件期间持有
    pub fn lock_open_close(&self) -> MutexGuard<'_, ()> {
        self.open_close_lock.lock()
    }

    pub(crate) fn register_decoder(&self) {
        self.live_decoders.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unregister_decoder(&self) {
        self.live_decoders.fetch_sub(1, Ordering::SeqCst);
    }

    /// 当前存活的解码器数量
    pub fn live_decoders(&self) -> usize {
        self.live_decoders.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticBackend;

    #[test]
    fn test_init_runs_once() {
        let backend = Arc::new(SyntheticBackend::new());
        let ctx = MediaContext::new(backend.clone());
        assert!(!ctx.is_initialized());
        ctx.ensure_initialized().unwrap();
        ctx.ensure_initialized().unwrap();
        assert!(ctx.is_initialized());
        assert_eq!(backend.init_count(), 1);
    }
}
