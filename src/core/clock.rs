use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 为显示引擎提供 render_to_bmps 所需的墙钟时间
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_time: f64,        // 基准时间（秒）
    base_instant: Instant, // 基准时刻
    playback_rate: f64,    // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: f64, // 暂停时的位置
}

impl ClockInner {
    fn now(&self) -> f64 {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_secs_f64();
            self.base_time + elapsed * self.playback_rate
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_time: 0.0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: 0.0,
            })),
        }
    }

    /// 当前播放时间（秒）
    pub fn now(&self) -> f64 {
        self.inner.lock().now()
    }

    /// 设置播放位置（seek / loop 后调用）
    pub fn set_time(&self, time: f64) {
        let mut inner = self.inner.lock();
        inner.base_time = time;
        inner.base_instant = Instant::now();
        inner.paused_at = time;
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_time = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current = inner.now();
            inner.base_time = current;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_paused_clock_holds_position() {
        let clock = PlaybackClock::new();
        clock.set_time(5.0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), 5.0);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_running_clock_advances() {
        let clock = PlaybackClock::new();
        clock.set_time(1.0);
        clock.play();
        thread::sleep(Duration::from_millis(30));
        let now = clock.now();
        assert!(now > 1.0 && now < 2.0, "now = {}", now);
        clock.pause();
        let paused = clock.now();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), paused);
    }
}
