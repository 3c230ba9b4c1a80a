use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 用于按显示时间戳节奏送帧
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_us: i64,               // 基准时间戳（微秒）
    base_instant: Instant,      // 基准时刻
    paused: bool,
    paused_at: i64,             // 暂停时的位置
    anchored: bool,             // 是否已经用首帧时间戳对齐
}

impl ClockInner {
    fn now(&self) -> i64 {
        if self.paused {
            self.paused_at
        } else {
            self.base_us + self.base_instant.elapsed().as_micros() as i64
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_us: 0,
                base_instant: Instant::now(),
                paused: true,
                paused_at: 0,
                anchored: false,
            })),
        }
    }

    /// 获取当前播放时间（微秒）
    pub fn now(&self) -> i64 {
        self.inner.lock().now()
    }

    /// 设置播放位置
    pub fn set_time(&self, timestamp_us: i64) {
        let mut inner = self.inner.lock();
        inner.base_us = timestamp_us;
        inner.base_instant = Instant::now();
        inner.paused_at = timestamp_us;
        inner.anchored = true;
    }

    /// 清除对齐状态，下一帧到达时重新对齐
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.base_us = 0;
        inner.base_instant = Instant::now();
        inner.paused_at = 0;
        inner.anchored = false;
    }

    /// 首帧到达时用其时间戳对齐时钟（已对齐则忽略）
    pub fn anchor(&self, timestamp_us: i64) {
        let mut inner = self.inner.lock();
        if !inner.anchored {
            inner.base_us = timestamp_us;
            inner.base_instant = Instant::now();
            inner.paused_at = timestamp_us;
            inner.anchored = true;
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.inner.lock().anchored
    }

    /// 开始走时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_us = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
