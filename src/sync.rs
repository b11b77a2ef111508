use std::time::Duration;

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, fence};
#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering, fence};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::Arc;
#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::Arc;

#[cfg(not(feature = "loom"))]
pub(crate) use antidote::Mutex;

#[cfg(feature = "loom")]
#[derive(Debug, Default)]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(feature = "loom")]
impl<T> Mutex<T> {
    pub(crate) fn new(t: T) -> Self {
        Self(loom::sync::Mutex::new(t))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

/// Busy-wait hint for the fast tier of a drain.
/// 排空等待快速阶段的忙等提示。
#[inline]
pub(crate) fn pause() {
    #[cfg(feature = "loom")]
    loom::hint::spin_loop();
    #[cfg(not(feature = "loom"))]
    std::hint::spin_loop();
}

/// Coarse tier of a drain. Under loom this only yields, the model has no clock.
/// 排空等待的粗粒度阶段。在 loom 下只让出调度，模型中没有时钟。
#[inline]
pub(crate) fn sleep(interval: Duration) {
    #[cfg(feature = "loom")]
    {
        let _ = interval;
        loom::thread::yield_now();
    }
    #[cfg(not(feature = "loom"))]
    std::thread::sleep(interval);
}
