mod concurrent_tests;

use crate::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};

/// 被 drop 时计数的载荷
pub(crate) struct Tracked {
    pub(crate) value: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn tracked(value: u64, drops: &Arc<AtomicUsize>) -> Box<Tracked> {
    Box::new(Tracked {
        value,
        drops: Arc::clone(drops),
    })
}

pub(crate) fn dropped(drops: &Arc<AtomicUsize>) -> usize {
    drops.load(Ordering::SeqCst)
}

/// 致命错误转为 panic，便于 `#[should_panic]` 测试
pub(crate) fn test_connection() -> Connection {
    init_logger();
    Connection::builder().abort_on_fatal(false).build()
}

/// 转发给 env_logger，同时按线程记录每条日志，便于断言日志内容
struct CapturingLogger {
    inner: env_logger::Logger,
    records: Mutex<Vec<(ThreadId, log::Level, String)>>,
}

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        self.records.lock().unwrap().push((
            thread::current().id(),
            record.level(),
            record.args().to_string(),
        ));
        if self.inner.matches(record) {
            log::Log::log(&self.inner, record);
        }
    }

    fn flush(&self) {
        log::Log::flush(&self.inner);
    }
}

static LOGGER: OnceLock<CapturingLogger> = OnceLock::new();

pub(crate) fn init_logger() {
    let logger = LOGGER.get_or_init(|| CapturingLogger {
        inner: env_logger::Builder::from_default_env().is_test(true).build(),
        records: Mutex::new(Vec::new()),
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// 当前线程记录的、级别为 `level` 的日志
pub(crate) fn captured(level: log::Level) -> Vec<String> {
    let me = thread::current().id();
    LOGGER
        .get()
        .map(|logger| {
            logger
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|(thread, recorded, _)| *thread == me && *recorded == level)
                .map(|(_, _, message)| message.clone())
                .collect()
        })
        .unwrap_or_default()
}
