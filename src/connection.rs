use crate::resource::Resource;
use crate::session::Session;
use crate::stash::Reclaimed;
use crate::state::{Config, SharedState};
use crate::sync::{Arc, Ordering};
use std::time::Duration;

/// Builder for configuring a `Connection`.
///
/// Use this builder to customize drain and stash behavior:
/// - `drain_timeout`: Abort a drain that waits longer than this
/// - `progress_interval`: How often a waiting drain logs its progress
/// - `spin_limit` / `sleep_interval`: The two backoff tiers of a drain
/// - `compact_threshold`: When a discard pass shifts the stash down
/// - `abort_on_fatal`: Abort the process (default) or panic on fatal conditions
///
/// # Example
/// ```
/// use std::time::Duration;
/// use gen_stash::Connection;
///
/// let conn = Connection::builder()
///     .drain_timeout(Duration::from_secs(300))
///     .spin_limit(500)
///     .build();
/// ```
///
/// 用于配置 `Connection` 的构建器。
pub struct ConnectionBuilder {
    config: Config,
}

impl ConnectionBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the drain timeout.
    ///
    /// A drain still waiting after this long is presumed stuck and is fatal.
    /// Pass `None` (or a zero duration) to wait indefinitely, logging progress only.
    ///
    /// Default: `None`
    ///
    /// 设置排空超时。超过该时长仍在等待的排空被认为已卡死，属于致命错误。
    /// 传递 `None`（或零时长）则无限期等待，仅记录进度。
    #[inline]
    pub fn drain_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.config.drain_timeout = timeout.into().filter(|timeout| !timeout.is_zero());
        self
    }

    /// Set how often a waiting drain logs a progress record.
    ///
    /// Default: 60 seconds
    #[inline]
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Set the number of cumulative busy-wait pauses before a drain starts sleeping.
    ///
    /// Default: `1000`
    #[inline]
    pub fn spin_limit(mut self, limit: usize) -> Self {
        self.config.spin_limit = limit;
        self
    }

    /// Set the sleep between checks once a drain stops spinning.
    ///
    /// Default: 10 microseconds
    #[inline]
    pub fn sleep_interval(mut self, interval: Duration) -> Self {
        self.config.sleep_interval = interval;
        self
    }

    /// Set how many freed leading entries trigger a stash compaction.
    ///
    /// A stash is always compacted when a pass frees all of it.
    ///
    /// Default: `100`
    #[inline]
    pub fn compact_threshold(mut self, threshold: usize) -> Self {
        self.config.compact_threshold = threshold;
        self
    }

    /// Choose between aborting the process and panicking on fatal conditions
    /// (nested enter, self-deadlock, drain timeout).
    ///
    /// Default: `true` (abort)
    ///
    /// 在致命情况（嵌套进入、自死锁、排空超时）下选择中止进程还是 panic。
    #[inline]
    pub fn abort_on_fatal(mut self, abort: bool) -> Self {
        self.config.abort_on_fatal = abort;
        self
    }

    /// Build the `Connection` with the configured settings.
    /// 使用配置的设置构建 `Connection`。
    #[inline]
    pub fn build(self) -> Connection {
        log::debug!("building connection with {:?}", self.config);
        Connection::from_shared(Arc::new(SharedState::new(self.config)))
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-wide totals of objects waiting in stashes.
/// 连接范围内等待在暂存列表中的对象总计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StashStats {
    /// Accounted bytes of every stashed object.
    pub bytes: u64,
    /// Number of stashed objects.
    pub objects: u64,
}

/// A process-wide generation reclamation context.
///
/// `Connection` is the entry point of the system. It manages:
/// - One generation counter per [`Resource`].
/// - The registry of sessions whose published generations are scanned.
/// - The connection-wide stash counters.
///
/// Nothing here is a hidden singleton: independent connections never observe
/// each other.
///
/// `Connection` is `Clone` and can be safely shared across threads.
/// Typically, you build one at startup and open one session per worker thread.
///
/// **Typical Usage**:
/// ```
/// use gen_stash::{Connection, Resource};
///
/// let conn = Connection::new();
/// let session = conn.open_session();
///
/// // Reader: publish, look, unpublish.
/// {
///     let _guard = session.pin(Resource::Evict);
///     // traverse structures protected by the evict generation...
/// }
///
/// // Writer: unlink, advance, stash the old object.
/// let retired_in = session.current(Resource::Evict);
/// session.advance(Resource::Evict);
/// session
///     .retire(Resource::Evict, retired_in, Box::new([0u8; 64]), 64)
///     .expect("stash grows");
/// assert_eq!(session.discard(), 1);
/// ```
///
/// 进程范围的代回收上下文。
/// `Connection` 是系统的入口点。它管理：
/// - 每种 [`Resource`] 一个代计数器。
/// - 其发布代会被扫描的会话注册表。
/// - 连接范围内的暂存计数器。
/// 这里没有隐藏的单例：相互独立的连接永远不会观察到彼此。
#[derive(Clone)]
pub struct Connection {
    shared: Arc<SharedState>,
}

impl Connection {
    /// Create a connection with default settings.
    /// 使用默认设置创建一个连接。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the connection.
    #[inline]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(crate) fn from_shared(shared: Arc<SharedState>) -> Self {
        Connection { shared }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Open a session for the current thread.
    ///
    /// Closed sessions' leftovers that have drained since are freed on the way.
    ///
    /// 为当前线程打开一个会话。
    #[inline]
    pub fn open_session(&self) -> Session {
        self.discard_orphans();
        Session::new(Arc::clone(&self.shared))
    }

    /// Reset every generation counter to 1.
    ///
    /// Done once when the connection is built. Resetting is only sound while
    /// nothing can hold an older generation: calling it with a session open or
    /// with orphaned stash entries left is fatal.
    ///
    /// 将所有代计数器重置为 1。构建连接时已执行一次。
    /// 只有在没有任何东西可能持有旧代时重置才是安全的：存在打开的会话或遗留暂存条目时调用是致命的。
    pub fn init(&self) {
        self.shared.init();
        log::debug!("generation counters initialized");
    }

    /// Current generation of `resource`.
    #[inline]
    pub fn current(&self, resource: Resource) -> u64 {
        self.shared.generations.current(resource)
    }

    /// Switch `resource` to its next generation and return it.
    ///
    /// Objects that existed before the call belong to the returned generation
    /// minus one or earlier.
    ///
    /// 将 `resource` 切换到下一代并返回新的代。
    /// 调用之前已存在的对象属于返回值减一或更早的代。
    #[inline]
    pub fn advance(&self, resource: Resource) -> u64 {
        self.shared.generations.advance(resource)
    }

    /// Oldest generation of `resource` any session may still be observing.
    ///
    /// The minimum of the current counter and every published slot. The true
    /// floor can only move up while the scan runs, so the result is a safe lower
    /// bound for reclamation.
    pub fn oldest(&self, resource: Resource) -> u64 {
        self.shared.oldest(resource)
    }

    /// Whether some session may still be observing `generation` of `resource` or earlier.
    pub fn active(&self, resource: Resource, generation: u64) -> bool {
        self.shared.active(resource, generation)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Totals of objects currently waiting in stashes, orphans included.
    pub fn stash_stats(&self) -> StashStats {
        StashStats {
            bytes: self.shared.stashed_bytes.load(Ordering::Relaxed),
            objects: self.shared.stashed_objects.load(Ordering::Relaxed),
        }
    }

    /// Free orphaned stash entries of closed sessions whose generation has drained.
    ///
    /// Returns the number of objects freed.
    ///
    /// 释放已关闭会话遗留的、其代已排空的暂存条目。
    pub fn discard_orphans(&self) -> usize {
        let reclaimed = {
            let mut orphans = self.shared.orphans.lock();
            let mut reclaimed = Reclaimed::default();
            for resource in Resource::ALL {
                let stash = orphans.get_mut(resource);
                if stash.is_empty() {
                    continue;
                }
                let oldest = self.shared.oldest(resource);
                stash.take_reclaimable(oldest, self.shared.config.compact_threshold, &mut reclaimed);
            }
            reclaimed
        };

        let freed = reclaimed.len();
        if freed > 0 {
            self.shared.release_stats(&reclaimed);
            log::trace!("freed {} orphaned stash objects", freed);
        }
        freed
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut generations = f.debug_map();
        for resource in Resource::ALL {
            generations.entry(&resource.name(), &self.current(resource));
        }
        generations.finish()
    }
}
