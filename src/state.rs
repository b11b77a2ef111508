use crate::error::fatal;
use crate::resource::Resource;
use crate::stash::{Reclaimed, SessionStash};
use crate::sync::{Arc, AtomicBool, AtomicU64, AtomicUsize, Mutex, Ordering, fence};
use std::time::Duration;
use std::vec::Vec;

/// A published slot value meaning "not using this resource".
/// 表示"未使用该资源"的发布槽值。
pub(crate) const NOT_PARTICIPATING: u64 = 0;

/// Every generation counter starts here; 0 is reserved for idle slots.
/// 所有代计数器从这里开始；0 保留给空闲槽。
pub(crate) const FIRST_GENERATION: u64 = 1;

/// Cumulative busy-wait pauses before a drain falls back to sleeping.
/// 排空在退回到休眠之前的累计忙等次数。
pub(crate) const DEFAULT_SPIN_LIMIT: usize = 1000;

/// Sleep used by a drain once spinning stops paying off.
pub(crate) const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_micros(10);

/// A drain logs a progress record every time this much more time has elapsed.
pub(crate) const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// A discard pass compacts the stash once this many leading entries are freed.
pub(crate) const DEFAULT_COMPACT_THRESHOLD: usize = 100;

/// Extra diagnostics are logged this close to a drain timeout.
pub(crate) const TIMEOUT_DIAGNOSTIC_WINDOW: Duration = Duration::from_millis(20);

/// Tunables shared by every session of a connection.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) drain_timeout: Option<Duration>,
    pub(crate) progress_interval: Duration,
    pub(crate) spin_limit: usize,
    pub(crate) sleep_interval: Duration,
    pub(crate) compact_threshold: usize,
    pub(crate) abort_on_fatal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drain_timeout: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            spin_limit: DEFAULT_SPIN_LIMIT,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            abort_on_fatal: true,
        }
    }
}

/// Connection-wide generation counters, one per resource kind.
///
/// Counters only ever move forward; 64 bits never wrap in practice.
///
/// 连接级别的代计数器，每种资源一个。
/// 计数器只会向前推进；64 位在实践中不会回绕。
#[derive(Debug)]
pub(crate) struct GenerationTable {
    counters: [AtomicU64; Resource::COUNT],
}

impl GenerationTable {
    pub(crate) fn new() -> Self {
        let table = Self {
            counters: std::array::from_fn(|_| AtomicU64::new(NOT_PARTICIPATING)),
        };
        table.init();
        table
    }

    /// Reset every counter to the first generation and make it visible to all threads.
    /// 将所有计数器重置为第一代，并使其对所有线程可见。
    pub(crate) fn init(&self) {
        for counter in &self.counters {
            counter.store(FIRST_GENERATION, Ordering::SeqCst);
        }
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn current(&self, resource: Resource) -> u64 {
        self.counters[resource.index()].load(Ordering::SeqCst)
    }

    /// Move `resource` to its next generation and return it.
    ///
    /// Anything that existed before the call belongs to the returned value minus
    /// one or earlier.
    #[inline]
    pub(crate) fn advance(&self, resource: Resource) -> u64 {
        self.counters[resource.index()].fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A slot allocated for a session to publish the generation it is inside of.
///
/// Written only by the owning session, read by any scanning thread.
/// Cache-aligned to prevent false sharing between sessions.
///
/// 为会话分配的槽，用于发布其当前所处的代。
/// 只由所属会话写入，可被任何扫描线程读取。缓存对齐以防止会话之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct SessionSlot {
    pub(crate) id: usize,
    pub(crate) active: AtomicBool,
    pub(crate) generations: [AtomicU64; Resource::COUNT],
}

impl SessionSlot {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            generations: std::array::from_fn(|_| AtomicU64::new(NOT_PARTICIPATING)),
        }
    }

    /// Single ordered read of the published generation, 0 when inactive.
    #[inline]
    pub(crate) fn published(&self, resource: Resource) -> u64 {
        if !self.active.load(Ordering::Acquire) {
            return NOT_PARTICIPATING;
        }
        self.generations[resource.index()].load(Ordering::SeqCst)
    }
}

/// Global shared state of a connection.
///
/// Contains the generation table, the session registry, the stash counters and
/// the orphaned stash entries of closed sessions.
///
/// 连接的全局共享状态。
/// 包含代表、会话注册表、暂存计数器以及已关闭会话遗留的暂存条目。
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) generations: GenerationTable,
    /// Registered session slots. The mutex guards membership only, never the
    /// generation values inside the slots.
    pub(crate) sessions: Mutex<Vec<Arc<SessionSlot>>>,
    pub(crate) next_session_id: AtomicUsize,
    pub(crate) stashed_bytes: AtomicU64,
    pub(crate) stashed_objects: AtomicU64,
    /// Leftovers of closed sessions, still waiting for their generation to drain.
    pub(crate) orphans: Mutex<SessionStash>,
    pub(crate) config: Config,
}

impl SharedState {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            generations: GenerationTable::new(),
            sessions: Mutex::new(Vec::new()),
            next_session_id: AtomicUsize::new(0),
            stashed_bytes: AtomicU64::new(0),
            stashed_objects: AtomicU64::new(0),
            orphans: Mutex::new(SessionStash::new()),
            config,
        }
    }

    pub(crate) fn register(&self) -> Arc<SessionSlot> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(SessionSlot::new(id));
        self.sessions.lock().push(Arc::clone(&slot));
        slot
    }

    pub(crate) fn deregister(&self, slot: &SessionSlot) {
        self.sessions
            .lock()
            .retain(|registered| !std::ptr::eq(&**registered, slot));
    }

    /// Reset the generation table, refusing while any generation may still be observed.
    ///
    /// Both locks are held across the reset so no session can register and no
    /// orphan can be handed over in the middle of it.
    pub(crate) fn init(&self) {
        let (open, orphaned) = {
            let orphans = self.orphans.lock();
            let sessions = self.sessions.lock();
            if sessions.is_empty() && orphans.total() == 0 {
                self.generations.init();
                return;
            }
            (sessions.len(), orphans.total())
        };
        self.fatal(format_args!(
            "generation counters reset with {open} open sessions and {orphaned} orphaned stash entries"
        ));
    }

    /// Membership snapshot for walks that may block.
    pub(crate) fn snapshot(&self) -> Vec<Arc<SessionSlot>> {
        self.sessions.lock().clone()
    }

    /// Oldest generation any session may still be observing for `resource`.
    ///
    /// The connection counter must be read before the session slots: reading a
    /// slot first could miss a publication racing with the scan and report a
    /// floor that is too high.
    ///
    /// 任何会话可能仍在观察的 `resource` 的最旧代。
    /// 必须先读取连接计数器，再读取会话槽。
    pub(crate) fn oldest(&self, resource: Resource) -> u64 {
        let mut oldest = self.generations.current(resource);
        // Pairs with the fence in `Session::enter`.
        fence(Ordering::SeqCst);
        for slot in self.sessions.lock().iter() {
            let published = slot.published(resource);
            if published != NOT_PARTICIPATING && published < oldest {
                oldest = published;
            }
        }
        oldest
    }

    /// Whether some session may still be observing `generation` or earlier.
    pub(crate) fn active(&self, resource: Resource, generation: u64) -> bool {
        fence(Ordering::SeqCst);
        self.sessions.lock().iter().any(|slot| {
            let published = slot.published(resource);
            published != NOT_PARTICIPATING && published <= generation
        })
    }

    /// Take freed objects out of the connection-wide stash counters.
    pub(crate) fn release_stats(&self, reclaimed: &Reclaimed) {
        self.stashed_bytes
            .fetch_sub(reclaimed.bytes(), Ordering::Relaxed);
        self.stashed_objects
            .fetch_sub(reclaimed.len() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn fatal(&self, message: std::fmt::Arguments<'_>) -> ! {
        fatal(self.config.abort_on_fatal, message)
    }
}

impl Drop for SharedState {
    /// No session can exist any more, so every orphan is unobserved.
    /// 不可能再有任何会话存在，因此所有遗留对象都不再被观察。
    fn drop(&mut self) {
        let orphans = self.orphans.lock().take_all(None);
        if !orphans.is_empty() {
            log::debug!("discarding {} orphaned stash entries at shutdown", orphans.len());
        }
    }
}
