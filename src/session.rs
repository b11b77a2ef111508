use crate::connection::Connection;
use crate::drain::Drain;
use crate::error::RetireError;
use crate::resource::Resource;
use crate::stash::{Reclaimed, SessionStash};
use crate::state::{NOT_PARTICIPATING, SessionSlot, SharedState};
use crate::sync::{Arc, Ordering, fence};
use std::cell::RefCell;

/// A worker thread's view of a connection.
///
/// Each thread that touches generation-protected resources opens exactly one
/// `Session` via [`Connection::open_session`]. The session owns:
/// - one published-generation slot per resource kind, visible to every scan;
/// - one stash per resource kind, holding objects retired by this thread.
///
/// **Thread Safety**: `Session` is `Send` but not `Sync`. Its stash is only ever
/// touched by the thread currently holding it.
///
/// 工作线程对连接的视图。
/// 每个访问受代保护资源的线程通过 [`Connection::open_session`] 打开恰好一个 `Session`。
/// 会话拥有：
/// - 每种资源一个已发布代的槽，对所有扫描可见；
/// - 每种资源一个暂存列表，保存本线程退休的对象。
/// **线程安全性**：`Session` 是 `Send` 的，但不是 `Sync` 的。
pub struct Session {
    pub(crate) slot: Arc<SessionSlot>,
    pub(crate) shared: Arc<SharedState>,
    stash: RefCell<SessionStash>,
}

impl Session {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        let slot = shared.register();
        log::debug!("session {} opened", slot.id);
        Session {
            slot,
            shared,
            stash: RefCell::new(SessionStash::new()),
        }
    }

    /// Numeric identifier of this session, used in log records.
    #[inline]
    pub fn id(&self) -> usize {
        self.slot.id
    }

    /// Handle to the connection this session belongs to.
    pub fn connection(&self) -> Connection {
        Connection::from_shared(Arc::clone(&self.shared))
    }

    /// Connection-wide generation of `resource`.
    #[inline]
    pub fn current(&self, resource: Resource) -> u64 {
        self.shared.generations.current(resource)
    }

    /// Move `resource` to its next generation, see [`Connection::advance`].
    #[inline]
    pub fn advance(&self, resource: Resource) -> u64 {
        self.shared.generations.advance(resource)
    }

    /// The generation this session has published for `resource`, 0 when not inside it.
    /// 本会话为 `resource` 发布的代，不在其中时为 0。
    #[inline]
    pub fn generation(&self, resource: Resource) -> u64 {
        self.slot.generations[resource.index()].load(Ordering::Relaxed)
    }

    /// Publish the current generation of `resource` before touching it.
    ///
    /// The publication is retried until the connection generation read after
    /// a full fence matches what was stored, so the session never advertises a
    /// stale generation that a concurrent drain or oldest scan could miss.
    ///
    /// Entering a resource this session is already inside of is a usage
    /// violation and is fatal; generations do not nest.
    ///
    /// 在访问 `resource` 之前发布其当前代。
    /// 发布会重试，直到在完全屏障之后读取的连接代与写入的值一致，
    /// 因此会话永远不会发布一个可能被并发排空或最旧代扫描错过的过期代。
    /// 重复进入已经处于其中的资源是使用错误，并且是致命的；代不支持嵌套。
    pub fn enter(&self, resource: Resource) {
        let slot = &self.slot.generations[resource.index()];

        let published = slot.load(Ordering::Relaxed);
        if published != NOT_PARTICIPATING {
            self.shared.fatal(format_args!(
                "session {} entered the {} generation while already inside generation {}",
                self.slot.id, resource, published
            ));
        }

        loop {
            let current = self.shared.generations.current(resource);
            slot.store(current, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            if self.shared.generations.current(resource) == current {
                break;
            }
        }
    }

    /// Clear the published generation of `resource`.
    ///
    /// Every `enter` must be paired with a `leave` on every exit path; a slot left
    /// published blocks reclamation for that resource indefinitely. Prefer
    /// [`Session::pin`], which leaves on drop.
    pub fn leave(&self, resource: Resource) {
        let slot = &self.slot.generations[resource.index()];
        debug_assert_ne!(
            slot.load(Ordering::Relaxed),
            NOT_PARTICIPATING,
            "BUG: leaving the {resource} generation without entering it"
        );

        slot.store(NOT_PARTICIPATING, Ordering::Release);
        // Let sessions waiting for the resource to drain proceed quickly.
        fence(Ordering::SeqCst);
    }

    /// Enter `resource` and return a guard that leaves it when dropped.
    ///
    /// **Example**:
    /// ```
    /// use gen_stash::{Connection, Resource};
    ///
    /// let conn = Connection::new();
    /// let session = conn.open_session();
    /// {
    ///     let guard = session.pin(Resource::Split);
    ///     assert_eq!(guard.generation(), 1);
    /// }
    /// assert_eq!(session.generation(Resource::Split), 0);
    /// ```
    ///
    /// 进入 `resource` 并返回一个在 drop 时离开的守卫。
    #[inline]
    pub fn pin(&self, resource: Resource) -> GenerationGuard<'_> {
        self.enter(resource);
        GenerationGuard {
            session: self,
            resource,
        }
    }

    /// Block until no session is published for `resource` below `generation`.
    ///
    /// Spins for a while, then sleeps between checks. Progress is logged every
    /// configured interval. With a drain timeout configured, exceeding it is
    /// fatal; without one the drain waits indefinitely.
    ///
    /// Waiting on a generation only this session could release is a
    /// self-deadlock and is always fatal.
    ///
    /// 阻塞直到没有任何会话为 `resource` 发布小于 `generation` 的代。
    /// 先自旋一段时间，然后在检查之间休眠。每经过配置的间隔记录一次进度。
    /// 配置了排空超时时，超时是致命的；没有配置时无限期等待。
    /// 等待只有本会话才能释放的代属于自死锁，总是致命的。
    pub fn drain(&self, resource: Resource, generation: u64) {
        Drain::new(&self.shared, &self.slot, resource, generation).run();
    }

    /// Advance `resource` and wait for the previous generation to drain.
    ///
    /// Returns the new generation.
    pub fn advance_and_drain(&self, resource: Resource) -> u64 {
        let generation = self.shared.generations.advance(resource);
        self.drain(resource, generation);
        generation
    }

    /// Defer freeing `object` until no session can still observe `generation`.
    ///
    /// `generation` is normally the value the resource had before the
    /// [`advance`](Session::advance) that unlinked the object. `len` is the size
    /// accounted in [`StashStats`](crate::StashStats).
    ///
    /// After appending, a discard pass runs for `resource` so the stash does not
    /// grow without bound under steady retirement.
    ///
    /// # Errors
    /// If the stash cannot grow, the object is returned untouched inside
    /// [`RetireError`]; it was neither stashed nor freed.
    ///
    /// 延迟释放 `object`，直到没有会话仍可能观察到 `generation`。
    /// 追加之后会为 `resource` 执行一次丢弃过程，使暂存列表在持续退休下不会无限增长。
    pub fn retire<T: Send + 'static>(
        &self,
        resource: Resource,
        generation: u64,
        object: Box<T>,
        len: usize,
    ) -> Result<(), RetireError<T>> {
        let pending = {
            let mut stash = self.stash.borrow_mut();
            let stash = stash.get_mut(resource);
            stash
                .try_push(generation, len, object)
                .map_err(|(object, err)| RetireError::new(resource, object, err))?;
            stash.len()
        };

        self.shared.stashed_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.shared.stashed_objects.fetch_add(1, Ordering::Relaxed);

        if pending > 1 {
            self.discard_reclaimable(resource);
        }
        Ok(())
    }

    /// Free every stashed `resource` object retired before the oldest observed generation.
    ///
    /// Returns the number of objects freed.
    pub fn discard_reclaimable(&self, resource: Resource) -> usize {
        let oldest = self.shared.oldest(resource);
        let reclaimed = {
            let mut reclaimed = Reclaimed::default();
            self.stash.borrow_mut().get_mut(resource).take_reclaimable(
                oldest,
                self.shared.config.compact_threshold,
                &mut reclaimed,
            );
            reclaimed
        };
        self.release(resource, reclaimed)
    }

    /// Run a discard pass for every resource kind with a non-empty stash.
    ///
    /// Returns the number of objects freed.
    pub fn discard(&self) -> usize {
        Resource::ALL
            .into_iter()
            .filter(|&resource| !self.stash.borrow().get(resource).is_empty())
            .map(|resource| self.discard_reclaimable(resource))
            .sum()
    }

    /// Free every stashed object of `which` (or of every kind when `None`),
    /// ignoring generations.
    ///
    /// Returns the number of objects freed.
    ///
    /// # Safety
    /// No other thread may still be observing any of the stashed objects. This
    /// holds at shutdown, once every other session has stopped.
    ///
    /// 无视代，释放 `which`（为 `None` 时为所有种类）的所有暂存对象。
    ///
    /// # Safety
    /// 不能有任何其他线程仍在观察这些暂存对象。
    pub unsafe fn discard_all(&self, which: Option<Resource>) -> usize {
        let reclaimed = self.stash.borrow_mut().take_all(which);
        let label = which.map_or("every", Resource::name);
        self.release_labelled(label, reclaimed)
    }

    /// Number of `resource` objects still waiting in this session's stash.
    pub fn stashed(&self, resource: Resource) -> usize {
        self.stash.borrow().get(resource).len()
    }

    #[cfg(test)]
    pub(crate) fn stash_backing_len(&self, resource: Resource) -> usize {
        self.stash.borrow().get(resource).backing_len()
    }

    fn release(&self, resource: Resource, reclaimed: Reclaimed) -> usize {
        self.release_labelled(resource.name(), reclaimed)
    }

    // Objects are dropped here, after the stash borrow has ended, so their
    // destructors may use this session again.
    fn release_labelled(&self, label: &str, reclaimed: Reclaimed) -> usize {
        let freed = reclaimed.len();
        if freed > 0 {
            self.shared.release_stats(&reclaimed);
            log::trace!(
                "session {} freed {} {} stash objects ({} bytes)",
                self.slot.id,
                freed,
                label,
                reclaimed.bytes()
            );
        }
        drop(reclaimed);
        freed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.slot.id)
            .field("stash", &self.stash)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    /// Unpublish everything, leave the registry, and hand whatever cannot be
    /// freed yet to the connection.
    ///
    /// 取消所有发布，离开注册表，并将尚不能释放的对象交给连接。
    fn drop(&mut self) {
        for slot in &self.slot.generations {
            slot.store(NOT_PARTICIPATING, Ordering::Release);
        }
        self.slot.active.store(false, Ordering::Release);
        fence(Ordering::SeqCst);
        self.shared.deregister(&self.slot);

        self.discard();

        let stash = self.stash.get_mut();
        let leftover = stash.total();
        if leftover > 0 {
            log::debug!(
                "session {} closed with {} stashed objects, handing them to the connection",
                self.slot.id,
                leftover
            );
            self.shared.orphans.lock().adopt(stash);
        } else {
            log::debug!("session {} closed", self.slot.id);
        }
    }
}

/// A guard that keeps a session published in one resource generation.
///
/// Obtained from [`Session::pin`]; dropping it calls [`Session::leave`]. It is
/// `!Send` because it borrows a `!Sync` session.
///
/// 使会话在某个资源代中保持发布状态的守卫。
/// 通过 [`Session::pin`] 获得；drop 时调用 [`Session::leave`]。
#[must_use]
pub struct GenerationGuard<'a> {
    session: &'a Session,
    resource: Resource,
}

impl GenerationGuard<'_> {
    /// Resource kind this guard keeps the session inside of.
    #[inline]
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Generation the session published when it entered.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.session.generation(self.resource)
    }

    /// The session holding this guard.
    #[inline]
    pub fn session(&self) -> &Session {
        self.session
    }
}

impl Drop for GenerationGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.session.leave(self.resource);
    }
}
