use crate::connection::Connection;
use crate::resource::Resource;
use crate::session::{GenerationGuard, Session};
use crate::state::SharedState;
use crate::sync::{Arc, AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;

/// A generation-protected shared pointer for safe concurrent access.
///
/// `GenPtr<T>` is bound to one [`Resource`] of one [`Connection`]. Any session of
/// that connection inside the resource's generation (holding a
/// [`GenerationGuard`]) may read it, and any session of the connection may
/// replace it: the old value is stashed and freed only once every session that
/// could have loaded it has left the generation.
///
/// **Safety Contract**:
/// - Readers must hold a guard for the pointer's resource when calling `load()`.
/// - Guards and sessions of another connection are rejected with a panic: their
///   generations say nothing about this pointer's readers.
/// - The lifetime of the returned reference from `load()` is bound to the guard.
///
/// **Typical Usage**:
/// ```
/// use gen_stash::{Connection, GenPtr, Resource};
///
/// let conn = Connection::new();
/// let session = conn.open_session();
/// let root = GenPtr::new(42i32, Resource::Split, &conn);
///
/// {
///     let guard = session.pin(Resource::Split);
///     assert_eq!(*root.load(&guard), 42);
/// }
///
/// root.replace(100, &session);
/// session.discard();
/// ```
///
/// 一个受代保护的共享指针，用于安全的并发访问。
/// `GenPtr<T>` 绑定到某个 [`Connection`] 的一种 [`Resource`]。该连接中任何处于该资源代中的会话
/// （持有 [`GenerationGuard`]）都可以读取它，该连接的任何会话都可以替换它：旧值被暂存，
/// 并且只有在所有可能加载过它的会话都离开该代之后才会被释放。
pub struct GenPtr<T> {
    ptr: AtomicPtr<T>,
    resource: Resource,
    shared: Arc<SharedState>,
    // Owns a `T`: shared readers need `T: Sync`, moving the pointer needs `T: Send`.
    _owns: PhantomData<Box<T>>,
}

impl<T: Send + 'static> GenPtr<T> {
    /// Create a new pointer protected by the `resource` generation of `connection`.
    /// 创建一个受 `connection` 的 `resource` 代保护的新指针。
    #[inline]
    pub fn new(data: T, resource: Resource, connection: &Connection) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(data))),
            resource,
            shared: Arc::clone(connection.shared()),
            _owns: PhantomData,
        }
    }

    /// Resource kind protecting this pointer.
    #[inline]
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Read the current value.
    ///
    /// # Panics
    /// If `guard` is for a different resource kind or another connection.
    ///
    /// 读取当前值。
    #[inline]
    pub fn load<'guard>(&self, guard: &'guard GenerationGuard<'_>) -> &'guard T {
        assert_eq!(
            guard.resource(),
            self.resource,
            "loading a {} pointer under a {} guard",
            self.resource,
            guard.resource()
        );
        assert!(
            self.owned_by(&guard.session().shared),
            "loading a {} pointer under a guard of another connection",
            self.resource
        );
        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: the guard's session published a generation no later than the
        // one any concurrent `replace` tags the unlinked value with, so the value
        // stays stashed until the guard is dropped.
        unsafe { &*ptr }
    }

    /// Install `data` and retire the previous value.
    ///
    /// The pointer is swapped first and the resource advanced second, so the
    /// old value is tagged with the generation every possible reader of it was
    /// published at or after. Returns the new generation.
    ///
    /// If the stash cannot grow, the old value is leaked rather than freed.
    ///
    /// # Panics
    /// If `session` belongs to another connection.
    ///
    /// 安装 `data` 并退休之前的值。
    /// 先交换指针，再推进资源的代，因此旧值的标签不早于其任何可能读者发布的代。返回新的代。
    /// 如果暂存列表无法扩容，旧值会被泄漏而不是释放。
    pub fn replace(&self, data: T, session: &Session) -> u64 {
        assert!(
            self.owned_by(&session.shared),
            "replacing a {} pointer through a session of another connection",
            self.resource
        );
        let new_ptr = Box::into_raw(Box::new(data));
        let old_ptr = self.ptr.swap(new_ptr, Ordering::AcqRel);
        let generation = session.advance(self.resource);

        // SAFETY: `old_ptr` came from `Box::into_raw` and is no longer reachable
        // through this pointer.
        let old = unsafe { Box::from_raw(old_ptr) };
        if let Err(err) = session.retire(self.resource, generation - 1, old, size_of::<T>()) {
            log::error!("{err}, leaking the replaced value");
            std::mem::forget(err.into_inner());
        }
        generation
    }

    #[inline]
    fn owned_by(&self, shared: &Arc<SharedState>) -> bool {
        std::ptr::eq::<SharedState>(&*self.shared, &**shared)
    }
}

impl<T> std::fmt::Debug for GenPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_struct("GenPtr")
            .field("resource", &self.resource)
            .field("ptr", &ptr)
            .finish()
    }
}

impl<T> Drop for GenPtr<T> {
    /// At drop time no other thread can be accessing the pointer, so the final
    /// value is dropped right away.
    ///
    /// 在 drop 时没有其他线程在访问该指针，因此最后的值会被立即 drop。
    #[inline]
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Relaxed);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}
