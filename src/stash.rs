use crate::resource::Resource;
use std::boxed::Box;
use std::collections::TryReserveError;
use std::fmt;
use std::vec::Vec;

/// An object that has been retired (removed from shared view) but not yet freed.
/// It stores the raw pointer and a destructor function to safely drop the concrete type.
///
/// 一个已被退休（从共享视图中移除）但尚未释放的对象。
/// 它存储原始指针和析构函数，以安全地 drop 具体类型。
struct Retired {
    ptr: *mut (),
    dtor: unsafe fn(*mut ()),
}

// Only `Send` payloads are ever erased into a `Retired`.
unsafe impl Send for Retired {}

#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut T));
    }
}

impl Retired {
    #[inline(always)]
    fn new<T: Send + 'static>(value: Box<T>) -> Self {
        Retired {
            ptr: Box::into_raw(value) as *mut (),
            dtor: drop_value::<T>,
        }
    }
}

impl Drop for Retired {
    #[inline(always)]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                (self.dtor)(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// One deferred free: the object, its accounted size and the generation it was
/// retired in.
struct StashEntry {
    generation: u64,
    len: usize,
    /// `None` once freed; freed entries only ever sit in front of `Stash::head`.
    object: Option<Retired>,
}

/// Objects detached from a stash by a discard pass.
///
/// They are dropped when this value is, which lets callers release any borrow
/// of the stash (and adjust counters) before running destructors.
///
/// 被一次丢弃过程从暂存列表中分离的对象。
/// 它们在此值被 drop 时一起被 drop，这让调用者可以在运行析构函数之前释放对暂存列表的借用。
#[must_use]
#[derive(Default)]
pub(crate) struct Reclaimed {
    objects: Vec<Retired>,
    bytes: u64,
}

impl Reclaimed {
    fn push(&mut self, object: Retired, len: usize) {
        self.objects.push(object);
        self.bytes += len as u64;
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[inline]
    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Deferred-free list of one resource kind, appended at the tail, freed from the head.
///
/// If every caller retires in non-decreasing generation order the list stays
/// sorted and a prefix scan finds everything reclaimable. Out-of-order tags only
/// hold back the entries queued behind them.
///
/// 单种资源的延迟释放列表，从尾部追加，从头部释放。
/// 如果所有调用者都按非递减的代顺序退休对象，列表保持有序，前缀扫描即可找到所有可回收对象。
/// 乱序的标签只会推迟排在其后的条目的回收。
#[derive(Default)]
pub(crate) struct Stash {
    entries: Vec<StashEntry>,
    /// Index of the first entry not yet freed.
    head: usize,
}

impl Stash {
    /// Number of entries still waiting to be freed.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len() - self.head
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical length of the backing list, including freed entries not yet compacted.
    #[cfg(test)]
    pub(crate) fn backing_len(&self) -> usize {
        self.entries.len()
    }

    /// Append an entry, growing the list if needed.
    ///
    /// On allocation failure the object is handed back untouched.
    pub(crate) fn try_push<T: Send + 'static>(
        &mut self,
        generation: u64,
        len: usize,
        object: Box<T>,
    ) -> Result<(), (Box<T>, TryReserveError)> {
        if let Err(err) = reserve_one(&mut self.entries) {
            return Err((object, err));
        }
        self.entries.push(StashEntry {
            generation,
            len,
            object: Some(Retired::new(object)),
        });
        Ok(())
    }

    /// Detach every leading entry retired before `oldest`.
    ///
    /// The scan stops at the first entry that is still observable. Once more than
    /// `compact_threshold` leading entries are free, or all of them are, the
    /// survivors are shifted down to the front.
    pub(crate) fn take_reclaimable(
        &mut self,
        oldest: u64,
        compact_threshold: usize,
        reclaimed: &mut Reclaimed,
    ) {
        let mut index = self.head;
        while let Some(entry) = self.entries.get_mut(index) {
            if entry.generation >= oldest {
                break;
            }
            if let Some(object) = entry.object.take() {
                reclaimed.push(object, entry.len);
            }
            index += 1;
        }
        self.head = index;

        if self.head > compact_threshold || self.head == self.entries.len() {
            self.entries.drain(..self.head);
            self.head = 0;
        }
    }

    /// Detach everything regardless of generation.
    pub(crate) fn take_all(&mut self, reclaimed: &mut Reclaimed) {
        for entry in self.entries.drain(..) {
            if let Some(object) = entry.object {
                reclaimed.push(object, entry.len);
            }
        }
        self.head = 0;
    }

    /// Move the pending entries of `other` to the tail of this list.
    fn adopt(&mut self, other: &mut Stash) {
        self.entries.extend(other.entries.drain(other.head..));
        other.entries.clear();
        other.head = 0;
    }
}

#[cfg(test)]
thread_local! {
    /// Makes every stash growth on this thread fail.
    pub(crate) static FAIL_GROWTH: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[inline]
fn reserve_one(entries: &mut Vec<StashEntry>) -> Result<(), TryReserveError> {
    #[cfg(test)]
    if FAIL_GROWTH.with(std::cell::Cell::get) {
        return Vec::<u8>::new().try_reserve(usize::MAX);
    }
    entries.try_reserve(1)
}

/// The per-resource stashes of one session (or the orphan pool of a connection).
/// 一个会话（或连接的遗留池）按资源划分的暂存列表。
#[derive(Default)]
pub(crate) struct SessionStash {
    stashes: [Stash; Resource::COUNT],
}

impl SessionStash {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn get(&self, resource: Resource) -> &Stash {
        &self.stashes[resource.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, resource: Resource) -> &mut Stash {
        &mut self.stashes[resource.index()]
    }

    /// Total pending entries across all kinds.
    pub(crate) fn total(&self) -> usize {
        self.stashes.iter().map(Stash::len).sum()
    }

    /// Detach every entry of `which`, or of every kind when `None`.
    pub(crate) fn take_all(&mut self, which: Option<Resource>) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();
        match which {
            Some(resource) => self.get_mut(resource).take_all(&mut reclaimed),
            None => {
                for stash in &mut self.stashes {
                    stash.take_all(&mut reclaimed);
                }
            }
        }
        reclaimed
    }

    /// Take over every pending entry of `other`.
    pub(crate) fn adopt(&mut self, other: &mut SessionStash) {
        for (mine, theirs) in self.stashes.iter_mut().zip(other.stashes.iter_mut()) {
            mine.adopt(theirs);
        }
    }
}

impl fmt::Debug for SessionStash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for resource in Resource::ALL {
            map.entry(&resource.name(), &self.get(resource).len());
        }
        map.finish()
    }
}
