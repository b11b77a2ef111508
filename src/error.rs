use crate::resource::Resource;
use std::collections::TryReserveError;
use std::fmt;

/// The stash could not grow to hold a retired object.
///
/// The object was neither stashed nor freed: it is handed back through
/// [`RetireError::into_inner`] so the caller can keep it alive and retry later.
///
/// 暂存列表无法扩容以容纳被退休的对象。
/// 该对象既未被暂存也未被释放：它通过 [`RetireError::into_inner`] 交还给调用者，
/// 调用者可以保持其存活并稍后重试。
#[derive(thiserror::Error)]
#[error("failed to grow the {resource} stash")]
pub struct RetireError<T> {
    resource: Resource,
    object: Box<T>,
    #[source]
    source: TryReserveError,
}

impl<T> RetireError<T> {
    pub(crate) fn new(resource: Resource, object: Box<T>, source: TryReserveError) -> Self {
        Self {
            resource,
            object,
            source,
        }
    }

    /// Resource kind whose stash failed to grow.
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Take back the object that could not be retired.
    pub fn into_inner(self) -> Box<T> {
        self.object
    }
}

impl<T> fmt::Debug for RetireError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetireError")
            .field("resource", &self.resource)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Report a broken reclamation invariant and terminate.
///
/// Nothing can recover from these: the record is logged, then the process aborts,
/// or panics when the connection was built with `abort_on_fatal(false)`.
///
/// 报告被破坏的回收不变量并终止。
#[cold]
#[inline(never)]
pub(crate) fn fatal(abort: bool, message: fmt::Arguments<'_>) -> ! {
    log::error!("{message}");
    if abort {
        std::process::abort();
    }
    panic!("{message}");
}
