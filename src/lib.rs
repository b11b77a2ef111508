//! Generation-based deferred memory reclamation.
//!
//! Threads publish the generation of a resource before touching it and clear it
//! when they are done. A thread that replaces a shared object advances the
//! resource's generation and stashes the old object; once no thread has the
//! previous generation published, the stashed object is freed.
//!
//! - [`Connection`]: the process-wide context, one generation counter per [`Resource`].
//! - [`Session`]: a worker thread's published slots and private stash.
//! - [`Session::drain`]: wait until no session observes an older generation.
//! - [`GenPtr`]: an atomic pointer whose replaced values go through the stash.
//!
//! # Example
//!
//! ```rust
//! use std::thread;
//! use gen_stash::{Connection, GenPtr, Resource};
//!
//! let conn = Connection::new();
//! let root = std::sync::Arc::new(GenPtr::new(String::from("v1"), Resource::Split, &conn));
//!
//! let reader = {
//!     let conn = conn.clone();
//!     let root = root.clone();
//!     thread::spawn(move || {
//!         let session = conn.open_session();
//!         let guard = session.pin(Resource::Split);
//!         assert!(root.load(&guard).starts_with('v'));
//!     })
//! };
//!
//! let writer = conn.open_session();
//! root.replace(String::from("v2"), &writer);
//! reader.join().unwrap();
//!
//! // Nobody can still see "v1".
//! writer.advance_and_drain(Resource::Split);
//! writer.discard();
//! assert_eq!(writer.stashed(Resource::Split), 0);
//! ```
//!
//! 基于代的延迟内存回收。
//! 线程在访问资源之前发布该资源的代，完成后清除。替换共享对象的线程推进资源的代并暂存旧对象；
//! 一旦没有线程发布之前的代，被暂存的对象就会被释放。

mod connection;
mod drain;
mod error;
mod ptr;
mod resource;
mod session;
mod stash;
mod state;
mod sync;

pub use connection::{Connection, ConnectionBuilder, StashStats};
pub use error::RetireError;
pub use ptr::GenPtr;
pub use resource::Resource;
pub use session::{GenerationGuard, Session};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
