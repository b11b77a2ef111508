use std::fmt;

/// A resource domain with its own generation counter and its own stash.
///
/// The set is closed: every connection carries exactly one counter per kind and
/// every session one published slot per kind.
///
/// 拥有独立代计数器和独立暂存列表的资源域。
/// 该集合是封闭的：每个连接对每种资源恰好持有一个计数器，每个会话对每种资源持有一个发布槽。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// Checkpoint cleanup.
    Checkpoint,
    /// Transaction commit.
    Commit,
    /// Page eviction.
    Evict,
    /// Hazard pointer protection.
    Hazard,
    /// Page split.
    Split,
}

impl Resource {
    /// Number of resource kinds.
    pub const COUNT: usize = 5;

    /// Every resource kind, in slot order.
    pub const ALL: [Resource; Resource::COUNT] = [
        Resource::Checkpoint,
        Resource::Commit,
        Resource::Evict,
        Resource::Hazard,
        Resource::Split,
    ];

    /// Slot index of this kind in per-connection and per-session tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name used in log records.
    pub const fn name(self) -> &'static str {
        match self {
            Resource::Checkpoint => "checkpoint",
            Resource::Commit => "commit",
            Resource::Evict => "evict",
            Resource::Hazard => "hazard",
            Resource::Split => "split",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
