use std::ffi::OsString;

use derive_more::{Display, From};

/// Handle of one watched directory, as handed out by a [`Notifier`].
///
/// [`Notifier`]: crate::watch::Notifier
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From)]
#[display("wd{_0}")]
pub struct WatchDescriptor(i32);

impl WatchDescriptor {
    /// Placeholder for a registry entry whose watch is not installed yet.
    /// Sorts before every real descriptor.
    pub const PENDING: WatchDescriptor = WatchDescriptor(-1);

    pub fn is_pending(&self) -> bool {
        *self == Self::PENDING
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Deleted,
    ContentModified,
    MovedOut,
    MovedIn,
    /// The watched directory itself vanished.
    SelfDeleted,
    /// The notifier dropped the watch on its own.
    Ignored,
    /// Events were lost; the trees can no longer be trusted.
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub descriptor: WatchDescriptor,
    pub kind: EventKind,
    /// Name of the affected entry inside the watched directory.
    pub name: Option<OsString>,
    /// Pairs a `MovedOut` with its `MovedIn`.
    pub cookie: u32,
    pub is_dir: bool,
}

impl WatchEvent {
    pub fn new(descriptor: WatchDescriptor, kind: EventKind) -> Self {
        Self {
            descriptor,
            kind,
            name: None,
            cookie: 0,
            is_dir: false,
        }
    }

    pub fn named(mut self, name: impl Into<OsString>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn directory(mut self) -> Self {
        self.is_dir = true;
        self
    }
}
