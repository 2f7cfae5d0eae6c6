//! Filesystem side of the mirror.
//!
//! Thin wrappers over the real filesystem, content fingerprints, the
//! per-side identity tracker and the in-memory directory tree that shadows
//! one real directory subtree.

pub mod entry;
mod fingerprint;
mod identity;
mod ignore;
mod tree;

pub use entry::{EntryKind, EntryStat, FileId, FsError};
pub use fingerprint::{CompareMode, FingerprintError, Verdict};
pub use identity::IdentityTracker;
pub use ignore::IgnoreList;
pub use tree::{DirTree, NodeId, TreeError};
