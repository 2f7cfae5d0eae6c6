//! Change notifications for the source tree and their live application to
//! the destination.

mod dispatcher;
mod event;
mod notifier;
mod registry;
#[cfg(test)]
pub mod scripted;

pub use dispatcher::{LiveDispatcher, LiveSyncError};
pub use event::{EventKind, WatchDescriptor, WatchEvent};
pub use notifier::{InotifyNotifier, Notifier, WatchError};
pub use registry::{InstallReport, WatchEntry, WatchRegistry};
