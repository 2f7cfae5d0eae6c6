use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::inotify::{self, AddWatchFlags, InitFlags, Inotify, InotifyEvent};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::ext::BestEffortPathExt;
use crate::watch::{EventKind, WatchDescriptor, WatchEvent};

/// Source of change notifications for watched directories.
pub trait Notifier {
    fn add_watch(&self, path: &Path) -> Result<WatchDescriptor, WatchError>;

    fn remove_watch(&self, descriptor: WatchDescriptor) -> Result<(), WatchError>;

    /// Blocks until at least one notification is available and returns
    /// everything queued, in delivery order.
    fn read_events(&self) -> Result<Vec<WatchEvent>, WatchError>;
}

fn watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_CLOSE_WRITE
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
        | AddWatchFlags::IN_DELETE_SELF
        | AddWatchFlags::IN_ONLYDIR
        | AddWatchFlags::IN_DONT_FOLLOW
}

/// Kernel descriptors are opaque in `nix`, so handles are numbered here and
/// mapped both ways.
#[derive(Debug)]
struct DescriptorMap {
    by_kernel: HashMap<inotify::WatchDescriptor, WatchDescriptor>,
    by_handle: HashMap<WatchDescriptor, inotify::WatchDescriptor>,
    next: i32,
}

impl Default for DescriptorMap {
    fn default() -> Self {
        Self {
            by_kernel: HashMap::new(),
            by_handle: HashMap::new(),
            next: 1,
        }
    }
}

impl DescriptorMap {
    fn assign(&mut self, kernel: inotify::WatchDescriptor) -> WatchDescriptor {
        if let Some(existing) = self.by_kernel.get(&kernel) {
            return *existing;
        }

        let handle = WatchDescriptor::from(self.next);
        self.next += 1;
        self.by_kernel.insert(kernel, handle);
        self.by_handle.insert(handle, kernel);
        handle
    }

    fn forget(&mut self, handle: WatchDescriptor) -> Option<inotify::WatchDescriptor> {
        let kernel = self.by_handle.remove(&handle)?;
        self.by_kernel.remove(&kernel);
        Some(kernel)
    }
}

/// Linux inotify backend.
#[derive(Debug)]
pub struct InotifyNotifier {
    inotify: Inotify,
    descriptors: Mutex<DescriptorMap>,
}

impl InotifyNotifier {
    pub fn new() -> Result<Self, WatchError> {
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC).context(InitSnafu)?;
        Ok(Self {
            inotify,
            descriptors: Mutex::new(DescriptorMap::default()),
        })
    }

    fn descriptors(&self) -> MutexGuard<'_, DescriptorMap> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(descriptors: &mut DescriptorMap, event: InotifyEvent) -> Option<WatchEvent> {
        let mask = event.mask;
        if mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
            return Some(WatchEvent::new(WatchDescriptor::PENDING, EventKind::Overflow));
        }

        let Some(descriptor) = descriptors.by_kernel.get(&event.wd).copied() else {
            debug!("Dropping event {:?} for a released watch", mask);
            return None;
        };

        let kind = if mask.contains(AddWatchFlags::IN_IGNORED) {
            descriptors.forget(descriptor);
            EventKind::Ignored
        } else if mask.contains(AddWatchFlags::IN_DELETE_SELF) {
            EventKind::SelfDeleted
        } else if mask.contains(AddWatchFlags::IN_CREATE) {
            EventKind::Created
        } else if mask.contains(AddWatchFlags::IN_DELETE) {
            EventKind::Deleted
        } else if mask.contains(AddWatchFlags::IN_MOVED_FROM) {
            EventKind::MovedOut
        } else if mask.contains(AddWatchFlags::IN_MOVED_TO) {
            EventKind::MovedIn
        } else if mask.contains(AddWatchFlags::IN_CLOSE_WRITE) {
            EventKind::ContentModified
        } else {
            debug!("Dropping unhandled event {:?} on {}", mask, descriptor);
            return None;
        };

        Some(WatchEvent {
            descriptor,
            kind,
            name: event.name,
            cookie: event.cookie,
            is_dir: mask.contains(AddWatchFlags::IN_ISDIR),
        })
    }
}

impl Notifier for InotifyNotifier {
    fn add_watch(&self, path: &Path) -> Result<WatchDescriptor, WatchError> {
        let kernel = self
            .inotify
            .add_watch(path, watch_mask())
            .context(AddSnafu { path })?;
        Ok(self.descriptors().assign(kernel))
    }

    fn remove_watch(&self, descriptor: WatchDescriptor) -> Result<(), WatchError> {
        let kernel = self
            .descriptors()
            .forget(descriptor)
            .ok_or(WatchError::UnknownDescriptorError { descriptor })?;
        self.inotify
            .rm_watch(kernel)
            .context(RemoveSnafu { descriptor })
    }

    fn read_events(&self) -> Result<Vec<WatchEvent>, WatchError> {
        loop {
            match self.inotify.read_events() {
                Ok(raw) => {
                    let mut descriptors = self.descriptors();
                    return Ok(raw
                        .into_iter()
                        .filter_map(|event| Self::decode(&mut descriptors, event))
                        .collect());
                }
                Err(Errno::EINTR) => continue,
                Err(source) => return Err(WatchError::ReadError { source }),
            }
        }
    }
}

#[derive(Debug, Snafu)]
pub enum WatchError {
    #[snafu(display("Failed to open the notification channel: {source}"))]
    InitError { source: Errno },
    #[snafu(display("Failed to watch {}: {source}", path.best_effort_path_display()))]
    AddError { path: PathBuf, source: Errno },
    #[snafu(display("Failed to release watch {descriptor}: {source}"))]
    RemoveError {
        descriptor: WatchDescriptor,
        source: Errno,
    },
    #[snafu(display("Watch {descriptor} is not known to the notifier"))]
    UnknownDescriptorError { descriptor: WatchDescriptor },
    #[snafu(display("Lost the notification channel: {source}"))]
    ReadError { source: Errno },
}

impl WatchError {
    /// The notifier had already dropped the watch, e.g. because the watched
    /// directory was deleted before it was released.
    pub fn is_already_released(&self) -> bool {
        matches!(
            self,
            WatchError::RemoveError {
                source: Errno::EINVAL,
                ..
            } | WatchError::UnknownDescriptorError { .. }
        )
    }
}
