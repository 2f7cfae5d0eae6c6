//! In-memory notifier for tests: hands out descriptors, records releases
//! and replays queued batches.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;

use crate::watch::{Notifier, WatchDescriptor, WatchError, WatchEvent};

#[derive(Debug, Default)]
struct ScriptedState {
    next: i32,
    watched: BTreeMap<WatchDescriptor, PathBuf>,
    released: Vec<WatchDescriptor>,
    failing: HashSet<PathBuf>,
    batches: VecDeque<Vec<WatchEvent>>,
}

#[derive(Debug, Default)]
pub struct ScriptedNotifier {
    state: Mutex<ScriptedState>,
}

impl ScriptedNotifier {
    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_on(&self, path: &Path) {
        self.state().failing.insert(path.to_path_buf());
    }

    pub fn descriptor_for(&self, path: &Path) -> Option<WatchDescriptor> {
        self.state()
            .watched
            .iter()
            .find(|(_, watched)| watched.as_path() == path)
            .map(|(descriptor, _)| *descriptor)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.state().watched.values().cloned().collect()
    }

    pub fn released(&self) -> Vec<WatchDescriptor> {
        self.state().released.clone()
    }

    pub fn push_batch(&self, batch: Vec<WatchEvent>) {
        self.state().batches.push_back(batch);
    }
}

impl Notifier for ScriptedNotifier {
    fn add_watch(&self, path: &Path) -> Result<WatchDescriptor, WatchError> {
        let mut state = self.state();
        if state.failing.contains(path) {
            return Err(WatchError::AddError {
                path: path.to_path_buf(),
                source: Errno::ENOSPC,
            });
        }

        state.next += 1;
        let descriptor = WatchDescriptor::from(state.next);
        state.watched.insert(descriptor, path.to_path_buf());
        Ok(descriptor)
    }

    fn remove_watch(&self, descriptor: WatchDescriptor) -> Result<(), WatchError> {
        let mut state = self.state();
        match state.watched.remove(&descriptor) {
            Some(_) => {
                state.released.push(descriptor);
                Ok(())
            }
            None => Err(WatchError::RemoveError {
                descriptor,
                source: Errno::EINVAL,
            }),
        }
    }

    fn read_events(&self) -> Result<Vec<WatchEvent>, WatchError> {
        self.state()
            .batches
            .pop_front()
            .ok_or(WatchError::ReadError {
                source: Errno::EBADF,
            })
    }
}
