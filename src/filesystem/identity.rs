use std::collections::HashMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use crate::filesystem::FileId;

/// One physical filesystem object and every name currently referring to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    pub id: FileId,
    pub modified: FileTime,
    pub size: u64,
    names: Vec<PathBuf>,
}

impl IdentityEntry {
    /// Names in the order they were first observed.
    pub fn names(&self) -> &[PathBuf] {
        &self.names
    }

    pub fn is_linked(&self) -> bool {
        self.names.len() > 1
    }
}

/// Tracks identities for one side of the mirror. An entry lives exactly as
/// long as at least one tree node refers to it by name.
#[derive(Debug, Default)]
pub struct IdentityTracker {
    entries: HashMap<FileId, IdentityEntry>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the entry for `id` or returns the existing one, adding `name`
    /// if it is not known yet. Registering the same name twice is a no-op.
    pub fn register(
        &mut self,
        id: FileId,
        name: &Path,
        modified: FileTime,
        size: u64,
    ) -> &IdentityEntry {
        let entry = self.entries.entry(id).or_insert_with(|| IdentityEntry {
            id,
            modified,
            size,
            names: Vec::new(),
        });

        if !entry.names.iter().any(|known| known == name) {
            if !entry.names.is_empty() {
                debug!("{} is an additional link to {}", name.display(), id);
            }
            entry.names.push(name.to_path_buf());
        }

        entry
    }

    pub fn lookup(&self, id: FileId) -> Option<&IdentityEntry> {
        self.entries.get(&id)
    }

    /// Detaches `name` from the entry. Returns `true` when this was the last
    /// name and the entry was released.
    pub fn remove_name(&mut self, id: FileId, name: &Path) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };

        entry.names.retain(|known| known != name);
        if entry.names.is_empty() {
            self.entries.remove(&id);
            true
        } else {
            false
        }
    }

    /// Replaces `from` with `to` in the entry's names, keeping its position.
    pub fn rename(&mut self, id: FileId, from: &Path, to: &Path) {
        if let Some(entry) = self.entries.get_mut(&id) {
            match entry.names.iter_mut().find(|known| known.as_path() == from) {
                Some(known) => *known = to.to_path_buf(),
                None => entry.names.push(to.to_path_buf()),
            }
        }
    }

    pub fn refresh(&mut self, id: FileId, modified: FileTime, size: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.modified = modified;
            entry.size = size;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
