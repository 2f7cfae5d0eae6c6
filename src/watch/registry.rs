use std::collections::HashSet;

use tracing::{debug, error};

use crate::ext::BestEffortPathExt;
use crate::filesystem::{DirTree, NodeId};
use crate::watch::{Notifier, WatchDescriptor};

/// One watched source directory and the nodes an event on it is applied to.
/// Parents are `None` only for the pair of tree roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEntry {
    pub descriptor: WatchDescriptor,
    pub source: NodeId,
    pub destination: NodeId,
    pub source_parent: Option<NodeId>,
    pub destination_parent: Option<NodeId>,
}

impl WatchEntry {
    pub fn pending(
        source: NodeId,
        destination: NodeId,
        source_parent: Option<NodeId>,
        destination_parent: Option<NodeId>,
    ) -> Self {
        Self {
            descriptor: WatchDescriptor::PENDING,
            source,
            destination,
            source_parent,
            destination_parent,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: usize,
    pub failed: usize,
}

/// Watch entries kept in ascending descriptor order. Pending entries all
/// share [`WatchDescriptor::PENDING`] and therefore sit at the front.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    entries: Vec<WatchEntry>,
    sources: HashSet<NodeId>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: WatchEntry) {
        let position = self
            .entries
            .partition_point(|existing| existing.descriptor <= entry.descriptor);
        self.sources.insert(entry.source);
        self.entries.insert(position, entry);
    }

    pub fn lookup(&self, descriptor: WatchDescriptor) -> Option<&WatchEntry> {
        if descriptor.is_pending() {
            return None;
        }
        self.position(descriptor).map(|index| &self.entries[index])
    }

    pub fn remove(&mut self, descriptor: WatchDescriptor) -> Option<WatchEntry> {
        if descriptor.is_pending() {
            return None;
        }
        let removed = self.entries.remove(self.position(descriptor)?);
        self.sources.remove(&removed.source);
        Some(removed)
    }

    fn position(&self, descriptor: WatchDescriptor) -> Option<usize> {
        self.entries
            .binary_search_by_key(&descriptor, |entry| entry.descriptor)
            .ok()
    }

    pub fn is_watching(&self, source: NodeId) -> bool {
        self.sources.contains(&source)
    }

    /// Finds the entry watching the source directory `source`.
    pub fn find_by_source(&self, source: NodeId) -> Option<&WatchEntry> {
        self.entries.iter().find(|entry| entry.source == source)
    }

    /// Removes every entry whose source directory is in `sources`.
    pub fn remove_sources(&mut self, sources: &[NodeId]) -> Vec<WatchEntry> {
        let sources: HashSet<NodeId> = sources.iter().copied().collect();
        let (removed, kept) = self
            .entries
            .drain(..)
            .partition(|entry| sources.contains(&entry.source));
        self.entries = kept;
        for entry in &removed {
            self.sources.remove(&entry.source);
        }
        removed
    }

    /// Points the entry for `source` at new parents after a rename.
    pub fn reparent(
        &mut self,
        source: NodeId,
        source_parent: NodeId,
        destination_parent: NodeId,
    ) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.source == source) {
            entry.source_parent = Some(source_parent);
            entry.destination_parent = Some(destination_parent);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .partition_point(|entry| entry.descriptor.is_pending())
    }

    /// Installs a real watch for every pending entry and back-patches its
    /// descriptor. Entries whose watch cannot be installed are dropped: their
    /// directory is not kept in sync live.
    pub fn install_pending<N: Notifier + ?Sized>(
        &mut self,
        notifier: &N,
        source_tree: &DirTree,
    ) -> InstallReport {
        let pending_count = self.pending_count();
        let pending: Vec<WatchEntry> = self.entries.drain(..pending_count).collect();
        for entry in &pending {
            self.sources.remove(&entry.source);
        }
        let mut report = InstallReport::default();

        for mut entry in pending {
            let Some(node) = source_tree.get(entry.source) else {
                debug!("Skipping watch for released node {}", entry.source);
                continue;
            };

            match notifier.add_watch(node.path()) {
                Ok(descriptor) => {
                    debug!(
                        "Watching {} as {}",
                        node.path().best_effort_path_display(),
                        descriptor
                    );
                    entry.descriptor = descriptor;
                    self.insert(entry);
                    report.installed += 1;
                }
                Err(watch_error) => {
                    error!("Live sync disabled below {}: {watch_error}", node.path().display());
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Empties the registry, handing back every installed entry.
    pub fn drain(&mut self) -> Vec<WatchEntry> {
        self.sources.clear();
        self.entries
            .drain(..)
            .filter(|entry| !entry.descriptor.is_pending())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{IdentityTracker, IgnoreList};
    use crate::watch::scripted::ScriptedNotifier;
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::TempDir;

    fn descriptors(registry: &WatchRegistry) -> Vec<WatchDescriptor> {
        registry.iter().map(|entry| entry.descriptor).collect()
    }

    fn scanned(dir: &TempDir) -> DirTree {
        let mut tracker = IdentityTracker::new();
        DirTree::scan(dir.path(), &mut tracker, &IgnoreList::default()).expect("Failed to scan")
    }

    #[test]
    fn insert_keeps_descriptors_ascending() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let tree = scanned(&dir);
        let root = tree.root();
        let mut registry = WatchRegistry::new();

        for raw in [5, 2, 9, 1] {
            let mut entry = WatchEntry::pending(root, root, None, None);
            entry.descriptor = WatchDescriptor::from(raw);
            registry.insert(entry);
        }
        registry.insert(WatchEntry::pending(root, root, None, None));

        assert_eq!(
            descriptors(&registry),
            [-1, 1, 2, 5, 9].map(WatchDescriptor::from).to_vec()
        );
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn lookup_and_remove_by_descriptor() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let tree = scanned(&dir);
        let root = tree.root();
        let mut registry = WatchRegistry::new();
        let mut entry = WatchEntry::pending(root, root, None, None);
        entry.descriptor = WatchDescriptor::from(3);
        registry.insert(entry);

        assert_eq!(registry.lookup(WatchDescriptor::from(3)), Some(&entry));
        assert_eq!(registry.lookup(WatchDescriptor::from(4)), None);
        assert_eq!(registry.remove(WatchDescriptor::from(3)), Some(entry));
        assert!(registry.is_empty());
    }

    #[test]
    fn install_pending_back_patches_descriptors() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(dir.path().join("a")).expect("Failed to create directory");
        fs::create_dir(dir.path().join("b")).expect("Failed to create directory");
        let tree = scanned(&dir);
        let root = tree.root();
        let a = tree.find_child(root, OsStr::new("a"), None).expect("a exists");
        let b = tree.find_child(root, OsStr::new("b"), None).expect("b exists");

        let mut registry = WatchRegistry::new();
        registry.insert(WatchEntry::pending(root, root, None, None));
        registry.insert(WatchEntry::pending(a, a, Some(root), Some(root)));
        registry.insert(WatchEntry::pending(b, b, Some(root), Some(root)));

        let notifier = ScriptedNotifier::default();
        notifier.fail_on(&dir.path().join("b"));
        let report = registry.install_pending(&notifier, &tree);

        assert_eq!(report, InstallReport { installed: 2, failed: 1 });
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.find_by_source(b).is_none());
        assert!(!registry.is_watching(b));
        assert!(registry.is_watching(a));
        let watched_a = registry.find_by_source(a).expect("a is watched");
        assert_eq!(
            notifier.descriptor_for(&dir.path().join("a")),
            Some(watched_a.descriptor)
        );
    }

    #[test]
    fn remove_sources_takes_only_matching_entries() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(dir.path().join("a")).expect("Failed to create directory");
        let tree = scanned(&dir);
        let root = tree.root();
        let a = tree.find_child(root, OsStr::new("a"), None).expect("a exists");

        let mut registry = WatchRegistry::new();
        registry.insert(WatchEntry::pending(root, root, None, None));
        registry.insert(WatchEntry::pending(a, a, Some(root), Some(root)));

        let removed = registry.remove_sources(&[a]);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].source, a);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_source(root).is_some());
    }
}
