use std::cmp::Ordering;

use derive_more::Display;
use tracing::{debug, warn};

use crate::filesystem::NodeId;
use crate::sync::SyncContext;
use crate::watch::WatchEntry;

#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq)]
#[display("{created} created, {removed} removed, {updated} updated, {failed} failed")]
pub struct ReconcileStats {
    pub created: usize,
    pub removed: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ReconcileStats {
    /// Changes applied to the destination.
    pub fn mutations(&self) -> usize {
        self.created + self.removed + self.updated
    }
}

/// Depth-first diff of a source and destination tree pair that fixes the
/// destination in place and queues a pending watch for every source
/// directory it visits.
///
/// Each directory pair is walked as a sorted merge of both child lists.
/// A failure on one entry is logged and only skips that entry.
pub struct Reconciler<'a> {
    ctx: &'a mut SyncContext,
    stats: ReconcileStats,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a mut SyncContext) -> Self {
        Self {
            ctx,
            stats: ReconcileStats::default(),
        }
    }

    /// Reconciles the two roots.
    pub fn run(mut self) -> ReconcileStats {
        let (source_root, destination_root) = self.ctx.roots();
        if !self.ctx.registry.is_watching(source_root) {
            self.ctx.registry.insert(WatchEntry::pending(
                source_root,
                destination_root,
                None,
                None,
            ));
        }

        self.reconcile_pair(source_root, destination_root);
        self.stats
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    pub fn reconcile_pair(&mut self, source_dir: NodeId, destination_dir: NodeId) {
        // Snapshots: the loop below mutates both child lists.
        let source_children = self.ctx.source.tree.children(source_dir).to_vec();
        let destination_children = self.ctx.destination.tree.children(destination_dir).to_vec();
        let mut sources = source_children.into_iter().peekable();
        let mut destinations = destination_children.into_iter().peekable();

        loop {
            let order = match (sources.peek(), destinations.peek()) {
                (Some(source), Some(destination)) => self.ctx.source.tree[*source]
                    .name()
                    .cmp(self.ctx.destination.tree[*destination].name()),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };

            match order {
                Ordering::Less => {
                    if let Some(source) = sources.next() {
                        self.create(source_dir, source, destination_dir);
                    }
                }
                Ordering::Greater => {
                    if let Some(destination) = destinations.next() {
                        self.remove(destination_dir, destination);
                    }
                }
                Ordering::Equal => {
                    if let (Some(source), Some(destination)) = (sources.next(), destinations.next())
                    {
                        self.reconcile_entry(source_dir, source, destination_dir, destination);
                    }
                }
            }
        }
    }

    fn reconcile_entry(
        &mut self,
        source_dir: NodeId,
        source: NodeId,
        destination_dir: NodeId,
        destination: NodeId,
    ) {
        let source_kind = self.ctx.source.tree[source].kind();
        let destination_kind = self.ctx.destination.tree[destination].kind();

        if source_kind != destination_kind {
            debug!(
                "{} changed from {destination_kind} to {source_kind}",
                self.ctx.source.tree[source].path().display()
            );
            if self.remove(destination_dir, destination) {
                self.create(source_dir, source, destination_dir);
            }
            return;
        }

        if self.ctx.source.tree[source].is_dir() {
            if !self.ctx.registry.is_watching(source) {
                self.ctx.registry.insert(WatchEntry::pending(
                    source,
                    destination,
                    Some(source_dir),
                    Some(destination_dir),
                ));
            }
            self.reconcile_pair(source, destination);
            return;
        }

        match self.ctx.update_mirror(source, destination, false) {
            Ok(true) => self.stats.updated += 1,
            Ok(false) => {}
            Err(error) => {
                warn!("Skipping update: {error}");
                self.stats.failed += 1;
            }
        }
    }

    fn create(&mut self, source_dir: NodeId, source: NodeId, destination_dir: NodeId) {
        let destination = match self.ctx.create_mirror(source, destination_dir) {
            Ok(destination) => destination,
            Err(error) => {
                warn!("Skipping entry: {error}");
                self.stats.failed += 1;
                return;
            }
        };
        self.stats.created += 1;

        if self.ctx.source.tree[source].is_dir() {
            self.ctx.registry.insert(WatchEntry::pending(
                source,
                destination,
                Some(source_dir),
                Some(destination_dir),
            ));
            self.reconcile_pair(source, destination);
        }
    }

    fn remove(&mut self, destination_dir: NodeId, destination: NodeId) -> bool {
        let name = self.ctx.destination.tree[destination].name().to_os_string();
        match self.ctx.remove_mirror(destination_dir, &name) {
            Ok(removed) => {
                if removed {
                    self.stats.removed += 1;
                }
                removed
            }
            Err(error) => {
                warn!("Skipping removal: {error}");
                self.stats.failed += 1;
                false
            }
        }
    }
}
