use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::Arc;

use compio::dispatcher::DispatcherBuilder;
use futures::future::{Either, select};
use snafu::{ResultExt, Snafu};
use tracing::{debug, error, info, warn};

use crate::ext::BestEffortPathExt;
use crate::filesystem::{EntryKind, NodeId, entry};
use crate::sync::{Reconciler, SyncContext};
use crate::watch::{
    EventKind, InstallReport, Notifier, WatchDescriptor, WatchEntry, WatchError, WatchEvent,
};

/// A `MovedOut` waiting for the `MovedIn` that shares its cookie.
#[derive(Debug, Clone)]
struct HeldMove {
    cookie: u32,
    descriptor: WatchDescriptor,
    name: OsString,
}

/// Applies change notifications for the source tree to the destination,
/// one event at a time and in delivery order.
pub struct LiveDispatcher<N> {
    ctx: SyncContext,
    notifier: Arc<N>,
    held_move: Option<HeldMove>,
    needs_resync: bool,
}

impl<N: Notifier> LiveDispatcher<N> {
    /// Takes over a reconciled context. Its pending watches are installed by
    /// [`LiveDispatcher::install_pending`].
    pub fn new(ctx: SyncContext, notifier: Arc<N>) -> Self {
        Self {
            ctx,
            notifier,
            held_move: None,
            needs_resync: false,
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn install_pending(&mut self) -> InstallReport {
        let report = self
            .ctx
            .registry
            .install_pending(self.notifier.as_ref(), &self.ctx.source.tree);
        if report.failed > 0 {
            warn!(
                "{} directories are not watched and will not be kept in sync",
                report.failed
            );
        }
        report
    }

    /// Handles one delivered batch. A `MovedOut` still unpaired at the end
    /// of the batch left the watched area and is applied as a deletion.
    pub fn handle_batch(&mut self, events: Vec<WatchEvent>) {
        debug!("Handling {} events", events.len());
        for event in events {
            self.handle_event(event);
        }

        if let Some(held) = self.held_move.take() {
            self.flush_move(held);
        }
        if std::mem::take(&mut self.needs_resync) {
            self.resync();
        }
    }

    fn handle_event(&mut self, event: WatchEvent) {
        if event.kind == EventKind::Overflow {
            warn!("Change notifications were lost, both trees will be rescanned");
            self.needs_resync = true;
            return;
        }
        if self.needs_resync {
            return;
        }

        if let Some(held) = self.held_move.take() {
            if event.kind == EventKind::MovedIn && event.cookie == held.cookie {
                self.apply_rename(held, event);
                return;
            }
            self.flush_move(held);
        }

        let Some(entry) = self.ctx.registry.lookup(event.descriptor).copied() else {
            debug!(
                "Discarding {} event for unknown watch {}",
                event.kind, event.descriptor
            );
            return;
        };

        match event.kind {
            EventKind::SelfDeleted => self.on_self_deleted(entry),
            EventKind::Ignored => {
                debug!("Watch {} was dropped by the notifier", event.descriptor);
                self.ctx.registry.remove(event.descriptor);
            }
            EventKind::Overflow => {}
            kind => {
                let Some(name) = event.name else {
                    debug!("Discarding unnamed {kind} event on {}", event.descriptor);
                    return;
                };
                if self.ctx.options.ignore.is_ignored(&name) {
                    debug!("Ignoring {kind} event for {}", name.display());
                    return;
                }

                match kind {
                    EventKind::Created | EventKind::MovedIn => self.on_created(entry, &name),
                    EventKind::Deleted => {
                        self.delete_entry(entry.source, entry.destination, &name)
                    }
                    EventKind::ContentModified => self.on_modified(entry, &name),
                    EventKind::MovedOut => {
                        self.held_move = Some(HeldMove {
                            cookie: event.cookie,
                            descriptor: event.descriptor,
                            name,
                        })
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_created(&mut self, entry: WatchEntry, name: &OsStr) {
        let Some(source_dir) = self.ctx.source.tree.get(entry.source) else {
            return;
        };
        let path = source_dir.path().join(name);
        let stat = match entry::stat(&path) {
            Ok(stat) => stat,
            Err(error) => {
                debug!("Entry vanished before it could be mirrored: {error}");
                return;
            }
        };

        if let Some(known) = self
            .ctx
            .source
            .tree
            .find_child(entry.source, name, Some(stat.kind))
        {
            self.refresh_known(entry, known, name, stat.kind);
            return;
        }
        if self
            .ctx
            .source
            .tree
            .find_child(entry.source, name, None)
            .is_some()
        {
            self.delete_entry(entry.source, entry.destination, name);
        }

        let source_child = match self.ctx.source.tree.add_child(
            entry.source,
            name,
            &stat,
            &mut self.ctx.source.identities,
        ) {
            Ok(child) => child,
            Err(error) => {
                warn!("Cannot track {}: {error}", path.best_effort_path_display());
                return;
            }
        };
        self.mirror_new(entry, source_child, name);
    }

    /// A create for a name the source tree already holds, e.g. because a
    /// directory scan got to it before its event did.
    fn refresh_known(&mut self, entry: WatchEntry, known: NodeId, name: &OsStr, kind: EntryKind) {
        let destination = self
            .ctx
            .destination
            .tree
            .find_child(entry.destination, name, Some(kind));

        match (destination, kind) {
            (Some(destination), EntryKind::File) => {
                if let Err(error) = self.ctx.update_mirror(known, destination, false) {
                    warn!("Skipping update: {error}");
                }
            }
            (Some(_), EntryKind::Directory) => {
                debug!("{} is already mirrored", name.display());
            }
            (None, _) => self.mirror_new(entry, known, name),
        }
    }

    fn mirror_new(&mut self, entry: WatchEntry, source_child: NodeId, name: &OsStr) {
        if let Err(error) = self.ctx.remove_mirror(entry.destination, name) {
            warn!("Cannot replace stale entry: {error}");
            return;
        }
        let destination_child = match self.ctx.create_mirror(source_child, entry.destination) {
            Ok(child) => child,
            Err(error) => {
                warn!("Skipping entry: {error}");
                return;
            }
        };
        if !self.ctx.source.tree[source_child].is_dir() {
            return;
        }

        // Watch before scanning so nothing created meanwhile is missed.
        let path = self.ctx.source.tree[source_child].path().to_path_buf();
        if !self.ctx.registry.is_watching(source_child) {
            match self.notifier.add_watch(&path) {
                Ok(descriptor) => self.ctx.registry.insert(WatchEntry {
                    descriptor,
                    source: source_child,
                    destination: destination_child,
                    source_parent: Some(entry.source),
                    destination_parent: Some(entry.destination),
                }),
                Err(watch_error) => {
                    error!(
                        "Live sync disabled below {}: {watch_error}",
                        path.best_effort_path_display()
                    );
                }
            }
        }

        self.ctx.source.tree.populate(
            source_child,
            &mut self.ctx.source.identities,
            &self.ctx.options.ignore,
        );
        let mut reconciler = Reconciler::new(&mut self.ctx);
        reconciler.reconcile_pair(source_child, destination_child);
        debug!(
            "Mirrored new directory {}: {}",
            path.best_effort_path_display(),
            reconciler.stats()
        );
        self.install_pending();
    }

    fn on_modified(&mut self, entry: WatchEntry, name: &OsStr) {
        let Some(source) = self
            .ctx
            .source
            .tree
            .find_child(entry.source, name, Some(EntryKind::File))
        else {
            self.on_created(entry, name);
            return;
        };

        match self
            .ctx
            .destination
            .tree
            .find_child(entry.destination, name, Some(EntryKind::File))
        {
            Some(destination) => {
                if let Err(error) = self.ctx.update_mirror(source, destination, true) {
                    warn!("Skipping update: {error}");
                }
            }
            None => self.mirror_new(entry, source, name),
        }
    }

    fn on_self_deleted(&mut self, entry: WatchEntry) {
        match (entry.source_parent, entry.destination_parent) {
            (Some(source_parent), Some(destination_parent)) => {
                let Some(name) = self
                    .ctx
                    .source
                    .tree
                    .get(entry.source)
                    .map(|node| node.name().to_os_string())
                else {
                    return;
                };
                self.delete_entry(source_parent, destination_parent, &name);
            }
            _ => {
                error!(
                    "Source root {} vanished, nothing is left to mirror",
                    self.ctx.source.tree.root_path().best_effort_path_display()
                );
                self.ctx.registry.remove(entry.descriptor);
            }
        }
    }

    /// Removes the child `name` from both trees and the destination, and
    /// releases the watches of every directory that went with it.
    fn delete_entry(&mut self, source_dir: NodeId, destination_dir: NodeId, name: &OsStr) {
        if let Some(watches) = self.ctx.forget_source(source_dir, name) {
            self.release(watches);
        }

        match self.ctx.remove_mirror(destination_dir, name) {
            Ok(true) => {}
            Ok(false) => debug!("{} was not mirrored", name.display()),
            Err(error) => warn!("Skipping removal: {error}"),
        }
    }

    fn release(&self, watches: Vec<WatchEntry>) {
        for watch in watches {
            if watch.descriptor.is_pending() {
                continue;
            }
            match self.notifier.remove_watch(watch.descriptor) {
                Ok(()) => debug!("Released watch {}", watch.descriptor),
                Err(watch_error) if watch_error.is_already_released() => {
                    debug!("Watch {} was already gone", watch.descriptor)
                }
                Err(watch_error) => warn!("{watch_error}"),
            }
        }
    }

    fn flush_move(&mut self, held: HeldMove) {
        match self.ctx.registry.lookup(held.descriptor).copied() {
            Some(entry) => self.delete_entry(entry.source, entry.destination, &held.name),
            None => debug!("Dropping move of {} from an unknown watch", held.name.display()),
        }
    }

    fn apply_rename(&mut self, held: HeldMove, event: WatchEvent) {
        let from = self.ctx.registry.lookup(held.descriptor).copied();
        let to = self.ctx.registry.lookup(event.descriptor).copied();
        let new_name = event
            .name
            .filter(|name| !self.ctx.options.ignore.is_ignored(name));

        match (from, to, new_name) {
            (Some(from), Some(to), Some(new_name)) => {
                self.rename_entry(from, &held.name, to, &new_name)
            }
            (Some(_), _, _) => self.flush_move(held),
            (None, Some(to), Some(new_name)) => self.on_created(to, &new_name),
            (None, _, _) => debug!("Dropping move between unknown watches"),
        }
    }

    /// Renames the mirrored entry in place, keeping its destination identity
    /// and every watch below it. Falls back to delete and create whenever the
    /// moved object cannot be matched up.
    fn rename_entry(&mut self, from: WatchEntry, old_name: &OsStr, to: WatchEntry, new_name: &OsStr) {
        if from.source == to.source && old_name == new_name {
            return;
        }

        let source_tree = &self.ctx.source.tree;
        let Some(node) = source_tree.find_child(from.source, old_name, None) else {
            self.on_created(to, new_name);
            return;
        };
        let kind = source_tree[node].kind();
        let new_source_path = source_tree[to.source].path().join(new_name);
        let same_object = entry::stat(&new_source_path)
            .is_ok_and(|stat| stat.id == source_tree[node].file_id() && stat.kind == kind);
        let destination = self
            .ctx
            .destination
            .tree
            .find_child(from.destination, old_name, Some(kind));

        let Some(destination) = destination.filter(|_| same_object) else {
            self.delete_entry(from.source, from.destination, old_name);
            self.on_created(to, new_name);
            return;
        };

        // Whatever the name pointed at before is overwritten.
        self.delete_entry(to.source, to.destination, new_name);

        let old_path = self.ctx.destination.tree[destination].path().to_path_buf();
        let new_path = self.ctx.destination.tree[to.destination]
            .path()
            .join(new_name);
        if let Err(error) = entry::rename(&old_path, &new_path) {
            warn!("{error}");
            self.delete_entry(from.source, from.destination, old_name);
            self.on_created(to, new_name);
            return;
        }

        let moved = self
            .ctx
            .source
            .tree
            .move_child(
                from.source,
                old_name,
                to.source,
                new_name,
                &mut self.ctx.source.identities,
            )
            .and_then(|_| {
                self.ctx.destination.tree.move_child(
                    from.destination,
                    old_name,
                    to.destination,
                    new_name,
                    &mut self.ctx.destination.identities,
                )
            });
        if let Err(error) = moved {
            error!("Trees diverged while renaming, rescanning: {error}");
            self.needs_resync = true;
            return;
        }

        if kind == EntryKind::Directory {
            self.ctx.registry.reparent(node, to.source, to.destination);
        }
        self.ctx.reporter.renamed(&old_path, &new_path);
    }

    /// Rebuilds everything from disk after notifications were lost. When a
    /// root cannot be rescanned the previous trees are reconciled instead.
    fn resync(&mut self) {
        self.held_move = None;
        let watches = self.ctx.registry.drain();
        self.release(watches);

        if let Err(error) = self.ctx.rescan() {
            error!(
                "Failed to rescan after lost notifications, keeping the previous trees: {error}"
            );
        }
        let stats = Reconciler::new(&mut self.ctx).run();
        info!("Resynchronized: {stats}");
        self.install_pending();
    }

    /// Releases every held watch.
    pub fn shutdown(&mut self) {
        let watches = self.ctx.registry.drain();
        debug!("Releasing {} watches", watches.len());
        self.release(watches);
    }
}

impl<N: Notifier + Send + Sync + 'static> LiveDispatcher<N> {
    /// Runs until `shutdown` resolves or the notification channel is lost.
    /// Blocking reads happen on a dedicated worker thread, everything else
    /// on the calling task.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), LiveSyncError> {
        let reader = DispatcherBuilder::new()
            .worker_threads(NonZeroUsize::MIN)
            .build()
            .context(ReaderSnafu)?;
        let mut shutdown = pin!(shutdown);
        info!("Watching {} directories", self.ctx.registry.len());

        let result = loop {
            let notifier = Arc::clone(&self.notifier);
            let receiver = reader
                .dispatch(move || async move { notifier.read_events() })
                .map_err(|e| LiveSyncError::ReadDispatchError {
                    error: e.to_string(),
                })?;

            match select(shutdown.as_mut(), receiver).await {
                Either::Left(((), _)) => {
                    info!("Shutting down");
                    break Ok(());
                }
                Either::Right((received, _)) => {
                    let events = match received.context(ReaderCanceledSnafu) {
                        Ok(events) => events.context(ChannelSnafu),
                        Err(error) => Err(error),
                    };
                    match events {
                        Ok(events) => self.handle_batch(events),
                        Err(error) => break Err(error),
                    }
                }
            }
        };

        self.shutdown();
        result
    }
}

#[derive(Debug, Snafu)]
pub enum LiveSyncError {
    #[snafu(display("Failed to start the notification reader"))]
    ReaderError { source: std::io::Error },
    #[snafu(display("Failed to dispatch a notification read: {error}"))]
    ReadDispatchError { error: String },
    #[snafu(display("Notification read was canceled"))]
    ReaderCanceledError {
        source: futures_channel::oneshot::Canceled,
    },
    #[snafu(display("Notification channel failed"))]
    ChannelError { source: WatchError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ChangeReporter, MirrorOptions};
    use crate::watch::scripted::ScriptedNotifier;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        source: TempDir,
        destination: TempDir,
        dispatcher: LiveDispatcher<ScriptedNotifier>,
    }

    impl Fixture {
        fn new(setup: impl FnOnce(&Path)) -> Self {
            Self::with_options(MirrorOptions::default(), setup)
        }

        fn with_options(options: MirrorOptions, setup: impl FnOnce(&Path)) -> Self {
            let source = TempDir::new().expect("Failed to create temp directory");
            let destination = TempDir::new().expect("Failed to create temp directory");
            setup(source.path());

            let mut ctx = SyncContext::scan(
                source.path(),
                destination.path(),
                options,
                ChangeReporter::silent(),
            )
            .expect("Failed to scan");
            Reconciler::new(&mut ctx).run();
            let mut dispatcher = LiveDispatcher::new(ctx, Arc::new(ScriptedNotifier::default()));
            dispatcher.install_pending();

            Self {
                source,
                destination,
                dispatcher,
            }
        }

        fn source(&self, relative: &str) -> std::path::PathBuf {
            self.source.path().join(relative)
        }

        fn destination(&self, relative: &str) -> std::path::PathBuf {
            self.destination.path().join(relative)
        }

        /// Descriptor watching the source directory `relative`, "" for the root.
        fn watch(&self, relative: &str) -> WatchDescriptor {
            let path = if relative.is_empty() {
                self.source.path().to_path_buf()
            } else {
                self.source(relative)
            };
            self.dispatcher
                .notifier()
                .descriptor_for(&path)
                .expect("Directory should be watched")
        }

        fn deliver(&mut self, events: Vec<WatchEvent>) {
            self.dispatcher.handle_batch(events);
        }
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).expect("Failed to read file")
    }

    #[test]
    fn created_file_is_mirrored() {
        let mut fixture = Fixture::new(|_| {});
        fs::write(fixture.source("d.txt"), "delta").expect("Failed to write file");
        let root = fixture.watch("");

        fixture.deliver(vec![WatchEvent::new(root, EventKind::Created).named("d.txt")]);

        assert_eq!(read(&fixture.destination("d.txt")), "delta");
        let ctx = fixture.dispatcher.context();
        let node = ctx
            .source
            .tree
            .find_path(&fixture.source("d.txt"))
            .expect("d.txt is tracked");
        assert!(ctx.source.identities.lookup(ctx.source.tree[node].file_id()).is_some());
        let mirrored = ctx
            .destination
            .tree
            .find_path(&fixture.destination("d.txt"))
            .expect("d.txt is mirrored");
        assert!(ctx
            .destination
            .identities
            .lookup(ctx.destination.tree[mirrored].file_id())
            .is_some());
    }

    #[test]
    fn created_directory_is_watched_and_filled() {
        let mut fixture = Fixture::new(|_| {});
        fs::create_dir_all(fixture.source("new/inner")).expect("Failed to create directories");
        fs::write(fixture.source("new/inner/file"), "content").expect("Failed to write file");
        let root = fixture.watch("");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::Created)
                .named("new")
                .directory(),
        ]);

        assert_eq!(read(&fixture.destination("new/inner/file")), "content");
        let watched = fixture.dispatcher.notifier().watched_paths();
        assert!(watched.contains(&fixture.source("new")));
        assert!(watched.contains(&fixture.source("new/inner")));
        assert_eq!(fixture.dispatcher.context().registry.len(), 3);
        assert_eq!(fixture.dispatcher.context().registry.pending_count(), 0);
    }

    #[test]
    fn deleted_directory_releases_every_watch_below_it() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir_all(root.join("sub/nested")).expect("Failed to create directories");
            fs::write(root.join("sub/nested/f"), "f").expect("Failed to write file");
        });
        let root = fixture.watch("");
        let sub = fixture.watch("sub");
        let nested = fixture.watch("sub/nested");
        fs::remove_dir_all(fixture.source("sub")).expect("Failed to remove directory");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::Deleted)
                .named("sub")
                .directory(),
        ]);

        assert!(!fixture.destination("sub").exists());
        let mut released = fixture.dispatcher.notifier().released();
        released.sort();
        let mut expected = vec![sub, nested];
        expected.sort();
        assert_eq!(released, expected);
        assert_eq!(fixture.dispatcher.context().registry.len(), 1);
        assert!(fixture.dispatcher.context().destination.tree.is_empty());
    }

    #[test]
    fn self_deletion_removes_the_subtree_and_later_events_are_discarded() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir(root.join("gone")).expect("Failed to create directory");
        });
        let root = fixture.watch("");
        let gone = fixture.watch("gone");
        fs::remove_dir(fixture.source("gone")).expect("Failed to remove directory");

        fixture.deliver(vec![
            WatchEvent::new(gone, EventKind::SelfDeleted),
            WatchEvent::new(gone, EventKind::Ignored),
            WatchEvent::new(root, EventKind::Deleted)
                .named("gone")
                .directory(),
        ]);

        assert!(!fixture.destination("gone").exists());
        assert_eq!(fixture.dispatcher.notifier().released(), vec![gone]);
        assert_eq!(fixture.dispatcher.context().registry.len(), 1);
    }

    #[test]
    fn modified_file_is_recopied() {
        let mut fixture = Fixture::new(|root| {
            fs::write(root.join("f"), "old").expect("Failed to write file");
        });
        fs::write(fixture.source("f"), "new").expect("Failed to write file");
        let root = fixture.watch("");

        fixture.deliver(vec![WatchEvent::new(root, EventKind::ContentModified).named("f")]);

        assert_eq!(read(&fixture.destination("f")), "new");
    }

    #[test]
    fn renamed_file_keeps_its_mirrored_inode() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir(root.join("dir")).expect("Failed to create directory");
            fs::write(root.join("before"), "payload").expect("Failed to write file");
        });
        let inode = fs::metadata(fixture.destination("before"))
            .expect("Failed to stat")
            .ino();
        fs::rename(fixture.source("before"), fixture.source("dir/after"))
            .expect("Failed to rename");
        let root = fixture.watch("");
        let dir = fixture.watch("dir");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::MovedOut)
                .named("before")
                .with_cookie(7),
            WatchEvent::new(dir, EventKind::MovedIn)
                .named("after")
                .with_cookie(7),
        ]);

        assert!(!fixture.destination("before").exists());
        let moved = fs::metadata(fixture.destination("dir/after")).expect("Failed to stat");
        assert_eq!(moved.ino(), inode);
        let ctx = fixture.dispatcher.context();
        assert!(ctx.source.tree.find_path(&fixture.source("dir/after")).is_some());
        assert!(ctx.source.tree.find_path(&fixture.source("before")).is_none());
    }

    #[test]
    fn renamed_directory_keeps_its_watches() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir_all(root.join("old/child")).expect("Failed to create directories");
            fs::write(root.join("old/child/f"), "f").expect("Failed to write file");
        });
        let root = fixture.watch("");
        let old = fixture.watch("old");
        let child = fixture.watch("old/child");
        fs::rename(fixture.source("old"), fixture.source("new")).expect("Failed to rename");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::MovedOut)
                .named("old")
                .with_cookie(3)
                .directory(),
            WatchEvent::new(root, EventKind::MovedIn)
                .named("new")
                .with_cookie(3)
                .directory(),
        ]);

        assert_eq!(read(&fixture.destination("new/child/f")), "f");
        assert!(!fixture.destination("old").exists());
        assert!(fixture.dispatcher.notifier().released().is_empty());
        let ctx = fixture.dispatcher.context();
        let new = ctx
            .source
            .tree
            .find_path(&fixture.source("new"))
            .expect("new is tracked");
        assert_eq!(ctx.registry.lookup(old).map(|entry| entry.source), Some(new));
        let child_entry = ctx.registry.lookup(child).expect("child is still watched");
        assert_eq!(
            ctx.source.tree[child_entry.source].path(),
            fixture.source("new/child")
        );

        // Events on the renamed directory land in the right place.
        fs::write(fixture.source("new/child/g"), "g").expect("Failed to write file");
        fixture.deliver(vec![WatchEvent::new(child, EventKind::Created).named("g")]);
        assert_eq!(read(&fixture.destination("new/child/g")), "g");
    }

    #[test]
    fn unpaired_move_out_is_a_deletion() {
        let mut fixture = Fixture::new(|root| {
            fs::write(root.join("leaving"), "bye").expect("Failed to write file");
        });
        let outside = TempDir::new().expect("Failed to create temp directory");
        fs::rename(fixture.source("leaving"), outside.path().join("leaving"))
            .expect("Failed to rename");
        let root = fixture.watch("");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::MovedOut)
                .named("leaving")
                .with_cookie(11),
        ]);

        assert!(!fixture.destination("leaving").exists());
        assert!(fixture.dispatcher.context().destination.tree.is_empty());
    }

    #[test]
    fn move_in_from_outside_is_a_creation() {
        let mut fixture = Fixture::new(|_| {});
        fs::write(fixture.source("arrived"), "hello").expect("Failed to write file");
        let root = fixture.watch("");

        fixture.deliver(vec![
            WatchEvent::new(root, EventKind::MovedIn)
                .named("arrived")
                .with_cookie(5),
        ]);

        assert_eq!(read(&fixture.destination("arrived")), "hello");
    }

    #[test]
    fn events_for_unknown_watches_are_discarded() {
        let mut fixture = Fixture::new(|_| {});
        fs::write(fixture.source("x"), "x").expect("Failed to write file");

        fixture.deliver(vec![
            WatchEvent::new(WatchDescriptor::from(999), EventKind::Created).named("x"),
        ]);

        assert!(!fixture.destination("x").exists());
    }

    #[test]
    fn created_hard_link_is_linked_in_the_mirror() {
        let mut fixture = Fixture::new(|root| {
            fs::write(root.join("original"), "shared").expect("Failed to write file");
        });
        fs::hard_link(fixture.source("original"), fixture.source("link"))
            .expect("Failed to link");
        let root = fixture.watch("");

        fixture.deliver(vec![WatchEvent::new(root, EventKind::Created).named("link")]);

        let original = fs::metadata(fixture.destination("original")).expect("Failed to stat");
        let link = fs::metadata(fixture.destination("link")).expect("Failed to stat");
        assert_eq!(original.ino(), link.ino());
    }

    #[test]
    fn ignored_names_are_left_alone() {
        let options = MirrorOptions {
            ignore: [".cache"].into_iter().collect(),
            ..MirrorOptions::default()
        };
        let mut fixture = Fixture::with_options(options, |_| {});
        fs::write(fixture.source(".cache"), "tmp").expect("Failed to write file");
        let root = fixture.watch("");

        fixture.deliver(vec![WatchEvent::new(root, EventKind::Created).named(".cache")]);

        assert!(!fixture.destination(".cache").exists());
    }

    #[test]
    fn overflow_triggers_a_full_resync() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir(root.join("dir")).expect("Failed to create directory");
        });
        fs::write(fixture.source("dir/missed"), "missed").expect("Failed to write file");
        let before = fixture.dispatcher.context().registry.len();

        fixture.deliver(vec![WatchEvent::new(
            WatchDescriptor::PENDING,
            EventKind::Overflow,
        )]);

        assert_eq!(read(&fixture.destination("dir/missed")), "missed");
        assert_eq!(fixture.dispatcher.context().registry.len(), before);
        assert_eq!(fixture.dispatcher.notifier().released().len(), before);
    }

    #[test]
    fn resync_keeps_watching_when_a_root_cannot_be_rescanned() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir(root.join("dir")).expect("Failed to create directory");
        });
        let before = fixture.dispatcher.context().registry.len();
        fs::remove_dir_all(fixture.destination.path()).expect("Failed to remove destination");

        fixture.deliver(vec![WatchEvent::new(
            WatchDescriptor::PENDING,
            EventKind::Overflow,
        )]);

        assert_eq!(fixture.dispatcher.context().registry.len(), before);
        assert_eq!(fixture.dispatcher.context().registry.pending_count(), 0);
    }

    #[compio::test]
    async fn run_applies_batches_until_the_channel_is_lost() {
        let mut fixture = Fixture::new(|_| {});
        fs::write(fixture.source("late"), "late").expect("Failed to write file");
        let root = fixture.watch("");
        fixture
            .dispatcher
            .notifier()
            .push_batch(vec![WatchEvent::new(root, EventKind::Created).named("late")]);

        let result = fixture.dispatcher.run(std::future::pending()).await;

        assert!(matches!(result, Err(LiveSyncError::ChannelError { .. })));
        assert_eq!(read(&fixture.destination("late")), "late");
        assert!(fixture.dispatcher.context().registry.is_empty());
        assert_eq!(fixture.dispatcher.notifier().released(), vec![root]);
    }

    #[compio::test]
    async fn run_releases_watches_on_shutdown() {
        let mut fixture = Fixture::new(|root| {
            fs::create_dir(root.join("dir")).expect("Failed to create directory");
        });

        let (trigger, shutdown) = futures_channel::oneshot::channel::<()>();
        trigger.send(()).expect("Failed to trigger shutdown");
        let result = fixture
            .dispatcher
            .run(async move {
                let _ = shutdown.await;
            })
            .await;

        assert!(result.is_ok());
        assert!(fixture.dispatcher.context().registry.is_empty());
        assert!(fixture.dispatcher.notifier().watched_paths().is_empty());
    }
}
