use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::ext::BestEffortPathExt;
use crate::filesystem::entry::{self, FsError};
use crate::filesystem::{
    CompareMode, DirTree, EntryKind, FileId, FingerprintError, IdentityTracker, IgnoreList, NodeId,
    TreeError, Verdict,
};
use crate::sync::ChangeReporter;
use crate::watch::{WatchEntry, WatchRegistry};

#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    pub compare: CompareMode,
    pub ignore: IgnoreList,
}

/// One side of the mirror: its tree and the identities its nodes refer to.
#[derive(Debug)]
pub struct Side {
    pub tree: DirTree,
    pub identities: IdentityTracker,
}

impl Side {
    pub fn scan(root: &Path, ignore: &IgnoreList) -> Result<Self, TreeError> {
        let mut identities = IdentityTracker::new();
        let tree = DirTree::scan(root, &mut identities, ignore)?;
        Ok(Self { tree, identities })
    }
}

/// Everything reconciliation and live dispatch mutate, passed around
/// explicitly instead of living in globals.
#[derive(Debug)]
pub struct SyncContext {
    pub source: Side,
    pub destination: Side,
    pub registry: WatchRegistry,
    pub options: MirrorOptions,
    pub reporter: ChangeReporter,
    // Source identity -> identity of its mirrored copy.
    links: HashMap<FileId, FileId>,
}

impl SyncContext {
    pub fn scan(
        source_root: &Path,
        destination_root: &Path,
        options: MirrorOptions,
        reporter: ChangeReporter,
    ) -> Result<Self, ContextError> {
        let source = Side::scan(source_root, &options.ignore).context(SourceScanSnafu)?;
        let destination =
            Side::scan(destination_root, &options.ignore).context(DestinationScanSnafu)?;
        debug!(
            "Loaded {} source and {} destination entries",
            source.tree.len(),
            destination.tree.len()
        );

        Ok(Self {
            source,
            destination,
            registry: WatchRegistry::new(),
            options,
            reporter,
            links: HashMap::new(),
        })
    }

    /// Rebuilds both sides from disk. The registry must have been drained
    /// beforehand, its node ids would dangle otherwise.
    pub fn rescan(&mut self) -> Result<(), ContextError> {
        let source_root = self.source.tree.root_path().to_path_buf();
        let destination_root = self.destination.tree.root_path().to_path_buf();

        let source = Side::scan(&source_root, &self.options.ignore).context(SourceScanSnafu)?;
        let destination = Side::scan(&destination_root, &self.options.ignore)
            .context(DestinationScanSnafu)?;
        self.source = source;
        self.destination = destination;
        self.links.clear();
        Ok(())
    }

    pub fn roots(&self) -> (NodeId, NodeId) {
        (self.source.tree.root(), self.destination.tree.root())
    }

    /// Path of an already mirrored name for the object behind `source_id`,
    /// if that object has more than one name on the source side.
    pub fn linked_destination(&self, source_id: FileId) -> Option<PathBuf> {
        let source_entry = self.source.identities.lookup(source_id)?;
        if !source_entry.is_linked() {
            return None;
        }

        let destination_id = self.links.get(&source_id)?;
        self.destination
            .identities
            .lookup(*destination_id)
            .and_then(|entry| entry.names().first().cloned())
    }

    /// Whether the destination object also goes by names that do not mirror
    /// a name of the source object. Writing into it in place would change
    /// those names as well.
    fn shares_unrelated_names(&self, source_id: FileId, destination_id: FileId) -> bool {
        let Some(destination_entry) = self.destination.identities.lookup(destination_id) else {
            return false;
        };
        if !destination_entry.is_linked() {
            return false;
        }

        let source_names = self
            .source
            .identities
            .lookup(source_id)
            .map(|entry| entry.names())
            .unwrap_or_default();
        let source_root = self.source.tree.root_path();
        let destination_root = self.destination.tree.root_path();
        destination_entry.names().iter().any(|name| {
            match name.strip_prefix(destination_root) {
                Ok(relative) => !source_names.contains(&source_root.join(relative)),
                Err(_) => true,
            }
        })
    }

    /// Materializes the source node as a new child of `destination_parent`:
    /// a directory is created empty, a file is copied, or linked to an
    /// existing copy when the source object is a hard link.
    pub fn create_mirror(
        &mut self,
        source_node: NodeId,
        destination_parent: NodeId,
    ) -> Result<NodeId, MirrorError> {
        let node = self
            .source
            .tree
            .get(source_node)
            .context(StaleSourceSnafu { node: source_node })?;
        let name = node.name().to_os_string();
        let kind = node.kind();
        let source_id = node.file_id();
        let source_path = node.path().to_path_buf();
        let destination_path = self
            .destination
            .tree
            .get(destination_parent)
            .context(StaleDestinationSnafu {
                node: destination_parent,
            })?
            .path()
            .join(&name);

        match kind {
            EntryKind::Directory => {
                entry::create_dir(&destination_path).context(FilesystemSnafu)?;
                self.reporter.created(&destination_path, kind);
            }
            EntryKind::File => match self.linked_destination(source_id) {
                Some(existing) => {
                    entry::hard_link(&existing, &destination_path).context(FilesystemSnafu)?;
                    self.reporter.linked(&destination_path, &existing);
                }
                None => {
                    entry::copy_content(&source_path, &destination_path)
                        .context(FilesystemSnafu)?;
                    self.reporter.created(&destination_path, kind);
                }
            },
        }

        let stat = entry::stat(&destination_path).context(FilesystemSnafu)?;
        let child = self
            .destination
            .tree
            .add_child(
                destination_parent,
                &name,
                &stat,
                &mut self.destination.identities,
            )
            .context(TreeUpdateSnafu)?;
        if kind == EntryKind::File {
            self.links.insert(source_id, stat.id);
        }

        Ok(child)
    }

    /// Deletes the destination child `name` from disk and from the tree.
    /// Returns `false` when the tree has no such child.
    pub fn remove_mirror(
        &mut self,
        destination_parent: NodeId,
        name: &OsStr,
    ) -> Result<bool, MirrorError> {
        let Some(node) = self
            .destination
            .tree
            .find_child(destination_parent, name, None)
        else {
            return Ok(false);
        };
        let path = self.destination.tree[node].path().to_path_buf();
        let kind = self.destination.tree[node].kind();

        match entry::remove(&path, kind) {
            Ok(()) => {}
            Err(FsError::RemoveError { source, .. }) if source.kind() == ErrorKind::NotFound => {
                debug!("{} was already gone", path.best_effort_path_display());
            }
            Err(error) => return Err(error).context(FilesystemSnafu),
        }

        let released = self
            .destination
            .tree
            .teardown(node, &mut self.destination.identities);
        self.links
            .retain(|_, destination_id| !released.contains(destination_id));
        self.reporter.removed(&path);
        Ok(true)
    }

    /// Brings the mirrored file up to date with its source. With `force` the
    /// content is recopied without comparing. Returns whether the
    /// destination was touched.
    pub fn update_mirror(
        &mut self,
        source_node: NodeId,
        destination_node: NodeId,
        force: bool,
    ) -> Result<bool, MirrorError> {
        let source = self
            .source
            .tree
            .get(source_node)
            .context(StaleSourceSnafu { node: source_node })?;
        let (source_path, source_id) = (source.path().to_path_buf(), source.file_id());
        let destination = self
            .destination
            .tree
            .get(destination_node)
            .context(StaleDestinationSnafu {
                node: destination_node,
            })?;
        let (destination_path, destination_id) =
            (destination.path().to_path_buf(), destination.file_id());

        let source_stat = entry::stat(&source_path).context(FilesystemSnafu)?;
        // A symbolic link is mirrored by its target's content, so that is
        // what the copy gets compared against.
        let content_stat = entry::stat_content(&source_path).context(FilesystemSnafu)?;
        let mut destination_stat = entry::stat(&destination_path).context(FilesystemSnafu)?;
        let verdict = if force {
            Verdict::Copy
        } else {
            self.options
                .compare
                .compare(&source_path, &content_stat, &destination_path, &destination_stat)
                .context(CompareSnafu)?
        };

        let changed = match verdict {
            Verdict::UpToDate => false,
            Verdict::Restamp => {
                entry::set_mtime(&destination_path, content_stat.modified)
                    .context(FilesystemSnafu)?;
                true
            }
            Verdict::Copy => {
                if self.shares_unrelated_names(source_id, destination_id) {
                    debug!(
                        "Unlinking {} before copying over it",
                        destination_path.best_effort_path_display()
                    );
                    entry::remove(&destination_path, EntryKind::File).context(FilesystemSnafu)?;
                }
                entry::copy_content(&source_path, &destination_path).context(FilesystemSnafu)?;
                true
            }
        };
        if changed {
            destination_stat = entry::stat(&destination_path).context(FilesystemSnafu)?;
            self.reporter.updated(&destination_path);
        }

        if let Some(released) =
            self.source
                .tree
                .refresh(source_node, &source_stat, &mut self.source.identities)
        {
            self.links.remove(&released);
        }
        if let Some(released) = self.destination.tree.refresh(
            destination_node,
            &destination_stat,
            &mut self.destination.identities,
        ) {
            self.links.retain(|_, destination_id| *destination_id != released);
        }
        self.links.insert(source_stat.id, destination_stat.id);

        Ok(changed)
    }

    /// Drops the source child `name` of `source_parent` from the tree and
    /// hands back the registry entries of every directory inside it. Their
    /// watches still have to be released. `None` if the child is unknown.
    pub fn forget_source(&mut self, source_parent: NodeId, name: &OsStr) -> Option<Vec<WatchEntry>> {
        let node = self.source.tree.find_child(source_parent, name, None)?;
        let directories = self.source.tree.directories_under(node);
        let watches = self.registry.remove_sources(&directories);

        let released = self.source.tree.teardown(node, &mut self.source.identities);
        for id in released {
            self.links.remove(&id);
        }
        Some(watches)
    }
}

#[derive(Debug, Snafu)]
pub enum ContextError {
    #[snafu(display("Failed to scan the source tree: {source}"))]
    SourceScanError { source: TreeError },
    #[snafu(display("Failed to scan the destination tree: {source}"))]
    DestinationScanError { source: TreeError },
}

#[derive(Debug, Snafu)]
pub enum MirrorError {
    #[snafu(display("{source}"))]
    FilesystemError { source: FsError },
    #[snafu(display("{source}"))]
    CompareError { source: FingerprintError },
    #[snafu(display("Failed to record the mirrored entry: {source}"))]
    TreeUpdateError { source: TreeError },
    #[snafu(display("Source node {node} was already released"))]
    StaleSourceError { node: NodeId },
    #[snafu(display("Destination node {node} was already released"))]
    StaleDestinationError { node: NodeId },
}
