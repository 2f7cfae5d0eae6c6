use std::ffi::{OsStr, OsString};
use std::ops::Index;
use std::path::{Path, PathBuf};

use derive_more::Display;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::filesystem::entry::{self, FsError};
use crate::filesystem::{EntryKind, EntryStat, FileId, IdentityTracker, IgnoreList};

/// Index of a node inside one [`DirTree`]. Only meaningful for the tree
/// that handed it out, and only until that node is released.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct NodeId(usize);

/// One filesystem entry within one tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    name: OsString,
    path: PathBuf,
    file_id: FileId,
    kind: EntryKind,
    parent: Option<NodeId>,
    // Sorted by name, no duplicates.
    children: Vec<NodeId>,
}

impl TreeNode {
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of entries for a directory, `None` for a file.
    pub fn child_count(&self) -> Option<usize> {
        self.is_dir().then_some(self.children.len())
    }
}

/// In-memory shadow of one real directory subtree.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]. Every node
/// registers its path with the side's [`IdentityTracker`] when added and
/// detaches it again when released.
#[derive(Debug)]
pub struct DirTree {
    nodes: Vec<Option<TreeNode>>,
    free: Vec<usize>,
    root: NodeId,
    len: usize,
}

impl DirTree {
    pub fn new(root_path: &Path, root_stat: &EntryStat, tracker: &mut IdentityTracker) -> Self {
        tracker.register(root_stat.id, root_path, root_stat.modified, root_stat.size);

        let name = root_path
            .file_name()
            .unwrap_or(root_path.as_os_str())
            .to_os_string();
        let root = TreeNode {
            name,
            path: root_path.to_path_buf(),
            file_id: root_stat.id,
            kind: EntryKind::Directory,
            parent: None,
            children: Vec::new(),
        };

        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            len: 0,
        }
    }

    /// Stats `root_path` and populates a tree for it from disk.
    pub fn scan(
        root_path: &Path,
        tracker: &mut IdentityTracker,
        ignore: &IgnoreList,
    ) -> Result<Self, TreeError> {
        let root_stat = entry::stat(root_path).context(RootSnafu)?;
        ensure!(
            root_stat.kind == EntryKind::Directory,
            RootNotDirectorySnafu { path: root_path }
        );

        let mut tree = Self::new(root_path, &root_stat, tracker);
        tree.populate(tree.root, tracker, ignore);
        debug!(
            "Scanned {} entries under {}",
            tree.len,
            root_path.best_effort_path_display()
        );
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self[self.root].path
    }

    /// Number of entries below the root.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn children(&self, dir: NodeId) -> &[NodeId] {
        self.get(dir).map(TreeNode::children).unwrap_or_default()
    }

    fn child_position(&self, dir: NodeId, name: &OsStr) -> Option<Result<usize, usize>> {
        let node = self.get(dir)?;
        Some(
            node.children
                .binary_search_by(|child| self[*child].name.as_os_str().cmp(name)),
        )
    }

    /// Looks `name` up among the children of `dir`. With `kind` set, a child
    /// of the other kind does not match.
    pub fn find_child(&self, dir: NodeId, name: &OsStr, kind: Option<EntryKind>) -> Option<NodeId> {
        let index = self.child_position(dir, name)?.ok()?;
        let child = self[dir].children[index];
        match kind {
            Some(kind) if self[child].kind != kind => None,
            _ => Some(child),
        }
    }

    /// Resolves an absolute path under the root to its node.
    pub fn find_path(&self, path: &Path) -> Option<NodeId> {
        let relative = path.strip_prefix(self.root_path()).ok()?;
        relative
            .components()
            .try_fold(self.root, |dir, component| {
                self.find_child(dir, component.as_os_str(), None)
            })
    }

    /// Inserts a new child under `dir` at its sorted position and registers
    /// its identity.
    pub fn add_child(
        &mut self,
        dir: NodeId,
        name: &OsStr,
        stat: &EntryStat,
        tracker: &mut IdentityTracker,
    ) -> Result<NodeId, TreeError> {
        let parent = self.get(dir).context(StaleNodeSnafu { node: dir })?;
        ensure!(
            parent.is_dir(),
            NotADirectorySnafu {
                path: parent.path.clone()
            }
        );
        let path = parent.path.join(name);
        let position = match self.child_position(dir, name) {
            Some(Err(position)) => position,
            _ => return DuplicateEntrySnafu { path }.fail(),
        };

        tracker.register(stat.id, &path, stat.modified, stat.size);
        let child = self.allocate(TreeNode {
            name: name.to_os_string(),
            path,
            file_id: stat.id,
            kind: stat.kind,
            parent: Some(dir),
            children: Vec::new(),
        });
        if let Some(parent) = self.get_mut(dir) {
            parent.children.insert(position, child);
        }
        self.len += 1;

        Ok(child)
    }

    fn allocate(&mut self, node: TreeNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Detaches and releases the child `name` of `dir` with its subtree.
    /// Returns the identities that lost their last name, or `None` if no
    /// matching child exists.
    pub fn remove_child(
        &mut self,
        dir: NodeId,
        name: &OsStr,
        kind: Option<EntryKind>,
        tracker: &mut IdentityTracker,
    ) -> Option<Vec<FileId>> {
        let child = self.find_child(dir, name, kind)?;
        Some(self.teardown(child, tracker))
    }

    /// Releases `node` and everything below it. Tearing down the root only
    /// releases its descendants; the root itself stays in place.
    pub fn teardown(&mut self, node: NodeId, tracker: &mut IdentityTracker) -> Vec<FileId> {
        let mut released = Vec::new();

        if node == self.root {
            let children = self
                .get_mut(node)
                .map(|root| std::mem::take(&mut root.children))
                .unwrap_or_default();
            for child in children {
                self.release(child, tracker, &mut released);
            }
            return released;
        }

        let parent = self.get(node).and_then(TreeNode::parent);
        if let Some(parent) = parent.and_then(|parent| self.get_mut(parent)) {
            parent.children.retain(|child| *child != node);
        }
        self.release(node, tracker, &mut released);
        released
    }

    fn release(&mut self, node: NodeId, tracker: &mut IdentityTracker, released: &mut Vec<FileId>) {
        let Some(removed) = self.nodes.get_mut(node.0).and_then(Option::take) else {
            return;
        };
        self.free.push(node.0);
        self.len -= 1;

        if tracker.remove_name(removed.file_id, &removed.path) {
            released.push(removed.file_id);
        }
        for child in removed.children {
            self.release(child, tracker, released);
        }
    }

    /// Scans the real directory behind `dir` depth-first, adding a node for
    /// every entry not yet in the tree. Unreadable entries are skipped with a
    /// warning.
    pub fn populate(&mut self, dir: NodeId, tracker: &mut IdentityTracker, ignore: &IgnoreList) {
        let Some(dir_path) = self.get(dir).map(|node| node.path.clone()) else {
            return;
        };

        let names = match entry::list_children(&dir_path) {
            Ok(names) => names,
            Err(error) => {
                warn!("Skipping unreadable directory: {error}");
                return;
            }
        };

        for name in names {
            if ignore.is_ignored(&name) {
                debug!("Ignoring {}", dir_path.join(&name).display());
                continue;
            }
            if self.find_child(dir, &name, None).is_some() {
                continue;
            }

            let stat = match entry::stat(&dir_path.join(&name)) {
                Ok(stat) => stat,
                Err(error) => {
                    warn!("Skipping unreadable entry: {error}");
                    continue;
                }
            };

            match self.add_child(dir, &name, &stat, tracker) {
                Ok(child) if stat.kind == EntryKind::Directory => {
                    self.populate(child, tracker, ignore)
                }
                Ok(_) => {}
                Err(error) => warn!("Skipping entry: {error}"),
            }
        }
    }

    /// Relinks the child `name` of `from_dir` as `new_name` under `to_dir`,
    /// rewriting the paths of its whole subtree and their identity names.
    pub fn move_child(
        &mut self,
        from_dir: NodeId,
        name: &OsStr,
        to_dir: NodeId,
        new_name: &OsStr,
        tracker: &mut IdentityTracker,
    ) -> Result<NodeId, TreeError> {
        let target = self.get(to_dir).context(StaleNodeSnafu { node: to_dir })?;
        ensure!(
            target.is_dir(),
            NotADirectorySnafu {
                path: target.path.clone()
            }
        );
        let new_path = target.path.join(new_name);
        let node = self
            .find_child(from_dir, name, None)
            .with_context(|| MissingEntrySnafu {
                path: self[from_dir].path.join(name),
            })?;

        if let Some(from) = self.get_mut(from_dir) {
            from.children.retain(|child| *child != node);
        }
        let position = match self.child_position(to_dir, new_name) {
            Some(Err(position)) => position,
            _ => {
                // Put the node back where it was before bailing out.
                let position = self
                    .child_position(from_dir, name)
                    .and_then(Result::err)
                    .unwrap_or_default();
                if let Some(from) = self.get_mut(from_dir) {
                    from.children.insert(position, node);
                }
                return DuplicateEntrySnafu { path: new_path }.fail();
            }
        };

        if let Some(moved) = self.get_mut(node) {
            moved.name = new_name.to_os_string();
            moved.parent = Some(to_dir);
        }
        if let Some(target) = self.get_mut(to_dir) {
            target.children.insert(position, node);
        }
        self.repath(node, new_path, tracker);

        Ok(node)
    }

    fn repath(&mut self, node: NodeId, new_path: PathBuf, tracker: &mut IdentityTracker) {
        let Some(current) = self.get_mut(node) else {
            return;
        };
        let old_path = std::mem::replace(&mut current.path, new_path.clone());
        let file_id = current.file_id;
        let children = current.children.clone();

        tracker.rename(file_id, &old_path, &new_path);
        for child in children {
            let child_path = new_path.join(&self[child].name);
            self.repath(child, child_path, tracker);
        }
    }

    /// Brings the identity record of `node` up to date with a fresh stat.
    /// If the entry now refers to a different object, the old identity loses
    /// this name; it is returned when that released it.
    pub fn refresh(
        &mut self,
        node: NodeId,
        stat: &EntryStat,
        tracker: &mut IdentityTracker,
    ) -> Option<FileId> {
        let current = self.get_mut(node)?;
        let previous = current.file_id;

        if previous == stat.id {
            tracker.refresh(stat.id, stat.modified, stat.size);
            return None;
        }

        current.file_id = stat.id;
        let path = current.path.clone();
        let released = tracker.remove_name(previous, &path);
        tracker.register(stat.id, &path, stat.modified, stat.size);
        tracker.refresh(stat.id, stat.modified, stat.size);
        released.then_some(previous)
    }

    /// Pre-order walk of `node` and its descendants.
    pub fn walk(&self, node: NodeId) -> Vec<NodeId> {
        let mut visited = Vec::new();
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            let Some(entry) = self.get(current) else {
                continue;
            };
            visited.push(current);
            stack.extend(entry.children.iter().rev().copied());
        }

        visited
    }

    /// Directories among `node` and its descendants.
    pub fn directories_under(&self, node: NodeId) -> Vec<NodeId> {
        self.walk(node)
            .into_iter()
            .filter(|id| self[*id].is_dir())
            .collect()
    }
}

impl Index<NodeId> for DirTree {
    type Output = TreeNode;

    fn index(&self, id: NodeId) -> &TreeNode {
        match self.get(id) {
            Some(node) => node,
            None => panic!("tree node {id} was already released"),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum TreeError {
    #[snafu(display("Cannot scan the tree root"))]
    RootError { source: FsError },
    #[snafu(display("Tree root {} is not a directory", path.best_effort_path_display()))]
    RootNotDirectoryError { path: PathBuf },
    #[snafu(display("{} is not a directory", path.best_effort_path_display()))]
    NotADirectoryError { path: PathBuf },
    #[snafu(display("{} is already present in the tree", path.best_effort_path_display()))]
    DuplicateEntryError { path: PathBuf },
    #[snafu(display("{} is not present in the tree", path.best_effort_path_display()))]
    MissingEntryError { path: PathBuf },
    #[snafu(display("Tree node {node} was already released"))]
    StaleNodeError { node: NodeId },
}
