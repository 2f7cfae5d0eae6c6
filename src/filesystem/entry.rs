use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use derive_more::Display;
use filetime::FileTime;
use snafu::{ResultExt, Snafu};

use crate::ext::BestEffortPathExt;

/// Device-local identity of one physical filesystem object.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{device}:{inode}")]
pub struct FileId {
    pub device: u64,
    pub inode: u64,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    #[display("file")]
    File,
    #[display("directory")]
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub id: FileId,
    pub modified: FileTime,
    pub size: u64,
    pub kind: EntryKind,
}

impl From<&fs::Metadata> for EntryStat {
    fn from(metadata: &fs::Metadata) -> Self {
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        Self {
            id: FileId {
                device: metadata.dev(),
                inode: metadata.ino(),
            },
            modified: FileTime::from_last_modification_time(metadata),
            size: metadata.len(),
            kind,
        }
    }
}

/// Stats a path without following a trailing symbolic link.
pub fn stat(path: &Path) -> Result<EntryStat, FsError> {
    let metadata = fs::symlink_metadata(path).context(StatSnafu { path })?;
    Ok(EntryStat::from(&metadata))
}

/// Stats a path, following symbolic links to the object whose content a
/// copy would read.
pub fn stat_content(path: &Path) -> Result<EntryStat, FsError> {
    let metadata = fs::metadata(path).context(StatSnafu { path })?;
    Ok(EntryStat::from(&metadata))
}

/// Lists the names directly under `path`, sorted.
pub fn list_children(path: &Path) -> Result<Vec<OsString>, FsError> {
    let mut names = fs::read_dir(path)
        .context(ListSnafu { path })?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<Vec<_>, _>>()
        .context(ListSnafu { path })?;
    names.sort();
    Ok(names)
}

pub fn create_dir(path: &Path) -> Result<(), FsError> {
    fs::create_dir(path).context(CreateDirSnafu { path })
}

/// Copies the bytes of `source` over `destination` and carries the source
/// modification time across, so an up-to-date pair compares equal later.
pub fn copy_content(source: &Path, destination: &Path) -> Result<(), FsError> {
    let content = stat_content(source)?;
    fs::copy(source, destination).context(CopySnafu {
        source_path: source,
        destination_path: destination,
    })?;
    set_mtime(destination, content.modified)
}

pub fn set_mtime(path: &Path, modified: FileTime) -> Result<(), FsError> {
    filetime::set_file_mtime(path, modified).context(TimestampSnafu { path })
}

pub fn hard_link(existing: &Path, link: &Path) -> Result<(), FsError> {
    fs::hard_link(existing, link).context(LinkSnafu { existing, link })
}

pub fn rename(from: &Path, to: &Path) -> Result<(), FsError> {
    fs::rename(from, to).context(RenameSnafu { from, to })
}

/// Removes a file, or a directory together with everything below it.
pub fn remove(path: &Path, kind: EntryKind) -> Result<(), FsError> {
    let result = match kind {
        EntryKind::File => fs::remove_file(path),
        EntryKind::Directory => fs::remove_dir_all(path),
    };
    result.context(RemoveSnafu { path })
}

#[derive(Debug, Snafu)]
pub enum FsError {
    #[snafu(display("Failed to stat {}: {source}", path.best_effort_path_display()))]
    StatError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to list directory {}: {source}", path.best_effort_path_display()))]
    ListError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to create directory {}: {source}", path.best_effort_path_display()))]
    CreateDirError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to copy {} to {}: {source}",
        source_path.best_effort_path_display(),
        destination_path.best_effort_path_display()
    ))]
    CopyError {
        source_path: PathBuf,
        destination_path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to set modification time of {}: {source}", path.best_effort_path_display()))]
    TimestampError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to link {} to {}: {source}",
        link.best_effort_path_display(),
        existing.best_effort_path_display()
    ))]
    LinkError {
        existing: PathBuf,
        link: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to rename {} to {}: {source}",
        from.best_effort_path_display(),
        to.best_effort_path_display()
    ))]
    RenameError {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to remove {}: {source}", path.best_effort_path_display()))]
    RemoveError {
        path: PathBuf,
        source: std::io::Error,
    },
}
