use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use metrohash::MetroHash64;
use snafu::{ResultExt, Snafu};

use crate::ext::BestEffortPathExt;
use crate::filesystem::EntryStat;

const READ_CHUNK: usize = 64 * 1024;

/// How a source file and its mirrored counterpart are judged equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CompareMode {
    /// Modification time and size.
    #[default]
    Metadata,
    /// Size, then a content hash when only the modification times disagree.
    Content,
}

impl CompareMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "metadata" => Some(CompareMode::Metadata),
            "content" => Some(CompareMode::Content),
            _ => None,
        }
    }

    pub fn compare(
        &self,
        source: &Path,
        source_stat: &EntryStat,
        destination: &Path,
        destination_stat: &EntryStat,
    ) -> Result<Verdict, FingerprintError> {
        if source_stat.size != destination_stat.size {
            return Ok(Verdict::Copy);
        }
        if source_stat.modified == destination_stat.modified {
            return Ok(Verdict::UpToDate);
        }

        match self {
            CompareMode::Metadata => Ok(Verdict::Copy),
            CompareMode::Content => {
                if content_hash(source)? == content_hash(destination)? {
                    Ok(Verdict::Restamp)
                } else {
                    Ok(Verdict::Copy)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    UpToDate,
    /// Same bytes, only the destination modification time needs fixing.
    Restamp,
    Copy,
}

/// MetroHash64 over the whole file, read in fixed-size chunks.
pub fn content_hash(path: &Path) -> Result<u64, FingerprintError> {
    let mut file = File::open(path).context(ReadSnafu { path })?;
    let mut hasher = MetroHash64::default();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buffer).context(ReadSnafu { path })?;
        if read == 0 {
            break;
        }
        hasher.write(&buffer[..read]);
    }

    Ok(hasher.finish())
}

#[derive(Debug, Snafu)]
pub enum FingerprintError {
    #[snafu(display("Failed to fingerprint {}: {source}", path.best_effort_path_display()))]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
}
