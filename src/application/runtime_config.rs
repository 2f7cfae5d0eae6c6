use std::path::{Path, PathBuf};

use snafu::prelude::*;

use crate::cli::Cli;
use crate::config::MirrorConfig;
use crate::ext::BestEffortPathExt;
use crate::filesystem::CompareMode;
use crate::sync::MirrorOptions;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub config: Option<PathBuf>,
    pub once: bool,
    pub quiet: bool,
    pub compare: Option<CompareMode>,
}

impl From<Cli> for RuntimeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            source: cli.source,
            destination: cli.destination,
            config: cli.config,
            once: cli.once,
            quiet: cli.quiet,
            compare: cli.compare,
        }
    }
}

/// Canonical, validated source and destination directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRoots {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl RuntimeConfig {
    /// Both directories must exist, differ, and not contain one another.
    pub fn resolve_roots(&self) -> Result<MirrorRoots, RootsError> {
        let source = resolve_dir("source", &self.source)?;
        let destination = resolve_dir("destination", &self.destination)?;

        ensure!(source != destination, SameDirectorySnafu { path: source });
        ensure!(
            !destination.starts_with(&source),
            NestedDirectorySnafu {
                outer: source.clone(),
                inner: destination.clone(),
            }
        );
        ensure!(
            !source.starts_with(&destination),
            NestedDirectorySnafu {
                outer: destination.clone(),
                inner: source.clone(),
            }
        );

        Ok(MirrorRoots {
            source,
            destination,
        })
    }

    /// Command line settings win over the config file.
    pub fn mirror_options(&self, file_config: MirrorConfig) -> MirrorOptions {
        MirrorOptions {
            compare: self.compare.or(file_config.compare).unwrap_or_default(),
            ignore: file_config.ignore.into_iter().collect(),
        }
    }
}

fn resolve_dir(role: &'static str, path: &Path) -> Result<PathBuf, RootsError> {
    let resolved = std::fs::canonicalize(path).context(MissingDirectorySnafu { role, path })?;
    ensure!(resolved.is_dir(), NotADirectorySnafu { role, path });
    Ok(resolved)
}

#[derive(Debug, Snafu)]
pub enum RootsError {
    #[snafu(display("Cannot access {} directory {}: {source}", role, path.best_effort_path_display()))]
    MissingDirectoryError {
        role: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("The {} {} is not a directory", role, path.best_effort_path_display()))]
    NotADirectoryError { role: &'static str, path: PathBuf },
    #[snafu(display("Source and destination are both {}", path.best_effort_path_display()))]
    SameDirectoryError { path: PathBuf },
    #[snafu(display(
        "{} lies inside {}",
        inner.best_effort_path_display(),
        outer.best_effort_path_display()
    ))]
    NestedDirectoryError { outer: PathBuf, inner: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn runtime_config(source: &Path, destination: &Path) -> RuntimeConfig {
        RuntimeConfig {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            config: None,
            once: false,
            quiet: false,
            compare: None,
        }
    }

    #[test]
    fn distinct_directories_are_accepted() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(dir.path().join("a")).expect("Failed to create directory");
        fs::create_dir(dir.path().join("b")).expect("Failed to create directory");

        let roots = runtime_config(&dir.path().join("a"), &dir.path().join("b/../b"))
            .resolve_roots()
            .expect("Directories should be valid");

        assert!(roots.source.ends_with("a"));
        assert!(roots.destination.ends_with("b"));
        assert!(roots.destination.is_absolute());
    }

    #[rstest]
    #[case("a", "missing")]
    #[case("a", "file")]
    #[case("a", "a/.")]
    #[case("a", "a/inner")]
    #[case("a/inner", "a")]
    fn invalid_pairs_are_rejected(#[case] source: &str, #[case] destination: &str) {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(dir.path().join("a/inner")).expect("Failed to create directories");
        fs::write(dir.path().join("file"), "").expect("Failed to write file");

        let result =
            runtime_config(&dir.path().join(source), &dir.path().join(destination)).resolve_roots();

        assert!(result.is_err());
    }

    #[test]
    fn command_line_compare_wins_over_file() {
        let mut config = runtime_config(Path::new("a"), Path::new("b"));
        let file_config = MirrorConfig {
            compare: Some(CompareMode::Content),
            ignore: vec![".git".to_string()],
        };

        let options = config.mirror_options(file_config.clone());
        assert_eq!(options.compare, CompareMode::Content);
        assert!(options.ignore.is_ignored(".git".as_ref()));

        config.compare = Some(CompareMode::Metadata);
        assert_eq!(config.mirror_options(file_config).compare, CompareMode::Metadata);
    }
}
