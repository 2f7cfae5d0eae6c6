use std::path::Path;

use colored::Colorize;

use crate::filesystem::EntryKind;

/// Echoes every change applied to the destination as one itemized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeReporter {
    enabled: bool,
}

impl ChangeReporter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn silent() -> Self {
        Self::new(false)
    }

    pub fn created(&self, path: &Path, kind: EntryKind) {
        if self.enabled {
            let suffix = if kind == EntryKind::Directory { "/" } else { "" };
            println!("{}", format!("+ {}{suffix}", path.display()).green());
        }
    }

    pub fn removed(&self, path: &Path) {
        if self.enabled {
            println!("{}", format!("- {}", path.display()).red());
        }
    }

    pub fn updated(&self, path: &Path) {
        if self.enabled {
            println!("{}", format!("~ {}", path.display()).yellow());
        }
    }

    pub fn linked(&self, path: &Path, target: &Path) {
        if self.enabled {
            println!(
                "{}",
                format!("= {} => {}", path.display(), target.display()).cyan()
            );
        }
    }

    pub fn renamed(&self, from: &Path, to: &Path) {
        if self.enabled {
            println!(
                "{}",
                format!("> {} -> {}", from.display(), to.display()).blue()
            );
        }
    }
}

impl Default for ChangeReporter {
    fn default() -> Self {
        Self::new(true)
    }
}
