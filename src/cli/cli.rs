use std::path::PathBuf;

use clap::Parser;

use crate::application::data::LogLevel;
use crate::filesystem::CompareMode;

/// Mirrors SOURCE into DESTINATION, then keeps it in sync as SOURCE changes.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// Directory to mirror
    pub source: PathBuf,
    /// Directory made identical to the source
    pub destination: PathBuf,

    #[clap(long, short, default_value = "warn", value_enum)]
    pub log_level: LogLevel,

    /// YAML file with compare mode and ignored names
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Exit after the initial reconciliation instead of watching
    #[clap(long)]
    pub once: bool,

    /// Do not print the changes applied to the destination
    #[clap(long, short)]
    pub quiet: bool,

    /// How to decide whether a mirrored file is up to date
    #[clap(long, value_enum)]
    pub compare: Option<CompareMode>,
}
