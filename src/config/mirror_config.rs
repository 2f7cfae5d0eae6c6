use compio::{fs::File, io::AsyncReadExt, io::BufReader};
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use std::{borrow::Cow, io::Cursor, path::Path};
use tracing::debug;

use crate::{ext::BestEffortPathExt, filesystem::CompareMode};

/// Settings read from the optional YAML config file. Anything left out
/// falls back to the command line or the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    pub compare: Option<CompareMode>,
    pub ignore: Vec<String>,
}

const KNOWN_KEYS: [&str; 2] = ["compare", "ignore"];

fn key(name: &str) -> Yaml<'_> {
    Yaml::Value(Scalar::String(Cow::Borrowed(name)))
}

impl MirrorConfig {
    pub async fn from_path(path: &Path) -> Result<Self, MirrorConfigError> {
        debug!("Opening config file: {}", path.best_effort_path_display());
        let file = File::open(path).await.context(ReadSnafu {
            file_path: path.best_effort_path_display(),
        })?;

        let cursor = Cursor::new(file);
        let mut reader = BufReader::new(cursor);
        let res = reader.read_to_string(String::new()).await;
        match res.0 {
            Ok(n) => debug!("Successfully read config file: {n} bytes"),
            _ => {
                res.0.context(ReadSnafu {
                    file_path: path.best_effort_path_display(),
                })?;
            }
        }
        res.1.as_str().try_into()
    }

    fn parse_compare(
        top_level: &LinkedHashMap<Yaml, Yaml>,
    ) -> Result<Option<CompareMode>, MirrorConfigError> {
        let Some(value) = top_level.get(&key("compare")) else {
            return Ok(None);
        };
        let name = value.as_str().ok_or(MirrorConfigError::CompareNotString)?;

        CompareMode::from_name(name)
            .map(Some)
            .context(InvalidCompareSnafu { value: name })
    }

    fn parse_ignore(top_level: &LinkedHashMap<Yaml, Yaml>) -> Result<Vec<String>, MirrorConfigError> {
        let Some(value) = top_level.get(&key("ignore")) else {
            return Ok(Vec::new());
        };

        let names = value
            .as_sequence()
            .ok_or(MirrorConfigError::IgnoreNotList)?
            .iter()
            .filter_map(|item| {
                let name = item.as_str();
                if name.is_none() {
                    debug!("Skipping non-string ignore entry: {:?}", item);
                }
                name.map(str::to_string)
            })
            .collect();

        Ok(names)
    }
}

impl TryFrom<&str> for MirrorConfig {
    type Error = MirrorConfigError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let contents_vec =
            Yaml::load_from_str(contents).map_err(|e| MirrorConfigError::ParseError { source: e })?;
        let contents = contents_vec
            .first()
            .ok_or(MirrorConfigError::MalformedConfig)?;

        let top_level = contents
            .as_mapping()
            .ok_or(MirrorConfigError::TopLevelNotMap)?;
        for entry_key in top_level.keys() {
            if !KNOWN_KEYS.iter().any(|known| entry_key.as_str() == Some(*known)) {
                debug!("Skipping unknown config entry: {:?}", entry_key);
            }
        }

        Ok(MirrorConfig {
            compare: Self::parse_compare(top_level)?,
            ignore: Self::parse_ignore(top_level)?,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum MirrorConfigError {
    #[snafu(display("Failed to read the config file: {}", file_path))]
    ReadError {
        file_path: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Improperly formatted config file"))]
    MalformedConfig,
    #[snafu(display("Top level of config should be a map"))]
    TopLevelNotMap,
    #[snafu(display("The compare setting should be a string"))]
    CompareNotString,
    #[snafu(display("Unknown compare mode '{}', expected 'metadata' or 'content'", value))]
    InvalidCompare { value: String },
    #[snafu(display("The ignore section should be a list of names"))]
    IgnoreNotList,
}
