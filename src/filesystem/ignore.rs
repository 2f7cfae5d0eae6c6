use std::collections::HashSet;
use std::ffi::{OsStr, OsString};

/// Base names that are never scanned, mirrored or acted upon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    names: HashSet<OsString>,
}

impl IgnoreList {
    pub fn is_ignored(&self, name: &OsStr) -> bool {
        self.names.contains(name)
    }
}

impl<S: Into<OsString>> FromIterator<S> for IgnoreList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}
