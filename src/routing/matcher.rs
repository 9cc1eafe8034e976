//! Path prefix matching.
//!
//! # Responsibilities
//! - Validate route prefixes at registration
//! - Match request paths against a prefix
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Raw string prefix: "/file" also matches "/file_show"; the longer
//!   registered prefix wins at resolution
//! - No regex to guarantee O(n) matching

use std::fmt;

use crate::routing::router::RouteError;

/// A validated URI path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathPrefix(String);

impl PathPrefix {
    /// Create a prefix. It must be non-empty and start with '/'.
    pub fn new(prefix: impl Into<String>) -> Result<Self, RouteError> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(RouteError::InvalidPrefix(prefix));
        }
        Ok(Self(prefix))
    }

    /// True if `path` starts with this prefix.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.0)
    }

    /// Specificity of the prefix; longer wins.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
