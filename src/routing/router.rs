//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store registered route entries
//! - Look up the entry for a request path
//! - Fall back to the single default entry
//!
//! # Design Decisions
//! - Immutable after bootstrap (thread-safe without locks)
//! - O(n) prefix scan (acceptable for typical route counts)
//! - Longest prefix wins; registration order never affects dispatch
//! - Explicit NoHandler when nothing matches and no default exists

use std::fmt;

use crate::handler::{AsyncHandler, HandlerKind};
use crate::routing::matcher::PathPrefix;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("a handler is already registered for prefix '{0}'")]
    DuplicatePrefix(String),
    #[error("a default handler is already set")]
    DefaultAlreadySet,
    #[error("no handler for path '{0}'")]
    NoHandler(String),
    #[error("invalid route prefix '{0}' (must start with '/')")]
    InvalidPrefix(String),
}

/// A registered handler and how it runs.
#[derive(Clone)]
pub struct RouteEntry {
    prefix: Option<PathPrefix>,
    kind: HandlerKind,
    optional_auth: bool,
    handler: AsyncHandler,
}

impl RouteEntry {
    /// An entry for `prefix`.
    pub fn new(prefix: PathPrefix, kind: HandlerKind, optional_auth: bool, handler: AsyncHandler) -> Self {
        Self {
            prefix: Some(prefix),
            kind,
            optional_auth,
            handler,
        }
    }

    /// The catch-all entry.
    pub fn default_route(kind: HandlerKind, optional_auth: bool, handler: AsyncHandler) -> Self {
        Self {
            prefix: None,
            kind,
            optional_auth,
            handler,
        }
    }

    /// `None` for the default entry.
    pub fn prefix(&self) -> Option<&PathPrefix> {
        self.prefix.as_ref()
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Authentication is only demanded while a provider is registered.
    pub fn optional_auth(&self) -> bool {
        self.optional_auth
    }

    pub fn handler(&self) -> &AsyncHandler {
        &self.handler
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &str {
        self.prefix.as_ref().map(PathPrefix::as_str).unwrap_or("default")
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("prefix", &self.label())
            .field("kind", &self.kind)
            .field("optional_auth", &self.optional_auth)
            .finish()
    }
}

/// Prefix-to-handler table.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// Entries ordered by descending prefix length.
    entries: Vec<RouteEntry>,
    default: Option<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Fails if its prefix is already registered.
    pub fn register(&mut self, entry: RouteEntry) -> Result<(), RouteError> {
        let Some(prefix) = entry.prefix() else {
            return self.set_default(entry);
        };
        if self.entries.iter().any(|e| e.prefix() == Some(prefix)) {
            return Err(RouteError::DuplicatePrefix(prefix.to_string()));
        }

        tracing::debug!(prefix = %prefix, kind = %entry.kind(), optional_auth = entry.optional_auth(), "Route registered");

        let len = prefix.len();
        let position = self
            .entries
            .iter()
            .position(|e| e.prefix().map(PathPrefix::len).unwrap_or(0) < len)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
        Ok(())
    }

    /// Set the catch-all entry. Fails if one is already set.
    pub fn set_default(&mut self, entry: RouteEntry) -> Result<(), RouteError> {
        if self.default.is_some() {
            return Err(RouteError::DefaultAlreadySet);
        }
        tracing::debug!(kind = %entry.kind(), "Default route registered");
        self.default = Some(RouteEntry { prefix: None, ..entry });
        Ok(())
    }

    /// Longest registered prefix of `path`, else the default entry.
    pub fn resolve(&self, path: &str) -> Result<&RouteEntry, RouteError> {
        self.entries
            .iter()
            .find(|e| e.prefix().map(|p| p.matches(path)).unwrap_or(false))
            .or(self.default.as_ref())
            .ok_or_else(|| RouteError::NoHandler(path.to_string()))
    }

    /// Registered prefixes, longest first.
    pub fn prefixes(&self) -> impl Iterator<Item = &PathPrefix> {
        self.entries.iter().filter_map(RouteEntry::prefix)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
