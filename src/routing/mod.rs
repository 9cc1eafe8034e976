//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate prefix)
//!     → Return: matched RouteEntry, the default entry, or NoHandler
//!
//! Route registration (at startup):
//!     handler + kind → adapted AsyncHandler
//!     → RouteEntry
//!     → RouteTable (ordered by prefix length)
//!     → Frozen inside the gateway context
//! ```
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - Longest prefix wins

pub mod matcher;
pub mod router;

pub use matcher::PathPrefix;
pub use router::{RouteEntry, RouteError, RouteTable};
