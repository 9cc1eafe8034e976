//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Request to a session that is still starting:
//!     → connect refused
//!     → backoff.rs (exponential delay with jitter)
//!     → retry until the session startup timeout
//! ```
//!
//! # Design Decisions
//! - Only connection failures are retried; a session that answered is final
//! - Jitter keeps concurrent first requests from retrying in lockstep

pub mod backoff;
