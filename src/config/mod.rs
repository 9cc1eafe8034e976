//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line (options.rs)
//!     → config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod options;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use options::{read_options, GatewayOptions, ProgramStatus};
pub use schema::{AuthMode, GatewayConfig, ServerConfig, SessionConfig};
