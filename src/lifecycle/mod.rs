//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs, driven by system.rs):
//!     Options → Daemonize → Environment → Limits → Working dir
//!         → Crypto → Security modules → Handlers → Drop privilege → Start
//!
//! Signals (signals.rs, main thread):
//!     SIGCHLD → SessionManager reaps children
//!     SIGINT/SIGQUIT/SIGTERM → cleanup → re-raise with default action
//!
//! Shutdown (shutdown.rs):
//!     Stop notification → transport and scheduled commands exit
//! ```
//!
//! # Design Decisions
//! - Startup phases run in a fixed order; a failing phase aborts the rest
//! - Process-wide state (fork, uid, rlimits) changes while single-threaded
//! - Signals are blocked before the runtime exists so only the main thread
//!   receives them
//! - Termination does not drain in-flight requests

pub mod environment;
pub mod posix;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod system;

pub use shutdown::Shutdown;
pub use startup::{BootstrapOutcome, LifecycleController};
pub use system::{GatewayStopped, RunningGateway, SystemBootstrap};
