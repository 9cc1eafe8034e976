//! Per-user backend sessions.
//!
//! # Data Flow
//! ```text
//! Secured request (Identity in extensions)
//!     → proxy.rs: SessionProxy::forward
//!     → manager.rs: SessionManager::launch(user) (existing, static or new child)
//!     → hyper client → backend session → response
//!
//! SIGCHLD (signal thread)
//!     → SessionManager::notify_sigchld
//!     → waitpid(pid, WNOHANG) per tracked child → forget exited sessions
//! ```
//!
//! # Design Decisions
//! - Children are reaped per tracked pid; processes the gateway did not
//!   launch are never waited on
//! - A freshly launched session may not be listening yet; the proxy retries
//!   connection failures with backoff until the startup timeout
//! - Sessions run with the gateway's detected environment plus the user and
//!   port they serve

pub mod manager;
pub mod proxy;

pub use manager::SessionManager;
pub use proxy::SessionProxy;

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session program is configured")]
    NoProgram,
    #[error("no user to run the session for")]
    NoUser,
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session address '{0}'")]
    InvalidAddress(String),
    #[error("session port range exhausted")]
    PortsExhausted,
    #[error("session for {user} at {address} is not reachable")]
    Unavailable { user: String, address: String },
    #[error("forwarding to session failed: {0}")]
    Forward(String),
}

impl SessionError {
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::NoProgram | SessionError::NoUser | SessionError::PortsExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SessionError::Unavailable { .. } | SessionError::Forward(_) => StatusCode::BAD_GATEWAY,
            SessionError::Spawn { .. } | SessionError::InvalidAddress(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
