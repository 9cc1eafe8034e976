//! HTTP transport and route sets.
//!
//! # Data Flow
//! ```text
//! TCP connection (listener bound during bootstrap)
//!     → server.rs (Axum, request id, timeout, trace layers)
//!     → dispatch: buffer body → RouteTable::resolve → handler
//!     → handlers.rs / offline.rs (what is registered)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - One fallback route; the gateway's own route table does the matching
//! - Handler panics are contained per request

pub mod handlers;
pub mod offline;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::HttpServer;
