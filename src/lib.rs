//! Session gateway library.

pub mod addins;
pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod scheduler;
pub mod session;

pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
