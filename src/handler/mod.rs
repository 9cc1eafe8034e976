//! Request handler shapes and their adaptation.
//!
//! # Data Flow
//! ```text
//! Registration (bootstrap):
//!     SyncHandler  ──blocking_to_async──▶ AsyncHandler
//!     AsyncHandler ──to_secured─────────▶ AsyncHandler (identity checked first)
//!     SyncHandler  ──compose_secured_blocking──▶ AsyncHandler
//!     → RouteEntry { kind, optional_auth, handler }
//!
//! Dispatch (transport):
//!     HttpRequest → RouteEntry.handler(request).await → HttpResponse
//! ```
//!
//! # Design Decisions
//! - Every route is stored as one asynchronous shape; the kind is kept for
//!   logging and metrics only
//! - Adapters are plain closures over captured state, never fallible
//! - Request bodies are buffered by the transport, so blocking handlers can
//!   read them without suspending

pub mod adapt;
pub mod builtin;
pub mod files;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use futures_util::future::BoxFuture;

pub use adapt::{blocking_to_async, compose_secured_blocking, to_secured};

/// A request with its body already read into memory.
pub type HttpRequest = Request<Bytes>;

/// A response as produced by handlers.
pub type HttpResponse = Response<Body>;

/// A handler that fills in a response synchronously on the calling thread.
pub type SyncHandler = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

/// The one shape the transport engine understands.
pub type AsyncHandler = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

/// Peer address of the connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Execution shape of a registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    BlockingUnsecured,
    BlockingSecured,
    AsyncUnsecured,
    AsyncSecured,
}

impl HandlerKind {
    pub fn new(blocking: bool, secure: bool) -> Self {
        match (blocking, secure) {
            (true, false) => Self::BlockingUnsecured,
            (true, true) => Self::BlockingSecured,
            (false, false) => Self::AsyncUnsecured,
            (false, true) => Self::AsyncSecured,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::BlockingUnsecured | Self::BlockingSecured)
    }

    pub fn is_secured(&self) -> bool {
        matches!(self, Self::BlockingSecured | Self::AsyncSecured)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockingUnsecured => "blocking",
            Self::BlockingSecured => "blocking_secured",
            Self::AsyncUnsecured => "async",
            Self::AsyncSecured => "async_secured",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap a closure as a [`SyncHandler`].
pub fn sync_handler<F>(f: F) -> SyncHandler
where
    F: Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as an [`AsyncHandler`].
pub fn async_handler<F, Fut>(f: F) -> AsyncHandler
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |request: HttpRequest| -> BoxFuture<'static, HttpResponse> { Box::pin(f(request)) })
}
