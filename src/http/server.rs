//! HTTP transport.
//!
//! # Responsibilities
//! - Bind the listening socket during bootstrap
//! - Buffer request bodies and dispatch to the route table
//! - Turn handler panics into 500 responses
//! - Wire up middleware (timeout, request id, tracing)
//! - Record request metrics

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::context::GatewayContext;
use crate::handler::builtin::text_response;
use crate::handler::{ClientAddr, HttpRequest};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::observability::metrics;

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    context: Arc<GatewayContext>,
}

impl HttpServer {
    /// Bind the listening socket. Runs before the runtime exists, so the
    /// socket is std and switched to non-blocking for later adoption.
    pub fn bind(address: &str, port: u16) -> io::Result<std::net::TcpListener> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid address '{}'", address)))?;
        let listener = std::net::TcpListener::bind(SocketAddr::new(ip, port))?;
        listener.set_nonblocking(true)?;
        tracing::info!(address = %listener.local_addr()?, "Listener bound");
        Ok(listener)
    }

    pub fn new(context: Arc<GatewayContext>) -> Self {
        let router = Self::build_router(context.clone());
        Self { router, context }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(context: Arc<GatewayContext>) -> Router {
        let request_secs = context.config().timeouts.request_secs;
        Router::new()
            .fallback(dispatch)
            .with_state(context)
            .layer(propagate_request_id_layer())
            .layer(TimeoutLayer::new(Duration::from_secs(request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    /// Serve on `listener` until `stop` fires.
    pub async fn run(self, listener: std::net::TcpListener, mut stop: broadcast::Receiver<()>) -> io::Result<()> {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.context.routes().len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve the route for a request and run its handler.
async fn dispatch(State(context): State<Arc<GatewayContext>>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (mut parts, body) = request.into_parts();
    let limit = context.config().server.max_body_size;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(method = %method, path = %path, limit, error = %e, "Request body rejected");
            metrics::record_request(&method, 413, "none", start);
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };
    if let Some(peer) = peer {
        parts.extensions.insert(ClientAddr(peer));
    }
    let request: HttpRequest = Request::from_parts(parts, body);

    let entry = match context.routes().resolve(&path) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(request_id = %request_id(&request), path = %path, error = %e, "No route matched");
            metrics::record_request(&method, 404, "none", start);
            return text_response(StatusCode::NOT_FOUND, "no handler for path");
        }
    };
    let label = entry.label().to_string();
    let handler = entry.handler().clone();
    let id = request_id(&request).to_string();

    tracing::debug!(request_id = %id, method = %method, path = %path, route = %label, kind = %entry.kind(), "Dispatching request");

    // Blocking handlers run inside the call itself, before any future exists.
    let response = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(request))) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };
    let response = match response {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(request_id = %id, path = %path, route = %label, "Handler panicked");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &label, start);
    response
}
