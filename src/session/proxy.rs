//! Forwarding to per-user backend sessions.
//!
//! # Responsibilities
//! - Pick the session for the caller (identity, else the configured default user)
//! - Rewrite the request for the session address and forward it
//! - Wait for freshly launched sessions to start listening
//! - Map failures to RPC-style JSON errors or plain gateway errors
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped; `X-Gateway-User` tells the session who
//!   the gateway authenticated
//! - Only connection failures are retried; any HTTP response from the
//!   session is passed through unchanged

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request, Uri};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::auth::Identity;
use crate::handler::builtin::{json_error_response, text_response};
use crate::handler::{AsyncHandler, HttpRequest, HttpResponse};
use crate::resilience::backoff::RetrySchedule;
use crate::session::{SessionError, SessionManager};

pub const GATEWAY_USER_HEADER: &str = "x-gateway-user";

const RETRY_BASE: Duration = Duration::from_millis(50);
const RETRY_CAP: Duration = Duration::from_secs(1);

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Forwards requests to the caller's backend session.
pub struct SessionProxy {
    client: Client<HttpConnector, Body>,
    sessions: Arc<SessionManager>,
    startup_timeout: Duration,
    default_user: Option<String>,
}

impl SessionProxy {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        let config = sessions.config();
        let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
        let default_user = config.default_user.clone();
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            sessions,
            startup_timeout,
            default_user,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    fn session_user(&self, request: &HttpRequest) -> Result<String, SessionError> {
        request
            .extensions()
            .get::<Identity>()
            .map(|i| i.username.clone())
            .or_else(|| self.default_user.clone())
            .ok_or(SessionError::NoUser)
    }

    /// Forward `request` to the caller's session.
    pub async fn forward(&self, request: HttpRequest) -> Result<HttpResponse, SessionError> {
        let user = self.session_user(&request)?;
        let address = self.sessions.launch(&user)?;

        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let uri: Uri = format!("http://{}{}", address, path_and_query)
            .parse()
            .map_err(|_| SessionError::InvalidAddress(address.to_string()))?;

        let mut headers = parts.headers.clone();
        for name in HOP_BY_HOP.iter() {
            headers.remove(name);
        }
        let user_value = HeaderValue::from_str(&user).map_err(|_| SessionError::Forward("invalid user name".into()))?;
        headers.insert(GATEWAY_USER_HEADER, user_value);

        let mut retry = RetrySchedule::new(RETRY_BASE, RETRY_CAP, self.startup_timeout);
        loop {
            let mut forwarded = Request::builder()
                .method(parts.method.clone())
                .uri(uri.clone())
                .body(Body::from(body.clone()))
                .map_err(|e| SessionError::Forward(e.to_string()))?;
            *forwarded.headers_mut() = headers.clone();

            match self.client.request(forwarded).await {
                Ok(response) => {
                    tracing::debug!(user = %user, address = %address, status = %response.status(), retries = retry.attempts(), "Forwarded to session");
                    let (parts, body) = response.into_parts();
                    return Ok(HttpResponse::from_parts(parts, Body::new(body)));
                }
                Err(e) if e.is_connect() => match retry.next_delay() {
                    Some(delay) => {
                        tracing::debug!(user = %user, address = %address, attempt = retry.attempts(), delay = ?delay, "Session not listening yet");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(user = %user, address = %address, attempts = retry.attempts(), "Session did not start in time");
                        return Err(SessionError::Unavailable {
                            user,
                            address: address.to_string(),
                        });
                    }
                },
                Err(e) => {
                    tracing::error!(user = %user, address = %address, error = %e, "Session request failed");
                    return Err(SessionError::Forward(e.to_string()));
                }
            }
        }
    }

    /// Handler for JSON-RPC endpoints. Failures are reported as RPC errors.
    pub fn rpc_handler(self: &Arc<Self>) -> AsyncHandler {
        let proxy = self.clone();
        Arc::new(move |request: HttpRequest| -> BoxFuture<'static, HttpResponse> {
            let proxy = proxy.clone();
            Box::pin(async move {
                match proxy.forward(request).await {
                    Ok(response) => response,
                    Err(e) => json_error_response(e.status(), &e.to_string()),
                }
            })
        })
    }

    /// Handler for content endpoints. Failures are reported as gateway errors.
    pub fn content_handler(self: &Arc<Self>) -> AsyncHandler {
        let proxy = self.clone();
        Arc::new(move |request: HttpRequest| -> BoxFuture<'static, HttpResponse> {
            let proxy = proxy.clone();
            Box::pin(async move {
                match proxy.forward(request).await {
                    Ok(response) => response,
                    Err(e) => text_response(e.status(), e.to_string()),
                }
            })
        })
    }
}

impl std::fmt::Debug for SessionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProxy")
            .field("startup_timeout", &self.startup_timeout)
            .field("default_user", &self.default_user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StaticSession;
    use crate::config::SessionConfig;
    use crate::lifecycle::environment::DetectedEnvironment;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot backend echoing the gateway user header in its body.
    async fn echo_user_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let text = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
                let user = text
                    .lines()
                    .find_map(|l| l.strip_prefix("x-gateway-user: "))
                    .unwrap_or("")
                    .trim()
                    .to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    user.len(),
                    user
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        address
    }

    fn proxy(static_sessions: Vec<StaticSession>, startup_timeout_secs: u64) -> Arc<SessionProxy> {
        let config = SessionConfig {
            static_sessions,
            startup_timeout_secs,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(config, DetectedEnvironment::default()).unwrap();
        Arc::new(SessionProxy::new(Arc::new(manager)))
    }

    fn request_as(user: &str) -> HttpRequest {
        let mut request = axum::http::Request::builder()
            .method("POST")
            .uri("/rpc/console_input")
            .body(Bytes::from_static(b"{}"))
            .unwrap();
        request.extensions_mut().insert(Identity::new(user));
        request
    }

    #[tokio::test]
    async fn test_forwards_with_gateway_user() {
        let address = echo_user_backend().await;
        let proxy = proxy(vec![StaticSession { user: "alice".into(), address }], 5);

        let response = proxy.rpc_handler()(request_as("alice")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn test_rpc_error_is_json() {
        let proxy = proxy(Vec::new(), 1);
        let response = proxy.rpc_handler()(request_as("nobody")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_unreachable_session_is_bad_gateway() {
        // Bind then drop to get a port nothing listens on.
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let proxy = proxy(vec![StaticSession { user: "bob".into(), address }], 0);

        let response = proxy.content_handler()(request_as("bob")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
