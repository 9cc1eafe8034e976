//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use session_gateway::auth::secure_cookie::SecureCookie;
use session_gateway::config::GatewayConfig;
use session_gateway::lifecycle::environment::DetectedEnvironment;
use session_gateway::session::SessionManager;
use session_gateway::{GatewayContext, HttpServer, Shutdown};

/// Header the gateway uses to tell a session who the caller is.
const USER_HEADER: &str = "x-gateway-user:";

/// Start a mock session backend. Every response body is
/// `"<name> user=<x-gateway-user> path=<path>"`.
pub async fn start_session_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buffer).into_owned();
                let path = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("")
                    .to_string();
                let user = head
                    .lines()
                    .find(|line| line.to_ascii_lowercase().starts_with(USER_HEADER))
                    .map(|line| line[USER_HEADER.len()..].trim().to_string())
                    .unwrap_or_default();

                let body = format!("{} user={} path={}", name, user, path);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A context over `config` with a throwaway cookie key.
pub fn context(config: GatewayConfig) -> GatewayContext {
    let config = Arc::new(config);
    let cookie = Arc::new(SecureCookie::from_key(vec![42u8; 32], Duration::from_secs(3600)));
    let sessions = Arc::new(SessionManager::new(config.session.clone(), DetectedEnvironment::default()).unwrap());
    GatewayContext::new(config, cookie, sessions)
}

/// Serve `context` on an ephemeral port.
pub async fn start_gateway(context: GatewayContext) -> (SocketAddr, Arc<GatewayContext>, Shutdown) {
    let listener = HttpServer::bind("127.0.0.1", 0).unwrap();
    let addr = listener.local_addr().unwrap();
    let (context, commands) = context.freeze();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(context.clone());
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });
    commands.spawn_all(&shutdown);

    (addr, context, shutdown)
}
