//! Trusted-header authentication.
//!
//! For deployments behind a fronting proxy that authenticates users itself
//! and forwards the username in a header. The header is only honoured on
//! connections from one of the configured proxy addresses.

use std::future;
use std::net::IpAddr;

use axum::http::HeaderName;
use futures_util::future::BoxFuture;

use crate::auth::{AuthError, AuthProvider, Identity};
use crate::handler::{ClientAddr, HttpRequest};

pub struct HeaderAuthProvider {
    header: HeaderName,
    trusted_proxies: Vec<IpAddr>,
}

impl HeaderAuthProvider {
    pub fn new(header: HeaderName, trusted_proxies: Vec<IpAddr>) -> Self {
        Self { header, trusted_proxies }
    }

    fn resolve_now(&self, request: &HttpRequest) -> Result<Identity, AuthError> {
        let peer = request.extensions().get::<ClientAddr>().map(|c| c.0.ip());
        match peer {
            Some(ip) if self.trusted_proxies.contains(&ip) => {}
            Some(ip) => {
                tracing::warn!(peer = %ip, header = %self.header, "Identity header from untrusted peer");
                return Err(AuthError::Forbidden(format!("{} is not a trusted proxy", ip)));
            }
            None => return Err(AuthError::Forbidden("unknown peer".into())),
        }

        let username = request
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        Ok(Identity::new(username))
    }
}

impl AuthProvider for HeaderAuthProvider {
    fn name(&self) -> &'static str {
        "header"
    }

    fn resolve<'a>(&'a self, request: &'a HttpRequest) -> BoxFuture<'a, Result<Identity, AuthError>> {
        Box::pin(future::ready(self.resolve_now(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn provider() -> HeaderAuthProvider {
        HeaderAuthProvider::new(
            HeaderName::from_static("x-remote-user"),
            vec![IpAddr::from([127, 0, 0, 1])],
        )
    }

    fn request(peer: &str, user: Option<&str>) -> HttpRequest {
        let mut builder = axum::http::Request::builder();
        if let Some(user) = user {
            builder = builder.header("X-Remote-User", user);
        }
        let mut request = builder.body(Bytes::new()).unwrap();
        request.extensions_mut().insert(ClientAddr(peer.parse().unwrap()));
        request
    }

    #[tokio::test]
    async fn test_trusted_peer_header_accepted() {
        let identity = provider().resolve(&request("127.0.0.1:5000", Some("carol"))).await;
        assert_eq!(identity, Ok(Identity::new("carol")));
    }

    #[tokio::test]
    async fn test_untrusted_peer_rejected() {
        let result = provider().resolve(&request("10.1.2.3:5000", Some("carol"))).await;
        assert!(matches!(result, Err(AuthError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let result = provider().resolve(&request("127.0.0.1:5000", None)).await;
        assert_eq!(result, Err(AuthError::MissingCredentials));
    }
}
