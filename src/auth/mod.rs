//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Secured route:
//!     request → AuthRegistry::provider()
//!             → provider.resolve(request) → Identity (request extension)
//!             → on failure: provider.challenge(request) (redirect / 401 / 403)
//!
//! Main page:
//!     request → browser::supported_browser_filter
//!             → provider.main_page_filter
//! ```
//!
//! # Design Decisions
//! - Exactly one provider is active; the registry is read on every request so
//!   routes follow the live registration rather than the registration-time one
//! - Providers register themselves during bootstrap (addins first, then the
//!   local fallback if nobody else did)

pub mod browser;
pub mod header;
pub mod local;
pub mod secure_cookie;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::http::{header as http_header, Method, StatusCode};
use futures_util::future::BoxFuture;

use crate::handler::builtin::{json_error_response, text_response};
use crate::handler::{HttpRequest, HttpResponse};

/// The caller a secured handler runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingCredentials,
    #[error("invalid or expired credentials")]
    InvalidCredentials,
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("no authentication provider is registered")]
    NoProvider,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::NoProvider => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An authentication provider.
pub trait AuthProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Resolve the caller of `request`.
    fn resolve<'a>(&'a self, request: &'a HttpRequest) -> BoxFuture<'a, Result<Identity, AuthError>>;

    /// Response sent instead of running a secured handler.
    fn challenge(&self, request: &HttpRequest, error: &AuthError) -> HttpResponse {
        default_challenge(request, error)
    }

    /// Checked before serving the main page. Returns false after writing
    /// its own response (typically a redirect to sign in).
    fn main_page_filter(&self, _request: &HttpRequest, _response: &mut HttpResponse) -> bool {
        true
    }
}

/// A registered provider.
pub type SharedProvider = Arc<Box<dyn AuthProvider>>;

/// Holds the active provider.
#[derive(Default)]
pub struct AuthRegistry {
    provider: ArcSwapOption<Box<dyn AuthProvider>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `provider` the active provider, replacing any previous one.
    pub fn register(&self, provider: Box<dyn AuthProvider>) {
        let name = provider.name();
        if let Some(previous) = self.provider.swap(Some(Arc::new(provider))) {
            tracing::warn!(previous = previous.name(), provider = name, "Replacing authentication provider");
        } else {
            tracing::info!(provider = name, "Authentication provider registered");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.provider.load().is_some()
    }

    pub fn provider(&self) -> Option<SharedProvider> {
        self.provider.load_full()
    }

    /// The provider's main page filter; passes when no provider is registered.
    pub fn main_page_filter(&self, request: &HttpRequest, response: &mut HttpResponse) -> bool {
        match self.provider() {
            Some(provider) => provider.main_page_filter(request, response),
            None => true,
        }
    }
}

impl std::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRegistry")
            .field("provider", &self.provider().map(|p| p.name()))
            .finish()
    }
}

/// True for page loads, where a redirect beats a bare status code.
pub fn wants_html(request: &HttpRequest) -> bool {
    request.method() == Method::GET
        && request
            .headers()
            .get(http_header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html"))
            .unwrap_or(false)
}

/// Status-code challenge: JSON for RPC-style callers, text otherwise.
pub fn default_challenge(request: &HttpRequest, error: &AuthError) -> HttpResponse {
    let accepts_json = request
        .headers()
        .get(http_header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if accepts_json {
        json_error_response(error.status(), &error.to_string())
    } else {
        text_response(error.status(), error.to_string())
    }
}
