//! Fallback local credential authenticator.
//!
//! Used when no other provider registered itself during bootstrap. Users sign
//! in with a form checked against configured SHA-256 password hashes and are
//! then identified by the secure cookie.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::auth::secure_cookie::SecureCookie;
use crate::auth::{default_challenge, wants_html, AuthError, AuthProvider, Identity};
use crate::config::schema::UserCredential;
use crate::context::GatewayContext;
use crate::handler::builtin::{html_escape, redirect, respond};
use crate::handler::{sync_handler, HttpRequest, HttpResponse, SyncHandler};
use crate::routing::RouteError;

pub const SIGN_IN_URI: &str = "/auth-sign-in";
pub const DO_SIGN_IN_URI: &str = "/auth-do-sign-in";
pub const SIGN_OUT_URI: &str = "/auth-sign-out";

/// Accepted usernames and password digests.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, Vec<u8>>,
}

impl CredentialStore {
    pub fn from_config(users: &[UserCredential]) -> Self {
        let users = users
            .iter()
            .filter_map(|u| match hex::decode(&u.password_sha256) {
                Ok(digest) => Some((u.name.clone(), digest)),
                Err(_) => {
                    tracing::warn!(user = %u.name, "Ignoring user with malformed password hash");
                    None
                }
            })
            .collect();
        Self { users }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn validate(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => Sha256::digest(password.as_bytes()).as_slice() == expected.as_slice(),
            None => false,
        }
    }
}

/// Cookie-based provider backed by a [`CredentialStore`].
pub struct LocalAuthProvider {
    cookie: Arc<SecureCookie>,
    credentials: Arc<CredentialStore>,
}

impl LocalAuthProvider {
    pub fn new(cookie: Arc<SecureCookie>, credentials: Arc<CredentialStore>) -> Self {
        Self { cookie, credentials }
    }

    fn resolve_now(&self, request: &HttpRequest) -> Result<Identity, AuthError> {
        let username = self.cookie.read_user(request)?;
        if !self.credentials.contains(&username) {
            return Err(AuthError::Forbidden(format!("user '{}' is no longer permitted", username)));
        }
        Ok(Identity::new(username))
    }
}

impl AuthProvider for LocalAuthProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn resolve<'a>(&'a self, request: &'a HttpRequest) -> BoxFuture<'a, Result<Identity, AuthError>> {
        Box::pin(future::ready(self.resolve_now(request)))
    }

    fn challenge(&self, request: &HttpRequest, error: &AuthError) -> HttpResponse {
        if wants_html(request) && error.status() == StatusCode::UNAUTHORIZED {
            let mut response = HttpResponse::default();
            redirect(&mut response, &sign_in_location(request.uri().path()));
            response
        } else {
            default_challenge(request, error)
        }
    }

    fn main_page_filter(&self, request: &HttpRequest, response: &mut HttpResponse) -> bool {
        match self.resolve_now(request) {
            Ok(_) => true,
            Err(_) => {
                redirect(response, &sign_in_location(request.uri().path()));
                false
            }
        }
    }
}

fn sign_in_location(app_uri: &str) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("appUri", app_uri)
        .finish();
    format!("{}?{}", SIGN_IN_URI, query)
}

/// Only same-site absolute paths are followed after sign-in.
fn safe_app_uri(candidate: Option<&str>) -> &str {
    match candidate {
        Some(uri) if uri.starts_with('/') && !uri.starts_with("//") && !uri.contains('\\') => uri,
        _ => "/",
    }
}

fn query_param(request: &HttpRequest, name: &str) -> Option<String> {
    let query = request.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// The sign-in form.
pub fn sign_in_page_handler() -> SyncHandler {
    sync_handler(|request, response| {
        let app_uri = query_param(request, "appUri");
        let app_uri = safe_app_uri(app_uri.as_deref());
        let error = if query_param(request, "error").is_some() {
            "<p class=\"error\">Incorrect username or password.</p>"
        } else {
            ""
        };
        let page = format!(
            "<!DOCTYPE html>\n<html><head><title>Sign in</title></head><body>\n\
             {error}<form method=\"POST\" action=\"{action}\">\n\
             <input type=\"hidden\" name=\"appUri\" value=\"{app_uri}\"/>\n\
             <label>Username <input type=\"text\" name=\"username\"/></label>\n\
             <label>Password <input type=\"password\" name=\"password\"/></label>\n\
             <button type=\"submit\">Sign in</button>\n</form></body></html>\n",
            error = error,
            action = DO_SIGN_IN_URI,
            app_uri = html_escape(app_uri),
        );
        respond(response, StatusCode::OK, "text/html; charset=utf-8", page);
    })
}

/// Checks the posted form and sets the sign-in cookie.
pub fn do_sign_in_handler(cookie: Arc<SecureCookie>, credentials: Arc<CredentialStore>) -> SyncHandler {
    sync_handler(move |request, response| {
        let mut username = None;
        let mut password = None;
        let mut app_uri = None;
        for (key, value) in form_urlencoded::parse(request.body()) {
            match key.as_ref() {
                "username" => username = Some(value.into_owned()),
                "password" => password = Some(value.into_owned()),
                "appUri" => app_uri = Some(value.into_owned()),
                _ => {}
            }
        }
        let app_uri = safe_app_uri(app_uri.as_deref()).to_string();

        match (username, password) {
            (Some(username), Some(password)) if credentials.validate(&username, &password) => {
                tracing::info!(user = %username, "User signed in");
                redirect(response, &app_uri);
                if let Ok(value) = HeaderValue::from_str(&cookie.set_cookie(&username)) {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
            }
            (username, _) => {
                tracing::warn!(user = ?username, "Failed sign-in attempt");
                let query: String = form_urlencoded::Serializer::new(String::new())
                    .append_pair("error", "1")
                    .append_pair("appUri", &app_uri)
                    .finish();
                redirect(response, &format!("{}?{}", SIGN_IN_URI, query));
            }
        }
    })
}

/// Clears the sign-in cookie.
pub fn sign_out_handler() -> SyncHandler {
    sync_handler(|_request, response| {
        redirect(response, SIGN_IN_URI);
        if let Ok(value) = HeaderValue::from_str(&SecureCookie::clear_cookie()) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    })
}

/// Register the local provider and its sign-in routes.
pub fn initialize(context: &mut GatewayContext) -> Result<(), RouteError> {
    let credentials = Arc::new(CredentialStore::from_config(&context.config().auth.users));
    let cookie = context.secure_cookie().clone();

    if credentials.users.is_empty() {
        tracing::warn!("Local authentication enabled but no users are configured");
    }

    // Sign-in pages are rendered in memory; blocking is fine.
    context.add_blocking(SIGN_IN_URI, sign_in_page_handler())?;
    context.add_blocking(DO_SIGN_IN_URI, do_sign_in_handler(cookie.clone(), credentials.clone()))?;
    context.add_blocking(SIGN_OUT_URI, sign_out_handler())?;

    context
        .auth()
        .register(Box::new(LocalAuthProvider::new(cookie, credentials)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bytes::Bytes;
    use std::time::Duration;

    const ALICE_PASSWORD: &str = "wonderland";

    fn store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::from_config(&[UserCredential {
            name: "alice".into(),
            password_sha256: hex::encode(Sha256::digest(ALICE_PASSWORD.as_bytes())),
        }]))
    }

    fn cookie() -> Arc<SecureCookie> {
        Arc::new(SecureCookie::from_key(vec![3u8; 32], Duration::from_secs(600)))
    }

    fn post(body: &str) -> HttpRequest {
        axum::http::Request::builder()
            .method("POST")
            .uri(DO_SIGN_IN_URI)
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn run(handler: &SyncHandler, request: &HttpRequest) -> HttpResponse {
        let mut response = HttpResponse::new(Body::empty());
        handler(request, &mut response);
        response
    }

    #[test]
    fn test_credentials_validate() {
        let store = store();
        assert!(store.validate("alice", ALICE_PASSWORD));
        assert!(!store.validate("alice", "wrong"));
        assert!(!store.validate("bob", ALICE_PASSWORD));
    }

    #[test]
    fn test_sign_in_sets_cookie() {
        let cookie = cookie();
        let handler = do_sign_in_handler(cookie.clone(), store());
        let response = run(
            &handler,
            &post("username=alice&password=wonderland&appUri=%2Ffiles%2Fx"),
        );

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/files/x");
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        let value = set_cookie
            .strip_prefix("user-id=")
            .and_then(|v| v.split(';').next())
            .unwrap();
        assert_eq!(cookie.verify(value).unwrap(), "alice");
    }

    #[test]
    fn test_failed_sign_in_redirects_back() {
        let handler = do_sign_in_handler(cookie(), store());
        let response = run(&handler, &post("username=alice&password=nope&appUri=//evil.example"));

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/auth-sign-in?error=1"));
        assert!(location.ends_with("appUri=%2F"));
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_provider_resolves_cookie() {
        let cookie = cookie();
        let provider = LocalAuthProvider::new(cookie.clone(), store());

        let request = axum::http::Request::builder()
            .header(header::COOKIE, format!("user-id={}", cookie.sign("alice")))
            .body(Bytes::new())
            .unwrap();
        assert_eq!(provider.resolve(&request).await.unwrap(), Identity::new("alice"));

        let removed = axum::http::Request::builder()
            .header(header::COOKIE, format!("user-id={}", cookie.sign("mallory")))
            .body(Bytes::new())
            .unwrap();
        assert!(matches!(provider.resolve(&removed).await, Err(AuthError::Forbidden(_))));
    }

    #[test]
    fn test_challenge_redirects_page_loads() {
        let provider = LocalAuthProvider::new(cookie(), store());
        let page = axum::http::Request::builder()
            .uri("/files/report.html")
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .body(Bytes::new())
            .unwrap();
        let response = provider.challenge(&page, &AuthError::MissingCredentials);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/auth-sign-in?appUri=%2Ffiles%2Freport.html"
        );

        let rpc = axum::http::Request::builder()
            .method("POST")
            .uri("/rpc/execute")
            .body(Bytes::new())
            .unwrap();
        let response = provider.challenge(&rpc, &AuthError::MissingCredentials);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
