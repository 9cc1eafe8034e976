//! Adapters between handler shapes.
//!
//! # Responsibilities
//! - Run a synchronous handler inside the asynchronous pipeline
//! - Put an identity check in front of any handler
//!
//! # Design Decisions
//! - Adaptation is pure composition and cannot fail; failures show up as
//!   HTTP responses when the composed handler runs
//! - The secured adapter reads the auth registry per request, so the
//!   optional-auth flag follows the live provider registration

use std::future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::auth::{AuthError, AuthRegistry};
use crate::handler::builtin::text_response;
use crate::handler::{AsyncHandler, HttpRequest, HttpResponse, SyncHandler};

/// Run `handler` to completion and hand back its response without suspending.
///
/// The wrapped handler occupies a transport worker for its whole run. Only
/// wrap handlers that do bounded local work (reading a file, rendering a
/// template); anything that waits on the network must be an [`AsyncHandler`].
pub fn blocking_to_async(handler: SyncHandler) -> AsyncHandler {
    Arc::new(move |request: HttpRequest| -> BoxFuture<'static, HttpResponse> {
        let mut response = HttpResponse::new(Body::empty());
        handler(&request, &mut response);
        Box::pin(future::ready(response))
    })
}

/// Resolve the caller before running `handler`.
///
/// On success the [`Identity`](crate::auth::Identity) is inserted into the
/// request extensions. On failure the provider's challenge is returned and
/// `handler` is never called. With `optional_auth` set and no provider
/// registered at the time of the request, `handler` runs anonymously.
pub fn to_secured(handler: AsyncHandler, auth: Arc<AuthRegistry>, optional_auth: bool) -> AsyncHandler {
    Arc::new(move |mut request: HttpRequest| -> BoxFuture<'static, HttpResponse> {
        let handler = handler.clone();
        let auth = auth.clone();
        Box::pin(async move {
            let Some(provider) = auth.provider() else {
                if optional_auth {
                    return handler(request).await;
                }
                tracing::error!(
                    path = %request.uri().path(),
                    "Secured route requested but no authentication provider is registered"
                );
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, AuthError::NoProvider.to_string());
            };

            let resolved = provider.resolve(&request).await;
            match resolved {
                Ok(identity) => {
                    tracing::trace!(user = %identity.username, path = %request.uri().path(), "Caller resolved");
                    request.extensions_mut().insert(identity);
                    handler(request).await
                }
                Err(error) => {
                    tracing::debug!(
                        provider = provider.name(),
                        path = %request.uri().path(),
                        error = %error,
                        "Authentication failed"
                    );
                    provider.challenge(&request, &error)
                }
            }
        })
    })
}

/// A blocking handler behind an identity check. Used for pages that are
/// served from disk but still need a signed-in user.
pub fn compose_secured_blocking(handler: SyncHandler, auth: Arc<AuthRegistry>, optional_auth: bool) -> AsyncHandler {
    to_secured(blocking_to_async(handler), auth, optional_auth)
}
