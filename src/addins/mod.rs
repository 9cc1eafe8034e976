//! Addins: optional feature modules initialised after the gateway routes.
//!
//! # Responsibilities
//! - Mount extra static directories from `[[addins]]`
//! - Register the trusted-header provider in header mode
//!
//! # Design Decisions
//! - Skipped entirely in offline mode
//! - Runs before the local authenticator, which is only installed when no
//!   addin registered a provider

use axum::http::HeaderName;

use crate::auth::header::HeaderAuthProvider;
use crate::config::AuthMode;
use crate::context::GatewayContext;
use crate::handler::files::file_handler;
use crate::routing::RouteError;

#[derive(Debug, thiserror::Error)]
pub enum AddinError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("invalid trusted header name '{0}'")]
    InvalidHeader(String),
}

pub fn initialize(context: &mut GatewayContext) -> Result<(), AddinError> {
    let config = context.config().clone();

    for addin in &config.addins {
        if !addin.directory.is_dir() {
            tracing::warn!(prefix = %addin.prefix, directory = %addin.directory.display(), "Addin directory missing");
        }
        // Local file reads only; blocking is acceptable.
        let handler = file_handler(addin.directory.clone(), addin.prefix.clone(), None);
        if addin.secure {
            context.add_secure_blocking(&addin.prefix, handler, addin.optional_auth)?;
        } else {
            context.add_blocking(&addin.prefix, handler)?;
        }
        tracing::info!(prefix = %addin.prefix, secure = addin.secure, "Addin mounted");
    }

    if config.auth.mode == AuthMode::Header {
        let name = config.auth.trusted_header.trim().to_ascii_lowercase();
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| AddinError::InvalidHeader(name.clone()))?;
        context
            .auth()
            .register(Box::new(HeaderAuthProvider::new(header, config.auth.trusted_proxies.clone())));
    }
    Ok(())
}
