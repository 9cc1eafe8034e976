//! Handler set used while the gateway is in offline mode.

use axum::http::StatusCode;

use crate::context::GatewayContext;
use crate::handler::builtin::{json_error_response, respond};
use crate::handler::{async_handler, sync_handler, HttpRequest};
use crate::http::handlers::RPC_PREFIXES;
use crate::routing::RouteError;

const OFFLINE_MESSAGE: &str = "The service is temporarily offline for maintenance.";

const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Offline</title></head><body>\n\
<h1>Temporarily offline</h1>\n\
<p>The service is temporarily offline for maintenance. Please try again later.</p>\n\
</body></html>\n";

/// Answer every request with 503: RPC endpoints with a JSON error, the rest
/// with the offline page.
pub fn register(context: &mut GatewayContext) -> Result<(), RouteError> {
    for prefix in RPC_PREFIXES {
        context.add(
            prefix,
            async_handler(|_request: HttpRequest| async move {
                json_error_response(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_MESSAGE)
            }),
        )?;
    }
    context.set_blocking_default(sync_handler(|_request, response| {
        respond(response, StatusCode::SERVICE_UNAVAILABLE, "text/html; charset=utf-8", OFFLINE_PAGE);
    }))?;
    tracing::warn!("Offline mode: only the maintenance handlers are registered");
    Ok(())
}
