//! The gateway's route set.
//!
//! Session traffic is proxied asynchronously. Static files, templates and
//! the client log sink are blocking handlers: each reads local files or
//! memory only and holds its worker for that short read.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::browser::{supported_browser_filter, unsupported_browser_handler, BROWSER_UNSUPPORTED_URI};
use crate::context::GatewayContext;
use crate::handler::builtin::{log_request_handler, not_found_handler};
use crate::handler::files::{file_handler, template_handler, RequestFilter};
use crate::routing::RouteError;
use crate::scheduler::PeriodicCommand;

/// JSON-RPC endpoints; a session failure becomes an RPC error.
pub const RPC_PREFIXES: [&str; 2] = ["/rpc", "/events"];

/// Session content that always requires a signed-in user.
pub const SECURE_CONTENT_PREFIXES: [&str; 10] = [
    "/graphics",
    "/upload",
    "/export",
    "/source",
    "/content",
    "/diff",
    "/file_show",
    "/view_pdf",
    "/agreement",
    "/presentation",
];

/// Session content that is also served anonymously when no provider is set.
pub const OPTIONAL_CONTENT_PREFIXES: [&str; 5] = ["/help", "/files", "/custom", "/session", "/html_preview"];

/// Register every gateway route and the session sweep.
pub fn register(context: &mut GatewayContext) -> Result<(), RouteError> {
    let www = context.config().server.www_local_path.clone();
    let proxy = context.proxy().clone();

    for prefix in RPC_PREFIXES {
        context.add_secure(prefix, proxy.rpc_handler(), false)?;
    }
    for prefix in SECURE_CONTENT_PREFIXES {
        context.add_secure(prefix, proxy.content_handler(), false)?;
    }
    for prefix in OPTIONAL_CONTENT_PREFIXES {
        context.add_secure(prefix, proxy.content_handler(), true)?;
    }

    context.add_secure_blocking("/docs", file_handler(www.join("docs"), "/docs", None), true)?;
    context.add_secure_blocking("/log", log_request_handler(), false)?;
    context.add_secure_blocking(
        "/progress",
        template_handler(www.join("templates").join("progress.htm")),
        false,
    )?;
    context.add_blocking(BROWSER_UNSUPPORTED_URI, unsupported_browser_handler())?;
    context.add_blocking("/templates", not_found_handler())?;

    let auth = context.auth().clone();
    let main_page_filter: RequestFilter = Arc::new(move |request, response| {
        supported_browser_filter(request, response) && auth.main_page_filter(request, response)
    });
    context.set_blocking_default(file_handler(www, "/", Some(main_page_filter)))?;

    let sessions = context.sessions().clone();
    let period = Duration::from_secs(sessions.config().sweep_interval_secs.max(1));
    context.add_command(Box::new(PeriodicCommand::new("session-sweep", period, move || {
        let removed = sessions.sweep();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.session_count(), "Session sweep");
        }
        true
    })));

    tracing::info!(routes = context.routes().len(), "Gateway handlers registered");
    Ok(())
}
