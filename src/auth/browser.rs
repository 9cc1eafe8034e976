//! Supported-browser check for the main page.

use axum::http::{header, StatusCode};

use crate::handler::builtin::{redirect, respond};
use crate::handler::{sync_handler, HttpRequest, HttpResponse, SyncHandler};

pub const BROWSER_UNSUPPORTED_URI: &str = "/unsupported_browser.htm";

const UNSUPPORTED_AGENTS: &[&str] = &["MSIE ", "Trident/"];

pub fn is_supported_browser(request: &HttpRequest) -> bool {
    let agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    !UNSUPPORTED_AGENTS.iter().any(|marker| agent.contains(marker))
}

/// Redirects unsupported browsers away from the main page.
pub fn supported_browser_filter(request: &HttpRequest, response: &mut HttpResponse) -> bool {
    if is_supported_browser(request) {
        return true;
    }
    tracing::debug!(path = %request.uri().path(), "Unsupported browser redirected");
    redirect(response, BROWSER_UNSUPPORTED_URI);
    false
}

pub fn unsupported_browser_handler() -> SyncHandler {
    sync_handler(|_request, response| {
        respond(
            response,
            StatusCode::OK,
            "text/html; charset=utf-8",
            "<!DOCTYPE html>\n<html><head><title>Unsupported browser</title></head><body>\n\
             <p>This browser is not supported. Please use a current version of \
             Firefox, Chrome, Safari or Edge.</p>\n</body></html>\n",
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bytes::Bytes;

    fn with_agent(agent: &str) -> HttpRequest {
        axum::http::Request::builder()
            .header(header::USER_AGENT, agent)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn test_old_internet_explorer_redirected() {
        let mut response = HttpResponse::new(Body::empty());
        let passed = supported_browser_filter(
            &with_agent("Mozilla/5.0 (Windows NT 6.1; Trident/7.0; rv:11.0) like Gecko"),
            &mut response,
        );
        assert!(!passed);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], BROWSER_UNSUPPORTED_URI);
    }

    #[test]
    fn test_modern_browser_passes() {
        let mut response = HttpResponse::new(Body::empty());
        assert!(supported_browser_filter(
            &with_agent("Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"),
            &mut response,
        ));
        assert!(is_supported_browser(&HttpRequest::new(Bytes::new())));
    }
}
