//! Small handlers and response helpers shared by the gateway routes.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use serde::Deserialize;

use crate::auth::Identity;
use crate::handler::{sync_handler, HttpResponse, SyncHandler};

/// Overwrite `response` with a status, content type and body.
pub fn respond(response: &mut HttpResponse, status: StatusCode, content_type: &'static str, body: impl Into<Body>) {
    respond_with_type(response, status, HeaderValue::from_static(content_type), body);
}

pub fn respond_with_type(response: &mut HttpResponse, status: StatusCode, content_type: HeaderValue, body: impl Into<Body>) {
    *response.status_mut() = status;
    *response.body_mut() = body.into();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
}

/// Escape text for an HTML body or a quoted attribute.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn text_response(status: StatusCode, body: impl Into<Body>) -> HttpResponse {
    let mut response = HttpResponse::new(Body::empty());
    respond(&mut response, status, "text/plain; charset=utf-8", body);
    response
}

pub fn json_response(status: StatusCode, value: &serde_json::Value) -> HttpResponse {
    let mut response = HttpResponse::new(Body::empty());
    respond(&mut response, status, "application/json", value.to_string());
    response
}

pub fn json_error_response(status: StatusCode, message: &str) -> HttpResponse {
    json_response(
        status,
        &serde_json::json!({ "error": { "code": status.as_u16(), "message": message } }),
    )
}

/// Point `response` at `location` with a 302.
pub fn redirect(response: &mut HttpResponse, location: &str) {
    *response.status_mut() = StatusCode::FOUND;
    *response.body_mut() = Body::empty();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            response
                .headers_mut()
                .insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
}

pub fn redirect_response(location: &str) -> HttpResponse {
    let mut response = HttpResponse::new(Body::empty());
    redirect(&mut response, location);
    response
}

/// Answers 404 for everything under its prefix.
pub fn not_found_handler() -> SyncHandler {
    sync_handler(|request, response| {
        respond(
            response,
            StatusCode::NOT_FOUND,
            "text/plain; charset=utf-8",
            format!("{} not found", request.uri().path()),
        );
    })
}

#[derive(Debug, Deserialize)]
struct LogCall {
    method: String,
    params: (u8, String),
}

/// Receives client-side log entries and writes them to the server log.
///
/// Body: `{"method": "log", "params": [level, message]}` with level
/// 0 = error, 1 = warning, anything else = info.
pub fn log_request_handler() -> SyncHandler {
    sync_handler(|request, response| {
        let user = request
            .extensions()
            .get::<Identity>()
            .map(|i| i.username.as_str())
            .unwrap_or("-");

        let call: LogCall = match serde_json::from_slice(request.body()) {
            Ok(call) => call,
            Err(e) => {
                *response = json_error_response(StatusCode::BAD_REQUEST, &format!("malformed log call: {}", e));
                return;
            }
        };
        if call.method != "log" {
            *response = json_error_response(StatusCode::NOT_FOUND, "unknown method");
            return;
        }

        let (level, message) = call.params;
        match level {
            0 => tracing::error!(target: "client", user = %user, "{}", message),
            1 => tracing::warn!(target: "client", user = %user, "{}", message),
            _ => tracing::info!(target: "client", user = %user, "{}", message),
        }
        *response = json_response(StatusCode::OK, &serde_json::json!({ "result": true }));
    })
}
