//! Static file and template handlers.
//!
//! # Responsibilities
//! - Serve files from a directory under a URI prefix
//! - Run the main-page filter before serving the application entry point
//! - Render small HTML templates with per-user substitutions
//!
//! # Design Decisions
//! - Blocking: files are read with `std::fs` on the calling worker, which
//!   keeps these handlers in the bounded-local-I/O class
//! - Any `..` segment is refused rather than normalised

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};

use crate::auth::Identity;
use crate::handler::builtin::{html_escape, respond, respond_with_type};
use crate::handler::{sync_handler, HttpRequest, HttpResponse, SyncHandler};

/// A check run before a response is produced. Returns false after writing
/// its own response.
pub type RequestFilter = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) -> bool + Send + Sync>;

/// Served for requests to the bare prefix.
pub const MAIN_PAGE: &str = "index.htm";

/// Content type for a file name, by extension. Text types are marked UTF-8.
pub fn content_type(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let value = if mime.type_() == mime_guess::mime::TEXT && mime.get_param(mime_guess::mime::CHARSET).is_none() {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.to_string()
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Relative file path for `request_path` below `base_uri`, or `None` when
/// the path escapes the root.
fn relative_path(request_path: &str, base_uri: &str) -> Option<PathBuf> {
    let rest = request_path.strip_prefix(base_uri).unwrap_or(request_path);
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return Some(PathBuf::from(MAIN_PAGE));
    }

    let mut relative = PathBuf::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => relative.push(s),
        }
    }
    Some(relative)
}

fn not_found(response: &mut HttpResponse, path: &str) {
    respond(
        response,
        StatusCode::NOT_FOUND,
        "text/plain; charset=utf-8",
        format!("{} not found", path),
    );
}

/// Serve files under `root` for requests below `base_uri`.
///
/// `main_page_filter` runs only for the directory entry point.
pub fn file_handler(root: impl Into<PathBuf>, base_uri: impl Into<String>, main_page_filter: Option<RequestFilter>) -> SyncHandler {
    let root = root.into();
    let base_uri = base_uri.into();
    sync_handler(move |request, response| {
        let path = request.uri().path();
        let Some(relative) = relative_path(path, &base_uri) else {
            tracing::warn!(path = %path, "Rejected path outside document root");
            respond(response, StatusCode::FORBIDDEN, "text/plain; charset=utf-8", "forbidden");
            return;
        };

        if relative.as_os_str() == MAIN_PAGE {
            if let Some(filter) = &main_page_filter {
                if !filter(request, response) {
                    return;
                }
            }
        }

        let file = root.join(&relative);
        match fs::read(&file) {
            Ok(content) => respond_with_type(response, StatusCode::OK, content_type(&file), content),
            Err(e) if e.kind() == ErrorKind::NotFound => not_found(response, path),
            Err(e) if file.is_dir() => {
                tracing::trace!(file = %file.display(), error = %e, "Directory requested");
                not_found(response, path);
            }
            Err(e) => {
                tracing::error!(file = %file.display(), error = %e, "Failed to read file");
                respond(
                    response,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain; charset=utf-8",
                    "failed to read file",
                );
            }
        }
    })
}

/// Render the HTML template at `path`, replacing `#username#` with the
/// signed-in user.
pub fn template_handler(path: impl Into<PathBuf>) -> SyncHandler {
    let path = path.into();
    sync_handler(move |request, response| {
        let username = request
            .extensions()
            .get::<Identity>()
            .map(|i| i.username.as_str())
            .unwrap_or("");
        match fs::read_to_string(&path) {
            Ok(template) => respond(
                response,
                StatusCode::OK,
                "text/html; charset=utf-8",
                template.replace("#username#", &html_escape(username)),
            ),
            Err(e) => {
                tracing::error!(template = %path.display(), error = %e, "Failed to read template");
                not_found(response, request.uri().path());
            }
        }
    })
}
