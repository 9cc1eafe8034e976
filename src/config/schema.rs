//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener, process and privilege settings.
    pub server: ServerConfig,

    /// Authentication provider settings.
    pub auth: AuthConfig,

    /// Per-user backend session settings.
    pub session: SessionConfig,

    /// Runtime environment detection.
    pub environment: EnvironmentConfig,

    /// Auxiliary feature modules.
    pub addins: Vec<AddinConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener and process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (e.g., "0.0.0.0").
    pub www_address: String,

    /// Port to bind.
    pub www_port: u16,

    /// Directory holding the static web application.
    pub www_local_path: PathBuf,

    /// Worker threads for the transport runtime.
    pub thread_pool_size: usize,

    /// Detach from the controlling terminal at startup.
    pub daemonize: bool,

    /// Pid file written after daemonizing and removed on termination.
    pub pid_file: Option<PathBuf>,

    /// Working directory of the process.
    pub working_dir: PathBuf,

    /// Unprivileged account to switch to once startup is complete.
    pub run_as_user: Option<String>,

    /// Open-file limit applied when started as root.
    pub max_open_files: u64,

    /// Restricted sandbox profile to switch to (best effort).
    pub app_armor_profile: Option<String>,

    /// Serve the reduced offline handler set.
    pub offline: bool,

    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            www_address: "0.0.0.0".to_string(),
            www_port: 8787,
            www_local_path: PathBuf::from("www"),
            thread_pool_size: 2,
            daemonize: false,
            pid_file: None,
            working_dir: PathBuf::from("/"),
            run_as_user: None,
            max_open_files: 4096,
            app_armor_profile: None,
            offline: false,
            max_body_size: 16 * 1024 * 1024, // 16MB (uploads)
        }
    }
}

/// Which authentication provider the gateway runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Fallback local credential authenticator.
    #[default]
    Local,
    /// Trust a username header set by a fronting proxy.
    Header,
    /// No provider: optional-auth routes are open, secured routes are refused.
    None,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// File holding the secure cookie signing key (created if missing).
    pub secure_cookie_key_path: PathBuf,

    /// Lifetime of a sign-in cookie in hours.
    pub cookie_lifetime_hours: u64,

    /// Credentials accepted by the local authenticator.
    pub users: Vec<UserCredential>,

    /// Header carrying the username in `header` mode.
    pub trusted_header: String,

    /// Peers allowed to set `trusted_header`.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Local,
            secure_cookie_key_path: PathBuf::from("/var/lib/session-gateway/secure-cookie-key"),
            cookie_lifetime_hours: 24 * 7,
            users: Vec::new(),
            trusted_header: "X-Remote-User".to_string(),
            trusted_proxies: vec![IpAddr::from([127, 0, 0, 1])],
        }
    }
}

/// A local account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserCredential {
    pub name: String,

    /// Hex-encoded SHA-256 of the password.
    pub password_sha256: String,
}

/// Backend session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program launched once per user.
    pub program: Option<PathBuf>,

    /// Arguments passed to every launched session.
    pub args: Vec<String>,

    /// Arguments passed when verifying the installation.
    pub verify_args: Vec<String>,

    /// Host sessions listen on.
    pub bind_host: String,

    /// First port handed out to launched sessions.
    pub port_range_start: u16,

    /// How long the proxy waits for a fresh session to accept connections.
    pub startup_timeout_secs: u64,

    /// Session owner when a route runs without authentication.
    pub default_user: Option<String>,

    /// Sessions that are managed elsewhere.
    #[serde(rename = "static")]
    pub static_sessions: Vec<StaticSession>,

    /// Interval of the stale-session sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            verify_args: vec!["--verify-installation".to_string()],
            bind_host: "127.0.0.1".to_string(),
            port_range_start: 34000,
            startup_timeout_secs: 30,
            default_user: None,
            static_sessions: Vec::new(),
            sweep_interval_secs: 60,
        }
    }
}

/// A pre-existing session for one user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticSession {
    pub user: String,
    pub address: String,
}

/// Runtime environment detection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Program printing `KEY=VALUE` lines on stdout.
    pub probe_program: Option<PathBuf>,

    /// Arguments for the probe program.
    pub probe_args: Vec<String>,

    /// Variables that must be present after detection.
    pub required: Vec<String>,
}

/// A static directory mounted by the addins module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddinConfig {
    /// URI prefix (e.g. "/reports").
    pub prefix: String,

    /// Directory served under the prefix.
    pub directory: PathBuf,

    /// Require a signed-in user.
    #[serde(default)]
    pub secure: bool,

    /// Only require sign-in while a provider is configured.
    #[serde(default)]
    pub optional_auth: bool,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 300 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log file; stdout is used when unset.
    pub log_file: Option<PathBuf>,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_file: None,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
