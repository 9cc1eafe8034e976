//! The real bootstrap: each phase acting on the process and the OS.
//!
//! State produced by one phase is handed to the next through the fields of
//! [`SystemBootstrap`]; a phase that finds its input missing was called out
//! of order and fails with [`SystemError::Missing`].

use std::ffi::OsString;
use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::addins;
use crate::auth::local;
use crate::auth::secure_cookie::SecureCookie;
use crate::config::{read_options, AuthMode, GatewayOptions, ProgramStatus};
use crate::context::GatewayContext;
use crate::crypto;
use crate::http::{handlers, offline, HttpServer};
use crate::lifecycle::environment::{self, DetectedEnvironment};
use crate::lifecycle::posix::{self, PidFile};
use crate::lifecycle::signals::{SignalError, SignalStateMachine, SigwaitWaiter};
use crate::lifecycle::startup::{BootstrapActions, BootstrapOutcome, BoxError};
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::session::SessionManager;

/// Time given to blocking work when the runtime is dropped after a failure.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("{0} is not initialised")]
    Missing(&'static str),
    #[error("installation check failed: {0}")]
    VerifyFailed(ExitStatus),
}

/// Phase actions against the real process.
pub struct SystemBootstrap {
    args: Vec<OsString>,
    options: Option<GatewayOptions>,
    environment: Option<DetectedEnvironment>,
    sessions: Option<Arc<SessionManager>>,
    context: Option<GatewayContext>,
    listener: Option<std::net::TcpListener>,
    pid_file: Option<PidFile>,
}

impl SystemBootstrap {
    pub fn new<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            options: None,
            environment: None,
            sessions: None,
            context: None,
            listener: None,
            pid_file: None,
        }
    }

    fn options(&self) -> Result<&GatewayOptions, SystemError> {
        self.options.as_ref().ok_or(SystemError::Missing("options"))
    }

    fn sessions(&self) -> Result<&Arc<SessionManager>, SystemError> {
        self.sessions.as_ref().ok_or(SystemError::Missing("session manager"))
    }

    pub fn context(&self) -> Option<&GatewayContext> {
        self.context.as_ref()
    }

    pub fn listener(&self) -> Option<&std::net::TcpListener> {
        self.listener.as_ref()
    }
}

impl BootstrapActions for SystemBootstrap {
    type Running = RunningGateway;

    fn load_options(&mut self) -> Result<Option<u8>, BoxError> {
        match read_options(self.args.clone())? {
            ProgramStatus::Exit(code) => Ok(Some(code)),
            ProgramStatus::Run(options) => {
                logging::init_logging(&options.config.observability)?;
                tracing::info!(
                    version = env!("CARGO_PKG_VERSION"),
                    config = %options.config_path.display(),
                    verify_installation = options.verify_installation,
                    "session-gateway starting"
                );
                self.options = Some(*options);
                Ok(None)
            }
        }
    }

    fn daemonize(&mut self) -> Result<(), BoxError> {
        let server = &self.options()?.config.server;
        let (daemonize, pid_file) = (server.daemonize, server.pid_file.clone());

        if daemonize {
            posix::daemonize()?;
            tracing::info!(pid = std::process::id(), "Daemonized");
        }
        if let Some(path) = pid_file {
            self.pid_file = Some(PidFile::create(path)?);
        }
        Ok(())
    }

    fn detect_environment(&mut self) -> Result<(), BoxError> {
        let detected = environment::detect(&self.options()?.config.environment)?;
        tracing::info!(variables = detected.len(), "Environment detected");
        self.environment = Some(detected);
        Ok(())
    }

    fn set_resource_limits(&mut self) -> Result<(), BoxError> {
        let max_open_files = self.options()?.config.server.max_open_files;
        if posix::is_root() {
            posix::set_file_limit(max_open_files)?;
            tracing::info!(max_open_files, current = ?posix::file_limit().ok(), "Open file limit checked");
        } else {
            tracing::debug!(current = ?posix::file_limit().ok(), "Not root, open file limit unchanged");
        }
        Ok(())
    }

    fn set_working_dir(&mut self) -> Result<(), BoxError> {
        let dir = &self.options()?.config.server.working_dir;
        posix::change_dir(dir)?;
        tracing::debug!(dir = %dir.display(), "Working directory set");
        Ok(())
    }

    fn initialize_crypto(&mut self) -> Result<(), BoxError> {
        crypto::initialize()?;
        Ok(())
    }

    fn initialize_security_modules(&mut self) -> Result<(), BoxError> {
        let config = Arc::new(self.options()?.config.clone());

        let lifetime = Duration::from_secs(config.auth.cookie_lifetime_hours.saturating_mul(3600));
        let cookie = Arc::new(SecureCookie::initialize(&config.auth.secure_cookie_key_path, lifetime)?);

        let environment = self.environment.take().unwrap_or_default();
        let sessions = Arc::new(SessionManager::new(config.session.clone(), environment)?);

        self.sessions = Some(sessions.clone());
        self.context = Some(GatewayContext::new(config, cookie, sessions));
        Ok(())
    }

    fn register_handlers(&mut self) -> Result<(), BoxError> {
        let options = self.options()?;
        let verify = options.verify_installation;
        let config = options.config.clone();

        if !verify {
            self.listener = Some(HttpServer::bind(&config.server.www_address, config.server.www_port)?);
        }

        let context = self.context.as_mut().ok_or(SystemError::Missing("gateway context"))?;
        if config.server.offline {
            offline::register(context)?;
        } else {
            handlers::register(context)?;
            addins::initialize(context)?;
            if config.auth.mode == AuthMode::Local && !context.auth().is_registered() {
                local::initialize(context)?;
            }
        }

        if let Some(profile) = &config.server.app_armor_profile {
            match posix::enforce_restricted(profile) {
                Ok(()) => tracing::info!(profile = %profile, "Restricted profile enforced"),
                Err(e) => tracing::warn!(profile = %profile, error = %e, "Restricted profile not enforced"),
            }
        }
        Ok(())
    }

    fn drop_privilege(&mut self) -> Result<(), BoxError> {
        if let Some(user) = self.options()?.config.server.run_as_user.clone() {
            posix::drop_privilege(&user)?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<BootstrapOutcome<RunningGateway>, BoxError> {
        let config = self.options()?.config.clone();

        if self.options()?.verify_installation {
            let status = self.sessions()?.run_verify_installation()?;
            if !status.success() {
                return Err(SystemError::VerifyFailed(status).into());
            }
            tracing::info!("Installation verified");
            return Ok(BootstrapOutcome::Exit(0));
        }

        // Must happen before the runtime spawns its workers.
        let signals = SignalStateMachine::block(self.sessions()?.clone())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.server.thread_pool_size)
            .thread_name("gateway-worker")
            .enable_all()
            .build()?;

        let context = self.context.take().ok_or(SystemError::Missing("gateway context"))?;
        let listener = self.listener.take().ok_or(SystemError::Missing("listener"))?;
        let (context, commands) = context.freeze();
        let shutdown = Shutdown::new();
        let server_failed = Arc::new(AtomicBool::new(false));

        {
            let _guard = runtime.enter();

            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse::<SocketAddr>() {
                    Ok(addr) => metrics::init_metrics(addr),
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }

            let server = HttpServer::new(context);
            let stop = shutdown.subscribe();
            let failed = server_failed.clone();
            runtime.spawn(async move {
                if let Err(e) = server.run(listener, stop).await {
                    tracing::error!(error = %e, "HTTP server failed, stopping gateway");
                    failed.store(true, Ordering::SeqCst);
                    // Wakes the signal thread, which exits with a failure status.
                    // SAFETY: signalling our own pid has no memory-safety impact.
                    unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
                }
            });
            commands.spawn_all(&shutdown);
        }

        tracing::info!(
            workers = config.server.thread_pool_size,
            offline = config.server.offline,
            "Gateway running"
        );
        Ok(BootstrapOutcome::Running(RunningGateway {
            runtime,
            shutdown,
            server_failed,
            signals,
            pid_file: self.pid_file.take(),
        }))
    }
}

/// Why [`RunningGateway::wait`] returned.
#[derive(Debug, thiserror::Error)]
pub enum GatewayStopped {
    #[error("HTTP server failed")]
    ServerFailed,

    #[error(transparent)]
    Signals(#[from] SignalError),
}

/// The serving gateway. The main thread parks in [`RunningGateway::wait`].
pub struct RunningGateway {
    runtime: tokio::runtime::Runtime,
    shutdown: Shutdown,
    server_failed: Arc<AtomicBool>,
    signals: SignalStateMachine<SigwaitWaiter>,
    pid_file: Option<PidFile>,
}

impl RunningGateway {
    /// Handle signals until a termination signal ends the process.
    ///
    /// Returns when the HTTP server failed, so the caller can exit with a
    /// failure status, or when re-raising the signal did not end the process.
    pub fn wait(self) -> GatewayStopped {
        let RunningGateway {
            runtime,
            shutdown,
            server_failed,
            signals,
            pid_file,
        } = self;
        let stopped = signals.run(|| {
            shutdown.trigger();
            if let Some(pid_file) = &pid_file {
                pid_file.remove();
            }
            server_failed.load(Ordering::SeqCst).then_some(())
        });
        match stopped {
            Ok(()) => {
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
                GatewayStopped::ServerFailed
            }
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerKind;

    fn write_config(dir: &std::path::Path, extra: &str) -> std::path::PathBuf {
        let path = dir.join("gateway.toml");
        let content = format!(
            r#"
            [server]
            www_address = "127.0.0.1"
            www_port = 0
            www_local_path = "{www}"
            {extra}

            [auth]
            secure_cookie_key_path = "{key}"
            "#,
            www = dir.join("www").display(),
            key = dir.join("secure-cookie-key").display(),
            extra = extra,
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    fn bootstrap(config: &std::path::Path) -> SystemBootstrap {
        let mut bootstrap = SystemBootstrap::new([
            OsString::from("session-gateway"),
            OsString::from("--config"),
            config.as_os_str().to_owned(),
        ]);
        assert_eq!(bootstrap.load_options().unwrap(), None);
        bootstrap.daemonize().unwrap();
        bootstrap.detect_environment().unwrap();
        bootstrap.initialize_crypto().unwrap();
        bootstrap.initialize_security_modules().unwrap();
        bootstrap
    }

    #[test]
    fn test_help_exits_early() {
        let mut bootstrap = SystemBootstrap::new(["session-gateway", "--help"]);
        assert_eq!(bootstrap.load_options().unwrap(), Some(0));
    }

    #[test]
    fn test_phase_without_options_fails() {
        let mut bootstrap = SystemBootstrap::new(["session-gateway"]);
        assert!(bootstrap.detect_environment().is_err());
    }

    #[test]
    fn test_gateway_handlers_and_local_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut bootstrap = bootstrap(&write_config(dir.path(), ""));
        bootstrap.register_handlers().unwrap();

        assert!(bootstrap.listener().is_some());
        let context = bootstrap.context().unwrap();
        assert_eq!(context.routes().resolve("/rpc").unwrap().kind(), HandlerKind::AsyncSecured);
        assert!(context.routes().resolve("/auth-sign-in").is_ok());
        assert_eq!(context.auth().provider().unwrap().name(), "local");
        assert!(dir.path().join("secure-cookie-key").exists());
    }

    #[test]
    fn test_offline_skips_gateway_routes() {
        let dir = tempfile::tempdir().unwrap();
        let mut bootstrap = bootstrap(&write_config(dir.path(), "offline = true"));
        bootstrap.register_handlers().unwrap();

        let context = bootstrap.context().unwrap();
        assert_eq!(context.routes().resolve("/graphics").unwrap().label(), "default");
        assert!(!context.auth().is_registered());
    }

    #[test]
    fn test_pid_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("gateway.pid");
        let extra = format!("pid_file = \"{}\"", pid_path.display());
        let _bootstrap = bootstrap(&write_config(dir.path(), &extra));
        assert_eq!(
            std::fs::read_to_string(&pid_path).unwrap().trim(),
            std::process::id().to_string()
        );
    }
}
