//! Session process tracking.
//!
//! # Responsibilities
//! - Map users to the address of their backend session
//! - Launch session processes on first use
//! - Reap exited sessions when SIGCHLD is observed
//! - Sweep sessions whose process disappeared without a SIGCHLD
//!
//! # Design Decisions
//! - `std::process::Command` rather than `tokio::process`: the tokio child
//!   reaper installs its own SIGCHLD handling, while this process receives
//!   SIGCHLD synchronously on the signal thread
//! - Reaping is `waitpid(pid, WNOHANG)` for each tracked pid only
//! - Ports of exited sessions go back to a free list and are handed out
//!   before the counter advances

use std::net::{IpAddr, SocketAddr};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::SessionConfig;
use crate::lifecycle::environment::DetectedEnvironment;
use crate::lifecycle::signals::ChildExitObserver;
use crate::observability::metrics;
use crate::session::SessionError;

pub const SESSION_USER_ENV: &str = "GATEWAY_SESSION_USER";
pub const SESSION_PORT_ENV: &str = "GATEWAY_SESSION_PORT";
pub const SESSION_HOST_ENV: &str = "GATEWAY_SESSION_HOST";

/// A known session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user: String,
    pub address: SocketAddr,
    /// `None` for statically configured sessions.
    pub pid: Option<u32>,
    pub started: Instant,
}

/// Tracks per-user backend sessions.
pub struct SessionManager {
    config: SessionConfig,
    environment: DetectedEnvironment,
    bind_ip: IpAddr,
    sessions: DashMap<String, SessionRecord>,
    /// pid → user
    children: DashMap<u32, String>,
    next_port: AtomicU16,
    free_ports: Mutex<Vec<u16>>,
    sigchld_count: AtomicU64,
}

impl SessionManager {
    pub fn new(config: SessionConfig, environment: DetectedEnvironment) -> Result<Self, SessionError> {
        let bind_ip: IpAddr = config
            .bind_host
            .parse()
            .map_err(|_| SessionError::InvalidAddress(config.bind_host.clone()))?;

        let sessions = DashMap::new();
        for session in &config.static_sessions {
            let address: SocketAddr = session
                .address
                .parse()
                .map_err(|_| SessionError::InvalidAddress(session.address.clone()))?;
            sessions.insert(
                session.user.clone(),
                SessionRecord {
                    user: session.user.clone(),
                    address,
                    pid: None,
                    started: Instant::now(),
                },
            );
        }

        tracing::debug!(static_sessions = sessions.len(), bind_host = %bind_ip, "Session manager initialized");

        Ok(Self {
            next_port: AtomicU16::new(config.port_range_start),
            free_ports: Mutex::new(Vec::new()),
            config,
            environment,
            bind_ip,
            sessions,
            children: DashMap::new(),
            sigchld_count: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Address of the user's running session.
    pub fn address_for(&self, user: &str) -> Option<SocketAddr> {
        self.sessions.get(user).map(|s| s.address)
    }

    /// Address of the user's session, launching one if none is running.
    pub fn launch(&self, user: &str) -> Result<SocketAddr, SessionError> {
        let address = match self.sessions.entry(user.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().address),
            Entry::Vacant(slot) => {
                let program = self.config.program.as_ref().ok_or(SessionError::NoProgram)?;
                let port = self.allocate_port()?;
                let address = SocketAddr::new(self.bind_ip, port);

                let child = self
                    .command(program, &self.config.args)
                    .env(SESSION_USER_ENV, user)
                    .env(SESSION_PORT_ENV, port.to_string())
                    .env(SESSION_HOST_ENV, self.bind_ip.to_string())
                    .stdin(Stdio::null())
                    .spawn()
                    .map_err(|source| {
                        self.release_port(port);
                        SessionError::Spawn {
                            program: program.display().to_string(),
                            source,
                        }
                    })?;
                let pid = child.id();
                // Reaped through notify_sigchld, not through the handle.
                drop(child);

                self.children.insert(pid, user.to_string());
                slot.insert(SessionRecord {
                    user: user.to_string(),
                    address,
                    pid: Some(pid),
                    started: Instant::now(),
                });

                tracing::info!(user = %user, pid, address = %address, "Session launched");
                address
            }
        };

        // The child may have exited, and its SIGCHLD been handled, before
        // its pid was tracked.
        self.reap_children();
        Ok(address)
    }

    fn allocate_port(&self) -> Result<u16, SessionError> {
        if let Some(port) = self.free_ports.lock().unwrap_or_else(PoisonError::into_inner).pop() {
            return Ok(port);
        }
        self.next_port
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |port| port.checked_add(1))
            .map_err(|_| SessionError::PortsExhausted)
    }

    fn release_port(&self, port: u16) {
        self.free_ports.lock().unwrap_or_else(PoisonError::into_inner).push(port);
    }

    fn command(&self, program: &std::path::Path, args: &[String]) -> Command {
        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in self.environment.iter() {
            command.env(key, value);
        }
        command
    }

    /// Run the session program once in installation-check mode.
    pub fn run_verify_installation(&self) -> Result<ExitStatus, SessionError> {
        let program = self.config.program.as_ref().ok_or(SessionError::NoProgram)?;
        tracing::info!(program = %program.display(), "Verifying installation");
        self.command(program, &self.config.verify_args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| SessionError::Spawn {
                program: program.display().to_string(),
                source,
            })
    }

    /// Reap every tracked child that has exited.
    pub fn reap_children(&self) -> usize {
        let pids: Vec<u32> = self.children.iter().map(|e| *e.key()).collect();
        let mut reaped = 0;

        for pid in pids {
            let mut status: libc::c_int = 0;
            // SAFETY: waitpid only writes to `status`; WNOHANG keeps it from blocking.
            let result = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, libc::WNOHANG) };
            if result == 0 {
                continue;
            }
            if result < 0 {
                let error = std::io::Error::last_os_error();
                if error.raw_os_error() != Some(libc::ECHILD) {
                    tracing::warn!(pid, error = %error, "waitpid failed");
                    continue;
                }
            }

            let exit_code = if libc::WIFEXITED(status) {
                Some(libc::WEXITSTATUS(status))
            } else {
                None
            };
            let signal = if libc::WIFSIGNALED(status) {
                Some(libc::WTERMSIG(status))
            } else {
                None
            };
            self.forget(pid);
            reaped += 1;
            metrics::record_session_reaped();
            tracing::info!(pid, exit_code = ?exit_code, signal = ?signal, "Session process exited");
        }
        reaped
    }

    /// Drop sessions whose process no longer exists.
    ///
    /// Exited children are reaped first, so a session whose SIGCHLD was
    /// missed does not linger as a zombie that still answers `kill(pid, 0)`.
    pub fn sweep(&self) -> usize {
        let mut removed = self.reap_children();
        let pids: Vec<u32> = self.children.iter().map(|e| *e.key()).collect();
        for pid in pids {
            if !process_alive_nondefunct(pid) {
                tracing::warn!(pid, "Session process vanished");
                self.forget(pid);
                removed += 1;
            }
        }
        removed
    }

    fn forget(&self, pid: u32) {
        if let Some((_, user)) = self.children.remove(&pid) {
            if let Some((_, record)) = self.sessions.remove_if(&user, |_, record| record.pid == Some(pid)) {
                self.release_port(record.address.port());
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// SIGCHLD notifications received so far.
    pub fn sigchld_count(&self) -> u64 {
        self.sigchld_count.load(Ordering::Relaxed)
    }
}

/// Whether `pid` exists and is not a zombie.
fn process_alive_nondefunct(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the process exists.
    let exists = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    if !exists {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state field follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map_or(true, |state| state != "Z"),
        Err(_) => true,
    }
}

impl ChildExitObserver for SessionManager {
    fn notify_sigchld(&self) {
        self.sigchld_count.fetch_add(1, Ordering::Relaxed);
        let reaped = self.reap_children();
        tracing::debug!(reaped, "SIGCHLD handled");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StaticSession;
    use std::path::PathBuf;
    use std::time::Duration;

    fn shell_config(script: &str) -> SessionConfig {
        SessionConfig {
            program: Some(PathBuf::from("/bin/sh")),
            args: vec!["-c".into(), script.into()],
            port_range_start: 45000,
            ..SessionConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_launch_reuses_running_session() {
        let manager = SessionManager::new(shell_config("sleep 30"), DetectedEnvironment::default()).unwrap();
        let first = manager.launch("alice").unwrap();
        let again = manager.launch("alice").unwrap();
        let other = manager.launch("bob").unwrap();

        assert_eq!(first, again);
        assert_eq!(first.port(), 45000);
        assert_eq!(other.port(), 45001);
        assert_eq!(manager.child_count(), 2);

        for record in manager.sessions() {
            let pid = record.pid.unwrap() as libc::pid_t;
            unsafe { libc::kill(pid, libc::SIGKILL) };
        }
        assert!(wait_until(|| {
            manager.notify_sigchld();
            manager.session_count() == 0
        }));
    }

    #[test]
    fn test_sigchld_reaps_exited_session() {
        let manager = SessionManager::new(shell_config("sleep 0.2"), DetectedEnvironment::default()).unwrap();
        manager.launch("carol").unwrap();
        assert_eq!(manager.session_count(), 1);

        assert!(wait_until(|| {
            manager.notify_sigchld();
            manager.child_count() == 0
        }));
        assert!(manager.address_for("carol").is_none());
        assert!(manager.sigchld_count() >= 1);
    }

    #[test]
    fn test_sweep_reaps_exit_without_sigchld() {
        let mut config = shell_config("exit 0");
        config.port_range_start = 46000;
        let manager = SessionManager::new(config, DetectedEnvironment::default()).unwrap();
        manager.launch("gina").unwrap();

        // No notify_sigchld: the exit is only noticed by the sweep.
        std::thread::sleep(Duration::from_millis(300));
        manager.sweep();

        assert_eq!(manager.session_count(), 0);
        assert_eq!(manager.child_count(), 0);
        assert!(manager.address_for("gina").is_none());
    }

    #[test]
    fn test_process_alive_nondefunct_sees_zombie() {
        let child = Command::new("/bin/sh").args(["-c", "exit 0"]).spawn().unwrap();
        let pid = child.id();
        drop(child);
        assert!(wait_until(|| !process_alive_nondefunct(pid)));

        let mut status = 0;
        unsafe { libc::waitpid(pid as libc::pid_t, &mut status, 0) };
        assert!(process_alive_nondefunct(std::process::id()));
    }

    #[test]
    fn test_released_ports_are_reused() {
        let mut config = shell_config("exit 0");
        config.port_range_start = 47000;
        let manager = SessionManager::new(config, DetectedEnvironment::default()).unwrap();

        let first = manager.launch("hank").unwrap();
        assert_eq!(first.port(), 47000);
        assert!(wait_until(|| {
            manager.notify_sigchld();
            manager.session_count() == 0
        }));

        let second = manager.launch("ida").unwrap();
        assert_eq!(second.port(), 47000);
    }

    #[test]
    fn test_session_receives_user_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let script = format!(
            "echo \"$GATEWAY_SESSION_USER $GATEWAY_SESSION_PORT $APP_HOME\" > {}",
            out.display()
        );
        let mut environment = DetectedEnvironment::default();
        environment.insert("APP_HOME", "/opt/app");

        let manager = SessionManager::new(shell_config(&script), environment).unwrap();
        let address = manager.launch("dave").unwrap();

        assert!(wait_until(|| {
            manager.notify_sigchld();
            manager.child_count() == 0
        }));
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), format!("dave {} /opt/app", address.port()));
    }

    #[test]
    fn test_static_sessions_are_not_launched() {
        let config = SessionConfig {
            static_sessions: vec![StaticSession {
                user: "erin".into(),
                address: "127.0.0.1:9999".into(),
            }],
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(config, DetectedEnvironment::default()).unwrap();
        assert_eq!(manager.launch("erin").unwrap(), "127.0.0.1:9999".parse().unwrap());
        assert!(matches!(manager.launch("frank"), Err(SessionError::NoProgram)));
        assert_eq!(manager.child_count(), 0);
    }

    #[test]
    fn test_verify_installation_status() {
        let mut config = shell_config("unused");
        config.verify_args = vec!["-c".into(), "exit 4".into()];
        let manager = SessionManager::new(config, DetectedEnvironment::default()).unwrap();
        assert_eq!(manager.run_verify_installation().unwrap().code(), Some(4));
    }
}
