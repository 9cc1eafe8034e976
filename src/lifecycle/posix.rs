//! POSIX process control used during bootstrap.
//!
//! All of these run while the process is still single-threaded; several
//! (fork, getpwnam, umask) are only sound in that state.

use std::ffi::CString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use libc::c_int;

#[derive(Debug, thiserror::Error)]
pub enum PosixError {
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("user '{0}' not found")]
    UnknownUser(String),
    #[error("cannot switch to user '{0}' without root privileges")]
    NotRoot(String),
    #[error("root privileges could be regained after switching to '{0}'")]
    RegainedRoot(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn last_os_error(call: &'static str) -> PosixError {
    PosixError::Os {
        call,
        source: io::Error::last_os_error(),
    }
}

fn set_disposition(signal: c_int, handler: libc::sighandler_t) -> Result<(), PosixError> {
    // SAFETY: SIG_IGN and SIG_DFL are valid dispositions for these signals.
    if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
        return Err(last_os_error("signal"));
    }
    Ok(())
}

/// Writes to closed sockets must fail with EPIPE instead of killing us.
pub fn ignore_sigpipe() -> Result<(), PosixError> {
    set_disposition(libc::SIGPIPE, libc::SIG_IGN)
}

/// Ignore job-control and hangup signals once detached.
pub fn ignore_terminal_signals() -> Result<(), PosixError> {
    for signal in [libc::SIGHUP, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
        set_disposition(signal, libc::SIG_IGN)?;
    }
    Ok(())
}

pub fn set_umask(mask: libc::mode_t) {
    // SAFETY: umask cannot fail.
    unsafe { libc::umask(mask) };
}

fn fork_and_exit_parent() -> Result<(), PosixError> {
    // SAFETY: called while single-threaded, so the child has a consistent
    // copy of every lock and allocator state.
    match unsafe { libc::fork() } {
        -1 => Err(last_os_error("fork")),
        0 => Ok(()),
        // SAFETY: _exit skips atexit handlers and stdio flushing that belong to the child now.
        _ => unsafe { libc::_exit(0) },
    }
}

fn redirect_stdio_to_null() -> Result<(), PosixError> {
    let null = CString::new("/dev/null").map_err(|e| PosixError::Io {
        path: "/dev/null".into(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })?;
    // SAFETY: plain descriptor manipulation on a path we own.
    unsafe {
        let fd = libc::open(null.as_ptr(), libc::O_RDWR);
        if fd < 0 {
            return Err(last_os_error("open"));
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(fd, target) < 0 {
                return Err(last_os_error("dup2"));
            }
        }
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }
    Ok(())
}

/// Detach from the controlling terminal.
///
/// Double fork with `setsid` in between, standard streams on /dev/null,
/// terminal signals ignored and umask 022. Only the grandchild returns.
pub fn daemonize() -> Result<(), PosixError> {
    fork_and_exit_parent()?;
    // SAFETY: the first child is not a group leader, so setsid succeeds.
    if unsafe { libc::setsid() } < 0 {
        return Err(last_os_error("setsid"));
    }
    ignore_terminal_signals()?;
    fork_and_exit_parent()?;
    redirect_stdio_to_null()?;
    set_umask(0o022);
    Ok(())
}

/// True when the real user is root.
pub fn is_root() -> bool {
    // SAFETY: getuid cannot fail.
    unsafe { libc::getuid() == 0 }
}

/// Soft and hard limits after raising both to at least `target`, or
/// `None` when neither is below it.
fn raised_limit(current: libc::rlimit, target: libc::rlim_t) -> Option<libc::rlimit> {
    if current.rlim_cur >= target && current.rlim_max >= target {
        return None;
    }
    Some(libc::rlimit {
        rlim_cur: current.rlim_cur.max(target),
        rlim_max: current.rlim_max.max(target),
    })
}

fn get_file_limits() -> Result<libc::rlimit, PosixError> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes only into `limit`.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(last_os_error("getrlimit"));
    }
    Ok(limit)
}

/// Raise the open-file limit (soft and hard) to at least `max`. Limits
/// already above `max` are kept.
pub fn set_file_limit(max: u64) -> Result<(), PosixError> {
    let Some(limit) = raised_limit(get_file_limits()?, max as libc::rlim_t) else {
        return Ok(());
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(last_os_error("setrlimit"));
    }
    Ok(())
}

/// Current soft open-file limit.
pub fn file_limit() -> Result<u64, PosixError> {
    Ok(get_file_limits()?.rlim_cur as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::create(dir.path().join("gateway.pid")).unwrap();
        let content = fs::read_to_string(pid_file.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());

        pid_file.remove();
        assert!(!pid_file.path().exists());
    }

    #[test]
    fn test_lookup_root() {
        let root = lookup_user("root").unwrap();
        assert_eq!(root.uid, 0);
        assert!(matches!(
            lookup_user("no-such-user-session-gateway"),
            Err(PosixError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_file_limit_readable() {
        assert!(file_limit().unwrap() > 0);
    }

    fn rlimit(cur: libc::rlim_t, max: libc::rlim_t) -> libc::rlimit {
        libc::rlimit {
            rlim_cur: cur,
            rlim_max: max,
        }
    }

    #[test]
    fn test_raised_limit_never_lowers() {
        assert!(raised_limit(rlimit(20000, 20000), 4096).is_none());

        let raised = raised_limit(rlimit(1024, 524288), 4096).unwrap();
        assert_eq!((raised.rlim_cur, raised.rlim_max), (4096, 524288));

        let raised = raised_limit(rlimit(1024, 2048), 4096).unwrap();
        assert_eq!((raised.rlim_cur, raised.rlim_max), (4096, 4096));

        let unlimited = raised_limit(rlimit(1024, libc::RLIM_INFINITY), 4096).unwrap();
        assert_eq!(unlimited.rlim_max, libc::RLIM_INFINITY);
    }

    #[test]
    fn test_set_file_limit_below_current_is_noop() {
        let before = file_limit().unwrap();
        set_file_limit(1).unwrap();
        assert_eq!(file_limit().unwrap(), before);
    }
}
