//! OS signal handling.
//!
//! # Responsibilities
//! - Block the handled signals before any worker thread exists
//! - Wait for them synchronously on the main thread
//! - Route SIGCHLD to the session manager
//! - Terminate with the received signal after cleanup
//!
//! # Design Decisions
//! - `sigwait` on a dedicated thread instead of asynchronous handlers: no
//!   async-signal-safety constraints on what a transition may do
//! - Workers inherit the blocked mask, so only the signal thread ever
//!   receives SIGCHLD, SIGINT, SIGQUIT or SIGTERM
//! - Termination is a hard stop: cleanup hook, restore the default
//!   disposition, re-raise. In-flight requests are not drained
//! - Waiting sits behind [`SignalWaiter`] so transitions are testable
//!   without delivering real signals

use std::io;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::Arc;

use libc::c_int;

use crate::observability::metrics;

/// Signals owned by the state machine.
pub const HANDLED_SIGNALS: [c_int; 4] = [libc::SIGCHLD, libc::SIGINT, libc::SIGQUIT, libc::SIGTERM];

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("process survived re-raised signal {0}")]
    Survived(c_int),
}

fn os_error(call: &'static str, source: io::Error) -> SignalError {
    SignalError::Os { call, source }
}

/// Receives SIGCHLD notifications from the signal thread.
pub trait ChildExitObserver: Send + Sync {
    fn notify_sigchld(&self);
}

/// Where the signal thread is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    Unblocked,
    Blocked,
    Terminating(c_int),
}

/// Source of synchronously received signals.
pub trait SignalWaiter {
    /// Block until one of the handled signals is pending and consume it.
    fn wait(&mut self) -> Result<c_int, SignalError>;
}

pub fn signal_name(signal: c_int) -> &'static str {
    match signal {
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGHUP => "SIGHUP",
        libc::SIGPIPE => "SIGPIPE",
        _ => "other",
    }
}

fn signal_set(signals: &[c_int]) -> Result<libc::sigset_t, SignalError> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before sigaddset reads it.
    unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) != 0 {
            return Err(os_error("sigemptyset", io::Error::last_os_error()));
        }
        for &signal in signals {
            if libc::sigaddset(set.as_mut_ptr(), signal) != 0 {
                return Err(os_error("sigaddset", io::Error::last_os_error()));
            }
        }
        Ok(set.assume_init())
    }
}

extern "C" fn ignore_signal(_: c_int) {}

/// SIGCHLD must have a handler (not SIG_IGN) for exits to stay pending and
/// for children to remain waitable.
fn install_sigchld_handler() -> Result<(), SignalError> {
    // SAFETY: the struct is zeroed then fully set up; the handler does nothing,
    // which is trivially async-signal-safe.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = ignore_signal as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &action, ptr::null_mut()) != 0 {
            return Err(os_error("sigaction", io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn set_thread_mask(how: c_int, set: &libc::sigset_t) -> Result<(), SignalError> {
    // SAFETY: `set` is an initialised sigset_t; the old mask is not requested.
    let rc = unsafe { libc::pthread_sigmask(how, set, ptr::null_mut()) };
    if rc != 0 {
        return Err(os_error("pthread_sigmask", io::Error::from_raw_os_error(rc)));
    }
    Ok(())
}

/// Unblock everything on the calling thread.
pub fn clear_signal_mask() -> Result<(), SignalError> {
    set_thread_mask(libc::SIG_SETMASK, &signal_set(&[])?)
}

/// Restore the default action for `signal`.
pub fn restore_default(signal: c_int) -> Result<(), SignalError> {
    // SAFETY: SIG_DFL is always a valid disposition.
    if unsafe { libc::signal(signal, libc::SIG_DFL) } == libc::SIG_ERR {
        return Err(os_error("signal", io::Error::last_os_error()));
    }
    Ok(())
}

/// [`SignalWaiter`] backed by `sigwait(3)`.
pub struct SigwaitWaiter {
    set: libc::sigset_t,
}

impl SigwaitWaiter {
    pub fn new(signals: &[c_int]) -> Result<Self, SignalError> {
        Ok(Self {
            set: signal_set(signals)?,
        })
    }
}

impl SignalWaiter for SigwaitWaiter {
    fn wait(&mut self) -> Result<c_int, SignalError> {
        let mut signal: c_int = 0;
        // SAFETY: `set` was initialised in `new`; sigwait writes only `signal`.
        let rc = unsafe { libc::sigwait(&self.set, &mut signal) };
        if rc != 0 {
            return Err(os_error("sigwait", io::Error::from_raw_os_error(rc)));
        }
        Ok(signal)
    }
}

/// Owns the signal disposition of the process once startup is complete.
pub struct SignalStateMachine<W> {
    disposition: SignalDisposition,
    waiter: W,
    observer: Arc<dyn ChildExitObserver>,
}

impl SignalStateMachine<SigwaitWaiter> {
    /// Install the SIGCHLD handler and block the handled signals on the
    /// calling thread.
    ///
    /// Call before any other thread is spawned so every later thread
    /// inherits the mask.
    pub fn block(observer: Arc<dyn ChildExitObserver>) -> Result<Self, SignalError> {
        install_sigchld_handler()?;
        let waiter = SigwaitWaiter::new(&HANDLED_SIGNALS)?;
        set_thread_mask(libc::SIG_BLOCK, &waiter.set)?;
        tracing::debug!("Handled signals blocked");
        Ok(Self::with_waiter(waiter, observer))
    }
}

impl<W: SignalWaiter> SignalStateMachine<W> {
    /// A machine in the `Blocked` state reading from `waiter`.
    pub fn with_waiter(waiter: W, observer: Arc<dyn ChildExitObserver>) -> Self {
        Self {
            disposition: SignalDisposition::Blocked,
            waiter,
            observer,
        }
    }

    pub fn disposition(&self) -> SignalDisposition {
        self.disposition
    }

    /// Wait for one signal and apply its transition.
    pub fn step(&mut self) -> Result<SignalDisposition, SignalError> {
        if let SignalDisposition::Terminating(_) = self.disposition {
            return Ok(self.disposition);
        }

        let signal = self.waiter.wait()?;
        metrics::record_signal(signal_name(signal));
        match signal {
            libc::SIGCHLD => {
                self.observer.notify_sigchld();
            }
            libc::SIGINT | libc::SIGQUIT | libc::SIGTERM => {
                tracing::info!(signal = signal_name(signal), "Termination signal received");
                self.disposition = SignalDisposition::Terminating(signal);
            }
            other => {
                tracing::warn!(signal = other, "Unexpected signal ignored");
            }
        }
        Ok(self.disposition)
    }

    /// Step until a termination signal arrives and return it.
    pub fn wait_for_termination(&mut self) -> Result<c_int, SignalError> {
        loop {
            if let SignalDisposition::Terminating(signal) = self.step()? {
                return Ok(signal);
            }
        }
    }

    /// Run for the rest of the process lifetime.
    ///
    /// After a termination signal: run `cleanup`. If it returns an exit
    /// status, hand that back. Otherwise unblock, restore the default
    /// action and re-raise so the process exits with that signal.
    pub fn run<T>(mut self, cleanup: impl FnOnce() -> Option<T>) -> Result<T, SignalError> {
        let signal = self.wait_for_termination()?;
        match cleanup() {
            Some(status) => Ok(status),
            None => Err(terminate(signal)),
        }
    }
}

/// Re-raise `signal` with its default action. Returns only on failure.
pub fn terminate(signal: c_int) -> SignalError {
    if let Err(e) = clear_signal_mask() {
        return e;
    }
    if let Err(e) = restore_default(signal) {
        return e;
    }
    tracing::info!(signal = signal_name(signal), "Exiting");
    // SAFETY: sending a signal to our own pid has no memory-safety impact.
    if unsafe { libc::kill(libc::getpid(), signal) } != 0 {
        return os_error("kill", io::Error::last_os_error());
    }
    // Delivery to another thread may lag behind the return from kill.
    std::thread::sleep(std::time::Duration::from_secs(1));
    SignalError::Survived(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted(VecDeque<c_int>);

    impl SignalWaiter for Scripted {
        fn wait(&mut self) -> Result<c_int, SignalError> {
            self.0
                .pop_front()
                .ok_or_else(|| os_error("sigwait", io::Error::from(io::ErrorKind::UnexpectedEof)))
        }
    }

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl ChildExitObserver for CountingObserver {
        fn notify_sigchld(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn machine(signals: &[c_int]) -> (SignalStateMachine<Scripted>, Arc<CountingObserver>) {
        let observer = Arc::new(CountingObserver::default());
        let machine = SignalStateMachine::with_waiter(Scripted(signals.iter().copied().collect()), observer.clone());
        (machine, observer)
    }

    #[test]
    fn test_sigchld_notifies_once_and_stays_blocked() {
        let (mut machine, observer) = machine(&[libc::SIGCHLD, libc::SIGCHLD]);
        assert_eq!(machine.step().unwrap(), SignalDisposition::Blocked);
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
        assert_eq!(machine.step().unwrap(), SignalDisposition::Blocked);
        assert_eq!(observer.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_termination_signals() {
        for signal in [libc::SIGINT, libc::SIGQUIT, libc::SIGTERM] {
            let (mut machine, observer) = machine(&[signal]);
            assert_eq!(machine.step().unwrap(), SignalDisposition::Terminating(signal));
            assert_eq!(observer.0.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_other_signal_ignored() {
        let (mut machine, observer) = machine(&[libc::SIGUSR1, libc::SIGCHLD, libc::SIGTERM]);
        assert_eq!(machine.wait_for_termination().unwrap(), libc::SIGTERM);
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_returns_status_from_cleanup() {
        let (machine, observer) = machine(&[libc::SIGCHLD, libc::SIGTERM]);
        let mut cleaned = 0;
        let status = machine.run(|| {
            cleaned += 1;
            Some(3u8)
        });
        assert_eq!(status.unwrap(), 3);
        assert_eq!(cleaned, 1);
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminating_is_final() {
        let (mut machine, _) = machine(&[libc::SIGTERM, libc::SIGCHLD]);
        machine.step().unwrap();
        assert_eq!(machine.step().unwrap(), SignalDisposition::Terminating(libc::SIGTERM));
    }

    #[test]
    fn test_sigwait_receives_pending_signal() {
        // Blocks SIGUSR2 on this test thread only and raises it at the thread.
        let mut waiter = SigwaitWaiter::new(&[libc::SIGUSR2]).unwrap();
        set_thread_mask(libc::SIG_BLOCK, &waiter.set).unwrap();
        unsafe { libc::pthread_kill(libc::pthread_self(), libc::SIGUSR2) };
        assert_eq!(waiter.wait().unwrap(), libc::SIGUSR2);
        set_thread_mask(libc::SIG_UNBLOCK, &waiter.set).unwrap();
    }
}
