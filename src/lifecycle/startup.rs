//! Startup orchestration.
//!
//! # Responsibilities
//! - Walk the bootstrap phases in their fixed order
//! - Stop at the first failure and report the phase it happened in
//! - Hand back either an early exit code or the running gateway
//!
//! # Design Decisions
//! - Fail fast: any phase error is fatal
//! - Phases run on the main thread before any other thread exists
//! - The phase actions sit behind [`BootstrapActions`] so the ordering can be
//!   exercised without forking, binding or changing credentials

use std::fmt;

/// Error type carried out of a phase action.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bootstrap phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootstrapPhase {
    OptionsLoaded,
    Daemonized,
    EnvironmentDetected,
    ResourceLimitsSet,
    WorkingDirSet,
    CryptoInitialized,
    SecurityModulesInitialized,
    HandlersRegistered,
    PrivilegeDropped,
    Running,
}

impl BootstrapPhase {
    pub const ALL: [BootstrapPhase; 10] = [
        BootstrapPhase::OptionsLoaded,
        BootstrapPhase::Daemonized,
        BootstrapPhase::EnvironmentDetected,
        BootstrapPhase::ResourceLimitsSet,
        BootstrapPhase::WorkingDirSet,
        BootstrapPhase::CryptoInitialized,
        BootstrapPhase::SecurityModulesInitialized,
        BootstrapPhase::HandlersRegistered,
        BootstrapPhase::PrivilegeDropped,
        BootstrapPhase::Running,
    ];

    /// The phase after this one.
    pub fn next(self) -> Option<BootstrapPhase> {
        let index = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(index + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapPhase::OptionsLoaded => "options_loaded",
            BootstrapPhase::Daemonized => "daemonized",
            BootstrapPhase::EnvironmentDetected => "environment_detected",
            BootstrapPhase::ResourceLimitsSet => "resource_limits_set",
            BootstrapPhase::WorkingDirSet => "working_dir_set",
            BootstrapPhase::CryptoInitialized => "crypto_initialized",
            BootstrapPhase::SecurityModulesInitialized => "security_modules_initialized",
            BootstrapPhase::HandlersRegistered => "handlers_registered",
            BootstrapPhase::PrivilegeDropped => "privilege_dropped",
            BootstrapPhase::Running => "running",
        }
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("phase {requested} entered out of order (expected {})", .expected.map(|p| p.as_str()).unwrap_or("none"))]
pub struct PhaseOrderError {
    pub expected: Option<BootstrapPhase>,
    pub requested: BootstrapPhase,
}

/// Enforces that every phase is entered once, in order.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    current: Option<BootstrapPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<BootstrapPhase> {
        self.current
    }

    pub fn enter(&mut self, phase: BootstrapPhase) -> Result<(), PhaseOrderError> {
        let expected = match self.current {
            None => Some(BootstrapPhase::OptionsLoaded),
            Some(current) => current.next(),
        };
        if expected != Some(phase) {
            return Err(PhaseOrderError {
                expected,
                requested: phase,
            });
        }
        self.current = Some(phase);
        Ok(())
    }
}

/// A failed bootstrap.
#[derive(Debug, thiserror::Error)]
#[error("startup failed in phase {phase}: {source}")]
pub struct BootstrapError {
    pub phase: BootstrapPhase,
    #[source]
    pub source: BoxError,
}

/// How bootstrap ended.
#[derive(Debug)]
pub enum BootstrapOutcome<R> {
    /// Exit the process with this code (help text, installation check).
    Exit(u8),
    /// The gateway is serving.
    Running(R),
}

/// One action per phase, called in [`BootstrapPhase`] order.
pub trait BootstrapActions {
    type Running;

    /// `Some(code)` ends bootstrap with that exit code.
    fn load_options(&mut self) -> Result<Option<u8>, BoxError>;
    fn daemonize(&mut self) -> Result<(), BoxError>;
    fn detect_environment(&mut self) -> Result<(), BoxError>;
    fn set_resource_limits(&mut self) -> Result<(), BoxError>;
    fn set_working_dir(&mut self) -> Result<(), BoxError>;
    fn initialize_crypto(&mut self) -> Result<(), BoxError>;
    fn initialize_security_modules(&mut self) -> Result<(), BoxError>;
    fn register_handlers(&mut self) -> Result<(), BoxError>;
    fn drop_privilege(&mut self) -> Result<(), BoxError>;
    fn start(&mut self) -> Result<BootstrapOutcome<Self::Running>, BoxError>;
}

/// Drives a [`BootstrapActions`] implementation through the phases.
pub struct LifecycleController<A> {
    actions: A,
    tracker: PhaseTracker,
}

impl<A: BootstrapActions> LifecycleController<A> {
    pub fn new(actions: A) -> Self {
        Self {
            actions,
            tracker: PhaseTracker::new(),
        }
    }

    fn phase<T>(
        &mut self,
        phase: BootstrapPhase,
        action: impl FnOnce(&mut A) -> Result<T, BoxError>,
    ) -> Result<T, BootstrapError> {
        self.tracker.enter(phase).map_err(|e| BootstrapError {
            phase,
            source: Box::new(e),
        })?;
        tracing::debug!(phase = %phase, "Entering bootstrap phase");
        action(&mut self.actions).map_err(|source| BootstrapError { phase, source })
    }

    /// Run every phase. Stops at the first failure.
    pub fn run(mut self) -> Result<BootstrapOutcome<A::Running>, BootstrapError> {
        if let Some(code) = self.phase(BootstrapPhase::OptionsLoaded, A::load_options)? {
            return Ok(BootstrapOutcome::Exit(code));
        }
        self.phase(BootstrapPhase::Daemonized, A::daemonize)?;
        self.phase(BootstrapPhase::EnvironmentDetected, A::detect_environment)?;
        self.phase(BootstrapPhase::ResourceLimitsSet, A::set_resource_limits)?;
        self.phase(BootstrapPhase::WorkingDirSet, A::set_working_dir)?;
        self.phase(BootstrapPhase::CryptoInitialized, A::initialize_crypto)?;
        self.phase(BootstrapPhase::SecurityModulesInitialized, A::initialize_security_modules)?;
        self.phase(BootstrapPhase::HandlersRegistered, A::register_handlers)?;
        self.phase(BootstrapPhase::PrivilegeDropped, A::drop_privilege)?;
        let outcome = self.phase(BootstrapPhase::Running, A::start)?;
        tracing::debug!("Bootstrap complete");
        Ok(outcome)
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }
}
