//! Scheduled maintenance commands.
//!
//! # Data Flow
//! ```text
//! Bootstrap:
//!     context.add_command(cmd) → ScheduledCommands (append)
//!
//! Running:
//!     ScheduledCommands::spawn_all(shutdown)
//!         → one tick loop per command
//!         → sleep(period) → execute()
//!         → false: loop ends; shutdown broadcast: loop ends
//! ```
//!
//! # Design Decisions
//! - Commands tick independently of request handling and of each other
//! - `execute` runs on a runtime worker; a command that blocks stalls that
//!   worker, so commands must only do short local work
//! - No catch-up: a late tick is not followed by extra ticks

pub mod command;

pub use command::{DeferredCommand, PeriodicCommand, ScheduledCommand};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Commands registered during bootstrap.
#[derive(Default)]
pub struct ScheduledCommands {
    commands: Vec<Box<dyn ScheduledCommand>>,
}

impl ScheduledCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, command: Box<dyn ScheduledCommand>) {
        tracing::debug!(command = command.name(), period = ?command.period(), "Scheduled command added");
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name().to_string()).collect()
    }

    /// Start a tick loop per command. Must be called inside the runtime.
    pub fn spawn_all(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        self.commands
            .into_iter()
            .map(|command| tokio::spawn(run_command(command, shutdown.subscribe())))
            .collect()
    }
}

impl std::fmt::Debug for ScheduledCommands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledCommands")
            .field("commands", &self.names())
            .finish()
    }
}

async fn run_command(mut command: Box<dyn ScheduledCommand>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(command.period()) => {
                if !command.execute() {
                    tracing::debug!(command = command.name(), "Scheduled command finished");
                    break;
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!(command = command.name(), "Scheduled command stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_command_stops_when_execute_returns_false() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut commands = ScheduledCommands::new();
        commands.add_command(Box::new(PeriodicCommand::new("count", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst) + 1 < 3
        })));

        let shutdown = Shutdown::new();
        for handle in commands.spawn_all(&shutdown) {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deferred_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut commands = ScheduledCommands::new();
        commands.add_command(Box::new(DeferredCommand::new("once", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let shutdown = Shutdown::new();
        for handle in commands.spawn_all(&shutdown) {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_commands() {
        let mut commands = ScheduledCommands::new();
        commands.add_command(Box::new(PeriodicCommand::new("forever", Duration::from_secs(3600), || true)));
        assert_eq!(commands.names(), vec!["forever".to_string()]);

        let shutdown = Shutdown::new();
        let handles = commands.spawn_all(&shutdown);
        shutdown.trigger();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        }
    }
}
