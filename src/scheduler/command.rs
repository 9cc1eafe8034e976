//! Command types run by the scheduler.

use std::time::Duration;

/// A task the transport engine ticks on its own cadence.
pub trait ScheduledCommand: Send + 'static {
    fn name(&self) -> &str;

    /// Delay before the next execution.
    fn period(&self) -> Duration;

    /// Run once. Returning false removes the command.
    fn execute(&mut self) -> bool;
}

/// Runs an action every `period` until it returns false.
pub struct PeriodicCommand {
    name: String,
    period: Duration,
    action: Box<dyn FnMut() -> bool + Send>,
}

impl PeriodicCommand {
    pub fn new<F>(name: impl Into<String>, period: Duration, action: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            action: Box::new(action),
        }
    }
}

impl ScheduledCommand for PeriodicCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn execute(&mut self) -> bool {
        (self.action)()
    }
}

/// Runs an action once after `delay`.
pub struct DeferredCommand {
    name: String,
    delay: Duration,
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl DeferredCommand {
    pub fn new<F>(name: impl Into<String>, delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            delay,
            action: Some(Box::new(action)),
        }
    }
}

impl ScheduledCommand for DeferredCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Duration {
        self.delay
    }

    fn execute(&mut self) -> bool {
        if let Some(action) = self.action.take() {
            action();
        }
        false
    }
}
