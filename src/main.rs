//! Session gateway.
//!
//! A web front end that authenticates users, launches one backend session
//! process per user, and proxies browser traffic to it.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                 SESSION GATEWAY                   │
//!                      │                                                   │
//!  Browser request     │  ┌─────────┐   ┌────────────┐   ┌─────────────┐  │
//!  ────────────────────┼─▶│  http   │──▶│  routing   │──▶│   handler   │  │
//!                      │  │ server  │   │ RouteTable │   │  (adapted)  │  │
//!                      │  └─────────┘   └────────────┘   └──────┬──────┘  │
//!                      │                                        │         │
//!                      │            ┌──────────┐        ┌───────▼──────┐  │
//!                      │            │   auth   │◀───────│  secured     │  │
//!                      │            │ registry │        │  adapter     │  │
//!                      │            └──────────┘        └───────┬──────┘  │
//!                      │                                        ▼         │
//!  Response            │                               ┌──────────────┐   │   per-user
//!  ◀───────────────────┼───────────────────────────────│   session    │◀──┼── session
//!                      │                               │   proxy      │   │   process
//!                      │                               └──────────────┘   │
//!                      │                                                   │
//!                      │  main thread: lifecycle bootstrap, then sigwait   │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::panic;
use std::process::ExitCode;

use session_gateway::lifecycle::posix;
use session_gateway::lifecycle::{BootstrapOutcome, GatewayStopped, LifecycleController, SystemBootstrap};

fn run() -> ExitCode {
    let controller = LifecycleController::new(SystemBootstrap::new(std::env::args_os()));
    match controller.run() {
        Ok(BootstrapOutcome::Exit(code)) => ExitCode::from(code),
        Ok(BootstrapOutcome::Running(gateway)) => match gateway.wait() {
            GatewayStopped::ServerFailed => {
                tracing::error!("Gateway stopped after HTTP server failure");
                eprintln!("session-gateway: {}", GatewayStopped::ServerFailed);
                ExitCode::FAILURE
            }
            GatewayStopped::Signals(error) => {
                tracing::error!(error = %error, "Signal handling failed");
                eprintln!("session-gateway: {}", error);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(phase = %e.phase, error = %e.source, "Startup failed");
            eprintln!("session-gateway: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    if let Err(e) = posix::ignore_sigpipe() {
        eprintln!("session-gateway: {}", e);
        return ExitCode::FAILURE;
    }

    match panic::catch_unwind(run) {
        Ok(code) => code,
        Err(_) => {
            tracing::error!("Unhandled panic during startup");
            ExitCode::FAILURE
        }
    }
}
