//! Command-line options.
//!
//! The command line names the config file and overrides a handful of its
//! values. Help, version and usage errors end the program before any other
//! startup work happens.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{finalize_config, load_config, ConfigError};
use crate::config::schema::GatewayConfig;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/session-gateway/gateway.toml";

#[derive(Parser, Debug)]
#[command(name = "session-gateway")]
#[command(version, about = "Front-end gateway for per-user backend sessions", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Run a one-shot installation check and exit
    #[arg(long)]
    pub verify_installation: bool,

    /// Serve the offline handler set
    #[arg(long)]
    pub offline: bool,

    /// Detach from the controlling terminal
    #[arg(long)]
    pub daemonize: Option<bool>,

    #[arg(long)]
    pub www_address: Option<String>,

    #[arg(long)]
    pub www_port: Option<u16>,

    /// Drop privileges to this user after startup
    #[arg(long)]
    pub run_as_user: Option<String>,

    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    #[arg(long)]
    pub thread_pool_size: Option<usize>,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.offline {
            config.server.offline = true;
        }
        if let Some(daemonize) = self.daemonize {
            config.server.daemonize = daemonize;
        }
        if let Some(ref address) = self.www_address {
            config.server.www_address = address.clone();
        }
        if let Some(port) = self.www_port {
            config.server.www_port = port;
        }
        if let Some(ref user) = self.run_as_user {
            config.server.run_as_user = Some(user.clone());
        }
        if let Some(ref dir) = self.working_dir {
            config.server.working_dir = dir.clone();
        }
        if let Some(size) = self.thread_pool_size {
            config.server.thread_pool_size = size;
        }
    }
}

/// Everything startup needs from the command line and config file.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub config: GatewayConfig,
    pub config_path: PathBuf,
    pub verify_installation: bool,
}

/// Outcome of reading the program options.
#[derive(Debug)]
pub enum ProgramStatus {
    /// Continue starting up.
    Run(Box<GatewayOptions>),
    /// Stop now with this exit code (help, version, usage error).
    Exit(u8),
}

/// Parse the command line, load the config file and apply overrides.
pub fn read_options<I, T>(args: I) -> Result<ProgramStatus, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return Ok(ProgramStatus::Exit(e.exit_code() as u8));
        }
    };

    let mut config = load_config(&cli.config)?;
    cli.apply(&mut config);
    let config = finalize_config(config)?;

    Ok(ProgramStatus::Run(Box::new(GatewayOptions {
        config,
        config_path: cli.config,
        verify_installation: cli.verify_installation,
    })))
}
