//! MCP Hangar — control-plane gateway in front of a fleet of MCP providers.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_hangar::cli::{Cli, CliTransport};
use mcp_hangar::config::Config;
use mcp_hangar::gateway::{Gateway, ShutdownReason, TransportKind};
use mcp_hangar::setup_tracing;

/// Process exit codes.
mod exit_code {
    use std::process::ExitCode;

    pub const SUCCESS: ExitCode = ExitCode::SUCCESS;
    pub const USER_ERROR: ExitCode = ExitCode::from(1);
    pub const SYSTEM_ERROR: ExitCode = ExitCode::from(2);
    pub const INTERRUPTED: ExitCode = ExitCode::from(130);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up logging: {e}");
        return exit_code::USER_ERROR;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return exit_code::USER_ERROR;
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }

    let transport = match cli.transport {
        CliTransport::Stdio => TransportKind::Stdio,
        CliTransport::Http => TransportKind::Http,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        providers = config.providers.len(),
        transport = ?cli.transport,
        "starting MCP Hangar"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("failed to construct gateway: {e}");
            return exit_code::USER_ERROR;
        }
    };

    match gateway.run(transport).await {
        Ok(ShutdownReason::Completed) => {
            info!("gateway shutdown complete");
            exit_code::SUCCESS
        }
        Ok(ShutdownReason::Interrupted) => {
            info!("gateway interrupted");
            exit_code::INTERRUPTED
        }
        Err(e) => {
            error!("gateway error: {e}");
            exit_code::SYSTEM_ERROR
        }
    }
}
