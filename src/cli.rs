//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// MCP Hangar — control-plane gateway multiplexing MCP clients onto a fleet
/// of backend providers.
#[derive(Parser, Debug)]
#[command(name = "mcp-hangar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file (YAML). Falls back to
    /// `MCP_HANGAR_CONFIG`, the user config directory, then
    /// `./mcp-hangar.yaml` in the current directory.
    #[arg(short, long, env = "MCP_HANGAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Which client-facing transport to serve.
    #[arg(long, value_enum, default_value_t = CliTransport::Stdio, env = "MCP_HANGAR_TRANSPORT")]
    pub transport: CliTransport,

    /// Port to listen on (HTTP transport only); overrides the config file.
    #[arg(short, long, env = "MCP_HANGAR_PORT")]
    pub port: Option<u16>,

    /// Host to bind to (HTTP transport only); overrides the config file.
    #[arg(long, env = "MCP_HANGAR_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MCP_HANGAR_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json).
    #[arg(long, env = "MCP_HANGAR_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// `--transport` choices, mirroring [`crate::gateway::TransportKind`] (kept
/// separate so clap's derive owns the CLI-facing enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliTransport {
    /// Newline-delimited JSON-RPC over stdin/stdout (default).
    Stdio,
    /// Streamable HTTP at `/mcp`, plus `/health/*` and `/metrics`.
    Http,
}
