use clap::{Parser, Subcommand};

#[derive(Parser, Clone)]
#[command(name = "campaign-mcp")]
#[command(about = "MCP bridge exposing campaign performance data over JSON-RPC WebSockets")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output (-q)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the MCP bridge server
    Serve {
        /// Bind host (overrides MCP_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides MCP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Request a bearer token from a running bridge
    ///
    /// Examples:
    ///   campaign-mcp token claude
    ///   campaign-mcp token claude --scope campaigns:read --scope metrics:read
    Token {
        /// Client id to issue for
        client_id: String,

        /// Bridge base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,

        /// Requested scope entries (repeatable; defaults to the client's ceiling)
        #[arg(long)]
        scope: Vec<String>,
    },

    /// Print the effective configuration and validation results
    Info,
}
