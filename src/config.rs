use std::path::PathBuf;

use clap::Parser;

/// Configuration for the Terraform MCP server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Terraform binary to run. If not a path, it is resolved from PATH.
    #[arg(long, default_value = "terraform")]
    pub terraform_bin: String,

    /// Directory containing Terraform files, used when a tool call carries
    /// no working_dir of its own.
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Root directory tool calls may operate under. Repeatable. When absent,
    /// any existing directory is allowed.
    #[arg(long = "allow-dir", value_name = "DIR")]
    pub allowed_roots: Vec<PathBuf>,

    /// Permit apply and destroy. Off by default.
    #[arg(long)]
    pub allow_destructive: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}
