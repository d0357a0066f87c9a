//! Terraform Model Context Protocol (MCP) Server
//!
//! This binary exposes a fixed set of Terraform CLI operations as MCP tools.
//! It speaks the MCP protocol over stdio and shells out to the Terraform
//! binary for each tool call; stdout carries protocol messages only, so all
//! logging goes to stderr.

use std::sync::Arc;

use clap::Parser;

use terraform_mcp::config::Config;
use terraform_mcp::guardrails::Guard;
use terraform_mcp::invoker::TerraformInvoker;
use terraform_mcp::transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // --debug raises the default filter; RUST_LOG still wins when set.
    let default_filter = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!("Starting Terraform MCP server...");

    let invoker = TerraformInvoker::new(config.terraform_bin.clone());
    let guard = Arc::new(Guard::new(
        config.allowed_roots.clone(),
        config.allow_destructive,
    )?);

    transport::run_stdio_loop(&invoker, guard, &config.project_dir).await?;

    log::info!("MCP client disconnected, shutting down");
    Ok(())
}
