//! Integration tests for the Terraform MCP server.
//!
//! These tests run the server end-to-end: tool calls go through the real
//! dispatch and invoker against a fake `terraform` binary (a shell script
//! that records its arguments), and MCP sessions are driven over in-memory
//! pipes. Shell-script fixtures keep the whole file Unix-only.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use terraform_mcp::guardrails::Guard;
use terraform_mcp::invoker::{InvokeError, Operation, Parameters, TerraformInvoker};
use terraform_mcp::transport;

/// Writes an executable `terraform` stand-in into `dir` and returns its path.
///
/// The script body runs with the invocation's working directory as its cwd,
/// so `printf '%s\n' "$@" > args.txt` records the argument vector next to
/// the Terraform files.
fn write_fake_terraform(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("terraform");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn recorded_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("args.txt"))
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[tokio::test]
async fn test_validate_end_to_end() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf '%s\\n' \"$@\" > args.txt\nprintf 'ok\\n'");
    let invoker = TerraformInvoker::new(bin.to_str().unwrap());

    let result = invoker
        .invoke(Operation::Validate, &Parameters::default(), dir.path())
        .await
        .unwrap();

    assert!(result.succeeded);
    assert_eq!(result.stdout, "ok\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, 0);
    assert_eq!(recorded_args(dir.path()), vec!["validate"]);
}

#[tokio::test]
async fn test_apply_flags_reach_the_binary() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf '%s\\n' \"$@\" > args.txt");
    let invoker = TerraformInvoker::new(bin.to_str().unwrap());

    let params = Parameters {
        auto_approve: true,
        var_file: Some("prod.tfvars".to_string()),
        vars: vec![("env".to_string(), "prod".to_string())],
        ..Default::default()
    };
    invoker
        .invoke(Operation::Apply, &params, dir.path())
        .await
        .unwrap();

    assert_eq!(
        recorded_args(dir.path()),
        vec![
            "apply",
            "-auto-approve",
            "-var-file",
            "prod.tfvars",
            "-var",
            "env=prod"
        ]
    );
}

#[tokio::test]
async fn test_workspace_select_positional_name() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(
        dir.path(),
        "printf '%s\\n' \"$@\" > args.txt\nprintf 'Switched to workspace \"staging\".\\n'",
    );
    let invoker = TerraformInvoker::new(bin.to_str().unwrap());

    let params = Parameters {
        workspace: Some("staging".to_string()),
        ..Default::default()
    };
    let result = invoker
        .invoke(Operation::WorkspaceSelect, &params, dir.path())
        .await
        .unwrap();

    assert!(result.succeeded);
    assert_eq!(recorded_args(dir.path()), vec!["workspace", "select", "staging"]);
}

#[tokio::test]
async fn test_failed_run_preserves_both_streams() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(
        dir.path(),
        "printf 'partial plan\\n'\nprintf 'error: bad config\\n' >&2\nexit 1",
    );
    let invoker = TerraformInvoker::new(bin.to_str().unwrap());

    let result = invoker
        .invoke(Operation::Plan, &Parameters::default(), dir.path())
        .await
        .unwrap();

    assert!(!result.succeeded);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.stdout, "partial plan\n");
    assert_eq!(result.stderr, "error: bad config\n");
}

#[tokio::test]
async fn test_missing_binary_is_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let invoker = TerraformInvoker::new(dir.path().join("no-such-terraform").to_str().unwrap());

    let err = invoker
        .invoke(Operation::Validate, &Parameters::default(), dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, InvokeError::SpawnFailure { .. }));
}

// MCP session tests: drive the JSON-RPC loop over in-memory pipes.

async fn send_line(writer: &mut (impl AsyncWrite + Unpin), msg: Value) {
    let mut bytes = serde_json::to_vec(&msg).unwrap();
    bytes.push(b'\n');
    writer.write_all(&bytes).await.unwrap();
    writer.flush().await.unwrap();
}

/// A server running on an in-memory pipe, plus the client's half of it.
struct McpSession {
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    reader: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl McpSession {
    fn start(terraform_bin: &str, project_dir: &Path, allow_destructive: bool) -> Self {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, client_write) = tokio::io::split(client);

        let invoker = TerraformInvoker::new(terraform_bin);
        let guard = Arc::new(Guard::new(vec![], allow_destructive).unwrap());
        let project_dir = project_dir.to_path_buf();

        let server = tokio::spawn(async move {
            transport::serve(server_read, server_write, &invoker, guard, &project_dir).await
        });

        Self {
            writer: client_write,
            reader: BufReader::new(client_read).lines(),
            server,
        }
    }

    async fn request(&mut self, msg: Value) -> Value {
        send_line(&mut self.writer, msg).await;
        let line = tokio::time::timeout(Duration::from_secs(10), self.reader.next_line())
            .await
            .expect("server reply timed out")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn notify(&mut self, msg: Value) {
        send_line(&mut self.writer, msg).await;
    }

    async fn shutdown(mut self) {
        // Half-close the duplex stream so the server sees EOF; dropping the
        // WriteHalf alone leaves the stream open through the reader.
        self.writer.shutdown().await.unwrap();
        self.server.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_mcp_session_handshake_and_tool_call() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf 'ok\\n'");
    let mut session = McpSession::start(bin.to_str().unwrap(), dir.path(), false);

    let init = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {} }
        }))
        .await;
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(init["result"]["serverInfo"]["name"], "terraform-mcp");

    session
        .notify(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .await;

    let tools = session
        .request(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await;
    let listed = tools["result"]["tools"].as_array().unwrap();
    assert_eq!(listed.len(), 8);

    // No working_dir in the call: the server's project directory applies.
    let call = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "terraform_validate", "arguments": {} }
        }))
        .await;
    assert_eq!(call["id"], 3);
    assert_eq!(call["result"]["content"][0]["text"], "ok\n");
    assert!(call["result"].get("isError").is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn test_mcp_unknown_method_and_unknown_tool() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf 'ok\\n'");
    let mut session = McpSession::start(bin.to_str().unwrap(), dir.path(), false);

    let resp = session
        .request(json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }))
        .await;
    assert_eq!(resp["error"]["code"], -32601);

    let resp = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "tools/call",
            "params": { "name": "terraform_graph", "arguments": {} }
        }))
        .await;
    assert_eq!(resp["error"]["code"], -32603);
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unsupported operation"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_mcp_malformed_tool_call_params() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf 'ok\\n'");
    let mut session = McpSession::start(bin.to_str().unwrap(), dir.path(), false);

    // No params at all.
    let resp = session
        .request(json!({ "jsonrpc": "2.0", "id": 9, "method": "tools/call" }))
        .await;
    assert_eq!(resp["error"]["code"], -32602);

    // Params present but the tool name has the wrong type.
    let resp = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 10,
            "method": "tools/call",
            "params": { "name": 42 }
        }))
        .await;
    assert_eq!(resp["error"]["code"], -32602);
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Invalid params"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_mcp_destructive_tool_denied_by_default() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf 'applied\\n'");
    let mut session = McpSession::start(bin.to_str().unwrap(), dir.path(), false);

    let resp = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {
                "name": "terraform_apply",
                "arguments": { "auto_approve": true }
            }
        }))
        .await;
    assert_eq!(resp["error"]["code"], -32603);
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Destructive operation"));

    session.shutdown().await;
}

#[tokio::test]
async fn test_mcp_failed_run_is_result_not_error() {
    let dir = TempDir::new().unwrap();
    let bin = write_fake_terraform(dir.path(), "printf 'error: no backend\\n' >&2\nexit 1");
    let mut session = McpSession::start(bin.to_str().unwrap(), dir.path(), false);

    let resp = session
        .request(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": { "name": "terraform_init", "arguments": {} }
        }))
        .await;

    // The run failed, but at the protocol level this is a result, not an error.
    assert!(resp.get("error").is_none());
    assert_eq!(resp["result"]["isError"], true);
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("exited with code 1"));
    assert!(text.contains("error: no backend"));

    session.shutdown().await;
}
