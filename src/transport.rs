use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::guardrails::Guard;
use crate::invoker::TerraformInvoker;
use crate::tools;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "method")]
enum JsonRpcRequest {
    #[serde(rename = "initialize")]
    Initialize { id: Value, params: Value },
    #[serde(rename = "notifications/initialized")]
    Initialized,
    #[serde(rename = "tools/list")]
    ToolsList { id: Value },
    #[serde(rename = "tools/call")]
    ToolsCall { id: Value, params: ToolCallParams },
}

#[derive(Serialize, Deserialize, Debug)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Runs the MCP server over stdin/stdout until the client disconnects.
pub async fn run_stdio_loop(
    invoker: &TerraformInvoker,
    guard: Arc<Guard>,
    project_dir: &Path,
) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve(stdin, stdout, invoker, guard, project_dir).await
}

/// The line-delimited JSON-RPC 2.0 loop, generic over the byte streams so
/// tests can drive it with in-memory pipes.
pub async fn serve<R, W>(
    input: R,
    output: W,
    invoker: &TerraformInvoker,
    guard: Arc<Guard>,
    project_dir: &Path,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input).lines();
    let mut output = output;

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        log::debug!("Received MCP message: {}", line);

        let msg: Value = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("Failed to parse message: {}", e);
                continue;
            }
        };

        match serde_json::from_value::<JsonRpcRequest>(msg.clone()) {
            Ok(JsonRpcRequest::Initialize { id, .. }) => {
                let resp = result_response(
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "serverInfo": {
                            "name": "terraform-mcp",
                            "version": env!("CARGO_PKG_VERSION")
                        },
                        "capabilities": {
                            "tools": {}
                        }
                    }),
                );
                write_message(&mut output, &resp).await?;
            }
            Ok(JsonRpcRequest::Initialized) => {
                log::info!("MCP client initialized");
            }
            Ok(JsonRpcRequest::ToolsList { id }) => {
                let resp = result_response(id, json!({ "tools": tools::list_tools() }));
                write_message(&mut output, &resp).await?;
            }
            Ok(JsonRpcRequest::ToolsCall { id, params }) => {
                log::info!("Calling tool: {}", params.name);
                let resp = match tools::handle_tool_call(
                    &params.name,
                    params.arguments,
                    invoker,
                    &guard,
                    project_dir,
                )
                .await
                {
                    Ok(result) => result_response(id, result),
                    Err(e) => error_response(id, -32603, &e.to_string()),
                };
                write_message(&mut output, &resp).await?;
            }
            Err(_) => {
                // A known method only lands here when its params are missing
                // or malformed; anything else is method-not-found. Unknown
                // notifications (no id) are ignored per JSON-RPC.
                if let Some(id) = msg.get("id") {
                    let method = msg
                        .get("method")
                        .and_then(|m| m.as_str())
                        .unwrap_or("<missing>");
                    let resp = if matches!(method, "initialize" | "tools/list" | "tools/call") {
                        log::warn!("Invalid params for method: {}", method);
                        error_response(
                            id.clone(),
                            -32602,
                            &format!("Invalid params for {}", method),
                        )
                    } else {
                        log::warn!("Unknown method: {}", method);
                        error_response(
                            id.clone(),
                            -32601,
                            &format!("Method not found: {}", method),
                        )
                    };
                    write_message(&mut output, &resp).await?;
                }
            }
        }
    }
    Ok(())
}

fn result_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

async fn write_message<W>(output: &mut W, resp: &Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = serde_json::to_vec(resp)?;
    out.push(b'\n');
    output.write_all(&out).await?;
    output.flush().await?;
    Ok(())
}
