use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::guardrails::Guard;
use crate::invoker::{InvocationResult, InvokeError, Operation, Parameters, TerraformInvoker};

/// Dispatches one `tools/call` request.
///
/// Resolves the tool name to an operation, builds its [`Parameters`] from the
/// JSON arguments, applies the guard checks, and invokes Terraform. The `Ok`
/// value is the MCP tool-call result content; a failed Terraform run is an
/// `Ok` with `isError` set, while an `Err` is a fault that never produced a
/// result (unknown tool, denied directory, missing binary, ...).
pub async fn handle_tool_call(
    name: &str,
    args: Value,
    invoker: &TerraformInvoker,
    guard: &Guard,
    default_dir: &Path,
) -> anyhow::Result<Value> {
    let (operation, params) = match name {
        "terraform_init" => (Operation::Init, init_params(&args)?),
        "terraform_plan" => (Operation::Plan, plan_params(&args)?),
        "terraform_apply" => (Operation::Apply, apply_destroy_params(&args)?),
        "terraform_destroy" => (Operation::Destroy, apply_destroy_params(&args)?),
        "terraform_validate" => (Operation::Validate, Parameters::default()),
        "terraform_show" => (Operation::Show, show_params(&args)),
        "terraform_workspace_list" => (Operation::WorkspaceList, Parameters::default()),
        "terraform_workspace_select" => (Operation::WorkspaceSelect, select_params(&args)),
        _ => return Err(InvokeError::UnsupportedOperation(name.to_string()).into()),
    };

    guard.check_operation(operation)?;

    let working_dir = resolve_working_dir(&args, default_dir);
    guard.check_dir(&working_dir)?;

    let result = invoker.invoke(operation, &params, &working_dir).await?;
    Ok(render_result(operation, &result))
}

fn init_params(args: &Value) -> anyhow::Result<Parameters> {
    Ok(Parameters {
        backend_config: extract_pairs(args, "backend_config")?,
        ..Default::default()
    })
}

fn plan_params(args: &Value) -> anyhow::Result<Parameters> {
    Ok(Parameters {
        var_file: extract_string(args, "var_file"),
        vars: extract_pairs(args, "var")?,
        ..Default::default()
    })
}

fn apply_destroy_params(args: &Value) -> anyhow::Result<Parameters> {
    Ok(Parameters {
        auto_approve: args
            .get("auto_approve")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        var_file: extract_string(args, "var_file"),
        vars: extract_pairs(args, "var")?,
        ..Default::default()
    })
}

fn show_params(args: &Value) -> Parameters {
    Parameters {
        plan_file: extract_string(args, "plan_file"),
        ..Default::default()
    }
}

fn select_params(args: &Value) -> Parameters {
    // A missing or empty name is rejected by the invoker itself.
    Parameters {
        workspace: extract_string(args, "name"),
        ..Default::default()
    }
}

// Helpers

/// The working directory for a call: the explicit `working_dir` argument or
/// the server's configured project directory.
fn resolve_working_dir(args: &Value, default_dir: &Path) -> PathBuf {
    args.get("working_dir")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_dir.to_path_buf())
}

fn extract_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Reads a map-valued argument into ordered `(key, value)` pairs, in the
/// order the client sent them (serde_json's preserve_order feature).
///
/// Scalar values are rendered to the text that ends up in `key=value` flag
/// arguments; nested objects and arrays are rejected.
fn extract_pairs(args: &Value, key: &str) -> anyhow::Result<Vec<(String, String)>> {
    let entries = match args.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(value) => value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("'{}' must be an object", key))?,
    };

    let mut pairs = Vec::with_capacity(entries.len());
    for (entry_key, entry_value) in entries {
        let rendered = match entry_value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(anyhow::anyhow!(
                    "'{}' entry '{}' must be a string, number, or boolean",
                    key,
                    entry_key
                ))
            }
        };
        pairs.push((entry_key.clone(), rendered));
    }
    Ok(pairs)
}

/// Renders an [`InvocationResult`] as MCP tool-call content.
///
/// Success carries the raw stdout. Failure sets `isError` and relays
/// Terraform's own diagnostics: exit code, stderr, and any partial stdout
/// produced before the process died.
fn render_result(operation: Operation, result: &InvocationResult) -> Value {
    if result.succeeded {
        return json!({
            "content": [{ "type": "text", "text": result.stdout }]
        });
    }

    let mut text = format!(
        "Error: terraform {} exited with code {}\n\n{}",
        operation, result.exit_code, result.stderr
    );
    if !result.stdout.is_empty() {
        text.push_str(&format!("\nPartial output:\n{}", result.stdout));
    }

    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": true
    })
}

pub fn list_tools() -> Value {
    json!([
        {
            "name": "terraform_init",
            "description": "Initialize a Terraform working directory",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "backend_config": {
                        "type": "object",
                        "description": "Backend configuration for Terraform",
                        "additionalProperties": true
                    }
                }
            }
        },
        {
            "name": "terraform_plan",
            "description": "Generate and show an execution plan for Terraform",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "var_file": {
                        "type": "string",
                        "description": "Path to a variables file"
                    },
                    "var": {
                        "type": "object",
                        "description": "Variables to set for the Terraform plan",
                        "additionalProperties": true
                    }
                }
            }
        },
        {
            "name": "terraform_apply",
            "description": "Apply the changes required to reach the desired state of the configuration",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "auto_approve": {
                        "type": "boolean",
                        "description": "Skip interactive approval of plan before applying",
                        "default": false
                    },
                    "var_file": {
                        "type": "string",
                        "description": "Path to a variables file"
                    },
                    "var": {
                        "type": "object",
                        "description": "Variables to set for the Terraform apply",
                        "additionalProperties": true
                    }
                }
            }
        },
        {
            "name": "terraform_destroy",
            "description": "Destroy the infrastructure managed by Terraform",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "auto_approve": {
                        "type": "boolean",
                        "description": "Skip interactive approval of plan before destroying",
                        "default": false
                    },
                    "var_file": {
                        "type": "string",
                        "description": "Path to a variables file"
                    },
                    "var": {
                        "type": "object",
                        "description": "Variables to set for the Terraform destroy",
                        "additionalProperties": true
                    }
                }
            }
        },
        {
            "name": "terraform_validate",
            "description": "Validate the syntax and internal consistency of Terraform files",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    }
                }
            }
        },
        {
            "name": "terraform_show",
            "description": "Show the current state or a saved plan",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "plan_file": {
                        "type": "string",
                        "description": "Path to a saved plan file"
                    }
                }
            }
        },
        {
            "name": "terraform_workspace_list",
            "description": "List Terraform workspaces",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    }
                }
            }
        },
        {
            "name": "terraform_workspace_select",
            "description": "Select a Terraform workspace",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "working_dir": {
                        "type": "string",
                        "description": "Path to the Terraform working directory. Defaults to the server's project directory."
                    },
                    "name": {
                        "type": "string",
                        "description": "Name of the workspace to select"
                    }
                },
                "required": ["name"]
            }
        }
    ])
}
