use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::invoker::Operation;

/// Security guardrails for the MCP server.
#[derive(Debug)]
pub struct Guard {
    /// Allowed project roots. Working directories outside these roots are
    /// denied. An empty list disables the containment check.
    allowed_roots: Vec<PathBuf>,
    /// Whether apply and destroy may run at all.
    allow_destructive: bool,
}

impl Guard {
    /// Builds the guard, canonicalizing the allowed roots up front.
    ///
    /// An empty root list disables containment, so a configured root that
    /// cannot be resolved is refused here rather than silently dropped.
    pub fn new(allowed_roots: Vec<PathBuf>, allow_destructive: bool) -> Result<Self> {
        // Canonicalize roots at startup to handle symlinks correctly
        let allowed_roots = allowed_roots
            .into_iter()
            .map(|p| {
                p.canonicalize()
                    .map_err(|e| anyhow::anyhow!("Cannot resolve allowed root {:?}: {}", p, e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed_roots,
            allow_destructive,
        })
    }

    /// Verifies that a working directory is within the allowed roots.
    ///
    /// With no roots configured every directory is allowed and the path is
    /// not touched; the invoker still rejects missing directories itself.
    pub fn check_dir<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.allowed_roots.is_empty() {
            return Ok(());
        }

        let path = path.as_ref();
        let canonical_path = path
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("Invalid working directory {:?}: {}", path, e))?;

        if self
            .allowed_roots
            .iter()
            .any(|root| canonical_path.starts_with(root))
        {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Access denied: {:?} is outside the allowed project roots",
                path
            ))
        }
    }

    /// Verifies that an operation is permitted by the server configuration.
    ///
    /// Apply and destroy change real infrastructure and are refused unless
    /// the server was started with destructive operations enabled.
    pub fn check_operation(&self, operation: Operation) -> Result<()> {
        if operation.is_destructive() && !self.allow_destructive {
            return Err(anyhow::anyhow!(
                "Destructive operation '{}' is disabled; start the server with --allow-destructive to enable it",
                operation
            ));
        }
        Ok(())
    }
}
