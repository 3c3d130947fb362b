//! Terraform adapter for plan generation and plan-file correlation.
//!
//! Plan generation runs as a captured subprocess while the live display
//! owns the terminal; only `apply` is handed the terminal.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::PlanTool;

/// Lines of stderr kept in plan failure messages
const STDERR_TAIL_LINES: usize = 20;

/// Terraform adapter using subprocess mode
pub struct TerraformAdapter {
    /// Path to the terraform binary
    binary_path: String,
}

impl TerraformAdapter {
    /// Create a Terraform adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }
}

#[async_trait]
impl PlanTool for TerraformAdapter {
    fn name(&self) -> &str {
        "terraform"
    }

    #[instrument(skip(self))]
    async fn generate(&self, plan_args: &[String]) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .args(plan_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {} plan", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} plan failed with {}: {}",
                self.binary_path,
                output.status,
                tail(&stderr, STDERR_TAIL_LINES)
            );
        }

        debug!(stdout_bytes = output.stdout.len(), "Plan generated");
        Ok(())
    }

    async fn ticket_link(&self, plan_file: &Path) -> Result<String> {
        plan_ticket_link(plan_file).await
    }
}

/// Correlation value of a plan: `tfplan://{SHA256}` plus the hex digest
/// of the plan file contents
pub async fn plan_ticket_link(plan_file: &Path) -> Result<String> {
    let plan = tokio::fs::read(plan_file)
        .await
        .with_context(|| format!("Failed to read plan file: {}", plan_file.display()))?;

    if plan.is_empty() {
        anyhow::bail!("Plan file {} is empty", plan_file.display());
    }

    let digest = Sha256::digest(&plan);
    Ok(format!("tfplan://{{SHA256}}{}", hex::encode(digest)))
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_custom_binary_path() {
        let adapter = TerraformAdapter::with_binary_path("/opt/bin/tofu");
        assert_eq!(adapter.binary_path(), "/opt/bin/tofu");
        assert_eq!(adapter.name(), "terraform");
    }

    #[tokio::test]
    async fn test_ticket_link_is_content_digest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let link = plan_ticket_link(file.path()).await.unwrap();
        assert_eq!(
            link,
            "tfplan://{SHA256}ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_ticket_link_rejects_empty_or_missing_plan() {
        let file = NamedTempFile::new().unwrap();
        assert!(plan_ticket_link(file.path()).await.is_err());
        assert!(plan_ticket_link(Path::new("/nonexistent/plan")).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_generate_reports_status() {
        let adapter = TerraformAdapter::with_binary_path("false");
        let err = adapter.generate(&["plan".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("false plan failed"));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
