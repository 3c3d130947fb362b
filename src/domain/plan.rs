//! Plan artifacts and the argument vector forwarded to `terraform apply`.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;

/// Flags whose value would swallow a trailing file argument
const FILE_VALUED_FLAGS: [&str; 6] = [
    "-backup",
    "--backup",
    "-state",
    "--state",
    "-state-out",
    "--state-out",
];

/// Errors raised while preparing an apply invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to create temporary plan file: {0}")]
    TempPlan(#[source] std::io::Error),

    #[error("failed to keep plan file {path}: {source}")]
    Keep {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a plan file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Passed by the user; read-only for the whole run
    UserSupplied,

    /// Created for this run and owned by it
    Generated,
}

/// A plan file the run applies.
///
/// Generated plans live in a temporary file that is removed when the
/// artifact is dropped, whatever the outcome of the run. Call
/// [`PlanArtifact::keep`] to persist it instead.
#[derive(Debug)]
pub struct PlanArtifact {
    path: PathBuf,
    origin: PlanOrigin,
    temp: Option<TempPath>,
}

impl PlanArtifact {
    pub fn user_supplied(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: PlanOrigin::UserSupplied,
            temp: None,
        }
    }

    /// Reserve a fresh temporary plan file
    pub fn generate() -> Result<Self, InvocationError> {
        let temp = tempfile::Builder::new()
            .prefix("changeflow-plan")
            .tempfile()
            .map_err(InvocationError::TempPlan)?
            .into_temp_path();

        Ok(Self {
            path: temp.to_path_buf(),
            origin: PlanOrigin::Generated,
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> PlanOrigin {
        self.origin
    }

    pub fn is_generated(&self) -> bool {
        self.origin == PlanOrigin::Generated
    }

    /// Disarm deletion of a generated plan and return its path
    pub fn keep(mut self) -> Result<PathBuf, InvocationError> {
        if let Some(temp) = self.temp.take() {
            temp.keep().map_err(|e| InvocationError::Keep {
                path: self.path.clone(),
                source: e.error,
            })?;
        }
        Ok(self.path)
    }
}

/// The resolved `terraform` invocations for one run.
#[derive(Debug)]
pub struct ApplyInvocation {
    /// Arguments for the apply subprocess, starting with `apply`
    pub apply_args: Vec<String>,

    /// Arguments for plan generation, starting with `plan`; empty for a
    /// saved plan
    pub plan_args: Vec<String>,

    pub plan: PlanArtifact,

    pub auto_approve: bool,
}

impl ApplyInvocation {
    /// Build the invocation from the arguments the user forwarded.
    ///
    /// A trailing existing file is treated as a saved plan, which implies
    /// auto-approval. Otherwise a temporary plan file is reserved and
    /// appended to the apply arguments.
    pub fn from_args(mut args: Vec<String>) -> Result<Self, InvocationError> {
        if let Some(path) = trailing_plan_file(&args) {
            return Ok(Self {
                apply_args: prefixed("apply", args),
                plan_args: Vec::new(),
                plan: PlanArtifact::user_supplied(path),
                auto_approve: true,
            });
        }

        let plan = PlanArtifact::generate()?;
        let plan_file = plan.path().to_string_lossy().to_string();

        let mut plan_args = plan_args_from_apply_args(&args);
        plan_args.push("-out".to_string());
        plan_args.push(plan_file.clone());

        let mut auto_approve = false;
        for arg in &args {
            if let Some(value) = auto_approve_flag(arg) {
                auto_approve = value;
            }
        }

        args.push(plan_file);

        Ok(Self {
            apply_args: prefixed("apply", args),
            plan_args,
            plan,
            auto_approve,
        })
    }

    /// Whether plan generation and submission have to run first
    pub fn needs_plan(&self) -> bool {
        self.plan.is_generated()
    }

    pub fn needs_approval(&self) -> bool {
        !self.auto_approve
    }

    /// Header shown above the change progress
    pub fn header(&self) -> String {
        format!(
            "# Applying Changes\n\nApplying changes with `terraform {}`",
            self.apply_args.join(" ")
        )
    }
}

fn prefixed(command: &str, args: Vec<String>) -> Vec<String> {
    std::iter::once(command.to_string()).chain(args).collect()
}

/// Return the last argument if it names a saved plan file
fn trailing_plan_file(args: &[String]) -> Option<PathBuf> {
    let last = args.last()?;
    let metadata = std::fs::metadata(last).ok()?;
    if metadata.is_dir() {
        return None;
    }

    if args.len() >= 2 {
        let prev = &args[args.len() - 2];
        let swallowed = FILE_VALUED_FLAGS
            .iter()
            .any(|flag| prev == flag || prev.starts_with(&format!("{}=", flag)));
        if swallowed {
            return None;
        }
    }

    Some(PathBuf::from(last))
}

/// `Some(true)`/`Some(false)` for auto-approve flags, `None` otherwise
fn auto_approve_flag(arg: &str) -> Option<bool> {
    let name = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    let value = name.strip_prefix("auto-approve")?;
    match value {
        "" => Some(true),
        v if v.eq_ignore_ascii_case("=true") => Some(true),
        v if v.eq_ignore_ascii_case("=false") => Some(false),
        _ => None,
    }
}

/// `plan` does not accept `-auto-approve`, everything else is forwarded
fn plan_args_from_apply_args(args: &[String]) -> Vec<String> {
    let forwarded = args
        .iter()
        .filter(|a| auto_approve_flag(a).is_none())
        .cloned()
        .collect();
    prefixed("plan", forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_trailing_file_is_user_supplied_plan() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let inv = ApplyInvocation::from_args(args(&["-parallelism=2", &path])).unwrap();

        assert_eq!(inv.plan.origin(), PlanOrigin::UserSupplied);
        assert_eq!(inv.plan.path(), file.path());
        assert!(inv.auto_approve);
        assert!(!inv.needs_plan());
        assert!(inv.plan_args.is_empty());
        assert_eq!(inv.apply_args, args(&["apply", "-parallelism=2", &path]));
    }

    #[test]
    fn test_state_flag_swallows_trailing_file() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let inv = ApplyInvocation::from_args(args(&["-state", &path])).unwrap();
        assert!(inv.needs_plan());

        let inv = ApplyInvocation::from_args(args(&["--state-out=x", &path])).unwrap();
        assert!(inv.needs_plan());
    }

    #[test]
    fn test_generated_plan_args() {
        let inv = ApplyInvocation::from_args(args(&["-auto-approve", "-var=a=b"])).unwrap();
        let plan_file = inv.plan.path().to_string_lossy().to_string();

        assert!(inv.needs_plan());
        assert!(inv.auto_approve);
        assert_eq!(
            inv.plan_args,
            args(&["plan", "-var=a=b", "-out", &plan_file])
        );
        assert_eq!(
            inv.apply_args,
            args(&["apply", "-auto-approve", "-var=a=b", &plan_file])
        );
    }

    #[test]
    fn test_auto_approve_last_flag_wins() {
        let inv =
            ApplyInvocation::from_args(args(&["--auto-approve=TRUE", "-auto-approve=false"]))
                .unwrap();
        assert!(!inv.auto_approve);
        assert!(inv.needs_approval());

        let inv = ApplyInvocation::from_args(args(&[])).unwrap();
        assert!(inv.needs_approval());
    }

    #[test]
    fn test_generated_plan_removed_on_drop() {
        let inv = ApplyInvocation::from_args(args(&[])).unwrap();
        let path = inv.plan.path().to_path_buf();
        assert!(path.exists());

        drop(inv);
        assert!(!path.exists());
    }

    #[test]
    fn test_keep_generated_plan() {
        let inv = ApplyInvocation::from_args(args(&[])).unwrap();
        let path = inv.plan.keep().unwrap();
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_header_mentions_apply_args() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let inv = ApplyInvocation::from_args(args(&[&path])).unwrap();
        assert!(inv.header().contains(&format!("`terraform apply {}`", path)));
    }
}
