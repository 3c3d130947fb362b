//! Command-line interface for changeflow.
//!
//! Provides the `apply` workflow and a configuration dump.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapters::{HttpChangeService, TerraformAdapter};
use crate::config::{self, ResolvedConfig};
use crate::core::{ApplyModel, ApplySettings, Outcome, Program};
use crate::domain::ApplyInvocation;
use crate::ui::{InlineRenderer, PlainRenderer};

/// changeflow - Track infrastructure changes around terraform apply
#[derive(Parser, Debug)]
#[command(name = "changeflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan, open a change, run `terraform apply` and close the change
    Apply(ApplyArgs),

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ApplyArgs {
    /// Ticket link identifying the change; derived from the plan if unset
    #[arg(long, env = "CHANGEFLOW_TICKET_LINK")]
    pub ticket_link: Option<String>,

    /// AWS profile exported to `terraform apply`
    #[arg(long, env = "CHANGEFLOW_AWS_PROFILE")]
    pub aws_profile: Option<String>,

    /// Base URL of the change service
    #[arg(long, env = "CHANGEFLOW_API_URL")]
    pub api_url: Option<String>,

    /// API key for the change service
    #[arg(long, env = "CHANGEFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Terraform binary to run
    #[arg(long, env = "CHANGEFLOW_TERRAFORM")]
    pub terraform_binary: Option<String>,

    /// Keep the generated plan file instead of deleting it
    #[arg(long)]
    pub keep_plan: bool,

    /// Print plain progress lines instead of the live display
    #[arg(long)]
    pub plain: bool,

    /// Arguments forwarded to `terraform apply`
    #[arg(last = true, allow_hyphen_values = true)]
    pub terraform_args: Vec<String>,
}

impl ApplyArgs {
    /// Live display needs a terminal on both ends
    pub fn live_display(&self) -> bool {
        !self.plain && io::stdout().is_terminal() && io::stdin().is_terminal()
    }

    /// Flags (and their env vars) win over the config file
    pub fn settings(&self, cfg: &ResolvedConfig) -> ApplySettings {
        ApplySettings {
            ticket_link: self.ticket_link.clone().or_else(|| cfg.ticket_link.clone()),
            aws_profile: self.aws_profile.clone().or_else(|| cfg.aws_profile.clone()),
            apply_binary: self
                .terraform_binary
                .clone()
                .unwrap_or_else(|| cfg.terraform_binary.clone()),
        }
    }
}

impl Cli {
    /// Set up logging; the live display gets a log file instead of stderr
    pub fn init_tracing(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        match &self.command {
            Commands::Apply(args) if args.live_display() => {
                let path = config::config()?.log_file();
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).with_context(|| {
                        format!("Failed to create log directory: {}", dir.display())
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to open log file: {}", path.display()))?;

                registry
                    .with(
                        fmt::layer()
                            .with_target(false)
                            .with_ansi(false)
                            .with_writer(Mutex::new(file)),
                    )
                    .init();
            }
            _ => {
                registry
                    .with(fmt::layer().with_target(false).with_writer(io::stderr))
                    .init();
            }
        }
        Ok(())
    }

    /// Execute the CLI command; returns the process exit code
    pub async fn execute(self) -> Result<u8> {
        match self.command {
            Commands::Apply(args) => apply(args).await,
            Commands::Config => {
                show_config()?;
                Ok(0)
            }
        }
    }
}

async fn apply(args: ApplyArgs) -> Result<u8> {
    let cfg = config::config()?;
    let live = args.live_display();
    let settings = args.settings(cfg);

    let invocation = ApplyInvocation::from_args(args.terraform_args.clone())?;
    if invocation.needs_approval() && !live {
        anyhow::bail!(
            "terraform apply needs confirmation but no interactive terminal is available; \
             pass -auto-approve to apply without confirmation"
        );
    }

    let api_url = args.api_url.clone().unwrap_or_else(|| cfg.api_url.clone());
    let service = HttpChangeService::new(&api_url)?
        .with_api_key(args.api_key.clone().or_else(|| cfg.api_key.clone()));
    let plan_tool = TerraformAdapter::with_binary_path(settings.apply_binary.clone());

    info!(
        %api_url,
        args = %invocation.apply_args.join(" "),
        generated_plan = invocation.needs_plan(),
        "Starting apply"
    );

    let token = CancellationToken::new();
    let model = ApplyModel::new(
        invocation,
        settings,
        Arc::new(service),
        Arc::new(plan_tool),
        token.clone(),
    );

    let model = if live {
        Program::new(InlineRenderer::new(), token).run(model).await?
    } else {
        Program::new(PlainRenderer::stdout(), token).run(model).await?
    };

    let outcome = model.outcome();
    match &outcome {
        Outcome::Completed => info!("Apply completed"),
        Outcome::Failed(err) => warn!(error = %err, "Apply failed"),
        Outcome::Aborted => {
            warn!("Apply aborted");
            eprintln!("Aborted.");
        }
    }

    // a generated plan is deleted when the artifact drops
    let plan = model.into_plan();
    if args.keep_plan && plan.is_generated() {
        let path = plan.keep()?;
        println!("Plan kept at {}", path.display());
    }

    Ok(outcome.exit_code())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("changeflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!("Log file:    {}", cfg.log_file().display());
    println!();
    println!("Change service:");
    println!("  URL:     {}", cfg.api_url);
    println!(
        "  API key: {}",
        if cfg.api_key.is_some() { "(set)" } else { "(none)" }
    );
    println!();
    println!("Terraform:");
    println!("  Binary:      {}", cfg.terraform_binary);
    println!(
        "  AWS profile: {}",
        cfg.aws_profile.as_deref().unwrap_or("(none)")
    );
    println!();
    println!(
        "Ticket link: {}",
        cfg.ticket_link
            .as_deref()
            .unwrap_or("(derived from plan)")
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_forwarded_args_after_separator() {
        let cli = parse(&[
            "changeflow",
            "apply",
            "--plain",
            "--",
            "-auto-approve",
            "-var",
            "x=1",
        ]);
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.plain);
        assert!(!args.live_display());
        assert_eq!(args.terraform_args, vec!["-auto-approve", "-var", "x=1"]);
    }

    #[test]
    fn test_flags_override_config() {
        let cfg = ResolvedConfig {
            home: PathBuf::from("/h"),
            api_url: "http://cfg".to_string(),
            api_key: None,
            terraform_binary: "tofu".to_string(),
            aws_profile: Some("from-config".to_string()),
            ticket_link: Some("https://tickets/cfg".to_string()),
            config_file: None,
        };
        let args = ApplyArgs {
            aws_profile: Some("from-flag".to_string()),
            ..Default::default()
        };

        let settings = args.settings(&cfg);
        assert_eq!(settings.aws_profile.as_deref(), Some("from-flag"));
        assert_eq!(settings.ticket_link.as_deref(), Some("https://tickets/cfg"));
        assert_eq!(settings.apply_binary, "tofu");
    }

    #[test]
    fn test_config_command_parses() {
        assert!(matches!(parse(&["changeflow", "config"]).command, Commands::Config));
    }
}
