//! changeflow CLI entrypoint

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use changeflow::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse first: the tracing sink depends on the command
    let cli = Cli::parse();
    cli.init_tracing()?;

    let code = cli.execute().await?;
    Ok(ExitCode::from(code))
}
