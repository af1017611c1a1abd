//! `aami-rules` binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aami_cli::{Cli, OutputFormat, Session, resolve_config};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(
        cli.config.as_deref(),
        cli.prometheus_url.as_deref(),
        cli.rule_path.as_deref(),
    )
    .context("failed to load configuration")?;

    let session = Session::open(config, &cli.state)
        .with_context(|| format!("failed to open state {}", cli.state.display()))?;

    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();
    session
        .execute(&cli.command, &mut stdout, &format)
        .await
        .context("command failed")?;
    Ok(())
}
