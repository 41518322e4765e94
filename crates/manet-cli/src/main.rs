//! MANET routing experiment runner

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use manet_cli::{cli::Cli, error::CliError, load_configuration, plan_runs, run_all, write_report};

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_configuration(&cli)?;

    if cli.dump_config {
        let rendered = config.to_toml_string().map_err(CliError::from)?;
        print!("{rendered}");
        return Ok(());
    }

    let runs = plan_runs(&config, cli.compare);
    info!("Running {} experiment(s)", runs.len());
    let reports = run_all(runs).context("experiment failed")?;

    if let Some(path) = &cli.report {
        write_report(path, &reports)?;
    }
    for report in &reports {
        println!("{}", report.summary());
    }
    Ok(())
}

/// Setup logging; `RUST_LOG` applies unless verbose mode forces debug
fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
