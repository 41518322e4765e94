//! Turns parsed arguments into experiment runs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use manet_core::{orchestrator::comparable_protocols, ExperimentConfig, ExperimentOrchestrator, ExperimentReport};
use tracing::info;

use crate::cli::Cli;
use crate::error::{CliError, Result};

/// Load the configuration file (or defaults) and apply command-line overrides
pub fn load_configuration(cli: &Cli) -> Result<ExperimentConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("[CLI] Loading configuration from {}", path.display());
            ExperimentConfig::from_toml_file(path)?
        }
        None => {
            info!("[CLI] Using default configuration");
            ExperimentConfig::default()
        }
    };
    cli.apply(&mut config);
    Ok(config)
}

/// Configurations to run, one per protocol when comparing
pub fn plan_runs(config: &ExperimentConfig, compare: bool) -> Vec<ExperimentConfig> {
    if !compare {
        return vec![config.clone()];
    }

    comparable_protocols(config.routing.flow_monitor)
        .into_iter()
        .map(|protocol| {
            let mut run = config.clone();
            let label = protocol.name();
            run.routing.protocol = label.to_string();
            run.output.csv_path = run.output.csv_path.map(|p| with_label(&p, label));
            run.output.flow_monitor_path = with_label(&run.output.flow_monitor_path, label);
            run.output.packet_trace_path = run.output.packet_trace_path.map(|p| with_label(&p, label));
            run.output.mobility_trace_path = with_label(&run.output.mobility_trace_path, label);
            run
        })
        .collect()
}

/// Run each configuration in turn, stopping at the first failure
pub fn run_all(configs: Vec<ExperimentConfig>) -> Result<Vec<ExperimentReport>> {
    let mut reports = Vec::with_capacity(configs.len());
    for config in configs {
        let report = ExperimentOrchestrator::new(config)?.run()?;
        reports.push(report);
    }
    Ok(reports)
}

pub fn write_report(path: &Path, reports: &[ExperimentReport]) -> Result<()> {
    let file = File::create(path).map_err(|source| CliError::ReportWrite {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, reports)?;
    writer.flush().map_err(|source| CliError::ReportWrite {
        path: path.to_path_buf(),
        source,
    })?;
    info!("[CLI] Wrote {} report(s) to {}", reports.len(), path.display());
    Ok(())
}

/// `out/run.csv` with label `OLSR` becomes `out/run-OLSR.csv`
fn with_label(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{label}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{label}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("manet-routing").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_with_label() {
        assert_eq!(with_label(Path::new("out/run.csv"), "OLSR"), PathBuf::from("out/run-OLSR.csv"));
        assert_eq!(with_label(Path::new("trace"), "DSR"), PathBuf::from("trace-DSR"));
    }

    #[test]
    fn test_single_run_plan() {
        let config = ExperimentConfig::default();
        let runs = plan_runs(&config, false);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].output.csv_path, config.output.csv_path);
    }

    #[test]
    fn test_compare_plan_labels_outputs() {
        let config = ExperimentConfig::default();
        let runs = plan_runs(&config, true);

        let protocols: Vec<_> = runs.iter().map(|r| r.routing.protocol.as_str()).collect();
        assert_eq!(protocols, ["OLSR", "AODV", "DSDV", "DSR"]);
        assert_eq!(
            runs[0].output.csv_path,
            Some(PathBuf::from("manet-routing.output-OLSR.csv"))
        );
    }

    #[test]
    fn test_compare_with_flow_monitor_skips_dsr() {
        let mut config = ExperimentConfig::default();
        config.routing.flow_monitor = true;
        let runs = plan_runs(&config, true);
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.routing.protocol != "DSR"));
    }

    #[test]
    fn test_load_configuration_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(
            &path,
            "[routing]\nprotocol = \"DSDV\"\n\n[traffic]\nsinks = 4\n",
        )
        .unwrap();

        let config = load_configuration(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--sinks",
            "6",
        ]))
        .unwrap();

        assert_eq!(config.routing.protocol, "DSDV");
        assert_eq!(config.traffic.sinks, 6);
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_configuration(&cli(&["--config", "/nonexistent/experiment.toml"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_run_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExperimentConfig::default();
        config.output.csv_path = None;
        config.experiment.total_time_secs = 5.0;

        let reports = run_all(plan_runs(&config, false)).unwrap();
        assert_eq!(reports[0].samples.len(), 5);

        let path = dir.path().join("report.json");
        write_report(&path, &reports).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json[0]["protocol"], "AODV");
    }
}
