//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use manet_core::{ExperimentConfig, TopologyConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Experiment configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Routing protocol: OLSR, AODV, DSDV or DSR
    #[arg(short, long)]
    pub protocol: Option<String>,

    /// Number of sink/source pairs
    #[arg(short, long)]
    pub sinks: Option<usize>,

    /// Transmission power in dBm
    #[arg(long, allow_negative_numbers = true)]
    pub tx_power: Option<f64>,

    /// Throughput CSV path
    #[arg(long, conflicts_with = "no_csv")]
    pub csv: Option<PathBuf>,

    /// Do not write the throughput CSV
    #[arg(long)]
    pub no_csv: bool,

    /// Simulated run time in seconds
    #[arg(short, long)]
    pub total_time: Option<f64>,

    /// Seed for placement, start jitter and channel loss
    #[arg(long)]
    pub seed: Option<u64>,

    /// Network layout
    #[arg(long, value_enum)]
    pub topology: Option<TopologyKind>,

    /// Collect per-flow statistics (not available with DSR)
    #[arg(long)]
    pub flow_monitor: bool,

    /// Write initial node placements to the mobility trace
    #[arg(long)]
    pub mobility_trace: bool,

    /// Write a CSV line for every transmitted packet
    #[arg(long)]
    pub packet_trace: Option<PathBuf>,

    /// Log every transmitted packet at debug level
    #[arg(long)]
    pub trace_packets: bool,

    /// Run every protocol compatible with the other settings, one after another
    #[arg(long, conflicts_with = "protocol")]
    pub compare: bool,

    /// Write the run reports as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Topology layouts selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopologyKind {
    /// Single ad-hoc network with random-waypoint mobility
    Flat,
    /// Clusters joined through a bridge cluster
    Hierarchical,
    /// Access-point networks chained by point-to-point links
    AccessPoint,
}

impl TopologyKind {
    pub fn of(config: &TopologyConfig) -> Self {
        match config {
            TopologyConfig::Flat { .. } => TopologyKind::Flat,
            TopologyConfig::Hierarchical { .. } => TopologyKind::Hierarchical,
            TopologyConfig::AccessPoint { .. } => TopologyKind::AccessPoint,
        }
    }

    pub fn default_config(self) -> TopologyConfig {
        match self {
            TopologyKind::Flat => TopologyConfig::default_flat(),
            TopologyKind::Hierarchical => TopologyConfig::default_hierarchical(),
            TopologyKind::AccessPoint => TopologyConfig::default_access_point(),
        }
    }
}

impl Cli {
    /// Override `config` with every flag given on the command line
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(protocol) = &self.protocol {
            config.routing.protocol = protocol.clone();
        }
        if let Some(sinks) = self.sinks {
            config.traffic.sinks = sinks;
        }
        if let Some(tx_power) = self.tx_power {
            config.radio.tx_power_dbm = tx_power;
        }
        if let Some(csv) = &self.csv {
            config.output.csv_path = Some(csv.clone());
        }
        if self.no_csv {
            config.output.csv_path = None;
        }
        if let Some(total_time) = self.total_time {
            config.experiment.total_time_secs = total_time;
        }
        if let Some(seed) = self.seed {
            config.experiment.seed = seed;
        }
        // Keep file-provided layout parameters when the kind already matches
        if let Some(kind) = self.topology {
            if TopologyKind::of(&config.topology) != kind {
                config.topology = kind.default_config();
            }
        }
        if self.flow_monitor {
            config.routing.flow_monitor = true;
        }
        if self.mobility_trace {
            config.output.mobility_trace = true;
        }
        if let Some(path) = &self.packet_trace {
            config.output.packet_trace_path = Some(path.clone());
        }
        if self.trace_packets {
            config.output.log_packets = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("manet-routing").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let mut config = ExperimentConfig::default();
        parse(&[]).apply(&mut config);

        let defaults = ExperimentConfig::default();
        assert_eq!(config.routing.protocol, defaults.routing.protocol);
        assert_eq!(config.traffic.sinks, defaults.traffic.sinks);
        assert_eq!(config.output.csv_path, defaults.output.csv_path);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "--protocol",
            "olsr",
            "--sinks",
            "5",
            "--tx-power",
            "-3.5",
            "--total-time",
            "150",
            "--seed",
            "9",
            "--csv",
            "out.csv",
            "--flow-monitor",
            "--mobility-trace",
        ]);
        let mut config = ExperimentConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.routing.protocol, "olsr");
        assert_eq!(config.traffic.sinks, 5);
        assert_eq!(config.radio.tx_power_dbm, -3.5);
        assert_eq!(config.experiment.total_time_secs, 150.0);
        assert_eq!(config.experiment.seed, 9);
        assert_eq!(config.output.csv_path, Some(PathBuf::from("out.csv")));
        assert!(config.routing.flow_monitor);
        assert!(config.output.mobility_trace);
    }

    #[test]
    fn test_no_csv_disables_output() {
        let mut config = ExperimentConfig::default();
        parse(&["--no-csv"]).apply(&mut config);
        assert!(config.output.csv_path.is_none());
    }

    #[test]
    fn test_topology_switch() {
        let mut config = ExperimentConfig::default();
        parse(&["--topology", "access-point"]).apply(&mut config);
        assert_eq!(TopologyKind::of(&config.topology), TopologyKind::AccessPoint);
    }

    #[test]
    fn test_matching_topology_keeps_file_layout() {
        let mut config = ExperimentConfig::default();
        config.topology = TopologyConfig::Hierarchical {
            groups: vec![4, 4],
            first_radius: 10.0,
            radius_step: 10.0,
            bridge_radius: 20.0,
        };
        parse(&["--topology", "hierarchical"]).apply(&mut config);

        assert_eq!(config.topology.total_nodes(), 9);
    }

    #[test]
    fn test_compare_conflicts_with_protocol() {
        let result = Cli::try_parse_from(["manet-routing", "--compare", "--protocol", "AODV"]);
        assert!(result.is_err());
    }
}
