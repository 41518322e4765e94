//! Experiment configuration
//!
//! Loaded from TOML, overridden from the command line, validated once and
//! then handed to the orchestrator, which never mutates it. Every field has
//! a default, so an empty file describes the stock hierarchical experiment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::AddressBlock;
use crate::data_rate::DataRate;
use crate::errors::{ConfigurationError, ExperimentError};
use crate::routing::RoutingProtocol;
use crate::topology::{PointToPointLink, Rectangle};
use crate::traffic::{JitterWindow, SourceKind, DEFAULT_SEGMENT_SIZE};

// ----------------------------------------------------------------------------
// Top-level configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub experiment: ExperimentSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub radio: RadioSettings,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub addressing: AddressingSettings,
    #[serde(default)]
    pub traffic: TrafficSettings,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Seed for start jitter, placement and channel loss
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_total_time")]
    pub total_time_secs: f64,
    #[serde(default = "default_sample_period")]
    pub sample_period_secs: f64,
}

fn default_name() -> String {
    "manet-routing-compare".to_string()
}

fn default_seed() -> u64 {
    1
}

fn default_total_time() -> f64 {
    200.0
}

fn default_sample_period() -> f64 {
    1.0
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            seed: default_seed(),
            total_time_secs: default_total_time(),
            sample_period_secs: default_sample_period(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// One of OLSR, AODV, DSDV, DSR (case-insensitive)
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub flow_monitor: bool,
}

fn default_protocol() -> String {
    RoutingProtocol::Aodv.name().to_string()
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            flow_monitor: false,
        }
    }
}

/// Radio parameters. Recorded in the samples and the log, not simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioSettings {
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f64,
    #[serde(default = "default_phy_mode")]
    pub phy_mode: String,
    #[serde(default = "default_standard")]
    pub standard: String,
}

fn default_tx_power() -> f64 {
    7.5
}

fn default_phy_mode() -> String {
    "DsssRate11Mbps".to_string()
}

fn default_standard() -> String {
    "802.11b".to_string()
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            tx_power_dbm: default_tx_power(),
            phy_mode: default_phy_mode(),
            standard: default_standard(),
        }
    }
}

// ----------------------------------------------------------------------------
// Topology
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    /// One ad-hoc network with random placement
    Flat {
        #[serde(default = "default_flat_nodes")]
        nodes: usize,
        #[serde(default = "default_flat_area")]
        area: Rectangle,
        #[serde(default = "default_max_speed")]
        max_speed_mps: f64,
        #[serde(default)]
        pause_secs: f64,
    },
    /// Clusters whose heads are joined by a bridge node. The first node of
    /// each group is its head.
    Hierarchical {
        #[serde(default = "default_groups")]
        groups: Vec<usize>,
        #[serde(default = "default_first_radius")]
        first_radius: f64,
        #[serde(default = "default_radius_step")]
        radius_step: f64,
        #[serde(default = "default_bridge_radius")]
        bridge_radius: f64,
    },
    /// Station networks, one per access point, with the access points
    /// chained by point-to-point links
    AccessPoint {
        #[serde(default = "default_stations")]
        stations: Vec<usize>,
        #[serde(default = "default_ssid")]
        ssid: String,
        #[serde(default = "default_link_rate")]
        link_rate: DataRate,
        #[serde(default = "default_link_delay_ms")]
        link_delay_ms: f64,
    },
}

fn default_flat_nodes() -> usize {
    50
}

fn default_flat_area() -> Rectangle {
    Rectangle::new(0.0, 300.0, 0.0, 1500.0)
}

fn default_max_speed() -> f64 {
    20.0
}

fn default_groups() -> Vec<usize> {
    vec![17, 17, 16]
}

fn default_first_radius() -> f64 {
    50.0
}

fn default_radius_step() -> f64 {
    100.0
}

fn default_bridge_radius() -> f64 {
    100.0
}

fn default_stations() -> Vec<usize> {
    vec![5, 5]
}

fn default_ssid() -> String {
    "manet-ssid".to_string()
}

fn default_link_rate() -> DataRate {
    PointToPointLink::default().data_rate
}

fn default_link_delay_ms() -> f64 {
    2.0
}

impl TopologyConfig {
    pub fn default_flat() -> Self {
        TopologyConfig::Flat {
            nodes: default_flat_nodes(),
            area: default_flat_area(),
            max_speed_mps: default_max_speed(),
            pause_secs: 0.0,
        }
    }

    pub fn default_hierarchical() -> Self {
        TopologyConfig::Hierarchical {
            groups: default_groups(),
            first_radius: default_first_radius(),
            radius_step: default_radius_step(),
            bridge_radius: default_bridge_radius(),
        }
    }

    pub fn default_access_point() -> Self {
        TopologyConfig::AccessPoint {
            stations: default_stations(),
            ssid: default_ssid(),
            link_rate: default_link_rate(),
            link_delay_ms: default_link_delay_ms(),
        }
    }

    /// Nodes the topology creates, bridge and access points included
    pub fn total_nodes(&self) -> usize {
        match self {
            TopologyConfig::Flat { nodes, .. } => *nodes,
            TopologyConfig::Hierarchical { groups, .. } => groups.iter().sum::<usize>() + 1,
            TopologyConfig::AccessPoint { stations, .. } => {
                stations.iter().sum::<usize>() + stations.len()
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            TopologyConfig::Flat {
                nodes,
                area,
                max_speed_mps,
                pause_secs,
            } => {
                if *nodes == 0 {
                    return Err(ConfigurationError::invalid("topology.nodes", "must be at least 1"));
                }
                if !(area.min_x <= area.max_x && area.min_y <= area.max_y) {
                    return Err(ConfigurationError::invalid("topology.area", "min exceeds max"));
                }
                require_non_negative("topology.max_speed_mps", *max_speed_mps)?;
                require_non_negative("topology.pause_secs", *pause_secs)?;
            }
            TopologyConfig::Hierarchical {
                groups,
                first_radius,
                radius_step,
                bridge_radius,
            } => {
                if groups.is_empty() {
                    return Err(ConfigurationError::invalid("topology.groups", "no clusters configured"));
                }
                // A group is its head plus members; a lone head has no members
                if let Some(index) = groups.iter().position(|&size| size < 2) {
                    return Err(ConfigurationError::EmptyCluster {
                        cluster: cluster_name(index),
                    });
                }
                require_non_negative("topology.first_radius", *first_radius)?;
                require_non_negative("topology.radius_step", *radius_step)?;
                require_non_negative("topology.bridge_radius", *bridge_radius)?;
            }
            TopologyConfig::AccessPoint {
                stations,
                ssid,
                link_delay_ms,
                ..
            } => {
                if stations.is_empty() {
                    return Err(ConfigurationError::invalid("topology.stations", "no access points configured"));
                }
                if stations.contains(&0) {
                    return Err(ConfigurationError::EmptyCluster {
                        cluster: ssid.clone(),
                    });
                }
                require_non_negative("topology.link_delay_ms", *link_delay_ms)?;
                duration_from_secs("topology.link_delay_ms", link_delay_ms / 1000.0)?;
            }
        }
        Ok(())
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self::default_hierarchical()
    }
}

/// Name given to the `index`-th cluster of a hierarchical topology
pub fn cluster_name(index: usize) -> String {
    format!("cluster-{index}")
}

// ----------------------------------------------------------------------------
// Addressing, traffic and channel
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressingSettings {
    /// First block of the sequential plan; later blocks follow it
    #[serde(default = "default_base_block")]
    pub base: AddressBlock,
    /// Blocks used first, in installation order
    #[serde(default)]
    pub explicit: Vec<AddressBlock>,
}

fn default_base_block() -> AddressBlock {
    AddressBlock::DEFAULT_BASE
}

impl Default for AddressingSettings {
    fn default() -> Self {
        Self {
            base: default_base_block(),
            explicit: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSettings {
    /// Number of sink/source pairs
    #[serde(default = "default_sinks")]
    pub sinks: usize,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub jitter: JitterWindow,
    #[serde(default)]
    pub pattern: TrafficPattern,
}

fn default_sinks() -> usize {
    10
}

fn default_port() -> u16 {
    9
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            sinks: default_sinks(),
            port: default_port(),
            jitter: JitterWindow::default(),
            pattern: TrafficPattern::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficPattern {
    Cbr {
        #[serde(default = "default_cbr_rate")]
        rate: DataRate,
        #[serde(default = "default_packet_size")]
        packet_size: u32,
    },
    Bulk {
        #[serde(default = "default_max_bytes")]
        max_bytes: u64,
        #[serde(default = "default_segment_size")]
        segment_size: u32,
        #[serde(default = "default_line_rate")]
        line_rate: DataRate,
    },
}

fn default_cbr_rate() -> DataRate {
    DataRate::from_bps(2048)
}

fn default_packet_size() -> u32 {
    64
}

fn default_max_bytes() -> u64 {
    1024 * 1024
}

fn default_segment_size() -> u32 {
    DEFAULT_SEGMENT_SIZE
}

fn default_line_rate() -> DataRate {
    DataRate::from_mbps(5)
}

impl Default for TrafficPattern {
    fn default() -> Self {
        TrafficPattern::Cbr {
            rate: default_cbr_rate(),
            packet_size: default_packet_size(),
        }
    }
}

impl TrafficPattern {
    pub fn source_kind(&self) -> SourceKind {
        match *self {
            TrafficPattern::Cbr { rate, packet_size } => {
                SourceKind::ConstantBitRate { rate, packet_size }
            }
            TrafficPattern::Bulk {
                max_bytes,
                segment_size,
                line_rate,
            } => SourceKind::Bulk {
                max_bytes,
                segment_size,
                line_rate,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Ideal {
        #[serde(default = "default_per_hop_delay_ms")]
        per_hop_delay_ms: f64,
    },
    Lossy {
        #[serde(default = "default_per_hop_delay_ms")]
        per_hop_delay_ms: f64,
        loss_rate: f64,
    },
}

fn default_per_hop_delay_ms() -> f64 {
    2.0
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Ideal {
            per_hop_delay_ms: default_per_hop_delay_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn per_hop_delay(&self) -> Result<Duration, ConfigurationError> {
        let ms = match self {
            ChannelConfig::Ideal { per_hop_delay_ms } => *per_hop_delay_ms,
            ChannelConfig::Lossy {
                per_hop_delay_ms, ..
            } => *per_hop_delay_ms,
        };
        duration_from_secs("channel.per_hop_delay_ms", ms / 1000.0)
    }
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Throughput CSV; `None` keeps samples in memory only and is written
    /// as an empty string
    #[serde(default = "default_csv_path", with = "optional_path")]
    pub csv_path: Option<PathBuf>,
    #[serde(default = "default_flow_monitor_path")]
    pub flow_monitor_path: PathBuf,
    #[serde(default)]
    pub packet_trace_path: Option<PathBuf>,
    #[serde(default)]
    pub mobility_trace: bool,
    #[serde(default = "default_mobility_trace_path")]
    pub mobility_trace_path: PathBuf,
    /// Log every transmission at debug level
    #[serde(default)]
    pub log_packets: bool,
}

/// An empty path string stands for "disabled"
mod optional_path {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error> {
        match path {
            Some(path) => path.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PathBuf>, D::Error> {
        let path = PathBuf::deserialize(deserializer)?;
        Ok((!path.as_os_str().is_empty()).then_some(path))
    }
}

fn default_csv_path() -> Option<PathBuf> {
    Some(PathBuf::from("manet-routing.output.csv"))
}

fn default_flow_monitor_path() -> PathBuf {
    PathBuf::from("manet-routing.flowmon.json")
}

fn default_mobility_trace_path() -> PathBuf {
    PathBuf::from("manet-routing.mobility.csv")
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            flow_monitor_path: default_flow_monitor_path(),
            packet_trace_path: None,
            mobility_trace: false,
            mobility_trace_path: default_mobility_trace_path(),
            log_packets: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and validation
// ----------------------------------------------------------------------------

impl ExperimentConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ExperimentError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ExperimentError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ExperimentError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ExperimentError> {
        toml::from_str(contents).map_err(|e| ExperimentError::ConfigLoad {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn total_time(&self) -> Result<Duration, ConfigurationError> {
        duration_from_secs("experiment.total_time_secs", self.experiment.total_time_secs)
    }

    pub fn sample_period(&self) -> Result<Duration, ConfigurationError> {
        duration_from_secs("experiment.sample_period_secs", self.experiment.sample_period_secs)
    }

    /// Check the configuration before anything is built
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        require_positive("experiment.total_time_secs", self.experiment.total_time_secs)?;
        require_positive("experiment.sample_period_secs", self.experiment.sample_period_secs)?;
        self.total_time()?;
        self.sample_period()?;

        if !self.radio.tx_power_dbm.is_finite() {
            return Err(ConfigurationError::invalid("radio.tx_power_dbm", "must be finite"));
        }

        self.routing.protocol.parse::<RoutingProtocol>()?;
        self.topology.validate()?;

        self.traffic.jitter.validate()?;
        match &self.traffic.pattern {
            TrafficPattern::Cbr { packet_size, .. } if *packet_size == 0 => {
                return Err(ConfigurationError::invalid("traffic.pattern.packet_size", "must be non-zero"));
            }
            TrafficPattern::Bulk { segment_size, .. } if *segment_size == 0 => {
                return Err(ConfigurationError::invalid("traffic.pattern.segment_size", "must be non-zero"));
            }
            _ => {}
        }

        let available = self.topology.total_nodes();
        let required = self.traffic.sinks * 2;
        if required > available {
            return Err(ConfigurationError::InsufficientNodes {
                required,
                available,
                sinks: self.traffic.sinks,
            });
        }

        match &self.channel {
            ChannelConfig::Ideal { per_hop_delay_ms } => {
                require_non_negative("channel.per_hop_delay_ms", *per_hop_delay_ms)?;
                self.channel.per_hop_delay()?;
            }
            ChannelConfig::Lossy {
                per_hop_delay_ms,
                loss_rate,
            } => {
                require_non_negative("channel.per_hop_delay_ms", *per_hop_delay_ms)?;
                self.channel.per_hop_delay()?;
                if !(0.0..=1.0).contains(loss_rate) {
                    return Err(ConfigurationError::invalid("channel.loss_rate", "must be within [0, 1]"));
                }
            }
        }

        Ok(())
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::invalid(field, format!("{value} must be positive")))
    }
}

/// Seconds as a `Duration`, rejecting values a `Duration` cannot hold
pub(crate) fn duration_from_secs(field: &str, secs: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigurationError::invalid(field, format!("{secs} s is not a representable duration")))
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::invalid(field, format!("{value} must not be negative")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.total_nodes(), 51);
        assert_eq!(config.traffic.sinks, 10);
        assert_eq!(config.routing.protocol, "AODV");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ExperimentConfig::from_toml_str("").unwrap();
        assert_eq!(config, ExperimentConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            [experiment]
            total_time_secs = 50.0
            seed = 7

            [routing]
            protocol = "olsr"

            [topology]
            kind = "flat"
            nodes = 20

            [traffic]
            sinks = 4

            [traffic.pattern]
            kind = "cbr"
            rate = "500kbps"
            "#,
        )
        .unwrap();

        assert_eq!(config.experiment.total_time_secs, 50.0);
        assert_eq!(config.experiment.seed, 7);
        assert_eq!(config.experiment.sample_period_secs, 1.0);
        assert_eq!(config.topology.total_nodes(), 20);
        assert_eq!(
            config.traffic.pattern,
            TrafficPattern::Cbr {
                rate: DataRate::from_kbps(500),
                packet_size: 64
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = ExperimentConfig::default();
        config.topology = TopologyConfig::default_access_point();
        config.output.packet_trace_path = Some(PathBuf::from("trace.csv"));

        let text = config.to_toml_string().unwrap();
        assert_eq!(ExperimentConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_file_loading_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            ExperimentConfig::from_toml_file(&missing),
            Err(ExperimentError::ConfigLoad { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[topology]\nkind = \"mesh\"\n").unwrap();
        assert!(matches!(
            ExperimentConfig::from_toml_file(&bad),
            Err(ExperimentError::ConfigLoad { .. })
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ExperimentConfig::default();
        config.routing.protocol = "TCP".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::UnknownProtocol { .. })
        ));

        let mut config = ExperimentConfig::default();
        config.topology = TopologyConfig::Hierarchical {
            groups: vec![5, 1],
            first_radius: 50.0,
            radius_step: 100.0,
            bridge_radius: 100.0,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::EmptyCluster {
                cluster: "cluster-1".to_string()
            })
        );

        let mut config = ExperimentConfig::default();
        config.traffic.sinks = 30;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InsufficientNodes { required: 60, .. })
        ));

        let mut config = ExperimentConfig::default();
        config.experiment.total_time_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.channel = ChannelConfig::Lossy {
            per_hop_delay_ms: 2.0,
            loss_rate: 1.5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_durations_rejected() {
        let mut config = ExperimentConfig::default();
        config.experiment.total_time_secs = 1e20;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "experiment.total_time_secs"
        ));
        assert!(config.total_time().is_err());

        let mut config = ExperimentConfig::default();
        config.experiment.sample_period_secs = 1e20;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.traffic.jitter = JitterWindow {
            start_secs: 100.0,
            end_secs: 1e20,
        };
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.channel = ChannelConfig::Ideal {
            per_hop_delay_ms: 1e30,
        };
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.topology = TopologyConfig::AccessPoint {
            stations: vec![2, 2],
            ssid: "manet-ssid".to_string(),
            link_rate: DataRate::from_mbps(5),
            link_delay_ms: 1e30,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_csv_survives_round_trip() {
        let mut config = ExperimentConfig::default();
        config.output.csv_path = None;

        let rendered = config.to_toml_string().unwrap();
        let reloaded = ExperimentConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reloaded.output.csv_path, None);
        assert_eq!(reloaded, config);

        // Absent key still means the default file
        let defaults = ExperimentConfig::from_toml_str("[output]\nmobility_trace = true\n").unwrap();
        assert_eq!(defaults.output.csv_path, default_csv_path());
    }
}
