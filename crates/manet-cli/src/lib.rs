//! MANET experiment runner library
//!
//! Argument parsing, configuration loading and multi-run planning for the
//! `manet-routing` binary.

pub mod cli;
pub mod error;
pub mod runner;

pub use cli::{Cli, TopologyKind};
pub use error::{CliError, Result};
pub use runner::{load_configuration, plan_runs, run_all, write_report};
