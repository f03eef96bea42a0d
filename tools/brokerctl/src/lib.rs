//! Host-side tooling for the IPC broker: config loading, scenario files
//! and the scenario runner behind the `brokerctl` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod runner;
pub mod scenario;
