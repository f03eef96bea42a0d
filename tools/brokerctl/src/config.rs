//! Broker configuration loading.

use std::fmt;
use std::path::{Path, PathBuf};

use ipc_broker::BrokerConfig;
use serde::Serialize;

use crate::error::BrokerctlError;

/// Load a config file, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<BrokerConfig, BrokerctlError> {
    let Some(path) = path else {
        return Ok(BrokerConfig::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BrokerctlError::ConfigParse(format!("config file not found: {}", path.display()))
        } else {
            BrokerctlError::Io(e)
        }
    })?;
    parse_config_str(&content)
}

/// Parse a config from a TOML string. Missing keys take their defaults.
pub fn parse_config_str(content: &str) -> Result<BrokerConfig, BrokerctlError> {
    toml::from_str(content).map_err(|e| BrokerctlError::ConfigParse(format!("invalid TOML: {e}")))
}

/// Output of `brokerctl config`.
#[derive(Debug, Serialize)]
pub struct EffectiveConfig {
    pub source: Option<PathBuf>,
    pub config: BrokerConfig,
}

impl fmt::Display for EffectiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        match &self.source {
            Some(path) => writeln!(f, "config: {}", path.display())?,
            None => writeln!(f, "config: (defaults)")?,
        }
        writeln!(f, "  max processes:     {}", c.limits.max_processes)?;
        writeln!(f, "  max channels:      {}", c.limits.max_channels)?;
        writeln!(f, "  memory budget:     {} bytes", c.limits.memory_budget)?;
        writeln!(f, "  queue depth:       {}", c.queue_depth)?;
        writeln!(f, "  max message size:  {} bytes", c.max_message_size)?;
        writeln!(f, "  audit capacity:    {}", c.audit_capacity)?;
        writeln!(f, "  audit severity:    {:?}", c.audit_min_severity)?;
        writeln!(f, "  delegation scope:  {:?}", c.delegation_scope)?;
        write!(f, "  misuse policy:     flag after {}", c.misuse.flag_after)?;
        match c.misuse.terminate_after {
            Some(n) => write!(f, ", terminate after {n}"),
            None => write!(f, ", never terminate"),
        }
    }
}
