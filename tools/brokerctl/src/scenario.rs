//! Scenario files.
//!
//! A scenario is a TOML document with an ordered list of `[[step]]`
//! tables. Each step names an `op` and the processes and channels it
//! acts on by the names given to them earlier in the same scenario.
//!
//! ```toml
//! name = "delegation"
//!
//! [[step]]
//! op = "launch"
//! name = "a"
//! kind = "renderer"
//! capabilities = ["network"]
//!
//! [[step]]
//! op = "send"
//! process = "a"
//! channel = "launch"
//! interface = "gpu"
//! expect = "permission-denied"
//! ```

use std::path::Path;

use ipc_broker::{Interface, ProcessKind, TerminationReason};
use serde::{Deserialize, Serialize};

use crate::error::BrokerctlError;

/// Channel label that names a process's launch channel.
pub const LAUNCH_CHANNEL: &str = "launch";

/// Top-level scenario loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// One scripted step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// Expected outcome: `ok`, `valid`, `invalid`, `empty`, or an error kind
    /// such as `permission-denied`. When absent, any non-failing outcome passes.
    #[serde(default)]
    pub expect: Option<String>,
}

/// Which token a `send` or `validate` step presents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenChoice {
    /// The token this process holds for the interface on this channel, if any.
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// No token.
    #[serde(rename = "none")]
    Omit,
    /// A token id the coordinator never issued.
    #[serde(rename = "forged")]
    Forged,
}

/// Step operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Action {
    Launch {
        name: String,
        kind: ProcessKind,
        #[serde(default)]
        capabilities: Vec<Interface>,
        #[serde(default)]
        memory: Option<u64>,
    },
    Delegate {
        from: String,
        to: String,
        interface: Interface,
    },
    Bind {
        label: String,
        client: String,
        host: String,
        interface: Interface,
    },
    Send {
        process: String,
        channel: String,
        interface: Interface,
        #[serde(default)]
        ordinal: u32,
        /// Payload text; `{n}` is replaced by the repetition index.
        #[serde(default)]
        payload: String,
        /// Send this many zero bytes instead of `payload`.
        #[serde(default)]
        size: Option<usize>,
        #[serde(default)]
        token: TokenChoice,
        #[serde(default = "one")]
        repeat: u32,
    },
    Receive {
        process: String,
        channel: String,
        #[serde(default = "one")]
        count: u32,
        /// Expected payload texts, in order.
        #[serde(default)]
        payloads: Option<Vec<String>>,
    },
    Close {
        process: String,
        channel: String,
    },
    Terminate {
        process: String,
        #[serde(default = "default_reason")]
        reason: TerminationReason,
    },
    Validate {
        process: String,
        channel: String,
        interface: Interface,
        #[serde(default)]
        token: TokenChoice,
    },
    Stats,
}

fn one() -> u32 {
    1
}

fn default_reason() -> TerminationReason {
    TerminationReason::Shutdown
}

impl Action {
    /// The `op` name.
    pub fn op(&self) -> &'static str {
        match self {
            Action::Launch { .. } => "launch",
            Action::Delegate { .. } => "delegate",
            Action::Bind { .. } => "bind",
            Action::Send { .. } => "send",
            Action::Receive { .. } => "receive",
            Action::Close { .. } => "close",
            Action::Terminate { .. } => "terminate",
            Action::Validate { .. } => "validate",
            Action::Stats => "stats",
        }
    }
}

/// Parse a scenario from a TOML file path.
pub fn parse_scenario(path: &Path) -> Result<Scenario, BrokerctlError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BrokerctlError::ScenarioParse(format!("scenario file not found: {}", path.display()))
        } else {
            BrokerctlError::Io(e)
        }
    })?;
    parse_scenario_str(&content)
}

/// Parse a scenario from a TOML string.
pub fn parse_scenario_str(content: &str) -> Result<Scenario, BrokerctlError> {
    toml::from_str(content)
        .map_err(|e| BrokerctlError::ScenarioParse(format!("invalid TOML: {e}")))
}
