//! Process management.
//!
//! Process records owned by the coordinator. A process here is an
//! isolation boundary: the only things it owns are channel endpoints,
//! capability tokens and shared-buffer mappings.

pub mod table;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

pub use table::{ProcessRecord, ProcessTable};

use crate::ipc::{EndpointId, Interface};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// The coordinator itself (always 0).
    pub const COORDINATOR: ProcessId = ProcessId(0);
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessKind {
    /// Web content renderer.
    Renderer,
    /// GPU process.
    Gpu,
    /// Network service.
    Network,
    /// Storage service.
    Storage,
    /// Short-lived utility (decoders, unzip, ...).
    Utility,
    /// Extension host.
    Extension,
}

impl ProcessKind {
    /// Memory charged against the budget when no explicit figure is given.
    pub fn default_memory(&self) -> u64 {
        const MIB: u64 = 1024 * 1024;
        match self {
            ProcessKind::Renderer => 128 * MIB,
            ProcessKind::Gpu => 256 * MIB,
            ProcessKind::Network => 32 * MIB,
            ProcessKind::Storage => 32 * MIB,
            ProcessKind::Utility => 16 * MIB,
            ProcessKind::Extension => 64 * MIB,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Renderer => "renderer",
            ProcessKind::Gpu => "gpu",
            ProcessKind::Network => "network",
            ProcessKind::Storage => "storage",
            ProcessKind::Utility => "utility",
            ProcessKind::Extension => "extension",
        }
    }
}

/// Why a process was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Orderly shutdown.
    Shutdown,
    /// The process crashed.
    Crashed,
    /// Killed by the misuse policy.
    PolicyViolation,
    /// Killed by the coordinator for any other reason.
    Killed,
}

/// Process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    /// Process is live.
    Running,
    /// Process is gone; its channels are closed and tokens revoked.
    Terminated(TerminationReason),
}

/// Snapshot of a process for callers outside the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub kind: ProcessKind,
    pub name: String,
    pub state: ProcessState,
    /// Under increased monitoring after capability misuse.
    pub flagged: bool,
    /// Rejected messages so far.
    pub strikes: u32,
    /// Memory charged against the budget.
    pub memory_bytes: u64,
    /// Endpoint of the launch channel (process side).
    pub launch_endpoint: EndpointId,
    /// Endpoints currently owned.
    pub endpoints: Vec<EndpointId>,
    /// Interfaces held through live tokens.
    pub capabilities: Vec<Interface>,
}
