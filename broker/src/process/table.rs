//! Process Table
//!
//! Every process the coordinator has launched, keyed by id. Terminated
//! processes keep their record so that termination stays idempotent and
//! late lookups report `ProcessTerminated` rather than an unknown id.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::{ProcessId, ProcessInfo, ProcessKind, ProcessState};
use crate::error::{BrokerError, Result};
use crate::ipc::{BufferId, EndpointId, Interface};

/// Coordinator-side process record.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub kind: ProcessKind,
    pub name: String,
    pub state: ProcessState,
    pub flagged: bool,
    pub strikes: u32,
    pub memory_bytes: u64,
    /// Process side of the launch channel.
    pub launch_endpoint: EndpointId,
    /// Endpoints currently owned.
    pub endpoints: Vec<EndpointId>,
    /// Shared buffers currently mapped.
    pub buffers: Vec<BufferId>,
}

impl ProcessRecord {
    /// Create a running process record.
    pub fn new(
        id: ProcessId,
        kind: ProcessKind,
        name: &str,
        memory_bytes: u64,
        launch_endpoint: EndpointId,
    ) -> Self {
        ProcessRecord {
            id,
            kind,
            name: String::from(name),
            state: ProcessState::Running,
            flagged: false,
            strikes: 0,
            memory_bytes,
            launch_endpoint,
            endpoints: alloc::vec![launch_endpoint],
            buffers: Vec::new(),
        }
    }

    /// Check if the process is live.
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// Record ownership of an endpoint.
    pub fn add_endpoint(&mut self, endpoint: EndpointId) {
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }

    /// Forget an endpoint (it was transferred away).
    pub fn remove_endpoint(&mut self, endpoint: EndpointId) {
        self.endpoints.retain(|e| *e != endpoint);
    }

    /// Snapshot, with `capabilities` supplied by the token table.
    pub fn info(&self, capabilities: Vec<Interface>) -> ProcessInfo {
        ProcessInfo {
            pid: self.id,
            kind: self.kind,
            name: self.name.clone(),
            state: self.state,
            flagged: self.flagged,
            strikes: self.strikes,
            memory_bytes: self.memory_bytes,
            launch_endpoint: self.launch_endpoint,
            endpoints: self.endpoints.clone(),
            capabilities,
        }
    }
}

/// Table of all processes.
#[derive(Debug)]
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, ProcessRecord>,
    next_pid: u64,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Create an empty table. Pids start at 1; 0 is the coordinator.
    pub fn new() -> Self {
        ProcessTable {
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    /// Reserve the next pid.
    pub fn allocate_pid(&mut self) -> ProcessId {
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Insert a record.
    pub fn insert(&mut self, record: ProcessRecord) {
        self.processes.insert(record.id, record);
    }

    /// Look up a process.
    pub fn get(&self, pid: ProcessId) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    /// Look up a process mutably.
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessRecord> {
        self.processes.get_mut(&pid)
    }

    /// Look up a process that must still be running.
    pub fn running(&self, pid: ProcessId) -> Result<&ProcessRecord> {
        let record = self.get(pid).ok_or(BrokerError::UnknownProcess)?;
        if !record.is_running() {
            return Err(BrokerError::ProcessTerminated);
        }
        Ok(record)
    }

    /// Ids of running processes, ascending.
    pub fn live_ids(&self) -> Vec<ProcessId> {
        self.processes
            .values()
            .filter(|p| p.is_running())
            .map(|p| p.id)
            .collect()
    }

    /// Number of running processes.
    pub fn live_count(&self) -> usize {
        self.processes.values().filter(|p| p.is_running()).count()
    }

    /// Number of running processes under monitoring.
    pub fn flagged_count(&self) -> usize {
        self.processes
            .values()
            .filter(|p| p.is_running() && p.flagged)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{ChannelId, Side};
    use crate::process::TerminationReason;

    fn record(table: &mut ProcessTable) -> ProcessId {
        let pid = table.allocate_pid();
        let endpoint = EndpointId::new(ChannelId(pid.0), Side::B);
        table.insert(ProcessRecord::new(
            pid,
            ProcessKind::Renderer,
            "tab",
            0,
            endpoint,
        ));
        pid
    }

    #[test]
    fn test_pids_start_after_coordinator() {
        let mut table = ProcessTable::new();
        assert_eq!(record(&mut table), ProcessId(1));
        assert_eq!(record(&mut table), ProcessId(2));
        assert_eq!(table.live_ids(), alloc::vec![ProcessId(1), ProcessId(2)]);
    }

    #[test]
    fn test_running_lookup() {
        let mut table = ProcessTable::new();
        let pid = record(&mut table);
        assert!(table.running(pid).is_ok());
        assert_eq!(
            table.running(ProcessId(99)).err(),
            Some(BrokerError::UnknownProcess)
        );

        table.get_mut(pid).unwrap().state =
            ProcessState::Terminated(TerminationReason::Crashed);
        assert_eq!(table.running(pid).err(), Some(BrokerError::ProcessTerminated));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_endpoint_bookkeeping() {
        let mut table = ProcessTable::new();
        let pid = record(&mut table);
        let extra = EndpointId::new(ChannelId(50), Side::A);
        let rec = table.get_mut(pid).unwrap();
        rec.add_endpoint(extra);
        rec.add_endpoint(extra);
        assert_eq!(rec.endpoints.len(), 2);
        rec.remove_endpoint(extra);
        assert_eq!(rec.endpoints.len(), 1);
    }
}
