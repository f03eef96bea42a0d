//! Resource Management
//!
//! Ceilings on live processes, open channels and accounted memory, and
//! the running usage checked against them.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Resource, Result};

/// Resource ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum live processes (the coordinator is not counted).
    pub max_processes: usize,
    /// Maximum channels not yet closed.
    pub max_channels: usize,
    /// Memory budget in bytes (process footprints plus shared buffers).
    pub memory_budget: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_processes: 64,
            max_channels: 1024,
            memory_budget: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

impl ResourceLimits {
    /// Set the process ceiling.
    pub fn with_max_processes(mut self, max: usize) -> Self {
        self.max_processes = max;
        self
    }

    /// Set the channel ceiling.
    pub fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    /// Set the memory budget.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }
}

/// Current usage.
///
/// Open channels are counted from the channel table on demand, so only
/// processes and memory are tracked here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub processes: usize,
    pub memory: u64,
}

impl ResourceUsage {
    /// Check that one more process of `memory` bytes fits, then charge it.
    pub fn reserve_process(&mut self, limits: &ResourceLimits, memory: u64) -> Result<()> {
        if self.processes >= limits.max_processes {
            return Err(BrokerError::ResourceExhausted(Resource::Processes));
        }
        self.check_memory(limits, memory)?;

        self.processes += 1;
        self.memory += memory;
        Ok(())
    }

    /// Release a process's charge.
    pub fn release_process(&mut self, memory: u64) {
        self.processes = self.processes.saturating_sub(1);
        self.release_memory(memory);
    }

    /// Charge memory that is not a process footprint.
    pub fn reserve_memory(&mut self, limits: &ResourceLimits, memory: u64) -> Result<()> {
        self.check_memory(limits, memory)?;
        self.memory += memory;
        Ok(())
    }

    /// Release memory.
    pub fn release_memory(&mut self, memory: u64) {
        self.memory = self.memory.saturating_sub(memory);
    }

    fn check_memory(&self, limits: &ResourceLimits, memory: u64) -> Result<()> {
        match self.memory.checked_add(memory) {
            Some(total) if total <= limits.memory_budget => Ok(()),
            _ => Err(BrokerError::ResourceExhausted(Resource::Memory)),
        }
    }
}

/// Check that one more channel fits given `open` channels.
pub fn check_channel(limits: &ResourceLimits, open: usize) -> Result<()> {
    if open >= limits.max_channels {
        return Err(BrokerError::ResourceExhausted(Resource::Channels));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_ceiling() {
        let limits = ResourceLimits::default().with_max_processes(1);
        let mut usage = ResourceUsage::default();
        usage.reserve_process(&limits, 10).unwrap();
        assert_eq!(
            usage.reserve_process(&limits, 10),
            Err(BrokerError::ResourceExhausted(Resource::Processes))
        );
        usage.release_process(10);
        assert_eq!(usage, ResourceUsage::default());
        usage.reserve_process(&limits, 10).unwrap();
    }

    #[test]
    fn test_memory_ceiling_leaves_usage_untouched() {
        let limits = ResourceLimits::default().with_memory_budget(100);
        let mut usage = ResourceUsage::default();
        usage.reserve_process(&limits, 60).unwrap();
        assert_eq!(
            usage.reserve_process(&limits, 41),
            Err(BrokerError::ResourceExhausted(Resource::Memory))
        );
        assert_eq!(usage.processes, 1);
        assert_eq!(usage.memory, 60);
        usage.reserve_memory(&limits, 40).unwrap();
        assert_eq!(usage.memory, 100);
    }

    #[test]
    fn test_memory_overflow_is_exhaustion() {
        let limits = ResourceLimits::default().with_memory_budget(u64::MAX);
        let mut usage = ResourceUsage::default();
        usage.reserve_memory(&limits, u64::MAX).unwrap();
        assert_eq!(
            usage.reserve_memory(&limits, 1),
            Err(BrokerError::ResourceExhausted(Resource::Memory))
        );
    }

    #[test]
    fn test_channel_ceiling() {
        let limits = ResourceLimits::default().with_max_channels(2);
        assert!(check_channel(&limits, 1).is_ok());
        assert!(check_channel(&limits, 2).is_err());
    }
}
