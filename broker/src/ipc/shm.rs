//! Negotiated shared buffers.
//!
//! The one exception to "nothing is shared": a buffer created by one
//! process and explicitly mapped into others by the coordinator. Every
//! access is checked against the accessor's mapping rights.

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use serde::Serialize;

use crate::error::{BrokerError, Result};
use crate::process::ProcessId;

/// Shared buffer ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BufferId(pub u64);

bitflags! {
    /// Access rights of one mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferRights: u32 {
        /// Region can be read.
        const READ = 0x01;
        /// Region can be written.
        const WRITE = 0x02;
    }
}

/// A mapping of a shared buffer into a process.
#[derive(Debug, Clone)]
struct BufferMapping {
    pid: ProcessId,
    rights: BufferRights,
}

/// Shared buffer descriptor.
#[derive(Debug)]
pub struct SharedBuffer {
    id: BufferId,
    creator: ProcessId,
    data: Vec<u8>,
    mappings: Vec<BufferMapping>,
}

impl SharedBuffer {
    /// Create a zeroed buffer mapped read/write into its creator.
    pub fn new(id: BufferId, creator: ProcessId, size: usize) -> Self {
        SharedBuffer {
            id,
            creator,
            data: vec![0; size],
            mappings: vec![BufferMapping {
                pid: creator,
                rights: BufferRights::READ | BufferRights::WRITE,
            }],
        }
    }

    /// Get the buffer ID.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Creating process.
    pub fn creator(&self) -> ProcessId {
        self.creator
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Rights `pid` has on this buffer, if mapped.
    pub fn rights_for(&self, pid: ProcessId) -> Option<BufferRights> {
        self.mappings.iter().find(|m| m.pid == pid).map(|m| m.rights)
    }

    /// Map into `pid`, replacing any existing mapping.
    pub fn map(&mut self, pid: ProcessId, rights: BufferRights) {
        match self.mappings.iter_mut().find(|m| m.pid == pid) {
            Some(m) => m.rights = rights,
            None => self.mappings.push(BufferMapping { pid, rights }),
        }
    }

    /// Remove `pid`'s mapping. Returns false if it had none.
    pub fn unmap(&mut self, pid: ProcessId) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.pid != pid);
        self.mappings.len() != before
    }

    /// Whether nobody maps the buffer any more.
    pub fn is_orphaned(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Read `len` bytes at `offset`.
    pub fn read(&self, pid: ProcessId, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check(pid, BufferRights::READ)?;
        let range = self.range(offset, len)?;
        Ok(self.data[range].to_vec())
    }

    /// Write `bytes` at `offset`.
    pub fn write(&mut self, pid: ProcessId, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(pid, BufferRights::WRITE)?;
        let range = self.range(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn check(&self, pid: ProcessId, needed: BufferRights) -> Result<()> {
        match self.rights_for(pid) {
            Some(rights) if rights.contains(needed) => Ok(()),
            _ => Err(BrokerError::PermissionDenied),
        }
    }

    fn range(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>> {
        let end = offset.checked_add(len).ok_or(BrokerError::OutOfBounds)?;
        if end > self.data.len() {
            return Err(BrokerError::OutOfBounds);
        }
        Ok(offset..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: ProcessId = ProcessId(1);
    const PEER: ProcessId = ProcessId(2);

    #[test]
    fn test_creator_reads_and_writes() {
        let mut buf = SharedBuffer::new(BufferId(1), OWNER, 8);
        buf.write(OWNER, 2, &[1, 2, 3]).unwrap();
        assert_eq!(buf.read(OWNER, 0, 6).unwrap(), vec![0, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_unmapped_process_is_denied() {
        let buf = SharedBuffer::new(BufferId(1), OWNER, 8);
        assert_eq!(buf.read(PEER, 0, 1), Err(BrokerError::PermissionDenied));
    }

    #[test]
    fn test_read_only_mapping() {
        let mut buf = SharedBuffer::new(BufferId(1), OWNER, 4);
        buf.map(PEER, BufferRights::READ);
        buf.write(OWNER, 0, &[7]).unwrap();
        assert_eq!(buf.read(PEER, 0, 1).unwrap(), vec![7]);
        assert_eq!(buf.write(PEER, 0, &[9]), Err(BrokerError::PermissionDenied));
    }

    #[test]
    fn test_bounds() {
        let mut buf = SharedBuffer::new(BufferId(1), OWNER, 4);
        assert_eq!(buf.read(OWNER, 2, 3), Err(BrokerError::OutOfBounds));
        assert_eq!(
            buf.write(OWNER, usize::MAX, &[1]),
            Err(BrokerError::OutOfBounds)
        );
        assert!(buf.read(OWNER, 4, 0).unwrap().is_empty());
    }

    #[test]
    fn test_orphaned_after_last_unmap() {
        let mut buf = SharedBuffer::new(BufferId(1), OWNER, 4);
        buf.map(PEER, BufferRights::READ);
        assert!(buf.unmap(OWNER));
        assert!(!buf.is_orphaned());
        assert!(buf.unmap(PEER));
        assert!(buf.is_orphaned());
        assert!(!buf.unmap(PEER));
    }
}
