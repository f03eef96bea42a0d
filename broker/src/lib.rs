//! Capability-scoped multi-process message broker.
//!
//! A privileged [`Coordinator`] owns every process record, every message
//! pipe and every capability token. Worker processes never touch each
//! other's state: they hold endpoint handles and capability tokens, and
//! everything they do to another process goes through a message.
//!
//! # Modules
//!
//! - `coordinator`: process launch, delegation, termination, routing
//! - `ipc`: channels, messages, capability tokens, shared buffers
//! - `security`: capability validation, audit log, resource accounting
//! - `process`: process records and the process table
//! - `config`: broker configuration
//!
//! The crate is `no_std` + `alloc` so the same core can be embedded in a
//! kernel-style environment.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ipc;
pub mod process;
pub mod security;

pub use config::{BrokerConfig, DelegationScope, MisusePolicy};
pub use coordinator::{BoundInterface, Coordinator, CoordinatorStats, LaunchSpec, ProcessHandle};
pub use error::{BrokerError, Resource, Result};
pub use ipc::{
    BufferId, BufferRights, CapabilityRights, CapabilityToken, ChannelId, ChannelPair,
    ChannelState, EndpointId, Interface, Message, MethodId, Side, TokenId,
};
pub use process::{ProcessId, ProcessInfo, ProcessKind, ProcessState, TerminationReason};
pub use security::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSeverity, Rejection, ResourceLimits,
};
