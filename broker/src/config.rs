//! Broker configuration.
//!
//! Every field has a working default so an empty config document is
//! valid. Host tooling deserializes this from TOML.

use serde::{Deserialize, Serialize};

use crate::ipc::{DEFAULT_QUEUE_DEPTH, MAX_MESSAGE_SIZE};
use crate::security::{AuditSeverity, ResourceLimits};

/// Lifetime of a delegated capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationScope {
    /// Valid until the channel it was issued on closes.
    #[default]
    Channel,
    /// Additionally revoked when the delegator's source token is revoked.
    Delegator,
}

/// What happens to a process that keeps sending unauthorized messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MisusePolicy {
    /// Rejections before the process is flagged for monitoring.
    pub flag_after: u32,
    /// Rejections before the process is terminated (`None` = never).
    pub terminate_after: Option<u32>,
}

impl Default for MisusePolicy {
    fn default() -> Self {
        MisusePolicy {
            flag_after: 1,
            terminate_after: Some(8),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Process, channel and memory ceilings.
    pub limits: ResourceLimits,
    /// Receiver queue depth before `Send` reports backpressure.
    pub queue_depth: usize,
    /// Maximum payload size in bytes.
    pub max_message_size: usize,
    /// Audit ring buffer capacity.
    pub audit_capacity: usize,
    /// Minimum severity kept in the audit log.
    pub audit_min_severity: AuditSeverity,
    /// Lifetime policy for delegated tokens.
    pub delegation_scope: DelegationScope,
    /// Policy for processes that send unauthorized messages.
    pub misuse: MisusePolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            limits: ResourceLimits::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_message_size: MAX_MESSAGE_SIZE,
            audit_capacity: 1024,
            audit_min_severity: AuditSeverity::Info,
            delegation_scope: DelegationScope::Channel,
            misuse: MisusePolicy::default(),
        }
    }
}

impl BrokerConfig {
    /// Set the receiver queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the resource ceilings.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the delegation lifetime policy.
    pub fn with_delegation_scope(mut self, scope: DelegationScope) -> Self {
        self.delegation_scope = scope;
        self
    }

    /// Set the misuse policy.
    pub fn with_misuse(mut self, misuse: MisusePolicy) -> Self {
        self.misuse = misuse;
        self
    }
}
