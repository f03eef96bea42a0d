//! Broker audit trail
//!
//! Launches, delegations, rejected messages and policy actions are kept
//! in a bounded ring so a supervisor can inspect recent history. Every
//! recorded event is mirrored to the `log` facade.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::ipc::ChannelId;
use crate::process::ProcessId;

/// How much an event matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum AuditSeverity {
    Debug = 0,
    Info = 1,
    Notice = 2,
    /// Refusals and policy actions.
    Warning = 3,
    Error = 4,
    Critical = 5,
}

impl AuditSeverity {
    fn level(self) -> log::Level {
        match self {
            AuditSeverity::Debug => log::Level::Debug,
            AuditSeverity::Info | AuditSeverity::Notice => log::Level::Info,
            AuditSeverity::Warning => log::Level::Warn,
            AuditSeverity::Error | AuditSeverity::Critical => log::Level::Error,
        }
    }
}

/// What part of the broker an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditCategory {
    Process,
    Channel,
    /// Token checks on routed messages and explicit validation.
    Capability,
    Delegation,
    /// Process, channel or memory ceilings.
    Resource,
    Buffer,
    /// Misuse policy (flagging, forced termination).
    Policy,
}

/// Result of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Refused for lack of a capability or right.
    Denied,
}

impl AuditOutcome {
    fn tag(self) -> &'static str {
        match self {
            AuditOutcome::Success => "ok",
            AuditOutcome::Failure => "fail",
            AuditOutcome::Denied => "deny",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Sequence number assigned when recorded; 0 until then.
    pub id: u64,
    /// Coordinator logical clock.
    pub timestamp: u64,
    pub severity: AuditSeverity,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub pid: Option<ProcessId>,
    pub channel: Option<ChannelId>,
    pub message: String,
    pub details: Vec<(String, String)>,
}

impl AuditEvent {
    pub fn new(
        severity: AuditSeverity,
        category: AuditCategory,
        outcome: AuditOutcome,
        message: &str,
    ) -> Self {
        AuditEvent {
            id: 0,
            timestamp: 0,
            severity,
            category,
            outcome,
            pid: None,
            channel: None,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Warning-level refusal.
    pub fn denied(category: AuditCategory, message: &str) -> Self {
        Self::new(AuditSeverity::Warning, category, AuditOutcome::Denied, message)
    }

    /// Info-level success.
    pub fn success(category: AuditCategory, message: &str) -> Self {
        Self::new(AuditSeverity::Info, category, AuditOutcome::Success, message)
    }

    pub fn with_pid(mut self, pid: ProcessId) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_channel(mut self, channel: ChannelId) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach a key/value pair.
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// First value recorded under `key`.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }
}

/// Bounded audit ring.
#[derive(Debug)]
pub struct AuditLog {
    ring: VecDeque<AuditEvent>,
    capacity: usize,
    recorded: u64,
    evicted: u64,
    threshold: AuditSeverity,
}

impl AuditLog {
    /// Keep at most `capacity` events at or above `threshold`.
    pub fn new(capacity: usize, threshold: AuditSeverity) -> Self {
        AuditLog {
            ring: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            recorded: 0,
            evicted: 0,
            threshold,
        }
    }

    /// Record an event, evicting the oldest one when full.
    pub fn log(&mut self, mut event: AuditEvent) {
        if event.severity < self.threshold {
            return;
        }

        self.recorded += 1;
        event.id = self.recorded;

        log::log!(
            event.severity.level(),
            "[Audit][{:?}][{}] {}",
            event.category,
            event.outcome.tag(),
            event.message
        );

        if self.capacity == 0 {
            self.evicted += 1;
            return;
        }
        while self.ring.len() >= self.capacity {
            self.ring.pop_front();
            self.evicted += 1;
        }
        self.ring.push_back(event);
    }

    /// Stored events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &AuditEvent> {
        self.ring.iter()
    }

    /// Stored events matching `filter`, oldest first.
    pub fn matching(&self, filter: impl Fn(&AuditEvent) -> bool) -> Vec<&AuditEvent> {
        self.ring.iter().filter(|e| filter(e)).collect()
    }

    pub fn in_category(&self, category: AuditCategory) -> Vec<&AuditEvent> {
        self.matching(|e| e.category == category)
    }

    pub fn about_process(&self, pid: ProcessId) -> Vec<&AuditEvent> {
        self.matching(|e| e.pid == Some(pid))
    }

    pub fn denials(&self) -> Vec<&AuditEvent> {
        self.matching(|e| e.outcome == AuditOutcome::Denied)
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            total_events: self.recorded,
            stored_events: self.ring.len() as u64,
            dropped_events: self.evicted,
            denied_events: self.denials().len() as u64,
        }
    }
}

/// Audit counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Events recorded since start, including evicted ones.
    pub total_events: u64,
    pub stored_events: u64,
    /// Events evicted from the ring.
    pub dropped_events: u64,
    /// Denials still in the ring.
    pub denied_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut log = AuditLog::new(2, AuditSeverity::Debug);
        for n in 0..3 {
            log.log(AuditEvent::success(AuditCategory::Process, "launch").with_pid(ProcessId(n)));
        }

        let stats = log.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.stored_events, 2);
        assert_eq!(stats.dropped_events, 1);
        assert_eq!(log.events().next().unwrap().pid, Some(ProcessId(1)));
        assert_eq!(log.events().last().unwrap().id, 3);
    }

    #[test]
    fn test_threshold_filters() {
        let mut log = AuditLog::new(16, AuditSeverity::Warning);
        log.log(AuditEvent::success(AuditCategory::Channel, "open"));
        log.log(AuditEvent::denied(AuditCategory::Capability, "bad token"));
        assert_eq!(log.stats().total_events, 1);
        assert_eq!(log.denials().len(), 1);
    }

    #[test]
    fn test_queries() {
        let mut log = AuditLog::new(16, AuditSeverity::Debug);
        log.log(
            AuditEvent::denied(AuditCategory::Delegation, "no source")
                .with_pid(ProcessId(4))
                .with_detail("interface", "gpu"),
        );
        log.log(AuditEvent::success(AuditCategory::Process, "launch").with_pid(ProcessId(5)));

        assert_eq!(log.about_process(ProcessId(4)).len(), 1);
        assert_eq!(log.in_category(AuditCategory::Process).len(), 1);
        assert_eq!(log.about_process(ProcessId(4))[0].detail("interface"), Some("gpu"));
        assert_eq!(log.about_process(ProcessId(4))[0].detail("missing"), None);
    }
}
