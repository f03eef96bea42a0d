//! Coordinator
//!
//! The privileged process. It owns the process table, every channel,
//! every capability token and every shared buffer, and it is the only
//! code that mutates them. All of that lives in one [`State`] behind a
//! single lock, so launch, delegate, terminate and routing calls from
//! many threads are serialized without any further locking.
//!
//! Callers act on behalf of a process by passing its [`ProcessId`] and an
//! endpoint it owns. Ownership is checked on every call, and the sender
//! id and sequence number on routed messages are stamped here, so a
//! process cannot impersonate another one.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;
use serde::Serialize;
use spin::Mutex;

use crate::config::{BrokerConfig, DelegationScope};
use crate::error::{BrokerError, Result};
use crate::ipc::{
    BufferId, BufferRights, CapabilityRights, CapabilityToken, Channel, ChannelId, ChannelPair,
    ChannelState, EndpointId, Interface, Message, SharedBuffer, Side, TokenId, TokenTable,
};
use crate::process::{
    ProcessId, ProcessInfo, ProcessKind, ProcessRecord, ProcessState, ProcessTable,
    TerminationReason,
};
use crate::security::resource::{self, ResourceUsage};
use crate::security::{
    AuditCategory, AuditEvent, AuditLog, AuditOutcome, AuditSeverity, AuditStats,
    CapabilityValidator, Rejection,
};

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub kind: ProcessKind,
    pub name: String,
    /// Interfaces the process receives tokens for.
    pub capabilities: Vec<Interface>,
    /// Memory to charge; defaults to [`ProcessKind::default_memory`].
    pub memory_bytes: Option<u64>,
}

impl LaunchSpec {
    pub fn new(kind: ProcessKind, name: &str) -> Self {
        LaunchSpec {
            kind,
            name: String::from(name),
            capabilities: Vec::new(),
            memory_bytes: None,
        }
    }

    /// Request one capability.
    pub fn with_capability(mut self, interface: Interface) -> Self {
        if !self.capabilities.contains(&interface) {
            self.capabilities.push(interface);
        }
        self
    }

    /// Request several capabilities.
    pub fn with_capabilities(mut self, interfaces: &[Interface]) -> Self {
        for interface in interfaces {
            self = self.with_capability(*interface);
        }
        self
    }

    /// Charge an explicit amount of memory.
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }
}

/// Returned by [`Coordinator::launch_process`].
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: ProcessId,
    pub kind: ProcessKind,
    /// Process side of the launch channel.
    pub endpoint: EndpointId,
    /// Coordinator side of the launch channel.
    pub coordinator_endpoint: EndpointId,
    /// Tokens issued at launch, scoped to `endpoint`.
    pub tokens: Vec<(Interface, CapabilityToken)>,
}

impl ProcessHandle {
    /// Token issued at launch for `interface`.
    pub fn token(&self, interface: Interface) -> Option<CapabilityToken> {
        self.tokens
            .iter()
            .find(|(i, _)| *i == interface)
            .map(|(_, t)| *t)
    }
}

/// Returned by [`Coordinator::bind_interface`].
#[derive(Debug, Clone, Copy)]
pub struct BoundInterface {
    pub interface: Interface,
    /// Client side; messages sent here reach the host.
    pub client: EndpointId,
    /// Host side; inbound messages are capability checked.
    pub host: EndpointId,
    /// Client token scoped to `client`.
    pub token: CapabilityToken,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CoordinatorStats {
    pub processes: usize,
    pub flagged_processes: usize,
    pub open_channels: usize,
    pub live_tokens: usize,
    pub shared_buffers: usize,
    pub memory_used: u64,
    pub memory_budget: u64,
    pub queued_messages: usize,
    pub audit: AuditStats,
}

/// Everything the coordinator owns.
struct State {
    config: BrokerConfig,
    processes: ProcessTable,
    channels: HashMap<ChannelId, Channel>,
    tokens: TokenTable,
    buffers: HashMap<BufferId, SharedBuffer>,
    usage: ResourceUsage,
    audit: AuditLog,
    next_channel: u64,
    next_buffer: u64,
    next_sequence: u64,
    clock: u64,
}

/// The coordinator.
pub struct Coordinator {
    state: Mutex<State>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Coordinator {
    /// Create a coordinator with no processes.
    pub fn new(config: BrokerConfig) -> Self {
        log::debug!(
            "[Broker] Coordinator initialized (max {} processes, queue depth {})",
            config.limits.max_processes,
            config.queue_depth
        );

        Coordinator {
            state: Mutex::new(State {
                audit: AuditLog::new(config.audit_capacity, config.audit_min_severity),
                config,
                processes: ProcessTable::new(),
                channels: HashMap::new(),
                tokens: TokenTable::new(),
                buffers: HashMap::new(),
                usage: ResourceUsage::default(),
                next_channel: 1,
                next_buffer: 1,
                next_sequence: 1,
                clock: 0,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> BrokerConfig {
        self.state.lock().config.clone()
    }

    /// Launch a process with a fresh launch channel and its initial tokens.
    pub fn launch_process(&self, spec: LaunchSpec) -> Result<ProcessHandle> {
        self.state.lock().launch(spec)
    }

    /// Issue `from`'s capability for `interface` to `to`.
    pub fn delegate_capability(
        &self,
        from: ProcessId,
        to: ProcessId,
        interface: Interface,
    ) -> Result<CapabilityToken> {
        self.state.lock().delegate(from, to, interface)
    }

    /// Terminate a process. Idempotent.
    pub fn terminate_process(&self, pid: ProcessId, reason: TerminationReason) -> Result<()> {
        self.state.lock().terminate(pid, reason)
    }

    /// Create a channel so `client` can call `interface` on `host`.
    pub fn bind_interface(
        &self,
        client: ProcessId,
        host: ProcessId,
        interface: Interface,
    ) -> Result<BoundInterface> {
        self.state.lock().bind(client, host, interface)
    }

    /// Create a host-less pipe with both ends owned by `owner`.
    pub fn open_pipe(&self, owner: ProcessId) -> Result<ChannelPair> {
        self.state.lock().open_pipe(owner)
    }

    /// Send `message` from `endpoint`, acting as `pid`. Never blocks.
    pub fn send(&self, pid: ProcessId, endpoint: EndpointId, message: Message) -> Result<()> {
        self.state.lock().send(pid, endpoint, message)
    }

    /// Take the next message queued at `endpoint`, acting as `pid`.
    pub fn receive(&self, pid: ProcessId, endpoint: EndpointId) -> Result<Option<Message>> {
        self.state.lock().receive(pid, endpoint)
    }

    /// Request close of the channel `endpoint` belongs to. Idempotent.
    pub fn close_channel(&self, pid: ProcessId, endpoint: EndpointId) -> Result<()> {
        self.state.lock().close_endpoint(pid, endpoint)
    }

    /// Whether `token` authorizes `interface` for whoever owns `endpoint`.
    ///
    /// A false result is written to the audit log.
    pub fn validate(
        &self,
        token: CapabilityToken,
        interface: Interface,
        endpoint: EndpointId,
    ) -> bool {
        self.state.lock().validate(token, interface, endpoint)
    }

    /// Whether `token` was issued and has not been revoked.
    pub fn is_token_live(&self, token: CapabilityToken) -> bool {
        self.state
            .lock()
            .tokens
            .get(token.id())
            .map_or(false, |t| !t.revoked)
    }

    /// Create a zeroed shared buffer mapped read/write into `owner`.
    pub fn create_shared_buffer(&self, owner: ProcessId, size: usize) -> Result<BufferId> {
        self.state.lock().create_buffer(owner, size)
    }

    /// Map `buffer` into `peer`. Only the creator may share.
    pub fn share_buffer(
        &self,
        owner: ProcessId,
        buffer: BufferId,
        peer: ProcessId,
        rights: BufferRights,
    ) -> Result<()> {
        self.state.lock().share_buffer(owner, buffer, peer, rights)
    }

    /// Read from a shared buffer.
    pub fn read_buffer(
        &self,
        pid: ProcessId,
        buffer: BufferId,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state.processes.running(pid)?;
        state
            .buffers
            .get(&buffer)
            .ok_or(BrokerError::UnknownBuffer)?
            .read(pid, offset, len)
    }

    /// Write to a shared buffer.
    pub fn write_buffer(
        &self,
        pid: ProcessId,
        buffer: BufferId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.processes.running(pid)?;
        state
            .buffers
            .get_mut(&buffer)
            .ok_or(BrokerError::UnknownBuffer)?
            .write(pid, offset, bytes)
    }

    /// Drop `pid`'s mapping of `buffer`; the last mapping frees it.
    pub fn unmap_buffer(&self, pid: ProcessId, buffer: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        state.processes.running(pid)?;
        if !state
            .buffers
            .get(&buffer)
            .ok_or(BrokerError::UnknownBuffer)?
            .rights_for(pid)
            .is_some()
        {
            return Err(BrokerError::PermissionDenied);
        }
        state.release_mapping(pid, buffer);
        if let Some(record) = state.processes.get_mut(pid) {
            record.buffers.retain(|b| *b != buffer);
        }
        Ok(())
    }

    /// Snapshot of one process.
    pub fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        let state = self.state.lock();
        let record = state.processes.get(pid)?;
        let mut capabilities: Vec<Interface> = state
            .tokens
            .held_by(pid)
            .iter()
            .map(|t| t.interface)
            .collect();
        capabilities.sort();
        capabilities.dedup();
        Some(record.info(capabilities))
    }

    /// Running processes, ascending.
    pub fn live_processes(&self) -> Vec<ProcessId> {
        self.state.lock().processes.live_ids()
    }

    /// State of a channel.
    pub fn channel_state(&self, channel: ChannelId) -> Option<ChannelState> {
        self.state.lock().channels.get(&channel).map(|c| c.state())
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock();
        CoordinatorStats {
            processes: state.processes.live_count(),
            flagged_processes: state.processes.flagged_count(),
            open_channels: state.open_channels(),
            live_tokens: state.tokens.live_count(),
            shared_buffers: state.buffers.len(),
            memory_used: state.usage.memory,
            memory_budget: state.config.limits.memory_budget,
            queued_messages: state.channels.values().map(|c| c.queued()).sum(),
            audit: state.audit.stats(),
        }
    }

    /// Copy of the stored audit events, oldest first.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().audit.events().cloned().collect()
    }

    /// Run `f` against the audit log.
    pub fn with_audit<R>(&self, f: impl FnOnce(&AuditLog) -> R) -> R {
        f(&self.state.lock().audit)
    }
}

impl State {
    fn record(&mut self, mut event: AuditEvent) {
        self.clock += 1;
        event.timestamp = self.clock;
        self.audit.log(event);
    }

    fn open_channels(&self) -> usize {
        self.channels.values().filter(|c| !c.is_closed()).count()
    }

    /// Insert a channel without checking the ceiling.
    fn insert_channel(&mut self, a: ProcessId, b: ProcessId, host: Option<Side>) -> ChannelPair {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;

        let channel = Channel::new(id, a, b, host, self.config.queue_depth);
        let pair = channel.pair();
        self.channels.insert(id, channel);
        pair
    }

    /// Launch channels stay between the coordinator and the launched
    /// process; neither end may be handed to anyone else.
    fn is_launch_channel(&self, id: ChannelId) -> bool {
        self.channels.get(&id).map_or(false, |c| {
            self.processes
                .get(c.owner(Side::B))
                .map_or(false, |r| r.launch_endpoint.channel == id)
        })
    }

    /// `pid` is running (or is the coordinator) and owns `endpoint`.
    fn check_owner(&self, pid: ProcessId, endpoint: EndpointId) -> Result<()> {
        if pid != ProcessId::COORDINATOR {
            self.processes.running(pid)?;
        }
        let channel = self
            .channels
            .get(&endpoint.channel)
            .ok_or(BrokerError::UnknownChannel)?;
        if channel.owner(endpoint.side) != pid {
            return Err(BrokerError::NotEndpointOwner);
        }
        Ok(())
    }

    fn refuse(
        &mut self,
        category: AuditCategory,
        pid: ProcessId,
        message: &str,
        err: BrokerError,
    ) -> BrokerError {
        let outcome = match err {
            BrokerError::PermissionDenied => AuditOutcome::Denied,
            _ => AuditOutcome::Failure,
        };
        self.record(
            AuditEvent::new(AuditSeverity::Warning, category, outcome, message)
                .with_pid(pid)
                .with_detail("error", &err.to_string()),
        );
        err
    }

    fn launch(&mut self, spec: LaunchSpec) -> Result<ProcessHandle> {
        let memory = spec.memory_bytes.unwrap_or_else(|| spec.kind.default_memory());
        let limits = self.config.limits;

        let reserved = resource::check_channel(&limits, self.open_channels())
            .and_then(|()| self.usage.reserve_process(&limits, memory));
        if let Err(err) = reserved {
            self.record(
                AuditEvent::new(
                    AuditSeverity::Warning,
                    AuditCategory::Resource,
                    AuditOutcome::Failure,
                    "launch refused",
                )
                .with_detail("kind", spec.kind.as_str())
                .with_detail("name", &spec.name)
                .with_detail("error", &err.to_string()),
            );
            return Err(err);
        }

        let pid = self.processes.allocate_pid();
        let pair = self.insert_channel(ProcessId::COORDINATOR, pid, Some(Side::A));
        let endpoint = pair.b;

        let tokens: Vec<(Interface, CapabilityToken)> = spec
            .capabilities
            .iter()
            .map(|interface| {
                let token = self
                    .tokens
                    .issue(*interface, CapabilityRights::ALL, pid, endpoint, None);
                (*interface, token)
            })
            .collect();

        self.processes
            .insert(ProcessRecord::new(pid, spec.kind, &spec.name, memory, endpoint));

        self.record(
            AuditEvent::success(AuditCategory::Process, "process launched")
                .with_pid(pid)
                .with_channel(pair.channel())
                .with_detail("kind", spec.kind.as_str())
                .with_detail("name", &spec.name),
        );
        log::info!(
            "[Broker] Launched {} process {}: {} ({} capabilities)",
            spec.kind.as_str(),
            pid,
            spec.name,
            tokens.len()
        );

        Ok(ProcessHandle {
            pid,
            kind: spec.kind,
            endpoint,
            coordinator_endpoint: pair.a,
            tokens,
        })
    }

    fn delegate(
        &mut self,
        from: ProcessId,
        to: ProcessId,
        interface: Interface,
    ) -> Result<CapabilityToken> {
        self.processes.running(from)?;
        let target = self.processes.running(to)?.launch_endpoint;

        let source = self
            .tokens
            .find_live(from, interface, CapabilityRights::DELEGATE)
            .map(|t| (t.id, t.rights));
        let Some((source_id, rights)) = source else {
            self.record(
                AuditEvent::denied(AuditCategory::Delegation, "delegation refused: capability not held")
                    .with_pid(from)
                    .with_detail("to", &to.to_string())
                    .with_detail("interface", interface.as_str()),
            );
            return Err(BrokerError::PermissionDenied);
        };

        if !self.channels.get(&target.channel).map_or(false, |c| c.is_open()) {
            return Err(BrokerError::ChannelClosed);
        }

        let token = self.tokens.issue(interface, rights, to, target, Some(source_id));

        self.record(
            AuditEvent::success(AuditCategory::Delegation, "capability delegated")
                .with_pid(to)
                .with_channel(target.channel)
                .with_detail("from", &from.to_string())
                .with_detail("to", &to.to_string())
                .with_detail("interface", interface.as_str())
                .with_detail("token", &token.raw().to_string()),
        );
        log::info!(
            "[Broker] Delegated {} from process {} to process {}",
            interface,
            from,
            to
        );

        Ok(token)
    }

    fn bind(
        &mut self,
        client: ProcessId,
        host: ProcessId,
        interface: Interface,
    ) -> Result<BoundInterface> {
        self.processes.running(client)?;
        self.processes.running(host)?;

        let source = self
            .tokens
            .find_live(client, interface, CapabilityRights::INVOKE)
            .map(|t| t.id);
        let Some(source_id) = source else {
            self.record(
                AuditEvent::denied(AuditCategory::Channel, "bind refused: capability not held")
                    .with_pid(client)
                    .with_detail("host", &host.to_string())
                    .with_detail("interface", interface.as_str()),
            );
            return Err(BrokerError::PermissionDenied);
        };

        let limits = self.config.limits;
        if let Err(err) = resource::check_channel(&limits, self.open_channels()) {
            return Err(self.refuse(AuditCategory::Resource, client, "bind refused", err));
        }

        let pair = self.insert_channel(client, host, Some(Side::B));
        let token = self.tokens.issue(
            interface,
            CapabilityRights::INVOKE,
            client,
            pair.a,
            Some(source_id),
        );

        if let Some(record) = self.processes.get_mut(client) {
            record.add_endpoint(pair.a);
        }
        if let Some(record) = self.processes.get_mut(host) {
            record.add_endpoint(pair.b);
        }

        self.record(
            AuditEvent::success(AuditCategory::Channel, "interface bound")
                .with_pid(client)
                .with_channel(pair.channel())
                .with_detail("host", &host.to_string())
                .with_detail("interface", interface.as_str()),
        );
        log::debug!(
            "[Broker] Bound {} for process {} to host {} on channel {}",
            interface,
            client,
            host,
            pair.channel().0
        );

        Ok(BoundInterface {
            interface,
            client: pair.a,
            host: pair.b,
            token,
        })
    }

    fn open_pipe(&mut self, owner: ProcessId) -> Result<ChannelPair> {
        if owner != ProcessId::COORDINATOR {
            self.processes.running(owner)?;
        }

        let limits = self.config.limits;
        if let Err(err) = resource::check_channel(&limits, self.open_channels()) {
            return Err(self.refuse(AuditCategory::Resource, owner, "pipe refused", err));
        }

        let pair = self.insert_channel(owner, owner, None);
        if let Some(record) = self.processes.get_mut(owner) {
            record.add_endpoint(pair.a);
            record.add_endpoint(pair.b);
        }
        Ok(pair)
    }

    fn send(&mut self, pid: ProcessId, endpoint: EndpointId, mut message: Message) -> Result<()> {
        if message.len() > self.config.max_message_size {
            return Err(BrokerError::MessageTooLarge);
        }
        self.check_owner(pid, endpoint)?;

        let (open, receiver, validated, has_room) = {
            let channel = self
                .channels
                .get(&endpoint.channel)
                .ok_or(BrokerError::UnknownChannel)?;
            let to = endpoint.side.peer();
            (
                channel.is_open(),
                channel.owner(to),
                channel.is_host(to),
                channel.has_room(endpoint.side),
            )
        };

        if !open {
            return Err(BrokerError::ChannelClosed);
        }

        if validated {
            let interface = message.method().interface;
            let verdict = CapabilityValidator::new(&self.tokens).check(
                message.token(),
                interface,
                endpoint,
                pid,
            );
            if let Err(rejection) = verdict {
                self.reject(pid, endpoint, interface, rejection);
                return Err(BrokerError::PermissionDenied);
            }
        }

        if !has_room {
            return Err(BrokerError::Backpressure);
        }

        let reply = message.reply_to();
        if let Some(reply) = reply {
            if reply.channel == endpoint.channel || self.is_launch_channel(reply.channel) {
                return Err(self.refuse(
                    AuditCategory::Channel,
                    pid,
                    "reply endpoint refused",
                    BrokerError::PermissionDenied,
                ));
            }
            self.check_owner(pid, reply)?;
            if !self.channels.get(&reply.channel).map_or(false, |c| c.is_open()) {
                return Err(BrokerError::ChannelClosed);
            }
        }

        message.stamp(pid, self.next_sequence);
        self.next_sequence += 1;

        self.channels
            .get_mut(&endpoint.channel)
            .ok_or(BrokerError::UnknownChannel)?
            .enqueue(endpoint.side, message)?;

        if let Some(reply) = reply {
            self.transfer_endpoint(reply, pid, receiver);
        }

        Ok(())
    }

    fn transfer_endpoint(&mut self, endpoint: EndpointId, from: ProcessId, to: ProcessId) {
        if let Some(channel) = self.channels.get_mut(&endpoint.channel) {
            channel.set_owner(endpoint.side, to);
        }
        if let Some(record) = self.processes.get_mut(from) {
            record.remove_endpoint(endpoint);
        }
        if let Some(record) = self.processes.get_mut(to) {
            record.add_endpoint(endpoint);
        }
        log::debug!(
            "[Broker] Endpoint {}:{:?} moved from process {} to process {}",
            endpoint.channel.0,
            endpoint.side,
            from,
            to
        );
    }

    /// Drop a message that failed its capability check and apply the misuse policy.
    fn reject(
        &mut self,
        pid: ProcessId,
        endpoint: EndpointId,
        interface: Interface,
        rejection: Rejection,
    ) {
        self.record(
            AuditEvent::denied(AuditCategory::Capability, "message dropped: capability check failed")
                .with_pid(pid)
                .with_channel(endpoint.channel)
                .with_detail("interface", interface.as_str())
                .with_detail("reason", rejection.as_str()),
        );

        let policy = self.config.misuse;
        let Some(record) = self.processes.get_mut(pid) else {
            return;
        };
        record.strikes = record.strikes.saturating_add(1);
        let strikes = record.strikes;
        let newly_flagged = !record.flagged && strikes >= policy.flag_after;
        if newly_flagged {
            record.flagged = true;
        }

        if newly_flagged {
            self.record(
                AuditEvent::new(
                    AuditSeverity::Warning,
                    AuditCategory::Policy,
                    AuditOutcome::Success,
                    "process flagged for monitoring",
                )
                .with_pid(pid)
                .with_detail("strikes", &strikes.to_string()),
            );
        }

        if policy.terminate_after.map_or(false, |limit| strikes >= limit) {
            log::warn!(
                "[Broker] Terminating process {} after {} capability violations",
                pid,
                strikes
            );
            if let Err(err) = self.terminate(pid, TerminationReason::PolicyViolation) {
                log::warn!("[Broker] Policy termination of process {} failed: {}", pid, err);
            }
        }
    }

    fn receive(&mut self, pid: ProcessId, endpoint: EndpointId) -> Result<Option<Message>> {
        self.check_owner(pid, endpoint)?;
        self.channels
            .get_mut(&endpoint.channel)
            .ok_or(BrokerError::UnknownChannel)?
            .dequeue(endpoint.side)
    }

    fn close_endpoint(&mut self, pid: ProcessId, endpoint: EndpointId) -> Result<()> {
        self.check_owner(pid, endpoint)?;
        if self.close_channel(endpoint.channel) {
            self.record(
                AuditEvent::success(AuditCategory::Channel, "channel close requested")
                    .with_pid(pid)
                    .with_channel(endpoint.channel)
                    .with_severity(AuditSeverity::Debug),
            );
        }
        Ok(())
    }

    /// Request close and revoke tokens scoped to the channel.
    fn close_channel(&mut self, id: ChannelId) -> bool {
        let changed = self.channels.get_mut(&id).map_or(false, |c| c.close());
        if changed {
            for token in self.tokens.revoke_channel(id) {
                self.revoke_descendants(token);
            }
        }
        changed
    }

    /// Apply the delegation scope to a token that was just revoked.
    fn revoke_descendants(&mut self, token: TokenId) {
        if self.config.delegation_scope == DelegationScope::Delegator {
            let revoked = self.tokens.revoke_tree(token);
            if !revoked.is_empty() {
                log::debug!(
                    "[Broker] Revoked {} tokens delegated from token {}",
                    revoked.len(),
                    token.0
                );
            }
        }
    }

    fn validate(
        &mut self,
        token: CapabilityToken,
        interface: Interface,
        endpoint: EndpointId,
    ) -> bool {
        let Some(holder) = self
            .channels
            .get(&endpoint.channel)
            .map(|c| c.owner(endpoint.side))
        else {
            self.record(
                AuditEvent::denied(AuditCategory::Capability, "capability check failed")
                    .with_channel(endpoint.channel)
                    .with_detail("interface", interface.as_str())
                    .with_detail("reason", Rejection::WrongChannel.as_str()),
            );
            return false;
        };

        let verdict =
            CapabilityValidator::new(&self.tokens).check(Some(token), interface, endpoint, holder);
        match verdict {
            Ok(_) => true,
            Err(rejection) => {
                self.record(
                    AuditEvent::denied(AuditCategory::Capability, "capability check failed")
                        .with_pid(holder)
                        .with_channel(endpoint.channel)
                        .with_detail("interface", interface.as_str())
                        .with_detail("reason", rejection.as_str()),
                );
                false
            }
        }
    }

    fn terminate(&mut self, pid: ProcessId, reason: TerminationReason) -> Result<()> {
        if pid == ProcessId::COORDINATOR {
            return Err(BrokerError::PermissionDenied);
        }

        let record = self
            .processes
            .get_mut(pid)
            .ok_or(BrokerError::UnknownProcess)?;
        if !record.is_running() {
            return Ok(());
        }

        record.state = ProcessState::Terminated(reason);
        let mut endpoints = core::mem::take(&mut record.endpoints);
        if !endpoints.contains(&record.launch_endpoint) {
            endpoints.push(record.launch_endpoint);
        }
        let buffers = core::mem::take(&mut record.buffers);
        let memory = record.memory_bytes;

        // Messages queued for the dead process go with it; what it already
        // sent stays queued for its peers until they drain it.
        for endpoint in &endpoints {
            if let Some(channel) = self.channels.get_mut(&endpoint.channel) {
                channel.discard(endpoint.side);
            }
            self.close_channel(endpoint.channel);
        }

        let held: Vec<TokenId> = self.tokens.held_by(pid).iter().map(|t| t.id).collect();
        for token in held {
            self.tokens.revoke(token);
            self.revoke_descendants(token);
        }

        for buffer in buffers {
            self.release_mapping(pid, buffer);
        }

        self.usage.release_process(memory);

        self.record(
            AuditEvent::success(AuditCategory::Process, "process terminated")
                .with_pid(pid)
                .with_detail("reason", reason_str(reason))
                .with_detail("channels", &endpoints.len().to_string()),
        );
        log::info!("[Broker] Terminated process {} ({})", pid, reason_str(reason));

        Ok(())
    }

    fn create_buffer(&mut self, owner: ProcessId, size: usize) -> Result<BufferId> {
        self.processes.running(owner)?;

        let limits = self.config.limits;
        if let Err(err) = self.usage.reserve_memory(&limits, size as u64) {
            return Err(self.refuse(AuditCategory::Resource, owner, "shared buffer refused", err));
        }

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, SharedBuffer::new(id, owner, size));
        if let Some(record) = self.processes.get_mut(owner) {
            record.buffers.push(id);
        }

        self.record(
            AuditEvent::success(AuditCategory::Buffer, "shared buffer created")
                .with_pid(owner)
                .with_detail("size", &size.to_string()),
        );
        Ok(id)
    }

    fn share_buffer(
        &mut self,
        owner: ProcessId,
        buffer: BufferId,
        peer: ProcessId,
        rights: BufferRights,
    ) -> Result<()> {
        self.processes.running(owner)?;
        self.processes.running(peer)?;

        let shared = self.buffers.get_mut(&buffer).ok_or(BrokerError::UnknownBuffer)?;
        if shared.creator() != owner || shared.rights_for(owner).is_none() {
            return Err(self.refuse(
                AuditCategory::Buffer,
                owner,
                "share refused: not the buffer creator",
                BrokerError::PermissionDenied,
            ));
        }
        shared.map(peer, rights);

        if let Some(record) = self.processes.get_mut(peer) {
            if !record.buffers.contains(&buffer) {
                record.buffers.push(buffer);
            }
        }

        self.record(
            AuditEvent::success(AuditCategory::Buffer, "shared buffer mapped")
                .with_pid(peer)
                .with_detail("owner", &owner.to_string())
                .with_detail("buffer", &buffer.0.to_string()),
        );
        Ok(())
    }

    /// Drop one mapping and free the buffer if it was the last.
    fn release_mapping(&mut self, pid: ProcessId, buffer: BufferId) {
        let orphaned = match self.buffers.get_mut(&buffer) {
            Some(shared) => {
                shared.unmap(pid);
                shared.is_orphaned()
            }
            None => false,
        };

        if orphaned {
            if let Some(shared) = self.buffers.remove(&buffer) {
                self.usage.release_memory(shared.size() as u64);
            }
        }
    }
}

fn reason_str(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::Shutdown => "shutdown",
        TerminationReason::Crashed => "crashed",
        TerminationReason::PolicyViolation => "policy-violation",
        TerminationReason::Killed => "killed",
    }
}
