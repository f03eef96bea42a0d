//! Scenario execution.
//!
//! Runs each step against one coordinator, compares the outcome with the
//! step's declared expectation, and collects a report.

use std::collections::HashMap;
use std::fmt;

use ipc_broker::{
    BoundInterface, BrokerError, CapabilityToken, Coordinator, CoordinatorStats, EndpointId,
    Interface, LaunchSpec, Message, MethodId, ProcessHandle, ProcessId,
};
use serde::Serialize;

use crate::error::BrokerctlError;
use crate::scenario::{Action, Scenario, Step, TokenChoice, LAUNCH_CHANNEL};

/// Token id presented for `token = "forged"`.
const FORGED_TOKEN: u64 = u64::MAX;

/// What a step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Valid,
    Invalid,
    Empty,
    Failed(BrokerError),
}

impl Outcome {
    /// Label compared against a step's `expect`.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Valid => "valid",
            Outcome::Invalid => "invalid",
            Outcome::Empty => "empty",
            Outcome::Failed(e) => e.kind(),
        }
    }

    fn passes_by_default(&self) -> bool {
        !matches!(self, Outcome::Invalid | Outcome::Failed(_))
    }
}

/// Result of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub op: &'static str,
    pub outcome: &'static str,
    pub expected: Option<String>,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Result of a whole scenario.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub steps: Vec<StepReport>,
    pub passed: usize,
    pub failed: usize,
    pub stats: CoordinatorStats,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario: {}", self.scenario)?;
        for step in &self.steps {
            let mark = if step.passed { "ok" } else { "FAIL" };
            write!(f, "  [{mark:>4}] {:>3} {:<10} {}", step.index, step.op, step.outcome)?;
            if let Some(expected) = &step.expected {
                if !step.passed {
                    write!(f, " (expected {expected})")?;
                }
            }
            if let Some(detail) = &step.detail {
                write!(f, " - {detail}")?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "processes: {}  open channels: {}  live tokens: {}  denied: {}",
            self.stats.processes,
            self.stats.open_channels,
            self.stats.live_tokens,
            self.stats.audit.denied_events
        )?;
        write!(f, "summary: {} passed, {} failed", self.passed, self.failed)
    }
}

struct Binding {
    client: ProcessId,
    host: ProcessId,
    bound: BoundInterface,
}

/// Scenario state: names given to processes and channels, and the tokens
/// each process was handed.
struct Runner<'a> {
    coordinator: &'a Coordinator,
    processes: HashMap<String, ProcessHandle>,
    bindings: HashMap<String, Binding>,
    tokens: HashMap<(EndpointId, Interface), CapabilityToken>,
}

/// Run `scenario` against `coordinator`.
///
/// With `fail_fast`, the first failing step that did not declare an
/// expectation aborts the run with its broker error.
pub fn run_scenario(
    coordinator: &Coordinator,
    scenario: &Scenario,
    fail_fast: bool,
) -> Result<RunReport, BrokerctlError> {
    let name = scenario.name.clone().unwrap_or_else(|| "unnamed".to_string());
    log::info!("running scenario {name} ({} steps)", scenario.steps.len());

    let mut runner = Runner {
        coordinator,
        processes: HashMap::new(),
        bindings: HashMap::new(),
        tokens: HashMap::new(),
    };

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (i, step) in scenario.steps.iter().enumerate() {
        let index = i + 1;
        let (outcome, detail, mismatch) = runner.execute(index, step)?;

        let expectation_met = match &step.expect {
            Some(expected) => expected == outcome.label(),
            None => outcome.passes_by_default(),
        };
        let passed = expectation_met && !mismatch;

        if !passed {
            log::warn!("step {index} ({}) failed: {}", step.action.op(), outcome.label());
            if let (true, None, Outcome::Failed(err)) = (fail_fast, &step.expect, outcome) {
                return Err(BrokerctlError::Broker(err));
            }
        }

        steps.push(StepReport {
            index,
            op: step.action.op(),
            outcome: outcome.label(),
            expected: step.expect.clone(),
            passed,
            detail,
        });
    }

    let passed = steps.iter().filter(|s| s.passed).count();
    Ok(RunReport {
        scenario: name,
        failed: steps.len() - passed,
        passed,
        steps,
        stats: coordinator.stats(),
    })
}

impl<'a> Runner<'a> {
    /// Returns the outcome, a detail line, and whether a payload check failed.
    fn execute(
        &mut self,
        index: usize,
        step: &Step,
    ) -> Result<(Outcome, Option<String>, bool), BrokerctlError> {
        let c = self.coordinator;
        let result = match &step.action {
            Action::Launch {
                name,
                kind,
                capabilities,
                memory,
            } => {
                if self.processes.contains_key(name) {
                    return Err(scenario_error(index, format!("process {name} already launched")));
                }
                let mut spec = LaunchSpec::new(*kind, name).with_capabilities(capabilities);
                if let Some(bytes) = memory {
                    spec = spec.with_memory(*bytes);
                }
                match c.launch_process(spec) {
                    Ok(handle) => {
                        for (interface, token) in &handle.tokens {
                            self.tokens.insert((handle.endpoint, *interface), *token);
                        }
                        let detail = format!("pid {}", handle.pid);
                        self.processes.insert(name.clone(), handle);
                        (Outcome::Ok, Some(detail))
                    }
                    Err(e) => (Outcome::Failed(e), None),
                }
            }

            Action::Delegate {
                from,
                to,
                interface,
            } => {
                let from = self.pid(index, from)?;
                let target = self.handle(index, to)?;
                let (to, endpoint) = (target.pid, target.endpoint);
                match c.delegate_capability(from, to, *interface) {
                    Ok(token) => {
                        self.tokens.insert((endpoint, *interface), token);
                        (Outcome::Ok, Some(format!("token {}", token.raw())))
                    }
                    Err(e) => (Outcome::Failed(e), None),
                }
            }

            Action::Bind {
                label,
                client,
                host,
                interface,
            } => {
                if label == LAUNCH_CHANNEL || self.bindings.contains_key(label) {
                    return Err(scenario_error(index, format!("channel label {label} already in use")));
                }
                let client = self.pid(index, client)?;
                let host = self.pid(index, host)?;
                match c.bind_interface(client, host, *interface) {
                    Ok(bound) => {
                        self.tokens.insert((bound.client, *interface), bound.token);
                        let detail = format!("channel {}", bound.client.channel.0);
                        self.bindings
                            .insert(label.clone(), Binding { client, host, bound });
                        (Outcome::Ok, Some(detail))
                    }
                    Err(e) => (Outcome::Failed(e), None),
                }
            }

            Action::Send {
                process,
                channel,
                interface,
                ordinal,
                payload,
                size,
                token,
                repeat,
            } => {
                let (pid, endpoint) = self.endpoint(index, process, channel)?;
                let token = self.token(endpoint, *interface, *token);
                let method = MethodId::new(*interface, *ordinal);

                let mut sent = 0;
                let mut failure = None;
                for n in 0..*repeat {
                    let bytes = match size {
                        Some(len) => vec![0u8; *len],
                        None => payload.replace("{n}", &n.to_string()).into_bytes(),
                    };
                    let mut message = Message::new(method, bytes);
                    if let Some(token) = token {
                        message = message.with_token(token);
                    }
                    match c.send(pid, endpoint, message) {
                        Ok(()) => sent += 1,
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                let detail = Some(format!("sent {sent} of {repeat}"));
                match failure {
                    Some(e) => (Outcome::Failed(e), detail),
                    None => (Outcome::Ok, detail),
                }
            }

            Action::Receive {
                process,
                channel,
                count,
                payloads,
            } => {
                let (pid, endpoint) = self.endpoint(index, process, channel)?;

                let mut received = Vec::new();
                let mut outcome = Outcome::Ok;
                for _ in 0..*count {
                    match c.receive(pid, endpoint) {
                        Ok(Some(message)) => {
                            received.push(String::from_utf8_lossy(message.payload()).into_owned())
                        }
                        Ok(None) => {
                            outcome = Outcome::Empty;
                            break;
                        }
                        Err(e) => {
                            outcome = Outcome::Failed(e);
                            break;
                        }
                    }
                }

                let mismatch = payloads.as_ref().map_or(false, |want| *want != received);
                let detail = if mismatch {
                    format!("payloads {received:?} (expected {:?})", payloads.as_deref().unwrap_or_default())
                } else {
                    format!("received {}", received.len())
                };
                return Ok((outcome, Some(detail), mismatch));
            }

            Action::Close { process, channel } => {
                let (pid, endpoint) = self.endpoint(index, process, channel)?;
                match c.close_channel(pid, endpoint) {
                    Ok(()) => (Outcome::Ok, None),
                    Err(e) => (Outcome::Failed(e), None),
                }
            }

            Action::Terminate { process, reason } => {
                let pid = self.pid(index, process)?;
                match c.terminate_process(pid, *reason) {
                    Ok(()) => (Outcome::Ok, None),
                    Err(e) => (Outcome::Failed(e), None),
                }
            }

            Action::Validate {
                process,
                channel,
                interface,
                token,
            } => {
                let (_, endpoint) = self.endpoint(index, process, channel)?;
                let valid = match self.token(endpoint, *interface, *token) {
                    Some(token) => c.validate(token, *interface, endpoint),
                    None => false,
                };
                if valid {
                    (Outcome::Valid, None)
                } else {
                    (Outcome::Invalid, None)
                }
            }

            Action::Stats => {
                let stats = c.stats();
                let detail = format!(
                    "processes {}, open channels {}, live tokens {}, memory {} bytes",
                    stats.processes, stats.open_channels, stats.live_tokens, stats.memory_used
                );
                (Outcome::Ok, Some(detail))
            }
        };

        Ok((result.0, result.1, false))
    }

    fn handle(&self, index: usize, name: &str) -> Result<&ProcessHandle, BrokerctlError> {
        self.processes
            .get(name)
            .ok_or_else(|| scenario_error(index, format!("unknown process {name}")))
    }

    fn pid(&self, index: usize, name: &str) -> Result<ProcessId, BrokerctlError> {
        self.handle(index, name).map(|h| h.pid)
    }

    /// Resolve `process`'s end of the channel labelled `channel`.
    fn endpoint(
        &self,
        index: usize,
        process: &str,
        channel: &str,
    ) -> Result<(ProcessId, EndpointId), BrokerctlError> {
        let handle = self.handle(index, process)?;
        if channel == LAUNCH_CHANNEL {
            return Ok((handle.pid, handle.endpoint));
        }

        let binding = self
            .bindings
            .get(channel)
            .ok_or_else(|| scenario_error(index, format!("unknown channel {channel}")))?;
        if binding.client == handle.pid {
            Ok((handle.pid, binding.bound.client))
        } else if binding.host == handle.pid {
            Ok((handle.pid, binding.bound.host))
        } else {
            Err(scenario_error(
                index,
                format!("process {process} has no end of channel {channel}"),
            ))
        }
    }

    fn token(
        &self,
        endpoint: EndpointId,
        interface: Interface,
        choice: TokenChoice,
    ) -> Option<CapabilityToken> {
        match choice {
            TokenChoice::Auto => self.tokens.get(&(endpoint, interface)).copied(),
            TokenChoice::Omit => None,
            TokenChoice::Forged => Some(CapabilityToken::from_raw(FORGED_TOKEN)),
        }
    }
}

fn scenario_error(step: usize, message: String) -> BrokerctlError {
    BrokerctlError::Scenario { step, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::parse_scenario_str;
    use ipc_broker::BrokerConfig;

    fn run(toml: &str) -> RunReport {
        let scenario = parse_scenario_str(toml).unwrap();
        run_scenario(&Coordinator::default(), &scenario, false).unwrap()
    }

    #[test]
    fn launch_and_send_with_auto_token() {
        let report = run(
            r#"
[[step]]
op = "launch"
name = "a"
kind = "renderer"
capabilities = ["network"]

[[step]]
op = "send"
process = "a"
channel = "launch"
interface = "network"
payload = "fetch"

[[step]]
op = "send"
process = "a"
channel = "launch"
interface = "network"
token = "forged"
expect = "permission-denied"
"#,
        );
        assert!(report.is_success(), "{report}");
        assert_eq!(report.stats.processes, 1);
        assert_eq!(report.stats.queued_messages, 1);
    }

    #[test]
    fn unmet_expectation_is_reported() {
        let report = run(
            r#"
[[step]]
op = "launch"
name = "a"
kind = "utility"

[[step]]
op = "terminate"
process = "a"
expect = "unknown-process"
"#,
        );
        assert_eq!(report.failed, 1);
        assert_eq!(report.steps[1].outcome, "ok");
        assert!(!report.steps[1].passed);
    }

    #[test]
    fn bound_channel_round_trip_checks_payloads() {
        let report = run(
            r#"
[[step]]
op = "launch"
name = "page"
kind = "renderer"
capabilities = ["storage"]

[[step]]
op = "launch"
name = "store"
kind = "storage"

[[step]]
op = "bind"
label = "db"
client = "page"
host = "store"
interface = "storage"

[[step]]
op = "send"
process = "page"
channel = "db"
interface = "storage"
payload = "get-{n}"
repeat = 3

[[step]]
op = "receive"
process = "store"
channel = "db"
count = 3
payloads = ["get-0", "get-1", "get-2"]

[[step]]
op = "receive"
process = "store"
channel = "db"
expect = "empty"
"#,
        );
        assert!(report.is_success(), "{report}");
    }

    #[test]
    fn unknown_process_name_aborts() {
        let scenario = parse_scenario_str(
            r#"
[[step]]
op = "terminate"
process = "ghost"
"#,
        )
        .unwrap();
        let err = run_scenario(&Coordinator::default(), &scenario, false).unwrap_err();
        assert!(matches!(err, BrokerctlError::Scenario { step: 1, .. }));
    }

    #[test]
    fn fail_fast_stops_on_unexpected_failure() {
        let scenario = parse_scenario_str(
            r#"
[[step]]
op = "launch"
name = "a"
kind = "renderer"

[[step]]
op = "send"
process = "a"
channel = "launch"
interface = "gpu"

[[step]]
op = "stats"
"#,
        )
        .unwrap();
        let coordinator = Coordinator::new(BrokerConfig::default());
        let err = run_scenario(&coordinator, &scenario, true).unwrap_err();
        assert!(matches!(err, BrokerctlError::Broker(BrokerError::PermissionDenied)));
    }
}
