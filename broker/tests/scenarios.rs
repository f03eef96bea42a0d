//! End-to-end coordinator scenarios: delegation, ordering, backpressure,
//! resource ceilings and concurrent launches.

use std::sync::Arc;
use std::thread;

use ipc_broker::{
    BrokerConfig, BrokerError, ChannelState, Coordinator, DelegationScope, Interface, LaunchSpec,
    Message, MethodId, ProcessHandle, ProcessId, ProcessKind, Resource, ResourceLimits, TerminationReason,
};

const FETCH: MethodId = MethodId::new(Interface::Network, 1);
const DRAW: MethodId = MethodId::new(Interface::Gpu, 3);

fn launch(coordinator: &Coordinator, kind: ProcessKind, caps: &[Interface]) -> ProcessHandle {
    coordinator
        .launch_process(LaunchSpec::new(kind, kind.as_str()).with_capabilities(caps))
        .unwrap()
}

fn delegation_then_terminate(scope: DelegationScope) -> bool {
    let coordinator = Coordinator::new(BrokerConfig::default().with_delegation_scope(scope));
    let a = launch(&coordinator, ProcessKind::Renderer, &[Interface::Network]);
    let b = launch(&coordinator, ProcessKind::Renderer, &[]);

    let delegated = coordinator
        .delegate_capability(a.pid, b.pid, Interface::Network)
        .unwrap();
    coordinator
        .send(b.pid, b.endpoint, Message::new(FETCH, b"GET /".to_vec()).with_token(delegated))
        .unwrap();
    let request = coordinator
        .receive(ProcessId::COORDINATOR, b.coordinator_endpoint)
        .unwrap()
        .unwrap();
    assert_eq!(request.sender(), b.pid);
    assert_eq!(request.token(), Some(delegated));

    coordinator
        .terminate_process(a.pid, TerminationReason::Shutdown)
        .unwrap();
    let a_token = a.token(Interface::Network).unwrap();
    assert!(!coordinator.validate(a_token, Interface::Network, a.endpoint));

    coordinator.validate(delegated, Interface::Network, b.endpoint)
}

#[test]
fn delegated_token_survives_delegator_by_default() {
    assert!(delegation_then_terminate(DelegationScope::Channel));
}

#[test]
fn delegated_token_dies_with_delegator_when_scoped() {
    assert!(!delegation_then_terminate(DelegationScope::Delegator));
}

#[test]
fn delegation_is_audited() {
    let coordinator = Coordinator::default();
    let a = launch(&coordinator, ProcessKind::Renderer, &[Interface::Network]);
    let b = launch(&coordinator, ProcessKind::Renderer, &[]);
    coordinator
        .delegate_capability(a.pid, b.pid, Interface::Network)
        .unwrap();

    let events = coordinator.audit_events();
    let delegation = events
        .iter()
        .find(|e| e.message == "capability delegated")
        .unwrap();
    assert_eq!(delegation.pid, Some(b.pid));
    assert_eq!(delegation.detail("from"), Some(a.pid.to_string().as_str()));
    assert_eq!(delegation.detail("interface"), Some("network"));
}

#[test]
fn hundred_messages_arrive_in_order() {
    let coordinator = Coordinator::default();
    let c = launch(&coordinator, ProcessKind::Utility, &[]);
    let pipe = coordinator.open_pipe(c.pid).unwrap();

    for n in 0u32..100 {
        coordinator
            .send(c.pid, pipe.a, Message::encode(FETCH, &n).unwrap())
            .unwrap();
    }

    let mut last_sequence = 0;
    for n in 0u32..100 {
        let message = coordinator.receive(c.pid, pipe.b).unwrap().unwrap();
        assert_eq!(message.decode::<u32>().unwrap(), n);
        assert!(message.sequence() > last_sequence);
        last_sequence = message.sequence();
    }
    assert_eq!(coordinator.receive(c.pid, pipe.b), Ok(None));
}

#[test]
fn eleventh_send_sees_backpressure() {
    let coordinator = Coordinator::new(BrokerConfig::default().with_queue_depth(10));
    let page = launch(&coordinator, ProcessKind::Renderer, &[Interface::Gpu]);
    let gpu = launch(&coordinator, ProcessKind::Gpu, &[]);
    let bound = coordinator
        .bind_interface(page.pid, gpu.pid, Interface::Gpu)
        .unwrap();
    let frame = |n: u8| Message::new(DRAW, vec![n]).with_token(bound.token);

    for n in 0..10 {
        coordinator.send(page.pid, bound.client, frame(n)).unwrap();
    }
    let err = coordinator.send(page.pid, bound.client, frame(10)).unwrap_err();
    assert_eq!(err, BrokerError::Backpressure);
    assert!(err.is_transient());

    let first = coordinator.receive(gpu.pid, bound.host).unwrap().unwrap();
    assert_eq!(first.payload(), &[0]);
    coordinator.send(page.pid, bound.client, frame(10)).unwrap();

    // Backpressure is per direction.
    coordinator
        .send(gpu.pid, bound.host, Message::new(DRAW, vec![]))
        .unwrap();
}

#[test]
fn close_drains_then_reports_closed() {
    let coordinator = Coordinator::default();
    let c = launch(&coordinator, ProcessKind::Utility, &[]);
    let pipe = coordinator.open_pipe(c.pid).unwrap();

    coordinator
        .send(c.pid, pipe.a, Message::new(FETCH, vec![1]))
        .unwrap();
    coordinator.close_channel(c.pid, pipe.b).unwrap();
    assert_eq!(coordinator.channel_state(pipe.channel()), Some(ChannelState::Draining));
    assert_eq!(
        coordinator.send(c.pid, pipe.a, Message::new(FETCH, vec![2])),
        Err(BrokerError::ChannelClosed)
    );

    assert!(coordinator.receive(c.pid, pipe.b).unwrap().is_some());
    assert_eq!(coordinator.channel_state(pipe.channel()), Some(ChannelState::Closed));
    assert_eq!(coordinator.receive(c.pid, pipe.b), Err(BrokerError::ChannelClosed));
    coordinator.close_channel(c.pid, pipe.a).unwrap();
}

#[test]
fn ceilings_report_resource_exhausted() {
    let limits = ResourceLimits::default()
        .with_max_processes(2)
        .with_max_channels(3)
        .with_memory_budget(1024);
    let coordinator = Coordinator::new(BrokerConfig::default().with_limits(limits));

    let small = |name: &str| LaunchSpec::new(ProcessKind::Utility, name).with_memory(100);

    let a = coordinator.launch_process(small("a")).unwrap();
    assert_eq!(
        coordinator
            .launch_process(LaunchSpec::new(ProcessKind::Utility, "big").with_memory(2048))
            .unwrap_err(),
        BrokerError::ResourceExhausted(Resource::Memory)
    );
    coordinator.launch_process(small("b")).unwrap();
    assert_eq!(
        coordinator.launch_process(small("c")).unwrap_err(),
        BrokerError::ResourceExhausted(Resource::Processes)
    );

    coordinator.open_pipe(a.pid).unwrap();
    assert_eq!(
        coordinator.open_pipe(a.pid),
        Err(BrokerError::ResourceExhausted(Resource::Channels))
    );

    // Termination gives the capacity back.
    coordinator
        .terminate_process(a.pid, TerminationReason::Shutdown)
        .unwrap();
    coordinator.launch_process(small("c")).unwrap();
    assert_eq!(coordinator.stats().memory_used, 200);
}

#[test]
fn concurrent_launches_respect_ceiling() {
    let limits = ResourceLimits::default().with_max_processes(32);
    let coordinator = Arc::new(Coordinator::new(BrokerConfig::default().with_limits(limits)));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                (0..8)
                    .filter_map(|_| {
                        coordinator
                            .launch_process(
                                LaunchSpec::new(ProcessKind::Utility, "worker").with_memory(1),
                            )
                            .ok()
                    })
                    .map(|handle| handle.pid)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut pids: Vec<ProcessId> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    pids.sort();
    pids.dedup();

    assert_eq!(pids.len(), 32);
    assert_eq!(coordinator.stats().processes, 32);
    assert_eq!(coordinator.live_processes(), pids);
}

#[test]
fn host_cannot_forge_sender() {
    let coordinator = Coordinator::default();
    let client = launch(&coordinator, ProcessKind::Renderer, &[Interface::Storage]);
    let store = launch(&coordinator, ProcessKind::Storage, &[]);
    let bound = coordinator
        .bind_interface(client.pid, store.pid, Interface::Storage)
        .unwrap();

    // The store cannot use the client's end even with the client's token.
    let call = Message::new(MethodId::new(Interface::Storage, 0), vec![]).with_token(bound.token);
    assert_eq!(
        coordinator.send(store.pid, bound.client, call),
        Err(BrokerError::NotEndpointOwner)
    );
}

#[test]
fn closing_bound_channel_revokes_its_token() {
    let coordinator = Coordinator::default();
    let a = launch(&coordinator, ProcessKind::Renderer, &[Interface::Network]);
    let h = launch(&coordinator, ProcessKind::Network, &[]);
    let bound = coordinator
        .bind_interface(a.pid, h.pid, Interface::Network)
        .unwrap();
    assert!(coordinator.validate(bound.token, Interface::Network, bound.client));

    coordinator.close_channel(a.pid, bound.client).unwrap();

    assert!(!coordinator.validate(bound.token, Interface::Network, bound.client));
    assert!(!coordinator.is_token_live(bound.token));
    assert_eq!(
        coordinator.send(a.pid, bound.client, Message::new(FETCH, vec![]).with_token(bound.token)),
        Err(BrokerError::ChannelClosed)
    );

    // The launch-channel token the binding was derived from is untouched.
    let launch_token = a.token(Interface::Network).unwrap();
    assert!(coordinator.is_token_live(launch_token));
    assert!(coordinator.validate(launch_token, Interface::Network, a.endpoint));
}

#[test]
fn closing_launch_channel_revokes_launch_tokens() {
    let coordinator = Coordinator::default();
    let a = launch(&coordinator, ProcessKind::Renderer, &[Interface::Network, Interface::Gpu]);
    let b = launch(&coordinator, ProcessKind::Renderer, &[]);

    coordinator.close_channel(a.pid, a.endpoint).unwrap();

    for interface in [Interface::Network, Interface::Gpu] {
        let token = a.token(interface).unwrap();
        assert!(!coordinator.validate(token, interface, a.endpoint));
        assert!(!coordinator.is_token_live(token));
    }
    assert_eq!(
        coordinator.delegate_capability(a.pid, b.pid, Interface::Network),
        Err(BrokerError::PermissionDenied)
    );
    assert_ne!(coordinator.channel_state(a.endpoint.channel), Some(ChannelState::Open));
}
