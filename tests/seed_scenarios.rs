//! Replays the end-to-end seed scenarios against the public API.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use someip_core::id_allocator::IdAllocator;
use someip_core::prelude::*;

fn logger() -> Arc<dyn Logger> {
    Arc::new(NullLogger)
}

fn core_with_config(config: Arc<dyn Config>) -> CoreFacade {
    CoreFacade::new(config, logger(), Arc::new(AllowAll))
}

fn core() -> CoreFacade {
    core_with_config(Arc::new(StaticConfig::default()))
}

fn recorder(core: &CoreFacade) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    core.register_message_handler(
        ServiceId::ANY,
        InstanceId::ANY,
        MethodId::ANY,
        Box::new(move |frame: Frame| sink.lock().unwrap().push(frame.payload)),
        RegistrationType::Append,
    );
    received
}

#[test]
fn scenario_1_basic_offer_subscribe_notify_field() {
    let core = core();
    core.init("provider", None).unwrap();
    let s = ServiceId::new(0x1234);
    let i = InstanceId::new(0x5678);
    let g = EventgroupId::new(0xA);
    let e = EventId::new(0x8001);

    core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
    core.register_event(s, i, e, &[g], true, true).unwrap();

    let received = recorder(&core);
    core.subscribe(ClientId::new(0x1002), s, i, g, MajorVersion(1), None).unwrap();

    assert!(core.notify(s, i, e, vec![0x01, 0x02, 0x03], false));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*received.lock().unwrap(), vec![vec![0x01, 0x02, 0x03]]);

    // No debounce filter is configured for this event, so an identical
    // republish with force=false still forwards: there is no implicit
    // change-only filtering at the store level.
    assert!(core.notify(s, i, e, vec![0x01, 0x02, 0x03], false));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(received.lock().unwrap().len(), 2);

    core.stop();
}

#[test]
fn scenario_2_placeholder_promotion() {
    let core = core();
    core.init("provider", None).unwrap();
    let s = ServiceId::new(0x1234);
    let i = InstanceId::new(0x5678);
    let g = EventgroupId::new(0xA);
    let e = EventId::new(0x8001);

    // Subscribing to a specific event before it is registered creates a
    // placeholder; the subscription must survive once the real event
    // shows up, with no duplicate record left behind on the placeholder.
    core.subscribe(ClientId::new(0x1002), s, i, g, MajorVersion(1), Some(e)).unwrap();

    core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
    core.register_event(s, i, e, &[g], false, true).unwrap();

    let received = recorder(&core);
    assert!(core.notify(s, i, e, vec![0xAA], false));
    std::thread::sleep(Duration::from_millis(50));
    // Exactly one delivery: a second subscriber record on a stray
    // placeholder would double it.
    assert_eq!(*received.lock().unwrap(), vec![vec![0xAA]]);

    core.stop();
}

#[test]
fn scenario_3_epsilon_debounce_with_ignore_mask() {
    let s = ServiceId::new(0x1234);
    let i = InstanceId::new(0x5678);
    let e = EventId::new(0x8001);
    let g = EventgroupId::new(0xA);

    let mut ignore = BTreeMap::new();
    ignore.insert(0usize, 0xFFu8);
    let mut debounce = BTreeMap::new();
    debounce.insert(
        (s.get(), i.get(), e.get()),
        DebounceConfig {
            on_change: true,
            on_change_resets_interval: false,
            interval_ms: None,
            ignore,
            send_current_value_after: false,
        },
    );
    let config: Arc<dyn Config> = Arc::new(StaticConfig {
        debounce,
        ..StaticConfig::default()
    });
    let core = core_with_config(config);
    core.init("provider", None).unwrap();
    core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
    core.register_event(s, i, e, &[g], false, true).unwrap();

    let received = recorder(&core);
    core.subscribe(ClientId::new(0x1002), s, i, g, MajorVersion(1), None).unwrap();

    assert!(core.notify(s, i, e, vec![0xAA, 0x01], false));
    std::thread::sleep(Duration::from_millis(30));
    assert!(
        !core.notify(s, i, e, vec![0xBB, 0x01], false),
        "byte 0 is ignored and byte 1 is unchanged -> suppressed"
    );
    std::thread::sleep(Duration::from_millis(30));
    assert!(
        core.notify(s, i, e, vec![0xCC, 0x02], false),
        "byte 1 differs -> forwarded"
    );
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(*received.lock().unwrap(), vec![vec![0xAA, 0x01], vec![0xCC, 0x02]]);

    core.stop();
}

#[test]
fn scenario_4_interval_based_debounce() {
    let s = ServiceId::new(0x1234);
    let i = InstanceId::new(0x5678);
    let e = EventId::new(0x8001);
    let g = EventgroupId::new(0xA);

    let mut debounce = BTreeMap::new();
    debounce.insert(
        (s.get(), i.get(), e.get()),
        DebounceConfig {
            on_change: false,
            on_change_resets_interval: false,
            interval_ms: Some(100),
            ignore: BTreeMap::new(),
            send_current_value_after: false,
        },
    );
    let config: Arc<dyn Config> = Arc::new(StaticConfig {
        debounce,
        ..StaticConfig::default()
    });
    let core = core_with_config(config);
    core.init("provider", None).unwrap();
    core.offer_service(s, i, MajorVersion(1), MinorVersion(0)).unwrap();
    core.register_event(s, i, e, &[g], false, true).unwrap();

    let received = recorder(&core);
    core.subscribe(ClientId::new(0x1002), s, i, g, MajorVersion(1), None).unwrap();

    assert!(core.notify(s, i, e, vec![1], false), "first publish always forwards");
    std::thread::sleep(Duration::from_millis(10));
    assert!(!core.notify(s, i, e, vec![2], false), "within the 100ms interval -> suppressed");
    std::thread::sleep(Duration::from_millis(40));
    assert!(!core.notify(s, i, e, vec![3], false), "still within the interval -> suppressed");
    std::thread::sleep(Duration::from_millis(60));
    assert!(
        core.notify(s, i, e, vec![3], false),
        "interval elapsed -> timer-driven forward of the most recent payload"
    );

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(*received.lock().unwrap(), vec![vec![1], vec![3]]);

    core.stop();
}

#[test]
fn scenario_5_max_dispatch_time_escalation() {
    let config: Arc<dyn Config> = Arc::new(StaticConfig {
        max_dispatchers: 2,
        max_dispatch_time_ms: 50,
        ..StaticConfig::default()
    });
    let core = core_with_config(config);

    let first_service = ServiceId::new(1);
    let second_service = ServiceId::new(2);
    let i = InstanceId::new(1);

    core.register_message_handler(
        ServiceId::ANY,
        InstanceId::ANY,
        MethodId::ANY,
        Box::new(|_frame: Frame| std::thread::sleep(Duration::from_millis(200))),
        RegistrationType::Append,
    );

    let metrics = core.dispatch_metrics();
    let send = |service: ServiceId| {
        core.on_message(Frame {
            service,
            instance: i,
            member: 0x0001,
            client: ClientId::new(0x2001),
            session: SessionId::ZERO,
            interface_version: 1,
            message_type: 0x00,
            return_code: 0,
            payload: vec![],
        });
    };
    send(first_service);
    send(second_service);

    // Give the watchdog time to notice the stuck first handler (at
    // max_dispatch_time_ms=50) and spawn a second worker for the second,
    // differently-keyed message, instead of both running serially.
    std::thread::sleep(Duration::from_millis(150));
    assert!(metrics.escalations() >= 1, "a second worker should have been spawned");
    assert_eq!(metrics.dispatched(), 1, "only the faster ordering-key job should be done so far");

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(metrics.dispatched(), 2);

    core.stop();
}

#[test]
fn scenario_6_client_id_recycling() {
    let config = StaticConfig {
        diagnosis_address: 0x10,
        diagnosis_mask: 0xFF00,
        ..StaticConfig::default()
    };
    let alloc = IdAllocator::with_in_memory_store(logger());

    let host = alloc.request_client_id(&config, "routing-host", None).unwrap();
    assert!(host.is_routing_host);

    let mut allocated = Vec::new();
    loop {
        match alloc.request_client_id(&config, "app", None) {
            Ok(allocation) => allocated.push(allocation.client_id),
            Err(CoreError::PoolExhausted) => break,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(!allocated.is_empty());

    let recycled = allocated[0];
    alloc.release_client_id(recycled);
    let reallocated = alloc.request_client_id(&config, "app-again", None).unwrap();
    assert_eq!(reallocated.client_id, recycled, "the released id should be the next one handed out");
}
