// Integration tests for the Dispatcher
//
// Callbacks report into crossbeam channels so the tests can observe what ran,
// in which order, and when, including callbacks fired from the scheduler
// thread for time-tagged bundles.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use assert2::{assert, check, let_assert};
use crossbeam_channel::{Receiver, Sender, unbounded};
use osc_dispatch::{Bundle, Dispatcher, Message, MethodResult, OscError, TimeTag};

/// Registers a binding that forwards `(tag, message)` for every call.
fn bind(
    dispatcher: &Dispatcher,
    pattern: Option<&str>,
    typespec: Option<&str>,
    tag: &'static str,
    tx: &Sender<(&'static str, Message)>,
) {
    let tx = tx.clone();
    dispatcher
        .add_method(pattern, typespec, move |msg| -> MethodResult {
            tx.send((tag, msg.clone())).map_err(|e| e.to_string())
        })
        .unwrap();
}

fn drain(rx: &Receiver<(&'static str, Message)>) -> Vec<&'static str> {
    rx.try_iter().map(|(tag, _)| tag).collect()
}

#[test]
fn test_every_matching_binding_runs_once_in_order() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/synth/*/freq"), None, "glob", &tx);
    bind(&dispatcher, Some("/synth/1/amp"), None, "other", &tx);
    bind(&dispatcher, None, None, "all", &tx);
    bind(&dispatcher, Some("/synth/{1,2}/freq"), Some("f"), "typed", &tx);
    bind(&dispatcher, Some("/synth/1/freq"), Some("s"), "wrong-type", &tx);
    bind(&dispatcher, Some("/synth/[0123]/freq"), None, "set", &tx);

    let invoked = dispatcher
        .dispatch(Message::new("/synth/1/freq").with_arg(440))
        .unwrap();

    check!(invoked == 4);
    check!(drain(&rx) == vec!["glob", "all", "typed", "set"]);
}

#[test]
fn test_typed_binding_sees_coerced_arguments() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/level"), Some("fi"), "typed", &tx);

    dispatcher
        .dispatch(Message::new("/level").with_arg(3).with_arg(7.9f32))
        .unwrap();

    let_assert!(Ok((_, msg)) = rx.try_recv());
    check!(msg.types() == "fi");
    check!(msg.arg(0).and_then(|a| a.as_float()) == Some(3.0));
    check!(msg.arg(1).and_then(|a| a.as_int()) == Some(7));
}

#[test]
fn test_incoming_address_may_be_a_pattern() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/mixer/1/mute"), None, "one", &tx);
    bind(&dispatcher, Some("/mixer/2/mute"), None, "two", &tx);
    bind(&dispatcher, Some("/mixer/2/solo"), None, "solo", &tx);

    check!(dispatcher.dispatch(Message::new("/mixer/*/mute")).unwrap() == 2);
    check!(drain(&rx) == vec!["one", "two"]);
}

#[test]
fn test_dispatch_raw_bytes() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/raw"), Some("s"), "raw", &tx);

    let bytes = Message::new("/raw").with_arg("text").encode();
    check!(dispatcher.dispatch(&bytes).unwrap() == 1);

    let_assert!(Err(OscError::MalformedPacket(_)) = dispatcher.dispatch(&b"nope"[..]));
    check!(drain(&rx) == vec!["raw"]);
}

#[test]
fn test_past_bundle_runs_before_dispatch_returns() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/a"), None, "a", &tx);
    bind(&dispatcher, Some("/b"), None, "b", &tx);

    let past = Bundle::new(TimeTag::now().after(Duration::ZERO))
        .with_element(Message::new("/a"))
        .with_element(Bundle::immediate().with_element(Message::new("/b")));
    check!(dispatcher.dispatch(past).unwrap() == 2);
    check!(drain(&rx) == vec!["a", "b"]);

    let ancient = Bundle::new(TimeTag::new(1, 0)).with_element(Message::new("/a"));
    check!(dispatcher.dispatch(ancient).unwrap() == 1);
    check!(dispatcher.pending_bundles() == 0);
}

#[test]
fn test_future_bundle_waits_for_its_timetag() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/later"), None, "later", &tx);

    let start = Instant::now();
    let bundle = Bundle::new(TimeTag::now().after(Duration::from_secs(2)))
        .with_element(Message::new("/later").with_arg(1));
    check!(dispatcher.dispatch(bundle).unwrap() == 0);
    check!(dispatcher.pending_bundles() == 1);
    check!(rx.try_recv().is_err());

    let_assert!(Ok(("later", _)) = rx.recv_timeout(Duration::from_secs(5)));
    let elapsed = start.elapsed();
    check!(elapsed >= Duration::from_millis(1950), "fired after {elapsed:?}");
    check!(elapsed < Duration::from_secs(4), "fired after {elapsed:?}");
}

#[test]
fn test_deferred_bundles_fire_in_timetag_order() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, None, None, "any", &tx);

    let now = TimeTag::now();
    for (ms, address) in [(300, "/third"), (100, "/first"), (200, "/second")] {
        let bundle = Bundle::new(now.after(Duration::from_millis(ms)))
            .with_element(Message::new(address));
        dispatcher.dispatch(bundle).unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let_assert!(Ok((_, msg)) = rx.recv_timeout(Duration::from_secs(2)));
        order.push(msg.address().to_string());
    }
    check!(order == vec!["/first", "/second", "/third"]);
}

#[test]
fn test_scheduled_bundle_outlives_dispatcher() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/orphan"), None, "orphan", &tx);
    drop(tx);

    let bundle = Bundle::new(TimeTag::now().after(Duration::from_millis(200)))
        .with_element(Message::new("/orphan"));
    dispatcher.dispatch(bundle).unwrap();
    drop(dispatcher);

    let_assert!(Ok(("orphan", _)) = rx.recv_timeout(Duration::from_secs(2)));
    // The scheduler thread exits and drops the registry with our sender.
    let_assert!(Err(_) = rx.recv_timeout(Duration::from_secs(2)));
}

#[test]
fn test_source_reaches_bundle_elements() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, None, None, "any", &tx);

    let source: SocketAddr = "10.0.0.7:57120".parse().unwrap();
    let mut bundle = Bundle::immediate()
        .with_element(Message::new("/one"))
        .with_element(Bundle::immediate().with_element(Message::new("/two")));
    bundle.set_source(Some(source));
    dispatcher.dispatch(bundle).unwrap();

    let sources: Vec<_> = rx.try_iter().map(|(_, msg)| msg.source()).collect();
    check!(sources == vec![Some(source), Some(source)]);
}

#[test]
fn test_failing_callbacks_are_reported_after_all_bindings() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    dispatcher
        .add_method(Some("/fragile"), None, |_| Err("refused".to_string()))
        .unwrap();
    dispatcher
        .add_method(Some("/fragile"), None, |_| -> MethodResult {
            panic!("callback blew up")
        })
        .unwrap();
    bind(&dispatcher, Some("/fragile"), None, "survivor", &tx);

    let_assert!(
        Err(OscError::DispatchPanic { address, failures }) =
            dispatcher.dispatch(Message::new("/fragile"))
    );
    check!(address == "/fragile");
    assert!(failures.len() == 2);
    check!(failures[0].contains("refused"));
    check!(failures[1].contains("callback blew up"));
    check!(drain(&rx) == vec!["survivor"]);

    // The dispatcher stays usable.
    check!(dispatcher.len() == 3);
    let_assert!(Err(OscError::DispatchPanic { .. }) = dispatcher.dispatch(Message::new("/fragile")));
}

#[test]
fn test_removed_binding_misses_pending_bundle() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, Some("/gone"), None, "gone", &tx);
    bind(&dispatcher, Some("/gone"), None, "kept", &tx);
    let first = dispatcher.bindings()[0].id();

    let bundle = Bundle::new(TimeTag::now().after(Duration::from_millis(200)))
        .with_element(Message::new("/gone"));
    dispatcher.dispatch(bundle).unwrap();
    check!(dispatcher.remove_method(first));

    let_assert!(Ok(("kept", _)) = rx.recv_timeout(Duration::from_secs(2)));
    check!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_clones_share_registry() {
    let dispatcher = Dispatcher::new();
    let handle = dispatcher.clone();
    let (tx, rx) = unbounded();

    let worker = std::thread::spawn(move || {
        bind(&handle, Some("/shared"), None, "from-thread", &tx);
    });
    worker.join().unwrap();

    check!(dispatcher.dispatch(Message::new("/shared")).unwrap() == 1);
    check!(drain(&rx) == vec!["from-thread"]);
}

#[test]
fn test_empty_address_is_malformed() {
    let dispatcher = Dispatcher::new();
    let (tx, rx) = unbounded();
    bind(&dispatcher, None, None, "any", &tx);

    let_assert!(Err(OscError::MalformedPacket(_)) = dispatcher.dispatch(Message::new("")));
    let_assert!(Err(OscError::MalformedPacket(_)) = dispatcher.dispatch(Message::new("no-slash")));
    check!(drain(&rx).is_empty());
}
