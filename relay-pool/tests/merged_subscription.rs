use integration_test_utils::{
    init_logging, CatchUp, RelayScript, ScriptedConnector, TestEvent, TestFilter,
};
use relay_pool::{EndpointClose, PoolConfig, RelayPool, SubscribeOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn pool(connector: &Arc<ScriptedConnector>) -> RelayPool<TestEvent, TestFilter> {
    init_logging();
    RelayPool::new("merged", PoolConfig::default(), connector.clone())
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&TestEvent) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |event: &TestEvent| {
        sink.lock().expect("lock seen").push(event.id.clone())
    })
}

#[tokio::test(start_paused = true)]
async fn terminal_fires_once_after_slowest_endpoint_catches_up() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://fast", RelayScript::accepting())
            .relay(
                "wss://slow",
                RelayScript::accepting().catching_up(CatchUp::After(Duration::from_millis(500))),
            ),
    );
    let pool = pool(&connector);
    let terminals = Arc::new(AtomicUsize::new(0));
    let counted = terminals.clone();
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    let subscription = pool.subscribe(
        &["wss://fast", "wss://slow"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new().on_terminal(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = terminal_tx.send(());
        }),
    );

    terminal_rx.recv().await.expect("terminal signal");
    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert!(subscription.is_terminal_sent());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(terminals.load(Ordering::SeqCst), 1);
    assert!(!subscription.is_stopped());
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn terminal_fires_on_timeout_when_endpoints_stay_silent() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting().catching_up(CatchUp::Never))
            .relay("wss://b", RelayScript::accepting().catching_up(CatchUp::Never)),
    );
    let pool = pool(&connector);
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    let subscription = pool.subscribe(
        &["wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new().on_terminal(move || {
            let _ = terminal_tx.send(());
        }),
    );

    terminal_rx.recv().await.expect("terminal signal");
    assert_eq!(started.elapsed(), Duration::from_millis(3400));
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn per_call_terminal_timeout_overrides_the_pool_default() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting().catching_up(CatchUp::Never)),
    );
    let pool = pool(&connector);
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let started = Instant::now();
    let subscription = pool.subscribe(
        &["wss://a"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .eose_timeout(Duration::from_millis(750))
            .on_terminal(move || {
                let _ = terminal_tx.send(());
            }),
    );

    terminal_rx.recv().await.expect("terminal signal");
    assert_eq!(started.elapsed(), Duration::from_millis(750));
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn duplicate_events_are_forwarded_once_and_provenance_collects_every_relay() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay(
                "wss://a",
                RelayScript::accepting().with_events(vec![
                    TestEvent::new("e1", "hello"),
                    TestEvent::new("e2", "again"),
                ]),
            )
            .relay(
                "wss://b",
                RelayScript::accepting().with_events(vec![TestEvent::new("e1", "hello")]),
            ),
    );
    let pool = pool(&connector);
    let (seen, on_event) = recorder();
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let subscription = pool.subscribe(
        &["wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_event(on_event)
            .on_terminal(move || {
                let _ = terminal_tx.send(());
            }),
    );
    terminal_rx.recv().await.expect("terminal signal");

    let mut delivered = seen.lock().expect("lock seen").clone();
    delivered.sort();
    assert_eq!(delivered, vec!["e1".to_string(), "e2".to_string()]);

    let mut provenance = pool.provenance("e1");
    provenance.sort();
    assert_eq!(provenance, vec!["wss://a".to_string(), "wss://b".to_string()]);
    assert_eq!(pool.provenance("e2"), vec!["wss://a".to_string()]);
    assert!(pool.provenance("unknown").is_empty());

    // A live re-delivery of an already forwarded event changes nothing.
    connector
        .endpoint("wss://b")
        .expect("endpoint b")
        .push_event(TestEvent::new("e2", "again"));
    assert_eq!(seen.lock().expect("lock seen").len(), 2);
    assert_eq!(pool.provenance("e2").len(), 2);
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn already_have_event_suppresses_forwarding_but_keeps_provenance() {
    let connector = Arc::new(ScriptedConnector::new().relay(
        "wss://a",
        RelayScript::accepting().with_events(vec![
            TestEvent::new("cached", "old"),
            TestEvent::new("fresh", "new"),
        ]),
    ));
    let pool = pool(&connector);
    let (seen, on_event) = recorder();
    let asked = Arc::new(Mutex::new(Vec::new()));
    let asked_in_predicate = asked.clone();
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let subscription = pool.subscribe(
        &["wss://a"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .already_have_event(move |id: &str, address: &str| {
                asked_in_predicate
                    .lock()
                    .expect("lock asked")
                    .push((id.to_string(), address.to_string()));
                id == "cached"
            })
            .on_event(on_event)
            .on_terminal(move || {
                let _ = terminal_tx.send(());
            }),
    );
    terminal_rx.recv().await.expect("terminal signal");

    assert_eq!(*seen.lock().expect("lock seen"), vec!["fresh".to_string()]);
    assert_eq!(pool.provenance("cached"), vec!["wss://a".to_string()]);
    assert_eq!(
        *asked.lock().expect("lock asked"),
        vec![
            ("cached".to_string(), "wss://a".to_string()),
            ("fresh".to_string(), "wss://a".to_string()),
        ]
    );
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn subscriptions_on_one_pool_deduplicate_independently() {
    let stored = vec![TestEvent::new("e1", "shared")];
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting().with_events(stored.clone()))
            .relay("wss://b", RelayScript::accepting().with_events(stored)),
    );
    let pool = pool(&connector);

    let (first_seen, first_on_event) = recorder();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let first = pool.subscribe(
        &["wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_event(first_on_event)
            .on_terminal(move || {
                let _ = first_tx.send(());
            }),
    );
    let (second_seen, second_on_event) = recorder();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    let second = pool.subscribe(
        &["wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_event(second_on_event)
            .on_terminal(move || {
                let _ = second_tx.send(());
            }),
    );

    first_rx.recv().await.expect("first terminal");
    second_rx.recv().await.expect("second terminal");

    assert_eq!(*first_seen.lock().expect("lock seen"), vec!["e1".to_string()]);
    assert_eq!(*second_seen.lock().expect("lock seen"), vec!["e1".to_string()]);
    assert_eq!(pool.provenance("e1").len(), 2);
    assert_eq!(connector.created(), 2);
    first.stop();
    second.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_silences_live_events() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting().catching_up(CatchUp::Never)),
    );
    let pool = pool(&connector);
    let (seen, on_event) = recorder();
    let terminals = Arc::new(AtomicUsize::new(0));
    let counted = terminals.clone();

    let subscription = pool.subscribe(
        &["wss://a"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_event(on_event)
            .on_terminal(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    let endpoint = connector.endpoint("wss://a").expect("endpoint a");
    assert_eq!(endpoint.open_subscriptions(), 1);

    endpoint.push_event(TestEvent::new("live", "before stop"));
    subscription.stop();
    subscription.stop();
    endpoint.push_event(TestEvent::new("late", "after stop"));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(subscription.is_stopped());
    assert_eq!(endpoint.open_subscriptions(), 0);
    assert_eq!(*seen.lock().expect("lock seen"), vec!["live".to_string()]);
    assert_eq!(terminals.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn close_listener_reports_every_endpoint_reason_once() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting())
            .relay("wss://b", RelayScript::accepting())
            .relay("wss://down", RelayScript::refusing()),
    );
    let pool = pool(&connector);
    let closes = Arc::new(Mutex::new(Vec::new()));
    let recorded = closes.clone();
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let subscription = pool.subscribe(
        &["wss://a", "wss://b", "wss://down"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_terminal(move || {
                let _ = terminal_tx.send(());
            })
            .on_close(move |all: &[EndpointClose]| {
                recorded.lock().expect("lock closes").push(all.to_vec());
            }),
    );
    terminal_rx.recv().await.expect("terminal signal");
    assert!(closes.lock().expect("lock closes").is_empty());

    connector
        .endpoint("wss://a")
        .expect("endpoint a")
        .close_subscriptions("rate-limited");
    assert!(closes.lock().expect("lock closes").is_empty());
    connector
        .endpoint("wss://b")
        .expect("endpoint b")
        .close_subscriptions("shutting down");

    let closes = closes.lock().expect("lock closes");
    assert_eq!(closes.len(), 1);
    let reasons: Vec<(&str, &str)> = closes[0]
        .iter()
        .map(|close| (close.address.as_str(), close.reason.as_str()))
        .collect();
    assert_eq!(reasons.len(), 3);
    assert!(reasons.contains(&("wss://a", "rate-limited")));
    assert!(reasons.contains(&("wss://b", "shutting down")));
    assert!(reasons
        .iter()
        .any(|(address, reason)| *address == "wss://down" && reason.starts_with("connection failed")));
    drop(closes);
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn subscribe_until_terminal_stops_itself() {
    let connector = Arc::new(ScriptedConnector::new().relay(
        "wss://a",
        RelayScript::accepting().with_events(vec![TestEvent::new("e1", "stored")]),
    ));
    let pool = pool(&connector);
    let (seen, on_event) = recorder();
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();

    let subscription = pool.subscribe_until_terminal(
        &["wss://a"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new()
            .on_event(on_event)
            .on_terminal(move || {
                let _ = terminal_tx.send(());
            }),
    );
    terminal_rx.recv().await.expect("terminal signal");

    assert!(subscription.is_stopped());
    let endpoint = connector.endpoint("wss://a").expect("endpoint a");
    assert_eq!(endpoint.open_subscriptions(), 0);
    endpoint.push_event(TestEvent::new("e2", "live"));
    assert_eq!(*seen.lock().expect("lock seen"), vec!["e1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn add_filters_reissues_the_combined_set_on_every_endpoint() {
    let connector = Arc::new(
        ScriptedConnector::new()
            .relay("wss://a", RelayScript::accepting().catching_up(CatchUp::Never))
            .relay("wss://b", RelayScript::accepting().catching_up(CatchUp::Never)),
    );
    let pool = pool(&connector);

    let subscription = pool.subscribe(
        &["wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new(),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    subscription.add_filters(vec!["kind:7".to_string()]);

    for address in ["wss://a", "wss://b"] {
        let endpoint = connector.endpoint(address).expect("endpoint");
        assert_eq!(endpoint.refires(), 1);
        assert_eq!(
            endpoint.filters(),
            vec![vec!["kind:1".to_string(), "kind:7".to_string()]]
        );
    }
    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn labels_default_to_unique_values_and_addresses_are_canonical() {
    let connector = Arc::new(ScriptedConnector::new());
    let pool = pool(&connector);

    let first = pool.subscribe(
        &["WSS://A/", "wss://a", "wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new(),
    );
    let second = pool.subscribe(
        &["wss://b"],
        vec!["kind:1".to_string()],
        SubscribeOptions::new().label("profile-lookup"),
    );

    assert_eq!(first.addresses(), ["wss://a".to_string(), "wss://b".to_string()]);
    assert!(!first.label().is_empty());
    assert_ne!(first.label(), second.label());
    assert_eq!(second.label(), "profile-lookup");
    first.stop();
    second.stop();
}
