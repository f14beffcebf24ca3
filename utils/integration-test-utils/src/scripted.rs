//! Endpoint doubles driven by a per-address script.

use async_trait::async_trait;
use relay_pool::{
    ConnectTimeouts, Endpoint, EndpointConnector, EndpointSubscription, PoolError, RelayEvent,
    SubscriptionSink,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestEvent {
    pub id: String,
    pub content: String,
}

impl TestEvent {
    pub fn new(id: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
        }
    }
}

impl RelayEvent for TestEvent {
    fn id(&self) -> &str {
        &self.id
    }
}

pub type TestFilter = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    /// Connect completes after this delay.
    AcceptAfter(Duration),
    Refuse,
    /// Connect never completes.
    Hang,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatchUp {
    /// Terminal notification right after the stored events.
    Immediately,
    /// Terminal notification this long after the stored events.
    After(Duration),
    Never,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishBehavior {
    Accept(String),
    Reject(String),
}

#[derive(Clone, Debug)]
pub struct RelayScript {
    pub connect: ConnectBehavior,
    pub stored: Vec<TestEvent>,
    /// Delay before the first stored event is delivered.
    pub first_event_delay: Option<Duration>,
    pub catch_up: CatchUp,
    pub publish: PublishBehavior,
}

impl Default for RelayScript {
    fn default() -> Self {
        Self {
            connect: ConnectBehavior::Accept,
            stored: Vec::new(),
            first_event_delay: None,
            catch_up: CatchUp::Immediately,
            publish: PublishBehavior::Accept(String::new()),
        }
    }
}

impl RelayScript {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn accepting_after(delay: Duration) -> Self {
        Self {
            connect: ConnectBehavior::AcceptAfter(delay),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            connect: ConnectBehavior::Refuse,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            connect: ConnectBehavior::Hang,
            ..Self::default()
        }
    }

    pub fn with_events(mut self, stored: Vec<TestEvent>) -> Self {
        self.stored = stored;
        self
    }

    pub fn delaying_events(mut self, delay: Duration) -> Self {
        self.first_event_delay = Some(delay);
        self
    }

    pub fn catching_up(mut self, catch_up: CatchUp) -> Self {
        self.catch_up = catch_up;
        self
    }

    pub fn rejecting_publish(mut self, reason: &str) -> Self {
        self.publish = PublishBehavior::Reject(reason.to_string());
        self
    }
}

struct ScriptedSubscription {
    sink: Arc<dyn SubscriptionSink<TestEvent>>,
    filters: Mutex<Vec<TestFilter>>,
    refires: AtomicUsize,
    closed: AtomicBool,
}

impl EndpointSubscription<TestFilter> for ScriptedSubscription {
    fn refire(&self, filters: Vec<TestFilter>) {
        *self.filters.lock().expect("lock filters") = filters;
        self.refires.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.sink.on_close("closed by caller");
        }
    }
}

/// Handle returned to the pool; shares state with the endpoint's bookkeeping.
struct SubscriptionHandle(Arc<ScriptedSubscription>);

impl EndpointSubscription<TestFilter> for SubscriptionHandle {
    fn refire(&self, filters: Vec<TestFilter>) {
        self.0.refire(filters);
    }

    fn close(&self) {
        self.0.close();
    }
}

pub struct ScriptedEndpoint {
    address: String,
    script: RelayScript,
    timeouts: ConnectTimeouts,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    close_calls: AtomicUsize,
    subscriptions: Mutex<Vec<Arc<ScriptedSubscription>>>,
}

impl ScriptedEndpoint {
    fn new(address: &str, script: RelayScript, timeouts: ConnectTimeouts) -> Self {
        Self {
            address: address.to_string(),
            script,
            timeouts,
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn timeouts(&self) -> ConnectTimeouts {
        self.timeouts
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscriptions.lock().expect("lock subscriptions").len()
    }

    pub fn open_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("lock subscriptions")
            .iter()
            .filter(|subscription| !subscription.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Total number of filter re-issues across this endpoint's subscriptions.
    pub fn refires(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("lock subscriptions")
            .iter()
            .map(|subscription| subscription.refires.load(Ordering::SeqCst))
            .sum()
    }

    /// Filters currently active on each subscription, in subscribe order.
    pub fn filters(&self) -> Vec<Vec<TestFilter>> {
        self.subscriptions
            .lock()
            .expect("lock subscriptions")
            .iter()
            .map(|subscription| subscription.filters.lock().expect("lock filters").clone())
            .collect()
    }

    fn open_sinks(&self) -> Vec<Arc<dyn SubscriptionSink<TestEvent>>> {
        self.subscriptions
            .lock()
            .expect("lock subscriptions")
            .iter()
            .filter(|subscription| !subscription.closed.load(Ordering::SeqCst))
            .map(|subscription| subscription.sink.clone())
            .collect()
    }

    /// Delivers a live event to every open subscription.
    pub fn push_event(&self, event: TestEvent) {
        for sink in self.open_sinks() {
            sink.on_event(event.clone());
        }
    }

    /// Sends a terminal notification on every open subscription.
    pub fn catch_up(&self) {
        for sink in self.open_sinks() {
            sink.on_terminal();
        }
    }

    /// Closes every open subscription from the relay side.
    pub fn close_subscriptions(&self, reason: &str) {
        let open: Vec<Arc<ScriptedSubscription>> = self
            .subscriptions
            .lock()
            .expect("lock subscriptions")
            .iter()
            .filter(|subscription| !subscription.closed.swap(true, Ordering::SeqCst))
            .cloned()
            .collect();
        for subscription in open {
            subscription.sink.on_close(reason);
        }
    }
}

#[async_trait]
impl Endpoint<TestEvent, TestFilter> for ScriptedEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), PoolError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.connect {
            ConnectBehavior::Accept => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Refuse => Err(PoolError::connection(&self.address, "refused")),
            ConnectBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn subscribe(
        &self,
        filters: Vec<TestFilter>,
        sink: Arc<dyn SubscriptionSink<TestEvent>>,
    ) -> Result<Box<dyn EndpointSubscription<TestFilter>>, PoolError> {
        if !self.is_connected() {
            return Err(PoolError::subscribe(&self.address, "not connected"));
        }

        let subscription = Arc::new(ScriptedSubscription {
            sink: sink.clone(),
            filters: Mutex::new(filters),
            refires: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.subscriptions
            .lock()
            .expect("lock subscriptions")
            .push(subscription.clone());

        let stored = self.script.stored.clone();
        let first_event_delay = self.script.first_event_delay;
        let catch_up = self.script.catch_up;
        let address = self.address.clone();
        let replay = subscription.clone();
        tokio::spawn(async move {
            if let Some(delay) = first_event_delay {
                tokio::time::sleep(delay).await;
            }
            for event in stored {
                if replay.closed.load(Ordering::SeqCst) {
                    return;
                }
                trace!(address = %address, event_id = %event.id, "replaying stored event");
                sink.on_event(event);
            }
            match catch_up {
                CatchUp::Immediately => sink.on_terminal(),
                CatchUp::After(delay) => {
                    tokio::time::sleep(delay).await;
                    sink.on_terminal();
                }
                CatchUp::Never => {}
            }
        });

        Ok(Box::new(SubscriptionHandle(subscription)))
    }

    async fn publish(&self, _event: TestEvent) -> Result<String, PoolError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        match &self.script.publish {
            PublishBehavior::Accept(message) => Ok(message.clone()),
            PublishBehavior::Reject(reason) => Err(PoolError::publish(&self.address, reason.clone())),
        }
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Builds [`ScriptedEndpoint`]s from per-address scripts. Unscripted addresses
/// get [`RelayScript::accepting`].
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, RelayScript>>,
    endpoints: Mutex<HashMap<String, Arc<ScriptedEndpoint>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relay(self, address: &str, script: RelayScript) -> Self {
        self.scripts
            .lock()
            .expect("lock scripts")
            .insert(address.to_string(), script);
        self
    }

    /// The endpoint created for `address`, once the pool has asked for it.
    pub fn endpoint(&self, address: &str) -> Option<Arc<ScriptedEndpoint>> {
        self.endpoints
            .lock()
            .expect("lock endpoints")
            .get(address)
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.endpoints.lock().expect("lock endpoints").len()
    }
}

impl EndpointConnector<TestEvent, TestFilter> for ScriptedConnector {
    fn canonical_address(&self, address: &str) -> String {
        address.trim_end_matches('/').to_lowercase()
    }

    fn create(
        &self,
        address: &str,
        timeouts: ConnectTimeouts,
    ) -> Arc<dyn Endpoint<TestEvent, TestFilter>> {
        let script = self
            .scripts
            .lock()
            .expect("lock scripts")
            .get(address)
            .cloned()
            .unwrap_or_default();
        let endpoint = Arc::new(ScriptedEndpoint::new(address, script, timeouts));
        self.endpoints
            .lock()
            .expect("lock endpoints")
            .insert(address.to_string(), endpoint.clone());
        endpoint
    }
}
