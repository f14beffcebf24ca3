//! Merged subscription engine: one underlying subscription per endpoint, one
//! logical stream for the caller.
//!
//! Lifecycle: starting (connects in flight) -> live -> terminal sent -> stopped.
//! The merged terminal signal fires once, when every endpoint has caught up or
//! closed, or when the terminal timeout elapses, whichever comes first.

use crate::control_plane::endpoint_registry::EndpointRegistry;
use crate::data_plane::listeners::{ListenerRegistry, ListenerToken};
use crate::endpoint::{EndpointSubscription, RelayEvent, RelayFilter, SubscriptionSink};
use crate::observability::{events, fields};
use crate::routing::dedupe::{AlreadyHaveEvent, DeliveryFilter};
use crate::routing::seen_tracker::SeenTracker;
use crate::runtime::endpoint_tasks::{spawn_deadline, spawn_per_endpoint};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const COMPONENT: &str = "fanout_subscription";

/// Why one endpoint stopped contributing to a merged subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointClose {
    pub address: String,
    pub reason: String,
}

pub(crate) struct FanoutSettings {
    pub(crate) label: String,
    pub(crate) eose_timeout: Duration,
    pub(crate) already_have_event: Option<AlreadyHaveEvent>,
    pub(crate) stop_on_terminal: bool,
}

type SharedEndpointSubscription<F> = Arc<dyn EndpointSubscription<F>>;

pub(crate) struct FanoutSubscription<E: RelayEvent, F: RelayFilter> {
    label: String,
    addresses: Vec<String>,
    eose_timeout: Duration,
    stop_on_terminal: bool,
    filters: Mutex<Vec<F>>,
    delivery: DeliveryFilter,
    event_listeners: ListenerRegistry<E>,
    terminal_listeners: ListenerRegistry<()>,
    close_listeners: ListenerRegistry<[EndpointClose]>,
    pending_catch_up: AtomicUsize,
    started: AtomicBool,
    terminal_sent: AtomicBool,
    stopped: AtomicBool,
    closes: Mutex<Vec<EndpointClose>>,
    subscriptions: Mutex<Vec<(String, SharedEndpointSubscription<F>)>>,
    deadline: Mutex<Option<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: RelayEvent, F: RelayFilter> FanoutSubscription<E, F> {
    /// Builds an idle subscription. `addresses` must already be canonical and distinct.
    pub(crate) fn new(
        addresses: Vec<String>,
        filters: Vec<F>,
        settings: FanoutSettings,
        seen: Arc<SeenTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: settings.label,
            pending_catch_up: AtomicUsize::new(addresses.len()),
            addresses,
            eose_timeout: settings.eose_timeout,
            stop_on_terminal: settings.stop_on_terminal,
            filters: Mutex::new(filters),
            delivery: DeliveryFilter::new(seen, settings.already_have_event),
            event_listeners: ListenerRegistry::new(),
            terminal_listeners: ListenerRegistry::new(),
            close_listeners: ListenerRegistry::new(),
            started: AtomicBool::new(false),
            terminal_sent: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            closes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            deadline: Mutex::new(None),
        })
    }

    /// Arms the terminal timeout and dispatches one task per endpoint. Runs once.
    pub(crate) fn start(self: &Arc<Self>, registry: Arc<EndpointRegistry<E, F>>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            event = events::FANOUT_STARTED,
            component = COMPONENT,
            label = %self.label,
            endpoints = self.addresses.len(),
            addresses = %fields::format_addresses(&self.addresses),
            eose_timeout_ms = self.eose_timeout.as_millis() as u64,
            "starting merged subscription"
        );

        let weak = Arc::downgrade(self);
        *locked(&self.deadline) = Some(spawn_deadline(self.eose_timeout, move || {
            if let Some(fanout) = weak.upgrade() {
                fanout.fire_terminal(true);
            }
        }));

        if self.addresses.is_empty() {
            self.fire_terminal(false);
            return;
        }

        let fanout = self.clone();
        // Tasks are detached; the catch-up countdown accounts for each of them.
        spawn_per_endpoint(&self.addresses, move |address| {
            fanout.clone().run_endpoint(registry.clone(), address)
        });
    }

    async fn run_endpoint(self: Arc<Self>, registry: Arc<EndpointRegistry<E, F>>, address: String) {
        let sink = Arc::new(EndpointSink::new(address.clone(), &self));

        let endpoint = match registry.ensure(&address).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(
                    event = events::FANOUT_ENDPOINT_UNAVAILABLE,
                    component = COMPONENT,
                    label = %self.label,
                    address = %address,
                    err = %err,
                    "endpoint unavailable, counting it as caught up"
                );
                sink.on_close(&format!("connection failed: {err}"));
                return;
            }
        };

        if self.is_stopped() {
            sink.on_close("stopped before subscribe");
            return;
        }

        let filters = locked(&self.filters).clone();
        let subscription: SharedEndpointSubscription<F> =
            match endpoint.subscribe(filters, sink.clone()).await {
                Ok(subscription) => Arc::from(subscription),
                Err(err) => {
                    warn!(
                        event = events::FANOUT_ENDPOINT_UNAVAILABLE,
                        component = COMPONENT,
                        label = %self.label,
                        address = %address,
                        err = %err,
                        "unable to open endpoint subscription"
                    );
                    sink.on_close(&format!("subscribe failed: {err}"));
                    return;
                }
            };

        debug!(
            event = events::FANOUT_ENDPOINT_SUBSCRIBED,
            component = COMPONENT,
            label = %self.label,
            address = %address,
            "endpoint subscription open"
        );

        let mut subscriptions = locked(&self.subscriptions);
        if self.is_stopped() {
            drop(subscriptions);
            subscription.close();
            return;
        }
        subscriptions.push((address, subscription));
    }

    fn deliver(&self, address: &str, event: E) {
        if self.is_stopped() {
            return;
        }

        if !self.delivery.admit(event.id(), address) {
            trace!(
                event = events::FANOUT_DUPLICATE_DROPPED,
                component = COMPONENT,
                label = %self.label,
                address,
                event_id = event.id(),
                "dropping already delivered event"
            );
            return;
        }

        self.event_listeners.notify(&event);
    }

    fn endpoint_caught_up(&self, address: &str) {
        let remaining = self.pending_catch_up.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            event = events::FANOUT_ENDPOINT_CAUGHT_UP,
            component = COMPONENT,
            label = %self.label,
            address,
            remaining,
            "endpoint caught up"
        );

        if remaining == 0 {
            self.fire_terminal(false);
        }
    }

    fn endpoint_closed(&self, address: &str, reason: &str) {
        debug!(
            event = events::FANOUT_ENDPOINT_CLOSED,
            component = COMPONENT,
            label = %self.label,
            address,
            reason,
            "endpoint subscription closed"
        );

        let all_closed = {
            let mut closes = locked(&self.closes);
            closes.push(EndpointClose {
                address: address.to_string(),
                reason: reason.to_string(),
            });
            (closes.len() == self.addresses.len()).then(|| closes.clone())
        };

        if let Some(closes) = all_closed {
            info!(
                event = events::FANOUT_ALL_CLOSED,
                component = COMPONENT,
                label = %self.label,
                endpoints = closes.len(),
                "every endpoint closed"
            );
            self.close_listeners.notify(&closes);
        }
    }

    fn fire_terminal(&self, timed_out: bool) {
        if self.is_stopped() || self.terminal_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        if !timed_out {
            if let Some(deadline) = locked(&self.deadline).take() {
                deadline.abort();
            }
        } else {
            info!(
                event = events::FANOUT_TERMINAL_TIMEOUT,
                component = COMPONENT,
                label = %self.label,
                pending = self.pending_catch_up.load(Ordering::SeqCst),
                "terminal timeout elapsed before every endpoint caught up"
            );
        }

        debug!(
            event = events::FANOUT_TERMINAL,
            component = COMPONENT,
            label = %self.label,
            cause = fields::terminal_cause(timed_out),
            "firing merged terminal signal"
        );
        self.terminal_listeners.notify(&());

        if self.stop_on_terminal {
            self.stop();
        }
    }

    pub(crate) fn add_filters(&self, filters: Vec<F>) {
        let combined = {
            let mut current = locked(&self.filters);
            current.extend(filters);
            current.clone()
        };

        let open: Vec<SharedEndpointSubscription<F>> = locked(&self.subscriptions)
            .iter()
            .map(|(_, subscription)| subscription.clone())
            .collect();
        for subscription in open {
            subscription.refire(combined.clone());
        }
    }

    /// Closes every open endpoint subscription. Idempotent; emits no terminal signal.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(deadline) = locked(&self.deadline).take() {
            deadline.abort();
        }

        let open: Vec<(String, SharedEndpointSubscription<F>)> =
            locked(&self.subscriptions).drain(..).collect();
        for (_, subscription) in &open {
            subscription.close();
        }

        info!(
            event = events::FANOUT_STOPPED,
            component = COMPONENT,
            label = %self.label,
            closed = open.len(),
            "merged subscription stopped"
        );
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn is_terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }
}

/// Per-endpoint callbacks. Guarantees each endpoint releases its catch-up slot
/// once, whether it catches up, closes, or never connects.
///
/// Holds the subscription weakly: an endpoint that keeps sinks after `close()`
/// does not keep a dropped subscription alive.
struct EndpointSink<E: RelayEvent, F: RelayFilter> {
    address: String,
    fanout: Weak<FanoutSubscription<E, F>>,
    caught_up: AtomicBool,
    closed: AtomicBool,
}

impl<E: RelayEvent, F: RelayFilter> EndpointSink<E, F> {
    fn new(address: String, fanout: &Arc<FanoutSubscription<E, F>>) -> Self {
        Self {
            address,
            fanout: Arc::downgrade(fanout),
            caught_up: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl<E: RelayEvent, F: RelayFilter> SubscriptionSink<E> for EndpointSink<E, F> {
    fn on_event(&self, event: E) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.deliver(&self.address, event);
        }
    }

    fn on_terminal(&self) {
        if self.caught_up.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.endpoint_caught_up(&self.address);
        }
    }

    fn on_close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.on_terminal();
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.endpoint_closed(&self.address, reason);
        }
    }
}

/// Caller handle for a merged subscription.
///
/// Cloning shares the subscription. Dropping every handle does not stop it;
/// call [`MergedSubscription::stop`].
pub struct MergedSubscription<E: RelayEvent, F: RelayFilter> {
    inner: Arc<FanoutSubscription<E, F>>,
}

impl<E: RelayEvent, F: RelayFilter> Clone for MergedSubscription<E, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: RelayEvent, F: RelayFilter> MergedSubscription<E, F> {
    pub(crate) fn new(inner: Arc<FanoutSubscription<E, F>>) -> Self {
        Self { inner }
    }

    pub(crate) fn start(&self, registry: Arc<EndpointRegistry<E, F>>) {
        self.inner.start(registry);
    }

    /// Log correlation label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Canonical addresses this subscription targets.
    pub fn addresses(&self) -> &[String] {
        &self.inner.addresses
    }

    /// Appends `filters` and re-issues the combined set on every open endpoint subscription.
    pub fn add_filters(&self, filters: Vec<F>) {
        self.inner.add_filters(filters);
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    pub fn is_terminal_sent(&self) -> bool {
        self.inner.is_terminal_sent()
    }

    pub fn on_event(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerToken {
        self.inner.event_listeners.add(callback)
    }

    pub fn off_event(&self, token: ListenerToken) -> bool {
        self.inner.event_listeners.remove(token)
    }

    /// Registers a terminal listener. Registering after the signal fired never invokes it.
    pub fn on_terminal(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerToken {
        self.inner.terminal_listeners.add(move |_: &()| callback())
    }

    pub fn off_terminal(&self, token: ListenerToken) -> bool {
        self.inner.terminal_listeners.remove(token)
    }

    /// Registers a listener for the moment every endpoint has closed.
    pub fn on_close(
        &self,
        callback: impl Fn(&[EndpointClose]) + Send + Sync + 'static,
    ) -> ListenerToken {
        self.inner.close_listeners.add(callback)
    }

    pub fn off_close(&self, token: ListenerToken) -> bool {
        self.inner.close_listeners.remove(token)
    }
}
