//! Connection registry keyed by canonical endpoint address.

use crate::config::ConnectTimeouts;
use crate::endpoint::{Endpoint, EndpointConnector, RelayEvent, RelayFilter};
use crate::error::PoolError;
use crate::observability::events;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const COMPONENT: &str = "endpoint_registry";

/// A connect attempt every concurrent `ensure` for the same entry awaits.
type PendingConnect = Shared<BoxFuture<'static, Result<(), PoolError>>>;

struct RegistryEntry<E, F> {
    endpoint: Arc<dyn Endpoint<E, F>>,
    connecting: Option<PendingConnect>,
}

type EndpointMap<E, F> = HashMap<String, RegistryEntry<E, F>>;

pub(crate) struct EndpointRegistry<E, F>
where
    E: RelayEvent,
    F: RelayFilter,
{
    connector: Arc<dyn EndpointConnector<E, F>>,
    timeouts: ConnectTimeouts,
    endpoints: Mutex<EndpointMap<E, F>>,
}

fn bounded_connect<E, F>(
    endpoint: Arc<dyn Endpoint<E, F>>,
    address: String,
    timeout: Duration,
) -> PendingConnect
where
    E: RelayEvent,
    F: RelayFilter,
{
    async move {
        match tokio::time::timeout(timeout, endpoint.connect()).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::ConnectTimeout { address, timeout }),
        }
    }
    .boxed()
    .shared()
}

impl<E, F> EndpointRegistry<E, F>
where
    E: RelayEvent,
    F: RelayFilter,
{
    pub(crate) fn new(connector: Arc<dyn EndpointConnector<E, F>>, timeouts: ConnectTimeouts) -> Self {
        Self {
            connector,
            timeouts,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn canonical_address(&self, address: &str) -> String {
        self.connector.canonical_address(address)
    }

    fn entries(&self) -> MutexGuard<'_, EndpointMap<E, F>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a connected endpoint for `address`, connecting or reconnecting as needed.
    ///
    /// The map lock is released before any network activity, so concurrent calls for
    /// different addresses never wait on each other. Concurrent calls for the same
    /// address share one connect attempt.
    pub(crate) async fn ensure(&self, address: &str) -> Result<Arc<dyn Endpoint<E, F>>, PoolError> {
        let key = self.connector.canonical_address(address);

        let (endpoint, connect) = {
            let mut endpoints = self.entries();
            let entry = endpoints.entry(key.clone()).or_insert_with(|| {
                debug!(
                    event = events::REGISTRY_ENDPOINT_CREATED,
                    component = COMPONENT,
                    address = %key,
                    connect_timeout_ms = self.timeouts.connect.as_millis() as u64,
                    "created endpoint"
                );
                RegistryEntry {
                    endpoint: self.connector.create(&key, self.timeouts),
                    connecting: None,
                }
            });
            if entry.endpoint.is_connected() {
                return Ok(entry.endpoint.clone());
            }

            let connect = match &entry.connecting {
                Some(pending) => pending.clone(),
                None => {
                    debug!(
                        event = events::REGISTRY_RECONNECT,
                        component = COMPONENT,
                        address = %key,
                        "endpoint not open, connecting"
                    );
                    let pending =
                        bounded_connect(entry.endpoint.clone(), key.clone(), self.timeouts.connect);
                    entry.connecting = Some(pending.clone());
                    pending
                }
            };
            (entry.endpoint.clone(), connect)
        };

        let connected = connect.clone().await;

        if let Some(entry) = self.entries().get_mut(&key) {
            if entry
                .connecting
                .as_ref()
                .is_some_and(|pending| pending.ptr_eq(&connect))
            {
                entry.connecting = None;
            }
        }

        match connected {
            Ok(()) => Ok(endpoint),
            Err(err) => {
                warn!(
                    event = events::REGISTRY_CONNECT_FAILED,
                    component = COMPONENT,
                    address = %key,
                    err = %err,
                    "unable to connect endpoint"
                );
                Err(err)
            }
        }
    }

    /// Closes the endpoints registered for `addresses`. Entries stay registered so a
    /// later [`Self::ensure`] reconnects them in place.
    pub(crate) fn close<S: AsRef<str>>(&self, addresses: &[S]) {
        let targets: Vec<(String, Arc<dyn Endpoint<E, F>>)> = {
            let mut endpoints = self.entries();
            addresses
                .iter()
                .map(|address| self.connector.canonical_address(address.as_ref()))
                .filter_map(|key| {
                    let entry = endpoints.get_mut(&key)?;
                    entry.connecting = None;
                    Some((key, entry.endpoint.clone()))
                })
                .collect()
        };

        for (address, endpoint) in targets {
            endpoint.close();
            debug!(
                event = events::REGISTRY_ENDPOINT_CLOSED,
                component = COMPONENT,
                address = %address,
                "closed endpoint"
            );
        }
    }

    /// Closes every endpoint and forgets them.
    pub(crate) fn close_all(&self) {
        let drained: Vec<_> = self.entries().drain().collect();
        for (address, entry) in drained {
            entry.endpoint.close();
            debug!(
                event = events::REGISTRY_ENDPOINT_CLOSED,
                component = COMPONENT,
                address = %address,
                "closed endpoint"
            );
        }
    }

    /// `(address, connected)` for every registered endpoint, sorted by address.
    pub(crate) fn connection_status(&self) -> Vec<(String, bool)> {
        let mut status: Vec<(String, bool)> = self
            .entries()
            .iter()
            .map(|(address, entry)| (address.clone(), entry.endpoint.is_connected()))
            .collect();
        status.sort();
        status
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::EndpointRegistry;
    use crate::config::{ConnectTimeouts, PoolConfig};
    use crate::endpoint::{
        Endpoint, EndpointConnector, EndpointSubscription, RelayEvent, SubscriptionSink,
    };
    use crate::error::PoolError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    #[derive(Clone)]
    struct NoteEvent(String);

    impl RelayEvent for NoteEvent {
        fn id(&self) -> &str {
            &self.0
        }
    }

    struct CountingEndpoint {
        address: String,
        connected: AtomicBool,
        refuse: bool,
        hang: bool,
        slow: bool,
        connect_calls: AtomicUsize,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint<NoteEvent, String> for CountingEndpoint {
        fn address(&self) -> &str {
            &self.address
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> Result<(), PoolError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.hang {
                futures::future::pending::<()>().await;
            }
            if self.refuse {
                return Err(PoolError::connection(&self.address, "refused"));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(
            &self,
            _filters: Vec<String>,
            _sink: Arc<dyn SubscriptionSink<NoteEvent>>,
        ) -> Result<Box<dyn EndpointSubscription<String>>, PoolError> {
            Err(PoolError::subscribe(&self.address, "not used in tests"))
        }

        async fn publish(&self, _event: NoteEvent) -> Result<String, PoolError> {
            Err(PoolError::publish(&self.address, "not used in tests"))
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        refuse: Vec<&'static str>,
        hang: Vec<&'static str>,
        slow: Vec<&'static str>,
        created: StdMutex<HashMap<String, Arc<CountingEndpoint>>>,
        timeouts: StdMutex<Vec<ConnectTimeouts>>,
    }

    impl CountingConnector {
        fn endpoint(&self, address: &str) -> Arc<CountingEndpoint> {
            self.created
                .lock()
                .expect("lock created")
                .get(address)
                .cloned()
                .expect("endpoint created")
        }
    }

    impl EndpointConnector<NoteEvent, String> for CountingConnector {
        fn canonical_address(&self, address: &str) -> String {
            address.trim_end_matches('/').to_lowercase()
        }

        fn create(
            &self,
            address: &str,
            timeouts: ConnectTimeouts,
        ) -> Arc<dyn Endpoint<NoteEvent, String>> {
            let endpoint = Arc::new(CountingEndpoint {
                address: address.to_string(),
                connected: AtomicBool::new(false),
                refuse: self.refuse.iter().any(|refused| *refused == address),
                hang: self.hang.iter().any(|hanging| *hanging == address),
                slow: self.slow.iter().any(|slow| *slow == address),
                connect_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
            });
            self.created
                .lock()
                .expect("lock created")
                .insert(address.to_string(), endpoint.clone());
            self.timeouts.lock().expect("lock timeouts").push(timeouts);
            endpoint
        }
    }

    fn registry(
        connector: Arc<CountingConnector>,
    ) -> EndpointRegistry<NoteEvent, String> {
        EndpointRegistry::new(connector, PoolConfig::default().connect_timeouts())
    }

    #[tokio::test]
    async fn ensure_reuses_open_endpoint_without_reconnecting() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry(connector.clone());

        registry.ensure("wss://a.example").await.expect("first connect");
        registry.ensure("WSS://A.example/").await.expect("second lookup");

        assert_eq!(registry.len(), 1);
        let endpoint = connector.endpoint("wss://a.example");
        assert_eq!(endpoint.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            connector.timeouts.lock().expect("lock timeouts")[0].connect,
            Duration::from_millis(3060)
        );
    }

    #[tokio::test]
    async fn ensure_reconnects_closed_entry_in_place() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry(connector.clone());

        let first = registry.ensure("wss://a.example").await.expect("connect");
        registry.close(&["wss://a.example"]);
        assert!(!first.is_connected());

        let second = registry.ensure("wss://a.example").await.expect("reconnect");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        let endpoint = connector.endpoint("wss://a.example");
        assert_eq!(endpoint.connect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(endpoint.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ensure_surfaces_refused_connect_as_connection_error() {
        let connector = Arc::new(CountingConnector {
            refuse: vec!["wss://down.example"],
            ..Default::default()
        });
        let registry = registry(connector);

        let err = registry
            .ensure("wss://down.example")
            .await
            .err()
            .expect("connect must fail");

        assert!(err.is_connection_error());
        assert_eq!(err.address(), Some("wss://down.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_times_out_hanging_connect() {
        let connector = Arc::new(CountingConnector {
            hang: vec!["wss://slow.example"],
            ..Default::default()
        });
        let registry = registry(connector);

        let started = tokio::time::Instant::now();
        let err = registry
            .ensure("wss://slow.example")
            .await
            .err()
            .expect("connect must time out");

        assert!(matches!(err, PoolError::ConnectTimeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(3060));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_ensure_shares_one_connect_attempt() {
        let connector = Arc::new(CountingConnector {
            slow: vec!["wss://slow.example"],
            ..Default::default()
        });
        let registry = registry(connector.clone());

        let started = tokio::time::Instant::now();
        let (first, second) = tokio::join!(
            registry.ensure("wss://slow.example"),
            registry.ensure("WSS://slow.example/")
        );
        let first = first.expect("first caller connects");
        let second = second.expect("second caller shares the connect");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        let endpoint = connector.endpoint("wss://slow.example");
        assert_eq!(endpoint.connect_calls.load(Ordering::SeqCst), 1);

        registry.close(&["wss://slow.example"]);
        registry.ensure("wss://slow.example").await.expect("reconnect");
        assert_eq!(endpoint.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_ignores_unknown_addresses_and_close_all_empties_registry() {
        let connector = Arc::new(CountingConnector::default());
        let registry = registry(connector.clone());

        registry.ensure("wss://a.example").await.expect("connect a");
        registry.ensure("wss://b.example").await.expect("connect b");
        registry.close(&["wss://unknown.example", "wss://b.example", "wss://b.example"]);

        assert_eq!(
            registry.connection_status(),
            vec![
                ("wss://a.example".to_string(), true),
                ("wss://b.example".to_string(), false),
            ]
        );

        registry.close_all();
        assert_eq!(registry.len(), 0);
        assert_eq!(
            connector
                .endpoint("wss://a.example")
                .close_calls
                .load(Ordering::SeqCst),
            1
        );
    }
}
