//! `fetch_one` and `fetch_all`.
//!
//! Both take an idle merged subscription, register their listeners, start it,
//! and stop it once they resolve.

use crate::control_plane::endpoint_registry::EndpointRegistry;
use crate::data_plane::fanout_subscription::MergedSubscription;
use crate::endpoint::{RelayEvent, RelayFilter};
use crate::observability::events;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

const COMPONENT: &str = "query";

/// Resolves with the first forwarded event, or `None` once `timeout` elapses.
pub(crate) async fn fetch_one<E: RelayEvent, F: RelayFilter>(
    subscription: MergedSubscription<E, F>,
    registry: Arc<EndpointRegistry<E, F>>,
    timeout: Duration,
) -> Option<E> {
    let (first_tx, first_rx) = oneshot::channel();
    let first_tx = Mutex::new(Some(first_tx));
    subscription.on_event(move |event: &E| {
        let sender = first_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(event.clone());
        }
    });

    subscription.start(registry);
    let outcome = tokio::time::timeout(timeout, first_rx).await;
    subscription.stop();

    match outcome {
        Ok(Ok(event)) => {
            debug!(
                event = events::QUERY_RESOLVED,
                component = COMPONENT,
                label = subscription.label(),
                event_id = event.id(),
                "fetch_one resolved"
            );
            Some(event)
        }
        _ => {
            debug!(
                event = events::QUERY_TIMEOUT,
                component = COMPONENT,
                label = subscription.label(),
                timeout_ms = timeout.as_millis() as u64,
                "fetch_one timed out without an event"
            );
            None
        }
    }
}

/// Collects every forwarded event until the merged terminal signal.
pub(crate) async fn fetch_all<E: RelayEvent, F: RelayFilter>(
    subscription: MergedSubscription<E, F>,
    registry: Arc<EndpointRegistry<E, F>>,
) -> Vec<E> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    subscription.on_event(move |event: &E| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    });

    let (terminal_tx, terminal_rx) = oneshot::channel();
    let terminal_tx = Mutex::new(Some(terminal_tx));
    subscription.on_terminal(move || {
        let sender = terminal_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    });

    subscription.start(registry);
    // The terminal timeout guarantees the signal fires.
    let _ = terminal_rx.await;
    subscription.stop();

    let fetched = std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
    debug!(
        event = events::QUERY_RESOLVED,
        component = COMPONENT,
        label = subscription.label(),
        fetched = fetched.len(),
        "fetch_all resolved"
    );
    fetched
}
