//! Publish fan-out with per-endpoint acknowledgement routing.

use crate::control_plane::endpoint_registry::EndpointRegistry;
use crate::data_plane::listeners::{ListenerRegistry, ListenerToken};
use crate::endpoint::{RelayEvent, RelayFilter};
use crate::error::PoolError;
use crate::observability::events;
use crate::runtime::endpoint_tasks::spawn_per_endpoint;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const COMPONENT: &str = "publish_fanout";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Relay accepted the event; carries the relay's message.
    Accepted(String),
    /// Relay refused the event or the publish failed on the wire.
    Rejected(String),
}

/// Outcome of a publish on one endpoint, tagged with its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAck {
    pub address: String,
    pub outcome: PublishOutcome,
}

impl PublishAck {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, PublishOutcome::Accepted(_))
    }
}

fn rejection_reason(err: PoolError) -> String {
    match err {
        PoolError::Publish { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Acks carry their arrival sequence so a late listener can tell replayed acks
/// from live ones.
struct AckLedger {
    acks: Mutex<Vec<PublishAck>>,
    listeners: ListenerRegistry<(usize, PublishAck)>,
}

impl AckLedger {
    fn new() -> Self {
        Self {
            acks: Mutex::new(Vec::new()),
            listeners: ListenerRegistry::new(),
        }
    }

    fn acks(&self) -> MutexGuard<'_, Vec<PublishAck>> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, ack: PublishAck) {
        let sequence = {
            let mut acks = self.acks();
            acks.push(ack.clone());
            acks.len() - 1
        };
        self.listeners.notify(&(sequence, ack));
    }

    fn subscribe(&self, callback: impl Fn(&PublishAck) + Send + Sync + 'static) -> ListenerToken {
        let callback = Arc::new(callback);
        let live = callback.clone();

        let (token, replay) = {
            let acks = self.acks();
            let replayed = acks.len();
            let token = self.listeners.add(move |(sequence, ack): &(usize, PublishAck)| {
                if *sequence >= replayed {
                    live(ack);
                }
            });
            (token, acks.clone())
        };

        for ack in &replay {
            callback(ack);
        }
        token
    }
}

/// Caller handle for one publish fanned out to many endpoints.
///
/// No aggregate verdict is computed; quorum decisions belong to the caller.
/// Endpoints that could not be reached never produce an ack.
pub struct PublishHandle {
    targets: Vec<String>,
    ledger: Arc<AckLedger>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PublishHandle {
    /// Canonical addresses the publish was dispatched to.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Registers an ack listener. Acks received before registration are replayed
    /// to it first, so no ack is lost to the dispatch race.
    pub fn on_ack(&self, callback: impl Fn(&PublishAck) + Send + Sync + 'static) -> ListenerToken {
        self.ledger.subscribe(callback)
    }

    pub fn off_ack(&self, token: ListenerToken) -> bool {
        self.ledger.listeners.remove(token)
    }

    /// Acks received so far, in arrival order.
    pub fn acks(&self) -> Vec<PublishAck> {
        self.ledger.acks().clone()
    }

    /// Waits until every endpoint task has finished and returns all acks.
    pub async fn settled(&self) -> Vec<PublishAck> {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for joined in futures::future::join_all(tasks).await {
            if let Err(err) = joined {
                warn!(component = COMPONENT, err = %err, "publish task ended abnormally");
            }
        }

        self.acks()
    }
}

/// Dispatches `event` to every address concurrently. `addresses` must be canonical
/// and distinct.
pub(crate) fn publish_fanout<E: RelayEvent, F: RelayFilter>(
    registry: Arc<EndpointRegistry<E, F>>,
    addresses: Vec<String>,
    event: E,
) -> PublishHandle {
    let ledger = Arc::new(AckLedger::new());

    let task_ledger = ledger.clone();
    let tasks = spawn_per_endpoint(&addresses, move |address| {
        let registry = registry.clone();
        let ledger = task_ledger.clone();
        let event = event.clone();
        async move {
            let endpoint = match registry.ensure(&address).await {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    warn!(
                        event = events::PUBLISH_ENDPOINT_UNAVAILABLE,
                        component = COMPONENT,
                        address = %address,
                        err = %err,
                        "skipping unreachable endpoint"
                    );
                    return;
                }
            };

            let outcome = match endpoint.publish(event).await {
                Ok(message) => PublishOutcome::Accepted(message),
                Err(err) => PublishOutcome::Rejected(rejection_reason(err)),
            };
            debug!(
                event = events::PUBLISH_ACK,
                component = COMPONENT,
                address = %address,
                outcome = ?outcome,
                "publish acknowledged"
            );
            ledger.record(PublishAck { address, outcome });
        }
    });

    PublishHandle {
        targets: addresses,
        ledger,
        tasks: Mutex::new(tasks),
    }
}

#[cfg(test)]
mod tests {
    use super::{AckLedger, PublishAck, PublishOutcome};
    use std::sync::{Arc, Mutex as StdMutex};

    fn ack(address: &str, accepted: bool) -> PublishAck {
        PublishAck {
            address: address.to_string(),
            outcome: if accepted {
                PublishOutcome::Accepted(String::new())
            } else {
                PublishOutcome::Rejected("blocked: spam".to_string())
            },
        }
    }

    #[test]
    fn late_listener_gets_replay_then_live_acks_exactly_once() {
        let ledger = AckLedger::new();
        ledger.record(ack("wss://a.example", true));

        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_in_listener = received.clone();
        ledger.subscribe(move |ack| {
            received_in_listener
                .lock()
                .expect("lock received")
                .push(ack.address.clone());
        });
        ledger.record(ack("wss://b.example", false));

        assert_eq!(
            *received.lock().expect("lock received"),
            vec!["wss://a.example".to_string(), "wss://b.example".to_string()]
        );
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let ledger = AckLedger::new();
        let received = Arc::new(StdMutex::new(0));
        let received_in_listener = received.clone();

        let token = ledger.subscribe(move |_| *received_in_listener.lock().expect("lock") += 1);
        ledger.record(ack("wss://a.example", true));
        assert!(ledger.listeners.remove(token));
        ledger.record(ack("wss://b.example", true));

        assert_eq!(*received.lock().expect("lock"), 1);
        assert!(ack("wss://c.example", true).is_accepted());
        assert!(!ack("wss://c.example", false).is_accepted());
    }
}
