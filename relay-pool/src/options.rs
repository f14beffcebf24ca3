//! Per-call options for subscriptions and queries.

use crate::data_plane::fanout_subscription::EndpointClose;
use crate::routing::dedupe::AlreadyHaveEvent;
use std::sync::Arc;
use std::time::Duration;

pub type EventCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;
pub type TerminalCallback = Arc<dyn Fn() + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&[EndpointClose]) + Send + Sync>;

/// Options for [`crate::RelayPool::subscribe`].
///
/// Callbacks given here are registered before any endpoint is contacted, so
/// they observe every event. Listeners added later through the returned
/// handle may miss events delivered in between.
pub struct SubscribeOptions<E> {
    pub already_have_event: Option<AlreadyHaveEvent>,
    /// Overrides the pool's terminal timeout for this subscription.
    pub eose_timeout: Option<Duration>,
    /// Log correlation label; a UUID is generated when absent.
    pub label: Option<String>,
    pub on_event: Option<EventCallback<E>>,
    pub on_terminal: Option<TerminalCallback>,
    pub on_close: Option<CloseCallback>,
}

impl<E> Default for SubscribeOptions<E> {
    fn default() -> Self {
        Self {
            already_have_event: None,
            eose_timeout: None,
            label: None,
            on_event: None,
            on_terminal: None,
            on_close: None,
        }
    }
}

impl<E> SubscribeOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_have_event(
        mut self,
        predicate: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.already_have_event = Some(Arc::new(predicate));
        self
    }

    pub fn eose_timeout(mut self, timeout: Duration) -> Self {
        self.eose_timeout = Some(timeout);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn on_event(mut self, callback: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn on_terminal(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_terminal = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn(&[EndpointClose]) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }
}

/// Options for [`crate::RelayPool::fetch_one`] and [`crate::RelayPool::fetch_all`].
#[derive(Clone, Default)]
pub struct FetchOptions {
    pub already_have_event: Option<AlreadyHaveEvent>,
    /// Overrides the pool's `get_timeout` for `fetch_one`.
    pub timeout: Option<Duration>,
    /// Overrides the pool's terminal timeout for `fetch_all`.
    pub max_wait: Option<Duration>,
    pub label: Option<String>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_have_event(
        mut self,
        predicate: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.already_have_event = Some(Arc::new(predicate));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
