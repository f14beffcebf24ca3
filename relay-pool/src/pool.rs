/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::config::PoolConfig;
use crate::control_plane::endpoint_registry::EndpointRegistry;
use crate::data_plane::fanout_subscription::{FanoutSettings, FanoutSubscription, MergedSubscription};
use crate::data_plane::publish_fanout::{publish_fanout, PublishHandle};
use crate::endpoint::{Endpoint, EndpointConnector, RelayEvent, RelayFilter};
use crate::error::PoolError;
use crate::options::{FetchOptions, SubscribeOptions};
use crate::query::fetch;
use crate::routing::dedupe::AlreadyHaveEvent;
use crate::routing::seen_tracker::SeenTracker;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const RELAY_POOL_TAG: &str = "RelayPool:";
const RELAY_POOL_FN_NEW_TAG: &str = "new():";
const RELAY_POOL_FN_SUBSCRIBE_TAG: &str = "subscribe():";
const RELAY_POOL_FN_FETCH_ONE_TAG: &str = "fetch_one():";
const RELAY_POOL_FN_FETCH_ALL_TAG: &str = "fetch_all():";
const RELAY_POOL_FN_PUBLISH_TAG: &str = "publish():";
const RELAY_POOL_FN_CLOSE_TAG: &str = "close():";
const RELAY_POOL_FN_DESTROY_TAG: &str = "destroy():";

/// Coordinates many relay endpoints behind single logical operations.
///
/// The endpoint registry and the provenance tracker are owned by the pool;
/// independent pools share nothing. Every operation that contacts endpoints
/// must run inside a tokio runtime.
pub struct RelayPool<E: RelayEvent, F: RelayFilter> {
    name: String,
    config: PoolConfig,
    registry: Arc<EndpointRegistry<E, F>>,
    seen: Arc<SeenTracker>,
}

impl<E: RelayEvent, F: RelayFilter> RelayPool<E, F> {
    pub fn new(name: &str, config: PoolConfig, connector: Arc<dyn EndpointConnector<E, F>>) -> Self {
        let name = format!("{RELAY_POOL_TAG}{name}:");
        debug!(
            "{}:{}:{} RelayPool created with {:?}",
            &name, RELAY_POOL_TAG, RELAY_POOL_FN_NEW_TAG, config
        );

        Self {
            registry: Arc::new(EndpointRegistry::new(connector, config.connect_timeouts())),
            seen: Arc::new(SeenTracker::new()),
            name,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Canonical, de-duplicated targets in first-occurrence order.
    fn targets<S: AsRef<str>>(&self, addresses: &[S]) -> Vec<String> {
        let mut unique = HashSet::new();
        addresses
            .iter()
            .map(|address| self.registry.canonical_address(address.as_ref()))
            .filter(|address| unique.insert(address.clone()))
            .collect()
    }

    fn idle_subscription<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filters: Vec<F>,
        label: Option<String>,
        eose_timeout: Option<Duration>,
        already_have_event: Option<AlreadyHaveEvent>,
        stop_on_terminal: bool,
    ) -> MergedSubscription<E, F> {
        let settings = FanoutSettings {
            label: label.unwrap_or_else(|| Uuid::new_v4().to_string()),
            eose_timeout: eose_timeout.unwrap_or(self.config.eose_timeout()),
            already_have_event,
            stop_on_terminal,
        };
        MergedSubscription::new(FanoutSubscription::new(
            self.targets(addresses),
            filters,
            settings,
            self.seen.clone(),
        ))
    }

    fn open<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filters: Vec<F>,
        opts: SubscribeOptions<E>,
        stop_on_terminal: bool,
    ) -> MergedSubscription<E, F> {
        let SubscribeOptions {
            already_have_event,
            eose_timeout,
            label,
            on_event,
            on_terminal,
            on_close,
        } = opts;

        let subscription = self.idle_subscription(
            addresses,
            filters,
            label,
            eose_timeout,
            already_have_event,
            stop_on_terminal,
        );
        debug!(
            "{}:{}:{} opening {} on {:?}",
            self.name,
            RELAY_POOL_TAG,
            RELAY_POOL_FN_SUBSCRIBE_TAG,
            subscription.label(),
            subscription.addresses()
        );

        if let Some(on_event) = on_event {
            subscription.on_event(move |event| on_event(event));
        }
        if let Some(on_terminal) = on_terminal {
            subscription.on_terminal(move || on_terminal());
        }
        if let Some(on_close) = on_close {
            subscription.on_close(move |closes| on_close(closes));
        }

        subscription.start(self.registry.clone());
        subscription
    }

    /// Opens one merged subscription over every address.
    pub fn subscribe<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filters: Vec<F>,
        opts: SubscribeOptions<E>,
    ) -> MergedSubscription<E, F> {
        self.open(addresses, filters, opts, false)
    }

    /// Like [`Self::subscribe`], but stops itself once the merged terminal signal fires.
    pub fn subscribe_until_terminal<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filters: Vec<F>,
        opts: SubscribeOptions<E>,
    ) -> MergedSubscription<E, F> {
        self.open(addresses, filters, opts, true)
    }

    /// First matching event from any address, or `None` after the get timeout.
    pub async fn fetch_one<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filter: F,
        opts: FetchOptions,
    ) -> Option<E> {
        let timeout = opts.timeout.unwrap_or(self.config.get_timeout());
        let subscription = self.idle_subscription(
            addresses,
            vec![filter],
            opts.label,
            opts.max_wait,
            opts.already_have_event,
            false,
        );
        debug!(
            "{}:{}:{} {} waiting up to {:?}",
            self.name,
            RELAY_POOL_TAG,
            RELAY_POOL_FN_FETCH_ONE_TAG,
            subscription.label(),
            timeout
        );

        fetch::fetch_one(subscription, self.registry.clone(), timeout).await
    }

    /// Every distinct matching event delivered before the merged terminal signal,
    /// in arrival order.
    pub async fn fetch_all<S: AsRef<str>>(
        &self,
        addresses: &[S],
        filters: Vec<F>,
        opts: FetchOptions,
    ) -> Vec<E> {
        let subscription = self.idle_subscription(
            addresses,
            filters,
            opts.label,
            opts.max_wait,
            opts.already_have_event,
            false,
        );
        debug!(
            "{}:{}:{} {} collecting from {:?}",
            self.name,
            RELAY_POOL_TAG,
            RELAY_POOL_FN_FETCH_ALL_TAG,
            subscription.label(),
            subscription.addresses()
        );

        fetch::fetch_all(subscription, self.registry.clone()).await
    }

    /// Publishes `event` to every reachable address. Acks are tagged with their address.
    pub fn publish<S: AsRef<str>>(&self, addresses: &[S], event: E) -> PublishHandle {
        let targets = self.targets(addresses);
        debug!(
            "{}:{}:{} publishing {} to {:?}",
            self.name,
            RELAY_POOL_TAG,
            RELAY_POOL_FN_PUBLISH_TAG,
            event.id(),
            targets
        );

        publish_fanout(self.registry.clone(), targets, event)
    }

    /// Addresses known to have delivered `id`. Grows monotonically.
    pub fn provenance(&self, id: &str) -> Vec<String> {
        self.seen.provenance(id)
    }

    /// Connected endpoint for `address`, connecting it when needed.
    pub async fn ensure_endpoint(&self, address: &str) -> Result<Arc<dyn Endpoint<E, F>>, PoolError> {
        self.registry.ensure(address).await
    }

    /// Closes the connections to `addresses` without waiting. Unknown addresses are ignored.
    pub fn close<S: AsRef<str>>(&self, addresses: &[S]) {
        debug!(
            "{}:{}:{} closing {} endpoint(s)",
            self.name,
            RELAY_POOL_TAG,
            RELAY_POOL_FN_CLOSE_TAG,
            addresses.len()
        );
        self.registry.close(addresses);
    }

    /// Closes every connection and forgets it.
    pub fn destroy(&self) {
        debug!(
            "{}:{}:{} closing every endpoint",
            self.name, RELAY_POOL_TAG, RELAY_POOL_FN_DESTROY_TAG
        );
        self.registry.close_all();
    }

    /// `(address, connected)` for every endpoint the pool has created, sorted by address.
    pub fn connection_status(&self) -> Vec<(String, bool)> {
        self.registry.connection_status()
    }
}
