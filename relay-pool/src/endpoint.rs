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

//! Capabilities the pool consumes from the transport layer.
//!
//! The wire protocol, framing and socket-level reconnection belong to the
//! implementations of these traits. The pool only drives their lifecycle.

use crate::config::ConnectTimeouts;
use crate::error::PoolError;
use async_trait::async_trait;
use std::sync::Arc;

/// An event carried by a relay. Only its identity is inspected.
pub trait RelayEvent: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// Filter values are forwarded to endpoints untouched.
pub trait RelayFilter: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> RelayFilter for T {}

/// Callbacks an endpoint drives for one of its subscriptions.
pub trait SubscriptionSink<E>: Send + Sync {
    fn on_event(&self, event: E);

    /// Stored backlog delivered ("caught up"). The subscription stays open.
    fn on_terminal(&self);

    /// The endpoint closed the subscription.
    fn on_close(&self, reason: &str);
}

/// Handle to one subscription opened on one endpoint.
pub trait EndpointSubscription<F>: Send + Sync {
    /// Replaces the subscription filters and re-issues the request.
    fn refire(&self, filters: Vec<F>);

    fn close(&self);
}

/// One remote relay connection.
#[async_trait]
pub trait Endpoint<E, F>: Send + Sync
where
    E: RelayEvent,
    F: RelayFilter,
{
    /// Canonical address, the registry key.
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Connects, or reconnects a closed connection. A no-op when already open.
    ///
    /// The pool never overlaps two calls on one endpoint: concurrent users wait on
    /// the attempt already in flight.
    async fn connect(&self) -> Result<(), PoolError>;

    async fn subscribe(
        &self,
        filters: Vec<F>,
        sink: Arc<dyn SubscriptionSink<E>>,
    ) -> Result<Box<dyn EndpointSubscription<F>>, PoolError>;

    /// Resolves with the relay's acceptance message, or fails with its rejection.
    async fn publish(&self, event: E) -> Result<String, PoolError>;

    /// Closes the connection without waiting. Closing twice is harmless.
    fn close(&self);
}

/// Builds endpoints for addresses the pool has not seen yet.
pub trait EndpointConnector<E, F>: Send + Sync
where
    E: RelayEvent,
    F: RelayFilter,
{
    /// Registry key for `address`. Canonicalization rules belong to the transport.
    fn canonical_address(&self, address: &str) -> String {
        address.to_string()
    }

    fn create(&self, address: &str, timeouts: ConnectTimeouts) -> Arc<dyn Endpoint<E, F>>;
}
