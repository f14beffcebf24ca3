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

//! # relay-pool
//!
//! `relay-pool` talks to many independent relay endpoints at once and presents
//! a single logical subscription, a single logical publish and a single
//! logical point query. Connection reuse, duplicate suppression and
//! "every endpoint caught up" detection are handled internally.
//!
//! The transport itself is supplied by the caller through [`Endpoint`] and
//! [`EndpointConnector`].
//!
//! ## Querying
//!
//! ```
//! use std::sync::Arc;
//! use integration_test_utils::{RelayScript, ScriptedConnector, TestEvent};
//! use relay_pool::{FetchOptions, PoolConfig, RelayPool};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let connector = ScriptedConnector::new()
//!     .relay(
//!         "wss://a.example",
//!         RelayScript::accepting().with_events(vec![TestEvent::new("e1", "hello")]),
//!     )
//!     .relay(
//!         "wss://b.example",
//!         RelayScript::accepting().with_events(vec![TestEvent::new("e1", "hello")]),
//!     );
//! let pool = RelayPool::new("quick-start", PoolConfig::default(), Arc::new(connector));
//!
//! let relays = ["wss://a.example", "wss://b.example"];
//! let events = pool
//!     .fetch_all(&relays, vec!["kind:1".to_string()], FetchOptions::new())
//!     .await;
//!
//! // Both relays delivered `e1`; the merged stream forwards it once.
//! assert_eq!(events.len(), 1);
//! assert_eq!(pool.provenance("e1").len(), 2);
//! # });
//! ```
//!
//! ## Subscribing
//!
//! ```
//! use std::sync::Arc;
//! use integration_test_utils::{ScriptedConnector, TestEvent};
//! use relay_pool::{PoolConfig, RelayPool, SubscribeOptions};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pool: RelayPool<TestEvent, String> =
//!     RelayPool::new("live", PoolConfig::default(), Arc::new(ScriptedConnector::new()));
//!
//! let subscription = pool.subscribe(
//!     &["wss://a.example"],
//!     vec!["kind:1".to_string()],
//!     SubscribeOptions::new()
//!         .on_event(|event: &TestEvent| println!("event {}", event.id))
//!         .on_terminal(|| println!("caught up")),
//! );
//!
//! subscription.stop();
//! # });
//! ```
//!
//! ## Internal architecture map
//!
//! - API facade: [`RelayPool`] and the caller handles it returns
//! - Control plane: endpoint registry (lazy connect, reuse, reconnect)
//! - Routing: pool-wide provenance and per-subscription dedupe policy
//! - Data plane: merged subscription engine, publish fan-out, listener registries
//! - Query: `fetch_one` / `fetch_all` built on the merged subscription
//! - Runtime: per-endpoint task spawning and deadline timers
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events and never installs a global
//! subscriber. Binaries and tests initialise `tracing_subscriber` themselves.

mod config;
pub use config::{ConnectTimeouts, PoolConfig, DEFAULT_EOSE_TIMEOUT, DEFAULT_GET_TIMEOUT};

mod endpoint;
pub use endpoint::{
    Endpoint, EndpointConnector, EndpointSubscription, RelayEvent, RelayFilter, SubscriptionSink,
};

mod error;
pub use error::PoolError;

mod options;
pub use options::{CloseCallback, EventCallback, FetchOptions, SubscribeOptions, TerminalCallback};

pub use data_plane::fanout_subscription::{EndpointClose, MergedSubscription};
pub use data_plane::listeners::ListenerToken;
pub use data_plane::publish_fanout::{PublishAck, PublishHandle, PublishOutcome};
pub use routing::dedupe::AlreadyHaveEvent;

#[doc(hidden)]
pub mod observability;

mod control_plane;
mod data_plane;
mod query;
mod routing;
mod runtime;

mod pool;
pub use pool::RelayPool;
