//! Per-subscription duplicate suppression.
//!
//! Evaluation order for every `(id, address)` pair:
//! 1. record the sighting in the pool-wide [`SeenTracker`], unconditionally;
//! 2. the caller's `already_have_event` predicate, if any, short-circuits;
//! 3. the subscription's own delivered set.

use crate::routing::seen_tracker::SeenTracker;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Caller-supplied "already known" check over `(event id, endpoint address)`.
pub type AlreadyHaveEvent = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub(crate) struct DeliveryFilter {
    seen: Arc<SeenTracker>,
    already_have_event: Option<AlreadyHaveEvent>,
    delivered: Mutex<HashSet<String>>,
}

impl DeliveryFilter {
    pub(crate) fn new(seen: Arc<SeenTracker>, already_have_event: Option<AlreadyHaveEvent>) -> Self {
        Self {
            seen,
            already_have_event,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` when the event must be forwarded, marking it delivered.
    ///
    /// The delivered-set check and insert happen under one lock so two endpoints
    /// racing on the same identity forward it once.
    pub(crate) fn admit(&self, id: &str, address: &str) -> bool {
        self.seen.record_sighting(id, address);

        if let Some(already_have_event) = &self.already_have_event {
            if already_have_event(id, address) {
                return false;
            }
        }

        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }
}
