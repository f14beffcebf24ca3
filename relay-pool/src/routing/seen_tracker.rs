//! Pool-wide record of which endpoints delivered each event identity.
//!
//! Entries are never pruned; the map grows with the number of distinct
//! identities observed during the pool's lifetime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub(crate) struct SeenTracker {
    sightings: Mutex<HashMap<String, Vec<String>>>,
}

impl SeenTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn sightings(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.sightings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_sighting(&self, id: &str, address: &str) {
        let mut sightings = self.sightings();
        let addresses = sightings.entry(id.to_string()).or_default();
        if !addresses.iter().any(|known| known == address) {
            addresses.push(address.to_string());
        }
    }

    /// Addresses that delivered `id`, in first-sighting order. Empty when never seen.
    pub(crate) fn provenance(&self, id: &str) -> Vec<String> {
        self.sightings().get(id).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sightings().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
