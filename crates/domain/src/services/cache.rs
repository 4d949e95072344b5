use std::{collections::HashSet, sync::Mutex};

use crate::model::Network;

/// Set of transactions the monitor has already turned into donations, keyed
/// by `(network, hash)`.
pub trait ProcessedSet: Send + Sync {
    /// Inserts the key if absent. Returns `false` when another caller got
    /// there first.
    fn try_claim(&self, network: Network, hash: &str) -> bool;

    /// Drops a claim so a later cycle may retry the transaction.
    fn release(&self, network: Network, hash: &str);

    fn contains(&self, network: Network, hash: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProcessedSet {
    entries: Mutex<HashSet<(Network, String)>>,
}

impl InMemoryProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every entry. Used to reset monitor state between runs.
    pub fn clear(&self) {
        self.entries.lock().expect("mutex poisoned").clear();
    }
}

impl ProcessedSet for InMemoryProcessedSet {
    fn try_claim(&self, network: Network, hash: &str) -> bool {
        let mut guard = self.entries.lock().expect("mutex poisoned");
        guard.insert((network, network.canonical_hash(hash)))
    }

    fn release(&self, network: Network, hash: &str) {
        let mut guard = self.entries.lock().expect("mutex poisoned");
        guard.remove(&(network, network.canonical_hash(hash)));
    }

    fn contains(&self, network: Network, hash: &str) -> bool {
        let guard = self.entries.lock().expect("mutex poisoned");
        guard.contains(&(network, network.canonical_hash(hash)))
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("mutex poisoned").len()
    }
}
