use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use donation_watch_domain::{InMemoryProcessedSet, Network, ProcessedSet};

/// Outcome of one `check_for_new_donations` pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub skipped: usize,
    pub failed_networks: Vec<Network>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoringStatus {
    pub running: bool,
    pub interval_minutes: Option<u64>,
    pub last_checked: BTreeMap<Network, DateTime<Utc>>,
    pub processed_count: usize,
    pub last_cycle: Option<CycleReport>,
}

/// Mutable state owned by one monitor: which transactions were turned into
/// donations and, per network, the instant below which nothing is rescanned.
pub struct MonitorState {
    processed: Arc<dyn ProcessedSet>,
    watermarks: Mutex<HashMap<Network, DateTime<Utc>>>,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::with_processed_set(Arc::new(InMemoryProcessedSet::new()))
    }
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processed_set(processed: Arc<dyn ProcessedSet>) -> Self {
        Self {
            processed,
            watermarks: Mutex::new(HashMap::new()),
            last_cycle: Mutex::new(None),
        }
    }

    pub fn processed(&self) -> &dyn ProcessedSet {
        self.processed.as_ref()
    }

    /// `None` until the network's first successful check.
    pub fn watermark(&self, network: Network) -> Option<DateTime<Utc>> {
        self.watermarks
            .lock()
            .expect("mutex poisoned")
            .get(&network)
            .copied()
    }

    /// Moves the watermark forward; older instants are ignored.
    pub fn advance_watermark(&self, network: Network, at: DateTime<Utc>) {
        let mut guard = self.watermarks.lock().expect("mutex poisoned");
        let entry = guard.entry(network).or_insert(at);
        if *entry < at {
            *entry = at;
        }
    }

    pub fn watermarks(&self) -> BTreeMap<Network, DateTime<Utc>> {
        self.watermarks
            .lock()
            .expect("mutex poisoned")
            .iter()
            .map(|(network, at)| (*network, *at))
            .collect()
    }

    pub fn record_cycle(&self, report: CycleReport) {
        *self.last_cycle.lock().expect("mutex poisoned") = Some(report);
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.lock().expect("mutex poisoned").clone()
    }

    /// Forgets every watermark and the last cycle. Processed claims are kept
    /// so a reset never re-records a donation.
    pub fn reset_watermarks(&self) {
        self.watermarks.lock().expect("mutex poisoned").clear();
        *self.last_cycle.lock().expect("mutex poisoned") = None;
    }
}
