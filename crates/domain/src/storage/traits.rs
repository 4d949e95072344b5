use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Donation, DonationId, Network, NewDonation, StatusUpdate};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("donation {0} does not exist")]
    MissingRecord(i64),
}

/// Result of [`DonationStore::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Inserted(DonationId),
    /// A row with the same `(network, tx_hash)` already existed.
    Existing(DonationId),
}

impl CreateOutcome {
    pub fn id(self) -> DonationId {
        match self {
            CreateOutcome::Inserted(id) | CreateOutcome::Existing(id) => id,
        }
    }

    pub fn is_inserted(self) -> bool {
        matches!(self, CreateOutcome::Inserted(_))
    }
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Persistence boundary for donation records. Implementations own deletion;
/// the engine only creates and transitions records.
#[async_trait]
pub trait DonationStore: Send + Sync {
    /// Inserts a donation. When `tx_hash` is present the call is idempotent
    /// on `(network, canonical tx_hash)` and reports the existing row instead.
    async fn create(&self, donation: NewDonation) -> StorageResult<CreateOutcome>;

    /// Hashes are compared in their canonical spelling
    /// (see [`Network::canonical_hash`]).
    async fn find_by_tx_hash(
        &self,
        network: Network,
        tx_hash: &str,
    ) -> StorageResult<Option<Donation>>;

    async fn update_status(&self, update: StatusUpdate) -> StorageResult<()>;

    /// Pending donations, optionally limited to those created before
    /// `older_than`, oldest first.
    async fn find_pending(&self, older_than: Option<DateTime<Utc>>)
        -> StorageResult<Vec<Donation>>;

    async fn find_donation(&self, id: DonationId) -> StorageResult<Option<Donation>>;
}
