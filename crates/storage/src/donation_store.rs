use chrono::{DateTime, Utc};
use donation_watch_domain::model::{
    Donation, DonationId, DonationStatus, NewDonation, Network, StatusUpdate,
};
use donation_watch_domain::storage::{CreateOutcome, DonationStore, StorageError, StorageResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, NotSet, QueryFilter, QueryOrder, Set,
};

use crate::entity::donations::{self, DonationStatusDb};
use crate::SeaOrmStorage;

impl From<DonationStatus> for DonationStatusDb {
    fn from(status: DonationStatus) -> Self {
        match status {
            DonationStatus::Pending => Self::Pending,
            DonationStatus::Completed => Self::Completed,
            DonationStatus::Failed => Self::Failed,
            DonationStatus::Refunded => Self::Refunded,
        }
    }
}

impl From<DonationStatusDb> for DonationStatus {
    fn from(status: DonationStatusDb) -> Self {
        match status {
            DonationStatusDb::Pending => Self::Pending,
            DonationStatusDb::Completed => Self::Completed,
            DonationStatusDb::Failed => Self::Failed,
            DonationStatusDb::Refunded => Self::Refunded,
        }
    }
}

fn stored_confirmations(confirmations: u32) -> i32 {
    i32::try_from(confirmations).unwrap_or(i32::MAX)
}

impl SeaOrmStorage {
    async fn find_model_by_hash(
        &self,
        network: Network,
        tx_hash: &str,
    ) -> StorageResult<Option<donations::Model>> {
        donations::Entity::find()
            .filter(donations::Column::Network.eq(network.to_string()))
            .filter(donations::Column::TxHash.eq(network.canonical_hash(tx_hash)))
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)
    }

    async fn existing(&self, key: Option<(Network, &str)>) -> StorageResult<Option<CreateOutcome>> {
        let Some((network, hash)) = key else {
            return Ok(None);
        };
        let maybe = self.find_model_by_hash(network, hash).await?;
        Ok(maybe.map(|model| CreateOutcome::Existing(DonationId(i64::from(model.id)))))
    }
}

#[async_trait::async_trait]
impl DonationStore for SeaOrmStorage {
    async fn create(&self, donation: NewDonation) -> StorageResult<CreateOutcome> {
        let tx_hash = match (donation.network, donation.tx_hash.as_deref()) {
            (Some(network), Some(hash)) => Some(network.canonical_hash(hash)),
            (None, hash) => hash.map(str::to_string),
            (Some(_), None) => None,
        };
        let dedup_key = donation.network.zip(tx_hash.as_deref());
        if let Some(outcome) = self.existing(dedup_key).await? {
            return Ok(outcome);
        }

        let metadata = donation
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(StorageError::from_source)?;
        let model = donations::ActiveModel {
            id: NotSet,
            amount: Set(donation.amount),
            amount_usd: Set(donation.amount_usd),
            currency: Set(donation.currency),
            network: Set(donation.network.map(|network| network.to_string())),
            status: Set(donation.status.into()),
            tx_hash: Set(tx_hash.clone()),
            confirmations: Set(stored_confirmations(donation.confirmations)),
            metadata: Set(metadata),
            created_at: Set(donation.created_at),
            updated_at: Set(donation.created_at),
        };

        match donations::Entity::insert(model).exec(self.connection()).await {
            Ok(inserted) => Ok(CreateOutcome::Inserted(DonationId(i64::from(
                inserted.last_insert_id,
            )))),
            Err(err) => {
                // Lost a race on the unique (network, tx_hash) index.
                if let Some(outcome) = self.existing(dedup_key).await? {
                    return Ok(outcome);
                }
                Err(StorageError::from_source(err))
            }
        }
    }

    async fn find_by_tx_hash(
        &self,
        network: Network,
        tx_hash: &str,
    ) -> StorageResult<Option<Donation>> {
        self.find_model_by_hash(network, tx_hash)
            .await?
            .map(donation_to_record)
            .transpose()
    }

    async fn update_status(&self, update: StatusUpdate) -> StorageResult<()> {
        let row_id = i32::try_from(update.id.0).map_err(|_| StorageError::MissingRecord(update.id.0))?;
        let model = donations::Entity::find_by_id(row_id)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .ok_or(StorageError::MissingRecord(update.id.0))?;

        let network = model.network.as_deref().and_then(|raw| raw.parse::<Network>().ok());
        let mut active: donations::ActiveModel = model.into();
        active.status = Set(update.status.into());
        if let Some(tx_hash) = update.tx_hash {
            let tx_hash = match network {
                Some(network) => network.canonical_hash(&tx_hash),
                None => tx_hash,
            };
            active.tx_hash = Set(Some(tx_hash));
        }
        if let Some(confirmations) = update.confirmations {
            active.confirmations = Set(stored_confirmations(confirmations));
        }
        active.updated_at = Set(Utc::now());
        active
            .update(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn find_pending(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<Donation>> {
        let mut query = donations::Entity::find()
            .filter(donations::Column::Status.eq(DonationStatusDb::Pending));
        if let Some(cutoff) = older_than {
            query = query.filter(donations::Column::CreatedAt.lt(cutoff));
        }
        query
            .order_by_asc(donations::Column::CreatedAt)
            .order_by_asc(donations::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(donation_to_record)
            .collect()
    }

    async fn find_donation(&self, id: DonationId) -> StorageResult<Option<Donation>> {
        let Ok(row_id) = i32::try_from(id.0) else {
            return Ok(None);
        };
        let maybe = donations::Entity::find_by_id(row_id)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(donation_to_record).transpose()
    }
}

fn donation_to_record(model: donations::Model) -> StorageResult<Donation> {
    let network = model
        .network
        .as_deref()
        .map(|raw| {
            raw.parse::<Network>().map_err(|_| {
                StorageError::Database(format!("donation {} has unknown network `{raw}`", model.id))
            })
        })
        .transpose()?;
    let metadata = model
        .metadata
        .map(serde_json::from_value)
        .transpose()
        .map_err(StorageError::from_source)?;

    Ok(Donation {
        id: DonationId(i64::from(model.id)),
        amount: model.amount,
        amount_usd: model.amount_usd,
        currency: model.currency,
        network,
        status: model.status.into(),
        tx_hash: model.tx_hash,
        confirmations: u32::try_from(model.confirmations).unwrap_or(0),
        metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}
