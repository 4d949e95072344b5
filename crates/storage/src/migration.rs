use sea_orm::sea_query::{ColumnDef, Expr, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseConnection};

use crate::entity::donations;
use donation_watch_domain::storage::{StorageError, StorageResult};

/// Unique on `(network, tx_hash)`. Rows without a hash (card, bank and
/// unsubmitted crypto intents) never collide because NULLs are distinct.
pub const TX_HASH_INDEX: &str = "idx_donations_network_tx_hash";

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let donations_table = Table::create()
        .if_not_exists()
        .table(donations::Entity)
        .col(
            ColumnDef::new(donations::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(donations::Column::Amount).double().not_null())
        .col(
            ColumnDef::new(donations::Column::AmountUsd)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(donations::Column::Currency)
                .string_len(16)
                .not_null(),
        )
        .col(ColumnDef::new(donations::Column::Network).string_len(16).null())
        .col(
            ColumnDef::new(donations::Column::Status)
                .string_len(16)
                .not_null(),
        )
        .col(ColumnDef::new(donations::Column::TxHash).string_len(128).null())
        .col(
            ColumnDef::new(donations::Column::Confirmations)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(donations::Column::Metadata).json().null())
        .col(
            ColumnDef::new(donations::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(donations::Column::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_owned();
    db.execute(backend.build(&donations_table))
        .await
        .map_err(StorageError::from_source)?;

    let tx_hash_index = Index::create()
        .if_not_exists()
        .name(TX_HASH_INDEX)
        .table(donations::Entity)
        .col(donations::Column::Network)
        .col(donations::Column::TxHash)
        .unique()
        .to_owned();
    db.execute(backend.build(&tx_hash_index))
        .await
        .map_err(StorageError::from_source)?;

    let status_index = Index::create()
        .if_not_exists()
        .name("idx_donations_status_created_at")
        .table(donations::Entity)
        .col(donations::Column::Status)
        .col(donations::Column::CreatedAt)
        .to_owned();
    db.execute(backend.build(&status_index))
        .await
        .map_err(StorageError::from_source)?;

    Ok(())
}
