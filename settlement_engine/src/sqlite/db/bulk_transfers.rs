use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{
        BulkProcessingState,
        BulkTransfer,
        BulkTransferAssociation,
        BulkTransferExtension,
        BulkTransferFulfilment,
        BulkTransferId,
        BulkTransferState,
        Extension,
        IndividualTransferFulfil,
        StagedIndividualFulfil,
        TransferId,
    },
    traits::StoreError,
};

/// Creates the bulk transfer record if it does not exist yet. Returns true if a record was created.
pub async fn insert_bulk_transfer_if_absent(
    bulk_transfer_id: &BulkTransferId,
    payer_fsp: &str,
    payee_fsp: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
            INSERT INTO bulk_transfer (bulk_transfer_id, payer_fsp, payee_fsp, bulk_transfer_state, created_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bulk_transfer_id) DO NOTHING
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .bind(payer_fsp)
    .bind(payee_fsp)
    .bind(BulkTransferState::Received)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch_bulk_transfer(
    bulk_transfer_id: &BulkTransferId,
    conn: &mut SqliteConnection,
) -> Result<Option<BulkTransfer>, StoreError> {
    let bulk = sqlx::query_as("SELECT * FROM bulk_transfer WHERE bulk_transfer_id = $1")
        .bind(bulk_transfer_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(bulk)
}

/// Sets the bulk state and appends the corresponding state change record.
pub async fn update_bulk_state(
    bulk_transfer_id: &BulkTransferId,
    state: BulkTransferState,
    reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE bulk_transfer SET bulk_transfer_state = $1 WHERE bulk_transfer_id = $2")
        .bind(state)
        .bind(bulk_transfer_id.as_str())
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::BulkTransferNotFound(bulk_transfer_id.clone()));
    }
    sqlx::query(
        r#"
            INSERT INTO bulk_transfer_state_change (bulk_transfer_id, bulk_transfer_state, reason, created_date)
            VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .bind(state)
    .bind(reason)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    trace!("🗃️ Bulk transfer {bulk_transfer_id} -> {state}");
    Ok(())
}

/// Inserts the fulfilment record for a bulk transfer. Returns `None` if one was already recorded.
pub async fn insert_bulk_fulfilment_if_absent(
    bulk_transfer_id: &BulkTransferId,
    completed_date: Option<DateTime<Utc>>,
    reasons: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, StoreError> {
    let id = sqlx::query_scalar(
        r#"
            INSERT INTO bulk_transfer_fulfilment (bulk_transfer_id, completed_date, reasons, created_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (bulk_transfer_id) DO NOTHING
            RETURNING bulk_transfer_fulfilment_id;
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .bind(completed_date)
    .bind(reasons)
    .bind(Utc::now())
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

pub async fn fetch_bulk_fulfilment(
    bulk_transfer_id: &BulkTransferId,
    conn: &mut SqliteConnection,
) -> Result<Option<BulkTransferFulfilment>, StoreError> {
    let fulfilment = sqlx::query_as("SELECT * FROM bulk_transfer_fulfilment WHERE bulk_transfer_id = $1")
        .bind(bulk_transfer_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(fulfilment)
}

pub async fn mark_processing_complete(
    bulk_transfer_id: &BulkTransferId,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
            UPDATE bulk_transfer_fulfilment SET processing_completed_date = $1
            WHERE bulk_transfer_id = $2 AND processing_completed_date IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(bulk_transfer_id.as_str())
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        debug!("🗃️ Bulk fulfilment {bulk_transfer_id} was already marked complete, or does not exist");
    }
    Ok(())
}

pub async fn insert_extension(
    bulk_transfer_id: &BulkTransferId,
    bulk_transfer_fulfilment_id: i64,
    extension: &Extension,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
            INSERT INTO bulk_transfer_extension (bulk_transfer_id, bulk_transfer_fulfilment_id, key, value,
                                                 created_date)
            VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .bind(bulk_transfer_fulfilment_id)
    .bind(&extension.key)
    .bind(&extension.value)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_extensions(
    bulk_transfer_id: &BulkTransferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<BulkTransferExtension>, StoreError> {
    let extensions = sqlx::query_as(
        "SELECT * FROM bulk_transfer_extension WHERE bulk_transfer_id = $1 ORDER BY bulk_transfer_extension_id",
    )
    .bind(bulk_transfer_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(extensions)
}

pub async fn upsert_association(
    transfer_id: &TransferId,
    bulk_transfer_id: &BulkTransferId,
    state: BulkProcessingState,
    conn: &mut SqliteConnection,
) -> Result<BulkTransferAssociation, StoreError> {
    let now = Utc::now();
    let association = sqlx::query_as(
        r#"
            INSERT INTO bulk_transfer_association (transfer_id, bulk_transfer_id, bulk_processing_state, created_date,
                                                   last_processed_date)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (transfer_id, bulk_transfer_id) DO UPDATE SET
                bulk_processing_state = excluded.bulk_processing_state,
                last_processed_date = excluded.last_processed_date
            RETURNING *;
        "#,
    )
    .bind(transfer_id.as_str())
    .bind(bulk_transfer_id.as_str())
    .bind(state)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => {
            StoreError::BulkTransferNotFound(bulk_transfer_id.clone())
        },
        _ => StoreError::from(e),
    })?;
    Ok(association)
}

pub async fn fetch_associations(
    bulk_transfer_id: &BulkTransferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<BulkTransferAssociation>, StoreError> {
    let associations = sqlx::query_as(
        r#"
            SELECT * FROM bulk_transfer_association WHERE bulk_transfer_id = $1
            ORDER BY bulk_transfer_association_id
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(associations)
}

/// Stages one individual fulfilment document. Returns false if it was already staged for this message.
pub async fn stage_individual(
    message_id: &str,
    bulk_transfer_id: &BulkTransferId,
    individual: &IndividualTransferFulfil,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let payload = serde_json::to_string(individual)?;
    let result = sqlx::query(
        r#"
            INSERT INTO individual_transfer_fulfil (message_id, bulk_transfer_id, transfer_id, payload, created_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (message_id, transfer_id) DO NOTHING
        "#,
    )
    .bind(message_id)
    .bind(bulk_transfer_id.as_str())
    .bind(individual.transfer_id.as_str())
    .bind(payload)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Fetches the next page of staged documents for `message_id`, in staging order, starting after `after_id`.
pub async fn fetch_staged_page(
    message_id: &str,
    after_id: i64,
    page_size: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StagedIndividualFulfil>, StoreError> {
    let page = sqlx::query_as(
        r#"
            SELECT individual_transfer_fulfil_id, message_id, bulk_transfer_id, transfer_id, payload
            FROM individual_transfer_fulfil
            WHERE message_id = $1 AND individual_transfer_fulfil_id > $2
            ORDER BY individual_transfer_fulfil_id ASC
            LIMIT $3
        "#,
    )
    .bind(message_id)
    .bind(after_id)
    .bind(page_size)
    .fetch_all(conn)
    .await?;
    Ok(page)
}

/// Deletes the staged documents of a bulk. Returns the number of rows removed.
pub async fn delete_staged(bulk_transfer_id: &BulkTransferId, conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM individual_transfer_fulfil WHERE bulk_transfer_id = $1")
        .bind(bulk_transfer_id.as_str())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Claims the processing of a bulk fulfilment for `message_id`, unless another message holds the claim already.
/// Returns the id of the message that holds the claim.
pub async fn claim_processing(
    bulk_transfer_id: &BulkTransferId,
    message_id: &str,
    conn: &mut SqliteConnection,
) -> Result<String, StoreError> {
    // The no-op update makes RETURNING yield the existing row on conflict
    let owner = sqlx::query_scalar(
        r#"
            INSERT INTO bulk_fulfil_claim (bulk_transfer_id, message_id, created_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (bulk_transfer_id) DO UPDATE SET bulk_transfer_id = excluded.bulk_transfer_id
            RETURNING message_id;
        "#,
    )
    .bind(bulk_transfer_id.as_str())
    .bind(message_id)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(owner)
}
