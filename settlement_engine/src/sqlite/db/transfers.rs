use chrono::Utc;
use log::*;
use sqlx::SqliteConnection;

use super::sql_in_list;
use crate::{
    db_types::{
        ErrorInformation,
        NewTransfer,
        NewTransferFulfilment,
        StateTransition,
        Transfer,
        TransferFulfilment,
        TransferId,
        TransferInternalState,
        TransferStateChange,
    },
    traits::StoreError,
};

pub async fn fetch_transfer(
    transfer_id: &TransferId,
    conn: &mut SqliteConnection,
) -> Result<Option<Transfer>, StoreError> {
    let transfer = sqlx::query_as("SELECT * FROM transfer WHERE transfer_id = $1")
        .bind(transfer_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(transfer)
}

/// Inserts a new transfer and its initial `RECEIVED_PREPARE` state change.
pub async fn insert_transfer(transfer: NewTransfer, conn: &mut SqliteConnection) -> Result<Transfer, StoreError> {
    let id = transfer.transfer_id.clone();
    let state = TransferInternalState::ReceivedPrepare;
    let record: Transfer = sqlx::query_as(
        r#"
            INSERT INTO transfer (transfer_id, payer_fsp, payee_fsp, amount, currency, transfer_state, expiration_date,
                                  created_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(transfer.transfer_id.as_str())
    .bind(transfer.payer_fsp)
    .bind(transfer.payee_fsp)
    .bind(transfer.amount)
    .bind(transfer.currency)
    .bind(state)
    .bind(transfer.expiration_date)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => StoreError::TransferAlreadyExists(id.clone()),
        _ => StoreError::from(e),
    })?;
    insert_state_change(&id, state, "Transfer prepared", conn).await?;
    Ok(record)
}

pub async fn insert_state_change(
    transfer_id: &TransferId,
    state: TransferInternalState,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
            INSERT INTO transfer_state_change (transfer_id, transfer_state, reason, created_date)
            VALUES ($1, $2, $3, $4)
            RETURNING transfer_state_change_id;
        "#,
    )
    .bind(transfer_id.as_str())
    .bind(state)
    .bind(reason)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Transfer {transfer_id} -> {state} (state change #{id})");
    Ok(id)
}

/// Moves the transfer to `new_state` if, and only if, it is not terminal. The check and the write are a single
/// statement, so a concurrent terminal write cannot be overwritten.
pub async fn transition_state(
    transfer_id: &TransferId,
    new_state: TransferInternalState,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<StateTransition, StoreError> {
    let q = format!(
        "UPDATE transfer SET transfer_state = $1 WHERE transfer_id = $2 AND transfer_state NOT IN {}",
        sql_in_list(TransferInternalState::TERMINAL.iter().map(|s| s.as_str()))
    );
    let result = sqlx::query(&q).bind(new_state).bind(transfer_id.as_str()).execute(&mut *conn).await?;
    if result.rows_affected() == 1 {
        insert_state_change(transfer_id, new_state, reason, conn).await?;
        return Ok(StateTransition::Applied(new_state));
    }
    match fetch_transfer(transfer_id, conn).await? {
        Some(t) => {
            debug!("🗃️ Transfer {transfer_id} is already {}. Not moving it to {new_state}", t.transfer_state);
            Ok(StateTransition::AlreadyTerminal(t.transfer_state))
        },
        None => Ok(StateTransition::UnknownTransfer),
    }
}

/// Moves the transfer from `expected` to `new_state`. Returns false, and changes nothing, if the transfer is not
/// currently in the `expected` state.
pub async fn compare_and_set_state(
    transfer_id: &TransferId,
    expected: TransferInternalState,
    new_state: TransferInternalState,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE transfer SET transfer_state = $1 WHERE transfer_id = $2 AND transfer_state = $3")
        .bind(new_state)
        .bind(transfer_id.as_str())
        .bind(expected)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }
    insert_state_change(transfer_id, new_state, reason, conn).await?;
    Ok(true)
}

pub async fn delete_transfer(transfer_id: &TransferId, conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let result =
        sqlx::query("DELETE FROM transfer WHERE transfer_id = $1").bind(transfer_id.as_str()).execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn delete_all_transfers(conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM transfer").execute(conn).await?;
    Ok(result.rows_affected())
}

pub async fn fetch_state_changes(
    transfer_id: &TransferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransferStateChange>, StoreError> {
    let changes = sqlx::query_as(
        "SELECT * FROM transfer_state_change WHERE transfer_id = $1 ORDER BY transfer_state_change_id ASC",
    )
    .bind(transfer_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(changes)
}

pub async fn latest_state_change(conn: &mut SqliteConnection) -> Result<Option<TransferStateChange>, StoreError> {
    let change =
        sqlx::query_as("SELECT * FROM transfer_state_change ORDER BY transfer_state_change_id DESC LIMIT 1")
            .fetch_optional(conn)
            .await?;
    Ok(change)
}

pub async fn latest_state_change_for(
    transfer_id: &TransferId,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferStateChange>, StoreError> {
    let change = sqlx::query_as(
        r#"
            SELECT * FROM transfer_state_change WHERE transfer_id = $1
            ORDER BY transfer_state_change_id DESC LIMIT 1
        "#,
    )
    .bind(transfer_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(change)
}

pub async fn insert_fulfilment(
    fulfilment: NewTransferFulfilment,
    conn: &mut SqliteConnection,
) -> Result<TransferFulfilment, StoreError> {
    let id = fulfilment.transfer_id.clone();
    let record = sqlx::query_as(
        r#"
            INSERT INTO transfer_fulfilment (transfer_id, fulfilment, completed_date, is_valid, created_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(fulfilment.transfer_id.as_str())
    .bind(fulfilment.fulfilment)
    .bind(fulfilment.completed_date)
    .bind(fulfilment.is_valid)
    .bind(Utc::now())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => StoreError::TransferNotFound(id),
        _ => StoreError::from(e),
    })?;
    Ok(record)
}

pub async fn fetch_fulfilments(
    transfer_id: &TransferId,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransferFulfilment>, StoreError> {
    let fulfilments = sqlx::query_as(
        "SELECT * FROM transfer_fulfilment WHERE transfer_id = $1 ORDER BY transfer_fulfilment_id ASC",
    )
    .bind(transfer_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(fulfilments)
}

pub async fn insert_transfer_error(
    transfer_id: &TransferId,
    state_change_id: Option<i64>,
    error: &ErrorInformation,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
            INSERT INTO transfer_error (transfer_id, transfer_state_change_id, error_code, error_description,
                                        created_date)
            VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(transfer_id.as_str())
    .bind(state_change_id)
    .bind(&error.error_code)
    .bind(&error.error_description)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}
