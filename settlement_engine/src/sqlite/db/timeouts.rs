use chrono::{DateTime, Duration, Utc};
use log::*;
use sqlx::SqliteConnection;

use super::{sql_in_list, transfers};
use crate::{
    db_types::{ExpiredTransfer, TimeoutSegment, TransferInternalState},
    traits::StoreError,
};

pub const TIMEOUT_SEGMENT_TYPE: &str = "timeout";
pub const TIMEOUT_SEGMENT_TABLE: &str = "transfer_state_change";

/// Transfer states in which a transfer can still time out.
pub const PENDING_STATES: [TransferInternalState; 2] =
    [TransferInternalState::ReceivedPrepare, TransferInternalState::Reserved];

pub async fn fetch_segment(conn: &mut SqliteConnection) -> Result<Option<TimeoutSegment>, StoreError> {
    let segment = sqlx::query_as(
        "SELECT * FROM segment WHERE segment_type = $1 AND enumeration = 0 AND table_name = $2 LIMIT 1",
    )
    .bind(TIMEOUT_SEGMENT_TYPE)
    .bind(TIMEOUT_SEGMENT_TABLE)
    .fetch_optional(conn)
    .await?;
    Ok(segment)
}

/// Moves the watermark up to `value`. If `segment_id` is 0 the segment is created. The stored value never decreases.
pub async fn advance_segment(segment_id: i64, value: i64, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let now = Utc::now();
    if segment_id == 0 {
        sqlx::query(
            r#"
                INSERT INTO segment (segment_type, enumeration, table_name, value, changed_date)
                VALUES ($1, 0, $2, $3, $4)
                ON CONFLICT (segment_type, enumeration, table_name) DO UPDATE SET
                    value = MAX(segment.value, excluded.value),
                    changed_date = excluded.changed_date
            "#,
        )
        .bind(TIMEOUT_SEGMENT_TYPE)
        .bind(TIMEOUT_SEGMENT_TABLE)
        .bind(value)
        .bind(now)
        .execute(conn)
        .await?;
    } else {
        sqlx::query("UPDATE segment SET value = MAX(value, $1), changed_date = $2 WHERE segment_id = $3")
            .bind(value)
            .bind(now)
            .bind(segment_id)
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// Deletes tracking rows whose transfer has reached a terminal state.
pub async fn delete_terminal_timeouts(conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let q = format!(
        "DELETE FROM transfer_timeout WHERE transfer_id IN (SELECT transfer_id FROM transfer WHERE transfer_state IN \
         {})",
        sql_in_list(TransferInternalState::TERMINAL.iter().map(|s| s.as_str()))
    );
    let result = sqlx::query(&q).execute(conn).await?;
    Ok(result.rows_affected())
}

/// Starts tracking pending transfers that changed state inside the window `(interval_min, interval_max]`.
pub async fn track_window(
    interval_min: i64,
    interval_max: i64,
    default_expiry: Duration,
    conn: &mut SqliteConnection,
) -> Result<u64, StoreError> {
    let q = format!(
        r#"
            INSERT INTO transfer_timeout (transfer_id, expiration_date, created_date)
            SELECT t.transfer_id,
                   COALESCE(t.expiration_date, strftime('%Y-%m-%dT%H:%M:%fZ', t.created_date, $3)),
                   $4
            FROM transfer t
            WHERE t.transfer_id IN (
                SELECT transfer_id FROM transfer_state_change
                WHERE transfer_state_change_id > $1 AND transfer_state_change_id <= $2
            )
            AND t.transfer_state IN {pending}
            ON CONFLICT (transfer_id) DO NOTHING
        "#,
        pending = sql_in_list(PENDING_STATES.iter().map(|s| s.as_str()))
    );
    let modifier = format!("{:+} seconds", default_expiry.num_seconds());
    let result = sqlx::query(&q)
        .bind(interval_min)
        .bind(interval_max)
        .bind(modifier)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Tracked transfers that are still pending and whose expiration is at or before `now`.
pub async fn fetch_expired(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<ExpiredTransfer>, StoreError> {
    let q = format!(
        r#"
            SELECT t.transfer_id, t.payer_fsp, t.payee_fsp, t.transfer_state, tt.expiration_date
            FROM transfer_timeout tt INNER JOIN transfer t ON t.transfer_id = tt.transfer_id
            WHERE julianday(tt.expiration_date) <= julianday($1) AND t.transfer_state IN {pending}
            ORDER BY tt.transfer_timeout_id
        "#,
        pending = sql_in_list(PENDING_STATES.iter().map(|s| s.as_str()))
    );
    let expired = sqlx::query_as(&q).bind(now).fetch_all(conn).await?;
    Ok(expired)
}

/// The state a pending transfer moves to when it times out.
pub fn expired_state(state: TransferInternalState) -> Option<TransferInternalState> {
    match state {
        TransferInternalState::ReceivedPrepare => Some(TransferInternalState::ExpiredPrepared),
        TransferInternalState::Reserved => Some(TransferInternalState::ReservedTimeout),
        _ => None,
    }
}

/// Moves each candidate to its expired state, skipping any that changed state since they were read. Returns the
/// transfers that were moved, with their new state.
pub async fn expire_transfers(
    candidates: Vec<ExpiredTransfer>,
    conn: &mut SqliteConnection,
) -> Result<Vec<ExpiredTransfer>, StoreError> {
    let mut expired = Vec::with_capacity(candidates.len());
    for mut transfer in candidates {
        let Some(new_state) = expired_state(transfer.transfer_state) else {
            continue;
        };
        let id = transfer.transfer_id.clone();
        let moved =
            transfers::compare_and_set_state(&id, transfer.transfer_state, new_state, "Transfer expired", &mut *conn)
                .await?;
        if moved {
            debug!("🕰️ Transfer {id} expired ({} -> {new_state})", transfer.transfer_state);
            transfer.transfer_state = new_state;
            expired.push(transfer);
        } else {
            debug!("🕰️ Transfer {id} changed state before it could be expired. Skipping");
        }
    }
    Ok(expired)
}
