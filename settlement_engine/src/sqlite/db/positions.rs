use chrono::Utc;
use sqlx::SqliteConnection;
use switch_common::Amount;

use crate::{db_types::ParticipantPosition, traits::StoreError};

pub async fn fetch_position(
    participant_currency_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ParticipantPosition>, StoreError> {
    let position = sqlx::query_as("SELECT * FROM participant_position WHERE participant_currency_id = $1")
        .bind(participant_currency_id)
        .fetch_optional(conn)
        .await?;
    Ok(position)
}

pub async fn insert_position(
    participant_currency_id: i64,
    value: Amount,
    reserved_value: Amount,
    conn: &mut SqliteConnection,
) -> Result<ParticipantPosition, StoreError> {
    let position = sqlx::query_as(
        r#"
            INSERT INTO participant_position (participant_currency_id, value, reserved_value, changed_date)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(participant_currency_id)
    .bind(value)
    .bind(reserved_value)
    .bind(Utc::now())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            StoreError::PositionAlreadyExists(participant_currency_id)
        },
        _ => StoreError::from(e),
    })?;
    Ok(position)
}

pub async fn update_position(
    participant_currency_id: i64,
    value: Amount,
    reserved_value: Amount,
    conn: &mut SqliteConnection,
) -> Result<ParticipantPosition, StoreError> {
    let position = sqlx::query_as(
        r#"
            UPDATE participant_position SET value = $1, reserved_value = $2, changed_date = $3
            WHERE participant_currency_id = $4
            RETURNING *;
        "#,
    )
    .bind(value)
    .bind(reserved_value)
    .bind(Utc::now())
    .bind(participant_currency_id)
    .fetch_optional(conn)
    .await?;
    position.ok_or(StoreError::PositionNotFound(participant_currency_id))
}

pub async fn adjust_position(
    participant_currency_id: i64,
    value_delta: Amount,
    reserved_delta: Amount,
    conn: &mut SqliteConnection,
) -> Result<ParticipantPosition, StoreError> {
    let position = sqlx::query_as(
        r#"
            UPDATE participant_position
            SET value = value + $1, reserved_value = reserved_value + $2, changed_date = $3
            WHERE participant_currency_id = $4
            RETURNING *;
        "#,
    )
    .bind(value_delta)
    .bind(reserved_delta)
    .bind(Utc::now())
    .bind(participant_currency_id)
    .fetch_optional(conn)
    .await?;
    position.ok_or(StoreError::PositionNotFound(participant_currency_id))
}
