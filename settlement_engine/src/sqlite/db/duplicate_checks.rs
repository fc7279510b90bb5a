use chrono::Utc;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{DuplicateCheckKind, DuplicateCheckRecord, DuplicateCheckResult},
    traits::StoreError,
};

/// Inserts the hash for `identity` unless a record already exists. Returns true if this call created the record.
///
/// The primary key arbitrates between concurrent writers, so exactly one caller sees `true`.
pub async fn insert_if_absent(
    kind: DuplicateCheckKind,
    identity: &str,
    hash: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let q = format!(
        "INSERT INTO {table} ({id}, hash, created_date) VALUES ($1, $2, $3) ON CONFLICT ({id}) DO NOTHING",
        table = kind.table(),
        id = kind.id_column()
    );
    let result = sqlx::query(&q).bind(identity).bind(hash).bind(Utc::now()).execute(conn).await?;
    Ok(result.rows_affected() == 1)
}

pub async fn fetch_record(
    kind: DuplicateCheckKind,
    identity: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<DuplicateCheckRecord>, StoreError> {
    let q = format!(
        "SELECT {id} AS identity, hash, created_date FROM {table} WHERE {id} = $1",
        table = kind.table(),
        id = kind.id_column()
    );
    let record = sqlx::query_as(&q).bind(identity).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn insert_record(
    kind: DuplicateCheckKind,
    identity: &str,
    hash: &str,
    conn: &mut SqliteConnection,
) -> Result<DuplicateCheckRecord, StoreError> {
    let q = format!(
        "INSERT INTO {table} ({id}, hash, created_date) VALUES ($1, $2, $3) RETURNING {id} AS identity, hash, \
         created_date",
        table = kind.table(),
        id = kind.id_column()
    );
    let record = sqlx::query_as(&q).bind(identity).bind(hash).bind(Utc::now()).fetch_one(conn).await.map_err(
        |e| match e {
            sqlx::Error::Database(err) if err.is_unique_violation() => {
                StoreError::DuplicateCheckExists(identity.to_string())
            },
            _ => StoreError::from(e),
        },
    )?;
    Ok(record)
}

/// Checks `identity` against the stored hash, recording `hash` if the identity is new.
///
/// Call this inside a transaction. The insert is attempted first so that the write lock is taken before the stored
/// hash is read.
pub async fn check_and_insert(
    kind: DuplicateCheckKind,
    identity: &str,
    hash: &str,
    conn: &mut SqliteConnection,
) -> Result<DuplicateCheckResult, StoreError> {
    if insert_if_absent(kind, identity, hash, &mut *conn).await? {
        trace!("🔁️ {identity} has not been seen before");
        return Ok(DuplicateCheckResult::first_seen());
    }
    let record = fetch_record(kind, identity, &mut *conn).await?.ok_or_else(|| {
        StoreError::InvalidData(format!("Duplicate check record for {identity} vanished during the check"))
    })?;
    let result = DuplicateCheckResult::compare(&record.hash, hash);
    if result.is_resend() {
        debug!("🔁️ {identity} is a resend of a request first seen at {}", record.created_date);
    } else {
        debug!("🔁️ {identity} has been seen before with different content");
    }
    Ok(result)
}
