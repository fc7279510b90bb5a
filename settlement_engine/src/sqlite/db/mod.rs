//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interaction are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool,
//! or create an atomic transaction as the need arises and call through to the functions without any other changes.
use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod bulk_transfers;
pub mod duplicate_checks;
pub mod positions;
pub mod timeouts;
pub mod transfers;

/// How long a writer waits for a competing writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Builds the `('A', 'B', ...)` list used in `IN` clauses from a list of state names.
pub(crate) fn sql_in_list<I, S>(states: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted = states.into_iter().map(|s| format!("'{}'", s.as_ref())).collect::<Vec<_>>();
    format!("({})", quoted.join(", "))
}
