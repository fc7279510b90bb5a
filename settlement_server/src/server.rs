use std::sync::Arc;

use log::*;
use settlement_engine::{events::MessageBus, BulkFulfilApi, SettlementDatabase, SqliteDatabase, TimeoutApi};

use crate::{
    bulk_fulfil_worker::BulkFulfilWorkers,
    config::ServerConfig,
    errors::ServerError,
    timeout_worker::TimeoutJob,
};

pub const TIMEOUT_JOB_NAME: &str = "transfer timeout sweep";

/// The running settlement services. Dropping this without calling [`SettlementServices::stop`] aborts nothing; the
/// services keep running until the runtime shuts down.
pub struct SettlementServices {
    pub db: SqliteDatabase,
    pub bus: Arc<MessageBus>,
    timeout_job: TimeoutJob,
    bulk_fulfil: Option<BulkFulfilWorkers>,
}

impl SettlementServices {
    pub fn timeout_job(&self) -> &TimeoutJob {
        &self.timeout_job
    }

    pub fn bulk_fulfil_running(&self) -> bool {
        self.bulk_fulfil.as_ref().map(|w| w.is_running()).unwrap_or(false)
    }

    /// Stops the timeout job and the consumers, letting in-flight work finish, then closes the database.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        self.timeout_job.stop().await;
        if let Some(workers) = self.bulk_fulfil.take() {
            workers.stop().await;
        }
        self.db.close().await.map_err(|e| ServerError::BackendError(e.to_string()))
    }
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(config.database_url.reveal(), config.db_max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let services = start_services(&config, db).await?;
    info!("🚀️ Settlement services are running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("🚀️ Shutting down");
    services.stop().await
}

/// Prepares the database and starts every service that the configuration has not disabled.
pub async fn start_services(config: &ServerConfig, db: SqliteDatabase) -> Result<SettlementServices, ServerError> {
    if config.run_migrations {
        db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    } else {
        info!("🗃️ Database migrations are disabled. Assuming the schema is up to date.");
    }
    let bus = Arc::new(MessageBus::new(config.partitions));

    let timeout_api = TimeoutApi::new(db.clone(), bus.clone(), config.timeout_config());
    let mut timeout_job =
        TimeoutJob::new(TIMEOUT_JOB_NAME, config.timeout.schedule.clone(), config.timeout.timezone, timeout_api);
    if config.timeout.disabled {
        info!("🕰️ {} is disabled", timeout_job.name());
    } else {
        timeout_job.start().await?;
    }

    let bulk_fulfil = if config.bulk_fulfil_disabled {
        info!("📦️ Bulk fulfilment handling is disabled");
        None
    } else {
        let api = BulkFulfilApi::new(db.clone(), bus.clone()).with_page_size(config.stream_page_size);
        Some(BulkFulfilWorkers::start(api, bus.clone()))
    };
    Ok(SettlementServices { db, bus, timeout_job, bulk_fulfil })
}

#[cfg(test)]
mod test {
    use settlement_engine::{
        test_utils::prepare_env::{create_database, drop_database, random_db_path},
        TransferRecordStore,
    };

    use super::*;

    async fn fresh_db(url: &str) -> SqliteDatabase {
        let _ = env_logger::try_init();
        create_database(url).await;
        SqliteDatabase::new_with_url(url, 5).await.unwrap()
    }

    #[tokio::test]
    async fn services_start_and_stop() {
        let url = random_db_path();
        let db = fresh_db(&url).await;
        let config = ServerConfig { partitions: 2, ..ServerConfig::default() };
        let services = start_services(&config, db).await.unwrap();
        assert!(services.timeout_job().is_running());
        assert!(services.bulk_fulfil_running());
        assert_eq!(services.bus.partitions(), 2);
        // Migrations ran, so the ledger tables exist
        assert_eq!(services.db.truncate_transfers().await.unwrap(), 0);
        services.stop().await.unwrap();
        drop_database(&url).await;
    }

    #[tokio::test]
    async fn disabled_services_are_not_started() {
        let url = random_db_path();
        let db = fresh_db(&url).await;
        let mut config = ServerConfig { bulk_fulfil_disabled: true, ..ServerConfig::default() };
        config.timeout.disabled = true;
        let services = start_services(&config, db).await.unwrap();
        assert!(!services.timeout_job().is_running());
        assert!(!services.bulk_fulfil_running());
        services.stop().await.unwrap();
        drop_database(&url).await;
    }
}
