use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use log::*;
use settlement_engine::{db_types::ExpiredTransfer, events::MessageBus, SqliteDatabase, SwitchError, TimeoutApi};
use tokio::{sync::watch, task::JoinHandle};

use crate::errors::ServerError;

pub type SettlementTimeoutApi = TimeoutApi<SqliteDatabase, Arc<MessageBus>>;

struct RunningJob {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The periodic timeout sweep.
///
/// There is at most one active instance of the job per `TimeoutJob`. Runs never overlap: the next fire time is only
/// worked out once the previous sweep has finished, so scheduled times that pass while a sweep is in progress are
/// skipped.
pub struct TimeoutJob {
    name: String,
    schedule: Schedule,
    timezone: Tz,
    api: Arc<SettlementTimeoutApi>,
    running: Option<RunningJob>,
}

impl TimeoutJob {
    pub fn new<S: Into<String>>(name: S, schedule: Schedule, timezone: Tz, api: SettlementTimeoutApi) -> Self {
        Self { name: name.into(), schedule, timezone, api: Arc::new(api), running: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the job. A job that is already running is stopped first.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.stop().await;
        let first_run = self.schedule.upcoming(self.timezone).next().ok_or_else(|| {
            ServerError::ConfigurationError(format!("The schedule for {} has no upcoming run times", self.name))
        })?;
        let (shutdown, signal) = watch::channel(false);
        let handle = tokio::spawn(run_job(
            self.name.clone(),
            self.schedule.clone(),
            self.timezone,
            Arc::clone(&self.api),
            signal,
        ));
        self.running = Some(RunningJob { shutdown, handle });
        info!("🕰️ {} started. First run at {first_run}", self.name);
        Ok(())
    }

    /// Stops the job. A sweep that is in progress is allowed to finish.
    pub async fn stop(&mut self) {
        if let Some(job) = self.running.take() {
            let _ = job.shutdown.send(true);
            if let Err(e) = job.handle.await {
                error!("🕰️ {} did not shut down cleanly. {e}", self.name);
            }
            info!("🕰️ {} stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().map(|job| !job.handle.is_finished()).unwrap_or(false)
    }
}

async fn run_job(
    name: String,
    schedule: Schedule,
    timezone: Tz,
    api: Arc<SettlementTimeoutApi>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let Some(next) = schedule.upcoming(timezone).next() else {
            warn!("🕰️ {name} has no more scheduled runs");
            break;
        };
        let wait = (next.with_timezone(&Utc) - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(wait) => {},
        }
        run_sweep(&name, &api).await;
    }
    debug!("🕰️ {name} has exited its run loop");
}

async fn run_sweep(name: &str, api: &SettlementTimeoutApi) {
    trace!("🕰️ Running {name}");
    match api.sweep().await {
        Ok(result) => {
            let (min, max) = (result.interval_min, result.interval_max);
            debug!("🕰️ {name} scanned ({min}, {max}]. {} stale timeouts cleaned up", result.cleanup);
            if !result.expired.is_empty() {
                info!("🕰️ {} transfers expired: {}", result.expired.len(), transfer_list(&result.expired));
            }
        },
        Err(e) => {
            let e = SwitchError::reformat(e);
            error!("🕰️ {name} failed. {e}");
        },
    }
}

fn transfer_list(transfers: &[ExpiredTransfer]) -> String {
    transfers
        .iter()
        .map(|t| format!("[{}] {} ({} -> {})", t.transfer_id, t.transfer_state, t.payer_fsp, t.payee_fsp))
        .collect::<Vec<String>>()
        .join(", ")
}
