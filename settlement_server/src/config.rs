use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use chrono_tz::Tz;
use cron::Schedule;
use log::*;
use settlement_engine::{switch_api::DEFAULT_PAGE_SIZE, TimeoutConfig};
use switch_common::{
    helpers::{parse_boolean_flag, parse_env},
    Secret,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/central_ledger.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_TIMEXP: &str = "*/15 * * * * *";
const DEFAULT_TIMEZONE: Tz = Tz::UTC;
const DEFAULT_RESERVATION_EXPIRY_SECS: i64 = 60;
const DEFAULT_PARTITIONS: usize = 4;
const DEFAULT_HUB_NAME: &str = "switch";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub database_url: Secret<String>,
    pub db_max_connections: u32,
    /// If true, the embedded schema migrations are applied at start-up.
    pub run_migrations: bool,
    pub timeout: TimeoutJobConfig,
    /// If true, no bulk fulfilment consumers are started.
    pub bulk_fulfil_disabled: bool,
    /// The number of inbound bulk fulfilment partitions. One consumer is started per partition.
    pub partitions: usize,
    /// How many individual transfers are read from the database at a time while a bulk is fulfilled.
    pub stream_page_size: i64,
    /// The expiry threshold for transfers that do not carry their own expiration date.
    pub reservation_expiry: Duration,
    /// The switch's own participant identifier.
    pub hub_name: String,
}

/// When and where the timeout sweep runs.
#[derive(Clone, Debug)]
pub struct TimeoutJobConfig {
    pub schedule: Schedule,
    pub timezone: Tz,
    pub disabled: bool,
}

impl Default for TimeoutJobConfig {
    fn default() -> Self {
        Self { schedule: default_schedule(), timezone: DEFAULT_TIMEZONE, disabled: false }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: Secret::new(DEFAULT_DATABASE_URL.to_string()),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            run_migrations: true,
            timeout: TimeoutJobConfig::default(),
            bulk_fulfil_disabled: false,
            partitions: DEFAULT_PARTITIONS,
            stream_page_size: DEFAULT_PAGE_SIZE,
            reservation_expiry: Duration::seconds(DEFAULT_RESERVATION_EXPIRY_SECS),
            hub_name: DEFAULT_HUB_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("CLS_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ CLS_DATABASE_URL is not set. Using the default database, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let db_max_connections = env_or_default("CLS_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let run_migrations = parse_boolean_flag(env::var("CLS_RUN_MIGRATIONS").ok(), true);
        let timeout = TimeoutJobConfig::from_env_or_default();
        let bulk_fulfil_disabled = parse_boolean_flag(env::var("CLS_BULK_FULFIL_DISABLED").ok(), false);
        let partitions = match env_or_default("CLS_BULK_FULFIL_PARTITIONS", DEFAULT_PARTITIONS) {
            0 => {
                warn!("🪛️ CLS_BULK_FULFIL_PARTITIONS must be at least 1. Using {DEFAULT_PARTITIONS} instead.");
                DEFAULT_PARTITIONS
            },
            n => n,
        };
        let stream_page_size = match env_or_default("CLS_STREAM_PAGE_SIZE", DEFAULT_PAGE_SIZE) {
            n if n < 1 => {
                warn!("🪛️ CLS_STREAM_PAGE_SIZE must be positive. Using {DEFAULT_PAGE_SIZE} instead.");
                DEFAULT_PAGE_SIZE
            },
            n => n,
        };
        let expiry_secs = env_or_default("CLS_RESERVATION_EXPIRY_SECS", DEFAULT_RESERVATION_EXPIRY_SECS);
        let hub_name = env::var("CLS_HUB_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HUB_NAME.to_string());
        if bulk_fulfil_disabled {
            info!("🪛️ Bulk fulfilment handling is disabled.");
        }
        Self {
            database_url: Secret::new(database_url),
            db_max_connections,
            run_migrations,
            timeout,
            bulk_fulfil_disabled,
            partitions,
            stream_page_size,
            reservation_expiry: Duration::seconds(expiry_secs),
            hub_name,
        }
    }

    /// The parameters of the timeout sweep itself.
    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig { reservation_expiry: self.reservation_expiry, hub_name: self.hub_name.clone() }
    }
}

impl TimeoutJobConfig {
    pub fn from_env_or_default() -> Self {
        let schedule = match env::var("CLS_TIMEOUT_TIMEXP") {
            Ok(s) => Schedule::from_str(s.trim()).unwrap_or_else(|e| {
                warn!("🪛️ {s} is not a valid cron expression for CLS_TIMEOUT_TIMEXP. {e} Using {DEFAULT_TIMEXP}.");
                default_schedule()
            }),
            Err(_) => {
                info!("🪛️ CLS_TIMEOUT_TIMEXP is not set. The timeout sweep runs on the schedule {DEFAULT_TIMEXP}");
                default_schedule()
            },
        };
        let timezone = env_or_default("CLS_TIMEOUT_TIMEZONE", DEFAULT_TIMEZONE);
        let disabled = parse_boolean_flag(env::var("CLS_TIMEOUT_DISABLED").ok(), false);
        if disabled {
            info!("🪛️ The timeout sweep is disabled.");
        }
        Self { schedule, timezone, disabled }
    }
}

fn default_schedule() -> Schedule {
    // Literal expression. This cannot fail to parse.
    Schedule::from_str(DEFAULT_TIMEXP).unwrap()
}

/// Reads `name` from the environment. Unset or unparseable values fall back to `default`, with a log entry saying so.
fn env_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match parse_env::<T>(name) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
        Err(e) => {
            warn!("🪛️ Invalid configuration value for {name}. {e}. Using the default, {default}, instead.");
            default
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const VARS: [&str; 11] = [
        "CLS_DATABASE_URL",
        "CLS_DB_MAX_CONNECTIONS",
        "CLS_RUN_MIGRATIONS",
        "CLS_TIMEOUT_TIMEXP",
        "CLS_TIMEOUT_TIMEZONE",
        "CLS_TIMEOUT_DISABLED",
        "CLS_BULK_FULFIL_DISABLED",
        "CLS_RESERVATION_EXPIRY_SECS",
        "CLS_BULK_FULFIL_PARTITIONS",
        "CLS_STREAM_PAGE_SIZE",
        "CLS_HUB_NAME",
    ];

    // Everything that touches the CLS_ variables lives in this one test, since tests share the process environment.
    #[test]
    fn config_from_env() {
        VARS.iter().for_each(|v| env::remove_var(v));
        let config = ServerConfig::from_env_or_default();
        assert_eq!(config.database_url.reveal(), DEFAULT_DATABASE_URL);
        assert_eq!(config.db_max_connections, 10);
        assert!(config.run_migrations);
        assert_eq!(config.timeout.timezone, Tz::UTC);
        assert!(!config.timeout.disabled);
        assert!(!config.bulk_fulfil_disabled);
        assert_eq!(config.reservation_expiry, Duration::seconds(60));
        assert_eq!(config.partitions, 4);
        assert_eq!(config.stream_page_size, 100);
        assert_eq!(config.hub_name, "switch");

        env::set_var("CLS_DATABASE_URL", "sqlite://ledger.db");
        env::set_var("CLS_DB_MAX_CONNECTIONS", "3");
        env::set_var("CLS_RUN_MIGRATIONS", "false");
        env::set_var("CLS_TIMEOUT_TIMEXP", "0 */5 * * * *");
        env::set_var("CLS_TIMEOUT_TIMEZONE", "Africa/Johannesburg");
        env::set_var("CLS_TIMEOUT_DISABLED", "1");
        env::set_var("CLS_BULK_FULFIL_DISABLED", "yes");
        env::set_var("CLS_RESERVATION_EXPIRY_SECS", "300");
        env::set_var("CLS_BULK_FULFIL_PARTITIONS", "0");
        env::set_var("CLS_STREAM_PAGE_SIZE", "lots");
        env::set_var("CLS_HUB_NAME", "hub");
        let config = ServerConfig::from_env_or_default();
        assert_eq!(config.database_url.reveal(), "sqlite://ledger.db");
        assert_eq!(format!("{:?}", config.database_url), "****");
        assert_eq!(config.db_max_connections, 3);
        assert!(!config.run_migrations);
        assert_eq!(config.timeout.timezone, Tz::Africa__Johannesburg);
        assert!(config.timeout.disabled);
        assert!(config.bulk_fulfil_disabled);
        assert_eq!(config.reservation_expiry, Duration::minutes(5));
        assert_eq!(config.partitions, 4);
        assert_eq!(config.stream_page_size, 100);
        assert_eq!(config.timeout_config().hub_name, "hub");

        env::set_var("CLS_TIMEOUT_TIMEXP", "every now and then");
        env::set_var("CLS_TIMEOUT_TIMEZONE", "Mars/Olympus_Mons");
        let timeout = TimeoutJobConfig::from_env_or_default();
        assert_eq!(timeout.timezone, Tz::UTC);
        assert_eq!(timeout.schedule.to_string(), DEFAULT_TIMEXP);
        VARS.iter().for_each(|v| env::remove_var(v));
    }

    #[test]
    fn custom_schedules_fire_when_expected() {
        let schedule = Schedule::from_str("0 */5 * * * *").unwrap();
        let upcoming = schedule.upcoming(Tz::UTC).take(2).collect::<Vec<_>>();
        assert_eq!(upcoming[1] - upcoming[0], Duration::minutes(5));
    }
}
