use std::{env, env::VarError};

use crate::config::ServerConfig;

// CLS_DATABASE_URL can carry credentials, so it is never printed
const DISPLAY_ENVS: [&str; 11] = [
    "RUST_LOG",
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

/// The server takes no arguments. If any are given, print the help text, the relevant environment and the
/// configuration the server would run with, and return true.
pub fn handle_command_line_args() -> bool {
    if env::args().count() <= 1 {
        return false;
    }
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
    println!("Current environment values (EXCLUDING variables that contain secrets):");
    for name in DISPLAY_ENVS {
        println!("  {name:<35} {:<15}", env_value(name));
    }
    println!("\nEffective configuration:");
    for (name, value) in describe_config(&ServerConfig::from_env_or_default()) {
        println!("  {name:<35} {value:<15}");
    }
    true
}

fn env_value(name: &str) -> String {
    match env::var(name) {
        Ok(s) => s,
        Err(VarError::NotPresent) => "Not set".into(),
        Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
    }
}

fn describe_config(config: &ServerConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database url", config.database_url.to_string()),
        ("database connections", config.db_max_connections.to_string()),
        ("run migrations", config.run_migrations.to_string()),
        ("timeout schedule", config.timeout.schedule.to_string()),
        ("timeout time zone", config.timeout.timezone.to_string()),
        ("timeout sweep enabled", (!config.timeout.disabled).to_string()),
        ("reservation expiry (s)", config.reservation_expiry.num_seconds().to_string()),
        ("bulk fulfilment enabled", (!config.bulk_fulfil_disabled).to_string()),
        ("bulk fulfilment partitions", config.partitions.to_string()),
        ("stream page size", config.stream_page_size.to_string()),
        ("hub name", config.hub_name.clone()),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn description_hides_the_database_url() {
        let config = ServerConfig::default();
        let description = describe_config(&config);
        assert_eq!(description[0], ("database url", "****".to_string()));
        assert!(description.iter().all(|(_, v)| !v.contains("central_ledger")));
        assert!(description.contains(&("hub name", "switch".to_string())));
        assert!(description.contains(&("timeout schedule", "*/15 * * * * *".to_string())));
    }
}
