use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "state/sequences.db";
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub poll_interval: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("SEQUENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        let poll_interval = env::var("SCHEDULER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));

        Self {
            db_path,
            poll_interval,
        }
    }
}
