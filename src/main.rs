use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sequence_scheduler::config::ServiceConfig;
use sequence_scheduler::{LogTransport, Scheduler};
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env();
    info!(
        "starting sequence scheduler (db={}, poll={:?})",
        config.db_path.display(),
        config.poll_interval
    );

    let scheduler = match Scheduler::load(config.db_path, LogTransport) {
        Ok(scheduler) => scheduler,
        Err(err) => {
            error!("failed to open scheduler state: {err}");
            exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let stop_flag = Arc::clone(&running);
    if let Err(err) = ctrlc::set_handler(move || {
        info!("shutdown requested, stopping after the current poll");
        stop_flag.store(false, Ordering::SeqCst);
    }) {
        error!("failed to register shutdown handler: {err}");
        exit(1);
    }

    if let Err(err) = scheduler.run_loop(config.poll_interval, &running) {
        error!("scheduler loop aborted: {err}");
        exit(1);
    }
}
