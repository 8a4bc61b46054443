//! Background tasks owned by the server process.

use std::sync::Arc;
use std::time::Duration;

use relay_dispatch::{
    DeadLetterSink, Dispatcher, DispatcherHandle, FileDeadLetterSink, JsonLogHandler,
    MemoryDeadLetterSink,
};
use relay_partition::LogStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::ServerResult;
use crate::service::RelayService;

/// Runs retention on `log` every `period` until `stop` turns true.
pub fn spawn_retention(
    log: Arc<LogStore>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_retention_pass(&log);
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Retention task stopped");
    })
}

/// Applies retention once. Returns the number of records purged.
pub fn run_retention_pass(log: &LogStore) -> u64 {
    let purged = log.enforce_retention();
    if purged > 0 {
        info!(purged_records = purged, "Retention purged records");
    } else {
        debug!("Retention found nothing to purge");
    }
    purged
}

/// Starts the consumer dispatcher with the JSON logging handler.
///
/// Dead letters go to a file when `dead_letter.path` is set and stay in
/// memory otherwise.
///
/// # Errors
/// Returns an error if the dispatcher configuration is invalid or the
/// dead-letter file cannot be opened.
pub async fn start_dispatcher(
    config: &RelayConfig,
    service: &RelayService,
) -> ServerResult<DispatcherHandle> {
    let sink: Arc<dyn DeadLetterSink> = match &config.dead_letter.path {
        Some(path) => Arc::new(FileDeadLetterSink::open(path.clone()).await?),
        None => Arc::new(MemoryDeadLetterSink::new()),
    };

    let dispatcher = Dispatcher::new(
        config.dispatcher_config()?,
        Arc::clone(service.log()),
        Arc::clone(service.checkpoints()),
        Arc::new(JsonLogHandler),
    )?
    .with_dead_letter_sink(sink);

    Ok(dispatcher.start()?)
}
