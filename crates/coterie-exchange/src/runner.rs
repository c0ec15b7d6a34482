//! Worker loop driving the exchange tick.
//!
//! [`run_exchange_loop`] is spawned as a tokio task by
//! [`ExchangeHandle::start`]. It multiplexes exactly two things: the
//! tick interval and the shutdown watch channel. All engine work
//! happens inside [`Exchange::tick`]; the loop itself owns no state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::Exchange;

/// Runs the exchange tick loop until shutdown is signalled.
pub async fn run_exchange_loop(exchange: Arc<Exchange>, mut shutdown_rx: watch::Receiver<bool>) {
    tracing::info!(
        tick_ms = exchange.config().tick_interval_ms,
        "exchange loop starting"
    );

    let mut tick = tokio::time::interval(Duration::from_millis(exchange.config().tick_interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                exchange.tick();
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received, exiting exchange loop");
                    break;
                }
            }
        }
    }
}

/// Handle to a running exchange worker.
pub struct ExchangeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExchangeHandle {
    /// Spawns the tick loop on the current tokio runtime.
    pub fn start(exchange: Arc<Exchange>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_exchange_loop(exchange, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Signals shutdown and waits for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_storage::MemoryStore;
    use coterie_types::config::ExchangeConfig;
    use coterie_types::policy::AuthenPolicy;

    #[tokio::test]
    async fn loop_starts_and_stops() {
        let config = ExchangeConfig {
            tick_interval_ms: 10,
            ..ExchangeConfig::default()
        };
        let exchange = Arc::new(
            Exchange::new(Arc::new(MemoryStore::new()), AuthenPolicy::default(), config)
                .expect("engine"),
        );

        let handle = ExchangeHandle::start(Arc::clone(&exchange));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;
    }
}
