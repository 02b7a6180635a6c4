// Worker thread
// Drains the engine's queue into the hub and polls the OSC server until stopped

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::messaging::{Consumer, HubStats, Message, OscHub, OscServer, ServerStats};

use super::config::MessagingConfig;
use super::EngineError;

/// What the worker handled by the time it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Messages taken off the engine queue
    pub drained: u64,
    pub hub: HubStats,
    pub server: Option<ServerStats>,
}

pub struct Worker {
    stop_signal: Arc<AtomicBool>,
    handle: Option<JoinHandle<WorkerReport>>,
}

impl Worker {
    /// Start the worker. It owns the consumer, hub and optional server until `stop`.
    pub fn spawn(
        mut consumer: Consumer<Message>,
        mut hub: OscHub,
        mut server: Option<OscServer>,
        config: &MessagingConfig,
    ) -> Result<Self, EngineError> {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let max_drain = config.max_drain_per_poll.max(1);
        let interval = Duration::from_millis(config.poll_interval_ms);

        let handle = thread::Builder::new()
            .name("cadenza-worker".to_string())
            .spawn(move || {
                let mut drained = 0u64;

                while !stop.load(Ordering::Acquire) {
                    let handled = hub.drain_bounded(&mut consumer, max_drain);
                    drained += handled as u64;

                    let mut received = 0;
                    if let Some(server) = server.as_mut() {
                        match server.poll(&mut hub) {
                            Ok(n) => received = n,
                            Err(e) => log::warn!("OSC server poll failed: {}", e),
                        }
                    }

                    if handled == 0 && received == 0 {
                        thread::sleep(interval);
                    }
                }

                // Deliver whatever the engine queued before the stop
                drained += hub.drain(&mut consumer) as u64;
                log::debug!("Worker stopped after {} messages", drained);

                WorkerReport {
                    drained,
                    hub: hub.stats(),
                    server: server.as_ref().map(OscServer::stats),
                }
            })?;

        Ok(Worker {
            stop_signal,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread, wait for it, and return its report
    pub fn stop(mut self) -> WorkerReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WorkerReport {
        self.stop_signal.store(true, Ordering::Release);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                log::error!("Worker thread panicked");
                WorkerReport::default()
            }
            None => WorkerReport::default(),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
