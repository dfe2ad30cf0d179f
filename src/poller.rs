//! Detection polling cadence.
//!
//! One poller thread per enabled session. Each tick runs a full poll inline
//! (gate, capture, detect, publish) before sleeping toward the next, so polls
//! are serialized by construction: a slow detector stretches the period, it
//! never stacks concurrent calls. The sleep is sliced so `stop` stays prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::session::SessionCore;

const STOP_POLL_SLICE: Duration = Duration::from_millis(25);

/// Handle for the polling thread. Dropping without `stop` detaches the
/// thread; the session handle always stops it explicitly.
pub struct DetectionPoller {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DetectionPoller {
    pub(crate) fn spawn(core: Arc<SessionCore>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || run_poller(core, interval, shutdown_thread));
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Stop the loop and wait for the thread. After this returns, no further
    /// detector calls can occur.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("detection poller thread panicked"))?;
        }
        Ok(())
    }
}

fn run_poller(core: Arc<SessionCore>, interval: Duration, shutdown: Arc<AtomicBool>) {
    log::debug!("detection poller started (interval {:?})", interval);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let started = Instant::now();
        core.poll_once();
        while started.elapsed() < interval {
            if shutdown.load(Ordering::SeqCst) {
                log::debug!("detection poller stopped");
                return;
            }
            let remaining = interval.saturating_sub(started.elapsed());
            std::thread::sleep(remaining.min(STOP_POLL_SLICE));
        }
    }
    log::debug!("detection poller stopped");
}
