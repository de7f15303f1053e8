//! Background worker that coalesces sync requests.
//!
//! Requests arriving close together collapse into one pass: the pass starts
//! once no request arrived for `debounce`, or at the latest `max_delay` after
//! the first request of the burst. Requests made while a pass runs queue
//! exactly one follow-up pass.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::SyncTiming;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Pending {
    /// First request of the current burst
    first: Option<Instant>,
    /// Most recent request
    last: Option<Instant>,
    running: bool,
    closed: bool,
    timing: SyncTiming,
}

impl Pending {
    fn deadline(&self) -> Option<Instant> {
        let first = self.first?;
        let last = self.last.unwrap_or(first);
        Some((last + self.timing.debounce()).min(first + self.timing.max_delay()))
    }
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-consumer scheduler running sync passes on a tokio task.
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the worker. `job` runs one pass; it is never called twice at
    /// the same time. Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(timing: SyncTiming, span: tracing::Span, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                timing,
                ..Pending::default()
            }),
            wake: Notify::new(),
        });

        let worker = tokio::spawn(run(Arc::clone(&shared), job).instrument(span));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Ask for a pass. Never waits for the pass itself.
    pub fn request(&self) -> Result<()> {
        {
            let mut pending = self.shared.lock();
            if pending.closed {
                return Err(Error::RepositoryClosed);
            }
            let now = Instant::now();
            pending.first.get_or_insert(now);
            pending.last = Some(now);
            tracing::trace!(running = pending.running, "Sync requested");
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn set_timing(&self, timing: SyncTiming) {
        self.shared.lock().timing = timing;
        self.shared.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Whether a pass is running right now.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Stop accepting requests, let a running pass finish and wait for the
    /// worker to exit. Requests that did not start yet are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.close();
        let worker = self.take_worker();
        if let Some(worker) = worker {
            worker.await.map_err(|error| {
                Error::Invariant(format!("sync worker ended abnormally: {error}"))
            })?;
        }
        tracing::debug!("Sync worker stopped");
        Ok(())
    }

    /// Abort the worker without waiting. Safe to call repeatedly and after a
    /// failed [`Dispatcher::shutdown`].
    pub fn kill(&self) {
        self.close();
        if let Some(worker) = self.take_worker() {
            worker.abort();
            tracing::debug!("Sync worker aborted");
        }
    }

    fn close(&self) {
        {
            let mut pending = self.shared.lock();
            pending.closed = true;
            pending.first = None;
            pending.last = None;
        }
        self.shared.wake.notify_one();
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn run<F, Fut>(shared: Arc<Shared>, job: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        // Wait until a burst is due.
        loop {
            let deadline = {
                let pending = shared.lock();
                if pending.closed {
                    return;
                }
                pending.deadline()
            };

            match deadline {
                None => shared.wake.notified().await,
                Some(deadline) if Instant::now() >= deadline => break,
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        () = shared.wake.notified() => {}
                    }
                }
            }
        }

        {
            let mut pending = shared.lock();
            pending.first = None;
            pending.last = None;
            pending.running = true;
        }

        job().await;

        shared.lock().running = false;
    }
}
