//! Single-flight background jobs.
//!
//! A [`JobSlot`] runs at most one job at a time on a worker thread. The job
//! receives a [`CancelToken`] it is expected to poll between phases; the
//! token trips when the handle cancels it or when the optional deadline
//! passes. The outcome arrives exactly once through a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` or `Err(TimedOut)` once the job should stop.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Error::TimedOut),
            _ => Ok(()),
        }
    }
}

/// Clears the busy flag when the worker finishes, panics included.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a running job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: mpsc::Receiver<Result<T>>,
    token: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
    finished: bool,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Wait up to `timeout` for the outcome. Returns it once; later calls
    /// return None.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<T>> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.finish();
                Some(result)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.finish();
                Some(Err(worker_lost()))
            }
        }
    }

    /// Block until the job completes.
    pub fn wait(mut self) -> Result<T> {
        if self.finished {
            return Err(Error::Validation("job result was already taken".into()));
        }
        let result = self.rx.recv().unwrap_or_else(|_| Err(worker_lost()));
        self.finish();
        result
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_lost() -> Error {
    Error::Backend("worker stopped without reporting a result".into())
}

#[derive(Debug, Clone, Default)]
pub struct JobSlot {
    busy: Arc<AtomicBool>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start `job` on a worker thread. Fails with [`Error::Busy`] while a
    /// previous job is still running.
    pub fn start<T, F>(&self, timeout: Option<Duration>, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let token = match timeout {
            Some(t) => CancelToken::with_timeout(t),
            None => CancelToken::new(),
        };
        let (tx, rx) = mpsc::channel();
        let guard = BusyGuard(Arc::clone(&self.busy));
        let worker_token = token.clone();

        let worker = thread::Builder::new()
            .name("ecocond-job".into())
            .spawn(move || {
                let result = worker_token.check().and_then(|_| job(&worker_token));
                debug!(ok = result.is_ok(), "background job finished");
                drop(guard);
                // The handle may already be gone.
                let _ = tx.send(result);
            })?;

        Ok(JobHandle {
            rx,
            token,
            worker: Some(worker),
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_result_is_delivered() {
        let slot = JobSlot::new();
        let handle = slot.start(None, |_| Ok(21 * 2)).unwrap();
        assert_eq!(handle.wait().unwrap(), 42);
        assert!(!slot.is_busy());
    }

    #[test]
    fn second_start_while_busy_is_rejected() {
        let slot = JobSlot::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = slot
            .start(None, move |_| {
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();

        assert!(slot.is_busy());
        assert!(matches!(slot.start(None, |_| Ok(())), Err(Error::Busy)));

        release_tx.send(()).unwrap();
        handle.wait().unwrap();
        assert!(!slot.is_busy());
        slot.start(None, |_| Ok(())).unwrap().wait().unwrap();
    }

    #[test]
    fn cancellation_is_observed_by_the_job() {
        let slot = JobSlot::new();
        let handle = slot
            .start(None, |token: &CancelToken| -> Result<()> {
                loop {
                    token.check()?;
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        handle.cancel();
        assert!(matches!(handle.wait(), Err(Error::Cancelled)));
    }

    #[test]
    fn deadline_stops_the_job() {
        let slot = JobSlot::new();
        let handle = slot
            .start(Some(Duration::from_millis(20)), |token: &CancelToken| -> Result<()> {
                loop {
                    token.check()?;
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        assert!(matches!(handle.wait(), Err(Error::TimedOut)));
    }

    #[test]
    fn outcome_is_reported_once() {
        let slot = JobSlot::new();
        let mut handle = slot.start(None, |_| Ok(7)).unwrap();
        let first = handle.wait_timeout(Duration::from_secs(5));
        assert!(matches!(first, Some(Ok(7))));
        assert!(handle.wait_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn panicking_job_releases_the_slot() {
        let slot = JobSlot::new();
        let handle = slot
            .start(None, |_| -> Result<()> { panic!("boom") })
            .unwrap();
        assert!(matches!(handle.wait(), Err(Error::Backend(_))));
        assert!(!slot.is_busy());
    }
}
