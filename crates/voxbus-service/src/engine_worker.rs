//! Dedicated thread for blocking engine work.
//!
//! Engine startup can block for seconds, so it never runs on the control
//! loop. Jobs run one at a time in submission order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::errors::ServiceError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct EngineWorker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EngineWorker {
    pub fn spawn(name: &str) -> Result<Self, ServiceError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for job in rx {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("engine worker job panicked");
                    }
                }
                debug!("engine worker exiting");
            })
            .map_err(|e| ServiceError::Worker(e.to_string()))?;
        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ServiceError> {
        let tx = self
            .jobs
            .as_ref()
            .ok_or_else(|| ServiceError::Worker("worker is shutting down".into()))?;
        tx.send(Box::new(job))
            .map_err(|_| ServiceError::Worker("worker thread exited".into()))
    }

    /// Stop taking jobs and wait up to `timeout` for the thread to exit.
    /// Returns `false` if it was still busy; the thread is then detached.
    pub fn join(mut self, timeout: Duration) -> bool {
        drop(self.jobs.take());
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(?timeout, "engine worker did not finish, detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        thread.join().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_jobs_in_order_and_joins() {
        let worker = EngineWorker::spawn("test-worker").unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            worker.submit(move || seen.lock().push(i)).unwrap();
        }
        assert!(worker.join(Duration::from_secs(2)));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn survives_a_panicking_job() {
        let worker = EngineWorker::spawn("test-worker").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        worker.submit(|| panic!("boom")).unwrap();
        let c = count.clone();
        worker
            .submit(move || {
                let _ = c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(worker.join(Duration::from_secs(2)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn join_times_out_on_stuck_job() {
        let worker = EngineWorker::spawn("test-worker").unwrap();
        worker
            .submit(|| thread::sleep(Duration::from_millis(500)))
            .unwrap();
        assert!(!worker.join(Duration::from_millis(50)));
    }
}
