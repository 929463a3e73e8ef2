use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::error;

/// Invoked when teardown overruns its deadline.
pub type KillAction = Arc<dyn Fn() + Send + Sync>;

/// Terminates the process.
pub fn exit_process() -> KillAction {
    Arc::new(|| std::process::exit(1))
}

/// Fires `kill` unless disarmed within `deadline`.
pub struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
}

impl Watchdog {
    pub fn arm(deadline: Duration, kill: KillAction) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("voxbus-watchdog".into())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(deadline) {
                    error!(?deadline, "shutdown deadline exceeded, terminating");
                    kill();
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to start shutdown watchdog");
        }
        Self { disarm: Some(tx) }
    }

    pub fn disarm(mut self) {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn flag_action() -> (KillAction, Arc<AtomicBool>) {
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        (Arc::new(move || f.store(true, Ordering::SeqCst)), fired)
    }

    #[test]
    fn fires_after_deadline() {
        let (kill, fired) = flag_action();
        let _dog = Watchdog::arm(Duration::from_millis(20), kill);
        thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn disarmed_in_time_never_fires() {
        let (kill, fired) = flag_action();
        let dog = Watchdog::arm(Duration::from_millis(100), kill);
        dog.disarm();
        thread::sleep(Duration::from_millis(200));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
