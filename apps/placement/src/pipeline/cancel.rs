//! Run cancellation. A run is only ever aborted between stages; the in-flight model
//! call is raced against the signal so its connection is dropped promptly.

use tokio::sync::watch;

/// Caller side of a run's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }
}

/// Pipeline side of a run's cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    rx: watch::Receiver<bool>,
}

pub fn cancellation() -> (CancelHandle, RunCancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, RunCancellation { rx })
}

impl RunCancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        RunCancellation { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled. Pends forever if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
