//! Run-level cancellation signal

use tokio::sync::watch;

/// Fires the cancellation; held by whoever may abort the run
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the cancellation; cloned into every controller
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/observer pair
pub fn cancellation() -> (CancelTrigger, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, Cancellation { rx })
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the run is cancelled
    ///
    /// Pends forever if the trigger is dropped without firing.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
