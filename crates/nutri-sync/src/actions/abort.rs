//! Cancellation for in-flight remote writes

use tokio::sync::watch;

/// Triggers cancellation of every signal subscribed to it
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Observes an `AbortHandle`
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal tied to this handle
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle aborts; never resolves if the handle is
    /// dropped without aborting
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
