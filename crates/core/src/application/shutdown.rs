// Run Interruption Token
// Units check it between steps; there is no mid-step cancellation.

use tokio::sync::watch;

/// Interruption signal observed by every unit worker
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if interruption was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal (returns immediately if already sent)
    pub async fn wait(&mut self) {
        if self.is_shutdown() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Interruption sender, held by the driver (e.g. wired to Ctrl+C)
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Ask all units to stop before their next step
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create an interruption channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
