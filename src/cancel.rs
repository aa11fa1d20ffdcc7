// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use log::warn;
use tokio::sync::watch;

/// Owning side of a cancellation signal; dropping it does NOT cancel.
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

/// Cooperative cancellation token handed to every I/O call in a run.
///
/// Cancellation is one-way: once signalled the token never resets.
#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationSource {
    #[must_use]
    pub fn new() -> (CancellationSource, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (CancellationSource { tx }, CancellationToken { rx })
    }

    pub fn cancel(&self) {
        // Receivers may all be gone if the run already completed; that's fine.
        let _ = self.tx.send(true);
    }

    /// Spawn a watchdog that cancels after `deadline`.
    pub fn arm_deadline(&self, deadline: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if tx.send(true).is_ok() {
                warn!("run deadline of {deadline:?} exceeded, cancelling");
            }
        });
    }
}

impl CancellationToken {
    /// A token that can never be cancelled; used by tests and one-shot tools.
    #[must_use]
    pub fn never() -> CancellationToken {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the token's lifetime.
        std::mem::forget(tx);
        CancellationToken { rx }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the token is cancelled; pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Source dropped without cancelling; never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep that aborts early on cancellation; returns false when cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed() {
        let (source, token) = CancellationSource::new();
        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await; // must not hang
    }

    #[tokio::test]
    async fn sleep_aborts_on_cancel() {
        let (source, token) = CancellationSource::new();
        let waiter = tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await });
        source.cancel();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn never_token_is_quiet() {
        let token = CancellationToken::never();
        assert!(!token.is_cancelled());
        assert!(token.sleep(Duration::from_millis(1)).await);
    }
}
