//! Cancellation scopes for collection cycles
//!
//! A [`CancelHandle`] owns the scope; every [`CancelScope`] cloned from it
//! observes the cancellation. Built on a `watch` channel so late observers
//! still see a cancellation that already happened.

use tokio::sync::watch;

/// Owning side of a cancellation scope
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

/// Observing side, passed through every suspension point
#[derive(Debug, Clone)]
pub struct CancelScope {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelScope) {
        let (sender, receiver) = watch::channel(false);
        (
            Self { sender },
            CancelScope {
                receiver: Some(receiver),
            },
        )
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn scope(&self) -> CancelScope {
        CancelScope {
            receiver: Some(self.sender.subscribe()),
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl CancelScope {
    /// A scope that is never cancelled
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&mut self) {
        match &mut self.receiver {
            // an error means the handle is gone, which counts as cancelled
            Some(receiver) => {
                let _ = receiver.wait_for(|cancelled| *cancelled).await;
            }
            None => std::future::pending().await,
        }
    }
}
