//! Single-fire completion callbacks.
//!
//! Asynchronous operations (`append`, `checkpoint`, `get_checkpoints`,
//! `snapshot`) never return errors across the call boundary. They take a
//! [`Callback`] and invoke it exactly once. `FnOnce` makes the "at most once"
//! half a type-level guarantee; implementations provide the "at least once"
//! half.
//!
//! Callers that prefer blocking can use [`completion`] to get a callback
//! paired with a [`Completion`] handle.

use crate::error::{KeeperError, KeeperResult};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// Callback invoked once when an asynchronous operation finishes.
pub type Callback<T> = Box<dyn FnOnce(KeeperResult<T>) + Send + 'static>;

/// Blocking handle for the result of a [`Callback`] created by [`completion`].
#[derive(Debug)]
pub struct Completion<T> {
    rx: Receiver<KeeperResult<T>>,
}

/// Creates a callback and the completion handle it resolves.
///
/// If the callback is dropped without being invoked, the completion resolves
/// to [`KeeperError::Abandoned`].
pub fn completion<T: Send + 'static>() -> (Callback<T>, Completion<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    let callback: Callback<T> = Box::new(move |result| {
        // The receiver may already be gone; the result is then unobserved.
        let _ = tx.send(result);
    });
    (callback, Completion { rx })
}

impl<T> Completion<T> {
    /// Blocks until the operation completes.
    pub fn wait(self) -> KeeperResult<T> {
        self.rx.recv().unwrap_or(Err(KeeperError::Abandoned))
    }

    /// Blocks for at most `timeout`.
    ///
    /// Returns `None` if the operation has not completed yet, in which case
    /// the handle can be polled again.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<KeeperResult<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(KeeperError::Abandoned)),
        }
    }

    /// Returns the result if the operation has already completed.
    pub fn try_result(&self) -> Option<KeeperResult<T>> {
        self.wait_timeout(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::types::TransactionId;
    use std::thread;

    #[test]
    fn resolves_from_another_thread() {
        let (callback, done) = completion::<TransactionId>();
        thread::spawn(move || callback(Ok(TransactionId::new(3))));
        assert_eq!(done.wait().unwrap(), TransactionId::new(3));
    }

    #[test]
    fn carries_errors() {
        let (callback, done) = completion::<()>();
        callback(Err(ClientError::UnknownTransaction(TransactionId::new(1)).into()));
        assert!(done.wait().unwrap_err().is_client_error());
    }

    #[test]
    fn dropped_callback_is_abandoned() {
        let (callback, done) = completion::<()>();
        drop(callback);
        assert!(matches!(done.wait(), Err(KeeperError::Abandoned)));
    }

    #[test]
    fn pending_completion_times_out() {
        let (callback, done) = completion::<u32>();
        assert!(done.try_result().is_none());
        callback(Ok(5));
        assert_eq!(done.wait_timeout(Duration::from_secs(1)).unwrap().unwrap(), 5);
    }
}
