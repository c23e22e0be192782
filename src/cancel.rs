use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A cooperative stop signal that remembers why it was raised.
///
/// The first [`CancelSignal::cancel_with`] wins; later causes are dropped.
/// Cancelling a signal cancels every [`CancelSignal::child`], but not the
/// other way around.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    cause: Arc<Mutex<Option<Error>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            cause: Default::default(),
        }
    }

    /// Cancels without a cause: [`CancelSignal::take_cause`] yields
    /// [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Records `cause` unless one is already set, then cancels.
    pub fn cancel_with(&self, cause: Error) {
        {
            let mut slot = self.cause.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() && !self.token.is_cancelled() {
                *slot = Some(cause);
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err` with the terminating cause once cancelled.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(self.take_cause())
        } else {
            Ok(())
        }
    }

    pub fn take_cause(&self) -> Error {
        self.cause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or(Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn first_cause_wins() {
        let signal = CancelSignal::new();
        assert!(signal.check().is_ok());

        signal.cancel_with(Error::remote(Stage::UploadBlock(1), "first"));
        signal.cancel_with(Error::remote(Stage::UploadBlock(2), "second"));

        assert!(signal.is_cancelled());
        let cause = signal.take_cause();
        assert_eq!(cause.stage(), Some(Stage::UploadBlock(1)));
    }

    #[test]
    fn plain_cancel_is_a_cancellation() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel_with(Error::remote(Stage::Create, "too late"));
        assert!(signal.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn parent_cancels_child_only() {
        let parent = CancelSignal::new();
        let child = parent.child();
        child.cancel_with(Error::NotSupported);
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(other.take_cause().is_cancelled());
    }
}
