use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::owners::OwnerId;

/// An error value caught from an external executor.
///
/// Executors run user code, so the payload is an opaque `Rc<dyn Any>` that the
/// owning scope's error boundary can downcast. The error is cheap to clone so
/// that every awaiter of a failed chore receives it.
#[derive(Clone)]
pub struct CapturedError {
    message: Rc<str>,
    payload: Rc<dyn Any>,
}

impl CapturedError {
    /// Capture an error with a display message and no structured payload.
    pub fn new(message: impl Into<Rc<str>>) -> Self {
        let message = message.into();
        Self {
            payload: Rc::new(message.clone()),
            message,
        }
    }

    /// Capture an error carrying an opaque payload for the error boundary.
    pub fn with_payload(message: impl Into<Rc<str>>, payload: Rc<dyn Any>) -> Self {
        Self {
            message: message.into(),
            payload,
        }
    }

    /// The display message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The opaque payload attached to this error.
    pub fn payload(&self) -> &Rc<dyn Any> {
        &self.payload
    }

    /// Downcast the payload to a concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl std::error::Error for CapturedError {}

impl From<&str> for CapturedError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CapturedError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors the scheduler itself can report.
///
/// Executor failures are recovered per-chore through the owner's error
/// boundary and never bubble out of the drain loop. Reentrant draining is a
/// scheduler bug and fails fast with an assertion instead of appearing here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// A chore referenced an owner outside the scope currently being streamed.
    ///
    /// Streamed output cannot be amended after the fact, so the chore is
    /// ordered last and the violation is recorded for the render pass.
    #[error("chore owned by {0:?} is outside the active render stream")]
    OrderingViolation(OwnerId),

    /// An executor failed while running a chore. The owning scope's error
    /// boundary has already been notified.
    #[error("executor failed: {0}")]
    ExecutorFailure(CapturedError),
}
