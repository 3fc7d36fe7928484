use thiserror::Error;

/// Error returned by [`DispatcherHandle::submit`](super::DispatcherHandle::submit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("dispatcher has stopped")]
    Closed,
}
