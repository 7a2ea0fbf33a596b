use thiserror::Error;

use crate::config::ConfigError;
use crate::core::error::{ActivationError, EmitError, RequestError};
use crate::pool::PoolError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/overload).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // Binding, shape, and analysis refusals never heal on retry.
            Error::Activation(_) | Error::Config(_) => Transience::Permanent,
            Error::Emit(EmitError::Pool(e)) | Error::Pool(e) => pool_transience(e),
            Error::Emit(_) => Transience::Permanent,
            Error::Request(RequestError::Emit(EmitError::Pool(e))) => pool_transience(e),
            Error::Request(RequestError::Emit(_)) => Transience::Permanent,
            Error::Request(_) => Transience::Unknown,
        }
    }
}

fn pool_transience(err: &PoolError) -> Transience {
    match err {
        PoolError::QueueFull { .. } => Transience::Retryable,
        PoolError::ShutDown { .. } => Transience::Permanent,
    }
}
