//! Canonical engine errors (activation, emission, blocking requests).
//!
//! These are bounded and stable: they represent refusal states of the
//! runtime, not implementation details. Reaction-body faults never surface
//! here; they are caught by the scheduler and handled per the retry flag.

use thiserror::Error;

use crate::core::analyzer::AnalysisReport;
use crate::pool::PoolError;

/// A reaction list that cannot be activated regardless of soup contents.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("reaction `{reaction}` has an empty input pattern and is not a singleton initializer")]
    EmptyInputs { reaction: String },

    #[error("blocking input `{molecule}` in reaction `{reaction}` has no reply binder")]
    MissingReplyBinder { reaction: String, molecule: String },

    #[error("reply binder on non-blocking input `{molecule}` in reaction `{reaction}`")]
    ReplyBinderOnNonBlocking { reaction: String, molecule: String },

    #[error("activation requires at least one reaction")]
    NoReactions,
}

/// Why `activate` refused to publish a join definition.
///
/// A failed activation binds nothing: every molecule named by the reaction
/// list is left exactly as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActivationError {
    #[error("molecule `{molecule}` is already bound to {site}")]
    AlreadyBound { molecule: String, site: String },

    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error("static analysis rejected activation: {}", .0.errors.join("; "))]
    Rejected(AnalysisReport),
}

/// Why an emission was refused. Emission never fails for any other reason;
/// everything downstream of the soup insert is handled by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmitError {
    #[error("molecule `{molecule}` is not bound to any join definition")]
    NotBound { molecule: String },

    #[error("join definition owning `{molecule}` is shutting down")]
    ShuttingDown { molecule: String },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Why a blocking request did not produce a reply value.
///
/// A timed-out request is not an error; it surfaces as `Ok(None)` from
/// `request_timeout`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RequestError {
    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("request on `{molecule}` failed: {reason}")]
    Failed { molecule: String, reason: String },

    #[error("reply to `{molecule}` had an unexpected type")]
    ReplyType { molecule: String },
}
