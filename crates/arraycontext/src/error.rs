//! Error taxonomy shared by the registry, the traversal engine, and the namespace.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors raised by the container protocol and the array-context facade.
#[derive(Debug, Error)]
pub enum Error {
    /// Duplicate or otherwise invalid registration of a container or leaf type.
    #[error("cannot register `{type_name}`: {reason}")]
    Registration {
        type_name: &'static str,
        reason: String,
    },
    /// `decompose` was called on a leaf or an unregistered type.
    #[error("`{type_name}` is not an array container")]
    NotAContainer { type_name: &'static str },
    /// Multi-argument traversal over incompatible container structures.
    #[error("container structure mismatch: {0}")]
    StructureMismatch(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("value error: {0}")]
    Value(String),
    #[error("index error: {0}")]
    Index(String),
    /// The core declines an operation or flag combination.
    #[error("{op} is not implemented: {reason}")]
    NotImplemented { op: &'static str, reason: String },
    /// Name lookup on the namespace failed.
    #[error("array namespace has no function `{0}`")]
    Attribute(String),
    /// Failure reported by the backend, passed through unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn registration(type_name: &'static str, reason: impl Into<String>) -> Self {
        Error::Registration {
            type_name,
            reason: reason.into(),
        }
    }

    pub fn mismatch(message: impl Into<String>) -> Self {
        Error::StructureMismatch(message.into())
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Error::Value(message.into())
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Error::Index(message.into())
    }

    pub fn not_implemented(op: &'static str, reason: impl Into<String>) -> Self {
        Error::NotImplemented {
            op,
            reason: reason.into(),
        }
    }

    /// Returns `true` for refusals from either the core or a backend.
    pub fn is_not_implemented(&self) -> bool {
        matches!(
            self,
            Error::NotImplemented { .. } | Error::Backend(BackendError::Unimplemented { .. })
        )
    }

    pub(crate) fn empty_container(type_name: &'static str) -> Self {
        Error::Value(format!(
            "container of type `{type_name}` has no parts; empty containers cannot be traversed"
        ))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
