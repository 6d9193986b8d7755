//! Error types and result alias for the crate.
//!
//! This module defines [`enum@crate::error::Error`] and the crate-wide [Result] alias.
//! Most failure modes in a compositing cycle are recovered locally and only show up as a
//! layer that stays dirty; the variants here are what reaches the caller: invalid
//! configuration, rejected layer descriptions, unknown ids, and scheduling violations.
use thiserror::Error;

use crate::backend::BackendError;
use crate::layer::LayerId;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid layer '{name}': {reason}")]
    InvalidLayer { name: String, reason: String },

    #[error("unknown layer {id}")]
    UnknownLayer { id: LayerId },

    #[error("resource '{resource}' is not ready")]
    ResourceNotReady { resource: String },

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("layer {id} has degenerate bounds")]
    InvalidGeometry { id: LayerId },

    #[error("scheduling violation: {0}")]
    SchedulingViolation(String),

    #[error("terrain did not settle within {ticks} ticks")]
    Stalled { ticks: u64 },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Other(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_uses_other_variant() {
        let err: Error = String::from("boom").into();
        matches!(err, Error::Other(_))
            .then_some(())
            .expect("expected Other variant");
    }

    #[test]
    fn unknown_layer_message_names_the_layer() {
        let err = Error::UnknownLayer { id: LayerId(7) };
        assert_eq!(err.to_string(), "unknown layer layer#7");
    }

    #[test]
    fn backend_errors_convert_transparently() {
        let err: Error = BackendError::OutOfMemory {
            label: "staging".into(),
        }
        .into();
        assert!(matches!(err, Error::Backend(BackendError::OutOfMemory { .. })));
        assert!(err.to_string().contains("staging"));
    }
}
