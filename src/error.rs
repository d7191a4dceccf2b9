use std::error::Error as StdError;
use thiserror::Error;

/// Boxed failure raised by a distance oracle.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur while building or querying a metric tree.
#[derive(Debug, Error)]
pub enum MetricTreeError {
    #[error("invalid search range [{min}, {max}]: expected 0 <= min <= max")]
    InvalidRange { min: f64, max: f64 },

    /// The distance oracle failed. The operation that triggered it was
    /// abandoned without committing anything.
    #[error("cannot calculate distance: {cause}")]
    UnindexableObject {
        #[source]
        cause: BoxError,
    },

    #[error("operation `{0}` is not supported by this tree")]
    Unsupported(&'static str),

    /// A node without values was asked for a distance. Never produced by a
    /// well-formed tree.
    #[error("node is empty, cannot calculate distance")]
    EmptyNodeDistance,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MetricTreeError {
    pub(crate) fn unindexable<E>(cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        MetricTreeError::UnindexableObject {
            cause: cause.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MetricTreeError>;

/// The oracle panicked; carries the panic message when it was a string.
#[derive(Debug, Error)]
#[error("distance oracle panicked: {0}")]
pub struct OraclePanic(pub String);

/// The oracle returned a negative or NaN distance.
#[derive(Debug, Error)]
#[error("distance oracle returned {0}, expected a non-negative number")]
pub struct InvalidDistance(pub f64);
