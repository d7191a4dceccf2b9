//! The distance oracle a metric tree is built on.
use std::convert::Infallible;
use std::fmt::{Debug, Display};
use std::panic::{self, AssertUnwindSafe};

use crate::error::{InvalidDistance, MetricTreeError, OraclePanic, Result};
pub use num::Float;
use num::{ToPrimitive, Zero};

pub trait Scalar: Float + Debug + Display + Send + Sync {}
impl<T: Float + Debug + Display + Send + Sync> Scalar for T {}

/// A distance function over `T`.
///
/// Implementations must be pure and deterministic, with `distance(a, a) == 0`.
/// Symmetry and the triangle inequality are assumed by the search pruning;
/// a metric violating them may cause matches to be missed, but is not
/// detected.
pub trait Metric<T> {
    type Distance: Scalar;
    type Error: std::error::Error + Send + Sync + 'static;

    fn distance(&self, a: &T, b: &T) -> std::result::Result<Self::Distance, Self::Error>;
}

impl<T, F, D> Metric<T> for F
where
    F: Fn(&T, &T) -> D,
    D: Scalar,
{
    type Distance = D;
    type Error = Infallible;

    fn distance(&self, a: &T, b: &T) -> std::result::Result<D, Infallible> {
        Ok(self(a, b))
    }
}

/// Adapts a closure returning `Result` into a [`Metric`].
///
/// ```
/// use metric_tree::{Fallible, VpTree};
///
/// #[derive(Debug)]
/// struct Mismatch;
/// impl std::fmt::Display for Mismatch {
///     fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
///         write!(f, "length mismatch")
///     }
/// }
/// impl std::error::Error for Mismatch {}
///
/// let hamming = Fallible(|a: &String, b: &String| {
///     if a.len() != b.len() {
///         return Err(Mismatch);
///     }
///     Ok(a.chars().zip(b.chars()).filter(|(x, y)| x != y).count() as f64)
/// });
/// let words = vec!["abc".to_string(), "abd".to_string(), "xyzw".to_string()];
/// assert!(VpTree::new(words, hamming).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Fallible<F>(pub F);

impl<T, F, D, E> Metric<T> for Fallible<F>
where
    F: Fn(&T, &T) -> std::result::Result<D, E>,
    D: Scalar,
    E: std::error::Error + Send + Sync + 'static,
{
    type Distance = D;
    type Error = E;

    fn distance(&self, a: &T, b: &T) -> std::result::Result<D, E> {
        (self.0)(a, b)
    }
}

/// Invoke the oracle, converting every way it can fail into
/// `UnindexableObject`.
pub(crate) fn measure<T, M>(metric: &M, a: &T, b: &T) -> Result<M::Distance>
where
    M: Metric<T>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| metric.distance(a, b)));
    let err = match outcome {
        Ok(Ok(d)) if d >= M::Distance::zero() => return Ok(d),
        Ok(Ok(d)) => MetricTreeError::unindexable(InvalidDistance(d.to_f64().unwrap_or(f64::NAN))),
        Ok(Err(e)) => MetricTreeError::unindexable(e),
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            MetricTreeError::unindexable(OraclePanic(msg))
        }
    };
    log::warn!("distance oracle failed: {}", err);
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug)]
    struct Refused;

    impl Display for Refused {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "refused")
        }
    }

    impl std::error::Error for Refused {}

    fn abs_diff(a: &f64, b: &f64) -> f64 {
        (a - b).abs()
    }

    #[test]
    fn closure_is_a_metric() {
        assert_eq!(measure(&abs_diff, &1.0f64, &3.5).unwrap(), 2.5);
    }

    #[test]
    fn oracle_error_is_wrapped() {
        let m = Fallible(|_: &f64, _: &f64| -> std::result::Result<f64, Refused> { Err(Refused) });
        let err = measure(&m, &1.0f64, &2.0).unwrap_err();
        match err {
            MetricTreeError::UnindexableObject { ref cause } => {
                assert!(cause.downcast_ref::<Refused>().is_some());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.source().is_some());
    }

    #[test]
    fn negative_and_nan_distances_are_rejected() {
        let neg = |_: &f64, _: &f64| -1.0f64;
        let nan = |_: &f64, _: &f64| f64::NAN;
        assert!(matches!(
            measure(&neg, &0.0f64, &0.0),
            Err(MetricTreeError::UnindexableObject { .. })
        ));
        assert!(matches!(
            measure(&nan, &0.0f64, &0.0),
            Err(MetricTreeError::UnindexableObject { .. })
        ));
    }

    #[test]
    fn panics_are_caught() {
        let m = |_: &f64, _: &f64| -> f64 { panic!("boom") };
        match measure(&m, &0.0f64, &1.0) {
            Err(MetricTreeError::UnindexableObject { cause }) => {
                let p = cause.downcast_ref::<OraclePanic>().unwrap();
                assert_eq!(p.0, "boom");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
