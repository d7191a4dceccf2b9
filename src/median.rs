use std::cmp::Ordering;

use crate::metric::Scalar;

/// Compare two distances that are known not to be NaN.
pub(crate) fn cmp_distance<F: Scalar>(x: &F, y: &F) -> Ordering {
    x.partial_cmp(y).unwrap_or(Ordering::Equal)
}

/// Return the median of `distances`: the element that would sit at index
/// `len / 2` once sorted ascending, so even counts take the upper of the
/// two middle values.
///
/// Reorders `distances` in place. Returns `None` when empty.
///
/// ```
/// use metric_tree::determine_median;
/// assert_eq!(determine_median(&mut [1.0]), Some(1.0));
/// assert_eq!(determine_median(&mut [2.0, 1.0]), Some(2.0));
/// assert_eq!(determine_median(&mut [3.0, 1.0, 2.0]), Some(2.0));
/// assert_eq!(determine_median(&mut [4.0, 1.0, 3.0, 2.0]), Some(3.0));
/// assert_eq!(determine_median::<f64>(&mut []), None);
/// ```
pub fn determine_median<F: Scalar>(distances: &mut [F]) -> Option<F> {
    if distances.is_empty() {
        return None;
    }
    let k = distances.len() / 2;
    Some(*order_stat::kth_by(distances, k, cmp_distance::<F>))
}
