//! Metric trees: similarity search over any collection of objects given
//! only a distance function between them.
//!
//! ```
//! use metric_tree::{MetricTree, VpTree};
//!
//! let points = vec![1.0f64, 4.0, 9.0, 16.0, 25.0];
//! let tree = VpTree::new(points, |a: &f64, b: &f64| (a - b).abs()).unwrap();
//!
//! let hits = tree.search(&10.0, 6.0).unwrap();
//! let found: Vec<f64> = hits.iter().map(|n| *n.item).collect();
//! assert_eq!(found, vec![9.0, 4.0, 16.0]);
//! ```
pub mod error;
pub mod median;
pub mod metric;
pub mod tree;
pub mod vptree;

pub use error::{BoxError, InvalidDistance, MetricTreeError, OraclePanic, Result};
pub use median::determine_median;
pub use metric::{Fallible, Float, Metric, Scalar};
pub use tree::{MetricNode, MetricTree, Neighbor, Nodes, SearchOutcome, Values};
pub use vptree::{BuildStats, VpNode, VpTree, VpTreeBuilder, VpTreeConfig};
