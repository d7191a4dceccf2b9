//! Bookkeeping and search shared by every metric tree.
//!
//! A concrete tree supplies its nodes, the oracle call against a node, and
//! a pruning rule ([`MetricNode::push_child_candidates`]). Range search,
//! containment and traversal are written once on top of those.
use std::fmt;

use num::Zero;

use crate::error::{MetricTreeError, Result};
use crate::median::cmp_distance;
use crate::metric::Scalar;

/// An indexed object together with its distance to a query.
pub struct Neighbor<'a, T, D> {
    pub item: &'a T,
    pub distance: D,
}

impl<'a, T, D: Copy> Clone for Neighbor<'a, T, D> {
    fn clone(&self) -> Self {
        Neighbor {
            item: self.item,
            distance: self.distance,
        }
    }
}

impl<'a, T, D: Copy> Copy for Neighbor<'a, T, D> {}

impl<'a, T: fmt::Debug, D: fmt::Debug> fmt::Debug for Neighbor<'a, T, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Neighbor")
            .field("item", self.item)
            .field("distance", &self.distance)
            .finish()
    }
}

/// Search results along with the number of oracle calls the query made.
#[derive(Debug)]
pub struct SearchOutcome<'a, T, D> {
    pub neighbors: Vec<Neighbor<'a, T, D>>,
    pub distance_calls: usize,
}

impl<'a, T, D> SearchOutcome<'a, T, D> {
    pub(crate) fn empty() -> Self {
        SearchOutcome {
            neighbors: Vec::new(),
            distance_calls: 0,
        }
    }
}

pub trait MetricNode: Sized {
    type Item;
    type Distance: Scalar;

    /// Objects stored at this node, all at distance zero from each other.
    /// The first one is the node's vantage point.
    fn values(&self) -> &[Self::Item];

    /// Append this node's children to `out`, in traversal order.
    fn push_children<'a>(&'a self, out: &mut Vec<&'a Self>);

    /// Append the children that may hold objects within
    /// `[min_dist, max_dist]` of a query lying `distance` away from this
    /// node's vantage point.
    fn push_child_candidates<'a>(
        &'a self,
        distance: Self::Distance,
        min_dist: Self::Distance,
        max_dist: Self::Distance,
        out: &mut Vec<&'a Self>,
    );

    /// Number of objects in this subtree.
    fn size(&self) -> usize;

    /// Longest path from this node down to a leaf, counting both ends.
    fn height(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn is_root(&self) -> bool;

    fn is_leaf(&self) -> bool {
        let mut children = Vec::new();
        self.push_children(&mut children);
        children.is_empty()
    }
}

fn check_range<D: Scalar>(min_dist: D, max_dist: D) -> Result<()> {
    if D::zero() <= min_dist && min_dist <= max_dist {
        Ok(())
    } else {
        Err(MetricTreeError::InvalidRange {
            min: min_dist.to_f64().unwrap_or(f64::NAN),
            max: max_dist.to_f64().unwrap_or(f64::NAN),
        })
    }
}

pub trait MetricTree<T> {
    type Distance: Scalar;
    type Node: MetricNode<Item = T, Distance = Self::Distance>;

    /// The root node, or `None` for an empty tree.
    fn root(&self) -> Option<&Self::Node>;

    /// Distance from `query` to the vantage point of `node`.
    fn distance(&self, query: &T, node: &Self::Node) -> Result<Self::Distance>;

    /// Add a single object without rebuilding.
    ///
    /// Trees that can only be built in bulk keep this default, which always
    /// fails with [`MetricTreeError::Unsupported`].
    fn insert(&mut self, _object: T) -> Result<()> {
        Err(MetricTreeError::Unsupported("insert"))
    }

    /// All indexed objects whose distance to `query` lies in
    /// `[min_dist, max_dist]`, sorted ascending by distance. Objects at the
    /// same distance keep the order in which the traversal found them.
    fn range_search_with_stats<'a>(
        &'a self,
        query: &T,
        min_dist: Self::Distance,
        max_dist: Self::Distance,
    ) -> Result<SearchOutcome<'a, T, Self::Distance>>
    where
        T: 'a,
    {
        check_range(min_dist, max_dist)?;
        let mut outcome = SearchOutcome::empty();
        let root = match self.root() {
            Some(root) => root,
            None => return Ok(outcome),
        };

        let mut candidates = vec![root];
        while let Some(node) = candidates.pop() {
            let distance = self.distance(query, node)?;
            outcome.distance_calls += 1;
            if min_dist <= distance && distance <= max_dist {
                outcome
                    .neighbors
                    .extend(node.values().iter().map(|item| Neighbor { item, distance }));
            }
            node.push_child_candidates(distance, min_dist, max_dist, &mut candidates);
        }

        outcome
            .neighbors
            .sort_by(|a, b| cmp_distance(&a.distance, &b.distance));
        log::trace!(
            "range search [{}, {}]: {} hits, {} distance calls",
            min_dist,
            max_dist,
            outcome.neighbors.len(),
            outcome.distance_calls
        );
        Ok(outcome)
    }

    fn range_search<'a>(
        &'a self,
        query: &T,
        min_dist: Self::Distance,
        max_dist: Self::Distance,
    ) -> Result<Vec<Neighbor<'a, T, Self::Distance>>>
    where
        T: 'a,
    {
        Ok(self
            .range_search_with_stats(query, min_dist, max_dist)?
            .neighbors)
    }

    /// Equivalent to `range_search(query, 0, max_dist)`.
    fn search<'a>(
        &'a self,
        query: &T,
        max_dist: Self::Distance,
    ) -> Result<Vec<Neighbor<'a, T, Self::Distance>>>
    where
        T: 'a,
    {
        self.range_search(query, Self::Distance::zero(), max_dist)
    }

    /// Whether some indexed object is at distance zero from `object`.
    ///
    /// Equality is whatever the metric says it is, not identity.
    fn contains<'a>(&'a self, object: &T) -> Result<bool>
    where
        T: 'a,
    {
        let zero = Self::Distance::zero();
        Ok(!self.range_search(object, zero, zero)?.is_empty())
    }

    /// Pre-order iterator over the indexed objects.
    fn values<'a>(&'a self) -> Values<'a, Self::Node>
    where
        T: 'a,
    {
        Values::new(self.root())
    }

    /// Pre-order iterator over the nodes.
    fn nodes<'a>(&'a self) -> Nodes<'a, Self::Node>
    where
        T: 'a,
    {
        Nodes::new(self.root())
    }

    fn size(&self) -> usize {
        self.root().map_or(0, |root| root.size())
    }

    fn height(&self) -> usize {
        self.root().map_or(0, |root| root.height())
    }

    fn num_nodes(&self) -> usize {
        self.root().map_or(0, |root| root.num_nodes())
    }

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Pre-order node iterator, children visited in the order the node
/// reports them.
pub struct Nodes<'a, N: 'a> {
    stack: Vec<&'a N>,
}

impl<'a, N: MetricNode + 'a> Nodes<'a, N> {
    pub(crate) fn new(root: Option<&'a N>) -> Self {
        Nodes {
            stack: root.into_iter().collect(),
        }
    }
}

impl<'a, N: MetricNode + 'a> Iterator for Nodes<'a, N> {
    type Item = &'a N;

    fn next(&mut self) -> Option<&'a N> {
        let node = self.stack.pop()?;
        let start = self.stack.len();
        node.push_children(&mut self.stack);
        self.stack[start..].reverse();
        Some(node)
    }
}

pub struct Values<'a, N: MetricNode + 'a> {
    nodes: Nodes<'a, N>,
    current: std::slice::Iter<'a, N::Item>,
}

impl<'a, N: MetricNode + 'a> Values<'a, N> {
    pub(crate) fn new(root: Option<&'a N>) -> Self {
        Values {
            nodes: Nodes::new(root),
            current: <&[N::Item]>::default().iter(),
        }
    }
}

impl<'a, N: MetricNode + 'a> Iterator for Values<'a, N> {
    type Item = &'a N::Item;

    fn next(&mut self) -> Option<&'a N::Item> {
        loop {
            if let Some(value) = self.current.next() {
                return Some(value);
            }
            self.current = self.nodes.next()?.values().iter();
        }
    }
}
