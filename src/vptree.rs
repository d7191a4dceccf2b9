//! Vantage-Point Trees index objects under an arbitrary metric for fast
//! range and k-nearest-neighbor searches.
use std::cmp::{Ord, Ordering, PartialOrd};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use num::{Float, Zero};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{MetricTreeError, Result};
use crate::median::{cmp_distance, determine_median};
use crate::metric::{measure, Metric, Scalar};
use crate::tree::{MetricNode, MetricTree, Neighbor, SearchOutcome, Values};

/// Construction parameters of a [`VpTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpTreeConfig {
    /// Candidate sets larger than this pick their vantage point from a
    /// sample instead of taking the last candidate.
    pub sample_threshold: usize,
    /// Number of leading candidates sampled.
    pub sample_size: usize,
    /// Shuffle the objects with this seed before building.
    pub shuffle_seed: Option<u64>,
    /// Smallest partition built on two threads by `construct_parallel`.
    pub parallel_threshold: usize,
}

impl Default for VpTreeConfig {
    fn default() -> Self {
        VpTreeConfig {
            sample_threshold: 15,
            sample_size: 5,
            shuffle_seed: None,
            parallel_threshold: 1024,
        }
    }
}

impl VpTreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_size < 2 {
            return Err(MetricTreeError::InvalidConfig(format!(
                "sample_size must be at least 2, got {}",
                self.sample_size
            )));
        }
        if self.sample_threshold < self.sample_size {
            return Err(MetricTreeError::InvalidConfig(format!(
                "sample_threshold ({}) must not be smaller than sample_size ({})",
                self.sample_threshold, self.sample_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VpTreeBuilder {
    config: VpTreeConfig,
}

impl VpTreeBuilder {
    pub fn new() -> Self {
        VpTreeBuilder::default()
    }

    pub fn with_config(config: VpTreeConfig) -> Self {
        VpTreeBuilder { config }
    }

    pub fn sample_threshold(mut self, threshold: usize) -> Self {
        self.config.sample_threshold = threshold;
        self
    }

    pub fn sample_size(mut self, size: usize) -> Self {
        self.config.sample_size = size;
        self
    }

    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.config.shuffle_seed = Some(seed);
        self
    }

    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.config.parallel_threshold = threshold;
        self
    }

    pub fn config(&self) -> &VpTreeConfig {
        &self.config
    }

    /// An empty tree holding this configuration, ready for `construct`.
    pub fn empty<T, M: Metric<T>>(self, metric: M) -> Result<VpTree<T, M>> {
        self.config.validate()?;
        Ok(VpTree {
            root: None,
            metric,
            config: self.config,
            build_stats: BuildStats::default(),
        })
    }

    pub fn build<T, M, I>(self, objects: I, metric: M) -> Result<VpTree<T, M>>
    where
        M: Metric<T>,
        I: IntoIterator<Item = T>,
    {
        let mut tree = self.empty(metric)?;
        tree.rebuild(objects, None)?;
        Ok(tree)
    }

    #[cfg(feature = "parallel")]
    pub fn build_parallel<T, M, I>(self, objects: I, metric: M) -> Result<VpTree<T, M>>
    where
        T: Send,
        M: Metric<T> + Sync,
        I: IntoIterator<Item = T>,
    {
        let mut tree = self.empty(metric)?;
        tree.rebuild_parallel(objects, None)?;
        Ok(tree)
    }
}

/// Counters gathered while building a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub distance_calls: usize,
}

/// A node of a [`VpTree`].
///
/// Internal nodes carry the median distance that split their candidates:
/// everything under `inner` is closer than the median to the vantage point,
/// everything under `outer` is at least that far.
#[derive(Debug)]
pub struct VpNode<T, D> {
    values: Vec<T>,
    median: Option<D>,
    inner: Option<Box<VpNode<T, D>>>,
    outer: Option<Box<VpNode<T, D>>>,
    size: usize,
    height: usize,
    num_nodes: usize,
    depth: usize,
}

impl<T, D: Scalar> VpNode<T, D> {
    fn assemble(
        values: Vec<T>,
        median: Option<D>,
        inner: Option<Box<VpNode<T, D>>>,
        outer: Option<Box<VpNode<T, D>>>,
        depth: usize,
    ) -> Box<VpNode<T, D>> {
        let counters = |child: Option<&VpNode<T, D>>| {
            child.map_or((0, 0, 0), |n| (n.size, n.height, n.num_nodes))
        };
        let (inner_size, inner_height, inner_nodes) = counters(inner.as_deref());
        let (outer_size, outer_height, outer_nodes) = counters(outer.as_deref());
        let size = values.len() + inner_size + outer_size;
        let height = 1 + inner_height.max(outer_height);
        let num_nodes = 1 + inner_nodes + outer_nodes;
        Box::new(VpNode {
            values,
            median,
            inner,
            outer,
            size,
            height,
            num_nodes,
            depth,
        })
    }

    pub fn vantage_point(&self) -> Option<&T> {
        self.values.first()
    }

    pub fn median(&self) -> Option<D> {
        self.median
    }

    /// Child holding objects closer than the median.
    pub fn inner(&self) -> Option<&VpNode<T, D>> {
        self.inner.as_deref()
    }

    /// Child holding objects at or beyond the median.
    pub fn outer(&self) -> Option<&VpNode<T, D>> {
        self.outer.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &VpNode<T, D>> {
        self.inner().into_iter().chain(self.outer())
    }

    /// Number of edges between this node and the root.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<T, D: Scalar> MetricNode for VpNode<T, D> {
    type Item = T;
    type Distance = D;

    fn values(&self) -> &[T] {
        &self.values
    }

    fn push_children<'a>(&'a self, out: &mut Vec<&'a Self>) {
        out.extend(self.children());
    }

    // Triangle inequality: an object `o` under `inner` has d(vp, o) < m, so
    // d(q, o) > d - m; under `outer`, d(vp, o) >= m, so d(q, o) >= m - d.
    fn push_child_candidates<'a>(
        &'a self,
        distance: D,
        _min_dist: D,
        max_dist: D,
        out: &mut Vec<&'a Self>,
    ) {
        let mu = match self.median {
            Some(mu) => mu,
            None => return,
        };
        if let Some(inner) = self.inner() {
            if distance - max_dist < mu {
                out.push(inner);
            }
        }
        if let Some(outer) = self.outer() {
            if distance + max_dist >= mu {
                out.push(outer);
            }
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn height(&self) -> usize {
        self.height
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn is_root(&self) -> bool {
        self.depth == 0
    }

    fn is_leaf(&self) -> bool {
        self.median.is_none()
    }
}

// Tall trees would otherwise drop their nested boxes recursively.
impl<T, D> Drop for VpNode<T, D> {
    fn drop(&mut self) {
        let mut stack: Vec<Box<VpNode<T, D>>> = Vec::new();
        stack.extend(self.inner.take());
        stack.extend(self.outer.take());
        while let Some(mut node) = stack.pop() {
            stack.extend(node.inner.take());
            stack.extend(node.outer.take());
        }
    }
}

/// Candidates of one node after ball decomposition.
struct Split<T, D> {
    values: Vec<T>,
    median: Option<D>,
    inner: Vec<T>,
    outer: Vec<T>,
}

/// State shared by the recursive construction of one tree.
struct Construction<'m, M> {
    metric: &'m M,
    config: &'m VpTreeConfig,
    distance_calls: AtomicUsize,
}

impl<'m, M> Construction<'m, M> {
    fn new(metric: &'m M, config: &'m VpTreeConfig) -> Self {
        Construction {
            metric,
            config,
            distance_calls: AtomicUsize::new(0),
        }
    }

    fn stats(&self) -> BuildStats {
        BuildStats {
            distance_calls: self.distance_calls.load(AtomicOrdering::Relaxed),
        }
    }

    fn measure<T>(&self, a: &T, b: &T) -> Result<M::Distance>
    where
        M: Metric<T>,
    {
        self.distance_calls.fetch_add(1, AtomicOrdering::Relaxed);
        measure(self.metric, a, b)
    }

    /// Remove and return the vantage point for `candidates`.
    ///
    /// Large sets sample their first few members and keep the one whose
    /// distances to the rest of the sample spread the widest.
    fn pick_vantage_point<T>(&self, candidates: &mut Vec<T>) -> Result<T>
    where
        M: Metric<T>,
    {
        if candidates.len() <= self.config.sample_threshold {
            return candidates.pop().ok_or(MetricTreeError::EmptyNodeDistance);
        }

        let sample = &candidates[..self.config.sample_size];
        let mut best: Option<(usize, M::Distance)> = None;
        for (i, o) in sample.iter().enumerate() {
            let mut lo = M::Distance::infinity();
            let mut hi = M::Distance::zero();
            for (j, other) in sample.iter().enumerate() {
                if i == j {
                    continue;
                }
                let d = self.measure(other, o)?;
                lo = lo.min(d);
                hi = hi.max(d);
            }
            let spread = hi - lo;
            if best.map_or(true, |(_, widest)| spread > widest) {
                best = Some((i, spread));
            }
        }
        Ok(candidates.remove(best.map_or(0, |(i, _)| i)))
    }

    /// Ball decomposition around a freshly picked vantage point.
    fn split<T>(&self, mut candidates: Vec<T>) -> Result<Split<T, M::Distance>>
    where
        M: Metric<T>,
    {
        let vp = self.pick_vantage_point(&mut candidates)?;
        let mut values = vec![vp];
        let mut measured = Vec::with_capacity(candidates.len());
        for obj in candidates {
            let d = self.measure(&values[0], &obj)?;
            if d == M::Distance::zero() {
                values.push(obj);
            } else {
                measured.push((d, obj));
            }
        }

        let mut distances: Vec<M::Distance> = measured.iter().map(|&(d, _)| d).collect();
        let median = determine_median(&mut distances);
        let (mut inner, mut outer) = (Vec::new(), Vec::new());
        if let Some(mu) = median {
            for (d, obj) in measured {
                if d < mu {
                    inner.push(obj);
                } else {
                    outer.push(obj);
                }
            }
        }
        Ok(Split {
            values,
            median,
            inner,
            outer,
        })
    }

    /// Build the subtree over `candidates`, rooted at `depth`.
    ///
    /// Nodes are split top-down from an explicit work stack and assembled
    /// in reverse creation order, so every child is finished before its
    /// parent and the call stack stays flat however tall the tree gets.
    fn build_subtree<T>(
        &self,
        candidates: Vec<T>,
        depth: usize,
    ) -> Result<Option<Box<VpNode<T, M::Distance>>>>
    where
        M: Metric<T>,
    {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut pending: Vec<Pending<T, M::Distance>> = Vec::new();
        let mut work: Vec<(Vec<T>, usize, Option<(usize, Side)>)> = vec![(candidates, depth, None)];
        while let Some((candidates, depth, slot)) = work.pop() {
            let Split {
                values,
                median,
                inner,
                outer,
            } = self.split(candidates)?;
            let id = pending.len();
            pending.push(Pending {
                values,
                median,
                inner: None,
                outer: None,
                depth,
            });
            match slot {
                Some((parent, Side::Inner)) => pending[parent].inner = Some(id),
                Some((parent, Side::Outer)) => pending[parent].outer = Some(id),
                None => {}
            }
            // Inner is popped first, matching a depth-first build.
            if !outer.is_empty() {
                work.push((outer, depth + 1, Some((id, Side::Outer))));
            }
            if !inner.is_empty() {
                work.push((inner, depth + 1, Some((id, Side::Inner))));
            }
        }

        let mut built: Vec<Option<Box<VpNode<T, M::Distance>>>> =
            (0..pending.len()).map(|_| None).collect();
        while let Some(node) = pending.pop() {
            let id = pending.len();
            let inner = node.inner.and_then(|i| built[i].take());
            let outer = node.outer.and_then(|i| built[i].take());
            built[id] = Some(VpNode::assemble(
                node.values,
                node.median,
                inner,
                outer,
                node.depth,
            ));
        }
        Ok(built.into_iter().next().flatten())
    }

    /// Splits large enough on both sides are built with `rayon::join`;
    /// anything smaller falls back to `build_subtree`.
    #[cfg(feature = "parallel")]
    fn build_subtree_parallel<T>(
        &self,
        candidates: Vec<T>,
        depth: usize,
    ) -> Result<Option<Box<VpNode<T, M::Distance>>>>
    where
        T: Send,
        M: Metric<T> + Sync,
    {
        let threshold = self.config.parallel_threshold.max(1);
        if candidates.len() < threshold || depth >= PARALLEL_DEPTH_LIMIT {
            return self.build_subtree(candidates, depth);
        }
        let Split {
            values,
            median,
            inner,
            outer,
        } = self.split(candidates)?;
        let (inner, outer) = if inner.len().min(outer.len()) >= threshold {
            rayon::join(
                || self.build_subtree_parallel(inner, depth + 1),
                || self.build_subtree_parallel(outer, depth + 1),
            )
        } else {
            (
                self.build_subtree(inner, depth + 1),
                self.build_subtree(outer, depth + 1),
            )
        };
        Ok(Some(VpNode::assemble(values, median, inner?, outer?, depth)))
    }
}

/// Past this depth the rayon pool is saturated and splits stay on the
/// current thread.
#[cfg(feature = "parallel")]
const PARALLEL_DEPTH_LIMIT: usize = 32;

#[derive(Clone, Copy)]
enum Side {
    Inner,
    Outer,
}

/// A split node waiting for its children to be assembled.
struct Pending<T, D> {
    values: Vec<T>,
    median: Option<D>,
    inner: Option<usize>,
    outer: Option<usize>,
    depth: usize,
}

/// Max-heap entry for k-nearest-neighbor search. Among equal distances the
/// entry found last sorts highest, so it is the first to be evicted.
struct HeapElem<'a, F: Scalar, T: 'a> {
    dist: F,
    seq: usize,
    item: &'a T,
}

impl<'a, F: Scalar, T: 'a> PartialOrd for HeapElem<'a, F, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, F: Scalar, T: 'a> PartialEq for HeapElem<'a, F, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a, F: Scalar, T: 'a> Eq for HeapElem<'a, F, T> {}

impl<'a, F: Scalar, T: 'a> Ord for HeapElem<'a, F, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_distance(&self.dist, &other.dist).then(self.seq.cmp(&other.seq))
    }
}

struct KnnSearch<'a, F: Scalar, T: 'a> {
    k: usize,
    heap: BinaryHeap<HeapElem<'a, F, T>>,
    found: usize,
    distance_calls: usize,
}

impl<'a, F: Scalar, T: 'a> KnnSearch<'a, F, T> {
    fn offer(&mut self, dist: F, item: &'a T) {
        let elem = HeapElem {
            dist,
            seq: self.found,
            item,
        };
        self.found += 1;
        if self.heap.len() < self.k {
            self.heap.push(elem);
        } else if self.heap.peek().map_or(false, |worst| elem < *worst) {
            self.heap.pop();
            self.heap.push(elem);
        }
    }

    /// Current search radius, or `None` while fewer than `k` are held.
    fn radius(&self) -> Option<F> {
        if self.heap.len() < self.k {
            None
        } else {
            self.heap.peek().map(|worst| worst.dist)
        }
    }
}

/// A vantage-point tree over objects of type `T` under metric `M`.
///
/// Built once from a batch of objects; adding or removing objects means
/// calling [`VpTree::construct`] again.
pub struct VpTree<T, M: Metric<T>> {
    root: Option<Box<VpNode<T, M::Distance>>>,
    metric: M,
    config: VpTreeConfig,
    build_stats: BuildStats,
}

impl<T, M: Metric<T>> VpTree<T, M> {
    /// Build a tree over `objects` with the default configuration.
    pub fn new<I>(objects: I, metric: M) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        VpTreeBuilder::new().build(objects, metric)
    }

    pub fn empty(metric: M) -> Self {
        VpTree {
            root: None,
            metric,
            config: VpTreeConfig::default(),
            build_stats: BuildStats::default(),
        }
    }

    /// (Re)index the tree with `objects` under `metric`, discarding the
    /// previous contents.
    ///
    /// On failure the tree keeps its previous contents and metric.
    pub fn construct<I>(&mut self, objects: I, metric: M) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        self.rebuild(objects, Some(metric))
    }

    fn rebuild<I>(&mut self, objects: I, metric: Option<M>) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let objects = self.prepare(objects);
        let count = objects.len();
        let (root, stats) = {
            let construction = Construction::new(metric.as_ref().unwrap_or(&self.metric), &self.config);
            let root = construction.build_subtree(objects, 0)?;
            (root, construction.stats())
        };
        self.commit(root, metric, stats, count);
        Ok(())
    }

    /// Like [`VpTree::construct`], building disjoint partitions on the rayon
    /// thread pool.
    #[cfg(feature = "parallel")]
    pub fn construct_parallel<I>(&mut self, objects: I, metric: M) -> Result<()>
    where
        T: Send,
        M: Sync,
        I: IntoIterator<Item = T>,
    {
        self.rebuild_parallel(objects, Some(metric))
    }

    #[cfg(feature = "parallel")]
    fn rebuild_parallel<I>(&mut self, objects: I, metric: Option<M>) -> Result<()>
    where
        T: Send,
        M: Sync,
        I: IntoIterator<Item = T>,
    {
        let objects = self.prepare(objects);
        let count = objects.len();
        let (root, stats) = {
            let construction = Construction::new(metric.as_ref().unwrap_or(&self.metric), &self.config);
            let root = construction.build_subtree_parallel(objects, 0)?;
            (root, construction.stats())
        };
        self.commit(root, metric, stats, count);
        Ok(())
    }

    fn prepare<I>(&self, objects: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut objects: Vec<T> = objects.into_iter().collect();
        if let Some(seed) = self.config.shuffle_seed {
            objects.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        log::debug!("building vantage point tree over {} objects", objects.len());
        objects
    }

    fn commit(
        &mut self,
        root: Option<Box<VpNode<T, M::Distance>>>,
        metric: Option<M>,
        stats: BuildStats,
        count: usize,
    ) {
        self.root = root;
        if let Some(metric) = metric {
            self.metric = metric;
        }
        self.build_stats = stats;
        log::debug!(
            "built vantage point tree: {} objects, size {}, height {}, {} nodes, {} distance calls",
            count,
            self.size(),
            self.height(),
            self.num_nodes(),
            stats.distance_calls
        );
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    pub fn config(&self) -> &VpTreeConfig {
        &self.config
    }

    /// Counters from the most recent successful construction.
    pub fn last_build_stats(&self) -> BuildStats {
        self.build_stats
    }

    /// Find the nearest neighbor of `query`, or `None` for an empty tree.
    pub fn nearest_neighbor(&self, query: &T) -> Result<Option<Neighbor<'_, T, M::Distance>>> {
        Ok(self.nearest_neighbors(query, 1)?.into_iter().next())
    }

    /// Find the `k` nearest neighbors of `query`, closest first.
    pub fn nearest_neighbors(&self, query: &T, k: usize) -> Result<Vec<Neighbor<'_, T, M::Distance>>> {
        Ok(self.nearest_neighbors_with_stats(query, k)?.neighbors)
    }

    pub fn nearest_neighbors_with_stats(
        &self,
        query: &T,
        k: usize,
    ) -> Result<SearchOutcome<'_, T, M::Distance>> {
        let root = match self.root.as_deref() {
            Some(root) if k > 0 => root,
            _ => return Ok(SearchOutcome::empty()),
        };
        let mut search = KnnSearch {
            k,
            heap: BinaryHeap::with_capacity(k.min(self.size())),
            found: 0,
            distance_calls: 0,
        };
        self.knn_visit(root, query, &mut search)?;

        let neighbors: Vec<_> = search
            .heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| Neighbor {
                item: e.item,
                distance: e.dist,
            })
            .collect();
        log::trace!(
            "{}-nearest search: {} hits, {} distance calls",
            k,
            neighbors.len(),
            search.distance_calls
        );
        Ok(SearchOutcome {
            neighbors,
            distance_calls: search.distance_calls,
        })
    }

    fn knn_visit<'a>(
        &'a self,
        root: &'a VpNode<T, M::Distance>,
        query: &T,
        search: &mut KnnSearch<'a, M::Distance, T>,
    ) -> Result<()> {
        let mut stack: Vec<(&'a VpNode<T, M::Distance>, Option<Ball<M::Distance>>)> =
            vec![(root, None)];
        while let Some((node, ball)) = stack.pop() {
            // The radius may have shrunk since this child was pushed.
            if let (Some(ball), Some(tau)) = (ball, search.radius()) {
                if !ball.admits(tau) {
                    continue;
                }
            }

            let d = self.distance(query, node)?;
            search.distance_calls += 1;
            for item in &node.values {
                search.offer(d, item);
            }

            if let Some(mu) = node.median {
                let mut children = [(node.inner(), Side::Inner), (node.outer(), Side::Outer)];

                // Descend first into the side of the ball the query falls in.
                if d >= mu {
                    children.swap(0, 1);
                }

                for &(child, side) in children.iter().rev() {
                    if let Some(child) = child {
                        stack.push((child, Some(Ball { d, mu, side })));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where a child lies relative to its parent's ball, as seen by a query at
/// distance `d` from the parent's vantage point.
#[derive(Clone, Copy)]
struct Ball<D> {
    d: D,
    mu: D,
    side: Side,
}

impl<D: Scalar> Ball<D> {
    fn admits(&self, tau: D) -> bool {
        match self.side {
            Side::Inner => self.d - tau < self.mu,
            Side::Outer => self.d + tau >= self.mu,
        }
    }
}

impl<T, M: Metric<T>> MetricTree<T> for VpTree<T, M> {
    type Distance = M::Distance;
    type Node = VpNode<T, M::Distance>;

    fn root(&self) -> Option<&Self::Node> {
        self.root.as_deref()
    }

    fn distance(&self, query: &T, node: &Self::Node) -> Result<M::Distance> {
        let vp = node.vantage_point().ok_or(MetricTreeError::EmptyNodeDistance)?;
        measure(&self.metric, vp, query)
    }
}

impl<'a, T, M: Metric<T>> IntoIterator for &'a VpTree<T, M> {
    type Item = &'a T;
    type IntoIter = Values<'a, VpNode<T, M::Distance>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values()
    }
}

impl<T: fmt::Debug, M: Metric<T>> fmt::Debug for VpTree<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VpTree")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}
