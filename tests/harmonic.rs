use metric_tree::{MetricTree, VpTree};

#[derive(Debug, PartialEq, Clone)]
struct Point(f32);

fn distance(a: &Point, b: &Point) -> f32 {
    (a.0 - b.0).abs()
}

fn check_self_nearest(points: &[Point]) {
    let vp = VpTree::new(points.iter().cloned(), distance).unwrap();
    assert_eq!(vp.size(), points.len());

    for p in points {
        // each point should be nearest to itself.
        let nn = vp.nearest_neighbor(p).unwrap().unwrap();
        if nn.item != p {
            println!("{:?}", vp);
        }
        assert_eq!(nn.item, p);
        assert_eq!(nn.distance, 0.0);
        assert!(vp.contains(p).unwrap());
    }
}

#[test]
fn test_linear() {
    for n in 10..101 {
        let points: Vec<_> = (0..n + 1).map(|x| Point(x as f32 / n as f32)).collect();
        check_self_nearest(&points);
    }
}

#[test]
fn test_harmonic() {
    for n in 10..101 {
        let points: Vec<_> = (1..n + 1).map(|x| Point(1.0 / (x as f32))).collect();
        check_self_nearest(&points);
    }
}

#[test]
fn harmonic_search_window() {
    let points: Vec<_> = (1..51).map(|x| Point(1.0 / (x as f32))).collect();
    let vp = VpTree::new(points.clone(), distance).unwrap();

    let hits = vp.range_search(&Point(0.0), 0.1, 0.25).unwrap();
    let mut expected: Vec<f32> = points
        .iter()
        .map(|p| p.0)
        .filter(|&x| (0.1..=0.25).contains(&x))
        .collect();
    expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let found: Vec<f32> = hits.iter().map(|n| n.item.0).collect();
    assert_eq!(found, expected);
    assert!(!vp.contains(&Point(0.0)).unwrap());
}

#[test]
fn oversized_k_returns_every_point() {
    let vp = VpTree::new(vec![Point(2.0), Point(0.0), Point(0.5)], distance).unwrap();
    let all = vp.nearest_neighbors(&Point(0.0), usize::MAX).unwrap();
    let dists: Vec<f32> = all.iter().map(|n| n.distance).collect();
    assert_eq!(dists, vec![0.0, 0.5, 2.0]);
}

fn discrete(a: &u32, b: &u32) -> f64 {
    if a == b {
        0.0
    } else {
        1.0
    }
}

#[test]
fn discrete_metric_builds_tall_tree() {
    // Every distance ties, so each node sends all the rest outward and the
    // tree is a chain as tall as the input.
    let n = 20_000u32;
    let tree = VpTree::new(0..n, discrete).unwrap();
    assert_eq!(tree.size(), n as usize);
    assert_eq!(tree.height(), n as usize);
    assert_eq!(tree.num_nodes(), n as usize);
    assert_eq!(tree.values().count(), n as usize);

    let hits = tree.search(&123, 0.0).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(*hits[0].item, 123);

    let near = tree.nearest_neighbors(&77, 2).unwrap();
    assert_eq!(*near[0].item, 77);
    assert_eq!(near[0].distance, 0.0);
    assert_eq!(near[1].distance, 1.0);
}
