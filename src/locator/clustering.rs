/// Density-based clustering (DBSCAN) over an arbitrary distance function.
///
/// Used twice: grounding votes are clustered with `1 - IoU`, matched
/// keypoints with Euclidean distance.
use crate::locator::geometry;
use crate::perception::types::BoundingBox;

/// Cluster `items`; returns clusters as index lists, noise points are dropped.
///
/// Two points are neighbours when `dist(a, b) <= eps`. A point is a core point
/// when it has at least `min_points` neighbours, counting itself.
pub fn dbscan<T, F>(items: &[T], eps: f64, min_points: usize, dist: F) -> Vec<Vec<usize>>
where
    F: Fn(&T, &T) -> f64,
{
    const UNVISITED: usize = usize::MAX;
    const NOISE: usize = usize::MAX - 1;

    let n = items.len();
    let min_points = min_points.max(1);
    let neighbours = |i: usize| -> Vec<usize> {
        (0..n).filter(|&j| dist(&items[i], &items[j]) <= eps).collect()
    };

    let mut label = vec![UNVISITED; n];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for i in 0..n {
        if label[i] != UNVISITED {
            continue;
        }
        let seeds = neighbours(i);
        if seeds.len() < min_points {
            label[i] = NOISE;
            continue;
        }

        let cluster_id = clusters.len();
        let mut members = vec![i];
        label[i] = cluster_id;

        let mut queue = seeds;
        let mut cursor = 0;
        while cursor < queue.len() {
            let j = queue[cursor];
            cursor += 1;
            if label[j] == NOISE {
                // Border point: claimed by this cluster but not expanded.
                label[j] = cluster_id;
                members.push(j);
                continue;
            }
            if label[j] != UNVISITED {
                continue;
            }
            label[j] = cluster_id;
            members.push(j);
            let more = neighbours(j);
            if more.len() >= min_points {
                queue.extend(more);
            }
        }
        members.sort_unstable();
        clusters.push(members);
    }
    clusters
}

/// Cluster boxes by IoU and collapse each cluster to its average box.
pub fn cluster_boxes(boxes: &[BoundingBox], iou_threshold: f64, min_points: usize) -> Vec<BoundingBox> {
    let eps = 1.0 - iou_threshold;
    dbscan(boxes, eps, min_points, |a, b| 1.0 - a.iou(b))
        .into_iter()
        .filter_map(|members| {
            let group: Vec<BoundingBox> = members.iter().map(|&i| boxes[i]).collect();
            geometry::average(&group)
        })
        .collect()
}
