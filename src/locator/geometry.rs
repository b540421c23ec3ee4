/// Set operations over lists of boxes used by fusion, clustering and zoom.
use crate::perception::types::BoundingBox;

/// Every non-empty intersection of an element of `a` with an element of `b`.
pub fn pairwise_intersections(a: &[BoundingBox], b: &[BoundingBox]) -> Vec<BoundingBox> {
    let mut out = Vec::new();
    for ba in a {
        for bb in b {
            if let Some(i) = ba.intersection(bb) {
                out.push(i);
            }
        }
    }
    dedup(out)
}

/// Drop exact duplicates, keeping first-seen order.
pub fn dedup(boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    let mut seen = std::collections::HashSet::with_capacity(boxes.len());
    boxes.into_iter().filter(|b| seen.insert(*b)).collect()
}

/// Smallest box enclosing all of `boxes`.
pub fn enclosing(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    let (first, rest) = boxes.split_first()?;
    Some(rest.iter().fold(*first, |acc, b| acc.union(b)))
}

/// Coordinate-wise mean of the corners.
pub fn average(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    if boxes.is_empty() {
        return None;
    }
    let n = boxes.len() as f64;
    let (mut x1, mut y1, mut x2, mut y2) = (0.0, 0.0, 0.0, 0.0);
    for b in boxes {
        x1 += b.x as f64;
        y1 += b.y as f64;
        x2 += b.right() as f64;
        y2 += b.bottom() as f64;
    }
    Some(BoundingBox::from_corners(
        (x1 / n).round() as i64,
        (y1 / n).round() as i64,
        (x2 / n).round() as i64,
        (y2 / n).round() as i64,
    ))
}

/// Repeatedly merge overlapping boxes into their union until no two overlap.
pub fn merge_overlapping(boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    let mut merged = boxes;
    loop {
        let mut changed = false;
        let mut out: Vec<BoundingBox> = Vec::with_capacity(merged.len());
        for b in merged {
            match out.iter_mut().find(|o| o.intersection(&b).is_some()) {
                Some(existing) => {
                    *existing = existing.union(&b);
                    changed = true;
                }
                None => out.push(b),
            }
        }
        merged = out;
        if !changed {
            return merged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_intersections_skip_disjoint() {
        let a = vec![BoundingBox::new(0, 0, 10, 10), BoundingBox::new(100, 100, 10, 10)];
        let b = vec![BoundingBox::new(5, 5, 10, 10)];
        assert_eq!(pairwise_intersections(&a, &b), vec![BoundingBox::new(5, 5, 5, 5)]);
        assert!(pairwise_intersections(&a, &[]).is_empty());
    }

    #[test]
    fn test_enclosing_and_average() {
        let boxes = [BoundingBox::new(0, 0, 10, 10), BoundingBox::new(10, 20, 10, 10)];
        assert_eq!(enclosing(&boxes), Some(BoundingBox::new(0, 0, 20, 30)));
        assert_eq!(average(&boxes), Some(BoundingBox::new(5, 10, 10, 10)));
        assert_eq!(enclosing(&[]), None);
    }

    #[test]
    fn test_merge_overlapping_chains() {
        // a overlaps b, b overlaps c, a does not overlap c directly.
        let merged = merge_overlapping(vec![
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(20, 0, 10, 10),
            BoundingBox::new(8, 0, 14, 10),
            BoundingBox::new(100, 100, 5, 5),
        ]);
        assert_eq!(
            merged,
            vec![BoundingBox::new(0, 0, 30, 10), BoundingBox::new(100, 100, 5, 5)]
        );
    }

    #[test]
    fn test_dedup_keeps_order() {
        let a = BoundingBox::new(1, 1, 1, 1);
        let b = BoundingBox::new(2, 2, 2, 2);
        assert_eq!(dedup(vec![a, b, a]), vec![a, b]);
    }
}
