/// Cross-signal fusion with a strict fallback order.
///
/// Agreement between signals is trusted most, the raw union least. The first
/// tier that yields anything wins; later tiers are never evaluated.
use serde::Serialize;

use crate::locator::element::SignalSet;
use crate::locator::geometry::pairwise_intersections;
use crate::perception::types::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionTier {
    /// Vision, feature and template all agree.
    TripleAgreement,
    /// Vision agrees with at least one algorithmic signal.
    VisionAgreement,
    /// Vision present, no agreement: everything goes to the vote.
    RawUnion,
    /// No vision; feature and template agree.
    AlgorithmicAgreement,
    /// No vision, no agreement between feature and template.
    AlgorithmicUnion,
    Empty,
}

/// A fused region and the families that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub sources: SignalSet,
}

#[derive(Debug, Clone)]
pub struct Fusion {
    pub tier: FusionTier,
    pub candidates: Vec<Candidate>,
}

impl Fusion {
    fn new(tier: FusionTier, candidates: Vec<Candidate>) -> Self {
        Self { tier, candidates }
    }
}

/// Append `boxes` tagged with `sources`, folding exact duplicates into one entry.
fn push_tagged(out: &mut Vec<Candidate>, boxes: &[BoundingBox], sources: SignalSet) {
    for b in boxes {
        match out.iter_mut().find(|c| c.bbox == *b) {
            Some(existing) => existing.sources = existing.sources.with(sources),
            None => out.push(Candidate { bbox: *b, sources }),
        }
    }
}

fn tagged(boxes: &[BoundingBox], sources: SignalSet) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(boxes.len());
    push_tagged(&mut out, boxes, sources);
    out
}

pub fn fuse(vision: &[BoundingBox], feature: &[BoundingBox], template: &[BoundingBox]) -> Fusion {
    let all = SignalSet::VISION.with(SignalSet::FEATURE).with(SignalSet::TEMPLATE);
    let vf = SignalSet::VISION.with(SignalSet::FEATURE);
    let vt = SignalSet::VISION.with(SignalSet::TEMPLATE);
    let ft = SignalSet::FEATURE.with(SignalSet::TEMPLATE);

    if !vision.is_empty() {
        let with_feature = pairwise_intersections(vision, feature);
        let with_template = pairwise_intersections(vision, template);

        if !feature.is_empty() && !template.is_empty() {
            let triple = pairwise_intersections(&with_feature, &with_template);
            if !triple.is_empty() {
                return Fusion::new(FusionTier::TripleAgreement, tagged(&triple, all));
            }
        }

        let mut agreed = tagged(&with_feature, vf);
        push_tagged(&mut agreed, &with_template, vt);
        if !agreed.is_empty() {
            return Fusion::new(FusionTier::VisionAgreement, agreed);
        }

        let mut raw = tagged(vision, SignalSet::VISION);
        push_tagged(&mut raw, feature, SignalSet::FEATURE);
        push_tagged(&mut raw, template, SignalSet::TEMPLATE);
        return Fusion::new(FusionTier::RawUnion, raw);
    }

    if feature.is_empty() && template.is_empty() {
        return Fusion::new(FusionTier::Empty, Vec::new());
    }

    let agreed = pairwise_intersections(feature, template);
    if !agreed.is_empty() {
        return Fusion::new(FusionTier::AlgorithmicAgreement, tagged(&agreed, ft));
    }
    let mut raw = tagged(feature, SignalSet::FEATURE);
    push_tagged(&mut raw, template, SignalSet::TEMPLATE);
    Fusion::new(FusionTier::AlgorithmicUnion, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x: i32, y: i32, w: u32, h: u32) -> BoundingBox {
        BoundingBox::new(x, y, w, h)
    }

    fn boxes(f: &Fusion) -> Vec<BoundingBox> {
        f.candidates.iter().map(|c| c.bbox).collect()
    }

    #[test]
    fn test_triple_agreement_wins_verbatim() {
        let vision = [bx(0, 0, 100, 100), bx(500, 500, 10, 10)];
        let feature = [bx(10, 10, 50, 50), bx(505, 505, 20, 20)];
        let template = [bx(20, 20, 50, 50)];
        let f = fuse(&vision, &feature, &template);
        assert_eq!(f.tier, FusionTier::TripleAgreement);
        // Only the region all three share; the vision/feature pair at 500,500
        // would have appeared in tier 2 but must not leak in.
        assert_eq!(boxes(&f), vec![bx(20, 20, 40, 40)]);
        let s = f.candidates[0].sources;
        assert!(s.vision && s.feature && s.template);
    }

    #[test]
    fn test_vision_with_either_algorithmic_signal() {
        let vision = [bx(0, 0, 100, 100), bx(500, 500, 10, 10)];
        let feature = [bx(505, 505, 20, 20)];
        let template = [bx(50, 50, 10, 10)];
        let f = fuse(&vision, &feature, &template);
        assert_eq!(f.tier, FusionTier::VisionAgreement);
        assert_eq!(boxes(&f), vec![bx(505, 505, 5, 5), bx(50, 50, 10, 10)]);
        assert!(f.candidates[0].sources.feature && !f.candidates[0].sources.template);
    }

    #[test]
    fn test_raw_union_when_nothing_agrees() {
        let vision = [bx(0, 0, 10, 10), bx(100, 0, 10, 10)];
        let f = fuse(&vision, &[], &[bx(300, 300, 5, 5)]);
        assert_eq!(f.tier, FusionTier::RawUnion);
        assert_eq!(boxes(&f), vec![bx(0, 0, 10, 10), bx(100, 0, 10, 10), bx(300, 300, 5, 5)]);
    }

    #[test]
    fn test_vision_only_goes_to_raw_union() {
        let vision = [bx(0, 0, 10, 10), bx(100, 0, 10, 10)];
        let f = fuse(&vision, &[], &[]);
        assert_eq!(f.tier, FusionTier::RawUnion);
        assert_eq!(f.candidates.len(), 2);
        assert!(f.candidates.iter().all(|c| c.sources == SignalSet::VISION));
    }

    #[test]
    fn test_algorithmic_agreement_without_vision() {
        let f = fuse(&[], &[bx(5, 5, 40, 40)], &[bx(6, 6, 38, 38)]);
        assert_eq!(f.tier, FusionTier::AlgorithmicAgreement);
        assert_eq!(boxes(&f), vec![bx(6, 6, 38, 38)]);
    }

    #[test]
    fn test_algorithmic_union_without_vision() {
        let f = fuse(&[], &[bx(0, 0, 5, 5)], &[bx(50, 50, 5, 5)]);
        assert_eq!(f.tier, FusionTier::AlgorithmicUnion);
        assert_eq!(f.candidates.len(), 2);
        let only_feature = fuse(&[], &[bx(0, 0, 5, 5)], &[]);
        assert_eq!(only_feature.tier, FusionTier::AlgorithmicUnion);
        assert_eq!(boxes(&only_feature), vec![bx(0, 0, 5, 5)]);
    }

    #[test]
    fn test_everything_empty() {
        let f = fuse(&[], &[], &[]);
        assert_eq!(f.tier, FusionTier::Empty);
        assert!(f.candidates.is_empty());
    }

    #[test]
    fn test_duplicate_raw_boxes_merge_sources() {
        let b = bx(0, 0, 10, 10);
        let f = fuse(&[b], &[], &[b, bx(300, 300, 1, 1)]);
        // b∩b is non-empty, so vision/template agree on b.
        assert_eq!(f.tier, FusionTier::VisionAgreement);
        assert_eq!(boxes(&f), vec![b]);
    }
}
