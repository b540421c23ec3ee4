/// Keypoint matching: FAST corners, oriented BRIEF descriptors, ratio test,
/// spatial clustering and a RANSAC homography per cluster.
use std::cmp::Ordering;
use std::sync::OnceLock;

use image::{DynamicImage, GrayImage};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FeatureMatchConfig;
use crate::locator::clustering::dbscan;
use crate::locator::element::DetectionSignal;
use crate::locator::matching::homography::{self, Point, RansacParams};
use crate::perception::types::BoundingBox;

/// Radius of the intensity-centroid patch.
const ORIENTATION_RADIUS: i32 = 15;
/// Sampling pairs lie inside this radius, so any rotation stays inside the patch.
const PATTERN_RADIUS: i32 = 13;
/// Keypoints closer than this to the image edge are dropped (pattern + blur reach).
const BORDER: u32 = 20;
const BLUR_SIGMA: f32 = 2.0;
const NMS_RADIUS: i32 = 3;
/// Hamming distances above this are never a match, whatever the ratio says.
const MAX_HAMMING: u32 = 80;
const PATTERN_SEED: u64 = 0x0B1E_F00D;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

type Pair = ((f32, f32), (f32, f32));

/// The BRIEF test pattern. Fixed seed, so reference and screen descriptors agree.
fn pattern() -> &'static [Pair] {
    static PATTERN: OnceLock<Vec<Pair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut point = || loop {
            let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
            if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
                return (x as f32, y as f32);
            }
        };
        (0..256).map(|_| (point(), point())).collect()
    })
}

/// Detect keypoints and compute their descriptors.
pub fn extract(gray: &GrayImage, config: &FeatureMatchConfig) -> Vec<(Keypoint, Descriptor)> {
    let (w, h) = gray.dimensions();
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }

    let mut corners = corners_fast9(gray, config.fast_threshold);
    corners.retain(|c| c.x >= BORDER && c.y >= BORDER && c.x < w - BORDER && c.y < h - BORDER);
    corners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    let corners = suppress_neighbours(corners, w, h, config.max_keypoints);

    let smooth = gaussian_blur_f32(gray, BLUR_SIGMA);
    corners
        .iter()
        .map(|c| {
            let angle = orientation(gray, c.x as i32, c.y as i32);
            let kp = Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                angle,
            };
            (kp, describe(&smooth, c.x as i32, c.y as i32, angle))
        })
        .collect()
}

/// Keep the strongest corner in every `NMS_RADIUS` neighbourhood; input is sorted by score.
fn suppress_neighbours(corners: Vec<Corner>, w: u32, h: u32, limit: usize) -> Vec<Corner> {
    let (w, h) = (w as i32, h as i32);
    let mut taken = vec![false; (w * h) as usize];
    let mut kept = Vec::new();
    for c in corners {
        if kept.len() >= limit {
            break;
        }
        let (cx, cy) = (c.x as i32, c.y as i32);
        let mut free = true;
        'scan: for y in (cy - NMS_RADIUS).max(0)..=(cy + NMS_RADIUS).min(h - 1) {
            for x in (cx - NMS_RADIUS).max(0)..=(cx + NMS_RADIUS).min(w - 1) {
                if taken[(y * w + x) as usize] {
                    free = false;
                    break 'scan;
                }
            }
        }
        if free {
            taken[(cy * w + cx) as usize] = true;
            kept.push(c);
        }
    }
    kept
}

/// Intensity-centroid angle of the circular patch around `(cx, cy)`.
fn orientation(gray: &GrayImage, cx: i32, cy: i32) -> f32 {
    let (mut m01, mut m10) = (0i64, 0i64);
    let r = ORIENTATION_RADIUS;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = gray.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

fn describe(smooth: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(px, py): (f32, f32)| -> u8 {
        let x = cx + (px * cos - py * sin).round() as i32;
        let y = cy + (px * sin + py * cos).round() as i32;
        smooth.get_pixel(x as u32, y as u32)[0]
    };
    let mut bits = [0u64; 4];
    for (i, &(a, b)) in pattern().iter().enumerate() {
        if sample(a) < sample(b) {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    Descriptor(bits)
}

/// Nearest / second-nearest ratio test. Returns `(reference_idx, scene_idx)` pairs.
pub fn match_descriptors(
    reference: &[(Keypoint, Descriptor)],
    scene: &[(Keypoint, Descriptor)],
    ratio: f32,
) -> Vec<(usize, usize)> {
    if scene.len() < 2 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for (ri, (_, rd)) in reference.iter().enumerate() {
        let (mut best, mut second, mut best_idx) = (u32::MAX, u32::MAX, 0usize);
        for (si, (_, sd)) in scene.iter().enumerate() {
            let d = rd.distance(sd);
            if d < best {
                second = best;
                best = d;
                best_idx = si;
            } else if d < second {
                second = d;
            }
        }
        if best <= MAX_HAMMING && (best as f32) < ratio * second as f32 {
            out.push((ri, best_idx));
        }
    }
    out
}

/// Regions of `scene` where `reference` appears, one per consistent keypoint cluster.
pub fn find_regions(scene: &DynamicImage, reference: &DynamicImage, config: &FeatureMatchConfig) -> DetectionSignal {
    let mut boxes = Vec::new();
    let mut inliers = Vec::new();
    let (rw, rh) = (reference.width(), reference.height());
    let (sw, sh) = (scene.width(), scene.height());
    let min_matches = config.min_cluster_matches.max(4);

    let ref_feats = extract(&reference.to_luma8(), config);
    if ref_feats.len() < min_matches {
        tracing::debug!(keypoints = ref_feats.len(), "reference has too few keypoints");
        return DetectionSignal::FeatureMatch { boxes, inliers };
    }
    let scene_feats = extract(&scene.to_luma8(), config);
    let matches = match_descriptors(&ref_feats, &scene_feats, config.ratio);
    tracing::debug!(
        reference = ref_feats.len(),
        scene = scene_feats.len(),
        matches = matches.len(),
        "feature matching"
    );
    if matches.len() < min_matches {
        return DetectionSignal::FeatureMatch { boxes, inliers };
    }

    let scene_pts: Vec<Point> = matches
        .iter()
        .map(|&(_, si)| (scene_feats[si].0.x as f64, scene_feats[si].0.y as f64))
        .collect();
    let eps = config.cluster_radius_factor * rw.max(rh) as f64;
    let clusters = dbscan(&scene_pts, eps, 2, |a, b| {
        ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
    });

    let params = RansacParams {
        iterations: config.ransac_iterations,
        threshold: config.reprojection_threshold,
        seed: config.seed,
    };
    for members in clusters.iter().filter(|m| m.len() >= min_matches) {
        let src: Vec<Point> = members
            .iter()
            .map(|&m| {
                let kp = ref_feats[matches[m].0].0;
                (kp.x as f64, kp.y as f64)
            })
            .collect();
        let dst: Vec<Point> = members.iter().map(|&m| scene_pts[m]).collect();
        let Some(fit) = homography::ransac(&src, &dst, &params) else {
            continue;
        };
        let Some(region) = project_reference(&fit.h, rw, rh) else {
            continue;
        };
        if !size_within(&region, rw, rh, config.size_tolerance) {
            tracing::debug!(%region, "projected region rejected by size tolerance");
            continue;
        }
        if let Some(clamped) = region.clamp_to(sw, sh) {
            boxes.push(clamped);
            inliers.push(fit.inliers.len());
        }
    }
    DetectionSignal::FeatureMatch { boxes, inliers }
}

/// Enclosing box of the reference rectangle's corners pushed through `h`.
fn project_reference(h: &nalgebra::Matrix3<f64>, rw: u32, rh: u32) -> Option<BoundingBox> {
    let (w, hh) = (rw as f64, rh as f64);
    let corners = [(0.0, 0.0), (w, 0.0), (w, hh), (0.0, hh)];
    let mut pts = Vec::with_capacity(4);
    for c in corners {
        let p = homography::project(h, c)?;
        if !p.0.is_finite() || !p.1.is_finite() {
            return None;
        }
        pts.push(p);
    }
    let min_x = pts.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_x = pts.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let b = BoundingBox::from_corners(
        min_x.round() as i64,
        min_y.round() as i64,
        max_x.round() as i64,
        max_y.round() as i64,
    );
    (!b.is_empty()).then_some(b)
}

fn size_within(region: &BoundingBox, rw: u32, rh: u32, tolerance: f64) -> bool {
    let dw = (region.width as f64 / rw as f64 - 1.0).abs();
    let dh = (region.height as f64 / rh as f64 - 1.0).abs();
    dw <= tolerance && dh <= tolerance
}
