/// Planar homography estimation: normalized DLT plus a seeded RANSAC loop.
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

pub type Point = (f64, f64);

#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    pub iterations: usize,
    /// Maximum reprojection error (pixels) for a correspondence to count as inlier.
    pub threshold: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub h: Matrix3<f64>,
    /// Indices into the correspondence list.
    pub inliers: Vec<usize>,
}

/// Apply `h` to a point; `None` when the point maps to infinity.
pub fn project(h: &Matrix3<f64>, p: Point) -> Option<Point> {
    let v = h * Vector3::new(p.0, p.1, 1.0);
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some((v.x / v.z, v.y / v.z))
}

/// Hartley normalization: centroid at the origin, mean distance √2.
fn normalizer(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (cx, cy) = points.iter().fold((0.0, 0.0), |a, p| (a.0 + p.0, a.1 + p.1));
    let (cx, cy) = (cx / n, cy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, p: Point) -> Point {
    (t[(0, 0)] * p.0 + t[(0, 2)], t[(1, 1)] * p.1 + t[(1, 2)])
}

/// Least-squares homography `src → dst` from four or more correspondences (h33 = 1).
pub fn fit(src: &[Point], dst: &[Point]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let ts = normalizer(src)?;
    let td = normalizer(dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 8);
    let mut b = DVector::<f64>::zeros(2 * n);
    for i in 0..n {
        let (x, y) = apply(&ts, src[i]);
        let (u, v) = apply(&td, dst[i]);
        let r = 2 * i;
        let even = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u];
        let odd = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v];
        for c in 0..8 {
            a[(r, c)] = even[c];
            a[(r + 1, c)] = odd[c];
        }
        b[r] = u;
        b[r + 1] = v;
    }
    let at = a.transpose();
    let h = (&at * &a).lu().solve(&(&at * &b))?;
    if h.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let h = td.try_inverse()? * hn * ts;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(h / scale)
}

fn reprojection_error(h: &Matrix3<f64>, s: Point, d: Point) -> f64 {
    match project(h, s) {
        Some(p) => ((p.0 - d.0).powi(2) + (p.1 - d.1).powi(2)).sqrt(),
        None => f64::INFINITY,
    }
}

fn inliers_of(h: &Matrix3<f64>, src: &[Point], dst: &[Point], threshold: f64) -> Vec<usize> {
    (0..src.len())
        .filter(|&i| reprojection_error(h, src[i], dst[i]) <= threshold)
        .collect()
}

/// Robust fit: best 4-point model by inlier count, refit on its inliers.
pub fn ransac(src: &[Point], dst: &[Point], params: &RansacParams) -> Option<HomographyFit> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Matrix3<f64>, Vec<usize>)> = None;

    for _ in 0..params.iterations.max(1) {
        let pick = sample(&mut rng, n, 4).into_vec();
        let s: Vec<Point> = pick.iter().map(|&i| src[i]).collect();
        let d: Vec<Point> = pick.iter().map(|&i| dst[i]).collect();
        let Some(h) = fit(&s, &d) else { continue };
        let inl = inliers_of(&h, src, dst, params.threshold);
        if best.as_ref().map_or(true, |(_, b)| inl.len() > b.len()) {
            let all = inl.len() == n;
            best = Some((h, inl));
            if all {
                break;
            }
        }
    }

    let (h, inliers) = best?;
    if inliers.len() < 4 {
        return None;
    }
    let s: Vec<Point> = inliers.iter().map(|&i| src[i]).collect();
    let d: Vec<Point> = inliers.iter().map(|&i| dst[i]).collect();
    let refined = fit(&s, &d).unwrap_or(h);
    let inliers = inliers_of(&refined, src, dst, params.threshold);
    (inliers.len() >= 4).then_some(HomographyFit { h: refined, inliers })
}
