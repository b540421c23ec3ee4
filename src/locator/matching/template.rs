/// Template matching with zero-mean normalized cross-correlation (ZNCC).
///
/// The search runs on a downscaled pair first, then refines each coarse peak
/// at full resolution. Window sums come from integral images, so only the
/// cross term is computed per position.
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::config::TemplateMatchConfig;
use crate::locator::element::DetectionSignal;
use crate::locator::geometry;
use crate::perception::types::BoundingBox;

/// Coarse peaks are accepted this far below the final threshold.
const COARSE_SLACK: f32 = 0.25;
/// Coarse candidates kept per requested match.
const COARSE_FANOUT: usize = 4;

struct Plane {
    w: usize,
    h: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(g: &GrayImage) -> Self {
        Self {
            w: g.width() as usize,
            h: g.height() as usize,
            data: g.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }
}

/// Summed-area tables of values and squared values, `(w + 1) × (h + 1)`.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(p: &Plane) -> Self {
        let stride = p.w + 1;
        let mut sum = vec![0.0; stride * (p.h + 1)];
        let mut sq = vec![0.0; stride * (p.h + 1)];
        for y in 0..p.h {
            let (mut row_s, mut row_q) = (0.0f64, 0.0f64);
            for x in 0..p.w {
                let v = p.data[y * p.w + x] as f64;
                row_s += v;
                row_q += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_s;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_q;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let at = |t: &[f64], xx: usize, yy: usize| t[yy * s + xx];
        let area = |t: &[f64]| at(t, x + w, y + h) - at(t, x, y + h) - at(t, x + w, y) + at(t, x, y);
        (area(&self.sum), area(&self.sq))
    }
}

/// Zero-mean template with its L2 norm.
struct Template {
    w: usize,
    h: usize,
    data: Vec<f32>,
    norm: f64,
}

impl Template {
    /// `None` for a flat template, which cannot correlate with anything.
    fn new(p: Plane) -> Option<Self> {
        let n = p.data.len() as f64;
        let mean = p.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let data: Vec<f32> = p.data.iter().map(|&v| (v as f64 - mean) as f32).collect();
        let norm = data.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
        (norm > 1e-6).then_some(Self {
            w: p.w,
            h: p.h,
            data,
            norm,
        })
    }
}

struct Searcher {
    scene: Plane,
    integral: Integral,
    template: Template,
}

impl Searcher {
    fn new(scene: &GrayImage, template: &GrayImage) -> Option<Self> {
        if template.width() > scene.width() || template.height() > scene.height() {
            return None;
        }
        let scene = Plane::from_gray(scene);
        let integral = Integral::new(&scene);
        let template = Template::new(Plane::from_gray(template))?;
        Some(Self {
            scene,
            integral,
            template,
        })
    }

    fn positions(&self) -> (usize, usize) {
        (
            self.scene.w - self.template.w + 1,
            self.scene.h - self.template.h + 1,
        )
    }

    /// ZNCC at top-left `(x, y)`; a flat scene window scores 0.
    fn score_at(&self, x: usize, y: usize) -> f32 {
        let t = &self.template;
        let n = (t.w * t.h) as f64;
        let (s, sq) = self.integral.window(x, y, t.w, t.h);
        let var = sq - s * s / n;
        if var <= 1e-6 * n {
            return 0.0;
        }
        let mut cross = 0.0f64;
        for j in 0..t.h {
            let start = (y + j) * self.scene.w + x;
            let row = &self.scene.data[start..start + t.w];
            let trow = &t.data[j * t.w..(j + 1) * t.w];
            cross += row.iter().zip(trow).map(|(a, b)| a * b).sum::<f32>() as f64;
        }
        (cross / (t.norm * var.sqrt())) as f32
    }

    fn score_map(&self) -> Vec<f32> {
        let (mw, mh) = self.positions();
        let mut map = Vec::with_capacity(mw * mh);
        for y in 0..mh {
            for x in 0..mw {
                map.push(self.score_at(x, y));
            }
        }
        map
    }

    /// Best position within `radius` of `(cx, cy)`.
    fn refine(&self, cx: usize, cy: usize, radius: usize) -> (f32, usize, usize) {
        let (mw, mh) = self.positions();
        let mut best = (f32::NEG_INFINITY, cx.min(mw - 1), cy.min(mh - 1));
        for y in cy.saturating_sub(radius)..=(cy + radius).min(mh - 1) {
            for x in cx.saturating_sub(radius)..=(cx + radius).min(mw - 1) {
                let s = self.score_at(x, y);
                if s > best.0 {
                    best = (s, x, y);
                }
            }
        }
        best
    }
}

/// Repeatedly take the best score above `threshold` and blank its neighbourhood.
fn pick_peaks(
    map: &mut [f32],
    mw: usize,
    mh: usize,
    (sup_w, sup_h): (usize, usize),
    threshold: f32,
    limit: usize,
) -> Vec<(f32, usize, usize)> {
    let mut peaks = Vec::new();
    while peaks.len() < limit {
        let Some((idx, &score)) = map
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };
        if score < threshold {
            break;
        }
        let (px, py) = (idx % mw, idx / mw);
        peaks.push((score, px, py));
        for y in py.saturating_sub(sup_h)..=(py + sup_h).min(mh - 1) {
            for x in px.saturating_sub(sup_w)..=(px + sup_w).min(mw - 1) {
                map[y * mw + x] = f32::NEG_INFINITY;
            }
        }
    }
    peaks
}

/// Scale at which the coarse pass runs: `coarse_scale`, raised so the template's
/// short side keeps at least `min_coarse_side` pixels, never above 1.
pub fn coarse_factor(config: &TemplateMatchConfig, tw: u32, th: u32) -> f64 {
    let short = tw.min(th).max(1) as f64;
    let floor = config.min_coarse_side as f64 / short;
    config.coarse_scale.max(floor).clamp(f64::MIN_POSITIVE, 1.0)
}

/// Occurrences of `reference` in `scene` scoring at least `config.threshold`.
pub fn find_matches(scene: &DynamicImage, reference: &DynamicImage, config: &TemplateMatchConfig) -> DetectionSignal {
    let empty = DetectionSignal::TemplateMatch {
        boxes: Vec::new(),
        scores: Vec::new(),
    };
    let scene_g = scene.to_luma8();
    let tmpl_g = reference.to_luma8();
    let (tw, th) = tmpl_g.dimensions();
    if tw == 0 || th == 0 || config.max_matches == 0 {
        return empty;
    }
    let Some(full) = Searcher::new(&scene_g, &tmpl_g) else {
        tracing::debug!("template larger than the scene or flat, skipping");
        return empty;
    };

    let suppress = ((tw / 2) as usize, (th / 2) as usize);
    let factor = coarse_factor(config, tw, th);
    let coarse = (factor < 1.0)
        .then(|| {
            let sw = ((scene_g.width() as f64 * factor).round() as u32).max(1);
            let sh = ((scene_g.height() as f64 * factor).round() as u32).max(1);
            let cw = ((tw as f64 * factor).round() as u32).max(1);
            let ch = ((th as f64 * factor).round() as u32).max(1);
            let s = image::imageops::resize(&scene_g, sw, sh, FilterType::Triangle);
            let t = image::imageops::resize(&tmpl_g, cw, ch, FilterType::Triangle);
            Searcher::new(&s, &t)
        })
        .flatten();

    let mut candidates = match coarse {
        Some(coarse) => {
            let (mw, mh) = coarse.positions();
            let mut map = coarse.score_map();
            let sup = (coarse.template.w / 2, coarse.template.h / 2);
            let peaks = pick_peaks(
                &mut map,
                mw,
                mh,
                sup,
                config.threshold - COARSE_SLACK,
                config.max_matches * COARSE_FANOUT,
            );
            let radius = (1.0 / factor).ceil() as usize + 1;
            tracing::debug!(factor, coarse_peaks = peaks.len(), "template coarse pass");
            peaks
                .into_iter()
                .map(|(_, x, y)| {
                    let fx = (x as f64 / factor).round() as usize;
                    let fy = (y as f64 / factor).round() as usize;
                    full.refine(fx, fy, radius)
                })
                .filter(|&(s, _, _)| s >= config.threshold)
                .collect::<Vec<_>>()
        }
        None => {
            let (mw, mh) = full.positions();
            let mut map = full.score_map();
            pick_peaks(&mut map, mw, mh, suppress, config.threshold, config.max_matches)
        }
    };

    // Refined peaks can land on the same spot; keep the strongest per neighbourhood.
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut accepted: Vec<(f32, usize, usize)> = Vec::new();
    for c in candidates {
        if accepted.len() >= config.max_matches {
            break;
        }
        let near = accepted
            .iter()
            .any(|a| a.1.abs_diff(c.1) <= suppress.0 && a.2.abs_diff(c.2) <= suppress.1);
        if !near {
            accepted.push(c);
        }
    }

    let raw: Vec<(BoundingBox, f32)> = accepted
        .iter()
        .map(|&(s, x, y)| (BoundingBox::new(x as i32, y as i32, tw, th), s))
        .collect();
    let boxes = geometry::merge_overlapping(raw.iter().map(|(b, _)| *b).collect());
    let scores = boxes
        .iter()
        .map(|m| {
            raw.iter()
                .filter(|(b, _)| m.intersection(b).is_some())
                .map(|(_, s)| *s)
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .collect();
    tracing::debug!(matches = boxes.len(), "template matching");
    DetectionSignal::TemplateMatch { boxes, scores }
}
