/// Majority-vote arbitration between fused candidates.
///
/// Each candidate gets a short random label burned into a copy of the
/// screenshot; the model is asked several times, in parallel, which label is
/// the element. Most votes wins, ties go to the larger box.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use image::DynamicImage;
use rand::Rng;
use tokio::task::JoinSet;

use crate::config::QuorumConfig;
use crate::errors::LocatorResult;
use crate::llm::provider::LlmProvider;
use crate::llm::schema::{generate_structured, LabelVote};
use crate::llm::types::CallConfig;
use crate::locator::element::UiElement;
use crate::locator::fanout::{harvest, StopSignal};
use crate::locator::fusion::Candidate;
use crate::locator::prompts;
use crate::perception::annotator::annotate_candidates;
use crate::perception::imaging::{downscale_for_model, encode_png_base64};

const LABEL_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase label of `len` characters not already in `taken`.
///
/// After `retry_limit` collisions the label grows by one character, so the
/// loop always terminates.
pub fn random_label<R: Rng + ?Sized>(rng: &mut R, len: usize, taken: &HashSet<String>, retry_limit: usize) -> String {
    let mut len = len.max(1);
    loop {
        for _ in 0..retry_limit.max(1) {
            let label: String = (0..len)
                .map(|_| LABEL_ALPHABET[rng.gen_range(0..LABEL_ALPHABET.len())] as char)
                .collect();
            if !taken.contains(&label) {
                return label;
            }
        }
        len += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledCandidate {
    pub label: String,
    pub candidate: Candidate,
}

/// Deduplicated candidates, each with a unique short label.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    items: Vec<LabelledCandidate>,
}

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>, label_length: usize, retry_limit: usize) -> Self {
        Self::with_rng(candidates, label_length, retry_limit, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        candidates: Vec<Candidate>,
        label_length: usize,
        retry_limit: usize,
        rng: &mut R,
    ) -> Self {
        let mut taken = HashSet::new();
        let mut items: Vec<LabelledCandidate> = Vec::with_capacity(candidates.len());
        for c in candidates {
            if let Some(existing) = items.iter_mut().find(|i| i.candidate.bbox == c.bbox) {
                existing.candidate.sources = existing.candidate.sources.with(c.sources);
                continue;
            }
            let label = random_label(rng, label_length, &taken, retry_limit);
            taken.insert(label.clone());
            items.push(LabelledCandidate {
                label,
                candidate: c,
            });
        }
        Self { items }
    }

    /// Fixed labels; duplicates of label or box are dropped.
    pub fn with_labels(labelled: Vec<(String, Candidate)>) -> Self {
        let mut items: Vec<LabelledCandidate> = Vec::with_capacity(labelled.len());
        for (label, candidate) in labelled {
            let label = label.trim().to_lowercase();
            if items
                .iter()
                .any(|i| i.label == label || i.candidate.bbox == candidate.bbox)
            {
                continue;
            }
            items.push(LabelledCandidate { label, candidate });
        }
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelledCandidate> {
        self.items.iter()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, label: &str) -> Option<&LabelledCandidate> {
        let label = label.trim().to_lowercase();
        self.items.iter().find(|i| i.label == label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuorumOutcome {
    pub winner: Option<LabelledCandidate>,
    /// Valid votes per label, in candidate order.
    pub tally: Vec<(String, usize)>,
    pub interrupted: bool,
}

/// Pick the winner from a tally: most votes, then largest area, then candidate order.
pub fn decide(candidates: &CandidateSet, votes: &[String]) -> (Option<LabelledCandidate>, Vec<(String, usize)>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in votes {
        if let Some(c) = candidates.get(v) {
            *counts.entry(c.label.as_str()).or_default() += 1;
        }
    }
    let tally: Vec<(String, usize)> = candidates
        .iter()
        .map(|c| (c.label.clone(), counts.get(c.label.as_str()).copied().unwrap_or(0)))
        .collect();

    let max = tally.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if max == 0 {
        return (None, tally);
    }
    let winner = candidates
        .iter()
        .filter(|c| counts.get(c.label.as_str()).copied().unwrap_or(0) == max)
        .fold(None::<&LabelledCandidate>, |best, c| match best {
            Some(b) if b.candidate.bbox.area() >= c.candidate.bbox.area() => Some(b),
            _ => Some(c),
        })
        .cloned();
    (winner, tally)
}

pub struct QuorumSelector {
    provider: Arc<dyn LlmProvider>,
    call: CallConfig,
    config: QuorumConfig,
    max_image_side: u32,
    max_image_pixels: u64,
}

impl QuorumSelector {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        call: CallConfig,
        config: QuorumConfig,
        max_image_side: u32,
        max_image_pixels: u64,
    ) -> Self {
        Self {
            provider,
            call,
            config,
            max_image_side,
            max_image_pixels,
        }
    }

    pub async fn select(
        &self,
        element: &UiElement,
        test_data: &str,
        candidates: &CandidateSet,
        image: &DynamicImage,
        vote_count: usize,
        stop: &StopSignal,
    ) -> LocatorResult<QuorumOutcome> {
        if candidates.is_empty() {
            return Ok(QuorumOutcome::default());
        }
        let labelled: Vec<(String, _)> = candidates
            .iter()
            .map(|c| (c.label.clone(), c.candidate.bbox))
            .collect();
        let annotated = annotate_candidates(image, &labelled);
        let model_img = downscale_for_model(&annotated, self.max_image_side, self.max_image_pixels);
        let b64: Arc<str> = encode_png_base64(&model_img.image)?.into();
        let prompt = prompts::selection_prompt(element, test_data, &labelled);

        let mut set = JoinSet::new();
        for vote in 0..vote_count.max(1) {
            let provider = Arc::clone(&self.provider);
            let prompt = prompt.clone();
            let b64 = Arc::clone(&b64);
            let call = self.call.clone();
            set.spawn(async move {
                let answer: LabelVote =
                    generate_structured(provider.as_ref(), prompt, Some(b64), call).await?;
                tracing::debug!(vote, label = %answer.label, "selection vote answered");
                Ok(answer.label)
            });
        }
        let harvested = harvest(set, stop, "quorum").await?;

        let discarded = harvested
            .values
            .iter()
            .filter(|v| candidates.get(v).is_none())
            .count();
        if discarded > 0 {
            tracing::warn!(discarded, "votes named unknown labels");
        }
        let (winner, tally) = decide(candidates, &harvested.values);
        tracing::debug!(?tally, winner = ?winner.as_ref().map(|w| &w.label), "quorum tallied");
        Ok(QuorumOutcome {
            winner,
            tally,
            interrupted: harvested.interrupted,
        })
    }
}
