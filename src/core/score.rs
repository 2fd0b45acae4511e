//! Greedy token alignment and aggregation into recall, precision and F1.

use crate::core::{
    baseline::rescale,
    error::{ScoreError, Side},
    similarity::pairwise_cosine,
};
use crate::Result;
use tch::{Device, Kind, Tensor};

/// Result of BERTScore computation for a single reference-candidate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BERTScoreResult {
    /// Precision score (how well candidate tokens match the reference)
    pub precision: f32,
    /// Recall score (how well reference tokens match the candidate)
    pub recall: f32,
    /// F1 score (harmonic mean of precision and recall)
    pub f1: f32,
}

impl BERTScoreResult {
    /// Sentinel used for pairs with no content tokens under [`EmptySentencePolicy::Zero`].
    pub const ZERO: Self = Self {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
    };

    /// Builds a result from recall and precision, deriving F1.
    ///
    /// F1 is 0 when recall and precision sum to exactly 0.
    pub fn from_recall_precision(recall: f32, precision: f32) -> Self {
        let f1 = if recall + precision != 0.0 {
            2.0 * recall * precision / (recall + precision)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
        }
    }
}

/// What to do with a sentence whose weight mask sums to zero.
///
/// Under IDF weighting this includes sentences whose content tokens all
/// carry a zero IDF weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptySentencePolicy {
    /// Abort with [`ScoreError::EmptySentence`].
    #[default]
    Fail,
    /// Score the pair as `(0, 0, 0)`.
    Zero,
}

/// One side (references or candidates) of a scored batch.
pub struct ScoringInput<'a> {
    /// Token embeddings, `(B, K, D)`.
    pub embeddings: &'a Tensor,
    /// Attention mask, `(B, K)`; zero marks padding.
    pub attention_mask: &'a Tensor,
    /// Aggregation weights, `(B, K)`; content mask or IDF weights.
    pub weights: &'a Tensor,
}

/// Greedy best matches for every token.
///
/// Returns `(recall_max, precision_max)` with shapes `(B, K_ref)` and
/// `(B, K_cand)`. Padding positions of the opposite side never win a match,
/// which keeps scores independent of how much padding a batch carries.
pub fn greedy_match(
    similarity: &Tensor,
    reference_attention: &Tensor,
    candidate_attention: &Tensor,
) -> (Tensor, Tensor) {
    let pair_mask = reference_attention
        .ne(0)
        .unsqueeze(2)
        .logical_and(&candidate_attention.ne(0).unsqueeze(1));
    let masked = similarity.masked_fill(&pair_mask.logical_not(), f64::NEG_INFINITY);

    let (recall_max, _) = masked.max_dim(2, false);
    let (precision_max, _) = masked.max_dim(1, false);
    (recall_max, precision_max)
}

/// Weighted mean of `scores` along the token dimension.
///
/// Positions with zero weight contribute exactly zero, even when their score
/// is infinite. Returns the per-sentence means and the weight sums.
fn weighted_mean(scores: &Tensor, weights: &Tensor) -> (Tensor, Tensor) {
    let weights = weights.to_kind(scores.kind());
    let contribution = (scores * &weights).where_self(&weights.gt(0.0), &scores.zeros_like());

    let total = weights.sum_dim_intlist([1i64].as_slice(), false, scores.kind());
    let mean = contribution.sum_dim_intlist([1i64].as_slice(), false, scores.kind()) / &total;
    (mean, total)
}

fn to_vec(tensor: &Tensor) -> Result<Vec<f64>> {
    Ok(Vec::<f64>::try_from(
        tensor.to_device(Device::Cpu).to_kind(Kind::Double),
    )?)
}

/// Computes BERTScore for every pair of a batch.
///
/// # Arguments
/// * `reference` - Reference embeddings, attention mask and weights
/// * `candidate` - Candidate embeddings, attention mask and weights
/// * `rescale_base` - Baseline in `[0, 1)` applied to the best-match scores
/// * `empty_policy` - Handling of sentences whose weights sum to zero
///
/// # Returns
/// One [`BERTScoreResult`] per sentence, in batch order. Under
/// [`EmptySentencePolicy::Fail`], an empty sentence yields
/// [`ScoreError::EmptySentence`] carrying its batch-local index.
pub fn compute_bertscore(
    reference: &ScoringInput<'_>,
    candidate: &ScoringInput<'_>,
    rescale_base: f32,
    empty_policy: EmptySentencePolicy,
) -> Result<Vec<BERTScoreResult>> {
    let similarity = pairwise_cosine(reference.embeddings, candidate.embeddings)?;
    let (batch, ref_len, cand_len) = similarity.size3()?;

    if reference.weights.size() != [batch, ref_len] || candidate.weights.size() != [batch, cand_len] {
        return Err(ScoreError::ShapeMismatch(format!(
            "weights {:?} / {:?} do not match similarity {:?}",
            reference.weights.size(),
            candidate.weights.size(),
            similarity.size()
        ))
        .into());
    }

    let (recall_max, precision_max) =
        greedy_match(&similarity, reference.attention_mask, candidate.attention_mask);
    let recall_max = rescale(&recall_max, rescale_base);
    let precision_max = rescale(&precision_max, rescale_base);

    let (recall, ref_total) = weighted_mean(&recall_max, reference.weights);
    let (precision, cand_total) = weighted_mean(&precision_max, candidate.weights);

    let recall = to_vec(&recall)?;
    let precision = to_vec(&precision)?;
    let ref_total = to_vec(&ref_total)?;
    let cand_total = to_vec(&cand_total)?;

    let mut results = Vec::with_capacity(batch as usize);
    for index in 0..batch as usize {
        let empty_side = if ref_total[index] <= 0.0 {
            Some(Side::Reference)
        } else if cand_total[index] <= 0.0 {
            Some(Side::Candidate)
        } else {
            None
        };

        match (empty_side, empty_policy) {
            (Some(side), EmptySentencePolicy::Fail) => {
                return Err(ScoreError::EmptySentence { index, side }.into());
            }
            (Some(side), EmptySentencePolicy::Zero) => {
                tracing::warn!(index, %side, "sentence has no weighted tokens, scoring as zero");
                results.push(BERTScoreResult::ZERO);
            }
            (None, _) => results.push(BERTScoreResult::from_recall_precision(
                recall[index] as f32,
                precision[index] as f32,
            )),
        }
    }

    Ok(results)
}
