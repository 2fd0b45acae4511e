//! Pairwise cosine similarity between reference and candidate tokens.

use crate::core::error::ScoreError;
use crate::Result;
use tch::Tensor;

/// Floor applied to token norms so all-zero vectors normalize to zero instead of NaN.
pub const NORM_EPSILON: f64 = 1e-12;

/// Normalizes every token vector to unit length along the last dimension.
pub fn normalize_embeddings(embeddings: &Tensor) -> Tensor {
    let norms = embeddings
        .norm_scalaropt_dim(2.0, [-1], true)
        .clamp_min(NORM_EPSILON);
    embeddings / norms
}

/// Computes the batched cosine similarity tensor.
///
/// `reference` is `(B, K_ref, D)` and `candidate` is `(B, K_cand, D)`; the
/// result is `(B, K_ref, K_cand)` where entry `[b, i, j]` is the cosine
/// between reference token `i` and candidate token `j` of sentence `b`.
/// Padding positions are kept; they are filtered out during alignment.
pub fn pairwise_cosine(reference: &Tensor, candidate: &Tensor) -> Result<Tensor> {
    let (ref_batch, _, ref_dim) = reference.size3()?;
    let (cand_batch, _, cand_dim) = candidate.size3()?;

    if ref_batch != cand_batch {
        return Err(ScoreError::ShapeMismatch(format!(
            "reference batch has {} sentences, candidate batch has {}",
            ref_batch, cand_batch
        ))
        .into());
    }
    if ref_dim != cand_dim {
        return Err(ScoreError::ShapeMismatch(format!(
            "reference embeddings have dimension {}, candidate embeddings {}",
            ref_dim, cand_dim
        ))
        .into());
    }

    let reference_norm = normalize_embeddings(reference);
    let candidate_norm = normalize_embeddings(&candidate.to_kind(reference.kind()));

    Ok(reference_norm.bmm(&candidate_norm.transpose(1, 2)))
}
