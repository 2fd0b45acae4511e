//! Baseline rescaling of similarity scores.
//!
//! Cosine similarities between contextual embeddings cluster close to 1, so
//! scores are shifted against the average similarity measured on unrelated
//! sentence pairs: `score' = (score - base) / (1 - base)`. The baseline maps
//! to 0 and a perfect match stays at 1.

use crate::core::error::ScoreError;
use crate::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tch::Tensor;

/// Checks that a base lies in `[0, 1)`.
pub fn validate_rescale_base(base: f32) -> Result<f32> {
    if (0.0..1.0).contains(&base) {
        Ok(base)
    } else {
        Err(ScoreError::InvalidRescaleBase(base).into())
    }
}

/// Rescales a single score. A base of 0 returns the score unchanged.
pub fn rescale_score(score: f32, base: f32) -> f32 {
    if base == 0.0 {
        score
    } else {
        (score - base) / (1.0 - base)
    }
}

/// Rescales every element of a score tensor. A base of 0 is the identity.
pub fn rescale(scores: &Tensor, base: f32) -> Tensor {
    if base == 0.0 {
        scores.shallow_clone()
    } else {
        let base = base as f64;
        (scores - base) / (1.0 - base)
    }
}

#[derive(Debug, Deserialize)]
struct BaselineRecord {
    model: String,
    base: f32,
}

/// Rescale bases per model name.
#[derive(Debug, Clone, Default)]
pub struct BaselineTable {
    bases: HashMap<String, f32>,
}

impl BaselineTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the base for a model.
    pub fn insert(&mut self, model: &str, base: f32) -> Result<()> {
        self.bases.insert(model.to_string(), validate_rescale_base(base)?);
        Ok(())
    }

    /// Gets the base for a model.
    pub fn get(&self, model: &str) -> Option<f32> {
        self.bases.get(model).copied()
    }

    /// Gets the base for a model, failing when the table has none.
    pub fn require(&self, model: &str) -> Result<f32> {
        self.get(model)
            .ok_or_else(|| ScoreError::MissingBaseline(model.to_string()).into())
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Loads bases from a TSV file.
    /// Expected format: model<tab>base, lines starting with `#` are skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut table = Self::new();
        for record in reader.deserialize() {
            let record: BaselineRecord = record?;
            table.insert(&record.model, record.base)?;
        }

        tracing::debug!(path = %path.display(), models = table.len(), "loaded baseline table");
        Ok(table)
    }
}
