//! Error types raised by the scorer.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which side of a reference/candidate pair an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Reference,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => f.write_str("reference"),
            Side::Candidate => f.write_str("candidate"),
        }
    }
}

/// Scoring and configuration errors.
///
/// Errors coming from the tokenizer, the encoder or `tch` are not wrapped;
/// they travel through `anyhow` untouched. Use
/// `err.downcast_ref::<ScoreError>()` to match on these variants.
#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    /// Reference and candidate lists differ in length.
    #[error("number of references ({references}) must equal number of candidates ({candidates})")]
    LengthMismatch { references: usize, candidates: usize },

    /// IDF table does not cover the tokenizer vocabulary exactly.
    #[error("IDF table has {table} entries but the tokenizer vocabulary has {vocab}")]
    IdfSizeMismatch { table: usize, vocab: usize },

    /// A line of the IDF resource is not a finite, non-negative number.
    #[error("invalid IDF weight {value:?} on line {line}")]
    InvalidIdfWeight { line: usize, value: String },

    /// Rescale base outside `[0, 1)`.
    #[error("rescale base must be in [0, 1), got {0}")]
    InvalidRescaleBase(f32),

    /// Batch size of zero.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    /// A sentence has no weighted tokens left after masking.
    #[error("{side} sentence at index {index} has no weighted tokens")]
    EmptySentence { index: usize, side: Side },

    /// Tensor shapes do not line up.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Requested hidden state does not exist.
    #[error("requested layer {requested} but the encoder produced {available} hidden states")]
    LayerOutOfRange { requested: i64, available: usize },

    /// Tokenizer vocabulary lacks a required special token.
    #[error("tokenizer vocabulary has no {0} token")]
    MissingSpecialToken(&'static str),

    /// Baseline table has no entry for the configured model.
    #[error("no rescale baseline for model {0:?}")]
    MissingBaseline(String),

    /// A local model directory lacks one of the required files.
    #[error("model file {} not found", .0.display())]
    MissingModelFile(PathBuf),

    /// A multi-reference entry has no references.
    #[error("reference list for candidate {0} is empty")]
    NoReferences(usize),
}

impl ScoreError {
    /// Shifts a batch-local sentence index to its position in the full input.
    pub(crate) fn offset_index(self, offset: usize) -> Self {
        match self {
            ScoreError::EmptySentence { index, side } => ScoreError::EmptySentence {
                index: index + offset,
                side,
            },
            other => other,
        }
    }
}
