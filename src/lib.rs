//! Rust implementation of BERTScore.
//!
//! Scores candidate sentences against references by greedily matching
//! contextual token embeddings, with optional IDF weighting and baseline
//! rescaling.

pub mod core;

// Re-export main types
pub use self::core::{
    BERTScoreResult, BERTScorer, BERTScorerBuilder, BERTScorerConfig, EmbeddingProvider,
    EmptySentencePolicy, IdfTable, ScoreError, Side, SpecialTokenIds, TextTokenizer,
};

pub use self::core::baseline;
pub use self::core::idf;
pub use self::core::pipeline;
pub use self::core::score;

/// Convenient alias for a result with a boxed error.
pub type Result<T> = anyhow::Result<T>;
