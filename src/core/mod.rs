pub mod api;
pub mod baseline;
pub mod error;
pub mod idf;
pub mod mask;
pub mod model;
pub mod pipeline;
pub mod score;
pub mod similarity;
pub mod tokenizer;

pub use baseline::{rescale, rescale_score, BaselineTable};
pub use error::{ScoreError, Side};
pub use idf::IdfTable;
pub use mask::{content_mask, weight_mask};
pub use model::{EmbeddingProvider, Model};
pub use pipeline::{BERTScorer, BERTScorerBuilder, BERTScorerConfig};
pub use score::{compute_bertscore, greedy_match, BERTScoreResult, EmptySentencePolicy, ScoringInput};
pub use similarity::pairwise_cosine;
pub use tokenizer::{pad_batch, EncodingResult, SpecialTokenIds, TextTokenizer, Tokenizer};
