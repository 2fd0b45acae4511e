//! Test doubles for driving the scorer without downloading a model.

#![allow(dead_code)]

use bertscore::core::model::resolve_layer_index;
use bertscore::core::tokenizer::{pad_batch, EncodingResult};
use bertscore::{BERTScorer, BERTScorerBuilder, EmbeddingProvider, SpecialTokenIds, TextTokenizer};
use std::collections::HashMap;
use tch::{Device, Kind, Tensor};

pub const PAD: i64 = 0;
pub const CLS: i64 = 1;
pub const SEP: i64 = 2;
pub const UNK: i64 = 3;

pub const WORDS: &[&str] = &[
    "hello", "world", "oh", "hi", "the", "cat", "sat", "on", "mat", "a", "dog", "ran", "in",
    "park", "was", "sitting", "running",
];

/// Lowercasing whitespace tokenizer over a fixed word list.
pub struct WhitespaceTokenizer {
    vocab: HashMap<String, i64>,
}

impl WhitespaceTokenizer {
    pub fn new(words: &[&str]) -> Self {
        let vocab = words
            .iter()
            .enumerate()
            .map(|(i, word)| (word.to_string(), i as i64 + 4))
            .collect();
        Self { vocab }
    }

    pub fn id(&self, word: &str) -> i64 {
        self.vocab.get(word).copied().unwrap_or(UNK)
    }
}

impl Default for WhitespaceTokenizer {
    fn default() -> Self {
        Self::new(WORDS)
    }
}

impl TextTokenizer for WhitespaceTokenizer {
    fn encode_batch(&self, texts: &[&str], device: Device) -> bertscore::Result<EncodingResult> {
        let sequences = texts
            .iter()
            .map(|text| {
                let mut ids = vec![CLS];
                ids.extend(text.split_whitespace().map(|w| self.id(&w.to_lowercase())));
                ids.push(SEP);
                ids
            })
            .collect();
        Ok(pad_batch(sequences, PAD, device))
    }

    fn special_token_ids(&self) -> SpecialTokenIds {
        SpecialTokenIds {
            begin_id: CLS,
            end_id: SEP,
            pad_id: PAD,
        }
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len() + 4
    }
}

/// Deterministic embeddings: a fixed pseudo-random vector per id plus half the sentence mean.
///
/// The sentence mean makes every vector depend on its neighbours, so padding
/// leaking into the mean would change scores with the batch layout.
pub struct LookupEmbedder {
    table: Tensor,
    dim: i64,
}

impl LookupEmbedder {
    pub fn new(vocab_size: usize, dim: i64, seed: i64) -> Self {
        // No global RNG state, so every instance with the same seed is identical.
        let positions = Tensor::arange(vocab_size as i64 * dim, (Kind::Double, Device::Cpu)) + seed as f64;
        let table = (((positions * 12.9898).sin() * 43758.5453).frac() * 2.0 - 1.0)
            .to_kind(Kind::Float)
            .view([vocab_size as i64, dim]);
        Self { table, dim }
    }
}

impl EmbeddingProvider for LookupEmbedder {
    fn embed(&self, input_ids: &Tensor, attention_mask: &Tensor, layer_index: i64) -> bertscore::Result<Tensor> {
        // A single hidden state: only 0 and -1 are valid.
        resolve_layer_index(layer_index, 1)?;

        let (batch, len) = input_ids.size2()?;
        let tokens = self
            .table
            .index_select(0, &input_ids.reshape([-1]))
            .view([batch, len, self.dim]);

        let mask = attention_mask.to_kind(Kind::Float).unsqueeze(-1);
        let total = (&tokens * &mask).sum_dim_intlist([1i64].as_slice(), true, Kind::Float);
        let count = mask
            .sum_dim_intlist([1i64].as_slice(), true, Kind::Float)
            .clamp_min(1.0);

        Ok(tokens + (total / count) * 0.5)
    }
}

/// Scorer over the test tokenizer and embedder, quiet by default.
pub fn test_builder() -> BERTScorerBuilder {
    BERTScorerBuilder::new()
        .model(rust_bert::pipelines::common::ModelType::Bert, "whitespace-test")
        .batch_size(4)
        .verbose(false)
}

pub fn build_scorer(builder: BERTScorerBuilder) -> bertscore::Result<BERTScorer<WhitespaceTokenizer, LookupEmbedder>> {
    let tokenizer = WhitespaceTokenizer::default();
    let embedder = LookupEmbedder::new(tokenizer.vocab_size(), 16, 42);
    builder.build_with(tokenizer, embedder)
}

pub fn assert_close(actual: f32, expected: f32, tolerance: f32) {
    assert!(
        (actual - expected).abs() < tolerance,
        "expected {expected}, got {actual}"
    );
}
