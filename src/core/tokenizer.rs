//! Sentence tokenization and batching.

use crate::core::error::ScoreError;
use crate::Result;
use std::path::Path;
use tch::{Device, Tensor};
use tokenizers::{Tokenizer as HfTokenizer, TruncationParams};

/// Reserved ids the scorer needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    /// Marker prepended to every sentence (`[CLS]`, `<s>`).
    pub begin_id: i64,
    /// Marker appended to every sentence (`[SEP]`, `</s>`).
    pub end_id: i64,
    /// Id written into padded positions.
    pub pad_id: i64,
}

impl SpecialTokenIds {
    pub fn ids(&self) -> [i64; 3] {
        [self.begin_id, self.end_id, self.pad_id]
    }
}

/// Batched tokenization outputs.
pub struct EncodingResult {
    /// Batched input IDs tensor of shape (batch_size, seq_len), right-padded.
    pub input_ids: Tensor,
    /// Batched attention mask tensor of shape (batch_size, seq_len).
    pub attention_mask: Tensor,
    /// Raw token IDs per sequence (unpadded), including special tokens.
    pub token_ids: Vec<Vec<i64>>,
    /// True length of each sequence (number of tokens before padding).
    pub lengths: Vec<usize>,
}

/// Tokenizer interface consumed by the scorer.
pub trait TextTokenizer {
    /// Tokenizes a batch of sentences into padded tensors on `device`.
    fn encode_batch(&self, texts: &[&str], device: Device) -> Result<EncodingResult>;

    /// Begin, end and pad ids.
    fn special_token_ids(&self) -> SpecialTokenIds;

    /// Number of ids in the vocabulary, added tokens included.
    fn vocab_size(&self) -> usize;
}

/// Macro to create mutable vectors with a specified capacity for batched tokenization.
macro_rules! with_size_mut {
    ($cap:expr, $($name:ident), +) => {
        $(let mut $name = Vec::with_capacity($cap);)+
    };
}

/// Pads a vector in place to ensure it has at least `target_len` elements, using `pad_value`.
#[inline(always)]
fn pad_vec_mut<T: Clone>(vec: &mut Vec<T>, pad_value: T, target_len: usize) -> &Vec<T> {
    if vec.len() < target_len {
        vec.resize(target_len, pad_value);
    }
    vec
}

/// Pads a vector to ensure it has at least `target_len` elements, using `pad_value`.
#[inline(always)]
fn pad_vec<T: Clone>(vec: &[T], pad_value: T, target_len: usize) -> Vec<T> {
    let mut padded = vec.to_owned();
    pad_vec_mut(&mut padded, pad_value, target_len);
    padded
}

/// Stacks equal-length vectors into a single (rows, len) tensor on the specified device.
#[inline(always)]
fn to_batched_tensor<T: Copy + tch::kind::Element>(vecs: &[Vec<T>], device: Device) -> Tensor {
    Tensor::stack(
        &vecs.iter().map(|v| Tensor::from_slice(v)).collect::<Vec<_>>(),
        0,
    )
    .to_device(device)
}

/// Right-pads token sequences to the longest one and builds the attention mask.
///
/// Tokenizer implementations share this so every backend pads the same way.
pub fn pad_batch(sequences: Vec<Vec<i64>>, pad_id: i64, device: Device) -> EncodingResult {
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);

    if sequences.is_empty() {
        let empty = Tensor::zeros([0, 0], (tch::Kind::Int64, device));
        return EncodingResult {
            input_ids: empty.shallow_clone(),
            attention_mask: empty,
            token_ids: Vec::new(),
            lengths: Vec::new(),
        };
    }

    with_size_mut!(sequences.len(), lengths, id_batches, mask_batches);

    for ids in &sequences {
        let mut mask = vec![1i64; ids.len()];
        pad_vec_mut(&mut mask, 0, max_len);

        lengths.push(ids.len());
        id_batches.push(pad_vec(ids, pad_id, max_len));
        mask_batches.push(mask);
    }

    EncodingResult {
        input_ids: to_batched_tensor(&id_batches, device),
        attention_mask: to_batched_tensor(&mask_batches, device),
        token_ids: sequences,
        lengths,
    }
}

/// Wrapper around a Hugging Face `tokenizer.json` tokenizer.
pub struct Tokenizer {
    tokenizer: HfTokenizer,
    special: SpecialTokenIds,
    vocab_size: usize,
}

fn find_token_id(tokenizer: &HfTokenizer, candidates: &[&str], role: &'static str) -> Result<i64> {
    candidates
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .map(i64::from)
        .ok_or_else(|| ScoreError::MissingSpecialToken(role).into())
}

impl Tokenizer {
    /// Loads a tokenizer from a `tokenizer.json` file.
    ///
    /// # Arguments
    /// * `path`: path to the serialized tokenizer.
    /// * `max_len`: maximum number of tokens per sentence, special tokens included.
    pub fn from_file<P: AsRef<Path>>(path: P, max_len: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut tokenizer = HfTokenizer::from_file(path).map_err(anyhow::Error::msg)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                ..Default::default()
            }))
            .map_err(anyhow::Error::msg)?;
        // Padding is applied per batch by `pad_batch`.
        tokenizer.with_padding(None);

        let special = SpecialTokenIds {
            begin_id: find_token_id(&tokenizer, &["[CLS]", "<s>"], "begin marker")?,
            end_id: find_token_id(&tokenizer, &["[SEP]", "</s>"], "end marker")?,
            pad_id: find_token_id(&tokenizer, &["[PAD]", "<pad>"], "padding")?,
        };
        let vocab_size = tokenizer.get_vocab_size(true);

        tracing::debug!(
            path = %path.display(),
            vocab_size,
            begin_id = special.begin_id,
            end_id = special.end_id,
            pad_id = special.pad_id,
            "loaded tokenizer"
        );

        Ok(Self {
            tokenizer,
            special,
            vocab_size,
        })
    }
}

impl TextTokenizer for Tokenizer {
    fn encode_batch(&self, texts: &[&str], device: Device) -> Result<EncodingResult> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(anyhow::Error::msg)?;

        let sequences = encodings
            .iter()
            .map(|encoding| encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
            .collect();

        Ok(pad_batch(sequences, self.special.pad_id, device))
    }

    fn special_token_ids(&self) -> SpecialTokenIds {
        self.special
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // Word-level vocabulary with a lowercasing normalizer, a BERT-style
    // `[CLS] A [SEP]` template and one added token outside the model vocab.
    // The pad id is deliberately not 0.
    const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 8, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": {"type": "Lowercase"},
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": {
    "type": "TemplateProcessing",
    "single": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
    ],
    "pair": [
      {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
      {"Sequence": {"id": "A", "type_id": 0}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 0}},
      {"Sequence": {"id": "B", "type_id": 1}},
      {"SpecialToken": {"id": "[SEP]", "type_id": 1}}
    ],
    "special_tokens": {
      "[CLS]": {"id": "[CLS]", "ids": [3], "tokens": ["[CLS]"]},
      "[SEP]": {"id": "[SEP]", "ids": [4], "tokens": ["[SEP]"]}
    }
  },
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"hello": 0, "world": 1, "[UNK]": 2, "[CLS]": 3, "[SEP]": 4, "oh": 5, "hi": 6, "[PAD]": 7},
    "unk_token": "[UNK]"
  }
}"#;

    fn write_tokenizer(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_tokenizer_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tokenizer(dir.path(), TOKENIZER_JSON);

        let tokenizer = Tokenizer::from_file(&path, 4).unwrap();

        assert_eq!(
            tokenizer.special_token_ids(),
            SpecialTokenIds {
                begin_id: 3,
                end_id: 4,
                pad_id: 7
            }
        );
        // 8 model entries plus the added [MASK]
        assert_eq!(tokenizer.vocab_size(), 9);
    }

    #[test]
    fn test_tokenizer_encode_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tokenizer(dir.path(), TOKENIZER_JSON);
        let tokenizer = Tokenizer::from_file(&path, 4).unwrap();

        let encoded = tokenizer
            .encode_batch(&["Hello world oh hi", "oh"], Device::Cpu)
            .unwrap();

        // first sentence truncated to max_len, markers included
        assert_eq!(encoded.token_ids, vec![vec![3, 0, 1, 4], vec![3, 5, 4]]);
        assert_eq!(encoded.lengths, vec![4, 3]);
        assert_eq!(encoded.input_ids.size(), vec![2, 4]);
        assert_eq!(
            Vec::<i64>::try_from(encoded.input_ids.reshape([-1])).unwrap(),
            vec![3, 0, 1, 4, 3, 5, 4, 7]
        );
        assert_eq!(
            Vec::<i64>::try_from(encoded.attention_mask.reshape([-1])).unwrap(),
            vec![1, 1, 1, 1, 1, 1, 1, 0]
        );
    }

    #[test]
    fn test_tokenizer_without_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tokenizer(dir.path(), &TOKENIZER_JSON.replace("[SEP]", "[END]"));

        let err = Tokenizer::from_file(&path, 16).err().unwrap();
        assert_eq!(
            err.downcast_ref::<ScoreError>(),
            Some(&ScoreError::MissingSpecialToken("end marker"))
        );
    }

    #[test]
    fn test_pad_vec() {
        assert_eq!(pad_vec(&[1, 2], 0, 4), vec![1, 2, 0, 0]);
        assert_eq!(pad_vec(&[1, 2, 3], 0, 2), vec![1, 2, 3]);
    }

    #[test]
    fn test_pad_batch() {
        let encoded = pad_batch(vec![vec![101, 7592, 2088, 102], vec![101, 2821, 102]], 0, Device::Cpu);

        assert_eq!(encoded.input_ids.size(), vec![2, 4]);
        assert_eq!(encoded.lengths, vec![4, 3]);
        assert_eq!(
            Vec::<i64>::try_from(encoded.input_ids.reshape([-1])).unwrap(),
            vec![101, 7592, 2088, 102, 101, 2821, 102, 0]
        );
        assert_eq!(
            Vec::<i64>::try_from(encoded.attention_mask.reshape([-1])).unwrap(),
            vec![1, 1, 1, 1, 1, 1, 1, 0]
        );
        assert_eq!(encoded.token_ids[1], vec![101, 2821, 102]);
    }

    #[test]
    fn test_pad_batch_empty() {
        let encoded = pad_batch(Vec::new(), 0, Device::Cpu);
        assert_eq!(encoded.input_ids.size(), vec![0, 0]);
        assert!(encoded.lengths.is_empty());
    }
}
