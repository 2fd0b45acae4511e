//! IDF (Inverse Document Frequency) weights for importance weighting.

use crate::core::{error::ScoreError, tokenizer::SpecialTokenIds};
use crate::Result;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tch::{Device, Kind, Tensor};

/// Vocabulary-indexed IDF weights.
///
/// The table is immutable once built and is meant to be shared behind an
/// `Arc` by every scoring call. Ids outside the table weigh zero.
#[derive(Debug, Clone, PartialEq)]
pub struct IdfTable {
    weights: Vec<f32>,
}

impl IdfTable {
    /// Creates a table from weights in vocabulary order.
    ///
    /// Every weight must be finite and non-negative.
    pub fn from_weights(weights: Vec<f32>) -> Result<Self> {
        if let Some((line, value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(ScoreError::InvalidIdfWeight {
                line: line + 1,
                value: value.to_string(),
            }
            .into());
        }
        Ok(Self { weights })
    }

    /// Loads a table from a UTF-8 file holding one weight per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let table = Self::from_reader(BufReader::new(File::open(path)?))?;
        tracing::info!(path = %path.display(), entries = table.len(), "loaded IDF table");
        Ok(table)
    }

    /// Reads one weight per line, line order being vocabulary id order.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut weights = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let value = line.trim();
            let weight: f32 = value.parse().map_err(|_| ScoreError::InvalidIdfWeight {
                line: i + 1,
                value: value.to_string(),
            })?;
            weights.push(weight);
        }
        Self::from_weights(weights)
    }

    /// Computes IDF weights from a corpus of tokenized reference sentences.
    ///
    /// # Arguments
    /// * `reference_tokens` - Token ID sequences, one per reference sentence
    /// * `vocab_size` - Number of entries in the resulting table
    /// * `special` - Marker and pad ids, which get zero weight
    ///
    /// Each id gets `ln((N + 1) / (df + 1))` where `N` is the number of
    /// sentences and `df` the number of sentences containing the id.
    pub fn from_references(
        reference_tokens: &[Vec<i64>],
        vocab_size: usize,
        special: &SpecialTokenIds,
    ) -> Self {
        let num_documents = reference_tokens.len();

        // Document frequency: each id counted once per sentence
        let document_frequencies = reference_tokens
            .par_iter()
            .fold(
                || vec![0usize; vocab_size],
                |mut df, tokens| {
                    let unique: HashSet<i64> = tokens.iter().copied().collect();
                    for id in unique {
                        if let Some(count) = usize::try_from(id).ok().and_then(|i| df.get_mut(i)) {
                            *count += 1;
                        }
                    }
                    df
                },
            )
            .reduce(
                || vec![0usize; vocab_size],
                |mut total, partial| {
                    total.iter_mut().zip(partial).for_each(|(t, p)| *t += p);
                    total
                },
            );

        let log_num_docs_plus_one = ((num_documents + 1) as f32).ln();
        let mut weights: Vec<f32> = document_frequencies
            .iter()
            .map(|&df| log_num_docs_plus_one - ((df + 1) as f32).ln())
            .collect();

        for id in special.ids() {
            if let Some(w) = usize::try_from(id).ok().and_then(|i| weights.get_mut(i)) {
                *w = 0.0;
            }
        }

        Self { weights }
    }

    /// Writes the table in the one-weight-per-line format read by [`IdfTable::load`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for weight in &self.weights {
            writeln!(writer, "{}", weight)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of vocabulary entries.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weight of a token id; zero for ids outside the table.
    pub fn weight(&self, token_id: i64) -> f32 {
        usize::try_from(token_id)
            .ok()
            .and_then(|i| self.weights.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// Fails unless the table covers exactly `vocab_size` ids.
    pub fn ensure_vocab_size(&self, vocab_size: usize) -> Result<()> {
        if self.weights.len() != vocab_size {
            return Err(ScoreError::IdfSizeMismatch {
                table: self.weights.len(),
                vocab: vocab_size,
            }
            .into());
        }
        Ok(())
    }

    /// Looks up the weight of every id in a batch of token ids.
    ///
    /// Returns a float tensor with the shape and device of `input_ids`.
    pub fn lookup(&self, input_ids: &Tensor) -> Result<Tensor> {
        let flat = input_ids
            .to_device(Device::Cpu)
            .to_kind(Kind::Int64)
            .reshape([-1]);
        let ids = Vec::<i64>::try_from(flat)?;
        let weights: Vec<f32> = ids.iter().map(|&id| self.weight(id)).collect();

        Ok(Tensor::from_slice(&weights)
            .view(input_ids.size().as_slice())
            .to_device(input_ids.device()))
    }
}
