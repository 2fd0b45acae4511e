//! High-level pipeline assembling tokenizer, encoder, and scoring.

use crate::core::{
    api::resolve_model_files,
    baseline::{validate_rescale_base, BaselineTable},
    error::ScoreError,
    idf::IdfTable,
    mask::{content_mask, weight_mask},
    model::{EmbeddingProvider, Model},
    score::{compute_bertscore, BERTScoreResult, EmptySentencePolicy, ScoringInput},
    tokenizer::{SpecialTokenIds, TextTokenizer, Tokenizer},
};
use crate::Result;
use rust_bert::pipelines::common::ModelType;
use std::{path::PathBuf, sync::Arc};
use tch::Device;

/// Configuration for BERTScorer.
#[derive(Debug, Clone)]
pub struct BERTScorerConfig {
    /// Encoder architecture (BERT, DistilBERT, RoBERTa, DeBERTa)
    pub model_type: ModelType,
    /// Hugging Face hub id or local directory holding the model files
    pub model_name: String,
    /// Device to run on (CPU or CUDA)
    pub device: Device,
    /// Keep only the first N transformer layers of the encoder
    pub encoder_depth: Option<usize>,
    /// Hidden state used as token embeddings (negative counts from the last layer)
    pub layer_index: i64,
    /// Maximum sequence length
    pub max_length: usize,
    /// Batch size for processing
    pub batch_size: usize,
    /// Emit one progress event per batch
    pub verbose: bool,
    /// IDF weights file, one weight per vocabulary id
    pub idf_path: Option<PathBuf>,
    /// Rescale base in [0, 1); 0 disables rescaling
    pub rescale_base: f32,
    /// Baseline table; when set, the base for `model_name` overrides `rescale_base`
    pub baseline_path: Option<PathBuf>,
    /// Handling of sentences with no content tokens
    pub empty_policy: EmptySentencePolicy,
}

impl Default for BERTScorerConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::Bert,
            model_name: "bert-base-uncased".into(),
            device: Device::Cpu,
            encoder_depth: None,
            layer_index: -1,
            max_length: 512,
            batch_size: 128,
            verbose: true,
            idf_path: None,
            rescale_base: 0.0,
            baseline_path: None,
            empty_policy: EmptySentencePolicy::Fail,
        }
    }
}

impl BERTScorerConfig {
    /// Checks option ranges before anything is loaded.
    pub fn validate(&self) -> Result<()> {
        validate_rescale_base(self.rescale_base)?;
        if self.batch_size == 0 {
            return Err(ScoreError::InvalidBatchSize.into());
        }
        Ok(())
    }
}

/// BERTScorer handles the full BERTScore pipeline.
///
/// The tokenizer, the embedding provider and the IDF table are shared,
/// read-only state; each call tokenizes and embeds its own input from
/// scratch.
pub struct BERTScorer<T = Tokenizer, E = Model> {
    tokenizer: T,
    provider: E,
    config: BERTScorerConfig,
    idf: Option<Arc<IdfTable>>,
    special: SpecialTokenIds,
    rescale_base: f32,
}

impl BERTScorer {
    /// Loads the tokenizer and encoder named in the configuration.
    pub fn new(config: BERTScorerConfig) -> Result<Self> {
        config.validate()?;

        let files = resolve_model_files(&config.model_name)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer, config.max_length)?;
        let model = Model::new(
            config.model_type,
            &files.config,
            &files.weights,
            config.encoder_depth,
            config.device,
        )?;

        Self::from_parts(tokenizer, model, config)
    }
}

impl<T: TextTokenizer, E: EmbeddingProvider> BERTScorer<T, E> {
    /// Assembles a scorer from an existing tokenizer and embedding provider.
    ///
    /// Loads the IDF table and baseline named in the configuration; an IDF
    /// table that does not match the tokenizer vocabulary fails here rather
    /// than at scoring time.
    pub fn from_parts(tokenizer: T, provider: E, config: BERTScorerConfig) -> Result<Self> {
        config.validate()?;

        let rescale_base = match &config.baseline_path {
            Some(path) => BaselineTable::load(path)?.require(&config.model_name)?,
            None => config.rescale_base,
        };

        let idf = match &config.idf_path {
            Some(path) => {
                let table = IdfTable::load(path)?;
                table.ensure_vocab_size(tokenizer.vocab_size())?;
                Some(Arc::new(table))
            }
            None => None,
        };

        let special = tokenizer.special_token_ids();

        tracing::info!(
            model = %config.model_name,
            layer_index = config.layer_index,
            idf = idf.is_some(),
            rescale_base,
            "BERTScorer ready"
        );

        Ok(Self {
            tokenizer,
            provider,
            config,
            idf,
            special,
            rescale_base,
        })
    }

    /// Replaces the IDF table, checking it against the tokenizer vocabulary.
    pub fn with_idf_table(mut self, table: Arc<IdfTable>) -> Result<Self> {
        table.ensure_vocab_size(self.tokenizer.vocab_size())?;
        self.idf = Some(table);
        Ok(self)
    }

    /// Get the configuration.
    pub fn config(&self) -> &BERTScorerConfig {
        &self.config
    }

    /// IDF table in use, if any.
    pub fn idf_table(&self) -> Option<&Arc<IdfTable>> {
        self.idf.as_ref()
    }

    /// Rescale base in effect after baseline lookup.
    pub fn rescale_base(&self) -> f32 {
        self.rescale_base
    }

    /// F1 per pair, using the configured batch size and verbosity.
    pub fn score<R, C>(&self, references: &[R], candidates: &[C]) -> Result<Vec<f32>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        self.score_with(
            references,
            candidates,
            self.config.batch_size,
            self.config.verbose,
        )
    }

    /// F1 per pair.
    ///
    /// # Arguments
    /// * `references` - Reference sentences
    /// * `candidates` - Candidate sentences (same length as references)
    /// * `batch_size` - Number of pairs per encoder call
    /// * `verbose` - Emit one progress event per batch
    pub fn score_with<R, C>(
        &self,
        references: &[R],
        candidates: &[C],
        batch_size: usize,
        verbose: bool,
    ) -> Result<Vec<f32>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        Ok(self
            .score_triples_with(references, candidates, batch_size, verbose)?
            .into_iter()
            .map(|result| result.f1)
            .collect())
    }

    /// Recall, precision and F1 per pair, using the configured batch size and verbosity.
    pub fn score_triples<R, C>(
        &self,
        references: &[R],
        candidates: &[C],
    ) -> Result<Vec<BERTScoreResult>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        self.score_triples_with(
            references,
            candidates,
            self.config.batch_size,
            self.config.verbose,
        )
    }

    /// Recall, precision and F1 per pair, in input order.
    pub fn score_triples_with<R, C>(
        &self,
        references: &[R],
        candidates: &[C],
        batch_size: usize,
        verbose: bool,
    ) -> Result<Vec<BERTScoreResult>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        check_lengths(references.len(), candidates.len())?;
        if batch_size == 0 {
            return Err(ScoreError::InvalidBatchSize.into());
        }

        let n_examples = references.len();
        let n_batch = n_examples.div_ceil(batch_size);
        let mut all_results = Vec::with_capacity(n_examples);

        for (step, batch_start) in (0..n_examples).step_by(batch_size).enumerate() {
            let batch_end = (batch_start + batch_size).min(n_examples);

            let batch_results = self
                .score_batch(
                    &references[batch_start..batch_end],
                    &candidates[batch_start..batch_end],
                )
                .map_err(|e| match e.downcast::<ScoreError>() {
                    Ok(err) => err.offset_index(batch_start).into(),
                    Err(e) => e,
                })?;
            all_results.extend(batch_results);

            if verbose {
                tracing::info!(
                    batch = step + 1,
                    total = n_batch,
                    pairs = batch_end,
                    "Calculating BERTScore"
                );
            }
        }

        Ok(all_results)
    }

    /// Scores a single batch of reference-candidate pairs.
    ///
    /// Indices in [`ScoreError::EmptySentence`] are relative to this batch.
    pub fn score_batch<R, C>(
        &self,
        references: &[R],
        candidates: &[C],
    ) -> Result<Vec<BERTScoreResult>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        check_lengths(references.len(), candidates.len())?;
        if references.is_empty() {
            return Ok(Vec::new());
        }

        let references: Vec<&str> = references.iter().map(AsRef::as_ref).collect();
        let candidates: Vec<&str> = candidates.iter().map(AsRef::as_ref).collect();

        let device = self.config.device;
        let ref_encoding = self.tokenizer.encode_batch(&references, device)?;
        let cand_encoding = self.tokenizer.encode_batch(&candidates, device)?;

        let ref_embeddings = self.provider.embed(
            &ref_encoding.input_ids,
            &ref_encoding.attention_mask,
            self.config.layer_index,
        )?;
        let cand_embeddings = self.provider.embed(
            &cand_encoding.input_ids,
            &cand_encoding.attention_mask,
            self.config.layer_index,
        )?;

        let idf = self.idf.as_deref();
        let ref_content = content_mask(
            &ref_encoding.input_ids,
            &ref_encoding.attention_mask,
            &self.special,
        );
        let cand_content = content_mask(
            &cand_encoding.input_ids,
            &cand_encoding.attention_mask,
            &self.special,
        );

        let embed_device = ref_embeddings.device();
        let ref_weights = weight_mask(&ref_encoding.input_ids, &ref_content, idf)?.to_device(embed_device);
        let cand_weights =
            weight_mask(&cand_encoding.input_ids, &cand_content, idf)?.to_device(embed_device);
        let ref_attention = ref_encoding.attention_mask.to_device(embed_device);
        let cand_attention = cand_encoding.attention_mask.to_device(embed_device);

        tracing::debug!(
            pairs = references.len(),
            ref_len = ref_encoding.lengths.iter().max().copied().unwrap_or(0),
            cand_len = cand_encoding.lengths.iter().max().copied().unwrap_or(0),
            "scoring batch"
        );

        compute_bertscore(
            &ScoringInput {
                embeddings: &ref_embeddings,
                attention_mask: &ref_attention,
                weights: &ref_weights,
            },
            &ScoringInput {
                embeddings: &cand_embeddings,
                attention_mask: &cand_attention,
                weights: &cand_weights,
            },
            self.rescale_base,
            self.config.empty_policy,
        )
    }

    /// Scores with multiple references per candidate.
    ///
    /// # Arguments
    /// * `references` - List of reference lists (one list per candidate)
    /// * `candidates` - List of candidate sentences
    ///
    /// # Returns
    /// One BERTScoreResult per candidate: the one with the best F1 among its references.
    /// An empty-sentence error carries the candidate's index.
    pub fn score_multi_refs<R, C>(
        &self,
        references: &[Vec<R>],
        candidates: &[C],
    ) -> Result<Vec<BERTScoreResult>>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        check_lengths(references.len(), candidates.len())?;

        let mut best_results = Vec::with_capacity(candidates.len());

        for (i, (refs, candidate)) in references.iter().zip(candidates).enumerate() {
            if refs.is_empty() {
                return Err(ScoreError::NoReferences(i).into());
            }

            let repeated = vec![candidate.as_ref(); refs.len()];
            let results = self
                .score_triples_with(refs, &repeated, self.config.batch_size, false)
                .map_err(|e| match e.downcast::<ScoreError>() {
                    Ok(ScoreError::EmptySentence { side, .. }) => {
                        ScoreError::EmptySentence { index: i, side }.into()
                    }
                    Ok(err) => err.into(),
                    Err(e) => e,
                })?;

            let best = results
                .into_iter()
                .reduce(|best, result| if result.f1 > best.f1 { result } else { best })
                .ok_or(ScoreError::NoReferences(i))?;
            best_results.push(best);
        }

        Ok(best_results)
    }

    /// Builds an IDF table from a reference corpus using this scorer's tokenizer.
    pub fn idf_from_corpus<S: AsRef<str>>(&self, sentences: &[S]) -> Result<IdfTable> {
        let mut token_ids = Vec::with_capacity(sentences.len());
        for chunk in sentences.chunks(self.config.batch_size) {
            let texts: Vec<&str> = chunk.iter().map(AsRef::as_ref).collect();
            token_ids.extend(self.tokenizer.encode_batch(&texts, Device::Cpu)?.token_ids);
        }

        let table = IdfTable::from_references(&token_ids, self.tokenizer.vocab_size(), &self.special);
        tracing::info!(sentences = sentences.len(), entries = table.len(), "computed IDF table");
        Ok(table)
    }
}

fn check_lengths(references: usize, candidates: usize) -> Result<()> {
    if references != candidates {
        return Err(ScoreError::LengthMismatch {
            references,
            candidates,
        }
        .into());
    }
    Ok(())
}

/// Builder for creating BERTScorer with custom configuration.
pub struct BERTScorerBuilder {
    pub config: BERTScorerConfig,
}

impl BERTScorerBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: BERTScorerConfig::default(),
        }
    }

    /// Sets the model type and hub id or local directory.
    pub fn model(mut self, model_type: ModelType, model_name: &str) -> Self {
        self.config.model_type = model_type;
        self.config.model_name = model_name.to_string();
        self
    }

    /// Sets the device.
    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    /// Keeps only the first `depth` transformer layers.
    pub fn encoder_depth(mut self, depth: usize) -> Self {
        self.config.encoder_depth = Some(depth);
        self
    }

    /// Sets the hidden state to extract embeddings from.
    pub fn layer_index(mut self, layer: i64) -> Self {
        self.config.layer_index = layer;
        self
    }

    /// Sets the maximum sequence length.
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.config.max_length = max_length;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Enables per-batch progress events.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Enables IDF weighting from a weights file.
    pub fn idf_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.idf_path = Some(path.into());
        self
    }

    /// Sets the rescale base.
    pub fn rescale_base(mut self, base: f32) -> Self {
        self.config.rescale_base = base;
        self
    }

    /// Takes the rescale base for the model from a baseline table.
    pub fn baseline_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.baseline_path = Some(path.into());
        self
    }

    /// Sets the handling of sentences with no content tokens.
    pub fn empty_policy(mut self, policy: EmptySentencePolicy) -> Self {
        self.config.empty_policy = policy;
        self
    }

    /// Builds the BERTScorer, loading the tokenizer and encoder.
    pub fn build(self) -> Result<BERTScorer> {
        BERTScorer::new(self.config)
    }

    /// Builds a BERTScorer around an existing tokenizer and embedding provider.
    pub fn build_with<T: TextTokenizer, E: EmbeddingProvider>(
        self,
        tokenizer: T,
        provider: E,
    ) -> Result<BERTScorer<T, E>> {
        BERTScorer::from_parts(tokenizer, provider, self.config)
    }
}

impl Default for BERTScorerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BERTScorerConfig::default();

        assert_eq!(config.model_type, ModelType::Bert);
        assert_eq!(config.model_name, "bert-base-uncased");
        assert_eq!(config.layer_index, -1);
        assert_eq!(config.encoder_depth, None);
        assert_eq!(config.max_length, 512);
        assert_eq!(config.batch_size, 128);
        assert!(config.verbose);
        assert!(config.idf_path.is_none());
        assert_eq!(config.rescale_base, 0.0);
        assert_eq!(config.empty_policy, EmptySentencePolicy::Fail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let builder = BERTScorerBuilder::new()
            .model(ModelType::Roberta, "roberta-large")
            .device(Device::Cpu)
            .encoder_depth(17)
            .layer_index(-2)
            .max_length(256)
            .batch_size(32)
            .verbose(false)
            .idf_path("/path/to/idf.txt")
            .rescale_base(0.83)
            .baseline_path("/path/to/baselines.tsv")
            .empty_policy(EmptySentencePolicy::Zero);

        let config = builder.config;

        assert_eq!(config.model_type, ModelType::Roberta);
        assert_eq!(config.model_name, "roberta-large");
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.encoder_depth, Some(17));
        assert_eq!(config.layer_index, -2);
        assert_eq!(config.max_length, 256);
        assert_eq!(config.batch_size, 32);
        assert!(!config.verbose);
        assert_eq!(config.idf_path, Some(PathBuf::from("/path/to/idf.txt")));
        assert_eq!(config.rescale_base, 0.83);
        assert_eq!(config.baseline_path, Some(PathBuf::from("/path/to/baselines.tsv")));
        assert_eq!(config.empty_policy, EmptySentencePolicy::Zero);
    }

    #[test]
    fn test_config_validation() {
        let config = BERTScorerConfig {
            rescale_base: 1.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScoreError>(),
            Some(&ScoreError::InvalidRescaleBase(1.0))
        );

        let config = BERTScorerConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.downcast_ref::<ScoreError>(), Some(&ScoreError::InvalidBatchSize));
    }

    #[test]
    fn test_check_lengths() {
        assert!(check_lengths(3, 3).is_ok());

        let err = check_lengths(3, 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScoreError>(),
            Some(&ScoreError::LengthMismatch {
                references: 3,
                candidates: 2
            })
        );
    }
}
