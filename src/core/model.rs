//! Encoder loading and embedding extraction.

use crate::core::error::ScoreError;
use crate::Result;
use rust_bert::bert::{BertConfig, BertEmbeddings, BertModel};
use rust_bert::deberta::{DebertaConfig, DebertaForMaskedLM};
use rust_bert::distilbert::{DistilBertConfig, DistilBertModel};
use rust_bert::pipelines::common::ModelType;
use rust_bert::roberta::{RobertaConfig, RobertaForMaskedLM};
use rust_bert::Config;
use std::path::Path;
use tch::{nn::VarStore, no_grad, Device, Tensor};

/// Source of per-token contextual embeddings.
///
/// The scorer only needs this one call, so any encoder that can map padded
/// token ids to hidden states can back it.
pub trait EmbeddingProvider {
    /// Embeds a padded batch.
    ///
    /// # Arguments
    /// * `input_ids` - Token ids, shape (batch, seq_len)
    /// * `attention_mask` - 1 for real tokens, 0 for padding, shape (batch, seq_len)
    /// * `layer_index` - Hidden state to return; negative values count from the last layer
    ///
    /// # Returns
    /// Embeddings of shape (batch, seq_len, hidden_dim)
    fn embed(&self, input_ids: &Tensor, attention_mask: &Tensor, layer_index: i64) -> Result<Tensor>;
}

/// Maps a possibly negative layer index onto `0..num_states`.
pub fn resolve_layer_index(layer_index: i64, num_states: usize) -> Result<usize> {
    let resolved = if layer_index >= 0 {
        layer_index
    } else {
        num_states as i64 + layer_index
    };

    if resolved < 0 || resolved >= num_states as i64 {
        return Err(ScoreError::LayerOutOfRange {
            requested: layer_index,
            available: num_states,
        }
        .into());
    }
    Ok(resolved as usize)
}

/// Supported encoder models for embedding extraction.
enum EncoderModel {
    Bert(BertModel<BertEmbeddings>),
    DistilBert(DistilBertModel),
    Roberta(RobertaForMaskedLM),
    Deberta(DebertaForMaskedLM),
}

/// Model container holding the encoder and variable store.
pub struct Model {
    _vs: VarStore,
    encoder: EncoderModel,
    device: Device,
    num_layers: i64,
}

/// Keeps only the first `depth` layers when a positive depth below the current one is given.
fn truncate_layers(layers: &mut i64, depth: Option<usize>) {
    if let Some(depth) = depth {
        let depth = depth as i64;
        if depth > 0 && depth < *layers {
            *layers = depth;
        }
    }
}

impl Model {
    /// Loads a pre-trained encoder configured to output hidden states.
    ///
    /// # Arguments
    /// * `model_type` - Encoder architecture
    /// * `config_path` - Model `config.json`
    /// * `weights_path` - Weights in `tch` format
    /// * `encoder_depth` - Keep only the first N transformer layers
    /// * `device` - Device to run on
    pub fn new<P: AsRef<Path>>(
        model_type: ModelType,
        config_path: P,
        weights_path: P,
        encoder_depth: Option<usize>,
        device: Device,
    ) -> Result<Self> {
        let mut var_store = VarStore::new(device);

        let (encoder, num_layers) = {
            let root = var_store.root();
            match model_type {
                ModelType::Bert => {
                    let mut config = BertConfig::from_file(config_path);
                    config.output_hidden_states = Some(true);
                    truncate_layers(&mut config.num_hidden_layers, encoder_depth);
                    let model = BertModel::<BertEmbeddings>::new(&root / "bert", &config);
                    (EncoderModel::Bert(model), config.num_hidden_layers)
                }
                ModelType::DistilBert => {
                    let mut config = DistilBertConfig::from_file(config_path);
                    config.output_hidden_states = Some(true);
                    truncate_layers(&mut config.n_layers, encoder_depth);
                    let model = DistilBertModel::new(&root / "distilbert", &config);
                    (EncoderModel::DistilBert(model), config.n_layers)
                }
                ModelType::Roberta | ModelType::XLMRoberta => {
                    let mut config = RobertaConfig::from_file(config_path);
                    config.output_hidden_states = Some(true);
                    truncate_layers(&mut config.num_hidden_layers, encoder_depth);
                    let model = RobertaForMaskedLM::new(&root, &config);
                    (EncoderModel::Roberta(model), config.num_hidden_layers)
                }
                ModelType::Deberta => {
                    let mut config = DebertaConfig::from_file(config_path);
                    config.output_hidden_states = Some(true);
                    truncate_layers(&mut config.num_hidden_layers, encoder_depth);
                    let model = DebertaForMaskedLM::new(&root, &config);
                    (EncoderModel::Deberta(model), config.num_hidden_layers)
                }
                _ => anyhow::bail!("Model type {:?} not supported", model_type),
            }
        };

        // Only the variables of the (possibly truncated) model are read from the file.
        var_store.load(weights_path)?;

        tracing::info!(
            model_type = ?model_type,
            num_layers,
            device = ?device,
            "loaded encoder"
        );

        Ok(Model {
            _vs: var_store,
            encoder,
            device,
            num_layers,
        })
    }

    /// Number of transformer layers after truncation.
    pub fn num_layers(&self) -> i64 {
        self.num_layers
    }

    /// Forward pass: produces the hidden-state tensor of every layer.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Vec<Tensor>> {
        let input_ids = input_ids.to_device(self.device);
        let attention_mask = attention_mask.to_device(self.device);

        no_grad(|| match &self.encoder {
            EncoderModel::Bert(model) => model.forward_hidden_states(input_ids, attention_mask),
            EncoderModel::DistilBert(model) => model.forward_hidden_states(input_ids, attention_mask),
            EncoderModel::Roberta(model) => model.forward_hidden_states(input_ids, attention_mask),
            EncoderModel::Deberta(model) => model.forward_hidden_states(input_ids, attention_mask),
        })
    }
}

impl EmbeddingProvider for Model {
    fn embed(&self, input_ids: &Tensor, attention_mask: &Tensor, layer_index: i64) -> Result<Tensor> {
        let mut hidden_states = self.forward(input_ids, attention_mask)?;
        let idx = resolve_layer_index(layer_index, hidden_states.len())?;
        Ok(hidden_states.swap_remove(idx))
    }
}

// Model Trait for extracting hidden states

trait ForwardHiddenStates {
    fn forward_hidden_states(&self, input_ids: Tensor, attention_mask: Tensor) -> Result<Vec<Tensor>>;
}

fn missing_hidden_states() -> anyhow::Error {
    anyhow::anyhow!("encoder did not return hidden states")
}

impl ForwardHiddenStates for BertModel<BertEmbeddings> {
    fn forward_hidden_states(&self, input_ids: Tensor, attention_mask: Tensor) -> Result<Vec<Tensor>> {
        self.forward_t(
            Some(&input_ids),
            Some(&attention_mask),
            None,
            None,
            None,
            None,
            None,
            false,
        )?
        .all_hidden_states
        .ok_or_else(missing_hidden_states)
    }
}

impl ForwardHiddenStates for DistilBertModel {
    fn forward_hidden_states(&self, input_ids: Tensor, attention_mask: Tensor) -> Result<Vec<Tensor>> {
        self.forward_t(Some(&input_ids), Some(&attention_mask), None, false)?
            .all_hidden_states
            .ok_or_else(missing_hidden_states)
    }
}

impl ForwardHiddenStates for RobertaForMaskedLM {
    fn forward_hidden_states(&self, input_ids: Tensor, attention_mask: Tensor) -> Result<Vec<Tensor>> {
        self.forward_t(
            Some(&input_ids),
            Some(&attention_mask),
            None,
            None,
            None,
            None,
            None,
            false,
        )
        .all_hidden_states
        .ok_or_else(missing_hidden_states)
    }
}

impl ForwardHiddenStates for DebertaForMaskedLM {
    fn forward_hidden_states(&self, input_ids: Tensor, attention_mask: Tensor) -> Result<Vec<Tensor>> {
        self.forward_t(
            Some(&input_ids),
            Some(&attention_mask),
            None,
            None,
            None,
            false,
        )?
        .all_hidden_states
        .ok_or_else(missing_hidden_states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_index_calculation() {
        // 13 hidden states: embeddings + 12 transformer layers
        assert_eq!(resolve_layer_index(-1, 13).unwrap(), 12); // Last layer
        assert_eq!(resolve_layer_index(-2, 13).unwrap(), 11); // Second to last
        assert_eq!(resolve_layer_index(0, 13).unwrap(), 0); // First layer
        assert_eq!(resolve_layer_index(5, 13).unwrap(), 5); // Middle layer

        let err = resolve_layer_index(13, 13).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScoreError>(),
            Some(&ScoreError::LayerOutOfRange {
                requested: 13,
                available: 13
            })
        );
        assert!(resolve_layer_index(-14, 13).is_err());
        assert!(resolve_layer_index(-1, 0).is_err());
    }

    #[test]
    fn test_truncate_layers() {
        let mut layers = 12;
        truncate_layers(&mut layers, None);
        assert_eq!(layers, 12);

        truncate_layers(&mut layers, Some(0));
        assert_eq!(layers, 12);

        truncate_layers(&mut layers, Some(24));
        assert_eq!(layers, 12);

        truncate_layers(&mut layers, Some(4));
        assert_eq!(layers, 4);
    }
}
