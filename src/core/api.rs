//! Resolution of encoder and tokenizer files.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;

use crate::core::error::ScoreError;
use crate::Result;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "rust_model.ot";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Files needed to build a scorer for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    /// Encoder configuration (`config.json`).
    pub config: PathBuf,
    /// Encoder weights in `tch` format (`rust_model.ot`).
    pub weights: PathBuf,
    /// Serialized tokenizer (`tokenizer.json`).
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    /// Files laid out in a local model directory.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            config: dir.join(CONFIG_FILE),
            weights: dir.join(WEIGHTS_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
        }
    }

    /// Fails with the first file that does not exist.
    pub fn ensure_exist(&self) -> Result<()> {
        for path in [&self.config, &self.weights, &self.tokenizer] {
            if !path.is_file() {
                return Err(ScoreError::MissingModelFile(path.clone()).into());
            }
        }
        Ok(())
    }
}

/// Fetches model files from the Hugging Face hub, reusing the local cache.
pub fn fetch_model_files(model_name: &str) -> Result<ModelFiles> {
    let api = Api::new()?;
    let repo = api.model(model_name.to_string());

    let config = repo
        .get(CONFIG_FILE)
        .map_err(|e| anyhow::anyhow!("Failed to fetch {} for {}: {}", CONFIG_FILE, model_name, e))?;
    let weights = repo
        .get(WEIGHTS_FILE)
        .map_err(|e| anyhow::anyhow!("Failed to fetch {} for {}: {}", WEIGHTS_FILE, model_name, e))?;
    let tokenizer = repo
        .get(TOKENIZER_FILE)
        .map_err(|e| anyhow::anyhow!("Failed to fetch {} for {}: {}", TOKENIZER_FILE, model_name, e))?;

    Ok(ModelFiles {
        config,
        weights,
        tokenizer,
    })
}

/// Resolves a model name or path.
///
/// A local directory is used as is once the three model files are found in
/// it; anything else is treated as a hub repository id.
pub fn resolve_model_files(model_name_or_path: &str) -> Result<ModelFiles> {
    let path = Path::new(model_name_or_path);
    if path.is_dir() {
        tracing::debug!(path = %path.display(), "using local model directory");
        let files = ModelFiles::in_dir(path);
        files.ensure_exist()?;
        Ok(files)
    } else {
        tracing::debug!(model = model_name_or_path, "fetching model files from the hub");
        fetch_model_files(model_name_or_path)
    }
}
