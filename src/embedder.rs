//! # Embedder capability
//!
//! The engine never talks to an embedding provider directly — it consumes a
//! pluggable `Embed(text) -> Vector` capability. [`CandleEmbedder`] is the concrete, local
//! implementation, adapted from the same Candle/`all-MiniLM-L6-v2` pipeline
//! the host binary used to embed conversation turns directly.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use indicatif::{ProgressBar, ProgressStyle};
use tokenizers::Tokenizer;

use crate::error::{EmbedderError, EngineError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Must be idempotent per `(text, model)`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// `sentence-transformers/all-MiniLM-L6-v2` run locally via Candle; 384-dim,
/// mean-pooled, L2-normalized.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl CandleEmbedder {
    pub fn load() -> Result<Self> {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(80));

        let device = Device::Cpu;
        let model_id = "sentence-transformers/all-MiniLM-L6-v2";
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(|e| load_err(e.to_string()))?;
        let api_repo = api.repo(repo);

        pb.set_message("Downloading config.json...");
        let config_filename = api_repo.get("config.json").map_err(|e| load_err(e.to_string()))?;
        pb.set_message("Downloading tokenizer.json...");
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(|e| load_err(e.to_string()))?;
        pb.set_message("Downloading model.safetensors...");
        let weights_filename = api_repo.get("model.safetensors").map_err(|e| load_err(e.to_string()))?;

        pb.set_message("Loading model configuration...");
        let config = std::fs::read_to_string(config_filename).map_err(EngineError::Io)?;
        let config: Config = serde_json::from_str(&config).map_err(|e| load_err(e.to_string()))?;

        pb.set_message("Loading tokenizer...");
        let tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(|e| load_err(e.to_string()))?;

        pb.set_message("Loading model weights...");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(|e| load_err(e.to_string()))?
        };
        let model = BertModel::load(vb, &config).map_err(|e| load_err(e.to_string()))?;

        pb.finish_with_message("embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::EmbedderFailure(EmbedderError::InvalidInput(e.to_string())))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| load_err(e.to_string()))?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| load_err(e.to_string()))?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(|e| load_err(e.to_string()))?;
        let pooled = mean_pooling(&output, tokens.get_attention_mask(), &self.device)
            .map_err(|e| load_err(e.to_string()))?;
        let normalized = normalize(&pooled).map_err(|e| load_err(e.to_string()))?;
        normalized.to_vec1::<f32>().map_err(|e| load_err(e.to_string()))
    }
}

fn mean_pooling(embeddings: &Tensor, attention_mask: &[u32], device: &Device) -> candle_core::Result<Tensor> {
    let mask = Tensor::new(attention_mask, device)?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?
        .unsqueeze(2)?;
    let masked = embeddings.broadcast_mul(&mask)?;
    let sum = masked.sum(1)?;
    let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
    sum.broadcast_div(&count)?.squeeze(0)
}

fn normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let norm = tensor.sqr()?.sum_all()?.sqrt()?;
    tensor.broadcast_div(&norm)
}

fn load_err(msg: String) -> EngineError {
    EngineError::EmbedderFailure(EmbedderError::Unavailable(msg))
}

#[async_trait]
impl Embedder for CandleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EngineError::EmbedderFailure(EmbedderError::InvalidInput(
                "empty text".into(),
            )));
        }
        self.encode(text)
    }

    fn dimensions(&self) -> usize {
        384
    }
}

/// Deterministic hash-based embedder for tests: same text always yields the
/// same vector, without downloading a model.
pub struct FakeEmbedder {
    pub dimensions: usize,
}

impl FakeEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EngineError::EmbedderFailure(EmbedderError::InvalidInput(
                "empty text".into(),
            )));
        }
        let mut state: u64 = 1469598103934665603;
        for b in text.bytes() {
            state ^= b as u64;
            state = state.wrapping_mul(1099511628211);
        }
        let mut v = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            state ^= (i as u64).wrapping_add(0x9e3779b97f4a7c15);
            state = state.wrapping_mul(1099511628211);
            let frac = (state >> 11) as f64 / (1u64 << 53) as f64;
            v.push((frac as f32) * 2.0 - 1.0);
        }
        let mag = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > 0.0 {
            for x in &mut v {
                *x /= mag;
            }
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_embedder_is_deterministic() {
        let e = FakeEmbedder::new(16);
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fake_embedder_rejects_empty_text() {
        let e = FakeEmbedder::new(16);
        assert!(e.embed("").await.is_err());
    }

    #[tokio::test]
    async fn fake_embedder_differs_across_inputs() {
        let e = FakeEmbedder::new(16);
        let a = e.embed("alpha").await.unwrap();
        let b = e.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }
}
