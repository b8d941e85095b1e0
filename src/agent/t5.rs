//! Flan-T5 text-to-text generation on candle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::t5;
use tokenizers::Tokenizer;
use tracing::info;

use crate::agent::decoding::{argmax, beam_search, pick_search, StepDecoder};
use crate::agent::local::{LocalGenerator, ModelLoader};
use crate::errors::AppError;
use crate::models::DecodingConfig;

/// Loads a T5 checkpoint from a directory holding `config.json`,
/// `tokenizer.json` and one or more `*.safetensors` files.
pub struct T5Loader;

impl ModelLoader for T5Loader {
    fn load(&self, model_id: &str, model_dir: &Path) -> Result<Arc<dyn LocalGenerator>, AppError> {
        Ok(Arc::new(T5Generator::load(model_id, model_dir)?))
    }
}

pub struct T5Generator {
    model: t5::T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    config: t5::Config,
    device: Device,
}

impl T5Generator {
    pub fn load(model_id: &str, model_dir: &Path) -> Result<Self, AppError> {
        let device = Device::Cpu;

        let raw_config = std::fs::read_to_string(model_dir.join("config.json"))
            .map_err(|e| AppError::model_load(model_id, e))?;
        let mut config: t5::Config =
            serde_json::from_str(&raw_config).map_err(|e| AppError::model_load(model_id, e))?;
        config.use_cache = true;

        let tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| AppError::model_load(model_id, e))?;

        let weights = safetensor_files(model_dir).map_err(|e| AppError::model_load(model_id, e))?;
        if weights.is_empty() {
            return Err(AppError::model_load(model_id, "no .safetensors files found"));
        }

        // SAFETY: the weight files are memory-mapped read-only and are not
        // modified while the process runs.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, DType::F32, &device) }
            .map_err(|e| AppError::model_load(model_id, e))?;
        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| AppError::model_load(model_id, e))?;

        info!("Loaded {model_id} ({} weight files)", weights.len());
        Ok(Self { model, tokenizer, config, device })
    }
}

fn safetensor_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();
    Ok(files)
}

/// Per-request decoder state over a private clone of the shared model, so
/// the KV cache of one request never leaks into another.
#[derive(Clone)]
struct T5Step {
    model: t5::T5ForConditionalGeneration,
    encoder_output: Tensor,
    device: Device,
    fed: usize,
}

impl StepDecoder for T5Step {
    type Error = candle_core::Error;

    fn step(&mut self, tokens: &[u32]) -> candle_core::Result<Vec<f32>> {
        let new_tokens = &tokens[self.fed.min(tokens.len())..];
        let input = Tensor::new(new_tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.model.decode(&input, &self.encoder_output)?;
        self.fed = tokens.len();
        logits.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()
    }
}

impl LocalGenerator for T5Generator {
    fn generate(&self, prompt: &str, decoding: &DecodingConfig) -> Result<String, AppError> {
        let encoding = self.tokenizer.encode(prompt, true).map_err(AppError::inference)?;
        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;

        let mut model = self.model.clone();
        model.clear_kv_cache();
        let encoder_output = model.encode(&input_ids)?;

        let step = T5Step { model, encoder_output, device: self.device.clone(), fed: 0 };
        let start = self.config.decoder_start_token_id.unwrap_or(self.config.pad_token_id) as u32;
        let eos = self.config.eos_token_id as u32;

        let output = if decoding.do_sample {
            let mut sampler = LogitsProcessor::new(decoding.seed, Some(decoding.temperature), None);
            let device = self.device.clone();
            pick_search(step, start, eos, decoding, |logits| {
                sampler.sample(&Tensor::new(logits, &device)?)
            })?
        } else if decoding.num_beams > 1 {
            beam_search(step, start, eos, decoding)?
        } else {
            pick_search(step, start, eos, decoding, |logits| Ok(argmax(logits).unwrap_or(eos)))?
        };

        self.tokenizer.decode(&output, true).map_err(AppError::inference)
    }
}
