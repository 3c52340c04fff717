//! GPT-2 style (nanoGPT) forward pass with last-MLP activation capture
//!
//! Runs the transformer block by block and stops inside the last block,
//! returning the MLP activations right after the GELU nonlinearity. These
//! are the activations the sparse autoencoder was trained on.
//!
//! ```text
//! x = wte[ids] + wpe[pos]
//! for block in blocks[..n-1]:  x = x + attn(ln_1(x)); x = x + mlp(ln_2(x))
//! last block:                  x = x + attn(ln_1(x)); return gelu(c_fc(ln_2(x)))
//! ```
//!
//! Weights are read from a directory holding `config.json` (nanoGPT model
//! args) and `model.safetensors`. Names may carry the `_orig_mod.` prefix
//! that `torch.compile` adds; it is stripped on load.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear, linear_no_bias, Embedding, LayerNorm, Linear, VarBuilder};
use tracing::info;

use crate::model::ActivationSource;

const COMPILED_PREFIX: &str = "_orig_mod.";

/// Model configuration (matches nanoGPT's `model_args`)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GptConfig {
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    pub block_size: usize,
    pub vocab_size: usize,
    /// Whether Linear and LayerNorm layers carry biases
    #[serde(default = "default_bias")]
    pub bias: bool,
}

fn default_bias() -> bool {
    true
}

fn load_linear(in_dim: usize, out_dim: usize, bias: bool, vb: VarBuilder) -> Result<Linear> {
    let layer = if bias {
        linear(in_dim, out_dim, vb)?
    } else {
        linear_no_bias(in_dim, out_dim, vb)?
    };
    Ok(layer)
}

fn load_layer_norm(size: usize, bias: bool, vb: VarBuilder) -> Result<LayerNorm> {
    let norm = if bias {
        candle_nn::layer_norm(size, 1e-5, vb)?
    } else {
        LayerNorm::new_no_bias(vb.get(size, "weight")?, 1e-5)
    };
    Ok(norm)
}

/// Additive attention mask `(1, 1, t, t)`: `0` where key `j <= i`, `-inf` above the diagonal
fn causal_mask(t: usize, device: &Device, dtype: DType) -> Result<Tensor> {
    let pos = Tensor::arange(0u32, t as u32, device)?;
    let future = pos.unsqueeze(0)?.broadcast_gt(&pos.unsqueeze(1)?)?;
    let blocked = Tensor::full(f32::NEG_INFINITY, (t, t), device)?;
    let open = Tensor::zeros((t, t), DType::F32, device)?;
    Ok(future
        .where_cond(&blocked, &open)?
        .to_dtype(dtype)?
        .reshape((1, 1, t, t))?)
}

/// Causal self-attention with a fused QKV projection
struct CausalSelfAttention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    n_embd: usize,
}

impl CausalSelfAttention {
    fn load(vb: VarBuilder, config: &GptConfig) -> Result<Self> {
        let c_attn = load_linear(config.n_embd, 3 * config.n_embd, config.bias, vb.pp("c_attn"))?;
        let c_proj = load_linear(config.n_embd, config.n_embd, config.bias, vb.pp("c_proj"))?;
        Ok(Self {
            c_attn,
            c_proj,
            n_head: config.n_head,
            n_embd: config.n_embd,
        })
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let head_dim = self.n_embd / self.n_head;

        let qkv = self.c_attn.forward(x)?;
        let split = |i: usize| -> Result<Tensor> {
            Ok(qkv
                .narrow(2, i * c, c)?
                .reshape((b, t, self.n_head, head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let (q, k, v) = (split(0)?, split(1)?, split(2)?);

        let scale = 1.0 / (head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let att = att.broadcast_add(mask)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let y = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, c))?;
        Ok(self.c_proj.forward(&y)?)
    }
}

/// Feed-forward block: c_proj(gelu(c_fc(x)))
#[allow(clippy::upper_case_acronyms)]
struct MLP {
    c_fc: Linear,
    c_proj: Linear,
}

impl MLP {
    fn load(vb: VarBuilder, config: &GptConfig) -> Result<Self> {
        let c_fc = load_linear(config.n_embd, 4 * config.n_embd, config.bias, vb.pp("c_fc"))?;
        let c_proj = load_linear(4 * config.n_embd, config.n_embd, config.bias, vb.pp("c_proj"))?;
        Ok(Self { c_fc, c_proj })
    }

    /// Hidden activations after the nonlinearity, `(b, t, 4 * n_embd)`
    fn activations(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.c_fc.forward(x)?.gelu_erf()?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.c_proj.forward(&self.activations(x)?)?)
    }
}

/// Pre-norm transformer block
struct Block {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: MLP,
}

impl Block {
    fn load(vb: VarBuilder, config: &GptConfig) -> Result<Self> {
        Ok(Self {
            ln_1: load_layer_norm(config.n_embd, config.bias, vb.pp("ln_1"))?,
            attn: CausalSelfAttention::load(vb.pp("attn"), config)?,
            ln_2: load_layer_norm(config.n_embd, config.bias, vb.pp("ln_2"))?,
            mlp: MLP::load(vb.pp("mlp"), config)?,
        })
    }

    fn attend(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let h = self.attn.forward(&self.ln_1.forward(x)?, mask)?;
        Ok((x + h)?)
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let x = self.attend(x, mask)?;
        let h = self.mlp.forward(&self.ln_2.forward(&x)?)?;
        Ok((x + h)?)
    }

    /// Run attention, then return the MLP activations instead of the block output
    fn mlp_activations(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let x = self.attend(x, mask)?;
        self.mlp.activations(&self.ln_2.forward(&x)?)
    }
}

/// Frozen GPT exposing its last-layer MLP activations
pub struct GptModel {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    config: GptConfig,
    dtype: DType,
}

impl GptModel {
    /// Load `config.json` and `model.safetensors` from `dir`
    pub fn load(dir: &Path, device: &Device, dtype: DType) -> Result<Self> {
        info!("Loading GPT from: {}", dir.display());

        let config_path = dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: GptConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        info!(
            "Model config: {} layers, {} heads, {} hidden, block size {}, vocab {}",
            config.n_layer, config.n_head, config.n_embd, config.block_size, config.vocab_size
        );

        let weights_path = dir.join("model.safetensors");
        let tensors = candle_core::safetensors::load(&weights_path, device)
            .with_context(|| format!("Failed to load {}", weights_path.display()))?;
        let tensors: HashMap<String, Tensor> = tensors
            .into_iter()
            .map(|(name, t)| match name.strip_prefix(COMPILED_PREFIX) {
                Some(stripped) => (stripped.to_string(), t),
                None => (name, t),
            })
            .collect();

        let vb = VarBuilder::from_tensors(tensors, dtype, device);
        Self::from_var_builder(vb, config, dtype)
    }

    /// Build from a `VarBuilder` rooted above the `transformer.` prefix
    pub fn from_var_builder(vb: VarBuilder, config: GptConfig, dtype: DType) -> Result<Self> {
        anyhow::ensure!(config.n_layer > 0, "GPT must have at least one layer");
        anyhow::ensure!(
            config.n_head > 0 && config.n_embd % config.n_head == 0,
            "n_embd ({}) must be divisible by n_head ({})",
            config.n_embd,
            config.n_head
        );

        let vb_t = vb.pp("transformer");
        let wte = embedding(config.vocab_size, config.n_embd, vb_t.pp("wte"))?;
        let wpe = embedding(config.block_size, config.n_embd, vb_t.pp("wpe"))?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            blocks.push(Block::load(vb_t.pp(format!("h.{i}")), &config)?);
        }

        info!("GPT loaded with {} layers", config.n_layer);

        Ok(Self {
            wte,
            wpe,
            blocks,
            config,
            dtype,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &GptConfig {
        &self.config
    }
}

impl ActivationSource for GptModel {
    fn block_size(&self) -> usize {
        self.config.block_size
    }

    fn hidden_width(&self) -> usize {
        4 * self.config.n_embd
    }

    fn forward_hidden(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_b, t) = input_ids.dims2().context("input ids must be (batch, seq)")?;
        anyhow::ensure!(
            t <= self.config.block_size,
            "sequence length {t} exceeds block size {}",
            self.config.block_size
        );
        let device = input_ids.device();

        let positions = Tensor::arange(0u32, t as u32, device)?;
        let mut x = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = causal_mask(t, device, self.dtype)?;
        let (last, rest) = self
            .blocks
            .split_last()
            .ok_or_else(|| anyhow::anyhow!("GPT has no blocks"))?;
        for block in rest {
            x = block.forward(&x, &mask)?;
        }
        last.mlp_activations(&x, &mask)
    }
}
