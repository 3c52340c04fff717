//! Sparse autoencoder loading and feature encoding
//!
//! # Architecture
//!
//! ```text
//! Encode:  features = ReLU(W_enc @ (x - b_dec) + b_enc)
//! Decode:  x_hat    = W_dec @ features + b_dec
//! ```
//!
//! # Checkpoint Layout
//!
//! A checkpoint directory contains:
//! - `autoencoder.safetensors` with
//!   - `enc.weight`: shape `[n_features, d_input]`
//!   - `enc.bias`: shape `[n_features]`
//!   - `dec.weight`: shape `[d_input, n_features]`
//!   - `dec.bias`: shape `[d_input]`
//! - `config.json` with the training `l1_coeff`
//!
//! Only the encoder is used here; the decoder is read to validate the
//! checkpoint and for its bias.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use safetensors::tensor::SafeTensors;
use serde::Deserialize;
use tracing::info;

use crate::model::FeatureEncoder;

/// Training configuration stored next to the weights
#[derive(Debug, Clone, Deserialize)]
pub struct AutoencoderConfig {
    /// L1 sparsity penalty coefficient
    pub l1_coeff: f64,
}

/// Frozen sparse autoencoder (encoder side)
pub struct SparseAutoencoder {
    w_enc: Tensor, // [n_features, d_input]
    b_enc: Tensor, // [n_features]
    b_dec: Tensor, // [d_input]
    n_features: usize,
    d_input: usize,
    l1_coeff: f64,
}

impl SparseAutoencoder {
    /// Load `autoencoder.safetensors` and `config.json` from a checkpoint directory
    pub fn load(dir: &Path, device: &Device) -> Result<Self> {
        let config_path = dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: AutoencoderConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let weights_path = dir.join("autoencoder.safetensors");
        let data = std::fs::read(&weights_path)
            .with_context(|| format!("Failed to read {}", weights_path.display()))?;
        let st = SafeTensors::deserialize(&data)
            .with_context(|| format!("Failed to deserialize {}", weights_path.display()))?;

        let load = |name: &str| -> Result<Tensor> {
            let view = st
                .tensor(name)
                .with_context(|| format!("Tensor '{name}' not found in autoencoder checkpoint"))?;
            tensor_from_view(&view, device)
        };
        let w_enc = load("enc.weight")?;
        let b_enc = load("enc.bias")?;
        let w_dec = load("dec.weight")?;
        let b_dec = load("dec.bias")?;

        let (d_input, n_features) = w_dec.dims2().context("dec.weight must be 2-D")?;
        anyhow::ensure!(
            w_enc.dims() == [n_features, d_input],
            "enc.weight has shape {:?}, expected [{n_features}, {d_input}] to match dec.weight",
            w_enc.dims()
        );

        let autoencoder = Self::from_tensors(w_enc, b_enc, b_dec, config.l1_coeff)?;
        info!(
            "Autoencoder: {} features over {}-wide activations, l1_coeff={}",
            autoencoder.n_features, autoencoder.d_input, autoencoder.l1_coeff
        );
        Ok(autoencoder)
    }

    /// Build from encoder weight `[n_features, d_input]`, encoder bias
    /// `[n_features]` and decoder bias `[d_input]`
    pub fn from_tensors(w_enc: Tensor, b_enc: Tensor, b_dec: Tensor, l1_coeff: f64) -> Result<Self> {
        let (n_features, d_input) = w_enc.dims2().context("enc.weight must be 2-D")?;
        anyhow::ensure!(
            b_enc.dims() == [n_features],
            "enc.bias has shape {:?}, expected [{n_features}]",
            b_enc.dims()
        );
        anyhow::ensure!(
            b_dec.dims() == [d_input],
            "dec.bias has shape {:?}, expected [{d_input}]",
            b_dec.dims()
        );
        // Compute in F32 for numerical stability
        Ok(Self {
            w_enc: w_enc.to_dtype(DType::F32)?,
            b_enc: b_enc.to_dtype(DType::F32)?,
            b_dec: b_dec.to_dtype(DType::F32)?,
            n_features,
            d_input,
            l1_coeff,
        })
    }
}

impl FeatureEncoder for SparseAutoencoder {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn input_width(&self) -> usize {
        self.d_input
    }

    fn l1_coeff(&self) -> f64 {
        self.l1_coeff
    }

    fn encode_slice(&self, hidden: &Tensor, start: usize, end: usize) -> Result<Tensor> {
        anyhow::ensure!(
            start < end && end <= self.n_features,
            "Feature slice {start}..{end} out of range (autoencoder has {} features)",
            self.n_features
        );
        let (_b, _t, f) = hidden.dims3().context("hidden activations must be 3-D")?;
        anyhow::ensure!(
            f == self.d_input,
            "hidden width {f} does not match autoencoder input width {}",
            self.d_input
        );

        let width = end - start;
        let w = self.w_enc.narrow(0, start, width)?.t()?.contiguous()?; // [d_input, width]
        let b = self.b_enc.narrow(0, start, width)?;

        let x = hidden.to_dtype(DType::F32)?.broadcast_sub(&self.b_dec)?;
        let pre_acts = x.broadcast_matmul(&w)?.broadcast_add(&b)?;
        Ok(pre_acts.relu()?)
    }
}

/// Convert a safetensors `TensorView` to a candle `Tensor` on the given device.
fn tensor_from_view(view: &safetensors::tensor::TensorView<'_>, device: &Device) -> Result<Tensor> {
    let shape: Vec<usize> = view.shape().to_vec();
    let dtype = match view.dtype() {
        safetensors::Dtype::BF16 => DType::BF16,
        safetensors::Dtype::F16 => DType::F16,
        safetensors::Dtype::F32 => DType::F32,
        other => anyhow::bail!("Unsupported autoencoder tensor dtype: {other:?}"),
    };
    let tensor = Tensor::from_raw_buffer(view.data(), dtype, &shape, device)?;
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// 3 features over 2 inputs:
    /// f0 = relu(x0 - 1), f1 = relu(x1), f2 = relu(-x0 - x1)
    fn tiny() -> SparseAutoencoder {
        let device = Device::Cpu;
        let w_enc = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0], [-1.0, -1.0]], &device).unwrap();
        let b_enc = Tensor::new(&[-1.0f32, 0.0, 0.0], &device).unwrap();
        let b_dec = Tensor::zeros(2, DType::F32, &device).unwrap();
        SparseAutoencoder::from_tensors(w_enc, b_enc, b_dec, 1e-3).unwrap()
    }

    #[test]
    fn test_encode_full_range() {
        let ae = tiny();
        let hidden = Tensor::new(&[[[3.0f32, 2.0], [-1.0, -1.0]]], &Device::Cpu).unwrap();
        let acts = ae.encode_slice(&hidden, 0, 3).unwrap();
        assert_eq!(acts.dims(), &[1, 2, 3]);
        assert_eq!(
            acts.to_vec3::<f32>().unwrap(),
            vec![vec![vec![2.0, 2.0, 0.0], vec![0.0, 0.0, 2.0]]]
        );
    }

    #[test]
    fn test_encode_slice_matches_full() {
        let ae = tiny();
        let hidden = Tensor::new(&[[[3.0f32, 2.0], [-1.0, -1.0]]], &Device::Cpu).unwrap();
        let slice = ae.encode_slice(&hidden, 1, 3).unwrap();
        assert_eq!(slice.dims(), &[1, 2, 2]);
        assert_eq!(
            slice.to_vec3::<f32>().unwrap(),
            vec![vec![vec![2.0, 0.0], vec![0.0, 2.0]]]
        );
    }

    #[test]
    fn test_encode_rejects_bad_slices() {
        let ae = tiny();
        let hidden = Tensor::zeros((1, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(ae.encode_slice(&hidden, 2, 2).is_err());
        assert!(ae.encode_slice(&hidden, 0, 4).is_err());
        let wrong_width = Tensor::zeros((1, 2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(ae.encode_slice(&wrong_width, 0, 1).is_err());
    }

    #[test]
    fn test_decoder_bias_is_subtracted() {
        let device = Device::Cpu;
        let w_enc = Tensor::new(&[[1.0f32, 0.0]], &device).unwrap();
        let b_enc = Tensor::new(&[0.0f32], &device).unwrap();
        let b_dec = Tensor::new(&[1.0f32, 0.0], &device).unwrap();
        let ae = SparseAutoencoder::from_tensors(w_enc, b_enc, b_dec, 0.0).unwrap();
        let hidden = Tensor::new(&[[[3.0f32, 5.0]]], &device).unwrap();
        let acts = ae.encode_slice(&hidden, 0, 1).unwrap();
        assert_eq!(acts.to_vec3::<f32>().unwrap(), vec![vec![vec![2.0]]]);
    }

    #[test]
    fn test_load_checkpoint_dir() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let tensors: HashMap<String, Tensor> = [
            ("enc.weight", Tensor::ones((4, 2), DType::F32, &device).unwrap()),
            ("enc.bias", Tensor::zeros(4, DType::F32, &device).unwrap()),
            ("dec.weight", Tensor::ones((2, 4), DType::F32, &device).unwrap()),
            ("dec.bias", Tensor::zeros(2, DType::F32, &device).unwrap()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        candle_core::safetensors::save(&tensors, dir.path().join("autoencoder.safetensors"))
            .unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"l1_coeff": 0.004}"#).unwrap();

        let ae = SparseAutoencoder::load(dir.path(), &device).unwrap();
        assert_eq!(ae.n_features(), 4);
        assert_eq!(ae.input_width(), 2);
        assert_eq!(ae.l1_coeff(), 0.004);
    }

    #[test]
    fn test_load_rejects_mismatched_shapes() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let tensors: HashMap<String, Tensor> = [
            ("enc.weight", Tensor::ones((4, 2), DType::F32, &device).unwrap()),
            ("enc.bias", Tensor::zeros(4, DType::F32, &device).unwrap()),
            ("dec.weight", Tensor::ones((2, 5), DType::F32, &device).unwrap()),
            ("dec.bias", Tensor::zeros(2, DType::F32, &device).unwrap()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        candle_core::safetensors::save(&tensors, dir.path().join("autoencoder.safetensors"))
            .unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"l1_coeff": 0.1}"#).unwrap();

        assert!(SparseAutoencoder::load(dir.path(), &device).is_err());
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SparseAutoencoder::load(&dir.path().join("nope"), &Device::Cpu).is_err());
    }
}
