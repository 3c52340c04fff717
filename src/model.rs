//! Model seams for activation extraction
//!
//! The analysis only needs two things from the frozen models: the
//! transformer's hidden activations at a fixed layer, and the autoencoder's
//! feature activations for a slice of features. Both are traits so the
//! pipeline can run over the bundled GPT and autoencoder loaders or over any
//! other implementation.

use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::info;

/// A frozen transformer exposing hidden activations at a fixed layer
pub trait ActivationSource {
    /// Context length the model was trained with (T)
    fn block_size(&self) -> usize;

    /// Width of the hidden activations returned by [`Self::forward_hidden`] (F)
    fn hidden_width(&self) -> usize;

    /// Run the model on `(batch, seq)` u32 token ids and return the hidden
    /// activations, shape `(batch, seq, hidden_width)`.
    fn forward_hidden(&self, input_ids: &Tensor) -> Result<Tensor>;
}

/// A frozen sparse autoencoder over the transformer's hidden activations
pub trait FeatureEncoder {
    /// Total number of learned features (H_total)
    fn n_features(&self) -> usize;

    /// Expected width of the hidden activations (F)
    fn input_width(&self) -> usize;

    /// Sparsity penalty the autoencoder was trained with (recorded, not used)
    fn l1_coeff(&self) -> f64;

    /// Encode `(batch, seq, F)` hidden activations into activations of
    /// features `[start, end)`, shape `(batch, seq, end - start)`.
    fn encode_slice(&self, hidden: &Tensor, start: usize, end: usize) -> Result<Tensor>;
}

/// Pick the compute device (tries CUDA, falls back to CPU)
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        info!("Forcing CPU mode");
        return Device::Cpu;
    }
    match Device::cuda_if_available(0) {
        Ok(dev) if dev.is_cuda() => {
            info!("Using CUDA device");
            dev
        }
        _ => {
            info!("CUDA not available, using CPU");
            Device::Cpu
        }
    }
}

/// Check that the encoder reads the activations the transformer produces
pub fn check_compatible(model: &dyn ActivationSource, encoder: &dyn FeatureEncoder) -> Result<()> {
    anyhow::ensure!(
        model.hidden_width() == encoder.input_width(),
        "Autoencoder expects inputs of width {} but the transformer produces {}",
        encoder.input_width(),
        model.hidden_width()
    );
    anyhow::ensure!(encoder.n_features() > 0, "Autoencoder has no features");
    Ok(())
}
