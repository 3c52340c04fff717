//! Batched activation collection for one phase
//!
//! Streams the contexts through the transformer and the autoencoder batch by
//! batch, samples token windows from each batch, and copies them into the
//! phase buffer. Only one batch's activations exist at a time; the full
//! `(N, T, H_total)` activation tensor is never built.

use anyhow::Result;
use candle_core::{DType, Device};
use tracing::{debug, info};

use crate::buffer::PhaseBuffer;
use crate::config::AnalysisConfig;
use crate::corpus::ContextSet;
use crate::model::{ActivationSource, FeatureEncoder};
use crate::plan::{batches, Chunk};
use crate::sampling::sample_windows;

/// Fills a [`PhaseBuffer`] for a slice of features
pub struct ActivationCollector<'a> {
    model: &'a dyn ActivationSource,
    encoder: &'a dyn FeatureEncoder,
    contexts: &'a ContextSet,
    config: &'a AnalysisConfig,
    device: Device,
}

impl<'a> ActivationCollector<'a> {
    pub fn new(
        model: &'a dyn ActivationSource,
        encoder: &'a dyn FeatureEncoder,
        contexts: &'a ContextSet,
        config: &'a AnalysisConfig,
        device: Device,
    ) -> Self {
        Self {
            model,
            encoder,
            contexts,
            config,
            device,
        }
    }

    /// Collect sampled token and activation windows of `features` over every context.
    ///
    /// Batch `i` samples with seed `config.seed + i` and writes sample rows
    /// `[i * B * U, i * B * U + batch_len * U)`.
    pub fn collect(&self, features: Chunk) -> Result<PhaseBuffer> {
        let n_contexts = self.contexts.len();
        let t = self.contexts.block_size();
        let u = self.config.eval_tokens;
        let v = self.config.num_tokens_either_side;
        let h = features.len();

        let mut buffer = PhaseBuffer::new(self.config.samples(n_contexts), self.config.window(), h);
        let (token_bytes, act_bytes) = buffer.size_bytes();
        debug!("Phase buffer: {token_bytes} bytes of tokens, {act_bytes} bytes of activations");

        let plan = batches(n_contexts, self.config.eval_batch_size);
        let n_batches = plan.len();
        for batch in plan {
            info!(
                "Computing feature activations for batch {}/{} (features {}..{})",
                batch.index + 1,
                n_batches,
                features.start,
                features.end
            );

            let ids = self
                .contexts
                .batch_tensor(batch.start, batch.end, &self.device)?;
            let hidden = self.model.forward_hidden(&ids)?;
            anyhow::ensure!(
                hidden.dims() == [batch.len(), t, self.model.hidden_width()],
                "transformer returned activations of shape {:?} for batch {}, expected [{}, {t}, {}]",
                hidden.dims(),
                batch.index,
                batch.len(),
                self.model.hidden_width()
            );
            let acts = self
                .encoder
                .encode_slice(&hidden, features.start, features.end)?;
            anyhow::ensure!(
                acts.dims() == [batch.len(), t, h],
                "autoencoder returned activations of shape {:?} for batch {}, expected [{}, {t}, {h}]",
                acts.dims(),
                batch.index,
                batch.len()
            );

            let seed = self.config.seed.wrapping_add(batch.index as u64);
            let windows = sample_windows(&[&ids, &acts], u, v, seed)?;
            let tokens: Vec<u32> = windows[0].flatten_all()?.to_vec1()?;
            let activations: Vec<f32> = windows[1]
                .flatten_all()?
                .to_dtype(DType::F32)?
                .to_vec1()?;
            if let Some(pos) = activations.iter().position(|a| !a.is_finite()) {
                let feature = features.start + pos % h;
                let sample = batch.start * u + pos / (h * self.config.window());
                anyhow::bail!(
                    "non-finite activation {} for feature {feature} at sample {sample} in batch {} (features {}..{})",
                    activations[pos],
                    batch.index,
                    features.start,
                    features.end
                );
            }

            buffer.write_batch(batch.start * u, &tokens, &activations)?;
        }

        anyhow::ensure!(
            buffer.is_complete(),
            "phase buffer incomplete after {n_batches} batches"
        );
        Ok(buffer)
    }
}
