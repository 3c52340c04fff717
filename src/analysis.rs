//! Phase orchestration for a full feature analysis run
//!
//! Splits the autoencoder's features into phases, fills one phase buffer at
//! a time, then classifies every feature of the phase and hands its record
//! to the renderer before moving on.

use anyhow::Result;
use candle_core::Device;
use serde::Serialize;
use tracing::{debug, info};

use crate::buffer::PhaseBuffer;
use crate::classify::{analyze_feature, Density, FeatureRecord};
use crate::collector::ActivationCollector;
use crate::config::AnalysisConfig;
use crate::corpus::ContextSet;
use crate::model::{check_compatible, ActivationSource, FeatureEncoder};
use crate::plan::{phases, Chunk};
use crate::render::FeatureRenderer;
use crate::topk::TopK;

/// Totals of a finished run, with the settings that produced them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub n_features: usize,
    pub n_contexts: usize,
    pub n_phases: usize,
    pub dead: usize,
    pub ultra_low: usize,
    pub alive: usize,
    /// Sparsity penalty of the analysed autoencoder
    pub l1_coeff: f64,
    pub config: AnalysisConfig,
}

impl RunSummary {
    fn new(config: &AnalysisConfig, n_features: usize, n_contexts: usize, l1_coeff: f64) -> Self {
        Self {
            n_features,
            n_contexts,
            n_phases: 0,
            dead: 0,
            ultra_low: 0,
            alive: 0,
            l1_coeff,
            config: config.clone(),
        }
    }

    fn count(&mut self, density: Density) {
        match density {
            Density::Dead => self.dead += 1,
            Density::UltraLow => self.ultra_low += 1,
            Density::Alive => self.alive += 1,
        }
    }
}

/// Classify every feature of a filled phase buffer, in feature order.
///
/// `emit` receives each record as soon as it is complete.
pub fn analyze_phase(
    buffer: &PhaseBuffer,
    phase: Chunk,
    config: &AnalysisConfig,
    mut emit: impl FnMut(FeatureRecord) -> Result<()>,
) -> Result<()> {
    anyhow::ensure!(
        buffer.n_features() == phase.len(),
        "phase buffer holds {} features but phase {} spans {}",
        buffer.n_features(),
        phase.index,
        phase.len()
    );
    anyhow::ensure!(
        buffer.n_samples() >= config.k,
        "phase buffer holds {} samples, fewer than k = {}",
        buffer.n_samples(),
        config.k
    );

    let top_k = TopK::select(buffer, config.k);
    let (token_bytes, act_bytes) = top_k.table_bytes(buffer);
    debug!("Top-k tables: {token_bytes} bytes of tokens, {act_bytes} bytes of activations");

    for h in 0..phase.len() {
        let record = analyze_feature(buffer, &top_k, h, phase.start + h, config)?;
        emit(record)?;
    }
    Ok(())
}

/// Full analysis over a set of contexts
pub struct Analysis<'a> {
    model: &'a dyn ActivationSource,
    encoder: &'a dyn FeatureEncoder,
    contexts: &'a ContextSet,
    config: &'a AnalysisConfig,
    device: Device,
}

impl<'a> Analysis<'a> {
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

    /// Check everything that can be checked before the first phase
    pub fn validate(&self) -> Result<()> {
        check_compatible(self.model, self.encoder)?;
        anyhow::ensure!(
            self.contexts.block_size() <= self.model.block_size(),
            "contexts of {} tokens exceed the model's block size {}",
            self.contexts.block_size(),
            self.model.block_size()
        );
        self.config
            .validate_for(self.contexts.block_size(), self.contexts.len())
    }

    /// Run every phase, rendering each feature as soon as it is classified
    pub fn run(&self, renderer: &mut dyn FeatureRenderer) -> Result<RunSummary> {
        self.validate()?;

        let n_features = self.encoder.n_features();
        let plan = phases(n_features, self.config.n_features_per_phase);
        let n_phases = plan.len();
        let n_batches = self
            .contexts
            .len()
            .div_ceil(self.config.eval_batch_size);
        info!(
            "Will process {n_features} features in {n_phases} phases. Each phase will have forward pass in {n_batches} batches"
        );

        let mut summary = RunSummary::new(
            self.config,
            n_features,
            self.contexts.len(),
            self.encoder.l1_coeff(),
        );
        renderer.begin(n_features)?;

        let collector = ActivationCollector::new(
            self.model,
            self.encoder,
            self.contexts,
            self.config,
            self.device.clone(),
        );
        for phase in plan {
            info!(
                "Working on phase {}/{}: features {} through {}",
                phase.index + 1,
                n_phases,
                phase.start,
                phase.end
            );
            let buffer = collector.collect(phase)?;
            analyze_phase(&buffer, phase, self.config, |record| {
                summary.count(record.density());
                renderer.render(&record)
            })?;
            summary.n_phases += 1;
        }

        info!(
            "Done: {} alive, {} ultra-low density, {} dead",
            summary.alive, summary.ultra_low, summary.dead
        );
        renderer.finish(&summary)?;
        Ok(summary)
    }
}
