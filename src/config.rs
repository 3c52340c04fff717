//! Analysis hyperparameters
//!
//! A single immutable [`AnalysisConfig`] is built once at startup (from CLI
//! flags in the binary) and passed by reference into every stage.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Hyperparameters for a feature analysis run.
///
/// Glossary used throughout the crate:
/// - `N`: contexts, `T`: block size, `B`: `eval_batch_size`
/// - `U`: `eval_tokens`, `V`: `num_tokens_either_side`, `W = 2V + 1`
/// - `M = N * U` samples per phase, `P`: `n_features_per_phase`
/// - `I`: `n_intervals`, `X`: `n_exs_per_interval`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Base seed; batch `i` samples windows with `seed + i`
    pub seed: u64,
    /// Contexts per forward pass (B)
    pub eval_batch_size: usize,
    /// Requested number of contexts (N); capped by corpus size
    pub num_contexts: usize,
    /// Tokens sampled per context (U)
    pub eval_tokens: usize,
    /// Context tokens kept on each side of a sampled token (V)
    pub num_tokens_either_side: usize,
    /// Features processed per phase (P)
    pub n_features_per_phase: usize,
    /// Top activations kept per feature
    pub k: usize,
    /// Activation intervals for alive features (I)
    pub n_intervals: usize,
    /// Examples sampled per interval (X)
    pub n_exs_per_interval: usize,
    /// Bins in rendered activation histograms
    pub histogram_bins: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 1442,
            eval_batch_size: 156,
            num_contexts: 10_000,
            eval_tokens: 10,
            num_tokens_either_side: 4,
            n_features_per_phase: 20,
            k: 10,
            n_intervals: 12,
            n_exs_per_interval: 5,
            histogram_bins: 50,
        }
    }
}

impl AnalysisConfig {
    /// Window length W = 2V + 1
    pub fn window(&self) -> usize {
        2 * self.num_tokens_either_side + 1
    }

    /// Samples per phase M = N * U for `n_contexts` contexts
    pub fn samples(&self, n_contexts: usize) -> usize {
        n_contexts * self.eval_tokens
    }

    /// Minimum non-zero center activations for a feature to count as alive (I * X)
    pub fn alive_threshold(&self) -> usize {
        self.n_intervals * self.n_exs_per_interval
    }

    /// Check the settings that do not depend on the loaded model or corpus.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.eval_batch_size > 0, "eval_batch_size must be positive");
        anyhow::ensure!(self.num_contexts > 0, "num_contexts must be positive");
        anyhow::ensure!(self.eval_tokens > 0, "eval_tokens must be positive");
        anyhow::ensure!(
            self.n_features_per_phase > 0,
            "n_features_per_phase must be positive"
        );
        anyhow::ensure!(self.k > 0, "k must be positive");
        anyhow::ensure!(self.n_intervals > 0, "n_intervals must be positive");
        anyhow::ensure!(
            self.n_exs_per_interval > 0,
            "n_exs_per_interval must be positive"
        );
        anyhow::ensure!(self.histogram_bins > 0, "histogram_bins must be positive");
        Ok(())
    }

    /// Check the settings against the block size and the number of contexts
    /// actually selected from the corpus.
    ///
    /// Runs before the first phase so that an impossible configuration never
    /// surfaces half-way through a run.
    pub fn validate_for(&self, block_size: usize, n_contexts: usize) -> Result<()> {
        self.validate()?;
        let guard = 2 * self.num_tokens_either_side;
        anyhow::ensure!(
            block_size > guard,
            "block size {block_size} leaves no room for windows of {} tokens",
            self.window()
        );
        anyhow::ensure!(
            self.eval_tokens <= block_size - guard,
            "eval_tokens ({}) exceeds the {} samplable positions per context (block size {block_size}, {} tokens either side)",
            self.eval_tokens,
            block_size - guard,
            self.num_tokens_either_side
        );
        anyhow::ensure!(n_contexts > 0, "no contexts selected from the corpus");
        let m = self.samples(n_contexts);
        anyhow::ensure!(
            m >= self.k,
            "only {m} samples per phase but k = {}; increase num_contexts or eval_tokens",
            self.k
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.seed, 1442);
        assert_eq!(config.window(), 9);
        assert_eq!(config.alive_threshold(), 60);
        assert_eq!(config.samples(100), 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = AnalysisConfig {
            n_features_per_phase: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            eval_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_for_block_size() {
        let config = AnalysisConfig {
            eval_tokens: 2,
            num_tokens_either_side: 1,
            k: 2,
            ..Default::default()
        };
        // T = 4 leaves positions [1, 3): exactly 2
        assert!(config.validate_for(4, 1).is_ok());
        // T = 3 leaves a single position
        assert!(config.validate_for(3, 1).is_err());
        // T = 2 cannot hold a window of 3
        assert!(config.validate_for(2, 1).is_err());
    }

    #[test]
    fn test_validate_for_too_few_samples() {
        let config = AnalysisConfig {
            eval_tokens: 2,
            num_tokens_either_side: 1,
            k: 5,
            ..Default::default()
        };
        // M = 2 * 2 = 4 < k
        assert!(config.validate_for(10, 2).is_err());
        assert!(config.validate_for(10, 3).is_ok());
    }
}
