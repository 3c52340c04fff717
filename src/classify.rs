//! Feature density classification
//!
//! Every feature ends up in exactly one of three states, decided from the
//! number of samples whose center token activates it:
//!
//! ```text
//! nonzero == 0          -> Dead
//! 0 < nonzero < I * X   -> UltraLow   (top examples + histogram)
//! nonzero >= I * X      -> Alive      (top examples + intervals + histogram)
//! ```

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::buffer::{Example, PhaseBuffer};
use crate::config::AnalysisConfig;
use crate::intervals::sample_intervals;
use crate::topk::TopK;

/// Density class of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    /// Never fires on a sampled center token
    Dead,
    /// Fires on too few center tokens for interval sampling
    UltraLow,
    /// Fires often enough to sample every interval
    Alive,
}

impl Density {
    /// Classify from the count of non-zero center activations
    pub fn from_count(nonzero: usize, n_intervals: usize, n_exs_per_interval: usize) -> Self {
        if nonzero == 0 {
            Density::Dead
        } else if nonzero < n_intervals * n_exs_per_interval {
            Density::UltraLow
        } else {
            Density::Alive
        }
    }
}

impl std::fmt::Display for Density {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Density::Dead => "dead",
            Density::UltraLow => "ultra-low density",
            Density::Alive => "alive",
        };
        f.write_str(name)
    }
}

/// One equal-width histogram bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lo: f32,
    pub hi: f32,
    pub count: usize,
}

/// Non-zero activations of a feature over every window position of every sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationHistogram {
    /// The non-zero activation values
    pub values: Vec<f32>,
    /// Non-zero activations as a percentage of all M * W positions
    pub density_percent: f64,
}

impl ActivationHistogram {
    /// Collect the non-zero activations of feature `h` across the whole phase buffer
    pub fn from_buffer(buffer: &PhaseBuffer, h: usize) -> Self {
        let values: Vec<f32> = buffer
            .feature_activations(h)
            .filter(|&a| a != 0.0)
            .collect();
        let total = buffer.n_samples() * buffer.window();
        let density_percent = if total == 0 {
            0.0
        } else {
            values.len() as f64 / total as f64 * 100.0
        };
        Self {
            values,
            density_percent,
        }
    }

    /// Split the value range into `n_bins` equal-width bins
    pub fn bins(&self, n_bins: usize) -> Vec<HistogramBin> {
        if self.values.is_empty() || n_bins == 0 {
            return Vec::new();
        }
        let lo = self.values.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let width = (hi - lo) / n_bins as f32;

        let mut counts = vec![0usize; n_bins];
        for &v in &self.values {
            let bin = if width > 0.0 {
                (((v - lo) / width) as usize).min(n_bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }
        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBin {
                lo: lo + width * i as f32,
                hi: lo + width * (i + 1) as f32,
                count,
            })
            .collect()
    }
}

/// Everything computed for one feature, handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "density", rename_all = "snake_case")]
pub enum FeatureRecord {
    Dead {
        feature_id: usize,
    },
    UltraLow {
        feature_id: usize,
        /// Top examples, at most one per non-zero center activation
        top_examples: Vec<Example>,
        histogram: ActivationHistogram,
    },
    Alive {
        feature_id: usize,
        top_examples: Vec<Example>,
        /// `I` rows of `X` examples, highest interval first
        intervals: Vec<Vec<Example>>,
        histogram: ActivationHistogram,
    },
}

impl FeatureRecord {
    /// Global feature index
    pub fn feature_id(&self) -> usize {
        match self {
            FeatureRecord::Dead { feature_id }
            | FeatureRecord::UltraLow { feature_id, .. }
            | FeatureRecord::Alive { feature_id, .. } => *feature_id,
        }
    }

    /// Density class of the record
    pub fn density(&self) -> Density {
        match self {
            FeatureRecord::Dead { .. } => Density::Dead,
            FeatureRecord::UltraLow { .. } => Density::UltraLow,
            FeatureRecord::Alive { .. } => Density::Alive,
        }
    }
}

/// Classify phase feature `h` (global id `feature_id`) and gather its examples.
///
/// Dead features stop before any window is gathered. Interval sampling is
/// seeded with `config.seed + feature_id`.
pub fn analyze_feature(
    buffer: &PhaseBuffer,
    top_k: &TopK,
    h: usize,
    feature_id: usize,
    config: &AnalysisConfig,
) -> Result<FeatureRecord> {
    let centers = buffer.center_activations(h);
    let nonzero = centers.iter().filter(|&&a| a != 0.0).count();
    let density = Density::from_count(nonzero, config.n_intervals, config.n_exs_per_interval);
    debug!("Feature {feature_id}: {nonzero} non-zero center activations, {density}");

    if density == Density::Dead {
        return Ok(FeatureRecord::Dead { feature_id });
    }

    let histogram = ActivationHistogram::from_buffer(buffer, h);

    if density == Density::UltraLow {
        return Ok(FeatureRecord::UltraLow {
            feature_id,
            top_examples: top_k.examples(buffer, h, nonzero),
            histogram,
        });
    }

    let rows = sample_intervals(
        &centers,
        nonzero,
        config.n_intervals,
        config.n_exs_per_interval,
        config.seed.wrapping_add(feature_id as u64),
    )?;
    let intervals = rows.iter().map(|row| buffer.examples(h, row)).collect();

    Ok(FeatureRecord::Alive {
        feature_id,
        top_examples: top_k.examples(buffer, h, top_k.k()),
        intervals,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Buffer with W = 3 where the center column of feature 0 is `centers`
    /// and the edge columns hold `edge`.
    fn buffer_with_centers(centers: &[f32], edge: f32) -> PhaseBuffer {
        let m = centers.len();
        let mut buffer = PhaseBuffer::new(m, 3, 1);
        let tokens: Vec<u32> = (0..(m * 3) as u32).collect();
        let acts: Vec<f32> = centers.iter().flat_map(|&c| [edge, c, edge]).collect();
        buffer.write_batch(0, &tokens, &acts).unwrap();
        buffer
    }

    fn config(k: usize, n_intervals: usize, n_exs: usize) -> AnalysisConfig {
        AnalysisConfig {
            k,
            n_intervals,
            n_exs_per_interval: n_exs,
            ..Default::default()
        }
    }

    #[test]
    fn test_density_boundaries() {
        assert_eq!(Density::from_count(0, 2, 5), Density::Dead);
        assert_eq!(Density::from_count(1, 2, 5), Density::UltraLow);
        assert_eq!(Density::from_count(9, 2, 5), Density::UltraLow);
        assert_eq!(Density::from_count(10, 2, 5), Density::Alive);
        assert_eq!(Density::from_count(11, 2, 5), Density::Alive);
    }

    #[test]
    fn test_dead_feature() {
        // edge activations don't count: only center tokens decide
        let buffer = buffer_with_centers(&[0.0; 6], 1.0);
        let config = config(2, 2, 1);
        let top = TopK::select(&buffer, config.k);
        let record = analyze_feature(&buffer, &top, 0, 42, &config).unwrap();
        assert_eq!(record, FeatureRecord::Dead { feature_id: 42 });
    }

    #[test]
    fn test_ultra_low_keeps_only_nonzero_top_examples() {
        let centers = [0.0, 1.5, 0.0, 0.0, 3.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        let buffer = buffer_with_centers(&centers, 0.0);
        let config = config(5, 2, 5);
        let top = TopK::select(&buffer, config.k);
        let record = analyze_feature(&buffer, &top, 0, 7, &config).unwrap();

        match record {
            FeatureRecord::UltraLow {
                feature_id,
                top_examples,
                histogram,
            } => {
                assert_eq!(feature_id, 7);
                assert_eq!(top_examples.len(), 3);
                let centers: Vec<f32> =
                    top_examples.iter().map(Example::center_activation).collect();
                assert_eq!(centers, vec![3.0, 1.5, 0.5]);
                assert_eq!(histogram.values.len(), 3);
            }
            other => panic!("expected ultra-low record, got {:?}", other.density()),
        }
    }

    #[test]
    fn test_alive_at_exact_threshold() {
        let centers = [0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 5.0, 1.0, 4.0, 3.0];
        let buffer = buffer_with_centers(&centers, 0.0);
        // I * X = 5 == non-zero count
        let config = config(2, 5, 1);
        let top = TopK::select(&buffer, config.k);
        let record = analyze_feature(&buffer, &top, 0, 0, &config).unwrap();

        match record {
            FeatureRecord::Alive {
                top_examples,
                intervals,
                ..
            } => {
                assert_eq!(top_examples.len(), 2);
                assert_eq!(top_examples[0].center_activation(), 5.0);
                assert_eq!(intervals.len(), 5);
                // one rank per bucket: every non-zero value exactly once, in order
                let sampled: Vec<f32> = intervals
                    .iter()
                    .map(|row| row[0].center_activation())
                    .collect();
                assert_eq!(sampled, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
            }
            other => panic!("expected alive record, got {:?}", other.density()),
        }
    }

    #[test]
    fn test_interval_seed_follows_feature_id() {
        // two features with identical activations, W = 1
        let m = 200;
        let mut buffer = PhaseBuffer::new(m, 1, 2);
        let tokens: Vec<u32> = (0..m as u32).collect();
        let acts: Vec<f32> = (0..m).flat_map(|i| [(i + 1) as f32; 2]).collect();
        buffer.write_batch(0, &tokens, &acts).unwrap();

        let config = config(2, 2, 5);
        let top = TopK::select(&buffer, config.k);
        let samples = |h: usize, feature_id: usize| -> Vec<Vec<usize>> {
            match analyze_feature(&buffer, &top, h, feature_id, &config).unwrap() {
                FeatureRecord::Alive { intervals, .. } => intervals
                    .iter()
                    .map(|row| row.iter().map(|e| e.sample).collect())
                    .collect(),
                other => panic!("expected alive record, got {:?}", other.density()),
            }
        };

        let first = samples(0, 10);
        let second = samples(1, 11);
        assert_ne!(first, second);

        let centers = buffer.center_activations(0);
        for (rows, feature_id) in [(&first, 10u64), (&second, 11u64)] {
            let expected = sample_intervals(&centers, m, 2, 5, config.seed + feature_id).unwrap();
            assert_eq!(rows, &expected);
        }
        // the draw depends on the feature id, not on its slot in the phase
        assert_eq!(samples(1, 10), first);
    }

    #[test]
    fn test_histogram_counts_whole_windows() {
        let buffer = buffer_with_centers(&[1.0, 0.0, 2.0, 0.0], 0.5);
        let histogram = ActivationHistogram::from_buffer(&buffer, 0);
        // 8 edge values + 2 centers out of 12 positions
        assert_eq!(histogram.values.len(), 10);
        assert!((histogram.density_percent - 1000.0 / 12.0).abs() < 1e-9);

        let bins = histogram.bins(3);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 10);
        assert_eq!(bins[0].count, 8);
        assert_eq!(bins[2].count, 1);
    }

    #[test]
    fn test_histogram_single_value() {
        let histogram = ActivationHistogram {
            values: vec![2.0, 2.0],
            density_percent: 1.0,
        };
        let bins = histogram.bins(4);
        assert_eq!(bins[0].count, 2);
        assert!(ActivationHistogram {
            values: vec![],
            density_percent: 0.0
        }
        .bins(4)
        .is_empty());
    }
}
