//! Per-phase sample storage
//!
//! Holds the token windows `(M, W)` and feature activation windows
//! `(M, W, H)` for every sampled token of one phase. Filled batch by batch
//! through [`PhaseBuffer::write_batch`], read-only afterwards, dropped at the
//! end of the phase.

use anyhow::Result;

/// One sampled window pulled out of a [`PhaseBuffer`] for a single feature
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Example {
    /// Row in the phase buffer (context-major sample index)
    pub sample: usize,
    /// Token ids of the window, length W
    pub tokens: Vec<u32>,
    /// The feature's activation at each window position, length W
    pub activations: Vec<f32>,
}

impl Example {
    /// Activation at the window's center token
    pub fn center_activation(&self) -> f32 {
        self.activations[self.activations.len() / 2]
    }
}

/// Dense host storage for one phase's sampled windows
#[derive(Debug)]
pub struct PhaseBuffer {
    n_samples: usize,
    window: usize,
    n_features: usize,
    /// `[M * W]`, row-major
    tokens: Vec<u32>,
    /// `[M * W * H]`, row-major
    activations: Vec<f32>,
    /// Samples written so far
    filled: usize,
}

impl PhaseBuffer {
    /// Allocate a zeroed buffer for `n_samples` windows of `window` tokens and `n_features` features
    pub fn new(n_samples: usize, window: usize, n_features: usize) -> Self {
        Self {
            n_samples,
            window,
            n_features,
            tokens: vec![0; n_samples * window],
            activations: vec![0.0; n_samples * window * n_features],
            filled: 0,
        }
    }

    /// Number of samples (M)
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Window length (W)
    pub fn window(&self) -> usize {
        self.window
    }

    /// Features in this phase (H)
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Index of the center token within a window (V)
    pub fn center(&self) -> usize {
        self.window / 2
    }

    /// Bytes held by the token and activation arrays
    pub fn size_bytes(&self) -> (usize, usize) {
        (
            self.tokens.len() * std::mem::size_of::<u32>(),
            self.activations.len() * std::mem::size_of::<f32>(),
        )
    }

    /// Check whether every sample row has been written
    pub fn is_complete(&self) -> bool {
        self.filled == self.n_samples
    }

    /// Write `tokens` `(n, W)` and `activations` `(n, W, H)` (both flattened)
    /// to sample rows `[offset, offset + n)`.
    ///
    /// Writes must arrive in order and cover contiguous, non-overlapping
    /// ranges: `offset` has to equal the number of samples already written.
    pub fn write_batch(&mut self, offset: usize, tokens: &[u32], activations: &[f32]) -> Result<()> {
        anyhow::ensure!(
            offset == self.filled,
            "out-of-order batch write at sample {offset}; {} samples written so far",
            self.filled
        );
        anyhow::ensure!(
            tokens.len() % self.window == 0,
            "token batch of {} values is not a whole number of windows of {}",
            tokens.len(),
            self.window
        );
        let n = tokens.len() / self.window;
        anyhow::ensure!(
            activations.len() == n * self.window * self.n_features,
            "activation batch has {} values, expected {n} x {} x {}",
            activations.len(),
            self.window,
            self.n_features
        );
        anyhow::ensure!(
            offset + n <= self.n_samples,
            "batch of {n} samples at {offset} overflows phase buffer of {}",
            self.n_samples
        );

        let row = self.window;
        self.tokens[offset * row..(offset + n) * row].copy_from_slice(tokens);
        let row = self.window * self.n_features;
        self.activations[offset * row..(offset + n) * row].copy_from_slice(activations);
        self.filled += n;
        Ok(())
    }

    /// Token window of sample `m`
    pub fn tokens(&self, m: usize) -> &[u32] {
        &self.tokens[m * self.window..(m + 1) * self.window]
    }

    /// Activation of feature `h` at window position `w` of sample `m`
    pub fn activation(&self, m: usize, w: usize, h: usize) -> f32 {
        self.activations[(m * self.window + w) * self.n_features + h]
    }

    /// Feature `h`'s activation window for sample `m`, length W
    pub fn feature_window(&self, m: usize, h: usize) -> Vec<f32> {
        (0..self.window).map(|w| self.activation(m, w, h)).collect()
    }

    /// Feature `h`'s activation at the center token of every sample, length M
    pub fn center_activations(&self, h: usize) -> Vec<f32> {
        let center = self.center();
        (0..self.n_samples)
            .map(|m| self.activation(m, center, h))
            .collect()
    }

    /// Every activation of feature `h` across all windows, `(M * W)` row-major
    pub fn feature_activations(&self, h: usize) -> impl Iterator<Item = f32> + '_ {
        self.activations
            .iter()
            .skip(h)
            .step_by(self.n_features)
            .copied()
    }

    /// Gather the windows of `samples` for feature `h`
    pub fn examples(&self, h: usize, samples: &[usize]) -> Vec<Example> {
        samples
            .iter()
            .map(|&m| Example {
                sample: m,
                tokens: self.tokens(m).to_vec(),
                activations: self.feature_window(m, h),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let mut buffer = PhaseBuffer::new(4, 3, 2);
        assert!(!buffer.is_complete());
        assert_eq!(buffer.center(), 1);

        // two samples per batch; activation value = 100*m + 10*w + h
        let acts = |m0: usize| -> Vec<f32> {
            (m0..m0 + 2)
                .flat_map(|m| {
                    (0..3).flat_map(move |w| (0..2).map(move |h| (100 * m + 10 * w + h) as f32))
                })
                .collect()
        };
        buffer.write_batch(0, &[1, 2, 3, 4, 5, 6], &acts(0)).unwrap();
        buffer.write_batch(2, &[7, 8, 9, 10, 11, 12], &acts(2)).unwrap();

        assert!(buffer.is_complete());
        assert_eq!(buffer.tokens(2), &[7, 8, 9]);
        assert_eq!(buffer.activation(3, 2, 1), 321.0);
        assert_eq!(buffer.feature_window(1, 0), vec![100.0, 110.0, 120.0]);
        assert_eq!(
            buffer.center_activations(1),
            vec![11.0, 111.0, 211.0, 311.0]
        );
        assert_eq!(buffer.feature_activations(1).count(), 12);
        assert_eq!(buffer.feature_activations(0).next(), Some(0.0));

        let examples = buffer.examples(0, &[3, 0]);
        assert_eq!(examples[0].sample, 3);
        assert_eq!(examples[0].tokens, vec![10, 11, 12]);
        assert_eq!(examples[0].center_activation(), 310.0);
    }

    #[test]
    fn test_rejects_out_of_order_and_overflow() {
        let mut buffer = PhaseBuffer::new(2, 1, 1);
        assert!(buffer.write_batch(1, &[1], &[1.0]).is_err());
        buffer.write_batch(0, &[1], &[1.0]).unwrap();
        assert!(buffer.write_batch(1, &[1, 2], &[1.0, 2.0]).is_err());
        // activation count must match tokens
        assert!(buffer.write_batch(1, &[1], &[1.0, 2.0]).is_err());
        buffer.write_batch(1, &[2], &[2.0]).unwrap();
        assert!(buffer.is_complete());
    }

    #[test]
    fn test_size_bytes() {
        let buffer = PhaseBuffer::new(10, 9, 20);
        assert_eq!(buffer.size_bytes(), (360, 7200));
    }
}
