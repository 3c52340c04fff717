//! Top-k example selection
//!
//! For every feature of a phase, finds the samples whose center token
//! activates the feature most strongly.

use crate::buffer::{Example, PhaseBuffer};

/// Sample indices ordered by descending value.
///
/// The sort is stable, so equal values keep ascending sample order.
/// Ordering follows `f32::total_cmp`, so a positive NaN ranks above every number.
pub fn argsort_descending(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Indices of the `k` largest values, in descending order.
///
/// Returns fewer than `k` indices only if `values` is shorter than `k`.
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut order = argsort_descending(values);
    order.truncate(k);
    order
}

/// Top-k sample indices for every feature of a phase
#[derive(Debug, Clone)]
pub struct TopK {
    k: usize,
    /// `indices[h]`: the k samples with the highest center activation for feature h
    indices: Vec<Vec<usize>>,
}

impl TopK {
    /// Select the top `k` samples by center-token activation for each feature in `buffer`
    pub fn select(buffer: &PhaseBuffer, k: usize) -> Self {
        let indices = (0..buffer.n_features())
            .map(|h| top_k_indices(&buffer.center_activations(h), k))
            .collect();
        Self { k, indices }
    }

    /// k
    pub fn k(&self) -> usize {
        self.k
    }

    /// Selected sample indices for feature `h`
    pub fn indices(&self, h: usize) -> &[usize] {
        &self.indices[h]
    }

    /// Token and activation windows of feature `h`'s top examples.
    ///
    /// `limit` truncates to the first (highest) examples, used for features
    /// with fewer non-zero activations than k.
    pub fn examples(&self, buffer: &PhaseBuffer, h: usize, limit: usize) -> Vec<Example> {
        let indices = &self.indices[h];
        buffer.examples(h, &indices[..limit.min(indices.len())])
    }

    /// Bytes held by the gathered (k, W, H) token and activation tables
    pub fn table_bytes(&self, buffer: &PhaseBuffer) -> (usize, usize) {
        let cells = self.k * buffer.window() * buffer.n_features();
        (
            cells * std::mem::size_of::<u32>(),
            cells * std::mem::size_of::<f32>(),
        )
    }
}
