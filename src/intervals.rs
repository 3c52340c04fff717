//! Interval-stratified example sampling
//!
//! Alive features get examples from across their whole activation range, not
//! just the top. The non-zero center activations are ranked, cut into
//! `I` equal-count buckets, and `X` examples are drawn from each bucket.
//!
//! ```text
//! ranks:   0 .. nz-1 (descending activation)
//! bucket j: [j*nz/I, j*nz/I + nz/I)
//! draw:     X distinct ranks per bucket, re-sorted ascending
//! ```

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::topk::argsort_descending;

/// Draw `n_exs` sample indices from each of `n_intervals` rank buckets of the
/// non-zero center activations.
///
/// Returns `n_intervals` rows of `n_exs` original sample indices. Within a row
/// the samples are in descending activation order.
///
/// # Errors
/// If any bucket is smaller than `n_exs` (`nonzero / n_intervals < n_exs`).
/// Callers guarantee `nonzero >= n_intervals * n_exs`, which rules this out.
pub fn sample_intervals(
    center_activations: &[f32],
    nonzero: usize,
    n_intervals: usize,
    n_exs: usize,
    seed: u64,
) -> Result<Vec<Vec<usize>>> {
    anyhow::ensure!(n_intervals > 0, "need at least one interval");
    anyhow::ensure!(
        nonzero <= center_activations.len(),
        "non-zero count {nonzero} exceeds {} samples",
        center_activations.len()
    );
    let bucket = nonzero / n_intervals;
    anyhow::ensure!(
        bucket >= n_exs,
        "interval buckets of {bucket} samples cannot supply {n_exs} examples each ({nonzero} non-zero activations, {n_intervals} intervals)"
    );

    let sorted = argsort_descending(center_activations);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let rows = (0..n_intervals)
        .map(|j| {
            let start = j * nonzero / n_intervals;
            let mut ranks: Vec<usize> = (0..bucket).collect();
            let (chosen, _) = ranks.partial_shuffle(&mut rng, n_exs);
            let mut chosen = chosen.to_vec();
            chosen.sort_unstable();
            chosen.into_iter().map(|r| sorted[start + r]).collect()
        })
        .collect();
    Ok(rows)
}
