//! Token window sampling
//!
//! Picks `U` token positions per sequence (without replacement, away from the
//! sequence edges) and cuts a window of `W = 2V + 1` positions around each
//! one out of every input tensor.
//!
//! ```text
//! inputs:  (B, T) or (B, T, H), all sharing (B, T)
//! centers: U per sequence, drawn from [V, T - V)
//! outputs: (B * U, W) or (B * U, W, H), sequence-major
//! ```

use anyhow::Result;
use candle_core::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Draw `eval_tokens` distinct center positions for each of `batch` sequences.
///
/// Positions lie in `[either_side, seq_len - either_side)` so every window fits
/// inside its sequence. The same `seed` always yields the same positions.
pub fn sample_positions(
    batch: usize,
    seq_len: usize,
    eval_tokens: usize,
    either_side: usize,
    seed: u64,
) -> Result<Vec<Vec<usize>>> {
    anyhow::ensure!(
        seq_len > 2 * either_side,
        "sequence length {seq_len} too short for windows with {either_side} tokens either side"
    );
    let candidates = seq_len - 2 * either_side;
    anyhow::ensure!(
        eval_tokens <= candidates,
        "cannot sample {eval_tokens} tokens without replacement from {candidates} positions"
    );

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let positions = (0..batch)
        .map(|_| {
            let mut perm: Vec<usize> = (0..candidates).collect();
            let (chosen, _) = perm.partial_shuffle(&mut rng, eval_tokens);
            chosen.iter().map(|p| p + either_side).collect()
        })
        .collect();
    Ok(positions)
}

/// Sample windows around random tokens from tensors sharing leading dims `(B, T)`.
///
/// Every tensor is cut at the same positions. Returns one tensor per input,
/// shaped `(B * U, W)` for 2-D inputs and `(B * U, W, H)` for 3-D inputs.
pub fn sample_windows(
    tensors: &[&Tensor],
    eval_tokens: usize,
    either_side: usize,
    seed: u64,
) -> Result<Vec<Tensor>> {
    let first = tensors
        .first()
        .ok_or_else(|| anyhow::anyhow!("must provide at least one tensor to sample from"))?;
    anyhow::ensure!(
        first.rank() >= 2,
        "input tensor must have at least 2 dimensions, got shape {:?}",
        first.dims()
    );
    let (b, t) = (first.dims()[0], first.dims()[1]);
    for tensor in &tensors[1..] {
        anyhow::ensure!(
            tensor.rank() >= 2 && tensor.dims()[..2] == [b, t],
            "all tensors must share leading dimensions ({b}, {t}), got {:?}",
            tensor.dims()
        );
    }

    let w = 2 * either_side + 1;
    let positions = sample_positions(b, t, eval_tokens, either_side, seed)?;

    // Flat (b * T + p) row indices for every window position, sequence-major
    let mut index = Vec::with_capacity(b * eval_tokens * w);
    for (row, centers) in positions.iter().enumerate() {
        for &p in centers {
            for offset in 0..w {
                index.push((row * t + p - either_side + offset) as u32);
            }
        }
    }
    let index = Tensor::from_vec(index, b * eval_tokens * w, first.device())?;

    let samples = b * eval_tokens;
    tensors
        .iter()
        .map(|tensor| -> Result<Tensor> {
            match tensor.dims() {
                &[_, _] => Ok(tensor
                    .flatten_all()?
                    .index_select(&index, 0)?
                    .reshape((samples, w))?),
                &[_, _, h] => Ok(tensor
                    .reshape((b * t, h))?
                    .index_select(&index, 0)?
                    .reshape((samples, w, h))?),
                dims => anyhow::bail!(
                    "tensor shape {dims:?} not supported; only 2-D and 3-D tensors can be sampled"
                ),
            }
        })
        .collect()
}
