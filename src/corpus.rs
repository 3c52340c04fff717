//! Token corpus loading and context selection
//!
//! The corpus is a flat little-endian `u16` token file (the `train.bin`
//! layout written by nanoGPT-style data preparation scripts). It is
//! memory-mapped and never copied as a whole; only the selected contexts
//! are materialized.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use memmap2::Mmap;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u16>),
}

/// Immutable sequence of token ids addressable by offset
pub struct TokenCorpus {
    storage: Storage,
}

impl TokenCorpus {
    /// Memory-map a flat `u16` token file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open token file {}", path.display()))?;
        // SAFETY: the token file is treated as read-only for the whole run.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;
        anyhow::ensure!(
            mmap.len() % 2 == 0,
            "Token file {} has odd byte length {}; expected u16 tokens",
            path.display(),
            mmap.len()
        );
        info!(
            "Opened corpus {} ({} tokens)",
            path.display(),
            mmap.len() / 2
        );
        Ok(Self {
            storage: Storage::Mapped(mmap),
        })
    }

    /// Build a corpus from in-memory tokens
    pub fn from_tokens(tokens: Vec<u16>) -> Self {
        Self {
            storage: Storage::Owned(tokens),
        }
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Mapped(mmap) => mmap.len() / 2,
            Storage::Owned(tokens) => tokens.len(),
        }
    }

    /// Check if the corpus is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `len` tokens starting at `offset`, widened to `u32`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u32>> {
        anyhow::ensure!(
            offset + len <= self.len(),
            "Read of {len} tokens at offset {offset} past end of corpus ({} tokens)",
            self.len()
        );
        let tokens = match &self.storage {
            Storage::Mapped(mmap) => mmap[2 * offset..2 * (offset + len)]
                .chunks_exact(2)
                .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
                .collect(),
            Storage::Owned(tokens) => tokens[offset..offset + len]
                .iter()
                .map(|&t| u32::from(t))
                .collect(),
        };
        Ok(tokens)
    }
}

/// The N contexts of length T analysed in every phase
#[derive(Debug, Clone)]
pub struct ContextSet {
    tokens: Vec<u32>,
    n_contexts: usize,
    block_size: usize,
}

impl ContextSet {
    /// Select up to `n_contexts` contexts of `block_size` tokens.
    ///
    /// If the corpus cannot supply `n_contexts * block_size` tokens it is tiled
    /// densely instead, with as many whole contexts as fit. Otherwise context
    /// offsets are drawn uniformly from `[0, len - block_size)`.
    pub fn select(
        corpus: &TokenCorpus,
        n_contexts: usize,
        block_size: usize,
        seed: u64,
    ) -> Result<Self> {
        anyhow::ensure!(block_size > 0, "block size must be positive");
        let len = corpus.len();
        anyhow::ensure!(
            len >= block_size,
            "Corpus has {len} tokens, shorter than one context of {block_size}"
        );

        let offsets: Vec<usize> = if len <= n_contexts * block_size {
            let n = len / block_size;
            if n < n_contexts {
                warn!(
                    "Corpus holds only {n} contexts of {block_size} tokens ({n_contexts} requested); using all of them"
                );
            }
            (0..n).map(|i| i * block_size).collect()
        } else {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            (0..n_contexts)
                .map(|_| rng.gen_range(0..len - block_size))
                .collect()
        };

        let mut tokens = Vec::with_capacity(offsets.len() * block_size);
        for &offset in &offsets {
            tokens.extend(corpus.read(offset, block_size)?);
        }

        Ok(Self {
            tokens,
            n_contexts: offsets.len(),
            block_size,
        })
    }

    /// Build a context set from already-tokenized contexts of equal length
    pub fn from_contexts(contexts: Vec<Vec<u32>>) -> Result<Self> {
        let block_size = contexts.first().map_or(0, Vec::len);
        anyhow::ensure!(block_size > 0, "contexts must be non-empty");
        anyhow::ensure!(
            contexts.iter().all(|c| c.len() == block_size),
            "all contexts must have length {block_size}"
        );
        Ok(Self {
            n_contexts: contexts.len(),
            tokens: contexts.into_iter().flatten().collect(),
            block_size,
        })
    }

    /// Number of contexts (N)
    pub fn len(&self) -> usize {
        self.n_contexts
    }

    /// Check if no contexts were selected
    pub fn is_empty(&self) -> bool {
        self.n_contexts == 0
    }

    /// Context length (T)
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Tokens of context `i`
    pub fn context(&self, i: usize) -> &[u32] {
        &self.tokens[i * self.block_size..(i + 1) * self.block_size]
    }

    /// Contexts `[start, end)` as a `(end - start, T)` u32 tensor
    pub fn batch_tensor(&self, start: usize, end: usize, device: &Device) -> Result<Tensor> {
        anyhow::ensure!(
            start < end && end <= self.n_contexts,
            "Invalid context range {start}..{end} (have {})",
            self.n_contexts
        );
        let data = self.tokens[start * self.block_size..end * self.block_size].to_vec();
        Ok(Tensor::from_vec(
            data,
            (end - start, self.block_size),
            device,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dense_tiling_when_corpus_small() {
        let corpus = TokenCorpus::from_tokens((0..25).collect());
        let contexts = ContextSet::select(&corpus, 100, 10, 0).unwrap();

        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts.context(0), (0..10).collect::<Vec<u32>>().as_slice());
        assert_eq!(contexts.context(1), (10..20).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn test_random_offsets_deterministic() {
        let corpus = TokenCorpus::from_tokens((0..1000).collect());
        let a = ContextSet::select(&corpus, 5, 10, 7).unwrap();
        let b = ContextSet::select(&corpus, 5, 10, 7).unwrap();

        assert_eq!(a.len(), 5);
        for i in 0..5 {
            assert_eq!(a.context(i), b.context(i));
            // contexts are contiguous runs of the corpus
            let ctx = a.context(i);
            assert!(ctx.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(*ctx.last().unwrap() < 1000);
        }
    }

    #[test]
    fn test_exact_fit_tiles_densely() {
        let corpus = TokenCorpus::from_tokens((0..20).collect());
        let contexts = ContextSet::select(&corpus, 2, 10, 0).unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts.context(1), (10..20).collect::<Vec<u32>>().as_slice());

        // a single context's worth of tokens leaves no random offset to draw
        let corpus = TokenCorpus::from_tokens((0..10).collect());
        let contexts = ContextSet::select(&corpus, 5, 10, 0).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts.context(0), (0..10).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn test_corpus_shorter_than_context() {
        let corpus = TokenCorpus::from_tokens(vec![1, 2, 3]);
        assert!(ContextSet::select(&corpus, 1, 4, 0).is_err());
    }

    #[test]
    fn test_open_token_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for t in [1u16, 2, 300, 65535] {
            file.write_all(&t.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let corpus = TokenCorpus::open(file.path()).unwrap();
        assert_eq!(corpus.len(), 4);
        assert_eq!(corpus.read(1, 3).unwrap(), vec![2, 300, 65535]);
        assert!(corpus.read(2, 3).is_err());
    }

    #[test]
    fn test_batch_tensor_shape() {
        let contexts =
            ContextSet::from_contexts(vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]).unwrap();
        let batch = contexts.batch_tensor(1, 3, &Device::Cpu).unwrap();
        assert_eq!(batch.dims(), &[2, 3]);
        assert_eq!(
            batch.to_vec2::<u32>().unwrap(),
            vec![vec![4, 5, 6], vec![7, 8, 9]]
        );
        assert!(contexts.batch_tensor(2, 4, &Device::Cpu).is_err());
    }
}
