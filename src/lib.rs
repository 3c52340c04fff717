// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_possible_wrap)] // usize→i64 in tensor ops
#![allow(clippy::many_single_char_names)] // m, w, h, k standard in the sampling math
#![allow(clippy::similar_names)] // related variables like `start`/`stats`
#![allow(clippy::module_name_repetitions)] // FeatureRecord in classify.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility
#![allow(clippy::cast_sign_loss)] // f32→usize when value is known positive

//! saeviz-rs: feature activation analysis for sparse autoencoders
//!
//! Characterizes every feature of a sparse autoencoder trained on a
//! transformer's MLP activations: whether it is dead, ultra-low density or
//! alive, its top-activating token windows, and windows sampled from across
//! its activation range.
//!
//! ## Architecture
//!
//! - `config`: AnalysisConfig hyperparameters and validation
//! - `corpus`: Token file access and context selection
//! - `codec`: Text codecs (HuggingFace tokenizers, character vocabularies)
//! - `model`: ActivationSource / FeatureEncoder traits
//! - `forward_gpt`: GPT forward pass capturing last-layer MLP activations
//! - `autoencoder`: Sparse autoencoder loading and slice encoding
//! - `sampling`: Random token window sampling
//! - `plan`: Phase and batch partitioning
//! - `buffer`: PhaseBuffer holding one phase's sampled windows
//! - `collector`: Batched activation collection into a phase buffer
//! - `topk`: Top-k example selection
//! - `classify`: Dead / ultra-low / alive classification and histograms
//! - `intervals`: Interval-stratified example sampling
//! - `analysis`: Phase orchestration over all features
//! - `render`: HTML feature pages

pub mod analysis;
pub mod autoencoder;
pub mod buffer;
pub mod classify;
pub mod codec;
pub mod collector;
pub mod config;
pub mod corpus;
pub mod forward_gpt;
pub mod intervals;
pub mod model;
pub mod plan;
pub mod render;
pub mod sampling;
pub mod topk;

pub use analysis::{analyze_phase, Analysis, RunSummary};
pub use autoencoder::{AutoencoderConfig, SparseAutoencoder};
pub use buffer::{Example, PhaseBuffer};
pub use classify::{
    analyze_feature, ActivationHistogram, Density, FeatureRecord, HistogramBin,
};
pub use codec::{load_codec, CharCodec, HfCodec, TextCodec};
pub use collector::ActivationCollector;
pub use config::AnalysisConfig;
pub use corpus::{ContextSet, TokenCorpus};
pub use forward_gpt::{GptConfig, GptModel};
pub use intervals::sample_intervals;
pub use model::{check_compatible, select_device, ActivationSource, FeatureEncoder};
pub use plan::{batches, phases, Chunk, Chunks};
pub use render::{FeatureRenderer, HtmlRenderer};
pub use sampling::{sample_positions, sample_windows};
pub use topk::{argsort_descending, top_k_indices, TopK};
