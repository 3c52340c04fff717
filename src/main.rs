//! saeviz-rs CLI: sparse autoencoder feature pages

use anyhow::{Context, Result};
use candle_core::DType;
use clap::Parser;
use saeviz_rs::{
    load_codec, select_device, Analysis, AnalysisConfig, ContextSet, GptModel, HtmlRenderer,
    SparseAutoencoder, TokenCorpus,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "saeviz-rs")]
#[command(about = "Top activations and interval samples for sparse autoencoder features")]
#[command(version)]
struct Cli {
    /// Directory with the trained autoencoder (autoencoder.safetensors + config.json)
    #[arg(long)]
    autoencoder_dir: Option<PathBuf>,

    /// Directory with the GPT checkpoint (model.safetensors + config.json)
    #[arg(long, default_value = "out")]
    gpt_dir: PathBuf,

    /// Flat u16 token file
    #[arg(long, default_value = "data/train.bin")]
    data: PathBuf,

    /// tokenizer.json to decode tokens with (default: meta.json beside the data, else GPT-2)
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Output directory for feature pages (default: the autoencoder directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 1442)]
    seed: u64,

    /// Contexts per forward pass
    #[arg(long, default_value_t = 156)]
    eval_batch_size: usize,

    /// Contexts to analyse (capped by corpus size)
    #[arg(long, default_value_t = 10_000)]
    num_contexts: usize,

    /// Tokens sampled per context
    #[arg(long, default_value_t = 10)]
    eval_tokens: usize,

    /// Context tokens shown on each side of a sampled token
    #[arg(long, default_value_t = 4)]
    num_tokens_either_side: usize,

    /// Features processed per phase (bounds memory)
    #[arg(long, default_value_t = 20)]
    n_features_per_phase: usize,

    /// Top activations kept per feature
    #[arg(short, long, default_value_t = 10)]
    k: usize,

    /// Activation intervals sampled for alive features
    #[arg(long, default_value_t = 12)]
    n_intervals: usize,

    /// Examples per interval
    #[arg(long, default_value_t = 5)]
    n_exs_per_interval: usize,

    /// Histogram bins on feature pages
    #[arg(long, default_value_t = 50)]
    histogram_bins: usize,

    /// Force CPU mode
    #[arg(long)]
    cpu: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            seed: self.seed,
            eval_batch_size: self.eval_batch_size,
            num_contexts: self.num_contexts,
            eval_tokens: self.eval_tokens,
            num_tokens_either_side: self.num_tokens_either_side,
            n_features_per_phase: self.n_features_per_phase,
            k: self.k,
            n_intervals: self.n_intervals,
            n_exs_per_interval: self.n_exs_per_interval,
            histogram_bins: self.histogram_bins,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let autoencoder_dir = cli
        .autoencoder_dir
        .clone()
        .context("--autoencoder-dir must be provided to load a trained autoencoder")?;
    let config = cli.analysis_config();
    config.validate()?;
    info!("Config: {:?}", config);

    let device = select_device(cli.cpu);
    let dtype = if device.is_cuda() {
        DType::BF16
    } else {
        DType::F32
    };

    let encoder = SparseAutoencoder::load(&autoencoder_dir, &device)?;
    let model = GptModel::load(&cli.gpt_dir, &device, dtype)?;
    let block_size = model.config().block_size;

    let corpus = TokenCorpus::open(&cli.data)?;
    let contexts = ContextSet::select(&corpus, config.num_contexts, block_size, config.seed)?;
    info!(
        "Selected {} contexts of {} tokens ({} samples per phase)",
        contexts.len(),
        block_size,
        config.samples(contexts.len())
    );

    let data_dir = cli
        .data
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let codec = load_codec(cli.tokenizer.as_deref(), &data_dir)?;

    let output = cli.output.clone().unwrap_or_else(|| autoencoder_dir.clone());
    let mut renderer = HtmlRenderer::new(&output, codec.as_ref(), config.histogram_bins)?;

    let analysis = Analysis::new(&model, &encoder, &contexts, &config, device);
    let summary = analysis.run(&mut renderer)?;

    println!("\n=== Results ===");
    println!("Features: {}", summary.n_features);
    println!("Alive:    {}", summary.alive);
    println!("Ultra-low density: {}", summary.ultra_low);
    println!("Dead:     {}", summary.dead);
    println!("Pages:    {}", renderer.dir().display());

    Ok(())
}
