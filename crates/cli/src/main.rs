//! framenet CLI
//!
//! Export a trained snapshot to a fixed-point constant table, inspect a
//! snapshot, or write a random one for runtime smoke tests.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use framenet_export::{ExportConfig, ExportPipeline};
use framenet_model::{save_directory, ArchitectureConfig, Layer, Model, SafetensorsLoader};

#[derive(Parser)]
#[command(name = "framenet")]
#[command(version)]
#[command(about = "Quantize coordinate networks into fixed-point Rust constant tables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a snapshot directory to a Rust source file
    Export {
        /// Directory with model.safetensors and config.json
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Output source file
        #[arg(short, long, default_value = "model.rs")]
        out: PathBuf,

        /// Export config (JSON); FRAMENET_* variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print layers, shapes and value ranges of a snapshot
    Inspect {
        /// Directory with model.safetensors and config.json
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Export config used to count clipped values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a randomly initialised snapshot
    Init {
        /// Destination directory
        #[arg(short, long)]
        out_dir: PathBuf,

        /// RNG seed
        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Architecture config (JSON); defaults to the reference network
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framenet=info".into()),
        )
        .init();

    match Cli::parse().command {
        Commands::Export {
            model_dir,
            out,
            config,
        } => export(&model_dir, &out, config.as_deref()),
        Commands::Inspect { model_dir, config } => inspect(&model_dir, config.as_deref()),
        Commands::Init {
            out_dir,
            seed,
            config,
        } => init(&out_dir, seed, config.as_deref()),
    }
}

fn load_export_config(path: Option<&Path>) -> anyhow::Result<ExportConfig> {
    let config = match path {
        Some(p) => ExportConfig::from_json_file(p)
            .with_context(|| format!("reading export config {}", p.display()))?,
        None => ExportConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    tracing::debug!(?config, "export config");
    Ok(config)
}

fn load_model(model_dir: &Path) -> anyhow::Result<Model> {
    let loader = SafetensorsLoader::from_directory(model_dir)
        .with_context(|| format!("opening snapshot {}", model_dir.display()))?;
    Ok(loader.load_model(&loader.config)?)
}

fn export(model_dir: &Path, out: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let pipeline = ExportPipeline::new(load_export_config(config)?)?;
    let summary = pipeline
        .write_from_directory(model_dir, out)
        .with_context(|| format!("exporting {}", model_dir.display()))?;

    println!("Wrote {}", summary.path.display());
    println!("  Layers:     {}", summary.layers);
    println!("  Parameters: {}", summary.parameters);
    println!("  Clipped:    {}", summary.clipped);
    println!("  Size:       {:.1} KB", summary.bytes as f64 / 1024.0);
    Ok(())
}

fn inspect(model_dir: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let clip = load_export_config(config)?.clip_range()?;
    let model = load_model(model_dir)?;

    println!("Point dims:  {}", model.point_dims());
    println!("Parameters:  {}", model.parameter_count());
    for named in model.layers() {
        let kind = match &named.layer {
            Layer::Embedding(t) => format!("embedding (1/{} resolution)", t.resolution_ratio()),
            Layer::Linear(_) => "linear".to_string(),
        };
        println!("{} [{}]", named.name, kind);
        for (field, tensor) in named.layer.tensors() {
            let (lo, hi) = tensor.min_max().unwrap_or((0.0, 0.0));
            println!("  {:<6} {:?}  min {:+.4}  max {:+.4}", field, tensor.shape(), lo, hi);
        }
    }
    println!("Values outside clip range: {}", model.count_clipped(clip));
    Ok(())
}

fn init(out_dir: &Path, seed: u64, config: Option<&Path>) -> anyhow::Result<()> {
    let config = match config {
        Some(p) => ArchitectureConfig::from_json_file(p)
            .with_context(|| format!("reading architecture config {}", p.display()))?,
        None => ArchitectureConfig::default(),
    };

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let model = Model::random(&config, &config, &mut rng)?;
    save_directory(&model, &config, out_dir)?;

    println!(
        "Wrote random snapshot ({} parameters) to {}",
        model.parameter_count(),
        out_dir.display()
    );
    Ok(())
}
