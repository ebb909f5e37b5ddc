//! Episodic evaluation of a trained snapshot.
//!
//! Usage:
//! ```bash
//! cargo run --release --bin evaluate -- --config runConfig.json
//! cargo run --release --bin evaluate -- --config runConfig.json --episodes 600
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use episodic_meta_learning::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Evaluate a trained few-shot model")]
struct Args {
    /// Path to the run configuration file (JSON)
    #[arg(long, default_value = "runConfig.json")]
    config: PathBuf,

    /// Snapshot to load; defaults to the configured model path
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Number of evaluation episodes
    #[arg(long, default_value = "500")]
    episodes: usize,

    /// Fixed seed for reproducible evaluation
    #[arg(long)]
    seed: Option<u64>,

    /// Write a JSON result report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Project one episode's support embeddings to 2-D and write them
    /// as JSON for external plotting
    #[arg(long)]
    embed_out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct EvaluationReport {
    model: String,
    dataset: String,
    episodes: usize,
    mean_accuracy: f64,
    mean_loss: f64,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let cfg = RunConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let kind = ModelKind::from_name(&cfg.model_name)?;

    let seed = args.seed.unwrap_or_else(|| SeedSource::from_entropy().next_seed());
    let mut model = build_model(kind, &cfg, seed)?;

    let snapshot_path = match args.snapshot {
        Some(path) => path,
        None => DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::All)
            .with_model(kind.name())
            .with_version(cfg.version)
            .model_file()?,
    };
    let snapshot = ParamMap::load_snapshot(&snapshot_path)
        .with_context(|| format!("loading snapshot from {}", snapshot_path.display()))?;
    model.load_snapshot(&snapshot)?;
    info!(path = %snapshot_path.display(), "loaded parameter snapshot");

    let test_paths = DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::Test);
    let test_store =
        SeqFileDataset::load(&test_paths, cfg.task.examples_per_class).context("loading test split")?;

    let sampler = EpisodeSampler::new(EpisodeConfig {
        n_way: cfg.task.n,
        k_shot: cfg.task.k,
        n_query: cfg.task.qk,
    });
    let mut trainer = MetaTrainer::new(TrainerConfig::default(), SeedSource::fixed(seed));

    let (accuracy, loss) = trainer.evaluate(model.as_ref(), &sampler, &test_store, args.episodes)?;
    info!(
        "evaluation finished: {} episodes, mean_acc={:.4}, mean_loss={:.4}",
        args.episodes, accuracy, loss
    );

    if let Some(embed_path) = args.embed_out {
        let seed = SeedSource::fixed(seed.wrapping_add(1)).next_seed();
        let tensors = sampler
            .sample(&test_store, seed)?
            .materialize(&test_store)?;
        let embeddings = model.embed(&tensors.support_flat()?, &tensors.support_lengths)?;
        let points = episodic_meta_learning::visualization::export_projection(
            &embed_path,
            &embeddings,
            &tensors.support_labels,
        )?;
        info!(
            "wrote {} projected embeddings to {}",
            points.len(),
            embed_path.display()
        );
    }

    if let Some(report_path) = args.report {
        let report = EvaluationReport {
            model: kind.name().to_string(),
            dataset: cfg.dataset.clone(),
            episodes: args.episodes,
            mean_accuracy: accuracy,
            mean_loss: loss,
        };
        let file = std::fs::File::create(&report_path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
        info!(path = %report_path.display(), "wrote evaluation report");
    }

    Ok(())
}
