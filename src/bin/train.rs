//! Episodic meta-training.
//!
//! Usage:
//! ```bash
//! cargo run --release --bin train -- --config runConfig.json
//! cargo run --release --bin train -- --config runConfig.json --seed 42
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use episodic_meta_learning::data::paths::ensure_parent_dir;
use episodic_meta_learning::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a few-shot episode model")]
struct Args {
    /// Path to the run configuration file (JSON)
    #[arg(long, default_value = "runConfig.json")]
    config: PathBuf,

    /// Fixed seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Override the snapshot output path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip validation even when a validation split exists
    #[arg(long)]
    no_validation: bool,
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
    info!(model = kind.name(), dataset = %cfg.dataset, seed, "starting training run");

    let train_paths = DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::Train);
    let train_store = SeqFileDataset::load(&train_paths, cfg.task.examples_per_class)
        .context("loading training split")?;

    let val_store = if args.no_validation {
        None
    } else {
        let val_paths = DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::Validate);
        match SeqFileDataset::load(&val_paths, cfg.task.examples_per_class) {
            Ok(store) => Some(store),
            Err(e) => {
                info!(error = %e, "no validation split, training without validation");
                None
            }
        }
    };

    let mut model = build_model(kind, &cfg, seed)?;
    let sampler = EpisodeSampler::new(EpisodeConfig {
        n_way: cfg.task.n,
        k_shot: cfg.task.k,
        n_query: cfg.task.qk,
    });
    let scheduler = LearningRateScheduler::step_decay(
        cfg.training.outer_lr,
        cfg.training.lr_decay_iters,
        cfg.training.lr_decay_gamma,
        1e-6,
    );

    let mut trainer = MetaTrainer::new(
        TrainerConfig {
            episodes: cfg.training.episodes,
            log_interval: cfg.training.log_interval,
            val_cycle: cfg.training.val_cycle,
            val_episodes: cfg.training.val_episodes,
            criteria: Criteria::Accuracy,
            task_batch_count: cfg.training.task_batch_count,
            support_sample_per_class: cfg.training.support_sample_per_class,
        },
        SeedSource::fixed(seed),
    );

    let summary = trainer.train(
        model.as_mut(),
        &sampler,
        &train_store,
        val_store.as_ref().map(|s| s as &dyn ExampleStore),
        Some(&scheduler),
    )?;

    info!(
        episodes = summary.total_episodes,
        skipped = summary.skipped_episodes,
        best_validation = summary.best_validation,
        best_episode = summary.best_episode.unwrap_or(0),
        "training finished"
    );

    let snapshot = summary
        .best_snapshot
        .unwrap_or_else(|| model.parameter_snapshot());
    let output = match args.output {
        Some(path) => path,
        None => DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::All)
            .with_model(kind.name())
            .with_version(cfg.version)
            .model_file()?,
    };
    ensure_parent_dir(&output)?;
    snapshot.save_snapshot(&output)?;
    info!(path = %output.display(), "saved parameter snapshot");

    // archive the exact configuration next to the run's results
    let doc_dir = DatasetPaths::new(&cfg.base_path, &cfg.dataset, DataSplit::All)
        .with_version(cfg.version)
        .doc_dir();
    std::fs::create_dir_all(&doc_dir)?;
    cfg.save(&doc_dir.join("config.json"))?;

    Ok(())
}
