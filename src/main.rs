use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

mod assets;
mod audit;
mod cli;
mod config;
mod embedding;
mod extractor;
mod gallery;
mod images;
mod records;
mod rid;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use embedding::snapshot::{self, Snapshot};
use embedding::EmbeddingStore;
use extractor::{FaceExtractor, HttpExtractor};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = match &args.base_path {
        Some(path) => PathBuf::from(path),
        None => homedir::my_home()
            .context("cannot resolve home directory")?
            .context("no home directory for this user")?
            .join(".facematch"),
    };
    let base_path = base_path
        .to_str()
        .context("base path is not valid utf8")?
        .to_string();

    let config = Config::load_with(&base_path);

    match args.command {
        cli::Command::Daemon {} => {
            let state = web::AppState::build(config)?;
            web::start_daemon(state);
            Ok(())
        }

        cli::Command::Import { input, output } => {
            let data = std::fs::read(&input).with_context(|| format!("cannot read {input}"))?;
            let records = snapshot::import_legacy_json(&data)?;

            if records.is_empty() {
                bail!("{input} contains no embeddings");
            }

            let dims = config.extractor.dimensions;
            let progress = indicatif::ProgressBar::new(records.len() as u64);

            // validation only; the snapshot is written from the raw records
            let mut store = EmbeddingStore::new(dims);
            for record in &records {
                store.push(record.clone())?;
                progress.inc(1);
            }
            progress.finish_and_clear();

            let output = output
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&base_path).join(&config.matching.snapshot));
            let model_id = snapshot::model_id_hash(&config.extractor.model);
            Snapshot::new(output.clone()).write(&records, dims, &model_id)?;

            println!(
                "wrote {} embeddings ({dims} dims, model '{}') to {}",
                records.len(),
                config.extractor.model,
                output.display()
            );
            Ok(())
        }

        cli::Command::Inspect { snapshot } => {
            let path = snapshot
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&base_path).join(&config.matching.snapshot));
            let stat = Snapshot::new(path).stat()?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": stat.version,
                    "dimensions": stat.dimensions,
                    "entries": stat.entry_count,
                }))
                .unwrap()
            );
            Ok(())
        }

        cli::Command::Match { image, threshold } => {
            let bytes = std::fs::read(&image).with_context(|| format!("cannot read {image}"))?;

            let model_id = snapshot::model_id_hash(&config.extractor.model);
            let store = EmbeddingStore::load(
                &PathBuf::from(&base_path).join(&config.matching.snapshot),
                &model_id,
                config.extractor.dimensions,
            )?;

            let extractor = HttpExtractor::new(&config.extractor)?;
            let vector = extractor.extract(&bytes)?;

            let result = embedding::find_best_match(&vector, &store)?;
            let decision =
                embedding::classify(&result, threshold.unwrap_or(config.matching.threshold));

            println!("{}", serde_json::to_string_pretty(&decision).unwrap());
            Ok(())
        }
    }
}
