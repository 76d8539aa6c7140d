/// Preview
///
/// Generates a handful of unique candidates with the configured strategy and
/// prints them. Nothing is published and the history file is left untouched.
///
/// Usage: preview [COUNT]

use anyhow::{Context, Result};
use hype_poster::{bot, config, generation::UniquenessFilter, history::HistoryStore};

const DEFAULT_COUNT: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let count = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("COUNT must be a number, got '{}'", arg))?,
        None => DEFAULT_COUNT,
    };

    let mut cfg = config::Config::from_env()?;
    // Previewing never needs posting credentials
    cfg.dry_run = true;
    cfg.validate()?;

    let generator = bot::build_generator(&cfg)?;
    let filter = UniquenessFilter::new(cfg.max_generation_attempts, cfg.length_band);

    // Work on a copy so candidates are unique against real history and each other
    let persisted = HistoryStore::load(&cfg.history_path, cfg.max_history).await;
    let mut history = HistoryStore::in_memory(cfg.max_history);
    for text in persisted.entries() {
        history.record(text).await?;
    }

    println!("Previewing {} {} posts ({} already in history)\n", count, cfg.mode, history.len());

    for i in 1..=count {
        let post = filter
            .generate_unique(generator.as_ref(), &history)
            .await
            .context("Generation failed")?;

        println!(
            "#{} [{} chars, {} attempt(s){}]",
            i,
            post.text.chars().count(),
            post.attempts,
            if post.fallback { ", fallback" } else { "" }
        );
        println!("{}\n", post.text);

        history.record(&post.text).await?;
    }

    Ok(())
}
