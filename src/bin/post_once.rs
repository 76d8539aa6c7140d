/// Post Once
///
/// Generates one unique post and publishes it immediately, skipping the
/// schedule. History and quota state are updated exactly as the bot would;
/// nothing is published when today's target or the monthly cap is met.

use anyhow::Result;
use hype_poster::bot::{self, PostOnceOutcome};
use hype_poster::config;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let cfg = config::Config::from_env()?;
    cfg.validate()?;

    let mut poster = bot::build_bot(&cfg).await?;

    match poster.post_once().await? {
        PostOnceOutcome::Published {
            post_id,
            text,
            fallback,
        } => {
            println!(
                "Published {} ({} chars{})",
                post_id,
                text.chars().count(),
                if fallback { ", fallback" } else { "" }
            );
            println!("{}", text);
        }
        PostOnceOutcome::QuotaClosed(status) => {
            let state = poster.quota().state();
            println!(
                "Nothing published: quota closed ({:?}, {}/{} today, {} this month)",
                status, state.daily_count, state.daily_target, state.monthly_count
            );
        }
    }

    Ok(())
}
