/// Run Loop module
///
/// Owns every piece of mutable bot state (history, quota counters, the random
/// source) and drives the generate, publish, record and sleep cycle until the
/// monthly cap is reached, credentials keep failing, or shutdown is requested.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{Config, GenerationMode, LoopTimings};
use crate::engagement::{Engaged, Engagement};
use crate::generation::knowledge::Knowledge;
use crate::generation::prompted::PromptedSettings;
use crate::generation::template::TemplateCatalog;
use crate::generation::unique::UniquePost;
use crate::generation::{ContentGenerator, PromptedGenerator, TemplateGenerator, UniquenessFilter};
use crate::history::HistoryStore;
use crate::llm::ChatCompletionsBackend;
use crate::publisher::{Account, DryRunPublisher, PostId, PublishError, Publisher, XPublisher};
use crate::quota::{QuotaStatus, QuotaTracker};
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::status::{BotEvent, SleepReason, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Interrupted,
    MonthlyCapReached,
    /// Credentials failed too many times in a row
    Unauthorized,
}

/// Final counters reported when the loop exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub published: u32,
    /// Replies and reposts
    pub engaged: u32,
    pub posts_today: u32,
    pub posts_this_month: u32,
    pub stop_reason: StopReason,
}

/// Result of a single on-demand publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOnceOutcome {
    Published {
        post_id: PostId,
        text: String,
        fallback: bool,
    },
    /// Nothing was generated or published
    QuotaClosed(QuotaStatus),
}

/// What the loop does after one iteration
#[derive(Debug)]
enum Step {
    Sleep {
        delay: Duration,
        until: NaiveDateTime,
        reason: SleepReason,
    },
    Stop(StopReason),
}

pub struct Bot {
    generator: Arc<dyn ContentGenerator>,
    publisher: Arc<dyn Publisher>,
    history: HistoryStore,
    quota: QuotaTracker,
    scheduler: Scheduler,
    filter: UniquenessFilter,
    timings: LoopTimings,
    clock: Arc<dyn Clock>,
    reporter: Option<Arc<dyn StatusReporter>>,
    engagement: Option<Engagement>,
    rng: StdRng,
    consecutive_auth_failures: u32,
    published: u32,
    engaged: u32,
}

impl Bot {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        publisher: Arc<dyn Publisher>,
        history: HistoryStore,
        quota: QuotaTracker,
        scheduler: Scheduler,
        filter: UniquenessFilter,
        timings: LoopTimings,
    ) -> Self {
        Self {
            generator,
            publisher,
            history,
            quota,
            scheduler,
            filter,
            timings,
            clock: Arc::new(SystemClock),
            reporter: None,
            engagement: None,
            rng: StdRng::from_entropy(),
            consecutive_auth_failures: 0,
            published: 0,
            engaged: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Replies and reposts as a second action source under the same quota
    pub fn with_engagement(mut self, engagement: Engagement) -> Self {
        self.engagement = Some(engagement);
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn engagement(&self) -> Option<&Engagement> {
        self.engagement.as_ref()
    }

    async fn report(&self, event: BotEvent) {
        if let Some(reporter) = &self.reporter {
            reporter.report(&event).await;
        }
    }

    /// Run until stopped. Publishing is never raced against `shutdown`; the
    /// signal is observed between iterations, after generation and while
    /// sleeping.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let state = self.quota.state();
        log::info!(
            "Run loop starting: {}/{} posts today, {} this month, {} texts in history",
            state.daily_count,
            state.daily_target,
            state.monthly_count,
            self.history.len()
        );
        self.report(BotEvent::Started {
            posts_today: state.daily_count,
            daily_target: state.daily_target,
            posts_this_month: state.monthly_count,
        })
        .await;

        let stop_reason = loop {
            if *shutdown.borrow() {
                break StopReason::Interrupted;
            }

            let step = match self.iterate(&shutdown).await {
                Ok(step) => step,
                Err(e) => {
                    log::error!("Unexpected error in run loop: {:#}", e);
                    self.report(BotEvent::LoopError {
                        error: format!("{:#}", e),
                    })
                    .await;
                    self.sleep_step(self.timings.recovery_backoff, SleepReason::Recovery)
                }
            };

            match step {
                Step::Stop(reason) => break reason,
                Step::Sleep {
                    delay,
                    until,
                    reason,
                } => {
                    log::info!(
                        "Sleeping {} ({:?}); next action at {}",
                        format_duration(delay),
                        reason,
                        until.format("%Y-%m-%d %H:%M:%S")
                    );
                    self.report(BotEvent::Sleeping { until, reason }).await;

                    if !sleep_or_shutdown(delay, &mut shutdown).await {
                        break StopReason::Interrupted;
                    }
                }
            }
        };

        let state = self.quota.state();
        let summary = RunSummary {
            published: self.published,
            engaged: self.engaged,
            posts_today: state.daily_count,
            posts_this_month: state.monthly_count,
            stop_reason,
        };
        log::info!(
            "Run loop stopped ({:?}): {} published and {} engagements this run, {}/{} today, {} this month",
            summary.stop_reason,
            summary.published,
            summary.engaged,
            summary.posts_today,
            state.daily_target,
            summary.posts_this_month
        );
        self.report(BotEvent::Stopped {
            reason: stop_reason,
        })
        .await;

        Ok(summary)
    }

    fn sleep_step(&self, delay: Duration, reason: SleepReason) -> Step {
        let until = self.clock.now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
        Step::Sleep {
            delay,
            until,
            reason,
        }
    }

    /// Generate and publish exactly one post now, outside the schedule.
    /// Quiet hours are ignored; the quota is not.
    pub async fn post_once(&mut self) -> Result<PostOnceOutcome> {
        let today = self.clock.now().date();
        if self.quota.refresh(today, &mut self.rng) {
            self.quota
                .save()
                .await
                .context("Failed to persist quota state after day rollover")?;
        }

        let status = self.quota.status();
        if status != QuotaStatus::Open {
            let state = self.quota.state();
            log::warn!(
                "Quota is closed ({:?}: {}/{} today, {} this month); nothing published",
                status,
                state.daily_count,
                state.daily_target,
                state.monthly_count
            );
            return Ok(PostOnceOutcome::QuotaClosed(status));
        }

        let post = self
            .filter
            .generate_unique(self.generator.as_ref(), &self.history)
            .await
            .context("Content generation failed")?;
        let post_id = self
            .publisher
            .publish(&post.text)
            .await
            .context("Publishing failed")?;

        let text = post.text.clone();
        let fallback = post.fallback;
        self.record_published(post_id.clone(), post).await;

        Ok(PostOnceOutcome::Published {
            post_id,
            text,
            fallback,
        })
    }

    /// Book a live post: counters, history, quota, status. Returns when it
    /// was recorded.
    async fn record_published(&mut self, post_id: PostId, post: UniquePost) -> NaiveDateTime {
        self.consecutive_auth_failures = 0;
        self.published += 1;

        // The post is live; persistence problems must not cause a re-post
        if let Err(e) = self.history.record(&post.text).await {
            log::error!("Failed to persist history: {:#}", e);
        }
        self.quota.record_action();
        if let Err(e) = self.quota.save().await {
            log::error!("Failed to persist quota state: {:#}", e);
        }

        let state = self.quota.state();
        log::info!(
            "Published post {} ({}/{} today, {} chars{})",
            post_id,
            state.daily_count,
            state.daily_target,
            post.text.chars().count(),
            if post.fallback { ", fallback" } else { "" }
        );

        let published_at = self.clock.now();
        self.report(BotEvent::Published {
            post_id,
            text: post.text,
            at: published_at,
            fallback: post.fallback,
            posts_today: state.daily_count,
            posts_this_month: state.monthly_count,
        })
        .await;

        published_at
    }

    /// Book a live reply or repost against the quota
    async fn record_engaged(&mut self, engaged: Engaged) -> NaiveDateTime {
        self.consecutive_auth_failures = 0;
        self.engaged += 1;

        self.quota.record_action();
        if let Err(e) = self.quota.save().await {
            log::error!("Failed to persist quota state: {:#}", e);
        }

        let state = self.quota.state();
        log::info!(
            "{:?} on post {}{} ({}/{} today)",
            engaged.action,
            engaged.target_id,
            engaged
                .reply_text
                .as_deref()
                .map(|text| format!(": {}", text))
                .unwrap_or_default(),
            state.daily_count,
            state.daily_target
        );

        let engaged_at = self.clock.now();
        self.report(BotEvent::Engaged {
            action: engaged.action,
            target_id: engaged.target_id,
            at: engaged_at,
            posts_today: state.daily_count,
            posts_this_month: state.monthly_count,
        })
        .await;

        engaged_at
    }

    /// Stop at the monthly cap, otherwise wait for the next slot
    fn after_action(&mut self, acted_at: NaiveDateTime) -> Step {
        if self.quota.status() == QuotaStatus::MonthlyExhausted {
            return self.monthly_cap_stop();
        }

        let decision = self.scheduler.next_delay(acted_at, &mut self.rng);
        Step::Sleep {
            delay: decision.delay,
            until: decision.next_action_at,
            reason: if decision.quiet_hours {
                SleepReason::QuietHours
            } else {
                SleepReason::NextPost
            },
        }
    }

    /// Try one reply or repost. `None` when nothing was acted on and the
    /// iteration should publish an original post instead.
    async fn engage(&mut self, shutdown: &watch::Receiver<bool>) -> Option<Step> {
        let engagement = self.engagement.as_ref()?;
        let targets = match engagement.candidates(&mut self.rng).await {
            Ok(targets) => targets,
            Err(e) if e.is_fatal() => {
                log::error!("Search rejected our credentials: {}", e);
                self.report(BotEvent::PublishFailed {
                    error: e.to_string(),
                })
                .await;
                return Some(self.credential_failure());
            }
            Err(e) => {
                log::warn!("Search failed: {}; posting instead", e);
                return None;
            }
        };

        for target in targets {
            let Some(action) = self.engagement.as_ref()?.choose_action(&mut self.rng) else {
                continue;
            };
            if *shutdown.borrow() {
                return Some(Step::Stop(StopReason::Interrupted));
            }

            let engagement = self.engagement.as_mut()?;
            match engagement.perform(&target, action, &mut self.rng).await {
                Ok(engaged) => {
                    let engaged_at = self.record_engaged(engaged).await;
                    return Some(self.after_action(engaged_at));
                }
                Err(e) => {
                    self.report(BotEvent::PublishFailed {
                        error: e.to_string(),
                    })
                    .await;
                    if e.is_fatal() {
                        log::error!("{:?} rejected our credentials: {}", action, e);
                        return Some(self.credential_failure());
                    }
                    self.consecutive_auth_failures = 0;
                    log::warn!("{:?} on post {} failed: {}", action, target.id, e);
                }
            }
        }

        log::info!("No engagement this round; posting instead");
        None
    }

    fn monthly_cap_stop(&self) -> Step {
        log::warn!(
            "Monthly cap of {} posts reached; stopping",
            self.quota.config().monthly_cap.unwrap_or_default()
        );
        Step::Stop(StopReason::MonthlyCapReached)
    }

    async fn iterate(&mut self, shutdown: &watch::Receiver<bool>) -> Result<Step> {
        let now = self.clock.now();

        if self.quota.refresh(now.date(), &mut self.rng) {
            self.quota
                .save()
                .await
                .context("Failed to persist quota state after day rollover")?;
            self.report(BotEvent::DayRollover {
                date: now.date(),
                daily_target: self.quota.state().daily_target,
            })
            .await;
        }

        match self.quota.status() {
            QuotaStatus::MonthlyExhausted => return Ok(self.monthly_cap_stop()),
            QuotaStatus::DailyExhausted => {
                let state = self.quota.state();
                log::info!(
                    "Daily target reached ({}/{}); waiting for tomorrow",
                    state.daily_count,
                    state.daily_target
                );
                self.report(BotEvent::QuotaExhausted {
                    posts_today: state.daily_count,
                    daily_target: state.daily_target,
                })
                .await;
                return Ok(self.sleep_step(self.timings.quota_backoff, SleepReason::QuotaExhausted));
            }
            QuotaStatus::Open => {}
        }

        if self.scheduler.in_quiet_hours(now) {
            let decision = self.scheduler.next_delay(now, &mut self.rng);
            log::info!("Quiet hours at {}; deferring to the wake window", now.format("%H:%M"));
            return Ok(Step::Sleep {
                delay: decision.delay,
                until: decision.next_action_at,
                reason: SleepReason::QuietHours,
            });
        }

        let engage_first = match &self.engagement {
            Some(engagement) => self.rng.gen_bool(engagement.share()),
            None => false,
        };
        if engage_first {
            if let Some(step) = self.engage(shutdown).await {
                return Ok(step);
            }
        }

        let post = match self
            .filter
            .generate_unique(self.generator.as_ref(), &self.history)
            .await
        {
            Ok(post) => post,
            Err(e) => {
                log::error!("Content generation failed: {}", e);
                self.report(BotEvent::GenerationFailed {
                    error: e.to_string(),
                })
                .await;
                if e.is_fatal() {
                    return Ok(self.credential_failure());
                }
                self.consecutive_auth_failures = 0;
                return Ok(self.sleep_step(self.timings.recovery_backoff, SleepReason::Recovery));
            }
        };

        // Generation can take minutes; never publish after an interrupt
        if *shutdown.borrow() {
            log::info!("Shutdown requested during generation; discarding the candidate");
            return Ok(Step::Stop(StopReason::Interrupted));
        }

        match self.publisher.publish(&post.text).await {
            Ok(post_id) => {
                let published_at = self.record_published(post_id, post).await;
                Ok(self.after_action(published_at))
            }
            Err(e) => {
                self.report(BotEvent::PublishFailed {
                    error: e.to_string(),
                })
                .await;
                Ok(self.publish_failure(e))
            }
        }
    }

    fn publish_failure(&mut self, error: PublishError) -> Step {
        if error.is_fatal() {
            log::error!("Publish rejected our credentials: {}", error);
            return self.credential_failure();
        }
        self.consecutive_auth_failures = 0;
        log::warn!("Publish failed: {}; nothing recorded, will retry", error);
        self.sleep_step(self.timings.publish_retry, SleepReason::PublishRetry)
    }

    fn credential_failure(&mut self) -> Step {
        self.consecutive_auth_failures += 1;
        let limit = self.timings.max_consecutive_auth_failures.max(1);
        if self.consecutive_auth_failures >= limit {
            log::error!(
                "{} consecutive credential failures; stopping",
                self.consecutive_auth_failures
            );
            return Step::Stop(StopReason::Unauthorized);
        }
        log::warn!(
            "Credential failure {}/{}; backing off",
            self.consecutive_auth_failures,
            limit
        );
        self.sleep_step(self.timings.recovery_backoff, SleepReason::Recovery)
    }
}

/// Returns false when shutdown was requested before `delay` elapsed
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    let interrupted = tokio::select! {
        _ = &mut sleep => return true,
        stop = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => stop,
    };
    if interrupted {
        return false;
    }

    // Sender dropped: nobody can interrupt any more
    sleep.await;
    true
}

fn format_duration(delay: Duration) -> String {
    let secs = delay.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Build the content strategy selected by `BOT_MODE`
pub fn build_generator(config: &Config) -> Result<Arc<dyn ContentGenerator>> {
    match config.mode {
        GenerationMode::Template => {
            let generator = TemplateGenerator::new(TemplateCatalog::builtin())
                .context("Built-in template catalog is invalid")?;
            Ok(Arc::new(generator))
        }
        GenerationMode::Prompted => {
            let knowledge = match &config.knowledge_path {
                Some(path) => Knowledge::load(path)
                    .with_context(|| format!("Failed to load knowledge from {}", path.display()))?,
                None => Knowledge::builtin(),
            };
            let backend = ChatCompletionsBackend::new(&config.llm)
                .context("Failed to create generative backend client")?;
            log::info!("Prompted generation with model {}", backend.model());

            let settings = PromptedSettings {
                max_retries: config.llm.max_retries,
                product_focus_probability: config.product_focus_probability,
                length_band: config.length_band,
                strict_length_band: config.strict_length_band,
            };
            Ok(Arc::new(PromptedGenerator::new(
                Arc::new(backend),
                knowledge,
                settings,
            )))
        }
    }
}

/// Confirm the posting credentials, retrying transient failures
async fn retry_verify(publisher: &XPublisher) -> Result<Account> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    log::info!("Verifying X credentials...");

    for attempt in 1..=max_retries {
        match publisher.verify_credentials().await {
            Ok(account) => {
                log::info!("Authenticated as @{} on attempt {}", account.username, attempt);
                return Ok(account);
            }
            Err(e) if e.is_fatal() => {
                return Err(e).context("X rejected the configured credentials");
            }
            Err(e) if attempt == max_retries => {
                return Err(e).context("Failed to reach the X API after multiple retries");
            }
            Err(e) => {
                log::warn!(
                    "Attempt {}/{} to reach the X API failed: {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    anyhow::bail!("Failed to verify X credentials")
}

/// Verified live X client and the account it acts as; `None` in dry run
async fn connect_x(config: &Config) -> Result<Option<(Arc<XPublisher>, Account)>> {
    if config.dry_run {
        log::warn!("DRY_RUN enabled; posts will be logged, not published");
        return Ok(None);
    }

    let credentials = config
        .twitter
        .clone()
        .context("X credentials must be set unless DRY_RUN is enabled")?;
    let client = XPublisher::new(credentials, config.twitter_api_base.clone())
        .context("Failed to create X client")?;
    let account = retry_verify(&client).await?;
    Ok(Some((Arc::new(client), account)))
}

/// Wire every component from configuration: generator, verified publisher,
/// persisted history and quota state, and engagement when enabled
pub async fn build_bot(config: &Config) -> Result<Bot> {
    log::info!(
        "Initializing bot ({} mode{})...",
        config.mode,
        if config.dry_run { ", dry run" } else { "" }
    );

    let mut rng = StdRng::from_entropy();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let generator = build_generator(config)?;
    let live = connect_x(config).await?;
    let publisher: Arc<dyn Publisher> = match &live {
        Some((client, _)) => client.clone() as Arc<dyn Publisher>,
        None => Arc::new(DryRunPublisher::new()),
    };
    let history = HistoryStore::load(&config.history_path, config.max_history).await;
    let quota = QuotaTracker::load(
        config.quota,
        &config.quota_state_path,
        clock.now().date(),
        &mut rng,
    )
    .await;

    let mut bot = Bot::new(
        generator,
        publisher,
        history,
        quota,
        Scheduler::new(config.schedule.clone()),
        UniquenessFilter::new(config.max_generation_attempts, config.length_band),
        config.timings,
    )
    .with_clock(clock)
    .with_rng(rng);

    if config.engagement.share > 0.0 {
        match live {
            Some((client, account)) => {
                let processed =
                    HistoryStore::load(&config.processed_path, config.max_history).await;
                log::info!(
                    "Engagement enabled: {:.0}% of iterations, {} keywords, {} posts already processed",
                    config.engagement.share * 100.0,
                    config.engagement.keywords.len(),
                    processed.len()
                );
                bot = bot.with_engagement(Engagement::new(
                    client,
                    account.id,
                    config.engagement.clone(),
                    processed,
                ));
            }
            None => log::warn!("Engagement needs the live X API; disabled in dry run"),
        }
    }

    Ok(bot)
}

/// Build the bot from configuration and run until stopped
pub async fn run_bot(
    config: Config,
    shutdown: watch::Receiver<bool>,
    reporter: Option<Arc<dyn StatusReporter>>,
) -> Result<RunSummary> {
    let mut bot = build_bot(&config).await?;
    if let Some(reporter) = reporter {
        bot = bot.with_reporter(reporter);
    }

    bot.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 02m 05s");
        assert_eq!(format_duration(Duration::from_secs(59)), "0h 00m 59s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_signal() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_signal() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_survives_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let start = tokio::time::Instant::now();
        assert!(sleep_or_shutdown(Duration::from_secs(60), &mut rx).await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
