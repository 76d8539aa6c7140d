/// Quota Tracker Module
///
/// Daily and (optional) monthly post counters. The daily target is rerolled
/// from the configured range whenever the local date changes; the monthly
/// counter resets when the calendar month changes. State is persisted as JSON
/// after every mutation so restarts keep counting where they left off.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    pub daily_min: u32,
    pub daily_max: u32,
    /// Hard monthly ceiling; `None` disables monthly tracking
    pub monthly_cap: Option<u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_min: 3,
            daily_max: 5,
            monthly_cap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub daily_count: u32,
    pub daily_target: u32,
    pub monthly_count: u32,
    pub last_reset_date: NaiveDate,
    /// (year, month) the monthly count belongs to
    pub month: (i32, u32),
}

/// Answer to "may the bot act now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Open,
    /// Today's target is met; opens again after the date changes
    DailyExhausted,
    /// The monthly ceiling is met; the run loop must stop
    MonthlyExhausted,
}

#[derive(Debug)]
pub struct QuotaTracker {
    config: QuotaConfig,
    state: QuotaState,
    path: Option<PathBuf>,
}

fn month_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

fn roll_target<R: Rng + ?Sized>(config: &QuotaConfig, rng: &mut R) -> u32 {
    let low = config.daily_min.min(config.daily_max);
    let high = config.daily_min.max(config.daily_max);
    rng.gen_range(low..=high)
}

impl QuotaTracker {
    /// Fresh tracker starting on `today`
    pub fn new<R: Rng + ?Sized>(config: QuotaConfig, today: NaiveDate, rng: &mut R) -> Self {
        Self {
            state: QuotaState {
                daily_count: 0,
                daily_target: roll_target(&config, rng),
                monthly_count: 0,
                last_reset_date: today,
                month: month_of(today),
            },
            config,
            path: None,
        }
    }

    /// Restore persisted state; a missing or corrupt file starts fresh
    pub async fn load<R: Rng + ?Sized>(
        config: QuotaConfig,
        path: impl AsRef<Path>,
        today: NaiveDate,
        rng: &mut R,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tracker = Self::new(config, today, rng);

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<QuotaState>(&raw) {
                Ok(state) => {
                    log::info!(
                        "Restored quota state: {}/{} today, {} this month (as of {})",
                        state.daily_count,
                        state.daily_target,
                        state.monthly_count,
                        state.last_reset_date
                    );
                    tracker.state = state;
                }
                Err(e) => log::warn!("Ignoring corrupt quota state {}: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not read quota state {}: {}", path.display(), e),
        }

        tracker.path = Some(path);
        tracker
    }

    pub fn state(&self) -> &QuotaState {
        &self.state
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// "New day" transition. Returns true when the counters were reset.
    pub fn refresh<R: Rng + ?Sized>(&mut self, today: NaiveDate, rng: &mut R) -> bool {
        if today == self.state.last_reset_date {
            return false;
        }

        let yesterday_count = self.state.daily_count;
        self.state.daily_count = 0;
        self.state.daily_target = roll_target(&self.config, rng);
        self.state.last_reset_date = today;

        if month_of(today) != self.state.month {
            log::info!(
                "New month; resetting monthly count (was {})",
                self.state.monthly_count
            );
            self.state.monthly_count = 0;
            self.state.month = month_of(today);
        }

        log::info!(
            "New day {}: previous day had {} posts, today's target is {}",
            today,
            yesterday_count,
            self.state.daily_target
        );
        true
    }

    /// Count a confirmed publish
    pub fn record_action(&mut self) {
        self.state.daily_count += 1;
        if self.config.monthly_cap.is_some() {
            self.state.monthly_count += 1;
        }
    }

    pub fn status(&self) -> QuotaStatus {
        if let Some(cap) = self.config.monthly_cap {
            if self.state.monthly_count >= cap {
                return QuotaStatus::MonthlyExhausted;
            }
        }
        if self.state.daily_count >= self.state.daily_target {
            return QuotaStatus::DailyExhausted;
        }
        QuotaStatus::Open
    }

    pub fn can_act(&self) -> bool {
        self.status() == QuotaStatus::Open
    }

    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.state).context("Failed to serialize quota state")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write quota state to {}", path.display()))?;
        Ok(())
    }
}
