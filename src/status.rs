/// Status Module
///
/// Events the run loop emits after each state transition, and the shared
/// snapshot the HTTP status surface reads from.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::StopReason;
use crate::engagement::EngagementAction;

/// Longest post preview kept in the status snapshot
pub const LAST_POST_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepReason {
    /// Regular gap after a successful post
    NextPost,
    QuietHours,
    QuotaExhausted,
    PublishRetry,
    Recovery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Started {
        posts_today: u32,
        daily_target: u32,
        posts_this_month: u32,
    },
    DayRollover {
        date: NaiveDate,
        daily_target: u32,
    },
    QuotaExhausted {
        posts_today: u32,
        daily_target: u32,
    },
    Published {
        post_id: String,
        text: String,
        at: NaiveDateTime,
        fallback: bool,
        posts_today: u32,
        posts_this_month: u32,
    },
    /// A reply or repost went out
    Engaged {
        action: EngagementAction,
        target_id: String,
        at: NaiveDateTime,
        posts_today: u32,
        posts_this_month: u32,
    },
    PublishFailed {
        error: String,
    },
    GenerationFailed {
        error: String,
    },
    /// An iteration failed outside generation and publishing
    LoopError {
        error: String,
    },
    Sleeping {
        until: NaiveDateTime,
        reason: SleepReason,
    },
    Stopped {
        reason: StopReason,
    },
}

/// Observer invoked by the run loop; must not block for long
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, event: &BotEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Starting,
    Running,
    Sleeping,
    QuietHours,
    QuotaExhausted,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub state: BotState,
    pub started_at: DateTime<Utc>,
    pub posts_today: u32,
    pub daily_target: u32,
    pub posts_this_month: u32,
    /// Published since this process started
    pub total_published: u64,
    pub last_post: Option<String>,
    pub last_post_id: Option<String>,
    pub last_post_at: Option<NaiveDateTime>,
    /// Replies and reposts since this process started
    pub total_engagements: u64,
    pub last_engagement: Option<EngagementAction>,
    pub last_engaged_post_id: Option<String>,
    pub last_error: Option<String>,
    pub next_action_at: Option<NaiveDateTime>,
    pub stop_reason: Option<StopReason>,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            state: BotState::Starting,
            started_at: Utc::now(),
            posts_today: 0,
            daily_target: 0,
            posts_this_month: 0,
            total_published: 0,
            last_post: None,
            last_post_id: None,
            last_post_at: None,
            total_engagements: 0,
            last_engagement: None,
            last_engaged_post_id: None,
            last_error: None,
            next_action_at: None,
            stop_reason: None,
        }
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= LAST_POST_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(LAST_POST_PREVIEW_CHARS).collect();
    format!("{}...", cut)
}

impl BotStatus {
    pub fn apply(&mut self, event: &BotEvent) {
        match event {
            BotEvent::Started {
                posts_today,
                daily_target,
                posts_this_month,
            } => {
                self.state = BotState::Running;
                self.posts_today = *posts_today;
                self.daily_target = *daily_target;
                self.posts_this_month = *posts_this_month;
            }
            BotEvent::DayRollover { daily_target, .. } => {
                self.posts_today = 0;
                self.daily_target = *daily_target;
            }
            BotEvent::QuotaExhausted {
                posts_today,
                daily_target,
            } => {
                self.state = BotState::QuotaExhausted;
                self.posts_today = *posts_today;
                self.daily_target = *daily_target;
            }
            BotEvent::Published {
                post_id,
                text,
                at,
                posts_today,
                posts_this_month,
                ..
            } => {
                self.state = BotState::Running;
                self.total_published += 1;
                self.posts_today = *posts_today;
                self.posts_this_month = *posts_this_month;
                self.last_post = Some(preview(text));
                self.last_post_id = Some(post_id.clone());
                self.last_post_at = Some(*at);
                self.last_error = None;
            }
            BotEvent::Engaged {
                action,
                target_id,
                posts_today,
                posts_this_month,
                ..
            } => {
                self.state = BotState::Running;
                self.total_engagements += 1;
                self.posts_today = *posts_today;
                self.posts_this_month = *posts_this_month;
                self.last_engagement = Some(*action);
                self.last_engaged_post_id = Some(target_id.clone());
                self.last_error = None;
            }
            BotEvent::PublishFailed { error }
            | BotEvent::GenerationFailed { error }
            | BotEvent::LoopError { error } => {
                self.last_error = Some(error.clone());
            }
            BotEvent::Sleeping { until, reason } => {
                self.next_action_at = Some(*until);
                self.state = match reason {
                    SleepReason::QuietHours => BotState::QuietHours,
                    SleepReason::QuotaExhausted => BotState::QuotaExhausted,
                    _ => BotState::Sleeping,
                };
            }
            BotEvent::Stopped { reason } => {
                self.state = BotState::Stopped;
                self.stop_reason = Some(*reason);
                self.next_action_at = None;
            }
        }
    }
}

/// Status snapshot shared between the run loop and the HTTP server
#[derive(Clone, Default)]
pub struct SharedStatus {
    inner: Arc<RwLock<BotStatus>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> BotStatus {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl StatusReporter for SharedStatus {
    async fn report(&self, event: &BotEvent) {
        self.inner.write().await.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_updates_snapshot() {
        let status = SharedStatus::new();
        status
            .report(&BotEvent::Started {
                posts_today: 1,
                daily_target: 4,
                posts_this_month: 10,
            })
            .await;
        status
            .report(&BotEvent::PublishFailed {
                error: "rate limited".to_string(),
            })
            .await;
        status
            .report(&BotEvent::Published {
                post_id: "123".to_string(),
                text: "hello".to_string(),
                at: at(12),
                fallback: false,
                posts_today: 2,
                posts_this_month: 11,
            })
            .await;

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.state, BotState::Running);
        assert_eq!(snapshot.posts_today, 2);
        assert_eq!(snapshot.daily_target, 4);
        assert_eq!(snapshot.posts_this_month, 11);
        assert_eq!(snapshot.total_published, 1);
        assert_eq!(snapshot.last_post.as_deref(), Some("hello"));
        assert_eq!(snapshot.last_post_id.as_deref(), Some("123"));
        assert_eq!(snapshot.last_error, None);
    }

    #[test]
    fn test_long_post_is_truncated() {
        let mut status = BotStatus::default();
        status.apply(&BotEvent::Published {
            post_id: "1".to_string(),
            text: "é".repeat(150),
            at: at(9),
            fallback: false,
            posts_today: 1,
            posts_this_month: 0,
        });

        let last = status.last_post.unwrap();
        assert_eq!(last.chars().count(), LAST_POST_PREVIEW_CHARS + 3);
        assert!(last.ends_with("..."));
    }

    #[test]
    fn test_sleep_reason_drives_state() {
        let mut status = BotStatus::default();
        status.apply(&BotEvent::Sleeping {
            until: at(8),
            reason: SleepReason::QuietHours,
        });
        assert_eq!(status.state, BotState::QuietHours);
        assert_eq!(status.next_action_at, Some(at(8)));

        status.apply(&BotEvent::Stopped {
            reason: StopReason::MonthlyCapReached,
        });
        assert_eq!(status.state, BotState::Stopped);
        assert_eq!(status.next_action_at, None);
    }

    #[test]
    fn test_engagement_counts_toward_quota_snapshot() {
        let mut status = BotStatus::default();
        status.apply(&BotEvent::Engaged {
            action: EngagementAction::Repost,
            target_id: "555".to_string(),
            at: at(14),
            posts_today: 2,
            posts_this_month: 9,
        });

        assert_eq!(status.total_engagements, 1);
        assert_eq!(status.total_published, 0);
        assert_eq!(status.posts_today, 2);
        assert_eq!(status.posts_this_month, 9);
        assert_eq!(status.last_engagement, Some(EngagementAction::Repost));
        assert_eq!(status.last_engaged_post_id.as_deref(), Some("555"));
    }

    #[test]
    fn test_loop_error_is_surfaced() {
        let mut status = BotStatus::default();
        status.apply(&BotEvent::LoopError {
            error: "Failed to persist quota state after day rollover".to_string(),
        });
        assert_eq!(
            status.last_error.as_deref(),
            Some("Failed to persist quota state after day rollover")
        );
        assert_eq!(status.state, BotState::Starting);
    }

    #[test]
    fn test_day_rollover_resets_count() {
        let mut status = BotStatus::default();
        status.posts_today = 5;
        status.apply(&BotEvent::DayRollover {
            date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            daily_target: 3,
        });
        assert_eq!(status.posts_today, 0);
        assert_eq!(status.daily_target, 3);
    }
}
