/// Engagement Module
///
/// Replies to and reposts recent posts found by keyword search. Each acted-on
/// post id is remembered so it is never touched twice, the account's own
/// posts are skipped, and only a sampled share of the search results is acted
/// on. Every reply or repost is one quota action, the same as an original post.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::history::HistoryStore;
use crate::publisher::{PostId, PublishError};

/// A post returned by recent search
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FoundPost {
    pub id: String,
    pub text: String,
    /// Missing when the search did not expand authors
    #[serde(default)]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementAction {
    Reply,
    Repost,
}

/// A completed reply or repost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engaged {
    pub action: EngagementAction,
    pub target_id: String,
    /// Id of the reply; `None` for reposts
    pub reply_id: Option<PostId>,
    pub reply_text: Option<String>,
}

#[async_trait]
pub trait EngagementClient: Send + Sync {
    async fn search_recent(&self, query: &str, max_results: u32) -> Result<Vec<FoundPost>, PublishError>;

    async fn reply(&self, in_reply_to: &str, text: &str) -> Result<PostId, PublishError>;

    async fn repost(&self, account_id: &str, post_id: &str) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementSettings {
    /// Chance that an iteration tries engagement before an original post;
    /// zero disables engagement
    pub share: f64,
    pub keywords: Vec<String>,
    pub replies: Vec<String>,
    /// Chance of acting on each search result
    pub selection_rate: f64,
    /// Chance that an action is a reply rather than a repost
    pub reply_probability: f64,
    /// Search results considered per iteration
    pub max_candidates: usize,
    /// Page size requested from search (the API accepts 10 to 100)
    pub search_results: u32,
}

impl Default for EngagementSettings {
    fn default() -> Self {
        Self {
            share: 0.0,
            keywords: strings(BUILTIN_KEYWORDS),
            replies: strings(BUILTIN_REPLIES),
            selection_rate: 0.3,
            reply_probability: 0.7,
            max_candidates: 5,
            search_results: 10,
        }
    }
}

const BUILTIN_KEYWORDS: &[&str] = &[
    "stablecoin payments",
    "cross-border payments",
    "web3 developer",
    "blockchain development",
    "smart contracts",
    "solidity",
    "rust programming",
    "DeFi",
    "fintech africa",
    "on-chain settlement",
    "buidl",
];

const BUILTIN_REPLIES: &[&str] = &[
    "This is actually a solid approach.",
    "Been working on something similar. Great minds.",
    "Really well explained.",
    "Great breakdown.",
    "This needs more visibility.",
    "Love seeing more devs building here.",
    "We're still early.",
    "Couldn't agree more.",
    "Real talk.",
    "The security implications here are interesting.",
    "This pattern works well for scalability.",
    "Great use case.",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Search query for one keyword: original posts only, English
pub fn search_query(keyword: &str) -> String {
    format!("{} -is:retweet -is:reply lang:en", keyword)
}

pub struct Engagement {
    client: Arc<dyn EngagementClient>,
    account_id: String,
    settings: EngagementSettings,
    /// Ids of posts already replied to or reposted
    processed: HistoryStore,
}

impl Engagement {
    pub fn new(
        client: Arc<dyn EngagementClient>,
        account_id: impl Into<String>,
        settings: EngagementSettings,
        processed: HistoryStore,
    ) -> Self {
        Self {
            client,
            account_id: account_id.into(),
            settings,
            processed,
        }
    }

    pub fn share(&self) -> f64 {
        self.settings.share.clamp(0.0, 1.0)
    }

    pub fn processed(&self) -> &HistoryStore {
        &self.processed
    }

    /// Search one random keyword and keep the first few results that are
    /// neither ours nor already processed
    pub async fn candidates<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<FoundPost>, PublishError> {
        let Some(keyword) = self.settings.keywords.choose(rng) else {
            return Ok(Vec::new());
        };
        let query = search_query(keyword);
        log::info!("Searching recent posts for '{}'", keyword);

        let found = self
            .client
            .search_recent(&query, self.settings.search_results)
            .await?;
        let total = found.len();

        let fresh: Vec<FoundPost> = found
            .into_iter()
            .filter(|post| !self.processed.contains(&post.id))
            .filter(|post| post.author_id.as_deref() != Some(self.account_id.as_str()))
            .take(self.settings.max_candidates)
            .collect();

        log::info!("Search returned {} posts, {} new", total, fresh.len());
        Ok(fresh)
    }

    /// Sample whether to act on one result, and how
    pub fn choose_action<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<EngagementAction> {
        if !rng.gen_bool(self.settings.selection_rate.clamp(0.0, 1.0)) {
            return None;
        }
        if rng.gen_bool(self.settings.reply_probability.clamp(0.0, 1.0)) {
            Some(EngagementAction::Reply)
        } else {
            Some(EngagementAction::Repost)
        }
    }

    /// Carry out `action` on `target` and remember the target
    pub async fn perform<R: Rng + ?Sized>(
        &mut self,
        target: &FoundPost,
        action: EngagementAction,
        rng: &mut R,
    ) -> Result<Engaged, PublishError> {
        let engaged = match action {
            EngagementAction::Reply => {
                let Some(text) = self.settings.replies.choose(rng).cloned() else {
                    return Err(PublishError::Rejected {
                        status: 0,
                        message: "no reply texts configured".to_string(),
                    });
                };
                let reply_id = self.client.reply(&target.id, &text).await?;
                Engaged {
                    action,
                    target_id: target.id.clone(),
                    reply_id: Some(reply_id),
                    reply_text: Some(text),
                }
            }
            EngagementAction::Repost => {
                self.client.repost(&self.account_id, &target.id).await?;
                Engaged {
                    action,
                    target_id: target.id.clone(),
                    reply_id: None,
                    reply_text: None,
                }
            }
        };

        // The action is live; a persistence failure must not block the loop
        if let Err(e) = self.processed.record(&target.id).await {
            log::error!("Failed to persist processed post ids: {:#}", e);
        }
        Ok(engaged)
    }
}
