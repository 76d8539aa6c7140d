/// Post Publisher Module
///
/// Submits finished posts to X (API v2) with OAuth 1.0a user-context signing,
/// or just logs them in dry-run mode. The live client also searches recent
/// posts, replies and reposts for engagement. Failures are always reported; whether a
/// failure is fatal (bad credentials) or transient is left for the run loop.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use sha1::Sha1;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::config::XCredentials;
use crate::engagement::{EngagementClient, FoundPost};

pub type PostId = String;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("rate limited (429){}", .reset_in_secs.map(|s| format!(", resets in {}s", s)).unwrap_or_default())]
    RateLimited { reset_in_secs: Option<i64> },

    #[error("post rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("could not sign request: {0}")]
    Signing(String),
}

impl PublishError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        PublishError::Network(e.to_string())
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, text: &str) -> Result<PostId, PublishError>;
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: Option<CreatedPost>,
}

/// The authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    /// Absent when nothing matched
    #[serde(default)]
    data: Vec<FoundPost>,
}

#[derive(Debug, Deserialize)]
struct RepostData {
    retweeted: bool,
}

#[derive(Debug, Deserialize)]
struct RepostResponse {
    data: Option<RepostData>,
}

fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// HMAC-SHA1 signature over the OAuth 1.0a signature base string.
/// `params` holds every oauth_* parameter plus any query or form parameters.
pub fn oauth_signature(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, PublishError> {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&param_string)
    );
    let signing_key = format!("{}&{}", encode(consumer_secret), encode(token_secret));

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes()) else {
        return Err(PublishError::Signing("invalid HMAC key".to_string()));
    };
    mac.update(base_string.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct XPublisher {
    http_client: reqwest::Client,
    api_base: String,
    credentials: XCredentials,
}

impl XPublisher {
    pub fn new(credentials: XCredentials, api_base: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// `query` must hold every query-string parameter of the request; they are
    /// part of the signature but not of the header.
    fn authorization_header(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<String, PublishError> {
        let nonce: String = {
            let mut rng = rand::thread_rng();
            (0..32)
                .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
                .collect()
        };
        let timestamp = Utc::now().timestamp().to_string();

        let mut oauth_params = vec![
            ("oauth_consumer_key", self.credentials.api_key.as_str()),
            ("oauth_nonce", nonce.as_str()),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", self.credentials.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let mut signed_params = oauth_params.clone();
        signed_params.extend_from_slice(query);
        let signature = oauth_signature(
            method,
            url,
            &signed_params,
            &self.credentials.api_secret,
            &self.credentials.access_token_secret,
        )?;
        oauth_params.push(("oauth_signature", signature.as_str()));
        oauth_params.sort();

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", header))
    }

    /// The authenticated account; confirms the credentials work
    pub async fn verify_credentials(&self) -> Result<Account, PublishError> {
        let url = format!("{}/users/me", self.api_base);
        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.authorization_header("GET", &url, &[])?)
            .send()
            .await?;

        let response = check_response(response).await?;
        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Malformed(e.to_string()))?;

        me.data
            .ok_or_else(|| PublishError::Malformed("missing user data".to_string()))
    }

    async fn create_post(&self, body: serde_json::Value) -> Result<PostId, PublishError> {
        let url = format!("{}/tweets", self.api_base);
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.authorization_header("POST", &url, &[])?)
            .json(&body)
            .send()
            .await?;

        let response = check_response(response).await?;
        let created: CreatePostResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Malformed(e.to_string()))?;

        match created.data {
            Some(post) if !post.id.is_empty() => Ok(post.id),
            _ => Err(PublishError::Malformed("response carried no post id".to_string())),
        }
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    if let Some(remaining) = response
        .headers()
        .get("x-rate-limit-remaining")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u32>().ok())
    {
        log::debug!("X API rate limit: {} requests remaining", remaining);
        if remaining < 5 {
            log::warn!("Low X API rate limit remaining: {}", remaining);
        }
    }

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reset_in_secs = response
        .headers()
        .get("x-rate-limit-reset")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .map(|reset| (reset - Utc::now().timestamp()).max(0));
    let text = response.text().await.unwrap_or_default();

    // X error bodies carry a human-readable "detail" or "title"
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            v["detail"]
                .as_str()
                .or_else(|| v["title"].as_str())
                .map(String::from)
        })
        .unwrap_or(text);

    Err(match status.as_u16() {
        401 => PublishError::Unauthorized(message),
        429 => PublishError::RateLimited { reset_in_secs },
        code => PublishError::Rejected {
            status: code,
            message,
        },
    })
}

#[async_trait]
impl Publisher for XPublisher {
    async fn publish(&self, text: &str) -> Result<PostId, PublishError> {
        self.create_post(serde_json::json!({ "text": text })).await
    }
}

#[async_trait]
impl EngagementClient for XPublisher {
    async fn search_recent(&self, query: &str, max_results: u32) -> Result<Vec<FoundPost>, PublishError> {
        let url = format!("{}/tweets/search/recent", self.api_base);
        let max_results = max_results.to_string();
        let params = [
            ("query", query),
            ("max_results", max_results.as_str()),
            ("tweet.fields", "author_id,created_at"),
        ];

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .header("Authorization", self.authorization_header("GET", &url, &params)?)
            .send()
            .await?;

        let response = check_response(response).await?;
        let found: SearchResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Malformed(e.to_string()))?;
        Ok(found.data)
    }

    async fn reply(&self, in_reply_to: &str, text: &str) -> Result<PostId, PublishError> {
        self.create_post(serde_json::json!({
            "text": text,
            "reply": { "in_reply_to_tweet_id": in_reply_to }
        }))
        .await
    }

    async fn repost(&self, account_id: &str, post_id: &str) -> Result<(), PublishError> {
        let url = format!("{}/users/{}/retweets", self.api_base, encode(account_id));
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.authorization_header("POST", &url, &[])?)
            .json(&serde_json::json!({ "tweet_id": post_id }))
            .send()
            .await?;

        let response = check_response(response).await?;
        let reposted: RepostResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Malformed(e.to_string()))?;

        match reposted.data {
            Some(data) if data.retweeted => Ok(()),
            _ => Err(PublishError::Malformed("repost was not confirmed".to_string())),
        }
    }
}

/// Logs posts instead of sending them
#[derive(Default)]
pub struct DryRunPublisher {
    published: AtomicU64,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, text: &str) -> Result<PostId, PublishError> {
        let n = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("[dry run] would post ({} chars): {}", text.chars().count(), text);
        Ok(format!("dry-run-{}", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_reference_example() {
        // Worked example from X's "Creating a signature" documentation
        let params = [
            ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
            ("include_entities", "true"),
            ("oauth_consumer_key", "xvz1evFS4wEEPTGEFPHBog"),
            ("oauth_nonce", "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg"),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", "1318622958"),
            ("oauth_token", "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb"),
            ("oauth_version", "1.0"),
        ];

        let signature = oauth_signature(
            "post",
            "https://api.twitter.com/1.1/statuses/update.json",
            &params,
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
        .unwrap();
        assert_eq!(signature, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
    }

    #[test]
    fn test_authorization_header_carries_all_oauth_fields() {
        let publisher = XPublisher::new(
            XCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                access_token: "token".to_string(),
                access_token_secret: "token-secret".to_string(),
            },
            "https://api.twitter.com/2/",
        )
        .unwrap();

        let header = publisher
            .authorization_header("POST", "https://api.twitter.com/2/tweets", &[])
            .unwrap();
        assert!(header.starts_with("OAuth "));
        for field in [
            "oauth_consumer_key=\"key\"",
            "oauth_nonce=",
            "oauth_signature=",
            "oauth_signature_method=\"HMAC-SHA1\"",
            "oauth_timestamp=",
            "oauth_token=\"token\"",
            "oauth_version=\"1.0\"",
        ] {
            assert!(header.contains(field), "missing {field} in {header}");
        }
        assert_eq!(publisher.api_base, "https://api.twitter.com/2");
    }

    #[test]
    fn test_only_unauthorized_is_fatal() {
        assert!(PublishError::Unauthorized("bad token".to_string()).is_fatal());
        assert!(!PublishError::RateLimited { reset_in_secs: None }.is_fatal());
        assert!(!PublishError::Rejected {
            status: 403,
            message: "duplicate content".to_string()
        }
        .is_fatal());
    }

    #[tokio::test]
    async fn test_dry_run_returns_sequential_ids() {
        let publisher = DryRunPublisher::new();
        assert_eq!(publisher.publish("one").await.unwrap(), "dry-run-1");
        assert_eq!(publisher.publish("two").await.unwrap(), "dry-run-2");
    }
}
