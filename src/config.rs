/// Configuration module for the posting bot
///
/// Loads every tunable from environment variables (typically from a .env
/// file), applies defaults, and validates the combination before the bot
/// starts. Values that are present but unparseable are errors, never
/// silently replaced by a default.

use anyhow::{bail, Context, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engagement::EngagementSettings;
use crate::generation::{LengthBand, MAX_POST_CHARS};
use crate::history::DEFAULT_MAX_HISTORY;
use crate::quota::QuotaConfig;
use crate::scheduler::ScheduleConfig;

pub const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com/2";
pub const DEFAULT_LLM_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct";

/// Which content strategy produces candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Template,
    Prompted,
}

impl GenerationMode {
    /// Length band used when MIN_POST_LENGTH / MAX_POST_LENGTH are unset
    pub fn default_length_band(&self) -> LengthBand {
        match self {
            GenerationMode::Template => LengthBand::new(1, MAX_POST_CHARS),
            GenerationMode::Prompted => LengthBand::new(50, MAX_POST_CHARS),
        }
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(GenerationMode::Template),
            "prompted" | "llm" => Ok(GenerationMode::Prompted),
            other => Err(format!("unknown mode '{}' (expected template or prompted)", other)),
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Template => write!(f, "template"),
            GenerationMode::Prompted => write!(f, "prompted"),
        }
    }
}

/// OAuth 1.0a user-context credentials for the posting API
#[derive(Clone)]
pub struct XCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for XCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    /// Empty when unset; only required in prompted mode
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 150,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Backoffs used by the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// Sleep while today's target is met
    pub quota_backoff: Duration,
    /// Sleep after a failed publish
    pub publish_retry: Duration,
    /// Sleep after an unexpected iteration error
    pub recovery_backoff: Duration,
    /// Fatal credential failures tolerated in a row before the loop stops
    pub max_consecutive_auth_failures: u32,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            quota_backoff: Duration::from_secs(3600),
            publish_retry: Duration::from_secs(1800),
            recovery_backoff: Duration::from_secs(600),
            max_consecutive_auth_failures: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: GenerationMode,

    /// Log posts instead of publishing them
    pub dry_run: bool,

    /// `None` only makes sense together with `dry_run`
    pub twitter: Option<XCredentials>,
    pub twitter_api_base: String,

    pub llm: LlmConfig,

    /// JSON knowledge catalog; the built-in one is used when unset
    pub knowledge_path: Option<PathBuf>,
    pub product_focus_probability: f64,

    pub quota: QuotaConfig,
    pub schedule: ScheduleConfig,

    pub history_path: PathBuf,
    pub max_history: usize,
    pub quota_state_path: PathBuf,

    pub max_generation_attempts: u32,
    pub length_band: LengthBand,
    pub strict_length_band: bool,

    pub timings: LoopTimings,

    /// Replies and reposts; off while `engagement.share` is zero
    pub engagement: EngagementSettings,
    /// Ids of posts already engaged with
    pub processed_path: PathBuf,

    /// Port for the status HTTP server; no server when unset
    pub status_port: Option<u16>,
}

/// Wraps a key lookup so every parse error names its variable
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(key) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("{} has an invalid value '{}'", key, value)),
            None => Ok(None),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => bail!("{} has an invalid value '{}' (expected true or false)", key, value),
            },
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: u64) -> Result<Duration> {
        Ok(Duration::from_secs(self.parse(key, default)?))
    }

    /// Comma-separated list; blank items are dropped
    fn list(&self, key: &str, default: Vec<String>) -> Vec<String> {
        match self.raw(key) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect(),
            None => default,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is present but cannot be parsed
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let mode: GenerationMode = vars.parse("BOT_MODE", GenerationMode::Template)?;
        let dry_run = vars.flag("DRY_RUN", false)?;

        let twitter = match (
            vars.raw("TWITTER_API_KEY"),
            vars.raw("TWITTER_API_SECRET"),
            vars.raw("TWITTER_ACCESS_TOKEN"),
            vars.raw("TWITTER_ACCESS_TOKEN_SECRET"),
        ) {
            (Some(api_key), Some(api_secret), Some(access_token), Some(access_token_secret)) => {
                Some(XCredentials {
                    api_key,
                    api_secret,
                    access_token,
                    access_token_secret,
                })
            }
            _ => None,
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            endpoint: vars.string("LLM_ENDPOINT", &llm_defaults.endpoint),
            api_key: vars
                .raw("LLM_API_KEY")
                .or_else(|| vars.raw("HF_TOKEN"))
                .unwrap_or_default(),
            model: vars
                .raw("LLM_MODEL")
                .or_else(|| vars.raw("HF_MODEL"))
                .unwrap_or(llm_defaults.model),
            temperature: vars.parse("LLM_TEMPERATURE", llm_defaults.temperature)?,
            max_tokens: vars.parse("LLM_MAX_TOKENS", llm_defaults.max_tokens)?,
            timeout_secs: vars.parse("LLM_TIMEOUT_SECS", llm_defaults.timeout_secs)?,
            max_retries: vars.parse("LLM_MAX_RETRIES", llm_defaults.max_retries)?,
        };

        let quota_defaults = QuotaConfig::default();
        let quota = QuotaConfig {
            daily_min: vars.parse("DAILY_POSTS_MIN", quota_defaults.daily_min)?,
            daily_max: vars.parse("DAILY_POSTS_MAX", quota_defaults.daily_max)?,
            monthly_cap: vars.optional("MONTHLY_POST_CAP")?,
        };

        let schedule_defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            quiet_start_hour: vars.parse("QUIET_START_HOUR", schedule_defaults.quiet_start_hour)?,
            quiet_end_hour: vars.parse("QUIET_END_HOUR", schedule_defaults.quiet_end_hour)?,
            wake_start_hour: vars.parse("WAKE_START_HOUR", schedule_defaults.wake_start_hour)?,
            wake_end_hour: vars.parse("WAKE_END_HOUR", schedule_defaults.wake_end_hour)?,
            active_min_hours: vars.parse("ACTIVE_MIN_HOURS", schedule_defaults.active_min_hours)?,
            active_max_hours: vars.parse("ACTIVE_MAX_HOURS", schedule_defaults.active_max_hours)?,
        };

        let band_defaults = mode.default_length_band();
        let length_band = LengthBand::new(
            vars.parse("MIN_POST_LENGTH", band_defaults.min)?,
            vars.parse("MAX_POST_LENGTH", band_defaults.max)?,
        );

        let timing_defaults = LoopTimings::default();
        let timings = LoopTimings {
            quota_backoff: vars.secs("QUOTA_BACKOFF_SECS", timing_defaults.quota_backoff.as_secs())?,
            publish_retry: vars.secs("PUBLISH_RETRY_SECS", timing_defaults.publish_retry.as_secs())?,
            recovery_backoff: vars.secs(
                "RECOVERY_BACKOFF_SECS",
                timing_defaults.recovery_backoff.as_secs(),
            )?,
            max_consecutive_auth_failures: vars.parse(
                "MAX_CONSECUTIVE_AUTH_FAILURES",
                timing_defaults.max_consecutive_auth_failures,
            )?,
        };

        let engagement_defaults = EngagementSettings::default();
        let engagement = EngagementSettings {
            share: vars.parse("ENGAGEMENT_SHARE", engagement_defaults.share)?,
            keywords: vars.list("ENGAGE_KEYWORDS", engagement_defaults.keywords),
            replies: engagement_defaults.replies,
            selection_rate: vars.parse("ENGAGE_SELECTION_RATE", engagement_defaults.selection_rate)?,
            reply_probability: vars.parse(
                "ENGAGE_REPLY_PROBABILITY",
                engagement_defaults.reply_probability,
            )?,
            max_candidates: vars.parse("ENGAGE_MAX_CANDIDATES", engagement_defaults.max_candidates)?,
            search_results: vars.parse("ENGAGE_SEARCH_RESULTS", engagement_defaults.search_results)?,
        };

        // Default to PORT (Railway/Fly.io) when STATUS_PORT is not set
        let status_port = match vars.optional::<u16>("STATUS_PORT")? {
            Some(port) => Some(port),
            None => vars.optional::<u16>("PORT")?,
        };

        Ok(Config {
            mode,
            dry_run,
            twitter,
            twitter_api_base: vars.string("TWITTER_API_BASE", DEFAULT_TWITTER_API_BASE),
            llm,
            knowledge_path: vars.raw("KNOWLEDGE_PATH").map(PathBuf::from),
            product_focus_probability: vars.parse("PRODUCT_FOCUS_PROBABILITY", 0.3)?,
            quota,
            schedule,
            history_path: PathBuf::from(vars.string("HISTORY_PATH", "tweet_history.json")),
            max_history: vars.parse("MAX_HISTORY", DEFAULT_MAX_HISTORY)?,
            quota_state_path: PathBuf::from(vars.string("QUOTA_STATE_PATH", "quota_state.json")),
            max_generation_attempts: vars.parse("MAX_GENERATION_ATTEMPTS", 10)?,
            length_band,
            strict_length_band: vars.flag("STRICT_LENGTH_BAND", false)?,
            timings,
            engagement,
            processed_path: PathBuf::from(vars.string("PROCESSED_PATH", "processed_posts.json")),
            status_port,
        })
    }

    /// Reject combinations the bot cannot run with
    pub fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        let s = &self.schedule;
        for (name, hour) in [
            ("QUIET_START_HOUR", s.quiet_start_hour),
            ("QUIET_END_HOUR", s.quiet_end_hour),
            ("WAKE_START_HOUR", s.wake_start_hour),
            ("WAKE_END_HOUR", s.wake_end_hour),
        ] {
            if hour > 23 {
                bail!("{} must be between 0 and 23, got {}", name, hour);
            }
        }
        if s.wake_start_hour >= s.wake_end_hour {
            bail!(
                "Wake window {}:00-{}:00 is empty or inverted",
                s.wake_start_hour,
                s.wake_end_hour
            );
        }
        if let Some(hour) = (s.wake_start_hour..s.wake_end_hour).find(|h| s.is_quiet_hour(*h)) {
            bail!(
                "Wake window {}:00-{}:00 overlaps the quiet window {}:00-{}:00 at {}:00",
                s.wake_start_hour,
                s.wake_end_hour,
                s.quiet_start_hour,
                s.quiet_end_hour,
                hour
            );
        }
        if !(s.active_min_hours > 0.0) || s.active_max_hours < s.active_min_hours {
            bail!(
                "Active range {}h-{}h must be positive and ordered",
                s.active_min_hours,
                s.active_max_hours
            );
        }

        if self.quota.daily_max == 0 || self.quota.daily_min > self.quota.daily_max {
            bail!(
                "Daily post range {}-{} is invalid",
                self.quota.daily_min,
                self.quota.daily_max
            );
        }
        if self.quota.monthly_cap == Some(0) {
            bail!("MONTHLY_POST_CAP must be greater than zero");
        }

        if self.max_history == 0 {
            bail!("MAX_HISTORY must be greater than zero");
        }
        if self.max_generation_attempts == 0 {
            bail!("MAX_GENERATION_ATTEMPTS must be greater than zero");
        }
        if self.llm.max_retries == 0 {
            bail!("LLM_MAX_RETRIES must be greater than zero");
        }

        if self.length_band.min > self.length_band.max || self.length_band.max > MAX_POST_CHARS {
            bail!(
                "Post length band {} is invalid (max allowed is {})",
                self.length_band,
                MAX_POST_CHARS
            );
        }
        if !(0.0..=1.0).contains(&self.product_focus_probability) {
            bail!(
                "PRODUCT_FOCUS_PROBABILITY must be between 0 and 1, got {}",
                self.product_focus_probability
            );
        }

        let e = &self.engagement;
        for (name, value) in [
            ("ENGAGEMENT_SHARE", e.share),
            ("ENGAGE_SELECTION_RATE", e.selection_rate),
            ("ENGAGE_REPLY_PROBABILITY", e.reply_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }
        if e.share > 0.0 {
            if e.keywords.is_empty() {
                bail!("ENGAGE_KEYWORDS must name at least one keyword when engagement is on");
            }
            if e.replies.is_empty() {
                bail!("Engagement needs at least one reply text");
            }
            if e.max_candidates == 0 {
                bail!("ENGAGE_MAX_CANDIDATES must be greater than zero");
            }
            if !(10..=100).contains(&e.search_results) {
                bail!(
                    "ENGAGE_SEARCH_RESULTS must be between 10 and 100, got {}",
                    e.search_results
                );
            }
        }

        if !self.dry_run && self.twitter.is_none() {
            bail!(
                "TWITTER_API_KEY, TWITTER_API_SECRET, TWITTER_ACCESS_TOKEN and \
                 TWITTER_ACCESS_TOKEN_SECRET must be set (or enable DRY_RUN)"
            );
        }
        if self.mode == GenerationMode::Prompted && self.llm.api_key.is_empty() {
            bail!("LLM_API_KEY (or HF_TOKEN) must be set in prompted mode");
        }

        log::info!("Configuration validated successfully");
        Ok(())
    }
}
