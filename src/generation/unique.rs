/// Uniqueness Filter
///
/// Retries generation until a candidate is non-empty, fits the length band and
/// has never been posted. When the attempt budget runs out it falls back to a
/// fixed text so the bot always has something to publish.

use super::{ContentGenerator, GenerationError, LengthBand};
use crate::history::HistoryStore;

/// Used only if a generator ships no fallback texts of its own
pub const LAST_RESORT_FALLBACK: &str = "Still building. Still shipping. More soon.";

/// Result of one `generate_unique` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniquePost {
    pub text: String,
    /// Attempts spent before returning
    pub attempts: u32,
    /// The text came from the fallback set and skipped the uniqueness check
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct UniquenessFilter {
    max_attempts: u32,
    length_band: LengthBand,
}

impl UniquenessFilter {
    pub fn new(max_attempts: u32, length_band: LengthBand) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            length_band,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Only credential failures escape; every other failed attempt just
    /// consumes budget.
    pub async fn generate_unique(
        &self,
        generator: &dyn ContentGenerator,
        history: &HistoryStore,
    ) -> Result<UniquePost, GenerationError> {
        for attempt in 1..=self.max_attempts {
            match generator.generate().await {
                Ok(candidate) if candidate.text.trim().is_empty() => {
                    log::debug!("Attempt {}/{}: empty candidate", attempt, self.max_attempts);
                }
                Ok(candidate) if !self.length_band.contains(candidate.length) => {
                    log::debug!(
                        "Attempt {}/{}: {} chars is outside {}",
                        attempt,
                        self.max_attempts,
                        candidate.length,
                        self.length_band
                    );
                }
                Ok(candidate) if history.contains(&candidate.text) => {
                    log::debug!("Attempt {}/{}: already posted", attempt, self.max_attempts);
                }
                Ok(candidate) => {
                    log::info!(
                        "Unique {} post found on attempt {}/{} ({} chars)",
                        generator.name(),
                        attempt,
                        self.max_attempts,
                        candidate.length
                    );
                    return Ok(UniquePost {
                        text: candidate.text,
                        attempts: attempt,
                        fallback: false,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Generation attempt {}/{} failed: {}",
                        attempt,
                        self.max_attempts,
                        e
                    );
                }
            }
        }

        let text = pick_fallback(generator.fallback_texts(), history);
        log::warn!(
            "No unique post after {} attempts; using fallback text",
            self.max_attempts
        );
        Ok(UniquePost {
            text,
            attempts: self.max_attempts,
            fallback: true,
        })
    }
}

/// First fallback not yet posted, otherwise the first one
fn pick_fallback(fallbacks: &[String], history: &HistoryStore) -> String {
    fallbacks
        .iter()
        .filter(|f| !f.trim().is_empty())
        .find(|f| !history.contains(f))
        .or_else(|| fallbacks.iter().find(|f| !f.trim().is_empty()))
        .cloned()
        .unwrap_or_else(|| LAST_RESORT_FALLBACK.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::template::{TemplateCatalog, TemplateGenerator};
    use crate::generation::Candidate;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Cycles through a fixed list of outputs
    struct CyclingGenerator {
        outputs: Vec<Result<String, ()>>,
        fatal_at: Option<usize>,
        next: AtomicUsize,
        fallbacks: Vec<String>,
        seen: Mutex<Vec<String>>,
    }

    impl CyclingGenerator {
        fn new(outputs: &[&str]) -> Self {
            Self {
                outputs: outputs.iter().map(|s| Ok(s.to_string())).collect(),
                fatal_at: None,
                next: AtomicUsize::new(0),
                fallbacks: vec!["fallback one".to_string(), "fallback two".to_string()],
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.next.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentGenerator for CyclingGenerator {
        async fn generate(&self) -> Result<Candidate, GenerationError> {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            if self.fatal_at == Some(i) {
                return Err(GenerationError::Unauthorized);
            }
            match &self.outputs[i % self.outputs.len()] {
                Ok(text) => {
                    self.seen.lock().unwrap().push(text.clone());
                    Ok(Candidate::new(text.clone()))
                }
                Err(()) => Err(GenerationError::Empty),
            }
        }

        fn fallback_texts(&self) -> &[String] {
            &self.fallbacks
        }

        fn name(&self) -> &'static str {
            "cycling"
        }
    }

    fn band() -> LengthBand {
        LengthBand::new(1, 280)
    }

    async fn history_with(texts: &[&str]) -> HistoryStore {
        let mut history = HistoryStore::in_memory(100);
        for text in texts {
            history.record(text).await.unwrap();
        }
        history
    }

    #[tokio::test]
    async fn test_returns_the_one_unseen_output() {
        let outputs: Vec<String> = (0..10).map(|i| format!("post number {i}")).collect();
        let refs: Vec<&str> = outputs.iter().map(String::as_str).collect();
        let generator = CyclingGenerator::new(&refs);
        let history = history_with(&refs[..9]).await;

        let post = UniquenessFilter::new(10, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();

        assert_eq!(post.text, "post number 9");
        assert_eq!(post.attempts, 10);
        assert!(!post.fallback);
    }

    #[tokio::test]
    async fn test_falls_back_when_budget_exhausted() {
        let generator = CyclingGenerator::new(&["seen"]);
        let history = history_with(&["seen"]).await;

        let post = UniquenessFilter::new(5, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();

        assert_eq!(generator.calls(), 5);
        assert!(post.fallback);
        assert_eq!(post.text, "fallback one");
    }

    #[tokio::test]
    async fn test_fallback_prefers_unposted_text() {
        let generator = CyclingGenerator::new(&["seen"]);
        let history = history_with(&["seen", "fallback one"]).await;

        let post = UniquenessFilter::new(2, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();
        assert_eq!(post.text, "fallback two");

        // All fallbacks posted: still deterministic, uniqueness is bypassed
        let history = history_with(&["seen", "fallback one", "fallback two"]).await;
        let post = UniquenessFilter::new(2, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();
        assert_eq!(post.text, "fallback one");
        assert!(post.fallback);
    }

    #[tokio::test]
    async fn test_skips_out_of_band_and_failed_attempts() {
        let long = "x".repeat(300);
        let mut generator = CyclingGenerator::new(&[long.as_str(), "", "fits"]);
        generator.outputs.insert(0, Err(()));

        let history = HistoryStore::in_memory(10);
        let post = UniquenessFilter::new(10, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();

        assert_eq!(post.text, "fits");
        assert_eq!(post.attempts, 4);
    }

    #[tokio::test]
    async fn test_fatal_error_escapes_immediately() {
        let mut generator = CyclingGenerator::new(&["seen"]);
        generator.fatal_at = Some(1);
        let history = history_with(&["seen"]).await;

        let err = UniquenessFilter::new(10, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_template_generator_finds_remaining_output() {
        let catalog = TemplateCatalog {
            templates: vec!["{pick}".to_string()],
            slots: HashMap::from([(
                "pick".to_string(),
                vec!["alpha".to_string(), "beta".to_string()],
            )]),
            suffixes: vec!["LFG".to_string()],
            fallbacks: vec!["fallback".to_string()],
        };
        let generator = TemplateGenerator::with_seed(catalog, 1).unwrap();
        let history = history_with(&["alpha LFG"]).await;

        let post = UniquenessFilter::new(64, band())
            .generate_unique(&generator, &history)
            .await
            .unwrap();

        assert_eq!(post.text, "beta LFG");
        assert!(!post.fallback);
    }
}
