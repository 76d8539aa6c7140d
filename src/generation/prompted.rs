/// Prompted Strategy
///
/// Builds a persona instruction and a task instruction from the knowledge
/// catalog, asks the generative backend for a post, and cleans the result.
/// Transient backend failures are retried with backoff; a single `generate`
/// call never makes more than `max_retries` backend calls.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

use super::knowledge::Knowledge;
use super::prompts::{LengthTarget, PostRequest, PromptBuilder};
use super::{sanitize_generated, Candidate, ContentGenerator, GenerationError, LengthBand};
use crate::llm::{BackendError, TextBackend};

#[derive(Debug, Clone)]
pub struct PromptedSettings {
    /// Backend calls allowed per `generate` call
    pub max_retries: u32,
    /// Chance that a post focuses on one product
    pub product_focus_probability: f64,
    /// Overall band every post must satisfy
    pub length_band: LengthBand,
    /// Also require the band that was requested in the prompt
    pub strict_length_band: bool,
}

impl Default for PromptedSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            product_focus_probability: 0.3,
            length_band: LengthBand::new(50, 280),
            strict_length_band: false,
        }
    }
}

pub struct PromptedGenerator {
    backend: Arc<dyn TextBackend>,
    knowledge: Knowledge,
    settings: PromptedSettings,
    rng: Mutex<StdRng>,
}

struct PreparedPrompt {
    system: String,
    user: String,
    category: String,
    length: LengthTarget,
}

impl PromptedGenerator {
    pub fn new(backend: Arc<dyn TextBackend>, knowledge: Knowledge, settings: PromptedSettings) -> Self {
        Self::with_rng(backend, knowledge, settings, StdRng::from_entropy())
    }

    pub fn with_rng(
        backend: Arc<dyn TextBackend>,
        knowledge: Knowledge,
        settings: PromptedSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            backend,
            knowledge,
            settings,
            rng: Mutex::new(rng),
        }
    }

    fn prepare(&self) -> Result<PreparedPrompt, GenerationError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let rng = &mut *rng;

        let category = self
            .knowledge
            .pick_category(rng)
            .ok_or(GenerationError::EmptyCatalog)?;
        let length = LengthTarget::random(rng);
        let product = if rng.gen_bool(self.settings.product_focus_probability.clamp(0.0, 1.0)) {
            self.knowledge.pick_product(rng)
        } else {
            None
        };
        let example = self.knowledge.category_example(category, rng);

        let builder = PromptBuilder::new(&self.knowledge);
        let request = PostRequest {
            category,
            length,
            product,
            example,
        };

        log::debug!(
            "Prompted generation: category={}, length={:?}, product={}",
            category.name,
            length,
            product.map(|p| p.name.as_str()).unwrap_or("none")
        );

        Ok(PreparedPrompt {
            system: builder.system_prompt(),
            user: builder.user_prompt(&request),
            category: category.name.clone(),
            length,
        })
    }

    /// Accept the candidate only when it fits the overall band and, in strict
    /// mode, the band that was asked for.
    pub fn check_length(&self, candidate: &Candidate, requested: LengthTarget) -> Result<(), GenerationError> {
        let band = self.settings.length_band;
        if !band.contains(candidate.length) {
            return Err(GenerationError::InvalidLength {
                length: candidate.length,
                band,
            });
        }
        if self.settings.strict_length_band && !requested.band().contains(candidate.length) {
            return Err(GenerationError::InvalidLength {
                length: candidate.length,
                band: requested.band(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContentGenerator for PromptedGenerator {
    async fn generate(&self) -> Result<Candidate, GenerationError> {
        let prompt = self.prepare()?;
        let max_calls = self.settings.max_retries.max(1);
        let mut calls = 0;

        loop {
            calls += 1;
            match self.backend.complete(&prompt.system, &prompt.user).await {
                Ok(raw) => {
                    let text = sanitize_generated(&raw);
                    if text.is_empty() {
                        return Err(GenerationError::Empty);
                    }
                    let candidate = Candidate::new(text);
                    self.check_length(&candidate, prompt.length)?;

                    log::info!(
                        "Generated {} post ({} chars) on call {}/{}",
                        prompt.category,
                        candidate.length,
                        calls,
                        max_calls
                    );
                    return Ok(candidate);
                }
                Err(BackendError::Unauthorized) => {
                    log::error!("Generative backend rejected the API key; not retrying");
                    return Err(GenerationError::Unauthorized);
                }
                Err(e) => {
                    if calls >= max_calls {
                        log::error!("Generative backend failed after {} calls: {}", calls, e);
                        return Err(GenerationError::Backend {
                            attempts: calls,
                            source: e,
                        });
                    }
                    let Some(delay) = e.retry_delay(calls - 1) else {
                        return Err(GenerationError::Backend {
                            attempts: calls,
                            source: e,
                        });
                    };
                    log::warn!(
                        "Generative backend call {}/{} failed ({}); retrying in {}s",
                        calls,
                        max_calls,
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn fallback_texts(&self) -> &[String] {
        &self.knowledge.fallbacks
    }

    fn name(&self) -> &'static str {
        "prompted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted replies and records every call
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(BackendError::Timeout))
        }
    }

    const GOOD_POST: &str = "Settlement that takes seconds instead of days changes how small \
        businesses manage cash. That is the real promise of programmable money.";

    fn generator(backend: Arc<ScriptedBackend>, settings: PromptedSettings) -> PromptedGenerator {
        PromptedGenerator::with_rng(
            backend,
            Knowledge::builtin(),
            settings,
            StdRng::seed_from_u64(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_retry_ceiling() {
        let backend = ScriptedBackend::new(vec![]);
        let generator = generator(
            backend.clone(),
            PromptedSettings {
                max_retries: 3,
                ..Default::default()
            },
        );

        let err = generator.generate().await.unwrap_err();
        assert_eq!(backend.calls(), 3);
        assert!(matches!(err, GenerationError::Backend { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Unauthorized)]);
        let generator = generator(backend.clone(), PromptedSettings::default());

        let err = generator.generate().await.unwrap_err();
        assert_eq!(backend.calls(), 1);
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_before_retrying() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::RateLimited {
                retry_after: Some(30),
            }),
            Ok(GOOD_POST.to_string()),
        ]);
        let generator = generator(backend.clone(), PromptedSettings::default());

        let started = tokio::time::Instant::now();
        let candidate = generator.generate().await.unwrap();

        assert_eq!(backend.calls(), 2);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(candidate.text, GOOD_POST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_is_cleaned_before_validation() {
        let raw = format!("\"{} 🚀\"", GOOD_POST);
        let backend = ScriptedBackend::new(vec![Ok(raw)]);
        let generator = generator(backend, PromptedSettings::default());

        let candidate = generator.generate().await.unwrap();
        assert_eq!(candidate.text, GOOD_POST);
        assert_eq!(candidate.length, GOOD_POST.chars().count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_output_is_rejected() {
        let backend = ScriptedBackend::new(vec![Ok("Too short.".to_string())]);
        let generator = generator(backend.clone(), PromptedSettings::default());

        let err = generator.generate().await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidLength { length: 10, .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_fails_without_calling_backend() {
        let backend = ScriptedBackend::new(vec![Ok(GOOD_POST.to_string())]);
        let mut knowledge = Knowledge::builtin();
        knowledge.categories.clear();
        let generator = PromptedGenerator::with_rng(
            backend.clone(),
            knowledge,
            PromptedSettings::default(),
            StdRng::seed_from_u64(5),
        );

        let err = generator.generate().await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptyCatalog));
        assert!(!err.is_fatal());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompts_carry_persona_and_task() {
        let backend = ScriptedBackend::new(vec![Ok(GOOD_POST.to_string())]);
        let generator = generator(backend.clone(), PromptedSettings::default());
        generator.generate().await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let (system, user) = &prompts[0];
        assert!(system.contains("NO emojis"));
        assert!(user.contains("Generate a post for the '"));
        assert!(user.contains("Length: "));
    }

    #[test]
    fn test_strict_mode_requires_requested_band() {
        let backend = ScriptedBackend::new(vec![]);
        let candidate = Candidate::new("a".repeat(120));

        let lenient = generator(backend.clone(), PromptedSettings::default());
        assert!(lenient.check_length(&candidate, LengthTarget::Long).is_ok());

        let strict = generator(
            backend,
            PromptedSettings {
                strict_length_band: true,
                ..Default::default()
            },
        );
        assert!(strict.check_length(&candidate, LengthTarget::Short).is_ok());
        assert!(matches!(
            strict.check_length(&candidate, LengthTarget::Long),
            Err(GenerationError::InvalidLength { band, .. }) if band == LengthTarget::Long.band()
        ));
    }
}
