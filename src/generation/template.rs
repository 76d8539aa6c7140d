/// Template Strategy
///
/// Picks a template shape, fills each `{slot}` from its phrase catalog,
/// appends an engagement suffix and normalizes whitespace.

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{normalize_whitespace, Candidate, ContentGenerator, GenerationError, MAX_POST_CHARS};

#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    pub templates: Vec<String>,
    pub slots: HashMap<String, Vec<String>>,
    pub suffixes: Vec<String>,
    pub fallbacks: Vec<String>,
}

/// Slot names referenced by a template, in order of appearance
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                names.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

impl TemplateCatalog {
    /// Every placeholder must resolve to a non-empty phrase list, and there
    /// must be something to pick from at each step.
    pub fn validate(&self) -> Result<()> {
        if self.templates.is_empty() {
            anyhow::bail!("Template catalog has no templates");
        }
        if self.suffixes.is_empty() {
            anyhow::bail!("Template catalog has no engagement suffixes");
        }
        if self.fallbacks.is_empty() {
            anyhow::bail!("Template catalog has no fallback texts");
        }
        for template in &self.templates {
            for name in placeholders(template) {
                match self.slots.get(name) {
                    Some(phrases) if !phrases.is_empty() => {}
                    _ => anyhow::bail!("Template slot '{{{}}}' has no phrases: {}", name, template),
                }
            }
        }
        for fallback in &self.fallbacks {
            if fallback.chars().count() > MAX_POST_CHARS {
                anyhow::bail!("Fallback text exceeds {} characters: {}", MAX_POST_CHARS, fallback);
            }
        }
        Ok(())
    }

    /// Fill one random template. A slot used twice gets the same phrase both times.
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let template = match self.templates.choose(rng) {
            Some(t) => t.as_str(),
            None => return String::new(),
        };

        let mut chosen: HashMap<&str, &str> = HashMap::new();
        let mut filled = String::with_capacity(template.len() * 2);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            filled.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                filled.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let name = &after[..close];
            let phrase = match chosen.get(name) {
                Some(p) => *p,
                None => {
                    let phrases: &[String] = match self.slots.get(name) {
                        Some(phrases) => phrases,
                        None => &[],
                    };
                    let p = phrases.choose(rng).map(String::as_str).unwrap_or("");
                    chosen.insert(name, p);
                    p
                }
            };
            filled.push_str(phrase);
            rest = &after[close + 1..];
        }
        filled.push_str(rest);

        if let Some(suffix) = self.suffixes.choose(rng) {
            filled.push_str("\n\n");
            filled.push_str(suffix);
        }

        normalize_whitespace(&filled)
    }

    /// Solana hype catalog shipped with the bot
    pub fn builtin() -> Self {
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        let slots: HashMap<String, Vec<String>> = [
            (
                "topic",
                &[
                    "Solana", "SOL", "$SOL", "@solana", "Solana DeFi", "Solana NFTs",
                    "Phantom Wallet", "Jupiter", "Marinade", "Drift Protocol", "Kamino",
                    "Marginfi", "Jito", "Pyth Network", "Wormhole", "Raydium", "Orca",
                    "Solana Mobile", "Solana Pay", "Firedancer", "Helius", "Solana staking",
                    "liquid staking", "Solana blinks", "compressed NFTs",
                ][..],
            ),
            (
                "metric",
                &[
                    "400ms block times", "processing 65k TPS", "sub-cent fees",
                    "growing 300% MoM", "at all-time high TVL", "onboarding millions",
                    "hitting new milestones daily", "breaking every record",
                ][..],
            ),
            (
                "achievement",
                &[
                    "processed more transactions than every other L1 combined",
                    "onboarded 10M+ new users this month",
                    "achieved 99.99% uptime",
                    "made NFTs actually usable with compression",
                    "shipped Firedancer testnet",
                    "proved scalability is possible",
                ][..],
            ),
            (
                "prediction",
                &[
                    "flip Ethereum in users", "become the iOS of crypto",
                    "dominate consumer crypto", "be the default chain for developers",
                    "power the next billion users", "win the mobile race",
                ][..],
            ),
            (
                "timeframe",
                &["the end of the year", "next quarter", "the next cycle", "six months from now"][..],
            ),
            (
                "reason",
                &[
                    "The speed is unmatched.", "Real users, real adoption.",
                    "The tech just works.", "Network effects are compounding.",
                    "Builders keep choosing Solana.", "Fees make sense for consumers.",
                    "The ecosystem is thriving.",
                ][..],
            ),
            (
                "comparison",
                &[
                    "other chains are still debating scaling",
                    "competitors can't keep up",
                    "legacy systems look ancient",
                    "everyone else is talking and Solana is building",
                ][..],
            ),
            (
                "stat",
                &[
                    "400ms blocks. Zero compromises.",
                    "65,000 TPS. Actually working.",
                    "$0.00025 per transaction. Not a typo.",
                    "3M+ daily active addresses. Real usage.",
                ][..],
            ),
            (
                "fud",
                &[
                    "Solana was dead", "the network would never be stable",
                    "high TPS was impossible", "developers were leaving",
                    "mobile phones were a gimmick",
                ][..],
            ),
            (
                "opportunity",
                &[
                    "the fastest growing ecosystem in crypto",
                    "the best developer experience",
                    "actual consumer adoption",
                    "the mobile revolution",
                ][..],
            ),
            (
                "action",
                &["shipping features", "solving real problems", "onboarding normies", "building in silence"][..],
            ),
            (
                "distraction",
                &["arguing about rollups", "debating trilemmas", "hyping vaporware", "fighting on X"][..],
            ),
            (
                "sentiment",
                &[
                    "This is bullish.", "Not even close.", "Absolutely massive.",
                    "The future is here.", "This is the way.", "Unmatched.", "Next level.",
                ][..],
            ),
        ]
        .into_iter()
        .map(|(name, phrases)| (name.to_string(), strings(phrases)))
        .collect();

        TemplateCatalog {
            templates: strings(&[
                "{topic} is doing {metric} and nobody's talking about it.\n\n{reason}",
                "{topic} just {achievement}.\n\n{sentiment}",
                "{topic} will {prediction} by {timeframe}.\n\n{reason}",
                "Everyone's sleeping on {topic} while {comparison}.",
                "{topic}: {metric}.\n\n{sentiment}\n\nWe're still early.",
                "{topic}: {stat}\n\n{comparison}.",
                "Remember when they said {fud}?\n\n{topic} just {achievement}.",
                "If you're not building on {topic}, you're missing {opportunity}.",
                "{topic} developers are {action} while everyone else is {distraction}.",
                "The {topic} community is different.\n\n{reason}",
            ]),
            slots,
            suffixes: strings(&[
                "Thoughts?", "Agree?", "Am I wrong?", "Who else sees this?", "LFG", "WAGMI",
                "Change my mind", "Drop your take",
            ]),
            fallbacks: strings(&[
                "Solana keeps shipping while everyone else keeps talking. We're still early.",
                "400ms blocks and sub-cent fees. Solana just works. Thoughts?",
                "Builders keep choosing Solana for a reason. Drop your take.",
            ]),
        }
    }
}

pub struct TemplateGenerator {
    catalog: TemplateCatalog,
    rng: Mutex<StdRng>,
}

impl TemplateGenerator {
    pub fn new(catalog: TemplateCatalog) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Reproducible output for a given seed
    pub fn with_seed(catalog: TemplateCatalog, seed: u64) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self) -> Result<Candidate, GenerationError> {
        let text = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.catalog.render(&mut *rng)
        };

        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        let candidate = Candidate::new(text);
        if candidate.length > MAX_POST_CHARS {
            return Err(GenerationError::InvalidLength {
                length: candidate.length,
                band: super::LengthBand::new(1, MAX_POST_CHARS),
            });
        }
        Ok(candidate)
    }

    fn fallback_texts(&self) -> &[String] {
        &self.catalog.fallbacks
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_catalog() -> TemplateCatalog {
        TemplateCatalog {
            templates: vec!["{a} and {a} meet {b}".to_string()],
            slots: HashMap::from([
                ("a".to_string(), vec!["x".to_string(), "y".to_string()]),
                ("b".to_string(), vec!["z".to_string()]),
            ]),
            suffixes: vec!["Thoughts?".to_string()],
            fallbacks: vec!["fallback".to_string()],
        }
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        TemplateCatalog::builtin().validate().unwrap();
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(placeholders("{topic} did {metric}. {topic}!"), vec!["topic", "metric", "topic"]);
        assert!(placeholders("no slots here").is_empty());
    }

    #[test]
    fn test_render_reuses_phrase_for_repeated_slot() {
        let catalog = tiny_catalog();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let text = catalog.render(&mut rng);
            assert!(
                text == "x and x meet z Thoughts?" || text == "y and y meet z Thoughts?",
                "unexpected render: {text}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_unknown_slot() {
        let mut catalog = tiny_catalog();
        catalog.templates.push("{missing} slot".to_string());
        assert!(catalog.validate().is_err());
    }

    #[tokio::test]
    async fn test_builtin_output_is_normalized_and_capped() {
        let generator = TemplateGenerator::with_seed(TemplateCatalog::builtin(), 11).unwrap();
        for _ in 0..200 {
            let candidate = generator.generate().await.unwrap();
            assert!(candidate.length <= MAX_POST_CHARS);
            assert!(!candidate.text.contains('\n'));
            assert!(!candidate.text.contains("  "));
            assert!(!candidate.text.contains('{'));
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        let first = TemplateGenerator::with_seed(TemplateCatalog::builtin(), 99).unwrap();
        let second = TemplateGenerator::with_seed(TemplateCatalog::builtin(), 99).unwrap();
        for _ in 0..10 {
            assert_eq!(
                first.generate().await.unwrap(),
                second.generate().await.unwrap()
            );
        }
    }
}
