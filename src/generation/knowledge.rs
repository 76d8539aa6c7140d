/// Knowledge Catalog Module
///
/// Brand identity, weighted content categories, products and fallback texts
/// used by the prompted strategy. A built-in catalog ships with the crate; a
/// JSON file with the same shape can replace it.

use anyhow::{Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub name: String,
    pub description: String,
    pub mission: String,
    /// Tone guidance placed in the persona instruction
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub guidance: String,
    /// Relative selection weight
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub examples: Vec<String>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub key_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub brand: Brand,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub products: Vec<Product>,
    pub fallbacks: Vec<String>,
}

impl Knowledge {
    /// Load a catalog from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        let knowledge: Knowledge = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in knowledge file {}", path.display()))?;
        knowledge.validate()?;

        log::info!(
            "Loaded knowledge catalog: {} categories, {} products",
            knowledge.categories.len(),
            knowledge.products.len()
        );
        Ok(knowledge)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            anyhow::bail!("Knowledge catalog needs at least one category");
        }
        if self
            .categories
            .iter()
            .any(|c| !c.weight.is_finite() || c.weight < 0.0)
        {
            anyhow::bail!("Category weights must be finite and non-negative");
        }
        if self.categories.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
            anyhow::bail!("Category weights must not all be zero");
        }
        if self.fallbacks.iter().all(|f| f.trim().is_empty()) {
            anyhow::bail!("Knowledge catalog needs at least one fallback text");
        }
        Ok(())
    }

    /// Weighted category choice: P(i) = weight_i / sum(weights).
    /// `None` only for a catalog without categories.
    pub fn pick_category<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Category> {
        match WeightedIndex::new(self.categories.iter().map(|c| c.weight)) {
            Ok(dist) => self.categories.get(dist.sample(rng)),
            // Zero weights fall back to a uniform choice
            Err(_) => self.categories.choose(rng),
        }
    }

    pub fn pick_product<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Product> {
        self.products.choose(rng)
    }

    pub fn category_example<'a, R: Rng + ?Sized>(
        &self,
        category: &'a Category,
        rng: &mut R,
    ) -> Option<&'a str> {
        category.examples.choose(rng).map(String::as_str)
    }

    /// Catalog shipped with the bot
    pub fn builtin() -> Self {
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Knowledge {
            brand: Brand {
                name: "Novastaq".to_string(),
                description: "A blockchain technology company building decentralized payment \
                    infrastructure for Africa, with Web2 and Web3 products spanning payments, \
                    smart contracts and settlement."
                    .to_string(),
                mission: "Build reliable digital infrastructure for payments and Web3 systems \
                    across Africa."
                    .to_string(),
                voice: "Professional, authoritative and innovative. Knowledgeable about \
                    blockchain, payments and African tech. Confident but never arrogant, clear \
                    and accessible while keeping technical credibility."
                    .to_string(),
            },
            categories: vec![
                Category {
                    name: "technical_insight".to_string(),
                    description: "One concrete observation about how blockchain or payment \
                        systems actually work."
                        .to_string(),
                    guidance: "Make a single clear technical point a developer would respect."
                        .to_string(),
                    weight: 3.0,
                    examples: strings(&[
                        "Finality matters more than throughput for payments. A merchant does not \
                         care about peak TPS, only about when the money is actually theirs.",
                        "Most payment failures are not blockchain failures. They happen at the \
                         edges, in the on-ramps and the reconciliation.",
                    ]),
                },
                Category {
                    name: "industry_analysis".to_string(),
                    description: "A grounded take on payments, remittances or digital assets \
                        in African markets."
                        .to_string(),
                    guidance: "Lead with a number or a specific market fact, then interpret it."
                        .to_string(),
                    weight: 2.5,
                    examples: strings(&[
                        "Cross-border payment fees in Africa average 8 to 10 percent. Blockchain \
                         can bring that under 1 percent. That is economic empowerment at scale.",
                    ]),
                },
                Category {
                    name: "product_spotlight".to_string(),
                    description: "Explain the problem one of our products solves.".to_string(),
                    guidance: "Describe the problem first, the product second. No sales pitch."
                        .to_string(),
                    weight: 2.0,
                    examples: strings(&[
                        "Paying a supplier in another currency should not take three days and \
                         two intermediaries. Settlement rails exist to remove both.",
                    ]),
                },
                Category {
                    name: "business_lesson".to_string(),
                    description: "An actionable lesson from building financial infrastructure."
                        .to_string(),
                    guidance: "Give one lesson a founder could apply this week.".to_string(),
                    weight: 1.5,
                    examples: strings(&[
                        "Compliance is a product feature. Teams that treat it as paperwork ship \
                         slower, not faster.",
                    ]),
                },
                Category {
                    name: "thought_leadership".to_string(),
                    description: "A bold but defensible claim about where Web3 and payments \
                        are heading."
                        .to_string(),
                    guidance: "Take a clear position and support it in one line.".to_string(),
                    weight: 1.0,
                    examples: strings(&[
                        "The next billion crypto users will never see a seed phrase. They will \
                         see a payment that simply worked.",
                    ]),
                },
            ],
            products: vec![
                Product {
                    name: "Velcro".to_string(),
                    description: "Multi-currency fintech platform".to_string(),
                    key_features: strings(&[
                        "multi-currency wallets",
                        "instant FX conversion",
                        "virtual cards",
                    ]),
                },
                Product {
                    name: "BitNova".to_string(),
                    description: "Crypto peer-to-peer payments".to_string(),
                    key_features: strings(&["P2P transfers", "escrow", "local payment rails"]),
                },
                Product {
                    name: "Stakepadi".to_string(),
                    description: "Prediction markets".to_string(),
                    key_features: strings(&["on-chain markets", "transparent resolution"]),
                },
                Product {
                    name: "Tsara".to_string(),
                    description: "Settlement infrastructure".to_string(),
                    key_features: strings(&[
                        "real-time settlement",
                        "reconciliation APIs",
                        "multi-chain support",
                    ]),
                },
                Product {
                    name: "Criptpay".to_string(),
                    description: "Crypto payment gateway for merchants".to_string(),
                    key_features: strings(&[
                        "merchant checkout",
                        "stablecoin payouts",
                        "plugin integrations",
                    ]),
                },
            ],
            fallbacks: strings(&[
                "Payments infrastructure is only as good as its worst day. Reliability is the \
                 feature users never thank you for and always notice when it is missing.",
                "Stablecoins are already moving real money across African borders. The question \
                 is no longer whether, it is who builds the rails people trust.",
                "Lower fees are not the whole story. Speed, transparency and predictable \
                 settlement are what make digital payments worth switching to.",
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let knowledge = Knowledge::builtin();
        knowledge.validate().unwrap();
        assert!(knowledge.fallbacks.iter().all(|f| {
            let len = f.chars().count();
            (50..=280).contains(&len)
        }));
    }

    #[test]
    fn test_weighted_pick_skips_zero_weight_categories() {
        let mut knowledge = Knowledge::builtin();
        for category in knowledge.categories.iter_mut() {
            category.weight = 0.0;
        }
        knowledge.categories[2].weight = 1.0;

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(knowledge.pick_category(&mut rng).unwrap().name, "product_spotlight");
        }
    }

    #[test]
    fn test_weighted_pick_follows_weights() {
        let mut knowledge = Knowledge::builtin();
        knowledge.categories.truncate(2);
        knowledge.categories[0].weight = 9.0;
        knowledge.categories[1].weight = 1.0;

        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10_000 {
            *counts
                .entry(knowledge.pick_category(&mut rng).unwrap().name.clone())
                .or_default() += 1;
        }

        let heavy = counts["technical_insight"];
        assert!((8_500..=9_500).contains(&heavy), "heavy picked {heavy} times");
    }

    #[test]
    fn test_empty_catalog_picks_no_category() {
        let mut knowledge = Knowledge::builtin();
        knowledge.categories.clear();

        let mut rng = StdRng::seed_from_u64(3);
        assert!(knowledge.pick_category(&mut rng).is_none());
        assert!(knowledge.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_all_zero_weights() {
        let mut knowledge = Knowledge::builtin();
        for category in knowledge.categories.iter_mut() {
            category.weight = 0.0;
        }
        assert!(knowledge.validate().is_err());
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        let json = serde_json::json!({
            "brand": {
                "name": "Acme",
                "description": "Makes anvils",
                "mission": "Anvils for all",
                "voice": "Dry"
            },
            "categories": [
                {"name": "anvil_facts", "description": "Facts about anvils"}
            ],
            "fallbacks": ["Anvils have been the backbone of metalwork for three thousand years."]
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let knowledge = Knowledge::load(&path).unwrap();
        assert_eq!(knowledge.brand.name, "Acme");
        assert_eq!(knowledge.categories[0].weight, 1.0);
        assert!(knowledge.products.is_empty());
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Knowledge::load(&dir.path().join("absent.json")).is_err());
    }
}
