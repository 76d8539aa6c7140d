/// Prompt Builder
///
/// Persona and task instructions for the prompted strategy, plus the length
/// targets a task can ask for.

use rand::seq::SliceRandom;
use rand::Rng;

use super::knowledge::{Category, Knowledge, Product};
use super::LengthBand;

/// Requested post length, each with its own character band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthTarget {
    VeryShort,
    Short,
    Medium,
    Long,
    VeryLong,
}

impl LengthTarget {
    pub const ALL: [LengthTarget; 5] = [
        LengthTarget::VeryShort,
        LengthTarget::Short,
        LengthTarget::Medium,
        LengthTarget::Long,
        LengthTarget::VeryLong,
    ];

    pub fn band(self) -> LengthBand {
        match self {
            LengthTarget::VeryShort => LengthBand::new(50, 100),
            LengthTarget::Short => LengthBand::new(100, 150),
            LengthTarget::Medium => LengthBand::new(150, 200),
            LengthTarget::Long => LengthBand::new(200, 250),
            LengthTarget::VeryLong => LengthBand::new(250, 280),
        }
    }

    fn describe(self) -> (&'static str, &'static str) {
        match self {
            LengthTarget::VeryShort => (
                "ultra brief, punchy one-liner",
                "One sentence. Sharp and direct. Make every word count.",
            ),
            LengthTarget::Short => (
                "concise, quotable",
                "Brief but complete thought. Clear and impactful.",
            ),
            LengthTarget::Medium => (
                "balanced, informative",
                "Develop the idea with context. Two sentences work well.",
            ),
            LengthTarget::Long => (
                "detailed, explanatory",
                "Provide full context and reasoning.",
            ),
            LengthTarget::VeryLong => (
                "comprehensive, in-depth",
                "Maximum depth. Explain thoroughly with an example or a number.",
            ),
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        *Self::ALL.choose(rng).unwrap_or(&LengthTarget::Medium)
    }
}

/// Everything the task instruction is built from
#[derive(Debug, Clone)]
pub struct PostRequest<'a> {
    pub category: &'a Category,
    pub length: LengthTarget,
    pub product: Option<&'a Product>,
    pub example: Option<&'a str>,
}

pub struct PromptBuilder<'a> {
    knowledge: &'a Knowledge,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(knowledge: &'a Knowledge) -> Self {
        Self { knowledge }
    }

    /// Persona instruction: who is writing, how it sounds, what is forbidden
    pub fn system_prompt(&self) -> String {
        let brand = &self.knowledge.brand;
        let products = self
            .knowledge
            .products
            .iter()
            .map(|p| format!("{} ({})", p.name, p.description))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = format!(
            "You are the official voice of {name} on X.\n\n\
            BRAND IDENTITY:\n{description}\n\n",
            name = brand.name,
            description = brand.description,
        );
        if !products.is_empty() {
            prompt.push_str(&format!("Products: {}\n\n", products));
        }
        prompt.push_str(&format!(
            "Mission: {mission}\n\n\
            VOICE & TONE:\n{voice}\n\n\
            CRITICAL RULES - NEVER BREAK THESE:\n\
            1. NO emojis of any kind\n\
            2. NO bullet points, dashes or list formatting\n\
            3. NO hashtags\n\
            4. NO obvious AI patterns like \"Excited to announce\" or \"Thrilled to share\"\n\
            5. NO generic corporate speak or empty hype\n\
            6. Write naturally and sound human\n\
            7. Be specific and concrete\n\
            8. Focus on insight rather than announcement\n\n\
            Every post builds {name}'s reputation. Be thoughtful and genuinely useful.",
            mission = brand.mission,
            voice = brand.voice,
            name = brand.name,
        ));
        prompt
    }

    /// Task instruction for one post
    pub fn user_prompt(&self, request: &PostRequest<'_>) -> String {
        let category = request.category;
        let mut prompt = format!(
            "Generate a post for the '{}' category.\n\nCategory description: {}\n\n",
            category.name, category.description
        );

        if let Some(product) = request.product {
            prompt.push_str(&format!(
                "Focus on: {}\nProduct: {}\n",
                product.name, product.description
            ));
            if !product.key_features.is_empty() {
                let features = product
                    .key_features
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                prompt.push_str(&format!("Consider features like: {}\n", features));
            }
            prompt.push('\n');
        }

        if !category.guidance.is_empty() {
            prompt.push_str(&format!("Approach: {}\n\n", category.guidance));
        }

        if let Some(example) = request.example {
            prompt.push_str(&format!(
                "Example style (do not copy, just reference the approach):\n\"{}\"\n\n",
                example
            ));
        }

        let band = request.length.band();
        let (summary, note) = request.length.describe();
        prompt.push_str(&format!(
            "Length: {}-{} characters ({})\n{}\n\n",
            band.min, band.max, summary, note
        ));

        prompt.push_str(
            "Generate ONE post that follows all the rules in the system prompt. \
            Return ONLY the post text, nothing else. \
            No quotation marks around the post. \
            No emojis, no bullet points, no hashtags.",
        );
        prompt
    }
}
