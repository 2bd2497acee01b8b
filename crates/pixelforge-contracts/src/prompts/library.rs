use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::Rng;

/// Ready-made prompts grouped by category, in display order.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    categories: IndexMap<&'static str, &'static [&'static str]>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        let mut categories: IndexMap<&'static str, &'static [&'static str]> = IndexMap::new();
        categories.insert(
            "Landscapes",
            &[
                "A serene mountain landscape at sunset with golden light",
                "Tropical beach with crystal clear water and palm trees",
                "Misty forest with rays of sunlight breaking through trees",
                "Northern lights over a snowy mountain range",
                "Desert landscape with sand dunes at golden hour",
            ],
        );
        categories.insert(
            "Characters",
            &[
                "Portrait of a wise old wizard with a long beard",
                "Futuristic cyberpunk character with neon accessories",
                "Elegant princess in a flowing gown in a castle",
                "Brave knight in shining armor holding a sword",
                "Mysterious hooded figure in a dark alley",
            ],
        );
        categories.insert(
            "Fantasy",
            &[
                "Majestic dragon flying over a medieval castle",
                "Enchanted forest with glowing mushrooms and fairies",
                "Ancient temple ruins covered in mystical vines",
                "Floating islands in the sky connected by bridges",
                "Crystal cave with magical glowing crystals",
            ],
        );
        categories.insert(
            "Sci-Fi",
            &[
                "Futuristic city with flying cars and neon signs",
                "Space station orbiting a distant planet",
                "Robot walking through a cyberpunk street",
                "Alien landscape with multiple moons in the sky",
                "High-tech laboratory with holographic displays",
            ],
        );
        categories.insert(
            "Animals",
            &[
                "Majestic lion with a flowing mane in golden light",
                "Colorful parrot perched on a tropical branch",
                "Wise owl sitting on a moonlit tree branch",
                "Playful dolphins jumping out of ocean waves",
                "Elegant white horse running through a field",
            ],
        );
        categories.insert(
            "Abstract",
            &[
                "Colorful geometric patterns with vibrant gradients",
                "Swirling cosmic energy with stars and nebulas",
                "Abstract representation of music with flowing colors",
                "Fractal patterns with infinite detail and symmetry",
                "Liquid metal flowing in artistic patterns",
            ],
        );
        Self { categories }
    }
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        self.categories.keys().copied().collect()
    }

    /// Category names compare case-insensitively.
    pub fn prompts(&self, category: &str) -> Option<&'static [&'static str]> {
        let wanted = category.trim();
        self.categories
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, prompts)| *prompts)
    }

    /// Picks from `category` when it is known, otherwise from every prompt.
    pub fn random_prompt<R: Rng + ?Sized>(&self, category: Option<&str>, rng: &mut R) -> &'static str {
        if let Some(prompts) = category.and_then(|name| self.prompts(name)) {
            if let Some(prompt) = prompts.choose(rng) {
                return *prompt;
            }
        }
        let all: Vec<&'static str> = self
            .categories
            .values()
            .flat_map(|prompts| prompts.iter().copied())
            .collect();
        all.choose(rng).copied().unwrap_or_default()
    }
}
