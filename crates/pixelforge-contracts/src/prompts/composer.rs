use serde::{Deserialize, Serialize};

pub const QUALITY_BOOSTERS: &[&str] = &[
    "highly detailed",
    "professional",
    "8k",
    "sharp focus",
    "masterpiece",
    "best quality",
    "ultra detailed",
];

pub const NEGATIVE_DEFAULTS: &[&str] = &[
    "blurry",
    "low quality",
    "distorted",
    "ugly",
    "bad anatomy",
    "worst quality",
    "low resolution",
    "watermark",
];

const QUALITY_BOOST_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleName {
    Photorealistic,
    Anime,
    OilPainting,
    Cyberpunk,
    Fantasy,
    Watercolor,
    Render3d,
    Sketch,
}

impl StyleName {
    pub const ALL: [StyleName; 8] = [
        StyleName::Photorealistic,
        StyleName::Anime,
        StyleName::OilPainting,
        StyleName::Cyberpunk,
        StyleName::Fantasy,
        StyleName::Watercolor,
        StyleName::Render3d,
        StyleName::Sketch,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StyleName::Photorealistic => "Photorealistic",
            StyleName::Anime => "Anime",
            StyleName::OilPainting => "Oil Painting",
            StyleName::Cyberpunk => "Cyberpunk",
            StyleName::Fantasy => "Fantasy",
            StyleName::Watercolor => "Watercolor",
            StyleName::Render3d => "3D Render",
            StyleName::Sketch => "Sketch",
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            StyleName::Photorealistic => {
                "photorealistic, realistic lighting, detailed textures, high resolution"
            }
            StyleName::Anime => "anime style, vibrant colors, cel shaded, manga art",
            StyleName::OilPainting => "oil painting, brush strokes, artistic, classical art style",
            StyleName::Cyberpunk => "cyberpunk, neon lights, futuristic, sci-fi, dystopian",
            StyleName::Fantasy => "fantasy art, magical, ethereal, mystical atmosphere",
            StyleName::Watercolor => "watercolor painting, soft colors, artistic, flowing",
            StyleName::Render3d => "3d render, octane render, unreal engine, CGI",
            StyleName::Sketch => "pencil sketch, hand drawn, artistic sketch, line art",
        }
    }

    /// Matches display labels ("Oil Painting") and identifiers ("oil_painting",
    /// "oil-painting") case-insensitively. `None` means no style applies.
    pub fn lookup(raw: &str) -> Option<StyleName> {
        let wanted = normalize_style_key(raw);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|style| {
            normalize_style_key(style.label()) == wanted
                || normalize_style_key(&format!("{style:?}")) == wanted
        })
    }
}

fn normalize_style_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub text: String,
    pub applied_style: Option<StyleName>,
    pub quality_boosted: bool,
}

pub fn compose(base_prompt: &str, style: Option<StyleName>, add_quality_boost: bool) -> String {
    let mut composed = base_prompt.trim().to_string();
    if let Some(style) = style {
        composed.push_str(", ");
        composed.push_str(style.template());
    }
    if add_quality_boost {
        composed.push_str(", ");
        composed.push_str(&QUALITY_BOOSTERS[..QUALITY_BOOST_COUNT].join(", "));
    }
    composed
}

/// Composes from a free-form style name. An unrecognized name is not an
/// error; it shows up as `applied_style: None`.
pub fn compose_with_style_name(
    base_prompt: &str,
    style_name: Option<&str>,
    add_quality_boost: bool,
) -> ComposedPrompt {
    let applied_style = style_name.and_then(StyleName::lookup);
    ComposedPrompt {
        text: compose(base_prompt, applied_style, add_quality_boost),
        applied_style,
        quality_boosted: add_quality_boost,
    }
}

pub fn default_negative_prompt(extra: Option<&[String]>) -> String {
    let mut negatives: Vec<&str> = NEGATIVE_DEFAULTS.to_vec();
    if let Some(extra) = extra {
        negatives.extend(extra.iter().map(String::as_str));
    }
    negatives.join(", ")
}
