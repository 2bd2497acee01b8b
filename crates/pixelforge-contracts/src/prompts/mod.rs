mod composer;
mod library;

pub use composer::{
    compose, compose_with_style_name, default_negative_prompt, ComposedPrompt, StyleName,
    NEGATIVE_DEFAULTS, QUALITY_BOOSTERS,
};
pub use library::PromptLibrary;
