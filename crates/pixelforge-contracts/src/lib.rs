pub mod config;
pub mod events;
pub mod history;
pub mod prompts;
