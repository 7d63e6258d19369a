//! Text transformation via an OpenAI-compatible chat completions API.
//!
//! The [`Transformer`] trait is the seam the pipeline depends on;
//! [`OpenAiTransformer`] is the HTTP implementation.

mod openai;

pub use openai::OpenAiTransformer;

use async_trait::async_trait;

use crate::error::TransformError;

/// Default model when `OPENAI_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Default completion token ceiling.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Sampling temperature. Slightly creative.
pub const TEMPERATURE: f32 = 0.7;

/// Configuration for the transformation provider.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
}

/// Rewrites a message in the bot's style.
///
/// Implementations hold no per-call mutable state and may be called from
/// many tasks at once. No retries: one failed attempt fails the message.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, text: &str, speaker: &str) -> Result<String, TransformError>;
}

/// Persona given to the model as the system message.
pub fn system_prompt() -> &'static str {
    "You are a Gen Alpha language translator. Your job is to translate normal messages \
     into Gen Alpha slang and expressions. Be creative, use current youth trends, emojis, \
     and make it funny but still understandable."
}

/// User message carrying the original text and its speaker.
pub fn user_prompt(text: &str, speaker: &str) -> String {
    format!(
        "Translate the following message to Gen Alpha slang/language (TikTok style, with emojis, \
         internet abbreviations, and current youth trends). Make it humorous but keep the \
         original meaning. The message is from {speaker}: \"{text}\""
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_includes_speaker_and_text() {
        let prompt = user_prompt("hello world", "bob");
        assert!(prompt.contains("The message is from bob: \"hello world\""));
        assert!(prompt.contains("keep the original meaning"));
    }

    #[test]
    fn system_prompt_sets_persona() {
        assert!(system_prompt().contains("Gen Alpha"));
    }
}
