//! Prompt sanitization to keep event text extracted from Windows log
//! messages from being interpreted as instructions by the model.

use std::num::NonZeroUsize;

/// Maximum prompt length sent to a provider. Prompts longer than this are
/// truncated rather than rejected, since truncation is always safe for an
/// analysis request (the model still sees the event, just less context).
pub const MAX_PROMPT_LENGTH: usize = 16_384;

/// Strips control characters and instruction-like delimiters out of text
/// that originated from a log message before it is embedded into a
/// prompt, and enforces [`MAX_PROMPT_LENGTH`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestSanitizer;

impl RequestSanitizer {
    /// Construct a sanitizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sanitize `text`, removing control characters and neutralizing
    /// common prompt-injection delimiters (e.g. `"""`, markdown fences)
    /// before the text is interpolated into a prompt template.
    #[must_use]
    pub fn sanitize(&self, text: &str) -> String {
        let without_control: String = text
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect();

        let neutralized = without_control
            .replace("```", "'''")
            .replace("\"\"\"", "'''")
            .replace("SYSTEM:", "system-")
            .replace("ASSISTANT:", "assistant-");

        truncate_chars(&neutralized, MAX_PROMPT_LENGTH)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    let max = NonZeroUsize::new(max).map_or(0, NonZeroUsize::get);
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
