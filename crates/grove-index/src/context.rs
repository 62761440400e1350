//! Token-bounded context assembly.
//!
//! A context is a plain-text document built from sections. Lines are
//! appended in order until the next one would exceed the token budget;
//! after that nothing else goes in, so a context is always a prefix of
//! what an unlimited budget would have produced.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::debug;

static TOKENIZER: Lazy<Option<Mutex<CoreBPE>>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(Mutex::new(bpe)),
    Err(e) => {
        debug!("Tokenizer unavailable, estimating tokens: {}", e);
        None
    }
});

/// Counts tokens in `text`.
///
/// Uses the cl100k tokenizer when it loads, otherwise 1 token per 4 chars.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.lock().encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// The 4-chars-per-token heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Reason for stopping context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TruncationReason {
    /// Everything fit.
    Complete,
    /// Stopped because the token budget was reached.
    TokenBudget,
}

impl std::fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncationReason::Complete => write!(f, "complete"),
            TruncationReason::TokenBudget => write!(f, "token_budget"),
        }
    }
}

/// Accumulates sections within a token budget.
#[derive(Debug)]
pub struct ContextBuilder {
    max_tokens: usize,
    used: usize,
    text: String,
    truncation: TruncationReason,
}

impl ContextBuilder {
    /// Creates a builder. A budget of 0 means unlimited.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            used: 0,
            text: String::new(),
            truncation: TruncationReason::Complete,
        }
    }

    pub fn tokens(&self) -> usize {
        self.used
    }

    pub fn is_full(&self) -> bool {
        self.truncation == TruncationReason::TokenBudget
    }

    /// Appends one line. Returns false once the budget is exhausted.
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.is_full() {
            return false;
        }
        let line = format!("{}\n", line);
        let cost = count_tokens(&line);
        if self.max_tokens > 0 && self.used + cost > self.max_tokens {
            self.truncation = TruncationReason::TokenBudget;
            return false;
        }
        self.used += cost;
        self.text.push_str(&line);
        true
    }

    /// Appends a titled section. Empty sections are skipped entirely.
    pub fn push_section<I, S>(&mut self, title: &str, lines: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lines = lines.into_iter().peekable();
        if lines.peek().is_none() {
            return !self.is_full();
        }

        let header = if self.text.is_empty() {
            format!("## {}", title)
        } else {
            format!("\n## {}", title)
        };
        if !self.push_line(&header) {
            return false;
        }
        for line in lines {
            if !self.push_line(line.as_ref()) {
                return false;
            }
        }
        true
    }

    pub fn truncation(&self) -> TruncationReason {
        self.truncation
    }

    pub fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_count_tokens_is_positive_for_text() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("fn main() { println!(\"hi\"); }") > 0);
    }

    #[test]
    fn test_unlimited_budget_takes_everything() {
        let mut builder = ContextBuilder::new(0);
        assert!(builder.push_section("Files", ["a.rs", "b.rs"]));
        assert!(builder.push_section("Empty", Vec::<String>::new()));
        let text = builder.finish();
        assert_eq!(text, "## Files\na.rs\nb.rs\n");
    }

    #[test]
    fn test_budget_stops_at_prefix() {
        let mut builder = ContextBuilder::new(20);
        let lines: Vec<String> = (0..50).map(|i| format!("src/module_{}/file.rs", i)).collect();
        assert!(!builder.push_section("Files", &lines));
        assert!(builder.is_full());
        assert!(builder.tokens() <= 20);
        assert_eq!(builder.truncation(), TruncationReason::TokenBudget);

        assert!(!builder.push_line("more"));
        let text = builder.finish();
        assert!(text.starts_with("## Files\nsrc/module_0/file.rs\n"));
    }
}
