//! Prompt-size management. Token counts are estimated (≈4 chars per token,
//! never less than the word count) — close enough for trimming and batch
//! budgeting without shipping a per-model tokenizer.

/// Tokens reserved for the completion regardless of context size.
pub const MIN_COMPLETION_TOKENS: usize = 1024;
/// Slack against estimation error.
pub const SAFETY_BUFFER: usize = 200;

/// Rough token estimate for a prompt.
pub fn estimate_tokens(text: &str) -> usize {
    let by_chars = text.chars().count().div_ceil(4);
    let by_words = text.split_whitespace().count();
    by_chars.max(by_words)
}

/// Trim a prompt to fit the model's context window, leaving room for the
/// reserved completion and the safety buffer. Trimming keeps the head of
/// the prompt; instructions lead, the tail is droppable context.
pub fn trim_prompt(prompt: &str, context_window: usize) -> String {
    let max_prompt_tokens = context_window
        .saturating_sub(MIN_COMPLETION_TOKENS)
        .saturating_sub(SAFETY_BUFFER)
        .max(1);

    if estimate_tokens(prompt) <= max_prompt_tokens {
        return prompt.to_string();
    }

    // Character truncation at ~3 chars/token errs on the short side.
    let max_chars = max_prompt_tokens.saturating_mul(3);
    let truncated: String = prompt.chars().take(max_chars).collect();
    truncated
}

/// Greedily pack items into batches whose estimated prompt size stays under
/// `safe_prompt_tokens`. An oversized single item still gets its own batch.
pub fn budget_batches<T>(
    items: Vec<T>,
    safe_prompt_tokens: usize,
    estimate: impl Fn(&T) -> usize,
) -> Vec<Vec<T>> {
    let mut batches: Vec<Vec<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let cost = estimate(&item);
        if !current.is_empty() && current_tokens + cost > safe_prompt_tokens {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimation_bounds() {
        assert_eq!(estimate_tokens(""), 0);
        // 12 chars → 3 by chars, 2 by words → 3
        assert_eq!(estimate_tokens("hello world!"), 3);
        // many short words: word count dominates
        let text = "a b c d e f g h";
        assert_eq!(estimate_tokens(text), 8);
    }

    #[test]
    fn short_prompts_are_untouched() {
        let prompt = "summarize this";
        assert_eq!(trim_prompt(prompt, 8192), prompt);
    }

    #[test]
    fn oversized_prompts_are_truncated() {
        let prompt = "word ".repeat(10_000);
        let trimmed = trim_prompt(&prompt, 2048);
        assert!(trimmed.len() < prompt.len());
        let budget = 2048 - MIN_COMPLETION_TOKENS - SAFETY_BUFFER;
        assert!(trimmed.chars().count() <= budget * 3);
        assert!(prompt.starts_with(&trimmed[..10]));
    }

    #[test]
    fn tiny_context_still_leaves_something() {
        let trimmed = trim_prompt("some prompt text", 100);
        assert!(!trimmed.is_empty());
    }

    #[test]
    fn batches_respect_the_budget() {
        let items: Vec<usize> = vec![100, 200, 300, 400, 50];
        let batches = budget_batches(items, 500, |c| *c);
        assert_eq!(batches, vec![vec![100, 200], vec![300], vec![400, 50]]);
    }

    #[test]
    fn oversized_item_gets_own_batch() {
        let batches = budget_batches(vec![900, 10], 500, |c| *c);
        assert_eq!(batches, vec![vec![900], vec![10]]);
    }
}
