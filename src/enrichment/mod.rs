// Enrichment clients: announcement summaries via a chat-completions
// endpoint and semantic vectors via a batch embeddings endpoint. Both treat
// a missing credential as a disabled state rather than an error.

pub mod embedder;
pub mod summarizer;

#[cfg(test)]
mod tests;

pub use embedder::Embedder;
pub use summarizer::{SUMMARIZER_DISABLED_SENTINEL, SUMMARY_FAILED_SENTINEL, Summarizer};

/// Build the embedding input for one article: title, summary, and content
/// joined by newlines, truncated after concatenation so request size and
/// cost stay bounded.
#[inline]
pub fn compose_embed_text(title: &str, summary: &str, content: &str, max_chars: usize) -> String {
    let combined = [title, summary, content].join("\n");
    truncate_chars(&combined, max_chars)
}

/// Char-boundary-safe truncation; byte slicing would split CJK text.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
