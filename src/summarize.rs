//! Token chunking and bounded recursive summarization.
//!
//! Tokenization is Unicode word-bound segmentation. The segments
//! partition the input exactly, so joining them back reproduces the
//! original text byte for byte; chunking is lossless apart from the
//! deliberate overlap between windows.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::SummarizeConfig;
use crate::error::{IndexError, Result};
use crate::llm::Generator;

pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_word_bounds().collect()
}

pub fn token_count(text: &str) -> usize {
    text.split_word_bounds().count()
}

/// The first `n` tokens of `text`, rejoined.
pub fn take_tokens(text: &str, n: usize) -> String {
    text.split_word_bounds().take(n).collect()
}

/// Split into windows of `chunk_size` tokens, each starting
/// `chunk_size - overlap` tokens after the previous one. The final
/// window may be shorter. Empty input yields no chunks.
pub fn chunk_by_tokens(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(IndexError::InvalidOverlap {
            overlap,
            chunk_size,
        });
    }

    let tokens = tokenize(text);
    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        chunks.push(tokens[start..end].concat());
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    Ok(chunks)
}

fn summary_prompt(text: &str, max_words: usize) -> String {
    format!(
        "Summarize the following text into less than or equal to {} words, returning only \
         the summary and no extra context, characters, or words. Additionally, the summary \
         should read like a coherent passage and summarize the main points of the text, \
         avoid things like \"the text says\", and avoid redundant information:\n{}",
        max_words, text
    )
}

/// One summarization pass over a single chunk.
async fn summarize_chunk(generator: &dyn Generator, text: &str, max_words: usize) -> Result<String> {
    generator.generate(&summary_prompt(text, max_words)).await
}

/// Summarize text of any length down to at most `max_summary_tokens`
/// tokens. Short input comes back untouched; longer input is chunked,
/// each chunk summarized, and the joined summaries fed back through
/// until the bound holds. Gives up with a convergence error after
/// `max_rounds` rounds, so a model that refuses to shrink its output
/// cannot spin forever.
pub async fn recursive_summarize(
    generator: &dyn Generator,
    config: &SummarizeConfig,
    text: &str,
) -> Result<String> {
    let mut current = text.to_string();
    let mut rounds = 0usize;

    while token_count(&current) > config.max_summary_tokens {
        if rounds >= config.max_rounds as usize {
            return Err(IndexError::Convergence { rounds });
        }
        rounds += 1;

        let chunks = chunk_by_tokens(&current, config.chunk_size, config.overlap)?;
        let mut summaries = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            summaries.push(summarize_chunk(generator, chunk, config.max_summary_tokens).await?);
        }
        current = summaries.join("\n\n");
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic generator that returns a fixed-length summary.
    struct FixedGenerator {
        reply: String,
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    /// Generator that echoes the chunk back, shrinking nothing.
    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn tokens_partition_text_exactly() {
        let text = "Hello, world!  Two  spaces.";
        assert_eq!(tokenize(text).concat(), text);
    }

    #[test]
    fn chunks_concatenate_back_to_input_without_overlap() {
        let text = words(200);
        let chunks = chunk_by_tokens(&text, 50, 0).unwrap();
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_windows_advance_by_size_minus_overlap() {
        // "a b c ... j" segments into 19 tokens, letters and spaces
        // alternating.
        let text = "a b c d e f g h i j";
        let chunks = chunk_by_tokens(text, 4, 2).unwrap();
        assert_eq!(chunks[0], "a b ");
        assert_eq!(chunks[1], "b c ");
        assert_eq!(chunks[2], "c d ");
        // Every token appears in at least one chunk.
        assert!(chunks.last().unwrap().ends_with('j'));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(
            chunk_by_tokens("abc", 4, 4),
            Err(IndexError::InvalidOverlap { .. })
        ));
        assert!(matches!(
            chunk_by_tokens("abc", 0, 0),
            Err(IndexError::InvalidOverlap { .. })
        ));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_by_tokens("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn take_tokens_is_a_prefix() {
        let text = "one two three four";
        assert_eq!(take_tokens(text, 3), "one two");
        assert_eq!(take_tokens(text, 100), text);
    }

    #[tokio::test]
    async fn short_text_returns_unchanged_without_calling_model() {
        struct PanicGenerator;
        #[async_trait]
        impl Generator for PanicGenerator {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                panic!("model must not be called for short input");
            }
        }

        let config = SummarizeConfig {
            chunk_size: 100,
            overlap: 10,
            max_summary_tokens: 500,
            max_rounds: 3,
        };
        let text = "already short enough";
        let out = recursive_summarize(&PanicGenerator, &config, text)
            .await
            .unwrap();
        assert_eq!(out, text);
    }

    #[tokio::test]
    async fn long_text_converges_to_the_token_bound() {
        let config = SummarizeConfig {
            chunk_size: 400,
            overlap: 50,
            max_summary_tokens: 20,
            max_rounds: 8,
        };
        let generator = FixedGenerator {
            reply: "a tidy summary".to_string(),
        };
        let text = words(5000);
        let out = recursive_summarize(&generator, &config, &text).await.unwrap();
        assert!(token_count(&out) <= config.max_summary_tokens);
    }

    #[tokio::test]
    async fn chunk_summaries_are_joined_with_a_blank_line() {
        let config = SummarizeConfig {
            chunk_size: 10,
            overlap: 0,
            max_summary_tokens: 50,
            max_rounds: 3,
        };
        let generator = FixedGenerator {
            reply: "ok".to_string(),
        };
        // 59 tokens split into 6 chunks of 10, one pass to converge.
        let out = recursive_summarize(&generator, &config, &words(30))
            .await
            .unwrap();
        assert_eq!(out, vec!["ok"; 6].join("\n\n"));
    }

    #[tokio::test]
    async fn non_shrinking_model_hits_the_round_bound() {
        let config = SummarizeConfig {
            chunk_size: 50,
            overlap: 5,
            max_summary_tokens: 10,
            max_rounds: 3,
        };
        let text = words(500);
        let err = recursive_summarize(&EchoGenerator, &config, &text)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Convergence { rounds: 3 }));
    }
}
