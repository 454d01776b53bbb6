//! Sentence chunker: LLM token stream in, TTS-sized sentences out.
//!
//! The buffer is drained in place as boundaries close; a trailing partial
//! sentence stays buffered until the stream ends and is flushed by
//! [`SentenceChunker::finish`]. Empty sentences are never emitted.

use std::sync::Arc;

/// A boundary rule: given the current buffer, return the byte index one
/// past the end of the first complete sentence, or `None` if no sentence
/// has closed yet.
pub type BoundaryRule = Arc<dyn Fn(&str) -> Option<usize> + Send + Sync>;

pub struct SentenceChunker {
    buffer: String,
    rule: BoundaryRule,
}

impl SentenceChunker {
    /// Default rule: a terminator character followed by whitespace closes
    /// the sentence. `terminators` is typically `".!?"`.
    pub fn new(terminators: &str) -> Self {
        let terms: Vec<char> = terminators.chars().collect();
        Self::with_rule(Arc::new(move |buffer: &str| {
            let mut iter = buffer.char_indices().peekable();
            while let Some((i, c)) = iter.next() {
                if terms.contains(&c) {
                    if let Some(&(_, next)) = iter.peek() {
                        if next.is_whitespace() {
                            return Some(i + c.len_utf8());
                        }
                    }
                }
            }
            None
        }))
    }

    /// Custom boundary rule, for languages without `[.!?]` markers.
    pub fn with_rule(rule: BoundaryRule) -> Self {
        Self {
            buffer: String::new(),
            rule,
        }
    }

    /// Feed a token; returns every sentence that closed.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut sentences = Vec::new();
        while let Some(end) = (self.rule)(&self.buffer) {
            let sentence: String = self.buffer.drain(..end).collect();
            // Drop the whitespace that closed the boundary.
            let rest_start = self.buffer.len() - self.buffer.trim_start().len();
            self.buffer.drain(..rest_start);

            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Stream ended: flush the trailing partial sentence, if non-empty.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(chunker: &mut SentenceChunker, tokens: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for token in tokens {
            out.extend(chunker.push(token));
        }
        out.extend(chunker.finish());
        out
    }

    #[test]
    fn trailing_sentence_flushes_on_finish() {
        let mut c = SentenceChunker::new(".!?");
        let sentences = drain(&mut c, &["It's ", "noon", "."]);
        assert_eq!(sentences, ["It's noon."]);
    }

    #[test]
    fn boundary_needs_following_whitespace() {
        let mut c = SentenceChunker::new(".!?");
        // "3.5" must not split mid-number.
        let sentences = drain(&mut c, &["pi is about 3.14159 rounded"]);
        assert_eq!(sentences, ["pi is about 3.14159 rounded"]);
    }

    #[test]
    fn multiple_sentences_in_one_token() {
        let mut c = SentenceChunker::new(".!?");
        let sentences = c.push("First. Second! Third? trailing");
        assert_eq!(sentences, ["First.", "Second!", "Third?"]);
        assert_eq!(c.finish().as_deref(), Some("trailing"));
    }

    #[test]
    fn sentence_split_across_tokens() {
        let mut c = SentenceChunker::new(".!?");
        assert!(c.push("Hello wor").is_empty());
        assert!(c.push("ld.").is_empty());
        assert_eq!(c.push(" Next"), ["Hello world."]);
        assert_eq!(c.finish().as_deref(), Some("Next"));
    }

    #[test]
    fn concatenated_sentences_round_trip() {
        let input = ["One fish. ", "Two fish. ", "Red fish. ", "Blue fish."];
        let mut c = SentenceChunker::new(".!?");
        let sentences = drain(&mut c, &input);
        assert_eq!(
            sentences,
            ["One fish.", "Two fish.", "Red fish.", "Blue fish."]
        );
    }

    #[test]
    fn empty_sentences_never_emitted() {
        let mut c = SentenceChunker::new(".!?");
        let sentences = drain(&mut c, &["  . ", " ! ", "  "]);
        // Lone terminators trim to punctuation-only "sentences"; they are
        // still non-empty text, but pure whitespace is dropped.
        assert!(sentences.iter().all(|s| !s.trim().is_empty()));
        let mut c2 = SentenceChunker::new(".!?");
        assert!(drain(&mut c2, &["   ", " "]).is_empty());
    }

    #[test]
    fn finish_on_empty_buffer_is_none() {
        let mut c = SentenceChunker::new(".!?");
        assert!(c.finish().is_none());
        assert!(c.push("Done. ").len() == 1);
        assert!(c.finish().is_none());
    }

    #[test]
    fn custom_rule_splits_on_ideographic_stop() {
        let mut c = SentenceChunker::with_rule(Arc::new(|buffer: &str| {
            buffer.find('。').map(|i| i + '。'.len_utf8())
        }));
        let sentences = c.push("こんにちは。元気ですか。まだ");
        assert_eq!(sentences, ["こんにちは。", "元気ですか。"]);
        assert_eq!(c.finish().as_deref(), Some("まだ"));
    }

    #[test]
    fn multibyte_terminator_handling() {
        let mut c = SentenceChunker::new(".!?");
        let sentences = drain(&mut c, &["héllo wörld. ", "ça va"]);
        assert_eq!(sentences, ["héllo wörld.", "ça va"]);
    }
}
