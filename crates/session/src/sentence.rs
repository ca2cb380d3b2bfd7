//! Sentence boundary extraction
//!
//! Splits an accumulating text buffer into speakable complete sentences and
//! an unconsumed remainder, so synthesis can start on the first sentence
//! while the model is still producing later tokens.

/// Sentence-final punctuation
const TERMINALS: [char; 3] = ['.', '!', '?'];

/// Split `buffer` into complete sentences and a remainder
///
/// A terminal mark closes a sentence only when the next character exists and
/// is not itself a terminal mark. A run of marks ("no...") therefore stays
/// together and the sentence closes after its last mark, and a trailing mark
/// stays in the remainder until more text arrives, which makes the split
/// stable under arbitrary re-chunking: feeding any fragmentation of a string
/// through repeated calls (carrying the remainder forward) yields the same
/// sentences as one call on the whole string.
pub fn extract_sentences(buffer: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut chars = buffer.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !TERMINALS.contains(&c) {
            continue;
        }
        match chars.peek() {
            Some((_, next)) if !TERMINALS.contains(next) => {
                let end = i + c.len_utf8();
                sentences.push(buffer[start..end].to_string());
                start = end;
            }
            _ => {}
        }
    }

    (sentences, buffer[start..].to_string())
}

/// Stateful wrapper around [`extract_sentences`] for streaming input
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    remainder: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return any sentences completed by it
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.remainder.push_str(fragment);
        let (sentences, remainder) = extract_sentences(&self.remainder);
        self.remainder = remainder;
        sentences
    }

    /// Flush the remainder at end of stream, if it says anything
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.remainder);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    pub fn pending(&self) -> &str {
        &self.remainder
    }
}
