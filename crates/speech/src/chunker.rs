//! Accumulates streamed text fragments and emits whole sentences.
//!
//! One instance per upstream text source, created at `stream_start` and
//! destroyed after `finalize()`. Reusing an instance across unrelated
//! sources would join fragments that never belonged together.

/// Sentence terminators, applied uniformly across scripts.
const TERMINATORS: [char; 7] = ['.', '!', '?', '。', '！', '？', '\n'];

/// Stateful splitter: fragments in, synthesis-sized sentences out.
///
/// Scanning uses the *last* terminator in the buffer, so a fragment that
/// carries several sentences collapses into a single emission. Prefixes
/// shorter than `min_chunk_len` code points are held back and merged
/// forward, which keeps microscopic utterances ("Hi!") out of the TTS
/// queue.
#[derive(Debug)]
pub struct ChunkSplitter {
    buffer: String,
    min_chunk_len: usize,
}

impl ChunkSplitter {
    pub fn new(min_chunk_len: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chunk_len,
        }
    }

    /// Append a fragment; return the sentences it completed (in order).
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        // Byte offset just past the last terminator, if any.
        let mut end = None;
        for (idx, ch) in self.buffer.char_indices() {
            if TERMINATORS.contains(&ch) {
                end = Some(idx + ch.len_utf8());
            }
        }
        let Some(end) = end else {
            return Vec::new();
        };

        if self.buffer[..end].chars().count() < self.min_chunk_len {
            // Too short to speak on its own; keep accumulating.
            return Vec::new();
        }

        let rest = self.buffer.split_off(end);
        let sentence = std::mem::replace(&mut self.buffer, rest);
        vec![sentence]
    }

    /// Return the non-empty residue as a final chunk and clear state.
    pub fn finalize(&mut self) -> Option<String> {
        let residue = std::mem::take(&mut self.buffer);
        if residue.is_empty() {
            None
        } else {
            Some(residue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(splitter: &mut ChunkSplitter, fragments: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for f in fragments {
            out.extend(splitter.feed(f));
        }
        out.extend(splitter.finalize());
        out
    }

    #[test]
    fn emits_on_terminator_past_min_length() {
        let mut s = ChunkSplitter::new(10);
        let out = feed_all(&mut s, &["Hello", " there.", " How are you?"]);
        assert_eq!(out, vec!["Hello there.", " How are you?"]);
    }

    #[test]
    fn short_sentence_merges_forward() {
        // "Hi!" is 3 code points — held until the next terminator clears
        // the threshold.
        let mut s = ChunkSplitter::new(10);
        assert!(s.feed("Hi!").is_empty());
        assert_eq!(s.feed(" How are you?"), vec!["Hi! How are you?"]);
        assert!(s.finalize().is_none());
    }

    #[test]
    fn multi_sentence_fragment_collapses_to_one_emission() {
        let mut s = ChunkSplitter::new(10);
        let out = s.feed("First one. Second one. Third");
        assert_eq!(out, vec!["First one. Second one."]);
        assert_eq!(s.finalize().as_deref(), Some(" Third"));
    }

    #[test]
    fn cjk_terminators_split_sentences() {
        let mut s = ChunkSplitter::new(5);
        assert_eq!(s.feed("こんにちは。"), vec!["こんにちは。"]);
        assert_eq!(s.feed("お元気ですか？"), vec!["お元気ですか？"]);
        assert!(s.finalize().is_none());
    }

    #[test]
    fn cjk_below_min_length_merges() {
        // With the default threshold the 6-code-point greeting is held and
        // merges with the following sentence.
        let mut s = ChunkSplitter::new(10);
        assert!(s.feed("こんにちは。").is_empty());
        assert_eq!(
            s.feed("お元気ですか？"),
            vec!["こんにちは。お元気ですか？"]
        );
    }

    #[test]
    fn newline_is_a_terminator() {
        let mut s = ChunkSplitter::new(5);
        assert_eq!(s.feed("line one\nline"), vec!["line one\n"]);
    }

    #[test]
    fn min_length_counts_code_points_not_bytes() {
        // 4 CJK chars + terminator = 5 code points but 15 bytes.
        let mut s = ChunkSplitter::new(6);
        assert!(s.feed("ありがと。").is_empty());
        let mut s = ChunkSplitter::new(5);
        assert_eq!(s.feed("ありがと。"), vec!["ありがと。"]);
    }

    #[test]
    fn no_terminator_accumulates_until_finalize() {
        let mut s = ChunkSplitter::new(10);
        assert!(s.feed("no end").is_empty());
        assert!(s.feed(" in sight").is_empty());
        assert_eq!(s.finalize().as_deref(), Some("no end in sight"));
    }

    #[test]
    fn finalize_on_empty_buffer_is_none() {
        let mut s = ChunkSplitter::new(10);
        assert!(s.finalize().is_none());
    }

    #[test]
    fn finalize_clears_state() {
        let mut s = ChunkSplitter::new(10);
        s.feed("residue");
        assert!(s.finalize().is_some());
        assert!(s.finalize().is_none());
    }
}
