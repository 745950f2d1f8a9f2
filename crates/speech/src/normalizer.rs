//! Stateless sentence cleanup applied between the chunker and the
//! outbound `tts_ready_chunk` event.

use regex::Regex;

use dm_domain::config::NormalizerConfig;
use dm_domain::error::{Error, Result};

/// A cleaned sentence plus its extracted emotion tag, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedChunk {
    pub text: String,
    pub emotion: Option<String>,
}

/// Applies the configured rewrite rules, extracts the first `[tag]`
/// emotion marker, and collapses whitespace. Compiled once at startup;
/// `process` is pure.
pub struct TextNormalizer {
    rules: Vec<(Regex, String)>,
    emotion: Regex,
    whitespace: Regex,
}

impl TextNormalizer {
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let re = Regex::new(&rule.pattern).map_err(|e| {
                Error::Config(format!("normalizer rule {:?}: {e}", rule.pattern))
            })?;
            rules.push((re, rule.replacement.clone()));
        }

        Ok(Self {
            rules,
            emotion: Regex::new(r"\[([A-Za-z_]+)\]").map_err(|e| Error::Config(e.to_string()))?,
            whitespace: Regex::new(r"\s+").map_err(|e| Error::Config(e.to_string()))?,
        })
    }

    /// Normalize one completed sentence.
    ///
    /// Returns `None` when nothing speakable remains; the caller must skip
    /// the event in that case.
    pub fn process(&self, sentence: &str) -> Option<NormalizedChunk> {
        let mut text = sentence.to_owned();
        for (re, replacement) in &self.rules {
            text = re.replace_all(&text, replacement.as_str()).into_owned();
        }

        let mut emotion = None;
        if let Some(caps) = self.emotion.captures(&text) {
            emotion = Some(caps[1].to_owned());
            let span = caps.get(0).map(|m| m.range());
            if let Some(span) = span {
                text.replace_range(span, "");
            }
        }

        let text = self.whitespace.replace_all(&text, " ").trim().to_owned();
        if text.is_empty() {
            None
        } else {
            Some(NormalizedChunk { text, emotion })
        }
    }
}
