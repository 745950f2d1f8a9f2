use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text normalizer rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One ordered rewrite rule applied to a completed sentence before
/// synthesis. Rules are data so they can be tuned without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRule {
    /// Regex pattern (validated at startup).
    pub pattern: String,
    /// Replacement text; capture groups via `$1`, `$2`, ...
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Applied in order to each completed sentence.
    #[serde(default = "d_rules")]
    pub rules: Vec<NormalizeRule>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { rules: d_rules() }
    }
}

/// Built-in defaults: strip markdown emphasis and inline code so the TTS
/// engine never reads punctuation aloud.
fn d_rules() -> Vec<NormalizeRule> {
    vec![
        NormalizeRule {
            pattern: r"\*\*([^*]+)\*\*".into(),
            replacement: "$1".into(),
        },
        NormalizeRule {
            pattern: r"\*([^*]+)\*".into(),
            replacement: "$1".into(),
        },
        NormalizeRule {
            pattern: r"`([^`]+)`".into(),
            replacement: "$1".into(),
        },
    ]
}
