//! Closed emotion label set attached to subject utterances.
//!
//! Engine output is free text, so it is decoded through an exhaustive match
//! with an explicit fallback instead of being cast. [`EmotionLabel::decode`]
//! returns `None` for anything outside the set; the classifier records that
//! as `Neutral`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Neutral,
    PainSuspected,
    Anxious,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 5] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Neutral,
        EmotionLabel::PainSuspected,
        EmotionLabel::Anxious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::PainSuspected => "pain_suspected",
            EmotionLabel::Anxious => "anxious",
        }
    }

    /// Labels that raise the caregiver's concern banner.
    pub fn is_concerning(&self) -> bool {
        matches!(
            self,
            EmotionLabel::PainSuspected | EmotionLabel::Sad | EmotionLabel::Anxious
        )
    }

    /// Decode raw engine output. Tolerates case, surrounding whitespace,
    /// quotes, backticks, trailing punctuation and space/hyphen separators.
    /// Returns `None` for anything that is not exactly one known label.
    pub fn decode(raw: &str) -> Option<Self> {
        let token = raw
            .trim_matches(|c: char| {
                c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.' | '!' | ',' | ';' | ':')
            })
            .to_lowercase()
            .replace([' ', '-'], "_");

        match token.as_str() {
            "happy" => Some(EmotionLabel::Happy),
            "sad" => Some(EmotionLabel::Sad),
            "neutral" => Some(EmotionLabel::Neutral),
            "pain_suspected" => Some(EmotionLabel::PainSuspected),
            "anxious" => Some(EmotionLabel::Anxious),
            _ => None,
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s).ok_or_else(|| anyhow::anyhow!("unknown emotion label: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_exact_tokens() {
        for label in EmotionLabel::ALL {
            assert_eq!(EmotionLabel::decode(label.as_str()), Some(label));
        }
    }

    #[test]
    fn test_decode_formatting_noise() {
        assert_eq!(EmotionLabel::decode("  Happy\n"), Some(EmotionLabel::Happy));
        assert_eq!(EmotionLabel::decode("\"sad\""), Some(EmotionLabel::Sad));
        assert_eq!(EmotionLabel::decode("`anxious`."), Some(EmotionLabel::Anxious));
        assert_eq!(
            EmotionLabel::decode("Pain Suspected"),
            Some(EmotionLabel::PainSuspected)
        );
        assert_eq!(
            EmotionLabel::decode("pain-suspected"),
            Some(EmotionLabel::PainSuspected)
        );
    }

    #[test]
    fn test_decode_rejects_sentences() {
        assert_eq!(EmotionLabel::decode("The user seems happy"), None);
        assert_eq!(EmotionLabel::decode("joyful"), None);
        assert_eq!(EmotionLabel::decode(""), None);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&EmotionLabel::PainSuspected).unwrap();
        assert_eq!(json, "\"pain_suspected\"");
        let back: EmotionLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EmotionLabel::PainSuspected);
    }

    #[test]
    fn test_concerning_labels() {
        assert!(EmotionLabel::PainSuspected.is_concerning());
        assert!(EmotionLabel::Anxious.is_concerning());
        assert!(EmotionLabel::Sad.is_concerning());
        assert!(!EmotionLabel::Happy.is_concerning());
        assert!(!EmotionLabel::Neutral.is_concerning());
    }
}
