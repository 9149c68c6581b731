//! Intent labels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Topical category of a user query
///
/// The set is closed: every knowledge base and prompt profile is keyed by one
/// of these variants. `Other` is the catch-all used for general questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Campus,
    Fitness,
    Paper,
    Psychology,
    Other,
}

impl Intent {
    /// All intents in declaration order
    pub const ALL: [Intent; 5] = [
        Intent::Campus,
        Intent::Fitness,
        Intent::Paper,
        Intent::Psychology,
        Intent::Other,
    ];

    /// Stable lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Campus => "campus",
            Intent::Fitness => "fitness",
            Intent::Paper => "paper",
            Intent::Psychology => "psychology",
            Intent::Other => "other",
        }
    }

    /// Avatar shown next to answers for this intent
    pub fn avatar(&self) -> &'static str {
        match self {
            Intent::Psychology => "007-gin tonic.svg",
            Intent::Fitness => "014-mojito.svg",
            Intent::Campus => "042-milkshake.svg",
            Intent::Paper => "044-whiskey sour.svg",
            Intent::Other => "050-lemon juice.svg",
        }
    }

    /// Human-readable assistant name
    pub fn display_name(&self) -> &'static str {
        match self {
            Intent::Campus => "Campus assistant",
            Intent::Fitness => "Fitness & diet assistant",
            Intent::Paper => "Paper writing assistant",
            Intent::Psychology => "Psychology assistant",
            Intent::Other => "General assistant",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = Error;

    /// Accepts the English labels and the Chinese assistant names used in
    /// labeled training corpora.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        match label.to_lowercase().as_str() {
            "campus" | "校园知识问答" => Ok(Intent::Campus),
            "fitness" | "健身饮食助手" => Ok(Intent::Fitness),
            "paper" | "论文助手" => Ok(Intent::Paper),
            "psychology" | "心理助手" => Ok(Intent::Psychology),
            "other" | "其他" => Ok(Intent::Other),
            _ => Err(Error::validation(format!("Unknown intent label: '{}'", label))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!("Campus".parse::<Intent>().unwrap(), Intent::Campus);
        assert_eq!(" fitness ".parse::<Intent>().unwrap(), Intent::Fitness);
        assert_eq!("论文助手".parse::<Intent>().unwrap(), Intent::Paper);
        assert_eq!("心理助手".parse::<Intent>().unwrap(), Intent::Psychology);
        assert!("weather".parse::<Intent>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Intent::Psychology).unwrap();
        assert_eq!(json, "\"psychology\"");
        let back: Intent = serde_json::from_str("\"other\"").unwrap();
        assert_eq!(back, Intent::Other);
    }

    #[test]
    fn test_every_intent_has_avatar() {
        for intent in Intent::ALL {
            assert!(intent.avatar().ends_with(".svg"));
        }
    }
}
