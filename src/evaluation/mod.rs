//! Evaluation modalities for challenges
//!
//! A challenge declares one [`EvaluationType`]. The type selects the shape
//! of the admin-authored [`EvaluationConfig`] and of the user's
//! [`SubmissionData`]. Both are tagged unions keyed by the same tag, so a
//! stored value always says which modality it belongs to.
//!
//! Validation happens at the boundary: configs when an admin writes a
//! challenge, payloads when a user submits. Stored JSON is decoded back
//! through the same types and never trusted by shape alone.

pub mod config;
pub mod submission;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::GamificationError;

pub use config::{
    EvaluationConfig, EvaluationConfigInput, FileConfig, FileRequirement, QrCodeConfig,
    QuizConfig, QuizQuestion, RequirementKind, TextConfig,
};
pub use submission::{
    evaluate_submission, EvaluatedSubmission, FileSubmission, QrCodeSubmission, QuizAnswer,
    QuizSubmission, SubmissionData, SubmittedFile, TextSubmission,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "gamification/")]
pub enum EvaluationType {
    Quiz,
    Text,
    File,
    Qrcode,
    None,
}

impl EvaluationType {
    pub const ALL: [EvaluationType; 5] = [
        EvaluationType::Quiz,
        EvaluationType::Text,
        EvaluationType::File,
        EvaluationType::Qrcode,
        EvaluationType::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Quiz => "quiz",
            EvaluationType::Text => "text",
            EvaluationType::File => "file",
            EvaluationType::Qrcode => "qrcode",
            EvaluationType::None => "none",
        }
    }

    /// Whether challenges of this type need an evaluation config block
    pub fn requires_config(&self) -> bool {
        !matches!(self, EvaluationType::None)
    }
}

impl Default for EvaluationType {
    fn default() -> Self {
        EvaluationType::None
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationType {
    type Err = GamificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvaluationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                GamificationError::Validation(format!(
                    "Invalid evaluation type: {}. Valid types: quiz, text, file, qrcode, none",
                    s
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_type_round_trips_through_str() {
        for t in EvaluationType::ALL {
            assert_eq!(t.as_str().parse::<EvaluationType>().unwrap(), t);
        }
        assert!("essay".parse::<EvaluationType>().is_err());
    }

    #[test]
    fn test_only_none_skips_config() {
        assert!(!EvaluationType::None.requires_config());
        assert!(EvaluationType::Qrcode.requires_config());
    }
}
