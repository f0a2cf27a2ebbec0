//! Admin-authored evaluation configuration per modality

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::EvaluationType;
use crate::error::GamificationError;

/// Longest free-text answer accepted when the admin does not set one
pub const DEFAULT_TEXT_MAX_LENGTH: u32 = 5000;

// ============================================================================
// Quiz
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`; stripped from participant views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QuizConfig {
    pub questions: Vec<QuizQuestion>,
    /// Percentage of correct answers needed to pass
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    #[serde(default)]
    pub allow_multiple_attempts: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Percentage of the challenge points lost for each attempt after the first
    #[serde(default)]
    pub score_reduction_per_attempt: u32,
}

fn default_min_score() -> u32 {
    70
}

fn default_max_attempts() -> u32 {
    1
}

impl QuizConfig {
    fn validate(&self) -> Result<(), GamificationError> {
        if self.questions.is_empty() {
            return Err(GamificationError::Validation("quiz must have at least one question".into()));
        }

        let mut ids = HashSet::new();
        for (i, q) in self.questions.iter().enumerate() {
            if q.id.trim().is_empty() {
                return Err(GamificationError::Validation(format!("questions[{}].id is required", i)));
            }
            if !ids.insert(q.id.as_str()) {
                return Err(GamificationError::Validation(format!("duplicate question id '{}'", q.id)));
            }
            if q.question.trim().is_empty() {
                return Err(GamificationError::Validation(format!("questions[{}].question is required", i)));
            }
            if q.options.len() < 2 {
                return Err(GamificationError::Validation(format!(
                    "questions[{}] needs at least two options",
                    i
                )));
            }
            match q.correct_answer {
                None => {
                    return Err(GamificationError::Validation(format!(
                        "questions[{}].correctAnswer is required",
                        i
                    )))
                }
                Some(answer) if answer >= q.options.len() => {
                    return Err(GamificationError::Validation(format!(
                        "questions[{}].correctAnswer {} is out of range (0..{})",
                        i,
                        answer,
                        q.options.len()
                    )))
                }
                Some(_) => {}
            }
        }

        if self.min_score > 100 {
            return Err(GamificationError::Validation("quiz.minScore must be between 0 and 100".into()));
        }
        if self.max_attempts == 0 {
            return Err(GamificationError::Validation("quiz.maxAttempts must be at least 1".into()));
        }
        if self.score_reduction_per_attempt > 100 {
            return Err(GamificationError::Validation(
                "quiz.scoreReductionPerAttempt must be between 0 and 100".into(),
            ));
        }

        Ok(())
    }

    /// Attempts a user may make in total
    pub fn attempt_limit(&self) -> u32 {
        if self.allow_multiple_attempts {
            self.max_attempts
        } else {
            1
        }
    }

    /// Points awarded on the given 1-based attempt
    pub fn points_for_attempt(&self, base_points: i32, attempt: u32) -> i32 {
        let reduction = self.score_reduction_per_attempt as i64 * attempt.saturating_sub(1) as i64;
        let percent = (100 - reduction).max(0);
        (base_points as i64 * percent / 100) as i32
    }
}

// ============================================================================
// Text
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct TextConfig {
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: u32,
}

fn default_max_length() -> u32 {
    DEFAULT_TEXT_MAX_LENGTH
}

impl TextConfig {
    fn validate(&self) -> Result<(), GamificationError> {
        if self.max_length == 0 {
            return Err(GamificationError::Validation("text.maxLength must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "gamification/")]
pub enum RequirementKind {
    File,
    Link,
}

impl Default for RequirementKind {
    fn default() -> Self {
        RequirementKind::File
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct FileRequirement {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub points: i32,
    /// MIME types (`image/png`, `image/*`) or extensions (`.pdf`)
    #[serde(default)]
    pub accepted_types: Vec<String>,
    /// Shorthand for a family of types: image, document, video, audio, any
    #[serde(default)]
    pub file_category: Option<String>,
    /// Maximum size in bytes
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub submission_type: RequirementKind,
    #[serde(default)]
    pub allow_multiple: bool,
}

impl FileRequirement {
    /// Accepted type patterns, explicit list first, then the category's
    pub fn effective_accepted_types(&self) -> Vec<String> {
        let mut types = self.accepted_types.clone();
        if let Some(category) = &self.file_category {
            types.extend(category_types(category).iter().map(|t| t.to_string()));
        }
        types
    }

    /// Whether an uploaded file's content type or name matches this requirement
    pub fn accepts(&self, content_type: Option<&str>, file_name: Option<&str>) -> bool {
        let patterns = self.effective_accepted_types();
        if patterns.is_empty() {
            return true;
        }

        let content_type = content_type.map(|c| c.to_ascii_lowercase());
        let file_name = file_name.map(|n| n.to_ascii_lowercase());

        patterns.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            if pattern == "*" || pattern == "*/*" {
                true
            } else if pattern.starts_with('.') {
                file_name.as_deref().map_or(false, |n| n.ends_with(&pattern))
            } else if let Some(prefix) = pattern.strip_suffix("/*") {
                content_type
                    .as_deref()
                    .map_or(false, |c| c.split('/').next() == Some(prefix))
            } else {
                content_type.as_deref() == Some(pattern.as_str())
            }
        })
    }
}

fn category_types(category: &str) -> &'static [&'static str] {
    match category {
        "image" => &["image/*"],
        "video" => &["video/*"],
        "audio" => &["audio/*"],
        "document" => &[
            "application/pdf",
            "application/msword",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "application/vnd.ms-excel",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "application/vnd.ms-powerpoint",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "text/plain",
            ".pdf",
            ".doc",
            ".docx",
            ".xls",
            ".xlsx",
            ".ppt",
            ".pptx",
            ".txt",
        ],
        "any" => &["*"],
        _ => &[],
    }
}

const FILE_CATEGORIES: &[&str] = &["image", "video", "audio", "document", "any"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct FileConfig {
    pub file_requirements: Vec<FileRequirement>,
    pub max_files: u32,
}

impl FileConfig {
    fn validate(&self) -> Result<(), GamificationError> {
        if self.file_requirements.is_empty() {
            return Err(GamificationError::Validation(
                "file evaluation needs at least one file requirement".into(),
            ));
        }

        let mut ids = HashSet::new();
        for (i, req) in self.file_requirements.iter().enumerate() {
            if req.id.trim().is_empty() {
                return Err(GamificationError::Validation(format!("fileRequirements[{}].id is required", i)));
            }
            if !ids.insert(req.id.as_str()) {
                return Err(GamificationError::Validation(format!("duplicate file requirement id '{}'", req.id)));
            }
            if req.name.trim().is_empty() {
                return Err(GamificationError::Validation(format!("fileRequirements[{}].name is required", i)));
            }
            if req.points < 0 {
                return Err(GamificationError::Validation(format!(
                    "fileRequirements[{}].points must not be negative",
                    i
                )));
            }
            if let Some(category) = &req.file_category {
                if !FILE_CATEGORIES.contains(&category.as_str()) {
                    return Err(GamificationError::Validation(format!(
                        "fileRequirements[{}].fileCategory '{}' is not valid. Valid values: {:?}",
                        i, category, FILE_CATEGORIES
                    )));
                }
            }
            if req.max_size == Some(0) {
                return Err(GamificationError::Validation(format!(
                    "fileRequirements[{}].maxSize must be positive",
                    i
                )));
            }
        }

        if (self.max_files as usize) < self.file_requirements.len() {
            return Err(GamificationError::Validation(format!(
                "file.maxFiles ({}) is lower than the number of requirements ({})",
                self.max_files,
                self.file_requirements.len()
            )));
        }
        self.total_points()?;

        Ok(())
    }

    /// Challenge points for a file challenge: the sum of requirement points
    pub fn total_points(&self) -> Result<i32, GamificationError> {
        self.file_requirements
            .iter()
            .try_fold(0i32, |total, r| total.checked_add(r.points))
            .ok_or_else(|| GamificationError::Validation("fileRequirements points add up to more than allowed".into()))
    }

    pub fn requirement(&self, id: &str) -> Option<&FileRequirement> {
        self.file_requirements.iter().find(|r| r.id == id)
    }
}

// ============================================================================
// QR code
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QrCodeConfig {
    /// Payload the scanned code must contain; blank in participant views
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qr_code_data: String,
    #[serde(default)]
    pub qr_code_image: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl QrCodeConfig {
    fn validate(&self) -> Result<(), GamificationError> {
        if self.qr_code_data.trim().is_empty() {
            return Err(GamificationError::Validation("qrcode.qrCodeData is required".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Tagged union
// ============================================================================

/// Stored evaluation config; the tag always matches the challenge's type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "gamification/")]
pub enum EvaluationConfig {
    Quiz(QuizConfig),
    Text(TextConfig),
    File(FileConfig),
    Qrcode(QrCodeConfig),
}

impl EvaluationConfig {
    pub fn evaluation_type(&self) -> EvaluationType {
        match self {
            EvaluationConfig::Quiz(_) => EvaluationType::Quiz,
            EvaluationConfig::Text(_) => EvaluationType::Text,
            EvaluationConfig::File(_) => EvaluationType::File,
            EvaluationConfig::Qrcode(_) => EvaluationType::Qrcode,
        }
    }

    pub fn validate(&self) -> Result<(), GamificationError> {
        match self {
            EvaluationConfig::Quiz(c) => c.validate(),
            EvaluationConfig::Text(c) => c.validate(),
            EvaluationConfig::File(c) => c.validate(),
            EvaluationConfig::Qrcode(c) => c.validate(),
        }
    }

    /// Copy safe to show participants: no quiz answers, no QR payload
    pub fn redacted(&self) -> Self {
        match self {
            EvaluationConfig::Quiz(c) => {
                let mut c = c.clone();
                for q in &mut c.questions {
                    q.correct_answer = None;
                }
                EvaluationConfig::Quiz(c)
            }
            EvaluationConfig::Qrcode(c) => EvaluationConfig::Qrcode(QrCodeConfig {
                qr_code_data: String::new(),
                ..c.clone()
            }),
            other => other.clone(),
        }
    }

    /// Decode a stored config and check it still matches the challenge type
    pub fn from_stored(
        evaluation_type: EvaluationType,
        json: Option<&str>,
    ) -> Result<Option<Self>, GamificationError> {
        let config = match json {
            Some(json) if !json.is_empty() => Some(serde_json::from_str::<EvaluationConfig>(json).map_err(|e| {
                GamificationError::Internal(format!("Stored evaluation config is corrupt: {}", e))
            })?),
            _ => None,
        };

        match (&config, evaluation_type.requires_config()) {
            (Some(c), _) if c.evaluation_type() != evaluation_type => Err(GamificationError::Internal(format!(
                "Stored evaluation config is '{}' but challenge type is '{}'",
                c.evaluation_type(),
                evaluation_type
            ))),
            (None, true) => Err(GamificationError::Internal(format!(
                "Challenge of type '{}' has no stored evaluation config",
                evaluation_type
            ))),
            _ => Ok(config),
        }
    }
}

/// Admin input: one optional block per modality, as the editor sends it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct EvaluationConfigInput {
    #[serde(default)]
    pub quiz: Option<QuizConfig>,
    #[serde(default)]
    pub text: Option<TextConfig>,
    #[serde(default)]
    pub file: Option<FileConfig>,
    #[serde(default)]
    pub qrcode: Option<QrCodeConfig>,
}

impl EvaluationConfigInput {
    /// Pick and validate the block matching `evaluation_type`
    ///
    /// Blocks for other modalities are ignored so the editor can keep
    /// drafts around while switching types.
    pub fn resolve(
        &self,
        evaluation_type: EvaluationType,
    ) -> Result<Option<EvaluationConfig>, GamificationError> {
        let config = match evaluation_type {
            EvaluationType::None => return Ok(None),
            EvaluationType::Quiz => self.quiz.clone().map(EvaluationConfig::Quiz),
            EvaluationType::Text => self.text.clone().map(EvaluationConfig::Text),
            EvaluationType::File => self.file.clone().map(EvaluationConfig::File),
            EvaluationType::Qrcode => self.qrcode.clone().map(EvaluationConfig::Qrcode),
        };

        let config = config.ok_or_else(|| {
            GamificationError::Validation(format!(
                "evaluationConfig.{} is required for evaluation type '{}'",
                evaluation_type, evaluation_type
            ))
        })?;

        config.validate()?;
        Ok(Some(config))
    }
}
