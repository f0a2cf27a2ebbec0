//! User submission payloads and their validation against a challenge config

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::config::{EvaluationConfig, FileConfig, QrCodeConfig, QuizConfig, RequirementKind, TextConfig};
use super::EvaluationType;
use crate::error::GamificationError;
use crate::object_store::ObjectInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QuizAnswer {
    pub question_id: String,
    pub selected_option: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QuizSubmission {
    pub answers: Vec<QuizAnswer>,
    /// Percentage of correct answers, filled in by the server
    #[serde(default)]
    pub score: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct TextSubmission {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct SubmittedFile {
    pub requirement_id: String,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Copied from the matched requirement during evaluation
    #[serde(default)]
    pub submission_type: RequirementKind,
}

impl SubmittedFile {
    /// Replace client-declared size, type and name with what object storage
    /// recorded. `None` means the URL is not one of our objects, so nothing
    /// declared about it is kept.
    pub fn attach_stored(&mut self, info: Option<ObjectInfo>) {
        match info {
            Some(info) => {
                self.size = Some(info.size_bytes);
                self.content_type = info.content_type;
                self.name = info.file_name;
            }
            None => {
                self.size = None;
                self.content_type = None;
                self.name = None;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct FileSubmission {
    pub files: Vec<SubmittedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct QrCodeSubmission {
    pub scanned_data: String,
}

/// Submission payload, tagged with the same names as [`EvaluationConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "gamification/")]
pub enum SubmissionData {
    Quiz(QuizSubmission),
    Text(TextSubmission),
    File(FileSubmission),
    Qrcode(QrCodeSubmission),
    None,
}

impl SubmissionData {
    pub fn evaluation_type(&self) -> EvaluationType {
        match self {
            SubmissionData::Quiz(_) => EvaluationType::Quiz,
            SubmissionData::Text(_) => EvaluationType::Text,
            SubmissionData::File(_) => EvaluationType::File,
            SubmissionData::Qrcode(_) => EvaluationType::Qrcode,
            SubmissionData::None => EvaluationType::None,
        }
    }

    /// URLs of uploaded objects referenced by this payload; links are excluded
    pub fn stored_file_urls(&self) -> Vec<String> {
        match self {
            SubmissionData::File(f) => f
                .files
                .iter()
                .filter(|file| file.submission_type == RequirementKind::File)
                .map(|file| file.url.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Outcome of checking a payload against its challenge
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedSubmission {
    /// Normalized payload to persist
    pub data: SubmissionData,
    pub quiz_score: Option<u32>,
    /// False only for quizzes graded below `minScore`
    pub passed: bool,
}

impl EvaluatedSubmission {
    fn accepted(data: SubmissionData) -> Self {
        Self { data, quiz_score: None, passed: true }
    }
}

/// Validate `data` against the challenge's evaluation type and config
pub fn evaluate_submission(
    evaluation_type: EvaluationType,
    config: Option<&EvaluationConfig>,
    data: SubmissionData,
) -> Result<EvaluatedSubmission, GamificationError> {
    if data.evaluation_type() != evaluation_type {
        return Err(GamificationError::Validation(format!(
            "Submission type '{}' does not match challenge evaluation type '{}'",
            data.evaluation_type(),
            evaluation_type
        )));
    }

    match (data, config) {
        (SubmissionData::None, _) => Ok(EvaluatedSubmission::accepted(SubmissionData::None)),
        (SubmissionData::Quiz(s), Some(EvaluationConfig::Quiz(c))) => grade_quiz(c, s),
        (SubmissionData::Text(s), Some(EvaluationConfig::Text(c))) => {
            check_text(c, &s)?;
            Ok(EvaluatedSubmission::accepted(SubmissionData::Text(TextSubmission {
                text: s.text.trim().to_string(),
            })))
        }
        (SubmissionData::File(s), Some(EvaluationConfig::File(c))) => {
            let files = check_files(c, s)?;
            Ok(EvaluatedSubmission::accepted(SubmissionData::File(files)))
        }
        (SubmissionData::Qrcode(s), Some(EvaluationConfig::Qrcode(c))) => {
            check_qrcode(c, &s)?;
            Ok(EvaluatedSubmission::accepted(SubmissionData::Qrcode(s)))
        }
        _ => Err(GamificationError::Internal(format!(
            "Challenge of type '{}' has no matching evaluation config",
            evaluation_type
        ))),
    }
}

fn grade_quiz(config: &QuizConfig, submission: QuizSubmission) -> Result<EvaluatedSubmission, GamificationError> {
    let questions: HashMap<&str, _> = config.questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut seen = HashSet::new();
    let mut correct = 0usize;
    for answer in &submission.answers {
        let question = questions.get(answer.question_id.as_str()).ok_or_else(|| {
            GamificationError::Validation(format!("Unknown question id '{}'", answer.question_id))
        })?;
        if !seen.insert(answer.question_id.as_str()) {
            return Err(GamificationError::Validation(format!(
                "Question '{}' answered more than once",
                answer.question_id
            )));
        }
        if answer.selected_option >= question.options.len() {
            return Err(GamificationError::Validation(format!(
                "Option {} is out of range for question '{}'",
                answer.selected_option, answer.question_id
            )));
        }
        if question.correct_answer == Some(answer.selected_option) {
            correct += 1;
        }
    }

    if seen.len() != config.questions.len() {
        return Err(GamificationError::Validation(format!(
            "All {} questions must be answered ({} given)",
            config.questions.len(),
            seen.len()
        )));
    }

    let score = (correct * 100 / config.questions.len()) as u32;

    Ok(EvaluatedSubmission {
        data: SubmissionData::Quiz(QuizSubmission { answers: submission.answers, score: Some(score) }),
        quiz_score: Some(score),
        passed: score >= config.min_score,
    })
}

fn check_text(config: &TextConfig, submission: &TextSubmission) -> Result<(), GamificationError> {
    let text = submission.text.trim();
    if text.is_empty() {
        return Err(GamificationError::Validation("text must not be empty".into()));
    }
    let length = text.chars().count();
    if length > config.max_length as usize {
        return Err(GamificationError::Validation(format!(
            "text is {} characters long, the limit is {}",
            length, config.max_length
        )));
    }
    Ok(())
}

fn check_qrcode(config: &QrCodeConfig, submission: &QrCodeSubmission) -> Result<(), GamificationError> {
    if submission.scanned_data.trim() != config.qr_code_data.trim() {
        return Err(GamificationError::Validation("Scanned QR code does not match this challenge".into()));
    }
    Ok(())
}

fn check_files(config: &FileConfig, mut submission: FileSubmission) -> Result<FileSubmission, GamificationError> {
    if submission.files.len() > config.max_files as usize {
        return Err(GamificationError::Validation(format!(
            "{} items submitted, at most {} allowed",
            submission.files.len(),
            config.max_files
        )));
    }

    let mut per_requirement: HashMap<&str, usize> = HashMap::new();

    for file in &mut submission.files {
        let requirement = config.requirement(&file.requirement_id).ok_or_else(|| {
            GamificationError::Validation(format!("Unknown file requirement '{}'", file.requirement_id))
        })?;
        file.submission_type = requirement.submission_type;

        if file.url.trim().is_empty() {
            return Err(GamificationError::Validation(format!(
                "Item for '{}' has no url",
                requirement.name
            )));
        }

        match requirement.submission_type {
            RequirementKind::Link => {
                let url = file.url.trim().to_ascii_lowercase();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(GamificationError::Validation(format!(
                        "'{}' expects an http(s) link",
                        requirement.name
                    )));
                }
            }
            RequirementKind::File => {
                if let Some(max) = requirement.max_size {
                    match file.size {
                        Some(size) if size > max => {
                            return Err(GamificationError::Validation(format!(
                                "File for '{}' is {} bytes, the limit is {}",
                                requirement.name, size, max
                            )))
                        }
                        Some(_) => {}
                        None => {
                            return Err(GamificationError::Validation(format!(
                                "File for '{}' was not found in storage, upload it first",
                                requirement.name
                            )))
                        }
                    }
                }
                if !requirement.accepts(file.content_type.as_deref(), file.name.as_deref()) {
                    return Err(GamificationError::Validation(format!(
                        "File type not accepted for '{}'",
                        requirement.name
                    )));
                }
            }
        }
    }

    for file in &submission.files {
        *per_requirement.entry(file.requirement_id.as_str()).or_default() += 1;
    }

    for requirement in &config.file_requirements {
        let count = per_requirement.get(requirement.id.as_str()).copied().unwrap_or(0);
        if count == 0 {
            return Err(GamificationError::Validation(format!(
                "'{}' is required",
                requirement.name
            )));
        }
        if count > 1 && !requirement.allow_multiple {
            return Err(GamificationError::Validation(format!(
                "'{}' accepts a single item, {} given",
                requirement.name, count
            )));
        }
    }

    Ok(submission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::config::{FileRequirement, QuizQuestion};

    fn quiz_config() -> EvaluationConfig {
        EvaluationConfig::Quiz(QuizConfig {
            questions: vec![
                QuizQuestion {
                    id: "q1".into(),
                    question: "Capital of France?".into(),
                    options: vec!["Lyon".into(), "Paris".into()],
                    correct_answer: Some(1),
                },
                QuizQuestion {
                    id: "q2".into(),
                    question: "2 + 2?".into(),
                    options: vec!["4".into(), "5".into()],
                    correct_answer: Some(0),
                },
            ],
            min_score: 60,
            allow_multiple_attempts: true,
            max_attempts: 2,
            score_reduction_per_attempt: 0,
        })
    }

    fn file_config(allow_multiple: bool) -> EvaluationConfig {
        EvaluationConfig::File(FileConfig {
            file_requirements: vec![
                FileRequirement {
                    id: "photo".into(),
                    name: "Photo".into(),
                    points: 60,
                    accepted_types: vec!["image/*".into()],
                    file_category: None,
                    max_size: Some(1_000),
                    submission_type: RequirementKind::File,
                    allow_multiple,
                },
                FileRequirement {
                    id: "post".into(),
                    name: "Post link".into(),
                    points: 40,
                    accepted_types: vec![],
                    file_category: None,
                    max_size: None,
                    submission_type: RequirementKind::Link,
                    allow_multiple: false,
                },
            ],
            max_files: 3,
        })
    }

    fn photo(url: &str, size: u64) -> SubmittedFile {
        SubmittedFile {
            requirement_id: "photo".into(),
            url: url.into(),
            name: Some("photo.png".into()),
            size: Some(size),
            content_type: Some("image/png".into()),
            submission_type: RequirementKind::Link,
        }
    }

    fn link(url: &str) -> SubmittedFile {
        SubmittedFile {
            requirement_id: "post".into(),
            url: url.into(),
            name: None,
            size: None,
            content_type: None,
            submission_type: RequirementKind::File,
        }
    }

    fn answers(pairs: &[(&str, usize)]) -> SubmissionData {
        SubmissionData::Quiz(QuizSubmission {
            answers: pairs
                .iter()
                .map(|(id, opt)| QuizAnswer { question_id: id.to_string(), selected_option: *opt })
                .collect(),
            score: None,
        })
    }

    #[test]
    fn test_quiz_is_scored_server_side() {
        let config = quiz_config();

        let full = evaluate_submission(EvaluationType::Quiz, Some(&config), answers(&[("q1", 1), ("q2", 0)])).unwrap();
        assert_eq!(full.quiz_score, Some(100));
        assert!(full.passed);

        let half = evaluate_submission(EvaluationType::Quiz, Some(&config), answers(&[("q1", 0), ("q2", 0)])).unwrap();
        assert_eq!(half.quiz_score, Some(50));
        assert!(!half.passed);
    }

    #[test]
    fn test_quiz_requires_every_question() {
        let config = quiz_config();
        let result = evaluate_submission(EvaluationType::Quiz, Some(&config), answers(&[("q1", 1)]));
        assert!(matches!(result, Err(GamificationError::Validation(_))));

        let result = evaluate_submission(EvaluationType::Quiz, Some(&config), answers(&[("q1", 1), ("q1", 1)]));
        assert!(matches!(result, Err(GamificationError::Validation(_))));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let config = quiz_config();
        let data = SubmissionData::Text(TextSubmission { text: "hello".into() });
        assert!(matches!(
            evaluate_submission(EvaluationType::Quiz, Some(&config), data),
            Err(GamificationError::Validation(_))
        ));
    }

    #[test]
    fn test_text_length_limit() {
        let config = EvaluationConfig::Text(TextConfig { placeholder: None, max_length: 5 });

        let ok = SubmissionData::Text(TextSubmission { text: "  hello  ".into() });
        let evaluated = evaluate_submission(EvaluationType::Text, Some(&config), ok).unwrap();
        assert_eq!(evaluated.data, SubmissionData::Text(TextSubmission { text: "hello".into() }));

        let long = SubmissionData::Text(TextSubmission { text: "hello!".into() });
        assert!(evaluate_submission(EvaluationType::Text, Some(&config), long).is_err());

        let blank = SubmissionData::Text(TextSubmission { text: "   ".into() });
        assert!(evaluate_submission(EvaluationType::Text, Some(&config), blank).is_err());
    }

    #[test]
    fn test_qrcode_must_match() {
        let config = EvaluationConfig::Qrcode(QrCodeConfig {
            qr_code_data: "EVENT-2026".into(),
            qr_code_image: None,
            instructions: None,
        });

        let good = SubmissionData::Qrcode(QrCodeSubmission { scanned_data: " EVENT-2026\n".into() });
        assert!(evaluate_submission(EvaluationType::Qrcode, Some(&config), good).is_ok());

        let bad = SubmissionData::Qrcode(QrCodeSubmission { scanned_data: "EVENT-2025".into() });
        assert!(evaluate_submission(EvaluationType::Qrcode, Some(&config), bad).is_err());
    }

    #[test]
    fn test_file_submission_copies_requirement_kind() {
        let config = file_config(false);
        let data = SubmissionData::File(FileSubmission {
            files: vec![photo("http://store/files/abc", 500), link("https://social.example/post/1")],
        });

        let evaluated = evaluate_submission(EvaluationType::File, Some(&config), data).unwrap();
        assert_eq!(evaluated.data.stored_file_urls(), vec!["http://store/files/abc".to_string()]);
    }

    #[test]
    fn test_file_single_item_requirement() {
        let data = SubmissionData::File(FileSubmission {
            files: vec![
                photo("http://store/files/a", 10),
                photo("http://store/files/b", 10),
                link("https://social.example/post/1"),
            ],
        });

        assert!(evaluate_submission(EvaluationType::File, Some(&file_config(false)), data.clone()).is_err());
        assert!(evaluate_submission(EvaluationType::File, Some(&file_config(true)), data).is_ok());
    }

    #[test]
    fn test_file_rules() {
        let config = file_config(true);

        let too_big = SubmissionData::File(FileSubmission {
            files: vec![photo("http://store/files/a", 5_000), link("https://social.example/p")],
        });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), too_big).is_err());

        let missing = SubmissionData::File(FileSubmission { files: vec![photo("http://store/files/a", 10)] });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), missing).is_err());

        let bad_link = SubmissionData::File(FileSubmission {
            files: vec![photo("http://store/files/a", 10), link("ftp://example/p")],
        });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), bad_link).is_err());

        let unknown = SubmissionData::File(FileSubmission {
            files: vec![SubmittedFile { requirement_id: "nope".into(), ..photo("http://store/files/a", 10) }],
        });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), unknown).is_err());

        let too_many = SubmissionData::File(FileSubmission {
            files: vec![
                photo("http://store/files/a", 10),
                photo("http://store/files/b", 10),
                photo("http://store/files/c", 10),
                link("https://social.example/p"),
            ],
        });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), too_many).is_err());
    }

    #[test]
    fn test_unknown_size_fails_max_size() {
        let config = file_config(false);
        let mut unverified = photo("https://elsewhere.example/big.png", 10);
        unverified.attach_stored(None);
        assert_eq!(unverified.size, None);

        let data = SubmissionData::File(FileSubmission {
            files: vec![unverified, link("https://social.example/p")],
        });
        assert!(matches!(
            evaluate_submission(EvaluationType::File, Some(&config), data),
            Err(GamificationError::Validation(_))
        ));
    }

    #[test]
    fn test_stored_facts_override_declared_ones() {
        let config = file_config(false);
        // Declared as a small png, stored as a pdf
        let mut file = photo("http://store/files/a", 10);
        file.attach_stored(Some(ObjectInfo {
            size_bytes: 800,
            content_type: Some("application/pdf".into()),
            file_name: Some("cv.pdf".into()),
        }));
        assert_eq!(file.size, Some(800));

        let data = SubmissionData::File(FileSubmission { files: vec![file, link("https://social.example/p")] });
        assert!(evaluate_submission(EvaluationType::File, Some(&config), data).is_err());
    }

    #[test]
    fn test_payload_decodes_from_tagged_json() {
        let data: SubmissionData = serde_json::from_value(serde_json::json!({
            "type": "qrcode",
            "scannedData": "EVENT-2026"
        }))
        .unwrap();
        assert_eq!(data.evaluation_type(), EvaluationType::Qrcode);

        let none: SubmissionData = serde_json::from_value(serde_json::json!({ "type": "none" })).unwrap();
        assert_eq!(none, SubmissionData::None);
    }
}
