use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multiple,
}

/// Correct answer in canonical option space. Serialized as a bare index or an
/// array of indices. Multi-select indices are kept as authored so that
/// duplicates reach validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CorrectAnswer {
    Single(usize),
    Multiple(Vec<usize>),
}

impl CorrectAnswer {
    pub fn question_type(&self) -> QuestionType {
        match self {
            CorrectAnswer::Single(_) => QuestionType::Single,
            CorrectAnswer::Multiple(_) => QuestionType::Multiple,
        }
    }

    /// Sorted, distinct indices.
    pub fn indices(&self) -> Vec<usize> {
        self.index_set().into_iter().collect()
    }

    pub fn index_set(&self) -> BTreeSet<usize> {
        match self {
            CorrectAnswer::Single(idx) => BTreeSet::from([*idx]),
            CorrectAnswer::Multiple(indices) => indices.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(rename = "questionText")]
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: CorrectAnswer,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passage_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_block: Option<String>,
    #[serde(default)]
    pub order_index: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuizMode {
    Toeic,
    School,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSet {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mode: QuizMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Questions in authored order.
    pub fn ordered_questions(&self) -> Vec<&Question> {
        let mut questions: Vec<&Question> = self.questions.iter().collect();
        questions.sort_by_key(|q| q.order_index);
        questions
    }
}

/// Question as shown before answering: no correct answer, no explanation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    pub question_text: String,
    pub options: Vec<String>,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passage_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_block: Option<String>,
    pub order_index: i32,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_text: q.text.clone(),
            options: q.options.clone(),
            question_type: q.question_type,
            passage_text: q.passage_text.clone(),
            code_block: q.code_block.clone(),
            order_index: q.order_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ShowAnswerMode {
    #[default]
    Immediate,
    AfterSubmit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct AttemptConfig {
    pub practice_mode: bool,
    pub timed_mode: bool,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 86400))]
    pub custom_time_limit: Option<u64>,
    pub auto_advance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 60))]
    pub auto_advance_time: Option<u64>,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_answer_mode: ShowAnswerMode,
}

impl AttemptConfig {
    /// Time limit in force for this attempt, if any.
    pub fn time_limit(&self) -> Option<u64> {
        if self.timed_mode {
            self.custom_time_limit
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

pub fn validate_question_set(set: &QuestionSet) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if set.title.trim().is_empty() {
        issues.push(ValidationIssue {
            field: "title".into(),
            issue: "must not be empty".into(),
        });
    }
    if set.questions.is_empty() {
        issues.push(ValidationIssue {
            field: "questions".into(),
            issue: "must contain at least one question".into(),
        });
    }

    let mut question_ids = HashSet::new();
    for (i, q) in set.questions.iter().enumerate() {
        if q.id.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must not be empty".into(),
            });
        }
        if !question_ids.insert(q.id.clone()) {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].id"),
                issue: "must be unique".into(),
            });
        }
        if q.text.trim().is_empty() {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].questionText"),
                issue: "must not be empty".into(),
            });
        }
        if q.options.len() < 2 {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].options"),
                issue: "must contain at least 2 options".into(),
            });
        }
        if q.correct_answer.question_type() != q.question_type {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].correctAnswer"),
                issue: "must match question type".into(),
            });
        }
        if set.mode == QuizMode::Toeic && q.question_type == QuestionType::Multiple {
            issues.push(ValidationIssue {
                field: format!("questions[{i}].questionType"),
                issue: "toeic sets only support single choice".into(),
            });
        }
        if let CorrectAnswer::Multiple(indices) = &q.correct_answer {
            if indices.is_empty() {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].correctAnswer"),
                    issue: "must not be empty".into(),
                });
            }
            let mut seen = HashSet::new();
            if let Some(dup) = indices.iter().find(|idx| !seen.insert(**idx)) {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].correctAnswer"),
                    issue: format!("index {dup} is listed more than once"),
                });
            }
        }
        for idx in q.correct_answer.indices() {
            if idx >= q.options.len() {
                issues.push(ValidationIssue {
                    field: format!("questions[{i}].correctAnswer"),
                    issue: format!("index {idx} must reference an existing option"),
                });
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
