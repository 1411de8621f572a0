use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::evaluator::{evaluate, normalize, RawSelection, Selection};
use crate::models::{AttemptConfig, CorrectAnswer, Question, QuestionSet};
use crate::queue::SessionQueue;
use crate::shuffle::build_presentation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Active,
    Completed,
}

/// One entry of the append-only answer log, in canonical option space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selected_option: Selection,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub is_correct: bool,
    pub correct_answer: CorrectAnswer,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReview {
    pub question: Question,
    pub answers: Vec<SubmittedAnswer>,
    pub first_try_correct: bool,
    pub ever_correct: bool,
}

/// One student's run over a question set. Scoring state lives here; what to
/// present next lives in the [`SessionQueue`] built alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: String,
    pub question_set_id: i64,
    pub config: AttemptConfig,
    pub question_ids: Vec<String>,
    pub total_questions: usize,
    pub correct_count: usize,
    pub is_completed: bool,
    pub score: Option<u8>,
    pub time_taken: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub submitted_answers: Vec<SubmittedAnswer>,
}

/// `min(100, round(correct / total * 100))`, rounding halves up.
pub fn compute_score(correct_count: usize, total_questions: usize) -> u8 {
    if total_questions == 0 {
        return 0;
    }
    let rounded = (200 * correct_count + total_questions) / (2 * total_questions);
    rounded.min(100) as u8
}

/// Questions whose latest answer in `prior` was wrong, in catalog order.
/// Ties on `answered_at` go to the later log entry.
pub fn missed_questions<'a>(set: &'a QuestionSet, prior: &Attempt) -> Vec<&'a Question> {
    let mut latest: HashMap<&str, (DateTime<Utc>, bool)> = HashMap::new();
    for answer in &prior.submitted_answers {
        match latest.get(answer.question_id.as_str()) {
            Some((at, _)) if *at > answer.answered_at => {}
            _ => {
                latest.insert(answer.question_id.as_str(), (answer.answered_at, answer.is_correct));
            }
        }
    }
    set.ordered_questions()
        .into_iter()
        .filter(|q| matches!(latest.get(q.id.as_str()), Some((_, false))))
        .collect()
}

impl Attempt {
    /// Starts a new attempt. In practice mode a completed `prior` attempt narrows
    /// the questions to the ones last answered wrong; if there are none, the
    /// whole set is used.
    pub fn create<R: Rng + ?Sized>(
        set: &QuestionSet,
        user_id: &str,
        config: AttemptConfig,
        prior: Option<&Attempt>,
        rng: &mut R,
    ) -> Result<(Attempt, SessionQueue), EngineError> {
        if set.questions.is_empty() {
            return Err(EngineError::EmptyQuestionSet);
        }

        let mut questions = Vec::new();
        if config.practice_mode {
            if let Some(prior) = prior.filter(|p| p.is_completed && p.question_set_id == set.id) {
                questions = missed_questions(set, prior);
                debug!(
                    "practice attempt seeded with {} missed questions from {}",
                    questions.len(),
                    prior.id
                );
            }
        }
        if questions.is_empty() {
            questions = set.ordered_questions();
        }

        let items = build_presentation(&questions, &config, rng);
        let queue = SessionQueue::new(items);
        let attempt = Attempt {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            question_set_id: set.id,
            config,
            question_ids: questions.iter().map(|q| q.id.clone()).collect(),
            total_questions: queue.total_questions(),
            correct_count: 0,
            is_completed: false,
            score: None,
            time_taken: None,
            started_at: Utc::now(),
            completed_at: None,
            submitted_answers: Vec::new(),
        };
        info!(
            "attempt {} started by {} on set {} with {} questions",
            attempt.id, attempt.user_id, attempt.question_set_id, attempt.total_questions
        );
        Ok((attempt, queue))
    }

    pub fn status(&self) -> AttemptStatus {
        if self.is_completed {
            AttemptStatus::Completed
        } else {
            AttemptStatus::Active
        }
    }

    pub fn covers(&self, question_id: &str) -> bool {
        self.question_ids.iter().any(|id| id == question_id)
    }

    fn has_correct_answer(&self, question_id: &str) -> bool {
        self.submitted_answers
            .iter()
            .any(|a| a.question_id == question_id && a.is_correct)
    }

    /// Evaluates and logs one submission. Only the first correct submission of a
    /// question counts towards `correct_count`.
    pub fn submit_answer(
        &mut self,
        set: &QuestionSet,
        question_id: &str,
        submitted: &RawSelection,
    ) -> Result<SubmissionOutcome, EngineError> {
        if self.is_completed {
            return Err(EngineError::AlreadyCompleted);
        }
        let question = set
            .question(question_id)
            .filter(|q| self.covers(&q.id))
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?;
        let selection = normalize(question, submitted)?;
        let is_correct = evaluate(&question.correct_answer, &selection);

        if is_correct && !self.has_correct_answer(question_id) {
            self.correct_count += 1;
        }
        self.submitted_answers.push(SubmittedAnswer {
            question_id: question_id.to_string(),
            selected_option: selection,
            is_correct,
            answered_at: Utc::now(),
        });
        debug!(
            "attempt {} question {} answered (correct: {}, count: {})",
            self.id, question_id, is_correct, self.correct_count
        );

        Ok(SubmissionOutcome {
            is_correct,
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
        })
    }

    pub fn complete(&mut self, time_taken: u64) -> Result<(), EngineError> {
        if self.is_completed {
            return Err(EngineError::AlreadyCompleted);
        }
        self.score = Some(compute_score(self.correct_count, self.total_questions));
        self.time_taken = Some(time_taken);
        self.completed_at = Some(Utc::now());
        self.is_completed = true;
        info!(
            "attempt {} completed: {}/{} correct, score {:?}",
            self.id, self.correct_count, self.total_questions, self.score
        );
        Ok(())
    }

    /// Seconds left before the timed-mode limit, if one applies.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let limit = self.config.time_limit()?;
        let elapsed = (now - self.started_at).num_seconds().max(0) as u64;
        Some(limit.saturating_sub(elapsed))
    }

    /// Per-question breakdown of a completed attempt, in catalog order.
    pub fn review(&self, set: &QuestionSet) -> Result<Vec<QuestionReview>, EngineError> {
        if !self.is_completed {
            return Err(EngineError::NotCompleted);
        }
        let answered: HashSet<&str> = self
            .submitted_answers
            .iter()
            .map(|a| a.question_id.as_str())
            .collect();
        Ok(set
            .ordered_questions()
            .into_iter()
            .filter(|q| answered.contains(q.id.as_str()))
            .map(|q| {
                let answers: Vec<SubmittedAnswer> = self
                    .submitted_answers
                    .iter()
                    .filter(|a| a.question_id == q.id)
                    .cloned()
                    .collect();
                QuestionReview {
                    question: q.clone(),
                    first_try_correct: answers.first().map(|a| a.is_correct).unwrap_or(false),
                    ever_correct: answers.iter().any(|a| a.is_correct),
                    answers,
                }
            })
            .collect())
    }
}
