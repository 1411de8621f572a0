use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::attempt::{compute_score, Attempt, SubmissionOutcome};
use crate::error::EngineError;
use crate::evaluator::{normalize, RawSelection};
use crate::models::{AttemptConfig, CorrectAnswer, QuestionSet, QuestionType, ShowAnswerMode};
use crate::queue::SessionQueue;
use crate::shuffle::PresentationItem;

/// Feedback for one submission, in both option spaces.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub question_id: String,
    pub is_correct: bool,
    pub correct_answer: CorrectAnswer,
    pub display_correct_answer: CorrectAnswer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub total: usize,
    pub answered: usize,
    pub percentage: u8,
    pub presented: usize,
    /// Unvisited queue items, the current one included.
    pub remaining: usize,
    pub queue_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentView {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passage_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_block: Option<String>,
    pub display_options: Vec<String>,
    pub option_mapping: Vec<usize>,
    pub display_index: usize,
    pub is_retry: bool,
    pub submitted: bool,
    /// Only present once the item is answered and the mode reveals answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_advance_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitView {
    pub question_id: String,
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextView {
    pub done: bool,
    pub requeued: bool,
    /// Feedback withheld in after-submit mode, revealed on leaving the item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed: Option<Feedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentView>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOutcome {
    question_id: String,
    outcome: SubmissionOutcome,
}

/// The attempt (scoring) and its queue (presentation), driven together.
///
/// The outcome of the item on screen is held until the student moves on, and
/// only then decides whether practice mode requeues the question. This is the
/// same in both answer modes; `after-submit` merely withholds the feedback
/// until that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSession {
    pub attempt: Attempt,
    pub queue: SessionQueue,
    current_outcome: Option<PendingOutcome>,
}

fn feedback_for(item: &PresentationItem, outcome: &SubmissionOutcome) -> Feedback {
    Feedback {
        question_id: item.question_id.clone(),
        is_correct: outcome.is_correct,
        correct_answer: outcome.correct_answer.clone(),
        display_correct_answer: item.display_correct_answer.clone(),
        explanation: outcome.explanation.clone(),
    }
}

impl AttemptSession {
    pub fn start<R: Rng + ?Sized>(
        set: &QuestionSet,
        user_id: &str,
        config: AttemptConfig,
        prior: Option<&Attempt>,
        rng: &mut R,
    ) -> Result<Self, EngineError> {
        let (attempt, queue) = Attempt::create(set, user_id, config, prior, rng)?;
        Ok(Self {
            attempt,
            queue,
            current_outcome: None,
        })
    }

    fn reveals_immediately(&self) -> bool {
        self.attempt.config.show_answer_mode == ShowAnswerMode::Immediate
    }

    fn pending_correct(&self) -> Option<&str> {
        self.current_outcome
            .as_ref()
            .filter(|p| p.outcome.is_correct)
            .map(|p| p.question_id.as_str())
    }

    /// Questions not yet answered correctly during the traversal, counting the
    /// item on screen if it already has a correct answer.
    pub fn unmastered(&self) -> usize {
        let pending = self
            .pending_correct()
            .filter(|id| !self.queue.is_mastered(id))
            .map_or(0, |_| 1);
        self.queue
            .total_questions()
            .saturating_sub(self.queue.mastered_count() + pending)
    }

    pub fn submit(
        &mut self,
        set: &QuestionSet,
        question_id: &str,
        submitted: &RawSelection,
    ) -> Result<SubmitView, EngineError> {
        let outcome = self.attempt.submit_answer(set, question_id, submitted)?;
        let on_screen = self
            .queue
            .current()
            .ok()
            .filter(|item| item.question_id == question_id)
            .cloned();

        if let Some(item) = &on_screen {
            // Once immediate feedback has shown the answer, the item keeps its first outcome.
            let locked = self.reveals_immediately()
                && self
                    .current_outcome
                    .as_ref()
                    .is_some_and(|p| p.question_id == item.question_id);
            if !locked {
                self.current_outcome = Some(PendingOutcome {
                    question_id: question_id.to_string(),
                    outcome,
                });
            }
        }
        let feedback = match (&on_screen, &self.current_outcome) {
            (Some(item), Some(pending)) if self.reveals_immediately() => Some(feedback_for(item, &pending.outcome)),
            _ => None,
        };
        Ok(SubmitView {
            question_id: question_id.to_string(),
            recorded: true,
            feedback,
            progress: self.progress(Utc::now()),
        })
    }

    /// Like [`submit`](Self::submit), with `displayed` indexing the shuffled
    /// options of the item on screen.
    pub fn submit_displayed(
        &mut self,
        set: &QuestionSet,
        question_id: &str,
        displayed: &RawSelection,
    ) -> Result<SubmitView, EngineError> {
        if self.attempt.is_completed {
            return Err(EngineError::AlreadyCompleted);
        }
        let item = self
            .queue
            .current()
            .ok()
            .filter(|item| item.question_id == question_id)
            .ok_or_else(|| EngineError::Validation(format!("question {question_id} is not on screen")))?;
        let question = set
            .question(question_id)
            .ok_or_else(|| EngineError::QuestionNotFound(question_id.to_string()))?;
        let display = normalize(question, displayed)?;
        let canonical = item
            .to_canonical(&display)
            .ok_or_else(|| EngineError::Validation("selection does not match the displayed options".into()))?;
        let raw = RawSelection::Many(canonical.indices().into_iter().map(|idx| idx as i64).collect());
        self.submit(set, question_id, &raw)
    }

    /// Leaves the item on screen. An unanswered item counts as missed.
    pub fn next<R: Rng + ?Sized>(&mut self, set: &QuestionSet, rng: &mut R) -> Result<NextView, EngineError> {
        if self.attempt.is_completed {
            return Err(EngineError::AlreadyCompleted);
        }
        if self.queue.is_finished() {
            return Err(EngineError::QueueFinished);
        }
        let item = self.queue.current()?.clone();
        let was_correct = self.pending_correct().is_some();
        let result = self
            .queue
            .advance(was_correct, self.attempt.config.practice_mode, rng)?;
        let left = self.current_outcome.take();
        debug!(
            "attempt {} left question {} (correct: {}, requeued: {})",
            self.attempt.id,
            item.question_id,
            was_correct,
            result.retry_position.is_some()
        );

        let revealed = if self.reveals_immediately() {
            None
        } else {
            left.map(|p| feedback_for(&item, &p.outcome))
        };
        Ok(NextView {
            done: result.done,
            requeued: result.retry_position.is_some(),
            revealed,
            current: self.current_view(set)?,
            progress: self.progress(Utc::now()),
        })
    }

    /// Practice attempts may only be completed once every question is mastered,
    /// unless the student gives up early (`force`) or the time limit ran out.
    pub fn complete(&mut self, time_taken: u64, force: bool, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.attempt.is_completed {
            return Err(EngineError::AlreadyCompleted);
        }
        let time_up = self.attempt.remaining_seconds(now) == Some(0);
        let remaining = self.unmastered();
        if self.attempt.config.practice_mode && remaining > 0 && !force && !time_up {
            return Err(EngineError::PracticeIncomplete { remaining });
        }
        self.attempt.complete(time_taken)
    }

    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        let total = self.queue.total_questions();
        let answered = if self.reveals_immediately() {
            total - self.unmastered()
        } else {
            self.attempt
                .submitted_answers
                .iter()
                .map(|a| a.question_id.as_str())
                .collect::<BTreeSet<_>>()
                .len()
        };
        let percentage = compute_score(answered, total);
        Progress {
            position: self.queue.current().ok().map(|item| item.display_index),
            total,
            answered,
            percentage,
            presented: self.queue.presented_count(),
            remaining: self.queue.remaining(),
            queue_length: self.queue.items().len(),
            remaining_seconds: self.attempt.remaining_seconds(now),
        }
    }

    /// Snapshot of the item on screen, or `None` once the traversal is over.
    pub fn current_view(&self, set: &QuestionSet) -> Result<Option<CurrentView>, EngineError> {
        let Ok(item) = self.queue.current() else {
            return Ok(None);
        };
        let question = set
            .question(&item.question_id)
            .ok_or_else(|| EngineError::QuestionNotFound(item.question_id.clone()))?;
        let pending = self
            .current_outcome
            .as_ref()
            .filter(|p| p.question_id == item.question_id);
        let feedback = pending
            .filter(|_| self.reveals_immediately())
            .map(|p| feedback_for(item, &p.outcome));
        let config = &self.attempt.config;
        Ok(Some(CurrentView {
            question_id: item.question_id.clone(),
            question_text: question.text.clone(),
            question_type: item.question_type,
            passage_text: question.passage_text.clone(),
            code_block: question.code_block.clone(),
            display_options: item.display_options.clone(),
            option_mapping: item.option_mapping.clone(),
            display_index: item.display_index,
            is_retry: item.is_retry,
            submitted: pending.is_some(),
            feedback,
            auto_advance_seconds: config.auto_advance.then(|| config.auto_advance_time.unwrap_or(3)),
        }))
    }
}
