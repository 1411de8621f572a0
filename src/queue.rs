use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error};

use crate::error::EngineError;
use crate::shuffle::PresentationItem;

/// A retry is placed after at least this many unvisited items, unless fewer remain.
pub const RETRY_MIN_GAP: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResult {
    pub done: bool,
    /// Queue index the retry item was inserted at, if one was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_position: Option<usize>,
}

/// Ordered presentation queue for one attempt.
///
/// Items before `cursor` have been presented and left; the item at `cursor`
/// is on screen. Practice-mode retries are only ever inserted after the
/// cursor, so the visited prefix never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQueue {
    items: Vec<PresentationItem>,
    cursor: usize,
    mastered: BTreeSet<String>,
    total_questions: usize,
}

impl SessionQueue {
    pub fn new(items: Vec<PresentationItem>) -> Self {
        let total_questions = items
            .iter()
            .map(|item| item.question_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        Self {
            items,
            cursor: 0,
            mastered: BTreeSet::new(),
            total_questions,
        }
    }

    pub fn current(&self) -> Result<&PresentationItem, EngineError> {
        self.items.get(self.cursor).ok_or(EngineError::OutOfRange {
            cursor: self.cursor,
            len: self.items.len(),
        })
    }

    pub fn items(&self) -> &[PresentationItem] {
        &self.items
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total_questions(&self) -> usize {
        self.total_questions
    }

    pub fn is_mastered(&self, question_id: &str) -> bool {
        self.mastered.contains(question_id)
    }

    pub fn mastered_count(&self) -> usize {
        self.mastered.len()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.items.len()
    }

    /// Items already presented and left behind.
    pub fn presented_count(&self) -> usize {
        self.cursor.min(self.items.len())
    }

    /// Unvisited items, the current one included.
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.cursor)
    }

    /// Leaves the current item. In practice mode a missed, not yet mastered
    /// question is requeued further down before the cursor moves.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        was_correct: bool,
        practice_mode: bool,
        rng: &mut R,
    ) -> Result<AdvanceResult, EngineError> {
        let current = self.current()?.clone();
        let already_mastered = self.mastered.contains(&current.question_id);
        let needs_retry = practice_mode && !was_correct && !already_mastered;
        let mastered_after = self.mastered.len() + usize::from(was_correct && !already_mastered);

        if practice_mode
            && !needs_retry
            && self.cursor + 1 == self.items.len()
            && mastered_after < self.total_questions
        {
            error!(
                "practice queue stuck at {} with {}/{} mastered",
                self.cursor, mastered_after, self.total_questions
            );
            return Err(EngineError::QueueStuck {
                mastered: mastered_after,
                total: self.total_questions,
            });
        }

        if was_correct {
            self.mastered.insert(current.question_id.clone());
        }

        let retry_position = if needs_retry {
            let retry = PresentationItem {
                is_retry: true,
                ..current
            };
            Some(self.insert_retry(retry, rng))
        } else {
            None
        };

        self.cursor += 1;
        let done = self.cursor >= self.items.len();
        debug!(
            "queue advanced to {} of {} (done: {}, retry: {:?})",
            self.cursor,
            self.items.len(),
            done,
            retry_position
        );
        Ok(AdvanceResult { done, retry_position })
    }

    fn insert_retry<R: Rng + ?Sized>(&mut self, retry: PresentationItem, rng: &mut R) -> usize {
        let tail = self.items.len() - self.cursor - 1;
        let skip = if tail == 0 {
            0
        } else {
            let min_gap = RETRY_MIN_GAP.min(tail);
            rng.gen_range(min_gap..=tail)
        };
        let position = self.cursor + 1 + skip;
        self.items.insert(position, retry);
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::school_set;
    use crate::models::{AttemptConfig, Question};
    use crate::shuffle::build_presentation;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn queue_of(n: usize) -> SessionQueue {
        let set = school_set(n);
        let refs: Vec<&Question> = set.questions.iter().collect();
        let items = build_presentation(&refs, &AttemptConfig::default(), &mut StdRng::seed_from_u64(0));
        SessionQueue::new(items)
    }

    #[test]
    fn non_practice_walks_each_item_once() {
        let mut queue = queue_of(3);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(queue.current().unwrap().question_id, "q1");
        assert!(!queue.advance(false, false, &mut rng).unwrap().done);
        assert!(!queue.advance(true, false, &mut rng).unwrap().done);
        let last = queue.advance(false, false, &mut rng).unwrap();
        assert!(last.done);
        assert_eq!(last.retry_position, None);
        assert!(queue.is_finished());
        assert_eq!(queue.mastered_count(), 1);
        assert!(matches!(queue.current(), Err(EngineError::OutOfRange { cursor: 3, len: 3 })));
        assert!(queue.advance(true, false, &mut rng).is_err());
    }

    #[test]
    fn empty_queue_has_no_current_item() {
        let queue = SessionQueue::new(Vec::new());
        assert!(matches!(queue.current(), Err(EngineError::OutOfRange { cursor: 0, len: 0 })));
        assert_eq!(queue.total_questions(), 0);
    }

    #[test]
    fn wrong_then_right_presents_each_question_twice() {
        let mut queue = queue_of(3);
        let mut rng = StdRng::seed_from_u64(11);
        let mut presented = Vec::new();
        loop {
            let item = queue.current().unwrap().clone();
            let correct = item.is_retry;
            presented.push(item);
            if queue.advance(correct, true, &mut rng).unwrap().done {
                break;
            }
        }
        assert_eq!(presented.len(), 6);
        assert_eq!(queue.mastered_count(), 3);
        assert_eq!(queue.total_questions(), 3);
        let retries: Vec<_> = presented.iter().filter(|i| i.is_retry).collect();
        assert_eq!(retries.len(), 3);
        for retry in retries {
            let original = presented
                .iter()
                .find(|i| !i.is_retry && i.question_id == retry.question_id)
                .unwrap();
            assert_eq!(retry.display_index, original.display_index);
        }
    }

    #[test]
    fn retry_keeps_minimum_gap_after_every_insertion() {
        for seed in 0..300 {
            let mut queue = queue_of(8);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut steps = 0;
            loop {
                steps += 1;
                assert!(steps < 500, "practice traversal did not terminate");
                let tail_before = queue.items().len() - queue.cursor() - 1;
                let cursor = queue.cursor();
                let correct = rng.gen_bool(0.4);
                let result = queue.advance(correct, true, &mut rng).unwrap();
                if let Some(position) = result.retry_position {
                    let skipped = position - cursor - 1;
                    assert!(skipped >= RETRY_MIN_GAP.min(tail_before));
                    assert!(skipped <= tail_before);
                    assert!(queue.items()[position].is_retry);
                }
                if result.done {
                    break;
                }
            }
            assert_eq!(queue.mastered_count(), 8);
        }
    }

    #[test]
    fn short_tail_appends_retry() {
        let mut queue = queue_of(2);
        let mut rng = StdRng::seed_from_u64(5);
        let result = queue.advance(false, true, &mut rng).unwrap();
        assert_eq!(result.retry_position, Some(2));
        assert_eq!(queue.items().len(), 3);
        // q2 missed with only q1's retry left: goes to the end
        let result = queue.advance(false, true, &mut rng).unwrap();
        assert_eq!(result.retry_position, Some(3));
        assert!(!result.done);
    }

    #[test]
    fn mastered_question_is_not_requeued() {
        let mut queue = queue_of(4);
        let mut rng = StdRng::seed_from_u64(9);
        queue.advance(false, true, &mut rng).unwrap();
        let len = queue.items().len();
        // q2 right, q3 right, q4 right, then retry of q1 answered right
        while !queue.advance(true, true, &mut rng).unwrap().done {}
        assert_eq!(queue.items().len(), len);
        assert!(queue.is_mastered("q1"));
    }

    #[test]
    fn stuck_practice_queue_is_an_error_without_mutation() {
        let mut queue = queue_of(2);
        let mut rng = StdRng::seed_from_u64(2);
        // q1 missed outside practice mode, so nothing requeued it
        queue.advance(false, false, &mut rng).unwrap();
        let err = queue.advance(true, true, &mut rng).unwrap_err();
        assert_eq!(err, EngineError::QueueStuck { mastered: 1, total: 2 });
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.mastered_count(), 0);
    }
}
