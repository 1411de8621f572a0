use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::evaluator::Selection;
use crate::models::{AttemptConfig, CorrectAnswer, Question, QuestionType};

/// One question as presented in one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresentationItem {
    pub question_id: String,
    pub question_type: QuestionType,
    pub display_options: Vec<String>,
    /// `option_mapping[display_position] == canonical_position`.
    pub option_mapping: Vec<usize>,
    pub display_correct_answer: CorrectAnswer,
    /// 1-based first-pass position; retries keep the original's value.
    pub display_index: usize,
    pub is_retry: bool,
}

impl PresentationItem {
    /// Maps a selection made in display space back to canonical indices.
    pub fn to_canonical(&self, display: &Selection) -> Option<Selection> {
        match display {
            Selection::Single(idx) => self.option_mapping.get(*idx).copied().map(Selection::Single),
            Selection::Multiple(set) => set
                .iter()
                .map(|idx| self.option_mapping.get(*idx).copied())
                .collect::<Option<_>>()
                .map(Selection::Multiple),
        }
    }
}

/// Display position of a canonical option index.
fn display_position(mapping: &[usize], canonical: usize) -> Option<usize> {
    mapping.iter().position(|c| *c == canonical)
}

fn remap_correct(correct: &CorrectAnswer, mapping: &[usize]) -> CorrectAnswer {
    let inverse = |canonical: usize| display_position(mapping, canonical).unwrap_or(canonical);
    match correct {
        CorrectAnswer::Single(idx) => CorrectAnswer::Single(inverse(*idx)),
        CorrectAnswer::Multiple(indices) => {
            let mut display: Vec<usize> = indices.iter().map(|idx| inverse(*idx)).collect();
            display.sort_unstable();
            CorrectAnswer::Multiple(display)
        }
    }
}

fn present<R: Rng + ?Sized>(question: &Question, display_index: usize, shuffle_options: bool, rng: &mut R) -> PresentationItem {
    let mut mapping: Vec<usize> = (0..question.options.len()).collect();
    if shuffle_options {
        mapping.shuffle(rng);
    }
    let display_options = mapping.iter().map(|c| question.options[*c].clone()).collect();
    let display_correct_answer = if shuffle_options {
        remap_correct(&question.correct_answer, &mapping)
    } else {
        question.correct_answer.clone()
    };
    PresentationItem {
        question_id: question.id.clone(),
        question_type: question.question_type,
        display_options,
        option_mapping: mapping,
        display_correct_answer,
        display_index,
        is_retry: false,
    }
}

/// Builds the first-pass presentation order for `questions`, which are given in
/// canonical order.
pub fn build_presentation<R: Rng + ?Sized>(
    questions: &[&Question],
    config: &AttemptConfig,
    rng: &mut R,
) -> Vec<PresentationItem> {
    let mut ordered: Vec<&Question> = questions.to_vec();
    if config.shuffle_questions {
        ordered.shuffle(rng);
    }
    ordered
        .into_iter()
        .enumerate()
        .map(|(pos, question)| present(question, pos + 1, config.shuffle_options, rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::{multiple, single};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn shuffled_config() -> AttemptConfig {
        AttemptConfig {
            shuffle_questions: true,
            shuffle_options: true,
            ..AttemptConfig::default()
        }
    }

    fn sample_questions() -> Vec<Question> {
        vec![
            single("q1", &["A", "B", "C", "D"], 2),
            multiple("q2", &["a", "b", "c", "d", "e"], &[0, 3, 4]),
            single("q3", &["yes", "no"], 1),
        ]
    }

    #[test]
    fn unshuffled_is_identity() {
        let questions = sample_questions();
        let refs: Vec<&Question> = questions.iter().collect();
        let items = build_presentation(&refs, &AttemptConfig::default(), &mut StdRng::seed_from_u64(1));
        for (pos, (item, q)) in items.iter().zip(&questions).enumerate() {
            assert_eq!(item.question_id, q.id);
            assert_eq!(item.display_index, pos + 1);
            assert_eq!(item.option_mapping, (0..q.options.len()).collect::<Vec<_>>());
            assert_eq!(item.display_options, q.options);
            assert_eq!(item.display_correct_answer, q.correct_answer);
            assert!(!item.is_retry);
        }
    }

    #[test]
    fn option_mapping_is_a_bijection_that_rebuilds_options() {
        let questions = sample_questions();
        let refs: Vec<&Question> = questions.iter().collect();
        for seed in 0..200 {
            let items = build_presentation(&refs, &shuffled_config(), &mut StdRng::seed_from_u64(seed));
            for item in &items {
                let q = questions.iter().find(|q| q.id == item.question_id).unwrap();
                let mut sorted = item.option_mapping.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, (0..q.options.len()).collect::<Vec<_>>());

                let mut rebuilt = vec![String::new(); q.options.len()];
                for (display, canonical) in item.option_mapping.iter().enumerate() {
                    rebuilt[*canonical] = item.display_options[display].clone();
                }
                assert_eq!(rebuilt, q.options);
            }
        }
    }

    #[test]
    fn display_correct_answer_round_trips() {
        let questions = sample_questions();
        let refs: Vec<&Question> = questions.iter().collect();
        for seed in 0..200 {
            let items = build_presentation(&refs, &shuffled_config(), &mut StdRng::seed_from_u64(seed));
            for item in &items {
                let q = questions.iter().find(|q| q.id == item.question_id).unwrap();
                let back: Vec<usize> = item
                    .display_correct_answer
                    .indices()
                    .into_iter()
                    .map(|display| item.option_mapping[display])
                    .collect();
                let mut expected = q.correct_answer.indices();
                let mut back_sorted = back;
                back_sorted.sort_unstable();
                expected.sort_unstable();
                assert_eq!(back_sorted, expected);
                assert_eq!(item.display_correct_answer.question_type(), q.question_type);
            }
        }
    }

    #[test]
    fn shuffled_questions_get_first_pass_display_indices() {
        let questions = sample_questions();
        let refs: Vec<&Question> = questions.iter().collect();
        let mut saw_reorder = false;
        for seed in 0..50 {
            let items = build_presentation(&refs, &shuffled_config(), &mut StdRng::seed_from_u64(seed));
            let indices: Vec<usize> = items.iter().map(|i| i.display_index).collect();
            assert_eq!(indices, vec![1, 2, 3]);
            let order: Vec<&str> = items.iter().map(|i| i.question_id.as_str()).collect();
            saw_reorder |= order != ["q1", "q2", "q3"];
        }
        assert!(saw_reorder);
    }

    #[test]
    fn to_canonical_follows_mapping() {
        let q = multiple("m", &["a", "b", "c"], &[0, 2]);
        let item = PresentationItem {
            question_id: q.id.clone(),
            question_type: q.question_type,
            display_options: vec!["c".into(), "a".into(), "b".into()],
            option_mapping: vec![2, 0, 1],
            display_correct_answer: remap_correct(&q.correct_answer, &[2, 0, 1]),
            display_index: 1,
            is_retry: false,
        };
        assert_eq!(item.display_correct_answer.indices(), vec![0, 1]);
        let display = Selection::Multiple([0, 1].into_iter().collect());
        assert_eq!(item.to_canonical(&display), Some(Selection::Multiple([0, 2].into_iter().collect())));
        assert_eq!(item.to_canonical(&Selection::Single(5)), None);
        assert_eq!(display_position(&item.option_mapping, 0), Some(1));
        assert_eq!(display_position(&item.option_mapping, 7), None);
    }
}
