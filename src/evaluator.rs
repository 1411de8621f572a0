use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::models::{CorrectAnswer, Question, QuestionType};

/// Selection as it arrives from an untyped client: a bare index or an array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawSelection {
    One(i64),
    Many(Vec<i64>),
}

/// Normalized selection, shaped by the question type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Selection {
    Single(usize),
    Multiple(BTreeSet<usize>),
}

impl Selection {
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Selection::Single(idx) => vec![*idx],
            Selection::Multiple(set) => set.iter().copied().collect(),
        }
    }
}

fn checked_index(raw: i64, option_count: usize) -> Result<usize, EngineError> {
    usize::try_from(raw)
        .ok()
        .filter(|idx| *idx < option_count)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "option index {raw} is out of range for {option_count} options"
            ))
        })
}

/// Shapes `raw` after the question type and range-checks every index.
pub fn normalize(question: &Question, raw: &RawSelection) -> Result<Selection, EngineError> {
    let option_count = question.options.len();
    match question.question_type {
        QuestionType::Single => {
            let value = match raw {
                RawSelection::One(v) => *v,
                RawSelection::Many(values) if values.len() == 1 => values[0],
                RawSelection::Many(values) => {
                    return Err(EngineError::Validation(format!(
                        "single choice question expects one option, got {}",
                        values.len()
                    )))
                }
            };
            Ok(Selection::Single(checked_index(value, option_count)?))
        }
        QuestionType::Multiple => {
            let values = match raw {
                RawSelection::One(v) => vec![*v],
                RawSelection::Many(values) => values.clone(),
            };
            if values.is_empty() {
                return Err(EngineError::Validation(
                    "multiple choice question expects at least one option".into(),
                ));
            }
            let mut set = BTreeSet::new();
            for value in values {
                if !set.insert(checked_index(value, option_count)?) {
                    return Err(EngineError::Validation(format!(
                        "option index {value} selected more than once"
                    )));
                }
            }
            Ok(Selection::Multiple(set))
        }
    }
}

/// Exact-match evaluation: no partial credit, order irrelevant for multi-select.
pub fn evaluate(correct: &CorrectAnswer, submitted: &Selection) -> bool {
    match (correct, submitted) {
        (CorrectAnswer::Single(expected), Selection::Single(actual)) => expected == actual,
        (CorrectAnswer::Multiple(_), Selection::Multiple(actual)) => correct.index_set() == *actual,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::{multiple, single};

    fn set(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[test]
    fn single_choice_symmetry() {
        for c in 0..4 {
            let correct = CorrectAnswer::Single(c);
            assert!(evaluate(&correct, &Selection::Single(c)));
            for x in (0..4).filter(|x| *x != c) {
                assert!(!evaluate(&correct, &Selection::Single(x)));
            }
        }
    }

    #[test]
    fn multi_select_is_order_invariant_and_exact() {
        let q = multiple("m", &["a", "b", "c", "d"], &[0, 2]);
        let check = |raw: RawSelection| evaluate(&q.correct_answer, &normalize(&q, &raw).unwrap());
        assert!(check(RawSelection::Many(vec![2, 0])));
        assert!(check(RawSelection::Many(vec![0, 2])));
        assert!(!check(RawSelection::Many(vec![0])));
        assert!(!check(RawSelection::Many(vec![0, 1, 2])));
    }

    #[test]
    fn shape_mismatch_is_incorrect() {
        assert!(!evaluate(&CorrectAnswer::Single(1), &Selection::Multiple(set(&[1]))));
        assert!(!evaluate(&CorrectAnswer::Multiple(vec![1]), &Selection::Single(1)));
    }

    #[test]
    fn normalize_single_unwraps_one_element_array() {
        let q = single("q", &["A", "B", "C", "D"], 2);
        assert_eq!(normalize(&q, &RawSelection::Many(vec![2])).unwrap(), Selection::Single(2));
        assert_eq!(normalize(&q, &RawSelection::One(1)).unwrap(), Selection::Single(1));
        assert!(normalize(&q, &RawSelection::Many(vec![1, 2])).is_err());
        assert!(normalize(&q, &RawSelection::Many(vec![])).is_err());
    }

    #[test]
    fn normalize_rejects_out_of_range_and_duplicates() {
        let q = multiple("m", &["a", "b", "c"], &[0]);
        assert!(matches!(
            normalize(&q, &RawSelection::Many(vec![0, 3])),
            Err(EngineError::Validation(_))
        ));
        assert!(normalize(&q, &RawSelection::Many(vec![-1])).is_err());
        assert!(normalize(&q, &RawSelection::Many(vec![1, 1])).is_err());
        assert!(normalize(&q, &RawSelection::Many(vec![])).is_err());
        assert_eq!(normalize(&q, &RawSelection::One(1)).unwrap(), Selection::Multiple(set(&[1])));
    }

    #[test]
    fn raw_selection_wire_format() {
        let one: RawSelection = serde_json::from_str("1").unwrap();
        assert_eq!(one, RawSelection::One(1));
        let many: RawSelection = serde_json::from_str("[2, 0]").unwrap();
        assert_eq!(many, RawSelection::Many(vec![2, 0]));
    }
}
