//! Criterion selection policy.
//!
//! A strict ladder with no randomness: uncovered criteria first, then
//! partially covered ones, then everything remaining. Fully covered
//! criteria are deprioritized but can still reappear when nothing else is
//! eligible.

use crate::domain::{CoverageMap, ParsedRubric, RubricCriterion};

/// Below this fraction a criterion counts as uncovered.
pub const UNCOVERED_BELOW: f64 = 0.3;
/// Below this fraction (and at or above `UNCOVERED_BELOW`) a criterion
/// counts as partially covered.
pub const PARTIAL_BELOW: f64 = 0.7;

/// How many target criteria callers feed into a prompt.
pub const TARGET_LIMIT: usize = 5;

/// Choose which criteria the next question should target, in rubric order.
pub fn select_target_criteria<'a>(
    rubric: &'a ParsedRubric,
    coverage: &CoverageMap,
    exclude: &[String],
) -> Vec<&'a RubricCriterion> {
    let available: Vec<&RubricCriterion> = rubric
        .criteria
        .iter()
        .filter(|c| !exclude.contains(&c.id))
        .collect();

    if available.is_empty() {
        return Vec::new();
    }

    let mut uncovered = Vec::new();
    let mut partially_covered = Vec::new();

    for criterion in &available {
        let cov = coverage.get(&criterion.id);
        if cov < UNCOVERED_BELOW {
            uncovered.push(*criterion);
        } else if cov < PARTIAL_BELOW {
            partially_covered.push(*criterion);
        }
    }

    if !uncovered.is_empty() {
        uncovered
    } else if !partially_covered.is_empty() {
        partially_covered
    } else {
        available
    }
}

/// The top-`TARGET_LIMIT` target criterion ids, as stored in skip state.
pub fn target_criterion_ids(
    rubric: &ParsedRubric,
    coverage: &CoverageMap,
    exclude: &[String],
) -> Vec<String> {
    select_target_criteria(rubric, coverage, exclude)
        .into_iter()
        .take(TARGET_LIMIT)
        .map(|c| c.id.clone())
        .collect()
}
