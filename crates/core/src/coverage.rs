//! Coverage analysis and completion evaluation.
//!
//! The analyzer asks the LLM which rubric criteria a response addresses and
//! merges the result into the session's coverage map, monotonically. The
//! completion evaluator delegates the "is this enough" judgment to the LLM,
//! except for the deterministic completion-by-exhaustion case where every
//! criterion has been excluded.

use std::sync::Arc;

use crate::domain::{CompletionResult, CoverageMap, CoverageResult, ParsedRubric, RubricCriterion};
use crate::llm::{LlmClient, LlmError};

const MAX_TOKENS: u32 = 2048;

const ANALYZE_COVERAGE_SYSTEM_PROMPT: &str = "\
You are an expert at evaluating student oral exam responses against rubric criteria.

Your task is to analyze a student's response and determine which rubric criteria it addresses.

Consider:
- Partial coverage is valid (student may partially address a criterion)
- Look for both explicit and implicit demonstrations of knowledge
- Be fair but rigorous in your assessment

Return your response as valid JSON with this structure:
{
    \"newly_covered\": [\"criterion_id_1\", \"criterion_id_2\"],
    \"coverage_updates\": {
        \"criterion_id\": 0.75
    },
    \"reasoning\": \"Explanation of your analysis\"
}

Where:
- newly_covered: list of criterion IDs that were addressed in this response
- coverage_updates: object mapping criterion ID to coverage fraction (0.0 to 1.0)
- reasoning: brief explanation of your assessment
";

const CHECK_COMPLETION_SYSTEM_PROMPT: &str = "\
You are evaluating whether a student has sufficiently covered all rubric criteria.

Review the current coverage status and determine if the exam can be considered complete.

Criteria for completion:
- All major criteria should have at least 70% coverage
- Minor criteria can have lower coverage if major ones are well covered
- Consider the overall demonstration of knowledge

Return your response as valid JSON with this structure:
{
    \"is_complete\": true or false,
    \"missing_criteria\": [\"criterion_id_1\"],
    \"coverage_summary\": \"Brief summary of coverage status\"
}
";

pub struct CoverageAnalyzer {
    llm: Arc<dyn LlmClient>,
}

impl CoverageAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Score a response against the rubric and merge into the current
    /// coverage state. Only criteria the LLM explicitly reports are
    /// updated; everything else passes through unchanged.
    pub async fn analyze_coverage(
        &self,
        response: &str,
        question: &str,
        rubric: &ParsedRubric,
        current_coverage: &CoverageMap,
    ) -> Result<CoverageResult, LlmError> {
        let criteria_text = rubric
            .criteria
            .iter()
            .map(|c| format!("- {}: {} - {}", c.id, c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        let current_text = if current_coverage.is_empty() {
            "No criteria covered yet".to_string()
        } else {
            current_coverage
                .covered
                .iter()
                .map(|(id, pct)| format!("- {}: {:.0}% covered", id, pct * 100.0))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "Analyze the following student response for rubric coverage:\n\n\
             QUESTION:\n{question}\n\n\
             STUDENT RESPONSE:\n{response}\n\n\
             RUBRIC CRITERIA:\n{criteria_text}\n\n\
             CURRENT COVERAGE STATUS:\n{current_text}\n\n\
             Determine which criteria this response addresses and to what degree."
        );

        let result = self
            .llm
            .complete_json(&prompt, ANALYZE_COVERAGE_SYSTEM_PROMPT, 0.3, MAX_TOKENS)
            .await?;

        let mut updated_coverage = current_coverage.clone();
        if let Some(updates) = result.get("coverage_updates").and_then(|v| v.as_object()) {
            for (id, value) in updates {
                // The LLM's output is untrusted; non-numeric values are
                // ignored rather than failing the cycle.
                if let Some(pct) = value.as_f64() {
                    updated_coverage.observe(id, pct);
                }
            }
        }

        let newly_covered: Vec<String> = result
            .get("newly_covered")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let reasoning = result
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let total_coverage_pct = updated_coverage.total_fraction(rubric);

        tracing::debug!(
            newly = newly_covered.len() as u64,
            total_pct = total_coverage_pct,
            "coverage analysis merged"
        );

        Ok(CoverageResult {
            newly_covered,
            updated_coverage,
            reasoning,
            total_coverage_pct,
        })
    }

    /// Ask the LLM whether accumulated coverage is sufficient to end the
    /// exam.
    pub async fn check_completion(
        &self,
        rubric: &ParsedRubric,
        coverage: &CoverageMap,
    ) -> Result<CompletionResult, LlmError> {
        self.check_completion_with_exclusions(rubric, coverage, &[])
            .await
    }

    /// Completion check restricted to non-excluded criteria. When every
    /// criterion is excluded the exam is complete by exhaustion, decided
    /// locally without an LLM call.
    pub async fn check_completion_with_exclusions(
        &self,
        rubric: &ParsedRubric,
        coverage: &CoverageMap,
        excluded: &[String],
    ) -> Result<CompletionResult, LlmError> {
        let considered: Vec<&RubricCriterion> = rubric
            .criteria
            .iter()
            .filter(|c| !excluded.contains(&c.id))
            .collect();

        if considered.is_empty() {
            return Ok(CompletionResult {
                is_complete: true,
                missing_criteria: Vec::new(),
                summary: "All remaining criteria were skipped; exam complete by exhaustion."
                    .to_string(),
            });
        }

        let criteria_text = considered
            .iter()
            .map(|c| {
                format!(
                    "- {}: {} (covered: {:.0}%)",
                    c.id,
                    c.name,
                    coverage.get(&c.id) * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Evaluate if this oral exam should be considered complete:\n\n\
             CRITERIA COVERAGE STATUS:\n{criteria_text}\n\n\
             Determine if the student has sufficiently covered all criteria."
        );

        let result = self
            .llm
            .complete_json(&prompt, CHECK_COMPLETION_SYSTEM_PROMPT, 0.2, MAX_TOKENS)
            .await?;

        Ok(CompletionResult {
            is_complete: result
                .get("is_complete")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            missing_criteria: result
                .get("missing_criteria")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            summary: result
                .get("coverage_summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }
}
