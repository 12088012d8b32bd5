//! LLM-backed rubric parsing.
//!
//! Parsing happens once, before an exam starts, and has a safe fallback:
//! callers store the rubric unparsed on failure and retry later. That is
//! why errors here are reported rather than swallowed, but nothing in a
//! live exam depends on this call succeeding.

use crate::domain::{ParsedRubric, RubricCriterion};
use crate::llm::{LlmClient, LlmError};

const MAX_TOKENS: u32 = 2048;

const PARSE_RUBRIC_SYSTEM_PROMPT: &str = "\
You are an expert at analyzing educational rubrics and extracting structured criteria.

Your task is to parse a markdown rubric and extract all assessment criteria into a structured format.

For each criterion, identify:
1. A unique identifier (use snake_case, e.g., \"understanding_concepts\")
2. The name/title of the criterion
3. A description of what the student should demonstrate
4. Optional point value if specified

Return your response as valid JSON with this structure:
{
    \"criteria\": [
        {
            \"id\": \"criterion_id\",
            \"name\": \"Criterion Name\",
            \"description\": \"What the student should demonstrate\",
            \"points\": null or number
        }
    ],
    \"total_points\": null or number
}

Be thorough - extract ALL criteria mentioned in the rubric, even implicit ones.
";

/// Extract structured criteria from markdown rubric text.
pub async fn parse_rubric(
    llm: &dyn LlmClient,
    rubric_text: &str,
) -> Result<ParsedRubric, LlmError> {
    let prompt = format!(
        "Please parse the following rubric and extract all assessment criteria:\n\n\
         ---\n{rubric_text}\n---\n\n\
         Extract the criteria as JSON."
    );

    let result = llm
        .complete_json(&prompt, PARSE_RUBRIC_SYSTEM_PROMPT, 0.2, MAX_TOKENS)
        .await?;

    let criteria = result
        .get("criteria")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|c| {
                    Some(RubricCriterion {
                        id: c.get("id")?.as_str()?.to_string(),
                        name: c.get("name")?.as_str()?.to_string(),
                        description: c
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        points: c.get("points").and_then(|v| v.as_f64()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedRubric {
        criteria,
        total_points: result.get("total_points").and_then(|v| v.as_f64()),
    })
}
