//! Question generation.
//!
//! Four framings over the same task: opening question, contextual next
//! question, a question avoiding skipped criteria, and a synthesis question
//! tying covered topics together. All return plain question text; the
//! prompts instruct the model to emit no numbering or prefixes and callers
//! trim surrounding whitespace only.

use std::sync::Arc;

use crate::domain::{CoverageMap, ParsedRubric, RubricCriterion, TranscriptEntry, render_history};
use crate::llm::{LlmClient, LlmError};
use crate::selector::{TARGET_LIMIT, select_target_criteria};

const MAX_TOKENS: u32 = 2048;

/// Transcript window supplied as conversational context.
const CONTEXT_ENTRIES: usize = 6;
const CONTEXT_CHARS: usize = 200;

const GENERATE_QUESTION_SYSTEM_PROMPT: &str = "\
You are an expert oral examiner conducting an academic assessment.

Your task is to generate the next question for a student based on:
1. The rubric criteria that haven't been covered yet
2. The conversation history
3. Natural flow of the examination

Guidelines:
- Target criteria that have low or no coverage
- Build on previous responses when possible
- Keep questions clear and focused
- Vary question types (explain, compare, apply, analyze)
- Maintain a professional but encouraging tone
- Questions should be open-ended to allow demonstration of knowledge

Return only the question text, nothing else. Do not include prefixes like \"Question:\" or numbers.
";

const GENERATE_FIRST_QUESTION_SYSTEM_PROMPT: &str = "\
You are an expert oral examiner starting an academic assessment.

Your task is to generate an opening question based on the rubric criteria.

Guidelines:
- Start with a foundational topic from the rubric
- The opening question should be accessible but substantive
- It should help the student settle in while demonstrating knowledge
- Keep it clear and focused
- Maintain a professional but welcoming tone

Return only the question text, nothing else. Do not include prefixes like \"Question:\" or numbers.
";

pub struct QuestionGenerator {
    llm: Arc<dyn LlmClient>,
}

impl QuestionGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Opening question over the full rubric, no history.
    pub async fn generate_first_question(&self, rubric: &ParsedRubric) -> Result<String, LlmError> {
        let criteria_text = rubric
            .criteria
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Generate an opening question for this oral exam.\n\n\
             RUBRIC CRITERIA:\n{criteria_text}\n\n\
             Generate a welcoming but substantive opening question that starts the assessment."
        );

        let question = self
            .llm
            .complete(&prompt, GENERATE_FIRST_QUESTION_SYSTEM_PROMPT, 0.6, MAX_TOKENS)
            .await?;
        Ok(question.trim().to_string())
    }

    /// Next contextual question, targeting the selector's top criteria.
    pub async fn generate_question(
        &self,
        rubric: &ParsedRubric,
        transcript: &[TranscriptEntry],
        coverage: &CoverageMap,
    ) -> Result<String, LlmError> {
        let targets = select_target_criteria(rubric, coverage, &[]);
        let prompt = format!(
            "Generate the next question for this oral exam.\n\n\
             TARGET CRITERIA (prioritize these):\n{}\n\n\
             RECENT CONVERSATION:\n{}\n\n\
             Generate a natural follow-up question that targets the uncovered criteria \
             while building on the conversation.",
            criteria_with_coverage(&targets, coverage),
            transcript_context(transcript),
        );

        let question = self
            .llm
            .complete(&prompt, GENERATE_QUESTION_SYSTEM_PROMPT, 0.7, MAX_TOKENS)
            .await?;
        Ok(question.trim().to_string())
    }

    /// Question for a new topic after a second skip. Falls back to a
    /// synthesis question when every criterion is excluded.
    pub async fn generate_question_excluding_criteria(
        &self,
        rubric: &ParsedRubric,
        transcript: &[TranscriptEntry],
        coverage: &CoverageMap,
        exclude_criteria: &[String],
    ) -> Result<String, LlmError> {
        let targets = select_target_criteria(rubric, coverage, exclude_criteria);
        if targets.is_empty() {
            return self.generate_synthesis_question(rubric, transcript).await;
        }

        let excluded_text = if exclude_criteria.is_empty() {
            "None".to_string()
        } else {
            exclude_criteria.join(", ")
        };

        let prompt = format!(
            "Generate a NEW question on a DIFFERENT topic than the previous questions.\n\
             The student has chosen to skip the previous topic.\n\n\
             TARGET CRITERIA (focus on these new topics):\n{}\n\n\
             SKIPPED CRITERIA (do NOT ask about these):\n{excluded_text}\n\n\
             RECENT CONVERSATION:\n{}\n\n\
             Generate a question that explores a new area of the rubric, moving away \
             from the previous topic.",
            criteria_with_coverage(&targets, coverage),
            transcript_context(transcript),
        );

        let question = self
            .llm
            .complete(&prompt, GENERATE_QUESTION_SYSTEM_PROMPT, 0.7, MAX_TOKENS)
            .await?;
        Ok(question.trim().to_string())
    }

    /// Ask the student to connect concepts across the rubric's topics.
    pub async fn generate_synthesis_question(
        &self,
        rubric: &ParsedRubric,
        _transcript: &[TranscriptEntry],
    ) -> Result<String, LlmError> {
        let topic_names = rubric
            .criteria
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "The student has demonstrated good coverage of individual topics.\n\
             Generate a synthesis question that asks them to connect multiple concepts.\n\n\
             TOPICS COVERED:\n{topic_names}\n\n\
             Generate a question that requires integrating knowledge from multiple areas."
        );

        let question = self
            .llm
            .complete(&prompt, GENERATE_QUESTION_SYSTEM_PROMPT, 0.7, MAX_TOKENS)
            .await?;
        Ok(question.trim().to_string())
    }
}

fn criteria_with_coverage(targets: &[&RubricCriterion], coverage: &CoverageMap) -> String {
    targets
        .iter()
        .take(TARGET_LIMIT)
        .map(|c| {
            format!(
                "- {}: {} (coverage: {:.0}%)",
                c.name,
                c.description,
                coverage.get(&c.id) * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn transcript_context(transcript: &[TranscriptEntry]) -> String {
    let rendered = render_history(transcript, CONTEXT_ENTRIES, CONTEXT_CHARS);
    if rendered.is_empty() {
        "This is the start of the exam.".to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryType, new_id};
    use crate::llm::MockLlmClient;
    use chrono::Utc;

    fn rubric(ids: &[&str]) -> ParsedRubric {
        ParsedRubric {
            criteria: ids
                .iter()
                .map(|id| RubricCriterion {
                    id: (*id).into(),
                    name: format!("name_{id}"),
                    description: format!("about {id}"),
                    points: None,
                })
                .collect(),
            total_points: None,
        }
    }

    fn entry(entry_type: EntryType, content: &str) -> TranscriptEntry {
        TranscriptEntry {
            id: new_id(),
            session_id: "s1".into(),
            entry_type,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_question_lists_all_criteria() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, system, _, _| {
            assert!(prompt.contains("name_a"));
            assert!(prompt.contains("name_b"));
            assert!(system.contains("opening question"));
            Box::pin(async move { Ok("What is a?".to_string()) })
        });
        let generator = QuestionGenerator::new(Arc::new(mock));

        let q = generator
            .generate_first_question(&rubric(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(q, "What is a?");
    }

    #[tokio::test]
    async fn next_question_targets_uncovered_criteria_only() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, _, _, _| {
            assert!(prompt.contains("name_b"));
            assert!(!prompt.contains("name_a"));
            Box::pin(async move { Ok("Tell me about b.".to_string()) })
        });
        let generator = QuestionGenerator::new(Arc::new(mock));

        let mut coverage = CoverageMap::default();
        coverage.observe("a", 0.9);
        let transcript = vec![entry(EntryType::Question, "Q1"), entry(EntryType::Response, "A1")];

        let q = generator
            .generate_question(&rubric(&["a", "b"]), &transcript, &coverage)
            .await
            .unwrap();
        assert_eq!(q, "Tell me about b.");
    }

    #[tokio::test]
    async fn empty_transcript_renders_start_of_exam_marker() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, _, _, _| {
            assert!(prompt.contains("This is the start of the exam."));
            Box::pin(async move { Ok("Q".to_string()) })
        });
        let generator = QuestionGenerator::new(Arc::new(mock));

        generator
            .generate_question(&rubric(&["a"]), &[], &CoverageMap::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn excluding_question_names_skipped_criteria() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, _, _, _| {
            assert!(prompt.contains("SKIPPED CRITERIA"));
            assert!(prompt.contains("name_b"));
            assert!(!prompt.contains("name_a:"));
            Box::pin(async move { Ok("About b then.".to_string()) })
        });
        let generator = QuestionGenerator::new(Arc::new(mock));

        let q = generator
            .generate_question_excluding_criteria(
                &rubric(&["a", "b"]),
                &[],
                &CoverageMap::default(),
                &["a".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(q, "About b then.");
    }

    #[tokio::test]
    async fn all_excluded_falls_back_to_synthesis() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, _, _, _| {
            assert!(prompt.contains("synthesis question"));
            assert!(prompt.contains("name_a"));
            Box::pin(async move { Ok("Connect everything.".to_string()) })
        });
        let generator = QuestionGenerator::new(Arc::new(mock));

        let q = generator
            .generate_question_excluding_criteria(
                &rubric(&["a"]),
                &[],
                &CoverageMap::default(),
                &["a".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(q, "Connect everything.");
    }
}
