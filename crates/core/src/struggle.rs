//! Struggle detection and question adaptation.
//!
//! Returning `None` from detection is the expected common case, not an
//! error. The classification prompt embeds the fair-use policy: minor
//! hesitation is not a struggle, only genuine difficulty warranting
//! intervention.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Severity, StruggleEvent, StruggleType, TranscriptEntry, render_history};
use crate::llm::{LlmClient, LlmError};

const MAX_TOKENS: u32 = 2048;

/// History window for detection: the last 8 entries, 200 chars each.
const DETECT_HISTORY_ENTRIES: usize = 8;
const DETECT_HISTORY_CHARS: usize = 200;

/// Tighter window for adaptation prompts.
const ADAPT_HISTORY_ENTRIES: usize = 4;
const ADAPT_HISTORY_CHARS: usize = 150;

const DETECT_STRUGGLE_SYSTEM_PROMPT: &str = "\
You are an expert at identifying when students are struggling during oral exams.

Your task is to analyze a student's response and determine if they are having difficulty.

Signs of struggle include:
- CONFUSION: Asking for clarification, expressing uncertainty (\"I don't understand\", \"What do you mean?\")
- OFF_TOPIC: Response doesn't address the question at all, completely unrelated content
- SILENCE: Very short responses, \"I don't know\", minimal engagement
- INCORRECT: Factually wrong information that shows misunderstanding
- REPETITION: Repeating the same points without adding new information

Severity levels:
- LOW: Minor hesitation or slight confusion, student can likely recover
- MEDIUM: Clear difficulty, but student is still engaged
- HIGH: Significant struggle, student needs immediate help

If NO struggle is detected, return {\"struggle_detected\": false}

If struggle IS detected, return:
{
    \"struggle_detected\": true,
    \"struggle_type\": \"confusion|off_topic|silence|incorrect|repetition\",
    \"severity\": \"low|medium|high\",
    \"reasoning\": \"Brief explanation of why this indicates struggle\"
}

Be fair - normal pauses or minor uncertainties are not struggles.
Only flag genuine difficulties that would benefit from intervention.
";

const ADAPT_QUESTION_SYSTEM_PROMPT: &str = "\
You are an expert at rephrasing exam questions to help struggling students.

Your task is to adapt a question based on the type of struggle detected.

Adaptation strategies by struggle type:
- CONFUSION: Simplify language, provide more context, break into smaller parts
- OFF_TOPIC: Clarify what the question is asking, provide a hint about the expected topic
- SILENCE: Make the question more specific, reduce scope, provide starting points
- INCORRECT: Rephrase to guide toward correct thinking without giving the answer
- REPETITION: Ask from a different angle, request specific examples

Guidelines:
- Maintain the educational value of the question
- Don't make it too easy - help them think, not give away answers
- Keep the adapted question concise
- Be encouraging in tone

Return only the adapted question text, nothing else.
";

pub struct StruggleDetector {
    llm: Arc<dyn LlmClient>,
}

impl StruggleDetector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify whether a response indicates difficulty. Returns an event
    /// with unset id/session/entry fields; the orchestrator fills those in
    /// when persisting.
    pub async fn detect_struggle(
        &self,
        response: &str,
        question: &str,
        history: &[TranscriptEntry],
    ) -> Result<Option<StruggleEvent>, LlmError> {
        let history_text = non_empty_or(
            render_history(history, DETECT_HISTORY_ENTRIES, DETECT_HISTORY_CHARS),
            "No previous history",
        );

        let prompt = format!(
            "Analyze this student response for signs of struggle:\n\n\
             QUESTION ASKED:\n{question}\n\n\
             STUDENT RESPONSE:\n{response}\n\n\
             RECENT CONVERSATION HISTORY:\n{history_text}\n\n\
             Determine if the student is struggling and classify the type and severity."
        );

        let result = self
            .llm
            .complete_json(&prompt, DETECT_STRUGGLE_SYSTEM_PROMPT, 0.3, MAX_TOKENS)
            .await?;

        if !result
            .get("struggle_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let struggle_type = StruggleType::parse_lenient(
            result
                .get("struggle_type")
                .and_then(|v| v.as_str())
                .unwrap_or("confusion"),
        );
        let severity = Severity::parse_lenient(
            result
                .get("severity")
                .and_then(|v| v.as_str())
                .unwrap_or("medium"),
        );

        tracing::info!(
            struggle_type = struggle_type.as_str(),
            severity = severity.as_str(),
            "struggle detected"
        );

        Ok(Some(StruggleEvent {
            id: String::new(),
            session_id: String::new(),
            transcript_entry_id: String::new(),
            struggle_type,
            severity,
            reasoning: result
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            question_adapted: false,
            teacher_notified: false,
            timestamp: Utc::now(),
        }))
    }

    /// Rephrase a question calibrated to the struggle that was detected.
    pub async fn generate_adapted_question(
        &self,
        original_question: &str,
        struggle_event: &StruggleEvent,
        history: &[TranscriptEntry],
    ) -> Result<String, LlmError> {
        let history_text = non_empty_or(
            render_history(history, ADAPT_HISTORY_ENTRIES, ADAPT_HISTORY_CHARS),
            "No previous history",
        );

        let prompt = format!(
            "Adapt this question for a struggling student:\n\n\
             ORIGINAL QUESTION:\n{original_question}\n\n\
             STRUGGLE TYPE: {}\n\
             SEVERITY: {}\n\
             ANALYSIS: {}\n\n\
             RECENT CONVERSATION:\n{history_text}\n\n\
             Provide an adapted version of the question that helps the student engage better.",
            struggle_event.struggle_type.as_str(),
            struggle_event.severity.as_str(),
            struggle_event.reasoning,
        );

        let adapted = self
            .llm
            .complete(&prompt, ADAPT_QUESTION_SYSTEM_PROMPT, 0.5, MAX_TOKENS)
            .await?;

        Ok(adapted.trim().to_string())
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn no_struggle_yields_none() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete_json().returning(|_, _, _, _| {
            Box::pin(async move { Ok(json!({"struggle_detected": false})) })
        });
        let detector = StruggleDetector::new(Arc::new(mock));

        let result = detector.detect_struggle("fine answer", "q", &[]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_flag_counts_as_no_struggle() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete_json()
            .returning(|_, _, _, _| Box::pin(async move { Ok(json!({})) }));
        let detector = StruggleDetector::new(Arc::new(mock));

        let result = detector.detect_struggle("answer", "q", &[]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn detection_maps_type_and_severity() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete_json().returning(|_, _, _, _| {
            Box::pin(async move {
                Ok(json!({
                    "struggle_detected": true,
                    "struggle_type": "off_topic",
                    "severity": "high",
                    "reasoning": "answer is about something else entirely"
                }))
            })
        });
        let detector = StruggleDetector::new(Arc::new(mock));

        let event = detector
            .detect_struggle("unrelated", "q", &[])
            .await
            .unwrap()
            .expect("struggle expected");

        assert_eq!(event.struggle_type, StruggleType::OffTopic);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.reasoning, "answer is about something else entirely");
        assert!(event.id.is_empty());
        assert!(!event.question_adapted);
        assert!(!event.teacher_notified);
    }

    #[tokio::test]
    async fn unknown_labels_fall_back_to_defaults() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete_json().returning(|_, _, _, _| {
            Box::pin(async move {
                Ok(json!({
                    "struggle_detected": true,
                    "struggle_type": "bewilderment",
                    "severity": "catastrophic"
                }))
            })
        });
        let detector = StruggleDetector::new(Arc::new(mock));

        let event = detector
            .detect_struggle("hmm", "q", &[])
            .await
            .unwrap()
            .expect("struggle expected");

        assert_eq!(event.struggle_type, StruggleType::Confusion);
        assert_eq!(event.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn adapted_question_is_trimmed() {
        let mut mock = MockLlmClient::new();
        mock.expect_complete().returning(|prompt, _, _, _| {
            assert!(prompt.contains("ORIGINAL QUESTION"));
            assert!(prompt.contains("silence"));
            Box::pin(async move { Ok("  What is one example of X?  \n".to_string()) })
        });
        let detector = StruggleDetector::new(Arc::new(mock));

        let event = StruggleEvent {
            id: "e1".into(),
            session_id: "s1".into(),
            transcript_entry_id: "t1".into(),
            struggle_type: StruggleType::Silence,
            severity: Severity::Medium,
            reasoning: "very short answers".into(),
            question_adapted: false,
            teacher_notified: false,
            timestamp: Utc::now(),
        };

        let adapted = detector
            .generate_adapted_question("Explain X in depth", &event, &[])
            .await
            .unwrap();
        assert_eq!(adapted, "What is one example of X?");
    }
}
