//! Response orchestration.
//!
//! For each student response: record it, fan out coverage analysis and
//! struggle detection concurrently, join the results, persist, check
//! completion, and produce the next question. Skip requests bypass the
//! analysis fan-out and drive the two-stage skip policy instead: the first
//! skip adapts the question without abandoning the topic, the second skip
//! retires the topic from completion requirements entirely.
//!
//! A per-session async lock serializes the whole critical section, so
//! concurrent submissions for the same session cannot tear the coverage /
//! skip-state read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::coverage::CoverageAnalyzer;
use crate::domain::{
    CoverageAnalysis, EntryType, Exam, ParsedRubric, ProcessedResponse, SessionStatus, Severity,
    SkipState, StruggleEvent, StruggleType, StudentSession,
};
use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::questions::QuestionGenerator;
use crate::selector;
use crate::store::{
    AnalysisStore, ExamStore, RubricStore, SessionStore, StruggleStore, TranscriptStore,
};
use crate::struggle::StruggleDetector;

pub struct Orchestrator {
    coverage: CoverageAnalyzer,
    struggle: StruggleDetector,
    questions: QuestionGenerator,
    transcripts: Arc<dyn TranscriptStore>,
    sessions: Arc<dyn SessionStore>,
    struggles: Arc<dyn StruggleStore>,
    analyses: Arc<dyn AnalysisStore>,
    exams: Arc<dyn ExamStore>,
    rubrics: Arc<dyn RubricStore>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        transcripts: Arc<dyn TranscriptStore>,
        sessions: Arc<dyn SessionStore>,
        struggles: Arc<dyn StruggleStore>,
        analyses: Arc<dyn AnalysisStore>,
        exams: Arc<dyn ExamStore>,
        rubrics: Arc<dyn RubricStore>,
    ) -> Self {
        Self {
            coverage: CoverageAnalyzer::new(llm.clone()),
            struggle: StruggleDetector::new(llm.clone()),
            questions: QuestionGenerator::new(llm),
            transcripts,
            sessions,
            struggles,
            analyses,
            exams,
            rubrics,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once a session reaches a terminal state, so the
    /// map does not grow with every session a long-running process serves.
    /// In-flight holders keep the mutex alive through their own `Arc`.
    async fn discard_session_lock(&self, session_id: &str) {
        let mut locks = self.session_locks.lock().await;
        locks.remove(session_id);
    }

    /// Load the session and its exam/rubric, enforcing the preconditions
    /// every orchestration entry point shares.
    async fn load_active_context(
        &self,
        session_id: &str,
    ) -> Result<(StudentSession, Exam, ParsedRubric), OrchestratorError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;

        if session.status.is_terminal() {
            self.discard_session_lock(session_id).await;
            return Err(OrchestratorError::SessionNotActive(session_id.to_string()));
        }

        let exam = self
            .exams
            .get(&session.exam_id)
            .await?
            .ok_or_else(|| OrchestratorError::ExamNotFound(session.exam_id.clone()))?;

        let rubric = self
            .rubrics
            .get(&exam.rubric_id)
            .await?
            .and_then(|r| r.parsed_criteria)
            .ok_or_else(|| OrchestratorError::RubricUnparsed(exam.rubric_id.clone()))?;

        Ok((session, exam, rubric))
    }

    /// Generate and record the opening question for a freshly created
    /// session, and seed its skip state.
    pub async fn start_student_session(
        &self,
        session_id: &str,
        rubric: &ParsedRubric,
    ) -> Result<String, OrchestratorError> {
        let first_question = self.questions.generate_first_question(rubric).await?;

        self.transcripts
            .append(session_id, EntryType::Question, &first_question)
            .await?;

        let skip_state = SkipState {
            current_criteria: selector::target_criterion_ids(rubric, &Default::default(), &[]),
            ..SkipState::default()
        };
        self.sessions.update_skip_state(session_id, &skip_state).await?;

        tracing::info!(session = session_id, "session started with opening question");
        Ok(first_question)
    }

    /// The last transcript entry's content, only if it is an unanswered
    /// question.
    pub async fn get_pending_question(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        let transcript = self.transcripts.list(session_id).await?;
        Ok(transcript.last().and_then(|entry| {
            (entry.entry_type == EntryType::Question).then(|| entry.content.clone())
        }))
    }

    /// Process one student response through the parallel analysis
    /// pipelines and produce the next question (or end the exam).
    pub async fn process_student_response(
        &self,
        session_id: &str,
        response_text: &str,
    ) -> Result<ProcessedResponse, OrchestratorError> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let (session, _exam, rubric) = self.load_active_context(session_id).await?;

        let history = self.transcripts.list(session_id).await?;
        let last_question = self
            .transcripts
            .last_question(session_id)
            .await?
            .map(|e| e.content)
            .unwrap_or_default();

        let response_entry = self
            .transcripts
            .append(session_id, EntryType::Response, response_text)
            .await?;

        // Fan out: both analyses see the same (response, question, history)
        // and neither observes the other's output.
        let (coverage_result, detected) = tokio::try_join!(
            self.coverage
                .analyze_coverage(response_text, &last_question, &rubric, &session.coverage),
            self.struggle
                .detect_struggle(response_text, &last_question, &history),
        )?;

        self.analyses
            .record(CoverageAnalysis {
                id: String::new(),
                transcript_entry_id: response_entry.id.clone(),
                criteria_covered: coverage_result.newly_covered.clone(),
                reasoning: coverage_result.reasoning.clone(),
                total_coverage_pct: coverage_result.total_coverage_pct,
                timestamp: Utc::now(),
            })
            .await?;

        self.sessions
            .update_coverage(session_id, &coverage_result.updated_coverage)
            .await?;

        let struggle_event = match detected {
            Some(event) => Some(
                self.struggles
                    .create(StruggleEvent {
                        session_id: session_id.to_string(),
                        transcript_entry_id: response_entry.id.clone(),
                        ..event
                    })
                    .await?,
            ),
            None => None,
        };

        let completion = self
            .coverage
            .check_completion(&rubric, &coverage_result.updated_coverage)
            .await?;

        if completion.is_complete {
            self.sessions
                .set_status(session_id, SessionStatus::Completed)
                .await?;
            self.discard_session_lock(session_id).await;
            tracing::info!(session = session_id, "exam complete");

            return Ok(ProcessedResponse {
                next_question: String::new(),
                question_number: self
                    .transcripts
                    .count_by_type(session_id, EntryType::Question)
                    .await?,
                is_final: true,
                is_adapted: false,
                coverage_pct: coverage_result.total_coverage_pct,
                struggle_event,
                teacher_message: None,
            });
        }

        let updated_transcript = self.transcripts.list(session_id).await?;

        let (next_question, is_adapted) = match &struggle_event {
            Some(event) => {
                let adapted = self
                    .struggle
                    .generate_adapted_question(&last_question, event, &updated_transcript)
                    .await?;
                self.struggles.mark_adapted(&event.id).await?;
                (adapted, true)
            }
            None => {
                let question = self
                    .questions
                    .generate_question(
                        &rubric,
                        &updated_transcript,
                        &coverage_result.updated_coverage,
                    )
                    .await?;
                (question, false)
            }
        };

        self.transcripts
            .append(session_id, EntryType::Question, &next_question)
            .await?;
        let question_number = self
            .transcripts
            .count_by_type(session_id, EntryType::Question)
            .await?;

        let mut skip_state = session.skip_state.clone();
        skip_state.has_submitted_in_session = true;
        // A struggle keeps the current target pinned; otherwise retarget
        // against the updated coverage.
        if struggle_event.is_none() || skip_state.current_criteria.is_empty() {
            skip_state.current_criteria = selector::target_criterion_ids(
                &rubric,
                &coverage_result.updated_coverage,
                &[],
            );
        }
        skip_state.has_submitted_for_current = false;
        skip_state.current_question_is_adapted = is_adapted;
        self.sessions.update_skip_state(session_id, &skip_state).await?;

        Ok(ProcessedResponse {
            next_question,
            question_number,
            is_final: false,
            is_adapted,
            coverage_pct: coverage_result.total_coverage_pct,
            struggle_event,
            teacher_message: None,
        })
    }

    /// Two-stage skip handling. First skip adapts the current question in
    /// place; second skip retires its criteria and moves to a new topic.
    pub async fn process_skip_request(
        &self,
        session_id: &str,
    ) -> Result<ProcessedResponse, OrchestratorError> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let (session, _exam, rubric) = self.load_active_context(session_id).await?;

        let mut skip_state = session.skip_state.clone();
        let current_is_adapted = skip_state.current_question_is_adapted;

        let transcript = self.transcripts.list(session_id).await?;
        let last_question_entry = self.transcripts.last_question(session_id).await?;
        let last_question = last_question_entry
            .as_ref()
            .map(|e| e.content.clone())
            .unwrap_or_default();

        let skip_event = self
            .struggles
            .create(StruggleEvent {
                id: String::new(),
                session_id: session_id.to_string(),
                transcript_entry_id: last_question_entry
                    .map(|e| e.id)
                    .unwrap_or_default(),
                struggle_type: StruggleType::Skip,
                severity: if current_is_adapted {
                    Severity::Medium
                } else {
                    Severity::Low
                },
                reasoning: if current_is_adapted {
                    "Student skipped this question (second skip - moving to new topic)".to_string()
                } else {
                    "Student skipped this question (adapting question)".to_string()
                },
                question_adapted: !current_is_adapted,
                teacher_notified: false,
                timestamp: Utc::now(),
            })
            .await?;

        let coverage_pct = session.coverage.total_fraction(&rubric);

        if !current_is_adapted {
            // First skip: same topic, easier question.
            let next_question = self
                .struggle
                .generate_adapted_question(&last_question, &skip_event, &transcript)
                .await?;

            skip_state.current_question_is_adapted = true;
            skip_state.has_submitted_for_current = false;
            if skip_state.current_criteria.is_empty() {
                skip_state.current_criteria =
                    selector::target_criterion_ids(&rubric, &session.coverage, &[]);
            }
            self.sessions.update_skip_state(session_id, &skip_state).await?;

            self.transcripts
                .append(
                    session_id,
                    EntryType::SystemNote,
                    "Student requested skip - question adapted",
                )
                .await?;
            self.transcripts
                .append(session_id, EntryType::Question, &next_question)
                .await?;

            tracing::info!(session = session_id, "first skip: question adapted");

            return Ok(ProcessedResponse {
                question_number: self
                    .transcripts
                    .count_by_type(session_id, EntryType::Question)
                    .await?,
                next_question,
                is_final: false,
                is_adapted: true,
                coverage_pct,
                struggle_event: Some(skip_event),
                teacher_message: Some("Question adapted after skip".to_string()),
            });
        }

        // Second skip: abandon the topic and drop it from completion
        // requirements.
        self.transcripts
            .append(
                session_id,
                EntryType::SystemNote,
                "Student skipped twice - moving to new topic",
            )
            .await?;

        let retired = skip_state.current_criteria.clone();
        skip_state.mark_skipped(&retired);

        let next_question = self
            .questions
            .generate_question_excluding_criteria(
                &rubric,
                &transcript,
                &session.coverage,
                &skip_state.skipped_criteria,
            )
            .await?;

        skip_state.current_question_is_adapted = false;
        skip_state.has_submitted_for_current = false;
        skip_state.current_criteria = selector::target_criterion_ids(
            &rubric,
            &session.coverage,
            &skip_state.skipped_criteria,
        );
        self.sessions.update_skip_state(session_id, &skip_state).await?;

        self.transcripts
            .append(session_id, EntryType::Question, &next_question)
            .await?;

        let completion = self
            .coverage
            .check_completion_with_exclusions(
                &rubric,
                &session.coverage,
                &skip_state.skipped_criteria,
            )
            .await?;

        if completion.is_complete {
            self.sessions
                .set_status(session_id, SessionStatus::Completed)
                .await?;
            self.discard_session_lock(session_id).await;
            tracing::info!(session = session_id, "exam complete after second skip");

            return Ok(ProcessedResponse {
                next_question: String::new(),
                question_number: self
                    .transcripts
                    .count_by_type(session_id, EntryType::Question)
                    .await?,
                is_final: true,
                is_adapted: false,
                coverage_pct,
                struggle_event: Some(skip_event),
                teacher_message: None,
            });
        }

        tracing::info!(session = session_id, "second skip: moved to new topic");

        Ok(ProcessedResponse {
            question_number: self
                .transcripts
                .count_by_type(session_id, EntryType::Question)
                .await?,
            next_question,
            is_final: false,
            is_adapted: false,
            coverage_pct,
            struggle_event: Some(skip_event),
            teacher_message: Some("Moving to a new topic".to_string()),
        })
    }
}
