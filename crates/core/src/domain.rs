//! Domain model for the oral-exam orchestration core.
//!
//! Everything here is plain data: the rubric a teacher authored, the
//! per-session coverage and skip state the orchestrator mutates, and the
//! append-only transcript that is the sequencing authority for a session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-ordered identifier for persisted records.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// One gradable rubric item with a stable, caller-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub points: Option<f64>,
}

/// The structured form of a rubric, produced once by parsing and read-only
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRubric {
    pub criteria: Vec<RubricCriterion>,
    #[serde(default)]
    pub total_points: Option<f64>,
}

/// A stored rubric. `parsed_criteria` is `None` until parsing succeeds;
/// parsing can be retried before the exam starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub id: String,
    pub title: String,
    pub content: String,
    pub parsed_criteria: Option<ParsedRubric>,
}

/// An exam room students join. Read-only to the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub rubric_id: String,
    pub room_code: String,
}

/// Fractional coverage per criterion id.
///
/// Coverage is monotonically non-decreasing within a session: merging an
/// observation takes `max(old, new)` and never lowers a value. Unknown
/// criteria read as 0.0. Backed by an ordered map so rendered prompts are
/// deterministic for a given state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMap {
    #[serde(default)]
    pub covered: BTreeMap<String, f64>,
}

impl CoverageMap {
    pub fn get(&self, criterion_id: &str) -> f64 {
        self.covered.get(criterion_id).copied().unwrap_or(0.0)
    }

    /// Merge a reported coverage fraction, clamped to `[0.0, 1.0]`.
    /// Never regresses an existing value.
    pub fn observe(&mut self, criterion_id: &str, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let entry = self.covered.entry(criterion_id.to_string()).or_insert(0.0);
        if fraction > *entry {
            *entry = fraction;
        }
    }

    /// Aggregate coverage relative to the rubric's criteria count.
    /// 0.0 for an empty rubric.
    pub fn total_fraction(&self, rubric: &ParsedRubric) -> f64 {
        if rubric.criteria.is_empty() {
            return 0.0;
        }
        self.covered.values().sum::<f64>() / rubric.criteria.len() as f64
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }
}

/// Per-session skip bookkeeping for the two-stage skip policy.
///
/// Every field defaults when absent so blobs written by older builds
/// deserialize cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipState {
    #[serde(default)]
    pub has_submitted_for_current: bool,
    #[serde(default)]
    pub has_submitted_in_session: bool,
    #[serde(default)]
    pub current_question_is_adapted: bool,
    #[serde(default)]
    pub current_criteria: Vec<String>,
    #[serde(default)]
    pub skipped_criteria: Vec<String>,
}

impl SkipState {
    /// Move criteria into the permanent skip list. Appends, never removes,
    /// and keeps the list free of duplicates.
    pub fn mark_skipped(&mut self, criterion_ids: &[String]) {
        for id in criterion_ids {
            if !self.skipped_criteria.contains(id) {
                self.skipped_criteria.push(id.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Question,
    Response,
    SystemNote,
    TeacherMessage,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Question => "question",
            EntryType::Response => "response",
            EntryType::SystemNote => "system_note",
            EntryType::TeacherMessage => "teacher_message",
        }
    }
}

/// Append-only transcript record. Never mutated or deleted; list order is
/// the sequencing authority for "last question" lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub session_id: String,
    pub entry_type: EntryType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Render the tail of a transcript for inclusion in a prompt, one line per
/// entry, each truncated for prompt economy.
pub fn render_history(entries: &[TranscriptEntry], max_entries: usize, max_chars: usize) -> String {
    let start = entries.len().saturating_sub(max_entries);
    entries[start..]
        .iter()
        .map(|e| format!("[{}]: {}", e.entry_type.as_str(), truncate(&e.content, max_chars)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() > max_chars {
        let head: String = content.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StruggleType {
    Confusion,
    OffTopic,
    Silence,
    Incorrect,
    Repetition,
    Skip,
}

impl StruggleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StruggleType::Confusion => "confusion",
            StruggleType::OffTopic => "off_topic",
            StruggleType::Silence => "silence",
            StruggleType::Incorrect => "incorrect",
            StruggleType::Repetition => "repetition",
            StruggleType::Skip => "skip",
        }
    }

    /// Lenient mapping for LLM output; unrecognized labels fall back to
    /// `Confusion` rather than failing the response cycle.
    pub fn parse_lenient(label: &str) -> Self {
        match label {
            "off_topic" => StruggleType::OffTopic,
            "silence" => StruggleType::Silence,
            "incorrect" => StruggleType::Incorrect,
            "repetition" => StruggleType::Repetition,
            "skip" => StruggleType::Skip,
            _ => StruggleType::Confusion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse_lenient(label: &str) -> Self {
        match label {
            "low" => Severity::Low,
            "high" => Severity::High,
            _ => Severity::Medium,
        }
    }
}

/// A detected indication that a student is having difficulty.
///
/// `id`, `session_id` and `transcript_entry_id` may be empty until the
/// orchestrator persists the event; `question_adapted` and
/// `teacher_notified` are the only fields ever flipped afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StruggleEvent {
    pub id: String,
    pub session_id: String,
    pub transcript_entry_id: String,
    pub struggle_type: StruggleType,
    pub severity: Severity,
    pub reasoning: String,
    pub question_adapted: bool,
    pub teacher_notified: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
}

impl SessionStatus {
    /// Terminal states accept no further responses or skips.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// One student's run through an exam room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSession {
    pub id: String,
    pub exam_id: String,
    pub student_name: String,
    pub student_id: String,
    pub status: SessionStatus,
    pub coverage: CoverageMap,
    pub skip_state: SkipState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StudentSession {
    pub fn new(exam_id: &str, student_name: &str, student_id: &str) -> Self {
        Self {
            id: new_id(),
            exam_id: exam_id.to_string(),
            student_name: student_name.to_string(),
            student_id: student_id.to_string(),
            status: SessionStatus::Active,
            coverage: CoverageMap::default(),
            skip_state: SkipState::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// Output of one coverage-analysis pass over a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageResult {
    pub newly_covered: Vec<String>,
    pub updated_coverage: CoverageMap,
    pub reasoning: String,
    pub total_coverage_pct: f64,
}

/// Output of a completion check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub is_complete: bool,
    pub missing_criteria: Vec<String>,
    pub summary: String,
}

/// Audit record persisted for every analyzed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageAnalysis {
    pub id: String,
    pub transcript_entry_id: String,
    pub criteria_covered: Vec<String>,
    pub reasoning: String,
    pub total_coverage_pct: f64,
    pub timestamp: DateTime<Utc>,
}

/// What the student-facing surface gets back after a response or a skip.
#[derive(Debug, Clone)]
pub struct ProcessedResponse {
    pub next_question: String,
    pub question_number: usize,
    pub is_final: bool,
    pub is_adapted: bool,
    pub coverage_pct: f64,
    pub struggle_event: Option<StruggleEvent>,
    pub teacher_message: Option<String>,
}
