//! Storage traits the orchestrator depends on.
//!
//! The core treats persistence as a keyed read/write store with no
//! transactional guarantees beyond single-statement atomicity. The traits
//! mirror the collaborator interfaces the surrounding platform provides; an
//! in-memory implementation backs tests and the local exam runner.

use async_trait::async_trait;

use crate::domain::{
    CoverageAnalysis, CoverageMap, EntryType, Exam, Rubric, SessionStatus, SkipState,
    StruggleEvent, StudentSession, TranscriptEntry,
};
use crate::error::StoreError;

mod memory;

pub use memory::MemoryStore;

/// Append-only transcript per session. Append order within a session must
/// match logical response order; concurrent appends across sessions are
/// safe.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        entry_type: EntryType,
        content: &str,
    ) -> Result<TranscriptEntry, StoreError>;

    async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError>;

    /// The most recent question-type entry, if any.
    async fn last_question(&self, session_id: &str)
    -> Result<Option<TranscriptEntry>, StoreError>;

    async fn count_by_type(
        &self,
        session_id: &str,
        entry_type: EntryType,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<StudentSession>, StoreError>;

    async fn create(&self, session: StudentSession) -> Result<(), StoreError>;

    async fn update_coverage(
        &self,
        session_id: &str,
        coverage: &CoverageMap,
    ) -> Result<(), StoreError>;

    async fn update_skip_state(
        &self,
        session_id: &str,
        skip_state: &SkipState,
    ) -> Result<(), StoreError>;

    /// Transition session status; terminal transitions stamp `ended_at`.
    async fn set_status(&self, session_id: &str, status: SessionStatus)
    -> Result<(), StoreError>;
}

#[async_trait]
pub trait StruggleStore: Send + Sync {
    /// Persist an event, assigning an id if the detector left it unset.
    async fn create(&self, event: StruggleEvent) -> Result<StruggleEvent, StoreError>;

    async fn mark_adapted(&self, event_id: &str) -> Result<(), StoreError>;

    async fn mark_notified(&self, event_id: &str) -> Result<(), StoreError>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<StruggleEvent>, StoreError>;

    /// Events across every session of an exam that the teacher has not yet
    /// been notified about, oldest first.
    async fn list_unnotified_for_exam(
        &self,
        exam_id: &str,
    ) -> Result<Vec<StruggleEvent>, StoreError>;
}

/// Audit trail of coverage analyses, one record per processed response.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn record(&self, analysis: CoverageAnalysis) -> Result<CoverageAnalysis, StoreError>;
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn get(&self, exam_id: &str) -> Result<Option<Exam>, StoreError>;

    async fn create(&self, exam: Exam) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RubricStore: Send + Sync {
    async fn get(&self, rubric_id: &str) -> Result<Option<Rubric>, StoreError>;

    /// Insert or replace; re-parsing a rubric stores the same id again.
    async fn upsert(&self, rubric: Rubric) -> Result<(), StoreError>;
}
