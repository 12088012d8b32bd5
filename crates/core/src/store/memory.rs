//! In-memory store used by tests and the local exam runner.
//!
//! One struct implements every storage trait so cross-entity queries (the
//! unnotified-struggles-per-exam feed joins events to sessions) work
//! without a database. A single `RwLock` guards all maps; every trait
//! method is one read or one write, matching the single-statement
//! atomicity the core assumes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::{
    CoverageAnalysis, CoverageMap, EntryType, Exam, Rubric, SessionStatus, SkipState,
    StruggleEvent, StudentSession, TranscriptEntry, new_id,
};
use crate::error::StoreError;
use crate::store::{
    AnalysisStore, ExamStore, RubricStore, SessionStore, StruggleStore, TranscriptStore,
};

#[derive(Default)]
struct Inner {
    transcripts: HashMap<String, Vec<TranscriptEntry>>,
    sessions: HashMap<String, StudentSession>,
    struggles: Vec<StruggleEvent>,
    analyses: Vec<CoverageAnalysis>,
    exams: HashMap<String, Exam>,
    rubrics: HashMap<String, Rubric>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryStore {
    async fn append(
        &self,
        session_id: &str,
        entry_type: EntryType,
        content: &str,
    ) -> Result<TranscriptEntry, StoreError> {
        let entry = TranscriptEntry {
            id: new_id(),
            session_id: session_id.to_string(),
            entry_type,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        let mut inner = self.inner.write().await;
        inner
            .transcripts
            .entry(session_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.transcripts.get(session_id).cloned().unwrap_or_default())
    }

    async fn last_question(
        &self,
        session_id: &str,
    ) -> Result<Option<TranscriptEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.transcripts.get(session_id).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|e| e.entry_type == EntryType::Question)
                .cloned()
        }))
    }

    async fn count_by_type(
        &self,
        session_id: &str,
        entry_type: EntryType,
    ) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transcripts
            .get(session_id)
            .map(|entries| entries.iter().filter(|e| e.entry_type == entry_type).count())
            .unwrap_or(0))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<StudentSession>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(session_id).cloned())
    }

    async fn create(&self, session: StudentSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn update_coverage(
        &self,
        session_id: &str,
        coverage: &CoverageMap,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionMissing(session_id.to_string()))?;
        session.coverage = coverage.clone();
        Ok(())
    }

    async fn update_skip_state(
        &self,
        session_id: &str,
        skip_state: &SkipState,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionMissing(session_id.to_string()))?;
        session.skip_state = skip_state.clone();
        Ok(())
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionMissing(session_id.to_string()))?;
        session.status = status;
        if status.is_terminal() {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl StruggleStore for MemoryStore {
    async fn create(&self, mut event: StruggleEvent) -> Result<StruggleEvent, StoreError> {
        if event.id.is_empty() {
            event.id = new_id();
        }
        let mut inner = self.inner.write().await;
        inner.struggles.push(event.clone());
        Ok(event)
    }

    async fn mark_adapted(&self, event_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let event = inner
            .struggles
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| StoreError::EventMissing(event_id.to_string()))?;
        event.question_adapted = true;
        Ok(())
    }

    async fn mark_notified(&self, event_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let event = inner
            .struggles
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| StoreError::EventMissing(event_id.to_string()))?;
        event.teacher_notified = true;
        Ok(())
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<StruggleEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .struggles
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_unnotified_for_exam(
        &self,
        exam_id: &str,
    ) -> Result<Vec<StruggleEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .struggles
            .iter()
            .filter(|e| {
                !e.teacher_notified
                    && inner
                        .sessions
                        .get(&e.session_id)
                        .is_some_and(|s| s.exam_id == exam_id)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn record(&self, mut analysis: CoverageAnalysis) -> Result<CoverageAnalysis, StoreError> {
        if analysis.id.is_empty() {
            analysis.id = new_id();
        }
        let mut inner = self.inner.write().await;
        inner.analyses.push(analysis.clone());
        Ok(analysis)
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn get(&self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.exams.get(exam_id).cloned())
    }

    async fn create(&self, exam: Exam) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.exams.insert(exam.id.clone(), exam);
        Ok(())
    }
}

#[async_trait]
impl RubricStore for MemoryStore {
    async fn get(&self, rubric_id: &str) -> Result<Option<Rubric>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.rubrics.get(rubric_id).cloned())
    }

    async fn upsert(&self, rubric: Rubric) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.rubrics.insert(rubric.id.clone(), rubric);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Severity, StruggleType};

    fn skip_event(session_id: &str) -> StruggleEvent {
        StruggleEvent {
            id: String::new(),
            session_id: session_id.to_string(),
            transcript_entry_id: "t1".into(),
            struggle_type: StruggleType::Skip,
            severity: Severity::Low,
            reasoning: "skipped".into(),
            question_adapted: false,
            teacher_notified: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transcript_preserves_append_order() {
        let store = MemoryStore::new();
        store.append("s1", EntryType::Question, "Q1").await.unwrap();
        store.append("s1", EntryType::Response, "A1").await.unwrap();
        store.append("s1", EntryType::Question, "Q2").await.unwrap();

        let entries = store.list("s1").await.unwrap();
        let contents: Vec<_> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["Q1", "A1", "Q2"]);

        let last = store.last_question("s1").await.unwrap().unwrap();
        assert_eq!(last.content, "Q2");
        assert_eq!(store.count_by_type("s1", EntryType::Question).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn last_question_skips_trailing_responses() {
        let store = MemoryStore::new();
        store.append("s1", EntryType::Question, "Q1").await.unwrap();
        store.append("s1", EntryType::Response, "A1").await.unwrap();

        let last = store.last_question("s1").await.unwrap().unwrap();
        assert_eq!(last.content, "Q1");
    }

    #[tokio::test]
    async fn session_updates_round_trip() {
        let store = MemoryStore::new();
        let session = StudentSession::new("e1", "Ada", "A1");
        let session_id = session.id.clone();
        SessionStore::create(&store, session).await.unwrap();

        let mut coverage = CoverageMap::default();
        coverage.observe("c1", 0.5);
        store.update_coverage(&session_id, &coverage).await.unwrap();

        let skip_state = SkipState {
            current_criteria: vec!["c1".into()],
            ..SkipState::default()
        };
        store.update_skip_state(&session_id, &skip_state).await.unwrap();
        store
            .set_status(&session_id, SessionStatus::Completed)
            .await
            .unwrap();

        let loaded = SessionStore::get(&store, &session_id).await.unwrap().unwrap();
        assert_eq!(loaded.coverage.get("c1"), 0.5);
        assert_eq!(loaded.skip_state.current_criteria, vec!["c1"]);
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert!(loaded.ended_at.is_some());
    }

    #[tokio::test]
    async fn updating_missing_session_errors() {
        let store = MemoryStore::new();
        let result = store.update_coverage("nope", &CoverageMap::default()).await;
        assert!(matches!(result, Err(StoreError::SessionMissing(_))));
    }

    #[tokio::test]
    async fn struggle_create_assigns_id_and_flags_flip() {
        let store = MemoryStore::new();
        let created = StruggleStore::create(&store, skip_event("s1")).await.unwrap();
        assert!(!created.id.is_empty());

        store.mark_adapted(&created.id).await.unwrap();
        store.mark_notified(&created.id).await.unwrap();

        let events = store.list_for_session("s1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].question_adapted);
        assert!(events[0].teacher_notified);
    }

    #[tokio::test]
    async fn unnotified_query_joins_sessions_to_exam() {
        let store = MemoryStore::new();
        let mut session_a = StudentSession::new("exam-1", "Ada", "A1");
        session_a.id = "sa".into();
        let mut session_b = StudentSession::new("exam-2", "Bob", "B1");
        session_b.id = "sb".into();
        SessionStore::create(&store, session_a).await.unwrap();
        SessionStore::create(&store, session_b).await.unwrap();

        let in_exam = StruggleStore::create(&store, skip_event("sa")).await.unwrap();
        StruggleStore::create(&store, skip_event("sb")).await.unwrap();
        let notified = StruggleStore::create(&store, skip_event("sa")).await.unwrap();
        store.mark_notified(&notified.id).await.unwrap();

        let unnotified = store.list_unnotified_for_exam("exam-1").await.unwrap();
        assert_eq!(unnotified.len(), 1);
        assert_eq!(unnotified[0].id, in_exam.id);
    }
}
