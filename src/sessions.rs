//! File-backed store for the mock asynchronous review workflow.
//!
//! Sessions are created PENDING, moved to RUNNING by `start`, and complete
//! once their due time has passed: the next time the store is opened they
//! turn DONE and receive placeholder feedback. The file keeps two keys,
//! `sessions` (newest first) and `feedbacks` (keyed by session id).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{CriterionBreakdown, ReviewStatus};
use crate::record;

const DEFAULT_CRITERIA: [&str; 3] = ["clarity", "tone", "relevance"];
const PLACEHOLDER_AGGREGATE: u8 = 82;

/// Upper bound for the configured completion delay (one year).
pub const MAX_COMPLETION_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("completion delay of {0}s is out of range (max {max}s)", max = MAX_COMPLETION_DELAY_SECS)]
    DelayOutOfRange(u64),
    #[error("session due time overflows when started at {0}")]
    DueTimeOverflow(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: u64,
    pub channel_id: String,
    pub channel_name: String,
    pub criteria_ids: Vec<Value>,
    pub status: ReviewStatus,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub session_id: u64,
    pub summary_text: String,
    pub aggregate_score: Option<u8>,
    pub criteria_breakdown: Vec<CriterionBreakdown>,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Feedback {
    fn empty(session_id: u64) -> Self {
        Self {
            session_id,
            summary_text: String::new(),
            aggregate_score: None,
            criteria_breakdown: Vec::new(),
            approved: false,
            approved_at: None,
        }
    }

    fn apply(&mut self, patch: FeedbackPatch) {
        if let Some(summary_text) = patch.summary_text {
            self.summary_text = summary_text.unwrap_or_default();
        }
        if let Some(aggregate_score) = patch.aggregate_score {
            self.aggregate_score = aggregate_score;
        }
        if let Some(breakdown) = patch.criteria_breakdown {
            self.criteria_breakdown = breakdown;
        }
    }
}

/// Partial feedback edit. `None` leaves a field untouched; an explicit
/// `null` clears it (empty summary, no aggregate score).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub summary_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub aggregate_score: Option<Option<u8>>,
    pub criteria_breakdown: Option<Vec<CriterionBreakdown>>,
}

impl FeedbackPatch {
    pub fn is_empty(&self) -> bool {
        self.summary_text.is_none()
            && self.aggregate_score.is_none()
            && self.criteria_breakdown.is_none()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub id: u64,
    pub status: ReviewStatus,
    pub progress: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    feedbacks: BTreeMap<u64, Feedback>,
}

pub struct SessionStore {
    path: PathBuf,
    completion_delay: Duration,
    data: StoreFile,
}

impl SessionStore {
    /// Opens the store at `path` (missing file means empty) and completes any
    /// running session that is due at `now`.
    pub fn open(path: &Path, completion_delay_secs: u64, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if content.trim().is_empty() {
                StoreFile::default()
            } else {
                serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        } else {
            StoreFile::default()
        };

        let completion_delay = Some(completion_delay_secs)
            .filter(|secs| *secs <= MAX_COMPLETION_DELAY_SECS)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .ok_or(StoreError::DelayOutOfRange(completion_delay_secs))?;

        let mut store = Self {
            path: path.to_path_buf(),
            completion_delay,
            data,
        };
        if store.complete_due(now) > 0 {
            store.persist()?;
        }
        Ok(store)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(&self.data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, content).map_err(io_err)?;
        Ok(())
    }

    fn complete_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut completed = 0;
        for session in &mut self.data.sessions {
            let due = session.status == ReviewStatus::Running
                && session.due_at.is_some_and(|due_at| due_at <= now);
            if !due {
                continue;
            }
            session.status = ReviewStatus::Done;
            session.due_at = None;
            self.data
                .feedbacks
                .insert(session.id, placeholder_feedback(session));
            info!(session = session.id, "session analysis finished");
            completed += 1;
        }
        completed
    }

    fn session_mut(&mut self, id: u64) -> Option<&mut Session> {
        self.data.sessions.iter_mut().find(|session| session.id == id)
    }

    pub fn create(
        &mut self,
        channel_id: &str,
        criteria_ids: Vec<Value>,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let id = self.data.sessions.iter().map(|session| session.id).max().unwrap_or(0) + 1;
        let session = Session {
            id,
            channel_id: channel_id.to_string(),
            channel_name: format!("#{channel_id}"),
            criteria_ids,
            status: ReviewStatus::Pending,
            approved: false,
            created_at: now,
            due_at: None,
        };
        self.data.sessions.insert(0, session.clone());
        self.persist()?;
        debug!(session = id, channel = channel_id, "session created");
        Ok(session)
    }

    pub fn list(&self) -> &[Session] {
        &self.data.sessions
    }

    pub fn get(&self, id: u64) -> Option<&Session> {
        self.data.sessions.iter().find(|session| session.id == id)
    }

    pub fn delete(&mut self, id: u64) -> Result<bool, StoreError> {
        let before = self.data.sessions.len();
        self.data.sessions.retain(|session| session.id != id);
        let removed = self.data.sessions.len() != before;
        self.data.feedbacks.remove(&id);
        self.persist()?;
        Ok(removed)
    }

    pub fn start(&mut self, id: u64, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        let due_at = now
            .checked_add_signed(self.completion_delay)
            .ok_or(StoreError::DueTimeOverflow(now))?;
        let Some(session) = self.session_mut(id) else {
            return Ok(None);
        };
        session.status = ReviewStatus::Running;
        session.due_at = Some(due_at);
        let session = session.clone();
        self.persist()?;
        info!(session = id, due_at = %due_at, "session analysis started");
        Ok(Some(session))
    }

    pub fn status(&self, id: u64) -> SessionStatus {
        let status = self
            .get(id)
            .map(|session| session.status)
            .unwrap_or(ReviewStatus::Pending);
        SessionStatus {
            id,
            status,
            progress: status.progress(),
        }
    }

    pub fn feedback(&self, id: u64) -> Option<&Feedback> {
        self.data.feedbacks.get(&id)
    }

    /// Shifts one criterion score by `delta`, clamped to `[0, 100]`. Any edit
    /// revokes approval.
    pub fn update_score(
        &mut self,
        id: u64,
        criterion_id: &str,
        delta: i64,
    ) -> Result<Option<Feedback>, StoreError> {
        let Some(feedback) = self.data.feedbacks.get_mut(&id) else {
            return Ok(None);
        };
        let position = feedback
            .criteria_breakdown
            .iter()
            .position(|item| record::display(&item.criterion_id) == criterion_id);
        let Some(position) = position else {
            return Ok(Some(feedback.clone()));
        };

        let item = &mut feedback.criteria_breakdown[position];
        item.score = (i64::from(item.score) + delta).clamp(0, 100) as u8;
        feedback.approved = false;
        feedback.approved_at = None;
        let feedback = feedback.clone();
        self.persist()?;
        Ok(Some(feedback))
    }

    pub fn update_feedback(&mut self, id: u64, patch: FeedbackPatch) -> Result<Feedback, StoreError> {
        let feedback = self
            .data
            .feedbacks
            .entry(id)
            .or_insert_with(|| Feedback::empty(id));
        feedback.apply(patch);
        feedback.approved = false;
        feedback.approved_at = None;
        let feedback = feedback.clone();
        self.persist()?;
        Ok(feedback)
    }

    /// Applies pending edits, if any, then approves the feedback and marks the
    /// session approved.
    pub fn approve(
        &mut self,
        id: u64,
        patch: FeedbackPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Feedback>, StoreError> {
        if !patch.is_empty() {
            self.data
                .feedbacks
                .entry(id)
                .or_insert_with(|| Feedback::empty(id))
                .apply(patch);
        }

        let approved = self.data.feedbacks.get_mut(&id).map(|feedback| {
            feedback.approved = true;
            feedback.approved_at = Some(now);
            feedback.clone()
        });
        if let Some(session) = self.session_mut(id) {
            session.approved = true;
        }
        self.persist()?;
        Ok(approved)
    }
}

fn placeholder_feedback(session: &Session) -> Feedback {
    let criteria: Vec<Value> = if session.criteria_ids.is_empty() {
        DEFAULT_CRITERIA.iter().map(|id| Value::from(*id)).collect()
    } else {
        session.criteria_ids.clone()
    };

    Feedback {
        session_id: session.id,
        summary_text: format!("Automatic feedback for {}", session.channel_name),
        aggregate_score: Some(PLACEHOLDER_AGGREGATE),
        criteria_breakdown: criteria
            .into_iter()
            .enumerate()
            .map(|(index, criterion_id)| CriterionBreakdown {
                criterion_name: record::display(&criterion_id),
                criterion_id,
                score: (60 + index * 10).min(100) as u8,
                evidence: Vec::new(),
            })
            .collect(),
        approved: false,
        approved_at: None,
    }
}

/// Parses a CLI criterion id: integers become numbers, anything else text.
pub fn criterion_id_value(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_761_566_400 + seconds, 0).unwrap()
    }

    fn open(dir: &tempfile::TempDir, now: DateTime<Utc>) -> SessionStore {
        SessionStore::open(&dir.path().join("store/sessions.json"), 6, now).unwrap()
    }

    #[test]
    fn create_assigns_ids_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));

        store.create("ci-chan-1", vec![], at(0)).unwrap();
        let second = store.create("ops", vec![json!(1)], at(1)).unwrap();

        assert_eq!(second.id, 2);
        assert_eq!(second.channel_name, "#ops");
        assert_eq!(second.status, ReviewStatus::Pending);
        assert_eq!(store.list()[0].id, 2);
        assert_eq!(store.list()[1].id, 1);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open(&dir, at(0));
            store.create("a", vec![], at(0)).unwrap();
            store.create("b", vec![], at(0)).unwrap();
            store.delete(1).unwrap();
        }

        let mut store = open(&dir, at(10));
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.create("c", vec![], at(10)).unwrap().id, 3);
    }

    #[test]
    fn started_session_completes_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));
        let id = store.create("a", vec![], at(0)).unwrap().id;

        assert_eq!(store.status(id).progress, 0);
        store.start(id, at(0)).unwrap().unwrap();
        assert_eq!(store.status(id).status, ReviewStatus::Running);
        assert_eq!(store.status(id).progress, 42);

        let store = open(&dir, at(5));
        assert_eq!(store.status(id).status, ReviewStatus::Running);
        assert!(store.feedback(id).is_none());

        let store = open(&dir, at(6));
        assert_eq!(store.status(id).status, ReviewStatus::Done);
        assert_eq!(store.status(id).progress, 100);

        let feedback = store.feedback(id).unwrap();
        assert_eq!(feedback.summary_text, "Automatic feedback for #a");
        assert_eq!(feedback.aggregate_score, Some(82));
        let scores: Vec<u8> = feedback.criteria_breakdown.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![60, 70, 80]);
        assert_eq!(feedback.criteria_breakdown[1].criterion_name, "tone");
    }

    #[test]
    fn unknown_sessions_report_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));

        assert_eq!(store.status(77).status, ReviewStatus::Pending);
        assert!(store.start(77, at(0)).unwrap().is_none());
        assert!(store.update_score(77, "tone", 5).unwrap().is_none());
    }

    #[test]
    fn score_edits_clamp_and_revoke_approval() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));
        let id = store.create("a", vec![json!(3), json!("tone")], at(0)).unwrap().id;
        store.start(id, at(0)).unwrap();
        let mut store = open(&dir, at(60));

        store.approve(id, FeedbackPatch::default(), at(61)).unwrap();
        assert!(store.get(id).unwrap().approved);

        let feedback = store.update_score(id, "3", 100).unwrap().unwrap();
        assert_eq!(feedback.criteria_breakdown[0].score, 100);
        assert!(!feedback.approved);
        assert_eq!(feedback.approved_at, None);

        let feedback = store.update_score(id, "tone", -500).unwrap().unwrap();
        assert_eq!(feedback.criteria_breakdown[1].score, 0);

        let unchanged = store.update_score(id, "missing", 10).unwrap().unwrap();
        assert_eq!(unchanged, feedback);
    }

    #[test]
    fn approve_applies_patch_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));
        let id = store.create("a", vec![], at(0)).unwrap().id;

        let patch: FeedbackPatch = serde_json::from_value(json!({
            "summaryText": "Reviewed by hand",
            "aggregateScore": 64,
        }))
        .unwrap();
        let feedback = store.approve(id, patch, at(5)).unwrap().unwrap();

        assert_eq!(feedback.summary_text, "Reviewed by hand");
        assert_eq!(feedback.aggregate_score, Some(64));
        assert!(feedback.approved);
        assert_eq!(feedback.approved_at, Some(at(5)));
        assert!(store.get(id).unwrap().approved);
    }

    #[test]
    fn update_feedback_can_clear_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));

        let patch: FeedbackPatch =
            serde_json::from_value(json!({ "aggregateScore": 70 })).unwrap();
        store.update_feedback(9, patch).unwrap();

        let patch: FeedbackPatch =
            serde_json::from_value(json!({ "aggregateScore": null })).unwrap();
        let feedback = store.update_feedback(9, patch).unwrap();
        assert_eq!(feedback.aggregate_score, None);
        assert_eq!(feedback.summary_text, "");
    }

    #[test]
    fn null_summary_patch_clears_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir, at(0));

        let patch: FeedbackPatch =
            serde_json::from_value(json!({ "summaryText": "edited" })).unwrap();
        assert_eq!(store.update_feedback(1, patch).unwrap().summary_text, "edited");

        let untouched: FeedbackPatch = serde_json::from_value(json!({})).unwrap();
        assert_eq!(store.update_feedback(1, untouched).unwrap().summary_text, "edited");

        let patch: FeedbackPatch =
            serde_json::from_value(json!({ "summaryText": null })).unwrap();
        assert!(!patch.is_empty());
        assert_eq!(store.update_feedback(1, patch).unwrap().summary_text, "");
    }

    #[test]
    fn oversized_completion_delay_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        for secs in [MAX_COMPLETION_DELAY_SECS + 1, 100_000_000_000_000_000, u64::MAX] {
            assert!(matches!(
                SessionStore::open(&path, secs, at(0)),
                Err(StoreError::DelayOutOfRange(value)) if value == secs
            ));
        }

        let mut store = SessionStore::open(&path, MAX_COMPLETION_DELAY_SECS, at(0)).unwrap();
        let id = store.create("a", vec![], at(0)).unwrap().id;
        let session = store.start(id, at(0)).unwrap().unwrap();
        assert_eq!(session.due_at, Some(at(MAX_COMPLETION_DELAY_SECS as i64)));

        assert!(matches!(
            store.start(id, DateTime::<Utc>::MAX_UTC),
            Err(StoreError::DueTimeOverflow(_))
        ));
    }

    #[test]
    fn criterion_ids_parse_numbers() {
        assert_eq!(criterion_id_value("4"), json!(4));
        assert_eq!(criterion_id_value(" tone "), json!("tone"));
    }
}
