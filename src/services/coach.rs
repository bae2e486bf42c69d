use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::operations::{coach, documents, exercises, simulations, topics};
use crate::db::Store;
use crate::services::oracle::{OracleChain, OracleError, OracleRequest};
use crate::services::progress::{summarize, topic_mastery};
use crate::services::selector::rank_topics;
use crate::services::Stage;
use crate::state_machine::{self, active_task_index, CoachSyncState, TaskError};
use crate::types::{
    now_ms, CoachSyncRecord, CoachTask, Document, ExerciseInstance, ExerciseStatus, Simulation,
    SimulationStatus, Timestamp, Topic,
};

const COACH_SYSTEM_PROMPT: &str = "You are a study coach for a university student. From the \
progress report write a short summary, the student's strengths and weaknesses, and an ordered \
list of concrete next tasks (most urgent first). Reply with JSON only: \
{\"summary\": string, \"strengths\": [string], \"weaknesses\": [string], \"tasks\": [string]}";

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("{stage} failed: {source}")]
    Oracle {
        stage: Stage,
        #[source]
        source: OracleError,
    },
    #[error("coach response rejected: {0}")]
    InvalidResponse(String),
    #[error("task {task_id} is locked until earlier tasks are completed")]
    TaskLocked { task_id: String },
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl From<TaskError> for CoachError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => CoachError::TaskNotFound(id),
            TaskError::Locked { task_id } => CoachError::TaskLocked { task_id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "record", rename_all = "snake_case")]
pub enum SyncOutcome {
    Full(CoachSyncRecord),
    Delta(CoachSyncRecord),
    /// Nothing changed since the last sync, or a concurrent sync already won.
    Unchanged(CoachSyncRecord),
}

impl SyncOutcome {
    pub fn record(&self) -> &CoachSyncRecord {
        match self {
            SyncOutcome::Full(r) | SyncOutcome::Delta(r) | SyncOutcome::Unchanged(r) => r,
        }
    }

    pub fn into_record(self) -> CoachSyncRecord {
        match self {
            SyncOutcome::Full(r) | SyncOutcome::Delta(r) | SyncOutcome::Unchanged(r) => r,
        }
    }
}

// ========== Context ==========

/// Activity strictly after the last sync.
#[derive(Debug, Default)]
pub struct SyncDelta {
    pub exercises: Vec<ExerciseInstance>,
    pub simulations: Vec<Simulation>,
    pub documents: Vec<Document>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty() && self.simulations.is_empty() && self.documents.is_empty()
    }
}

fn format_day(ts: Option<Timestamp>) -> String {
    ts.and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn format_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.0}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_grade(sim: &Simulation) -> String {
    match (sim.grade, sim.final_grade) {
        (Some(g), Some(f)) => format!("written {g:.1}/30, final {f:.1}/30"),
        (Some(g), None) => format!("written {g:.1}/30"),
        _ => "not graded".to_string(),
    }
}

/// Cumulative picture of the whole subject.
pub fn build_full_context(subject: &str, docs: &[Document], topic_list: &[Topic], sims: &[Simulation]) -> String {
    let overview = summarize(docs, topic_list);
    let mut out = format!(
        "Subject: {subject}\nStudied pages: {}/{}; topics covered: {}/{}; average mastery: {}\n",
        overview.studied_pages,
        overview.total_pages,
        overview.affrontato_count,
        overview.topic_count,
        overview
            .average_mastery
            .map(|m| format!("{m:.0}"))
            .unwrap_or_else(|| "n/a".to_string()),
    );

    out.push_str("\nDocuments:\n");
    for doc in docs {
        let _ = writeln!(
            out,
            "- {} ({}): {} studied [{}], comprehension {}",
            doc.title,
            doc.id,
            format_percent(Some(doc.studied_ratio())),
            doc.studied_pages,
            format_percent(doc.comprehension_score),
        );
    }

    out.push_str("\nTopics, weakest first:\n");
    for topic in rank_topics(topic_list) {
        let _ = writeln!(
            out,
            "- {}: mastery {}, {}, last practiced {}",
            topic.title,
            topic_mastery(topic).map(|m| m.to_string()).unwrap_or_else(|| "n/a".to_string()),
            if topic.affrontato { "studied" } else { "not studied" },
            format_day(topic.last_practiced),
        );
    }

    let finished: Vec<&Simulation> = sims
        .iter()
        .filter(|s| s.status == SimulationStatus::Completed || s.grade.is_some())
        .collect();
    if !finished.is_empty() {
        out.push_str("\nExam simulations:\n");
        for sim in finished {
            let _ = writeln!(out, "- {}: {}", format_day(Some(sim.created_at)), format_grade(sim));
        }
    }
    out
}

/// Previous coach state plus what happened since.
pub fn build_delta_context(previous: &CoachSyncRecord, delta: &SyncDelta, topic_list: &[Topic]) -> String {
    let title_of = |topic_id: &str| {
        topic_list
            .iter()
            .find(|t| t.id == topic_id)
            .map(|t| t.title.clone())
            .unwrap_or_else(|| topic_id.to_string())
    };

    let mut out = format!("Previous summary: {}\n", previous.summary);
    let _ = writeln!(out, "Previous strengths: {}", previous.strengths.join("; "));
    let _ = writeln!(out, "Previous weaknesses: {}", previous.weaknesses.join("; "));
    out.push_str("Previous tasks:\n");
    for task in &previous.tasks {
        let _ = writeln!(out, "- [{}] {}", if task.is_completed { "x" } else { " " }, task.text);
    }

    out.push_str("\nSince the last update:\n");
    for ex in &delta.exercises {
        let state = match ex.status {
            ExerciseStatus::Corrected => ex.correctness.as_str(),
            other => other.as_str(),
        };
        let _ = writeln!(out, "- exercise on {}: {}", title_of(&ex.topic_id), state);
    }
    for sim in &delta.simulations {
        let _ = writeln!(out, "- exam simulation: {}", format_grade(sim));
    }
    for doc in &delta.documents {
        let _ = writeln!(
            out,
            "- studied pages of {} now {} ({})",
            doc.title,
            doc.studied_pages,
            format_percent(Some(doc.studied_ratio()))
        );
    }
    out
}

// ========== Oracle response ==========

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeneratedTask {
    Text(String),
    Object { text: String },
}

impl GeneratedTask {
    fn into_text(self) -> String {
        match self {
            GeneratedTask::Text(text) | GeneratedTask::Object { text } => text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoachResponse {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    tasks: Vec<GeneratedTask>,
}

fn coach_request(prompt: String) -> OracleRequest {
    OracleRequest {
        system: COACH_SYSTEM_PROMPT.to_string(),
        prompt,
        schema_name: "coach_state",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "strengths": { "type": "array", "items": { "type": "string" } },
                "weaknesses": { "type": "array", "items": { "type": "string" } },
                "tasks": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["summary", "strengths", "weaknesses", "tasks"]
        }),
    }
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn into_record(subject: &str, response: CoachResponse, synced_at: Timestamp) -> Result<CoachSyncRecord, CoachError> {
    let summary = response.summary.trim().to_string();
    if summary.is_empty() {
        return Err(CoachError::InvalidResponse("empty summary".into()));
    }
    let tasks: Vec<CoachTask> = response
        .tasks
        .into_iter()
        .map(GeneratedTask::into_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| CoachTask {
            id: Uuid::new_v4().to_string(),
            text,
            is_completed: false,
        })
        .collect();
    if tasks.is_empty() {
        return Err(CoachError::InvalidResponse("no tasks".into()));
    }

    Ok(CoachSyncRecord {
        subject_name: subject.to_string(),
        last_sync_timestamp: Some(synced_at),
        tasks,
        summary,
        strengths: clean(response.strengths),
        weaknesses: clean(response.weaknesses),
    })
}

// ========== Operations ==========

pub async fn get(store: &Store, subject: &str) -> Result<Option<CoachSyncRecord>, CoachError> {
    let mut conn = store.pool().acquire().await?;
    Ok(coach::get_record(&mut conn, subject).await?)
}

pub fn active_task(record: &CoachSyncRecord) -> Option<&CoachTask> {
    active_task_index(record).map(|i| &record.tasks[i])
}

/// Full sync when never synced, otherwise a delta sync that skips the
/// oracle entirely when nothing happened since the last one.
pub async fn sync(
    store: &Store,
    oracle: &OracleChain,
    subject: &str,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, CoachError> {
    // Snapshot under the subject lock so every write stamped before `started`
    // is in the delta and none stamped after it is.
    let (previous, prompt, started) = {
        let _guard = store.subject_lock(subject).await;
        let started = now_ms();
        let mut conn = store.pool().acquire().await?;
        let previous = coach::get_record(&mut conn, subject).await?;
        let topic_list = topics::list_topics(&mut conn, subject).await?;

        let prompt = match (CoachSyncState::of(previous.as_ref()), previous.as_ref()) {
            (CoachSyncState::Synced, Some(record)) => {
                let since = record.last_sync_timestamp.unwrap_or_default();
                let delta = SyncDelta {
                    exercises: exercises::list_exercises_created_after(&mut conn, subject, since).await?,
                    simulations: simulations::list_simulations_finished_after(&mut conn, subject, since).await?,
                    documents: documents::list_documents_studied_after(&mut conn, subject, since).await?,
                };
                if delta.is_empty() {
                    tracing::debug!(subject, since, "coach sync skipped, no activity");
                    return Ok(SyncOutcome::Unchanged(record.clone()));
                }
                tracing::info!(
                    subject,
                    exercises = delta.exercises.len(),
                    simulations = delta.simulations.len(),
                    documents = delta.documents.len(),
                    "coach delta sync"
                );
                build_delta_context(record, &delta, &topic_list)
            }
            _ => {
                let docs = documents::list_documents(&mut conn, subject).await?;
                let sims = simulations::list_simulations(&mut conn, subject).await?;
                tracing::info!(subject, documents = docs.len(), topics = topic_list.len(), "coach full sync");
                build_full_context(subject, &docs, &topic_list, &sims)
            }
        };
        (previous, prompt, started)
    };

    let response: CoachResponse = oracle
        .generate_as(coach_request(prompt), cancel)
        .await
        .map_err(|source| CoachError::Oracle {
            stage: Stage::Sync,
            source,
        })?;
    let record = into_record(subject, response, started)?;

    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let current = coach::get_record(&mut tx, subject).await?;
    let seen = previous.as_ref().and_then(|r| r.last_sync_timestamp);
    if let Some(current) = current.filter(|c| c.last_sync_timestamp != seen) {
        tracing::info!(subject, "coach sync superseded by a concurrent sync, discarding result");
        return Ok(SyncOutcome::Unchanged(current));
    }

    coach::upsert_record(&mut tx, &record).await?;
    tx.commit().await?;

    Ok(match previous {
        Some(p) if p.last_sync_timestamp.is_some() => SyncOutcome::Delta(record),
        _ => SyncOutcome::Full(record),
    })
}

/// Completes the active task. Completing a finished task is a no-op.
pub async fn complete_task(store: &Store, subject: &str, task_id: &str) -> Result<CoachSyncRecord, CoachError> {
    let _guard = store.subject_lock(subject).await;
    let mut conn = store.pool().acquire().await?;

    let mut record = coach::get_record(&mut conn, subject)
        .await?
        .ok_or_else(|| CoachError::NotFound(format!("coach state for {subject}")))?;

    if state_machine::complete_task(&mut record, task_id)? {
        coach::upsert_record(&mut conn, &record).await?;
        tracing::info!(subject, task_id, "coach task completed");
    }
    Ok(record)
}

/// Drops the record so the next sync is a full one.
pub async fn reset(store: &Store, subject: &str) -> Result<bool, CoachError> {
    let _guard = store.subject_lock(subject).await;
    let mut conn = store.pool().acquire().await?;
    Ok(coach::delete_record(&mut conn, subject).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(summary: &str, tasks: &[&str]) -> CoachResponse {
        CoachResponse {
            summary: summary.into(),
            strengths: vec![" limits ".into(), "".into()],
            weaknesses: vec![],
            tasks: tasks.iter().map(|t| GeneratedTask::Text(t.to_string())).collect(),
        }
    }

    #[test]
    fn test_into_record_validates() {
        assert!(matches!(
            into_record("s", response("  ", &["a"]), 1),
            Err(CoachError::InvalidResponse(_))
        ));
        assert!(matches!(
            into_record("s", response("ok", &[" ", ""]), 1),
            Err(CoachError::InvalidResponse(_))
        ));

        let record = into_record("s", response("ok", &["read ch.1", " ", "do ex 3"]), 42).unwrap();
        assert_eq!(record.last_sync_timestamp, Some(42));
        assert_eq!(record.tasks.len(), 2);
        assert!(record.tasks.iter().all(|t| !t.is_completed));
        assert_eq!(record.strengths, vec!["limits".to_string()]);
    }

    #[test]
    fn test_tasks_accept_objects() {
        let raw = serde_json::json!({
            "summary": "fine",
            "tasks": [{"text": "review integrals"}, "solve 3 limits"]
        });
        let parsed: CoachResponse = serde_json::from_value(raw).unwrap();
        let record = into_record("s", parsed, 1).unwrap();
        assert_eq!(record.tasks[0].text, "review integrals");
        assert_eq!(record.tasks[1].text, "solve 3 limits");
    }

    #[test]
    fn test_task_error_mapping() {
        let err: CoachError = TaskError::Locked { task_id: "t".into() }.into();
        assert!(matches!(err, CoachError::TaskLocked { .. }));
    }

    #[test]
    fn test_delta_is_empty() {
        assert!(SyncDelta::default().is_empty());
    }

    #[test]
    fn test_active_task() {
        let mut record = CoachSyncRecord::default();
        assert!(active_task(&record).is_none());
        record.tasks = vec![
            CoachTask { id: "1".into(), text: "a".into(), is_completed: true },
            CoachTask { id: "2".into(), text: "b".into(), is_completed: false },
        ];
        assert_eq!(active_task(&record).map(|t| t.id.as_str()), Some("2"));
    }
}
