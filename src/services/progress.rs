use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::operations::{documents, exercises, simulations, topics};
use crate::db::Store;
use crate::services::oracle::{OracleChain, OracleError};
use crate::services::page_ranges::{compress_page_ranges, parse_page_ranges};
use crate::services::verdicts::{request_verdicts, VerdictItem};
use crate::services::Stage;
use crate::state_machine::{exercise_transition, ExerciseEvent, TransitionError};
use crate::types::{
    now_ms, Correctness, Document, ExerciseInstance, ExerciseStats, ExerciseStatus, QuestionOutcome,
    Simulation, SimulationStats, Timestamp, Topic,
};

const EXERCISE_WEIGHT: f64 = 0.4;
const SIMULATION_WEIGHT: f64 = 0.6;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{stage} failed: {source}")]
    Oracle {
        stage: Stage,
        #[source]
        source: OracleError,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

// ========== Pure score functions ==========

/// `round(100 * success / attempts)` over exercises and simulations; `None` before any attempt.
pub fn mastery_score(exercise: &ExerciseStats, simulation: &SimulationStats) -> Option<u8> {
    let attempts = exercise.appearances + simulation.appearances;
    if attempts == 0 {
        return None;
    }
    let success = exercise.completed + simulation.correct;
    let score = (100.0 * success / attempts as f64).round();
    Some(score.clamp(0.0, 100.0) as u8)
}

pub fn topic_mastery(topic: &Topic) -> Option<u8> {
    mastery_score(&topic.exercise_stats, &topic.simulation_stats)
}

/// A topic is covered once every one of its source pages has been studied.
pub fn is_affrontato(source_pages: &BTreeSet<u32>, studied: &BTreeSet<u32>) -> bool {
    !source_pages.is_empty() && source_pages.is_subset(studied)
}

/// Share of instances corrected as correct or partially correct.
pub fn exercise_rate(instances: &[ExerciseInstance]) -> Option<f64> {
    if instances.is_empty() {
        return None;
    }
    let successful = instances
        .iter()
        .filter(|e| e.status == ExerciseStatus::Corrected && e.correctness.is_success())
        .count();
    Some(successful as f64 / instances.len() as f64)
}

/// Mean `score / totalPoints` over graded simulations.
pub fn simulation_rate(sims: &[Simulation]) -> Option<f64> {
    let ratios: Vec<f64> = sims.iter().filter_map(Simulation::score_ratio).collect();
    if ratios.is_empty() {
        return None;
    }
    Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
}

pub fn blend_comprehension(exercise_rate: Option<f64>, simulation_rate: Option<f64>) -> Option<f64> {
    let blended = match (exercise_rate, simulation_rate) {
        (Some(ex), Some(sim)) => EXERCISE_WEIGHT * ex + SIMULATION_WEIGHT * sim,
        (Some(ex), None) => ex,
        (None, Some(sim)) => sim,
        (None, None) => return None,
    };
    Some(blended.clamp(0.0, 1.0))
}

pub fn comprehension_score(instances: &[ExerciseInstance], sims: &[Simulation]) -> Option<f64> {
    blend_comprehension(exercise_rate(instances), simulation_rate(sims))
}

/// Applies one exercise correction to the topic's stats. `previous` is the
/// correctness of an earlier correction of the same instance, so a regrade
/// moves the credit instead of counting a second appearance.
pub fn record_exercise_outcome(
    topic: &mut Topic,
    previous: Option<Correctness>,
    outcome: Correctness,
    at: Timestamp,
) {
    let old = previous.and_then(Correctness::credit);
    let new = outcome.credit();
    let stats = &mut topic.exercise_stats;

    match (old, new) {
        (None, Some(_)) => stats.appearances += 1,
        (Some(_), None) => stats.appearances = stats.appearances.saturating_sub(1),
        _ => {}
    }
    stats.completed = (stats.completed + new.unwrap_or(0.0) - old.unwrap_or(0.0)).max(0.0);

    if new.is_some() {
        topic.last_practiced = Some(at);
    }
    topic.mastery_score = topic_mastery(topic);
}

/// Counts every graded question resolved to this topic.
pub fn record_simulation_outcome(topic: &mut Topic, outcomes: &[QuestionOutcome], at: Timestamp) {
    let mut touched = false;
    for outcome in outcomes.iter().filter(|o| o.topic_id.as_deref() == Some(topic.id.as_str())) {
        let Some(credit) = outcome.correctness.credit() else { continue };
        topic.simulation_stats.appearances += 1;
        topic.simulation_stats.correct += credit;
        touched = true;
    }
    if touched {
        topic.last_practiced = Some(at);
        topic.mastery_score = topic_mastery(topic);
    }
}

// ========== Recompute helpers (run inside the caller's transaction) ==========

pub(crate) async fn recompute_comprehension(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
) -> Result<Option<f64>, sqlx::Error> {
    let instances = exercises::list_exercises_for_document(conn, subject, document_id).await?;
    let sims = simulations::list_graded_simulations_for_document(conn, subject, document_id).await?;
    let score = comprehension_score(&instances, &sims);
    documents::set_comprehension_score(conn, subject, document_id, score).await?;
    Ok(score)
}

/// Re-evaluates `affrontato` for the document's topics; returns ids that just became covered.
async fn recompute_affrontato(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
    studied: &BTreeSet<u32>,
    at: Timestamp,
) -> Result<Vec<String>, sqlx::Error> {
    let mut newly_covered = Vec::new();
    for mut topic in topics::list_topics_for_document(conn, subject, document_id).await? {
        let covered = is_affrontato(&topic.source_page_numbers, studied);
        if covered == topic.affrontato {
            continue;
        }
        topic.affrontato = covered;
        if covered {
            topic.last_studied = Some(at);
            newly_covered.push(topic.id.clone());
        }
        topics::upsert_topic(conn, &topic).await?;
    }
    Ok(newly_covered)
}

// ========== Documents & topics ==========

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkStudiedOutcome {
    pub document: Document,
    pub newly_affrontato: Vec<String>,
}

/// Stores a document as delivered by ingestion, canonicalizing its studied pages.
/// `studiedPagesUpdatedAt` moves only when the canonical range differs from the stored one.
pub async fn upsert_document(store: &Store, subject: &str, mut doc: Document) -> Result<Document, ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let now = now_ms();
    let studied = parse_page_ranges(&doc.studied_pages, doc.total_pages);
    doc.subject_name = subject.to_string();
    doc.studied_pages = compress_page_ranges(&studied);

    let stored = documents::get_document(&mut tx, subject, &doc.id).await?;
    let previous_pages = stored.as_ref().map_or("", |d| d.studied_pages.as_str());
    if doc.studied_pages != previous_pages {
        doc.studied_pages_updated_at = Some(now);
    } else if let Some(stored) = &stored {
        doc.studied_pages_updated_at = stored.studied_pages_updated_at;
    }
    if let Some(stored) = &stored {
        doc.created_at = stored.created_at;
    } else if doc.created_at == 0 {
        doc.created_at = now;
    }
    for chunk in &mut doc.content_chunks {
        chunk.is_studied = studied.contains(&chunk.page_number);
    }

    documents::upsert_document(&mut tx, &doc).await?;
    recompute_affrontato(&mut tx, subject, &doc.id, &studied, now).await?;
    doc.comprehension_score = recompute_comprehension(&mut tx, subject, &doc.id).await?;

    tx.commit().await?;
    Ok(doc)
}

/// Replaces the studied-page set of a document and propagates coverage to its topics.
pub async fn mark_studied(
    store: &Store,
    subject: &str,
    document_id: &str,
    range: &str,
) -> Result<MarkStudiedOutcome, ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let mut doc = documents::get_document(&mut tx, subject, document_id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("document {document_id}")))?;

    let now = now_ms();
    let studied = parse_page_ranges(range, doc.total_pages);
    let canonical = compress_page_ranges(&studied);
    let changed = canonical != doc.studied_pages;

    documents::update_studied_pages(&mut tx, subject, &doc.id, &canonical, changed.then_some(now)).await?;
    documents::mark_chunks_studied(&mut tx, subject, &doc.id, &studied).await?;
    let newly_affrontato = recompute_affrontato(&mut tx, subject, &doc.id, &studied, now).await?;
    let comprehension = recompute_comprehension(&mut tx, subject, &doc.id).await?;

    tx.commit().await?;

    doc.studied_pages = canonical;
    if changed {
        doc.studied_pages_updated_at = Some(now);
    }
    for chunk in &mut doc.content_chunks {
        chunk.is_studied = studied.contains(&chunk.page_number);
    }
    doc.comprehension_score = comprehension;

    tracing::info!(
        subject,
        document_id,
        studied_pages = %doc.studied_pages,
        newly_affrontato = newly_affrontato.len(),
        "studied pages updated"
    );

    Ok(MarkStudiedOutcome {
        document: doc,
        newly_affrontato,
    })
}

/// Inserts or updates topics. An existing topic only takes title, document and
/// pages from the payload and keeps its recorded stats; a new topic starts from
/// the stats it carries. Coverage and mastery are always derived.
pub async fn upsert_topics(store: &Store, subject: &str, incoming: Vec<Topic>) -> Result<Vec<Topic>, ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;
    let now = now_ms();

    let mut out = Vec::with_capacity(incoming.len());
    for mut topic in incoming {
        if topic.id.trim().is_empty() {
            return Err(ProgressError::Validation("topic id must not be empty".into()));
        }
        let doc = documents::get_document(&mut tx, subject, &topic.source_document_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("document {}", topic.source_document_id)))?;

        if let Some(stored) = topics::get_topic(&mut tx, subject, &topic.id).await? {
            topic.exercise_stats = stored.exercise_stats;
            topic.simulation_stats = stored.simulation_stats;
            topic.last_practiced = stored.last_practiced;
            topic.last_studied = stored.last_studied;
        }

        topic.subject_name = subject.to_string();
        topic
            .source_page_numbers
            .retain(|p| *p >= 1 && *p <= doc.total_pages);
        let covered = is_affrontato(&topic.source_page_numbers, &doc.studied_page_set());
        if covered && topic.last_studied.is_none() {
            topic.last_studied = Some(now);
        }
        topic.affrontato = covered;
        topic.mastery_score = topic_mastery(&topic);

        topics::upsert_topic(&mut tx, &topic).await?;
        out.push(topic);
    }

    tx.commit().await?;
    Ok(out)
}

pub async fn list_topics(store: &Store, subject: &str) -> Result<Vec<Topic>, ProgressError> {
    let mut conn = store.pool().acquire().await?;
    Ok(topics::list_topics(&mut conn, subject).await?)
}

pub async fn get_document(store: &Store, subject: &str, id: &str) -> Result<Document, ProgressError> {
    let mut conn = store.pool().acquire().await?;
    documents::get_document(&mut conn, subject, id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("document {id}")))
}

/// Removes a document, its chunks, its topics and their exercise instances.
pub async fn delete_document(store: &Store, subject: &str, id: &str) -> Result<(), ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    for topic in topics::list_topics_for_document(&mut tx, subject, id).await? {
        exercises::delete_exercises_for_topic(&mut tx, subject, &topic.id).await?;
        topics::delete_topic(&mut tx, subject, &topic.id).await?;
    }
    if !documents::delete_document(&mut tx, subject, id).await? {
        return Err(ProgressError::NotFound(format!("document {id}")));
    }

    tx.commit().await?;
    tracing::info!(subject, document_id = id, "document deleted");
    Ok(())
}

pub async fn delete_topic(store: &Store, subject: &str, id: &str) -> Result<(), ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let topic = topics::get_topic(&mut tx, subject, id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("topic {id}")))?;
    exercises::delete_exercises_for_topic(&mut tx, subject, id).await?;
    topics::delete_topic(&mut tx, subject, id).await?;
    recompute_comprehension(&mut tx, subject, &topic.source_document_id).await?;

    tx.commit().await?;
    Ok(())
}

// ========== Exercises ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExercise {
    pub topic_id: String,
    pub question: String,
    #[serde(default)]
    pub solution: String,
}

pub async fn create_exercise(store: &Store, subject: &str, input: NewExercise) -> Result<ExerciseInstance, ProgressError> {
    if input.question.trim().is_empty() {
        return Err(ProgressError::Validation("question must not be empty".into()));
    }

    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let topic = topics::get_topic(&mut tx, subject, &input.topic_id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("topic {}", input.topic_id)))?;

    let instance = ExerciseInstance {
        id: Uuid::new_v4().to_string(),
        subject_name: subject.to_string(),
        topic_id: topic.id,
        question: input.question,
        solution: input.solution,
        user_answer: None,
        status: ExerciseStatus::InProgress,
        correctness: Correctness::NotEvaluated,
        created_at: now_ms(),
        corrected_at: None,
    };
    exercises::insert_exercise(&mut tx, &instance).await?;
    // a new uncorrected instance lowers the document's exercise rate
    recompute_comprehension(&mut tx, subject, &topic.source_document_id).await?;

    tx.commit().await?;
    Ok(instance)
}

pub async fn submit_exercise(
    store: &Store,
    subject: &str,
    id: &str,
    answer: String,
) -> Result<ExerciseInstance, ProgressError> {
    let _guard = store.subject_lock(subject).await;
    let mut conn = store.pool().acquire().await?;

    let mut instance = exercises::get_exercise(&mut conn, subject, id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("exercise {id}")))?;
    instance.status = exercise_transition(instance.status, ExerciseEvent::Submit)?;
    instance.user_answer = Some(answer);

    exercises::update_exercise(&mut conn, &instance).await?;
    Ok(instance)
}

/// Records a correction (or regrade) and updates the topic and document scores atomically.
pub async fn correct_exercise(
    store: &Store,
    subject: &str,
    id: &str,
    correctness: Correctness,
) -> Result<ExerciseInstance, ProgressError> {
    if correctness.credit().is_none() {
        return Err(ProgressError::Validation(format!(
            "{} is not a correction outcome",
            correctness.as_str()
        )));
    }

    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let mut instance = exercises::get_exercise(&mut tx, subject, id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("exercise {id}")))?;
    let previous = (instance.status == ExerciseStatus::Corrected).then_some(instance.correctness);
    instance.status = exercise_transition(instance.status, ExerciseEvent::Correct)?;

    let now = now_ms();
    instance.correctness = correctness;
    instance.corrected_at = Some(now);
    exercises::update_exercise(&mut tx, &instance).await?;

    let mut topic = topics::get_topic(&mut tx, subject, &instance.topic_id)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("topic {}", instance.topic_id)))?;
    record_exercise_outcome(&mut topic, previous, correctness, now);
    topics::upsert_topic(&mut tx, &topic).await?;
    recompute_comprehension(&mut tx, subject, &topic.source_document_id).await?;

    tx.commit().await?;

    tracing::info!(
        subject,
        exercise_id = id,
        topic_id = %topic.id,
        correctness = correctness.as_str(),
        regrade = previous.is_some(),
        mastery = ?topic.mastery_score,
        "exercise corrected"
    );
    Ok(instance)
}

/// Asks the oracle to judge a submitted answer, then records the verdict.
pub async fn evaluate_exercise(
    store: &Store,
    oracle: &OracleChain,
    subject: &str,
    id: &str,
    cancel: &CancellationToken,
) -> Result<ExerciseInstance, ProgressError> {
    let instance = {
        let mut conn = store.pool().acquire().await?;
        exercises::get_exercise(&mut conn, subject, id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(format!("exercise {id}")))?
    };
    // fail before spending an oracle call on an illegal transition
    exercise_transition(instance.status, ExerciseEvent::Correct)?;

    let answer = instance.user_answer.as_deref().unwrap_or_default();
    let correctness = if answer.trim().is_empty() {
        Correctness::Incorrect
    } else {
        let items = [VerdictItem {
            id: &instance.id,
            question: &instance.question,
            reference: Some(&instance.solution),
            answer,
        }];
        let verdicts = request_verdicts(oracle, subject, &items, cancel)
            .await
            .map_err(|source| ProgressError::Oracle {
                stage: Stage::Evaluation,
                source,
            })?;
        match verdicts.get(&instance.id) {
            Some(verdict) => verdict.correctness,
            None => {
                tracing::warn!(subject, exercise_id = id, "no usable verdict for exercise, scoring it incorrect");
                Correctness::Incorrect
            }
        }
    };

    correct_exercise(store, subject, id, correctness).await
}

// ========== Aggregates ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatsSummary {
    pub document_count: usize,
    pub topic_count: usize,
    pub affrontato_count: usize,
    pub average_mastery: Option<f64>,
    pub studied_pages: usize,
    pub total_pages: usize,
}

pub fn summarize(docs: &[Document], topic_list: &[Topic]) -> TopicStatsSummary {
    let masteries: Vec<f64> = topic_list
        .iter()
        .filter_map(topic_mastery)
        .map(f64::from)
        .collect();

    TopicStatsSummary {
        document_count: docs.len(),
        topic_count: topic_list.len(),
        affrontato_count: topic_list.iter().filter(|t| t.affrontato).count(),
        average_mastery: (!masteries.is_empty())
            .then(|| masteries.iter().sum::<f64>() / masteries.len() as f64),
        studied_pages: docs.iter().map(Document::studied_page_count).sum(),
        total_pages: docs.iter().map(|d| d.total_pages as usize).sum(),
    }
}

pub async fn topic_stats_summary(store: &Store, subject: &str) -> Result<TopicStatsSummary, ProgressError> {
    let mut conn = store.pool().acquire().await?;
    let docs = documents::list_documents(&mut conn, subject).await?;
    let topic_list = topics::list_topics(&mut conn, subject).await?;
    Ok(summarize(&docs, &topic_list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimulationStatus;

    fn topic(pages: &[u32]) -> Topic {
        Topic {
            id: "t1".into(),
            subject_name: "analisi".into(),
            title: String::new(),
            source_document_id: "d1".into(),
            source_page_numbers: pages.iter().copied().collect(),
            affrontato: false,
            exercise_stats: ExerciseStats::default(),
            simulation_stats: SimulationStats::default(),
            mastery_score: None,
            last_practiced: None,
            last_studied: None,
        }
    }

    fn instance(status: ExerciseStatus, correctness: Correctness) -> ExerciseInstance {
        ExerciseInstance {
            id: Uuid::new_v4().to_string(),
            subject_name: "analisi".into(),
            topic_id: "t1".into(),
            question: "q".into(),
            solution: "s".into(),
            user_answer: None,
            status,
            correctness,
            created_at: 0,
            corrected_at: None,
        }
    }

    fn graded_sim(score: f64, total: f64) -> Simulation {
        Simulation {
            id: Uuid::new_v4().to_string(),
            subject_name: "analisi".into(),
            requested_structure: Default::default(),
            questions: vec![],
            status: SimulationStatus::Completed,
            with_oral: false,
            topic_ids: vec![],
            source_document_ids: vec!["d1".into()],
            answers: vec![],
            outcomes: vec![],
            score: Some(score),
            total_points: total,
            grade: None,
            final_grade: None,
            oral: None,
            created_at: 0,
            graded_at: Some(1),
            completed_at: Some(1),
        }
    }

    #[test]
    fn test_mastery_undefined_without_attempts() {
        assert_eq!(mastery_score(&ExerciseStats::default(), &SimulationStats::default()), None);
    }

    #[test]
    fn test_mastery_blends_both_sources() {
        let ex = ExerciseStats { appearances: 3, completed: 2.5 };
        let sim = SimulationStats { appearances: 1, correct: 0.0 };
        // 2.5 / 4 = 62.5 -> 63
        assert_eq!(mastery_score(&ex, &sim), Some(63));
        let perfect = ExerciseStats { appearances: 2, completed: 2.0 };
        assert_eq!(mastery_score(&perfect, &SimulationStats::default()), Some(100));
    }

    #[test]
    fn test_affrontato_requires_full_coverage() {
        let studied: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert!(is_affrontato(&[2, 3].into_iter().collect(), &studied));
        assert!(!is_affrontato(&[3, 4].into_iter().collect(), &studied));
        assert!(!is_affrontato(&BTreeSet::new(), &studied));
    }

    #[test]
    fn test_comprehension_weighting() {
        let instances = vec![
            instance(ExerciseStatus::Corrected, Correctness::Correct),
            instance(ExerciseStatus::Corrected, Correctness::Incorrect),
        ];
        let sims = vec![graded_sim(10.0, 10.0)];
        let score = comprehension_score(&instances, &sims).unwrap();
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_comprehension_single_source_and_none() {
        assert_eq!(blend_comprehension(Some(0.25), None), Some(0.25));
        assert_eq!(blend_comprehension(None, Some(0.7)), Some(0.7));
        assert_eq!(blend_comprehension(None, None), None);
    }

    #[test]
    fn test_exercise_rate_counts_partial_and_pending() {
        let instances = vec![
            instance(ExerciseStatus::Corrected, Correctness::PartiallyCorrect),
            instance(ExerciseStatus::InProgress, Correctness::NotEvaluated),
            instance(ExerciseStatus::Submitted, Correctness::NotEvaluated),
            instance(ExerciseStatus::Corrected, Correctness::Correct),
        ];
        assert_eq!(exercise_rate(&instances), Some(0.5));
        assert_eq!(exercise_rate(&[]), None);
    }

    #[test]
    fn test_record_exercise_outcome_credits() {
        let mut t = topic(&[1]);
        record_exercise_outcome(&mut t, None, Correctness::Correct, 10);
        record_exercise_outcome(&mut t, None, Correctness::PartiallyCorrect, 11);
        record_exercise_outcome(&mut t, None, Correctness::Incorrect, 12);
        assert_eq!(t.exercise_stats.appearances, 3);
        assert_eq!(t.exercise_stats.completed, 1.5);
        assert_eq!(t.mastery_score, Some(50));
        assert_eq!(t.last_practiced, Some(12));
    }

    #[test]
    fn test_regrade_adjusts_instead_of_double_counting() {
        let mut t = topic(&[1]);
        record_exercise_outcome(&mut t, None, Correctness::Incorrect, 10);
        record_exercise_outcome(&mut t, Some(Correctness::Incorrect), Correctness::Correct, 11);
        assert_eq!(t.exercise_stats.appearances, 1);
        assert_eq!(t.exercise_stats.completed, 1.0);

        // regrading with the same verdict changes nothing
        record_exercise_outcome(&mut t, Some(Correctness::Correct), Correctness::Correct, 12);
        assert_eq!(t.exercise_stats.appearances, 1);
        assert_eq!(t.exercise_stats.completed, 1.0);

        record_exercise_outcome(&mut t, Some(Correctness::Correct), Correctness::NotEvaluated, 13);
        assert_eq!(t.exercise_stats.appearances, 0);
        assert_eq!(t.exercise_stats.completed, 0.0);
        assert_eq!(t.mastery_score, None);
    }

    #[test]
    fn test_record_simulation_outcome_filters_by_topic() {
        let mut t = topic(&[1]);
        let outcome = |topic_id: Option<&str>, c| QuestionOutcome {
            question_id: "q".into(),
            correctness: c,
            points_awarded: 0.0,
            max_points: 1.0,
            topic_id: topic_id.map(str::to_string),
            feedback: None,
        };
        let outcomes = vec![
            outcome(Some("t1"), Correctness::Correct),
            outcome(Some("t1"), Correctness::PartiallyCorrect),
            outcome(Some("t2"), Correctness::Correct),
            outcome(None, Correctness::Correct),
        ];
        record_simulation_outcome(&mut t, &outcomes, 99);
        assert_eq!(t.simulation_stats.appearances, 2);
        assert_eq!(t.simulation_stats.correct, 1.5);
        assert_eq!(t.mastery_score, Some(75));
        assert_eq!(t.last_practiced, Some(99));
    }
}
