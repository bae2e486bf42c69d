use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::operations::{documents, simulations, topics};
use crate::db::Store;
use crate::services::oracle::{OracleChain, OracleError, OracleRequest};
use crate::services::page_ranges::compress_page_ranges;
use crate::services::progress::{record_simulation_outcome, recompute_comprehension};
use crate::services::selector::rank_topics;
use crate::services::verdicts::{request_verdicts, VerdictItem};
use crate::services::Stage;
use crate::state_machine::{simulation_transition, SimulationEvent, TransitionError};
use crate::types::{
    now_ms, Correctness, OralExam, Question, QuestionKind, QuestionOutcome, Simulation, SimulationStatus,
    SimulationStructure, SubmittedAnswer, Topic,
};

pub const MAX_GRADE: f64 = 30.0;
pub const MIN_FINAL_GRADE: f64 = 1.0;
const CONTEXT_CHARS_PER_TOPIC: usize = 600;

#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("requested structure has no questions")]
    EmptyStructure,
    #[error("generated exam does not match the requested structure (expected {expected:?}, got {actual:?})")]
    StructureMismatch {
        expected: SimulationStructure,
        actual: SimulationStructure,
    },
    #[error("generated question {index} is invalid: {reason}")]
    InvalidQuestion { index: usize, reason: String },
    #[error("no topics available to build a simulation")]
    NoTopics,
    #[error("{stage} failed: {source}")]
    Oracle {
        stage: Stage,
        #[source]
        source: OracleError,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl AssessmentError {
    fn oracle(stage: Stage) -> impl FnOnce(OracleError) -> Self {
        move |source| AssessmentError::Oracle { stage, source }
    }
}

// ========== Generation ==========

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub structure: SimulationStructure,
    /// Explicit topics; when absent the weakest topics are sourced.
    #[serde(default)]
    pub topic_ids: Option<Vec<String>>,
    #[serde(default)]
    pub with_oral: bool,
}

/// Question as the oracle returns it, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer_index: Option<usize>,
    #[serde(default)]
    pub reference_answer: Option<String>,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub source_topic_id: Option<String>,
    #[serde(default)]
    pub source_document_id: Option<String>,
    #[serde(default)]
    pub source_page_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeneratedExam {
    #[serde(default)]
    questions: Vec<GeneratedQuestion>,
}

/// Topics to build an exam from: the explicit list, or the weakest ones with
/// covered topics preferred when any exist.
pub fn choose_topics(all: &[Topic], explicit: Option<&[String]>, limit: usize) -> Result<Vec<Topic>, AssessmentError> {
    if let Some(ids) = explicit.filter(|ids| !ids.is_empty()) {
        return ids
            .iter()
            .map(|id| {
                all.iter()
                    .find(|t| &t.id == id)
                    .cloned()
                    .ok_or_else(|| AssessmentError::NotFound(format!("topic {id}")))
            })
            .collect();
    }

    let ranked = rank_topics(all);
    let covered: Vec<&Topic> = ranked.iter().copied().filter(|t| t.affrontato).collect();
    let pool = if covered.is_empty() { ranked } else { covered };
    Ok(pool.into_iter().take(limit).cloned().collect())
}

/// Explicit topic id first, then the page the question was drawn from.
pub fn resolve_source_topic(question: &GeneratedQuestion, topics: &[Topic]) -> Option<String> {
    if let Some(id) = question.source_topic_id.as_deref() {
        if topics.iter().any(|t| t.id == id) {
            return Some(id.to_string());
        }
    }
    let page = question.source_page_number?;
    topics
        .iter()
        .find(|t| {
            question
                .source_document_id
                .as_deref()
                .map_or(true, |doc| doc == t.source_document_id)
                && t.source_page_numbers.contains(&page)
        })
        .map(|t| t.id.clone())
}

/// Checks cardinality first, then every question; nothing is built unless all pass.
pub fn validate_questions(
    structure: &SimulationStructure,
    generated: Vec<GeneratedQuestion>,
    topics: &[Topic],
) -> Result<Vec<Question>, AssessmentError> {
    let actual = SimulationStructure::of_kinds(generated.iter().map(|q| q.kind));
    if actual != *structure {
        return Err(AssessmentError::StructureMismatch {
            expected: *structure,
            actual,
        });
    }

    let mut questions = Vec::with_capacity(generated.len());
    for (index, q) in generated.into_iter().enumerate() {
        let invalid = |reason: &str| AssessmentError::InvalidQuestion {
            index,
            reason: reason.to_string(),
        };

        if q.text.trim().is_empty() {
            return Err(invalid("empty text"));
        }
        if q.kind.is_multiple_choice() {
            if q.options.len() < 2 {
                return Err(invalid("multiple choice needs at least two options"));
            }
            match q.correct_answer_index {
                Some(i) if i < q.options.len() => {}
                _ => return Err(invalid("correct answer index out of range")),
            }
        }

        let points = q
            .points
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or_else(|| q.kind.default_points());
        let source_topic_id = resolve_source_topic(&q, topics);

        questions.push(Question {
            id: format!("q{}", index + 1),
            kind: q.kind,
            text: q.text,
            options: if q.kind.is_multiple_choice() { q.options } else { Vec::new() },
            correct_answer_index: if q.kind.is_multiple_choice() { q.correct_answer_index } else { None },
            reference_answer: q.reference_answer.filter(|r| !r.trim().is_empty()),
            points,
            source_topic_id,
            source_document_id: q.source_document_id,
            source_page_number: q.source_page_number,
        });
    }
    Ok(questions)
}

fn generation_request(subject: &str, structure: &SimulationStructure, context: &str) -> OracleRequest {
    let composition = QuestionKind::ALL
        .iter()
        .map(|k| format!("{}: {}", k.as_str(), structure.count_of(*k)))
        .collect::<Vec<_>>()
        .join(", ");

    OracleRequest {
        system: "You write university exam simulations. Produce exactly the requested number of \
                 questions per type. Multiple choice questions carry options and the zero-based \
                 correctAnswerIndex; open questions carry a referenceAnswer. Tag each question with \
                 the sourceTopicId it tests and, when known, the sourcePageNumber. Reply with JSON only."
            .to_string(),
        prompt: format!(
            "Subject: {subject}\nComposition ({} questions): {composition}\n\nTopics:\n{context}",
            structure.total()
        ),
        schema_name: "exam_simulation",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string", "enum": ["mc_theory", "open_theory", "mc_exercise", "open_exercise"] },
                            "text": { "type": "string" },
                            "options": { "type": "array", "items": { "type": "string" } },
                            "correctAnswerIndex": { "type": "integer" },
                            "referenceAnswer": { "type": "string" },
                            "points": { "type": "number" },
                            "sourceTopicId": { "type": "string" },
                            "sourceDocumentId": { "type": "string" },
                            "sourcePageNumber": { "type": "integer" }
                        },
                        "required": ["type", "text"]
                    }
                }
            },
            "required": ["questions"]
        }),
    }
}

/// Title, pages and an excerpt of the studied text for each topic.
async fn topic_context(store: &Store, subject: &str, chosen: &[Topic]) -> Result<String, sqlx::Error> {
    let mut conn = store.pool().acquire().await?;
    let mut docs = HashMap::new();
    let mut out = String::new();

    for topic in chosen {
        if !docs.contains_key(&topic.source_document_id) {
            let doc = documents::get_document(&mut conn, subject, &topic.source_document_id).await?;
            docs.insert(topic.source_document_id.clone(), doc);
        }
        let excerpt: String = docs
            .get(&topic.source_document_id)
            .and_then(Option::as_ref)
            .map(|doc| {
                doc.content_chunks
                    .iter()
                    .filter(|c| topic.source_page_numbers.contains(&c.page_number))
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
            .chars()
            .take(CONTEXT_CHARS_PER_TOPIC)
            .collect();

        out.push_str(&format!(
            "- [{}] {} (document {}, pages {})\n",
            topic.id,
            topic.title,
            topic.source_document_id,
            compress_page_ranges(&topic.source_page_numbers)
        ));
        if !excerpt.is_empty() {
            out.push_str(&format!("  {excerpt}\n"));
        }
    }
    Ok(out)
}

/// Generates, validates and persists a new simulation in `taking` state.
pub async fn generate(
    store: &Store,
    oracle: &OracleChain,
    engine: &EngineConfig,
    subject: &str,
    request: GenerateRequest,
    cancel: &CancellationToken,
) -> Result<Simulation, AssessmentError> {
    let structure = request.structure;
    if structure.total() == 0 {
        return Err(AssessmentError::EmptyStructure);
    }

    let all = {
        let mut conn = store.pool().acquire().await?;
        topics::list_topics(&mut conn, subject).await?
    };
    let chosen = choose_topics(&all, request.topic_ids.as_deref(), engine.simulation_topic_limit)?;
    if chosen.is_empty() {
        return Err(AssessmentError::NoTopics);
    }

    let context = topic_context(store, subject, &chosen).await?;
    tracing::info!(subject, questions = structure.total(), topics = chosen.len(), "generating simulation");

    let exam: GeneratedExam = oracle
        .generate_as(generation_request(subject, &structure, &context), cancel)
        .await
        .map_err(AssessmentError::oracle(Stage::Generation))?;

    let questions = validate_questions(&structure, exam.questions, &chosen).map_err(|err| {
        tracing::warn!(subject, error = %err, "generated simulation rejected");
        err
    })?;

    let mut source_document_ids: Vec<String> = Vec::new();
    for topic in &chosen {
        if !source_document_ids.contains(&topic.source_document_id) {
            source_document_ids.push(topic.source_document_id.clone());
        }
    }

    let simulation = Simulation {
        id: Uuid::new_v4().to_string(),
        subject_name: subject.to_string(),
        requested_structure: structure,
        total_points: questions.iter().map(|q| q.points).sum(),
        questions,
        status: SimulationStatus::Taking,
        with_oral: request.with_oral,
        topic_ids: chosen.iter().map(|t| t.id.clone()).collect(),
        source_document_ids,
        answers: Vec::new(),
        outcomes: Vec::new(),
        score: None,
        grade: None,
        final_grade: None,
        oral: None,
        created_at: now_ms(),
        graded_at: None,
        completed_at: None,
    };

    let _guard = store.subject_lock(subject).await;
    let mut conn = store.pool().acquire().await?;
    simulations::insert_simulation(&mut conn, &simulation).await?;

    tracing::info!(subject, simulation_id = %simulation.id, total_points = simulation.total_points, "simulation created");
    Ok(simulation)
}

// ========== Grading ==========

/// `30 * scored / total`, clamped to `[0, 30]`.
pub fn written_grade(score: f64, total_points: f64) -> f64 {
    if total_points <= 0.0 {
        return 0.0;
    }
    (MAX_GRADE * score / total_points).clamp(0.0, MAX_GRADE)
}

/// Weighted blend of written and oral grades, clamped to `[1, 30]`.
pub fn blend_final_grade(written: f64, oral: f64, oral_weight: f64) -> f64 {
    let w = oral_weight.clamp(0.0, 1.0);
    ((1.0 - w) * written + w * oral).clamp(MIN_FINAL_GRADE, MAX_GRADE)
}

fn points_for(correctness: Correctness, max_points: f64) -> f64 {
    correctness.credit().unwrap_or(0.0) * max_points
}

fn answer_text(answer: Option<&SubmittedAnswer>) -> Option<&str> {
    answer
        .and_then(|a| a.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Builds per-question outcomes. Multiple choice is scored locally; open
/// answers take their verdict from `verdicts`, missing verdicts score zero.
pub fn score_answers(
    questions: &[Question],
    answers: &HashMap<&str, &SubmittedAnswer>,
    verdicts: &HashMap<String, crate::services::verdicts::Verdict>,
) -> Vec<QuestionOutcome> {
    questions
        .iter()
        .map(|q| {
            let answer = answers.get(q.id.as_str()).copied();
            let (correctness, feedback) = if q.kind.is_multiple_choice() {
                let chosen = answer.and_then(|a| a.choice_index);
                let correct = chosen.is_some() && chosen == q.correct_answer_index;
                (if correct { Correctness::Correct } else { Correctness::Incorrect }, None)
            } else if answer_text(answer).is_none() {
                (Correctness::Incorrect, Some("no answer".to_string()))
            } else {
                match verdicts.get(&q.id) {
                    Some(v) => (v.correctness, v.feedback.clone()),
                    None => (Correctness::Incorrect, Some("answer could not be evaluated".to_string())),
                }
            };

            QuestionOutcome {
                question_id: q.id.clone(),
                correctness,
                points_awarded: points_for(correctness, q.points),
                max_points: q.points,
                topic_id: q.source_topic_id.clone(),
                feedback,
            }
        })
        .collect()
}

/// Grades the written part. Topic stats, comprehension of the referenced
/// documents and the simulation row are committed together or not at all.
pub async fn grade(
    store: &Store,
    oracle: &OracleChain,
    subject: &str,
    simulation_id: &str,
    submitted: Vec<SubmittedAnswer>,
    cancel: &CancellationToken,
) -> Result<Simulation, AssessmentError> {
    let sim = get_simulation(store, subject, simulation_id).await?;
    simulation_transition(sim.status, SimulationEvent::GradeWritten { with_oral: sim.with_oral })?;

    let answers: HashMap<&str, &SubmittedAnswer> =
        submitted.iter().map(|a| (a.question_id.as_str(), a)).collect();

    let items: Vec<VerdictItem<'_>> = sim
        .questions
        .iter()
        .filter(|q| !q.kind.is_multiple_choice())
        .filter_map(|q| {
            let text = answer_text(answers.get(q.id.as_str()).copied())?;
            Some(VerdictItem {
                id: &q.id,
                question: &q.text,
                reference: q.reference_answer.as_deref(),
                answer: text,
            })
        })
        .collect();

    let verdicts = request_verdicts(oracle, subject, &items, cancel)
        .await
        .map_err(AssessmentError::oracle(Stage::Grading))?;

    let outcomes = score_answers(&sim.questions, &answers, &verdicts);
    let score: f64 = outcomes.iter().map(|o| o.points_awarded).sum();

    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    // re-read under the lock: a concurrent grade may have won
    let mut sim = simulations::get_simulation(&mut tx, subject, simulation_id)
        .await?
        .ok_or_else(|| AssessmentError::NotFound(format!("simulation {simulation_id}")))?;
    let now = now_ms();
    sim.status = simulation_transition(sim.status, SimulationEvent::GradeWritten { with_oral: sim.with_oral })?;
    sim.answers = submitted.clone();
    sim.outcomes = outcomes;
    sim.score = Some(score);
    sim.grade = Some(written_grade(score, sim.total_points));
    sim.graded_at = Some(now);
    if sim.status == SimulationStatus::Completed {
        sim.completed_at = Some(now);
    }
    simulations::update_simulation_result(&mut tx, &sim).await?;

    let mut seen = HashSet::new();
    for topic_id in sim.outcomes.iter().filter_map(|o| o.topic_id.as_deref()) {
        if !seen.insert(topic_id) {
            continue;
        }
        let Some(mut topic) = topics::get_topic(&mut tx, subject, topic_id).await? else {
            tracing::debug!(subject, topic_id, "graded question references a deleted topic");
            continue;
        };
        record_simulation_outcome(&mut topic, &sim.outcomes, now);
        topics::upsert_topic(&mut tx, &topic).await?;
    }
    for document_id in &sim.source_document_ids {
        recompute_comprehension(&mut tx, subject, document_id).await?;
    }

    tx.commit().await?;

    tracing::info!(
        subject,
        simulation_id,
        score,
        total_points = sim.total_points,
        grade = ?sim.grade,
        status = sim.status.as_str(),
        "simulation graded"
    );
    Ok(sim)
}

// ========== Oral stage ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OralEvaluation {
    oral_grade: f64,
    #[serde(default)]
    feedback: Option<String>,
}

fn oral_request(subject: &str, sim: &Simulation, transcript: &str) -> OracleRequest {
    let questions = sim
        .questions
        .iter()
        .map(|q| format!("- {}", q.text))
        .collect::<Vec<_>>()
        .join("\n");

    OracleRequest {
        system: "You are the examiner of the oral part of a university exam. Grade the transcript \
                 on a 0-30 scale and give short feedback. Reply with JSON only: \
                 {\"oralGrade\": number, \"feedback\": string}"
            .to_string(),
        prompt: format!(
            "Subject: {subject}\nWritten grade: {:.1}/30\nWritten questions:\n{questions}\n\nOral transcript:\n{transcript}",
            sim.grade.unwrap_or(0.0)
        ),
        schema_name: "oral_evaluation",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "oralGrade": { "type": "number" },
                "feedback": { "type": "string" }
            },
            "required": ["oralGrade"]
        }),
    }
}

/// Lets the oracle grade an oral transcript, then completes the simulation.
pub async fn evaluate_oral(
    store: &Store,
    oracle: &OracleChain,
    engine: &EngineConfig,
    subject: &str,
    simulation_id: &str,
    transcript: String,
    cancel: &CancellationToken,
) -> Result<Simulation, AssessmentError> {
    if transcript.trim().is_empty() {
        return Err(AssessmentError::Validation("transcript must not be empty".into()));
    }
    let sim = get_simulation(store, subject, simulation_id).await?;
    simulation_transition(sim.status, SimulationEvent::CompleteOral)?;

    let evaluation: OralEvaluation = oracle
        .generate_as(oral_request(subject, &sim, &transcript), cancel)
        .await
        .map_err(AssessmentError::oracle(Stage::Oral))?;
    if !evaluation.oral_grade.is_finite() {
        return Err(AssessmentError::Oracle {
            stage: Stage::Oral,
            source: OracleError::InvalidPayload("oralGrade is not a number".into()),
        });
    }

    let oral = OralExam {
        transcript: Some(transcript),
        oral_grade: evaluation.oral_grade.clamp(0.0, MAX_GRADE),
        feedback: evaluation.feedback.filter(|f| !f.trim().is_empty()),
    };
    finish_oral(store, engine, subject, simulation_id, oral).await
}

/// Completes the oral stage with a grade assigned by the examiner.
pub async fn complete_oral(
    store: &Store,
    engine: &EngineConfig,
    subject: &str,
    simulation_id: &str,
    oral_grade: f64,
) -> Result<Simulation, AssessmentError> {
    if !oral_grade.is_finite() || !(0.0..=MAX_GRADE).contains(&oral_grade) {
        return Err(AssessmentError::Validation(format!("oral grade {oral_grade} outside 0-30")));
    }
    let oral = OralExam {
        transcript: None,
        oral_grade,
        feedback: None,
    };
    finish_oral(store, engine, subject, simulation_id, oral).await
}

async fn finish_oral(
    store: &Store,
    engine: &EngineConfig,
    subject: &str,
    simulation_id: &str,
    oral: OralExam,
) -> Result<Simulation, AssessmentError> {
    let _guard = store.subject_lock(subject).await;
    let mut tx = store.pool().begin().await?;

    let mut sim = simulations::get_simulation(&mut tx, subject, simulation_id)
        .await?
        .ok_or_else(|| AssessmentError::NotFound(format!("simulation {simulation_id}")))?;
    sim.status = simulation_transition(sim.status, SimulationEvent::CompleteOral)?;

    let written = sim.grade.unwrap_or(0.0);
    sim.final_grade = Some(blend_final_grade(written, oral.oral_grade, engine.oral_weight));
    sim.oral = Some(oral);
    sim.completed_at = Some(now_ms());
    simulations::update_simulation_result(&mut tx, &sim).await?;

    tx.commit().await?;

    tracing::info!(subject, simulation_id, written, final_grade = ?sim.final_grade, "oral stage completed");
    Ok(sim)
}

// ========== Reads ==========

pub async fn list_simulations(store: &Store, subject: &str) -> Result<Vec<Simulation>, AssessmentError> {
    let mut conn = store.pool().acquire().await?;
    Ok(simulations::list_simulations(&mut conn, subject).await?)
}

pub async fn get_simulation(store: &Store, subject: &str, id: &str) -> Result<Simulation, AssessmentError> {
    let mut conn = store.pool().acquire().await?;
    simulations::get_simulation(&mut conn, subject, id)
        .await?
        .ok_or_else(|| AssessmentError::NotFound(format!("simulation {id}")))
}
