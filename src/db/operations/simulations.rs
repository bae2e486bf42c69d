use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::db::{decode_json, encode_json};
use crate::types::{Simulation, SimulationStatus};

const SIMULATION_COLUMNS: &str = r#""id","subjectName","requestedStructure","questions","status","withOral",
  "topicIds","sourceDocumentIds","answers","outcomes","score","totalPoints","grade","finalGrade",
  "oral","createdAt","gradedAt","completedAt""#;

fn map_simulation_row(row: &SqliteRow) -> Result<Simulation, sqlx::Error> {
    let oral_raw: Option<String> = row.try_get("oral")?;

    Ok(Simulation {
        id: row.try_get("id")?,
        subject_name: row.try_get("subjectName")?,
        requested_structure: decode_json(&row.try_get::<String, _>("requestedStructure")?)?,
        questions: decode_json(&row.try_get::<String, _>("questions")?)?,
        status: SimulationStatus::from_str(row.try_get::<String, _>("status")?.as_str()),
        with_oral: row.try_get("withOral")?,
        topic_ids: decode_json(&row.try_get::<String, _>("topicIds")?)?,
        source_document_ids: decode_json(&row.try_get::<String, _>("sourceDocumentIds")?)?,
        answers: decode_json(&row.try_get::<String, _>("answers")?)?,
        outcomes: decode_json(&row.try_get::<String, _>("outcomes")?)?,
        score: row.try_get("score")?,
        total_points: row.try_get("totalPoints")?,
        grade: row.try_get("grade")?,
        final_grade: row.try_get("finalGrade")?,
        oral: oral_raw.as_deref().map(decode_json).transpose()?,
        created_at: row.try_get("createdAt")?,
        graded_at: row.try_get("gradedAt")?,
        completed_at: row.try_get("completedAt")?,
    })
}

pub async fn insert_simulation(conn: &mut SqliteConnection, sim: &Simulation) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "simulations"
           ("id","subjectName","requestedStructure","questions","status","withOral","topicIds",
            "sourceDocumentIds","answers","outcomes","score","totalPoints","grade","finalGrade",
            "oral","createdAt","gradedAt","completedAt")
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&sim.id)
    .bind(&sim.subject_name)
    .bind(encode_json(&sim.requested_structure)?)
    .bind(encode_json(&sim.questions)?)
    .bind(sim.status.as_str())
    .bind(sim.with_oral)
    .bind(encode_json(&sim.topic_ids)?)
    .bind(encode_json(&sim.source_document_ids)?)
    .bind(encode_json(&sim.answers)?)
    .bind(encode_json(&sim.outcomes)?)
    .bind(sim.score)
    .bind(sim.total_points)
    .bind(sim.grade)
    .bind(sim.final_grade)
    .bind(sim.oral.as_ref().map(encode_json).transpose()?)
    .bind(sim.created_at)
    .bind(sim.graded_at)
    .bind(sim.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Writes the mutable grading/oral fields; questions and structure never change after creation.
pub async fn update_simulation_result(conn: &mut SqliteConnection, sim: &Simulation) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "simulations" SET
             "status" = ?, "answers" = ?, "outcomes" = ?, "score" = ?, "grade" = ?,
             "finalGrade" = ?, "oral" = ?, "gradedAt" = ?, "completedAt" = ?
           WHERE "subjectName" = ? AND "id" = ?"#,
    )
    .bind(sim.status.as_str())
    .bind(encode_json(&sim.answers)?)
    .bind(encode_json(&sim.outcomes)?)
    .bind(sim.score)
    .bind(sim.grade)
    .bind(sim.final_grade)
    .bind(sim.oral.as_ref().map(encode_json).transpose()?)
    .bind(sim.graded_at)
    .bind(sim.completed_at)
    .bind(&sim.subject_name)
    .bind(&sim.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_simulation(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
) -> Result<Option<Simulation>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SIMULATION_COLUMNS} FROM "simulations" WHERE "subjectName" = ? AND "id" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(subject)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(map_simulation_row).transpose()
}

pub async fn list_simulations(conn: &mut SqliteConnection, subject: &str) -> Result<Vec<Simulation>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SIMULATION_COLUMNS} FROM "simulations" WHERE "subjectName" = ? ORDER BY "createdAt" ASC"#
    );
    let rows = sqlx::query(&sql).bind(subject).fetch_all(&mut *conn).await?;
    rows.iter().map(map_simulation_row).collect()
}

/// Graded simulations whose questions were sourced from `document_id`.
pub async fn list_graded_simulations_for_document(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
) -> Result<Vec<Simulation>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SIMULATION_COLUMNS} FROM "simulations"
           WHERE "subjectName" = ? AND "score" IS NOT NULL ORDER BY "createdAt" ASC"#
    );
    let rows = sqlx::query(&sql).bind(subject).fetch_all(&mut *conn).await?;
    let mut out = Vec::new();
    for row in &rows {
        let sim = map_simulation_row(row)?;
        if sim.references_document(document_id) {
            out.push(sim);
        }
    }
    Ok(out)
}

/// Simulations graded or completed strictly after `since`.
pub async fn list_simulations_finished_after(
    conn: &mut SqliteConnection,
    subject: &str,
    since: i64,
) -> Result<Vec<Simulation>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {SIMULATION_COLUMNS} FROM "simulations"
           WHERE "subjectName" = ? AND ("gradedAt" > ? OR "completedAt" > ?)
           ORDER BY "createdAt" ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(subject)
        .bind(since)
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_simulation_row).collect()
}
