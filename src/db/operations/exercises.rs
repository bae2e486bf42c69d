use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::types::{Correctness, ExerciseInstance, ExerciseStatus};

const EXERCISE_COLUMNS: &str = r#"e."id",e."subjectName",e."topicId",e."question",e."solution",e."userAnswer",
  e."status",e."correctness",e."createdAt",e."correctedAt""#;

fn map_exercise_row(row: &SqliteRow) -> Result<ExerciseInstance, sqlx::Error> {
    Ok(ExerciseInstance {
        id: row.try_get("id")?,
        subject_name: row.try_get("subjectName")?,
        topic_id: row.try_get("topicId")?,
        question: row.try_get("question")?,
        solution: row.try_get("solution")?,
        user_answer: row.try_get("userAnswer")?,
        status: ExerciseStatus::from_str(row.try_get::<String, _>("status")?.as_str()),
        correctness: Correctness::from_str(row.try_get::<String, _>("correctness")?.as_str()),
        created_at: row.try_get("createdAt")?,
        corrected_at: row.try_get("correctedAt")?,
    })
}

pub async fn insert_exercise(conn: &mut SqliteConnection, ex: &ExerciseInstance) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "exercise_instances"
           ("id","subjectName","topicId","question","solution","userAnswer","status","correctness","createdAt","correctedAt")
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&ex.id)
    .bind(&ex.subject_name)
    .bind(&ex.topic_id)
    .bind(&ex.question)
    .bind(&ex.solution)
    .bind(&ex.user_answer)
    .bind(ex.status.as_str())
    .bind(ex.correctness.as_str())
    .bind(ex.created_at)
    .bind(ex.corrected_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_exercise(conn: &mut SqliteConnection, ex: &ExerciseInstance) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "exercise_instances"
           SET "userAnswer" = ?, "status" = ?, "correctness" = ?, "correctedAt" = ?
           WHERE "subjectName" = ? AND "id" = ?"#,
    )
    .bind(&ex.user_answer)
    .bind(ex.status.as_str())
    .bind(ex.correctness.as_str())
    .bind(ex.corrected_at)
    .bind(&ex.subject_name)
    .bind(&ex.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_exercise(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
) -> Result<Option<ExerciseInstance>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EXERCISE_COLUMNS} FROM "exercise_instances" e
           WHERE e."subjectName" = ? AND e."id" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(subject)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(map_exercise_row).transpose()
}

pub async fn list_exercises(conn: &mut SqliteConnection, subject: &str) -> Result<Vec<ExerciseInstance>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EXERCISE_COLUMNS} FROM "exercise_instances" e
           WHERE e."subjectName" = ? ORDER BY e."createdAt" ASC"#
    );
    let rows = sqlx::query(&sql).bind(subject).fetch_all(&mut *conn).await?;
    rows.iter().map(map_exercise_row).collect()
}

/// Instances whose topic is sourced from `document_id`.
pub async fn list_exercises_for_document(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
) -> Result<Vec<ExerciseInstance>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EXERCISE_COLUMNS} FROM "exercise_instances" e
           JOIN "topics" t ON t."subjectName" = e."subjectName" AND t."id" = e."topicId"
           WHERE e."subjectName" = ? AND t."sourceDocumentId" = ?"#
    );
    let rows = sqlx::query(&sql)
        .bind(subject)
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_exercise_row).collect()
}

pub async fn list_exercises_created_after(
    conn: &mut SqliteConnection,
    subject: &str,
    since: i64,
) -> Result<Vec<ExerciseInstance>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {EXERCISE_COLUMNS} FROM "exercise_instances" e
           WHERE e."subjectName" = ? AND e."createdAt" > ? ORDER BY e."createdAt" ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(subject)
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_exercise_row).collect()
}

pub async fn delete_exercises_for_topic(
    conn: &mut SqliteConnection,
    subject: &str,
    topic_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "exercise_instances" WHERE "subjectName" = ? AND "topicId" = ?"#)
        .bind(subject)
        .bind(topic_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
