use sqlx::{Row, SqliteConnection};

use crate::db::{decode_json, encode_json};
use crate::types::CoachSyncRecord;

pub async fn get_record(
    conn: &mut SqliteConnection,
    subject: &str,
) -> Result<Option<CoachSyncRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT "subjectName","lastSyncTimestamp","tasks","summary","strengths","weaknesses"
           FROM "coach_sync_state" WHERE "subjectName" = ? LIMIT 1"#,
    )
    .bind(subject)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(CoachSyncRecord {
        subject_name: row.try_get("subjectName")?,
        last_sync_timestamp: row.try_get("lastSyncTimestamp")?,
        tasks: decode_json(&row.try_get::<String, _>("tasks")?)?,
        summary: row.try_get("summary")?,
        strengths: decode_json(&row.try_get::<String, _>("strengths")?)?,
        weaknesses: decode_json(&row.try_get::<String, _>("weaknesses")?)?,
    }))
}

pub async fn upsert_record(conn: &mut SqliteConnection, record: &CoachSyncRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "coach_sync_state"
           ("subjectName","lastSyncTimestamp","tasks","summary","strengths","weaknesses")
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT("subjectName") DO UPDATE SET
             "lastSyncTimestamp" = excluded."lastSyncTimestamp",
             "tasks" = excluded."tasks",
             "summary" = excluded."summary",
             "strengths" = excluded."strengths",
             "weaknesses" = excluded."weaknesses""#,
    )
    .bind(&record.subject_name)
    .bind(record.last_sync_timestamp)
    .bind(encode_json(&record.tasks)?)
    .bind(&record.summary)
    .bind(encode_json(&record.strengths)?)
    .bind(encode_json(&record.weaknesses)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_record(conn: &mut SqliteConnection, subject: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "coach_sync_state" WHERE "subjectName" = ?"#)
        .bind(subject)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
