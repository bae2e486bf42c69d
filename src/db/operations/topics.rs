use std::collections::BTreeSet;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::db::{decode_json, encode_json};
use crate::types::{ExerciseStats, SimulationStats, Topic};

const TOPIC_COLUMNS: &str = r#""id","subjectName","title","sourceDocumentId","sourcePageNumbers","affrontato",
  "exerciseAppearances","exerciseCompleted","simulationAppearances","simulationCorrect",
  "masteryScore","lastPracticed","lastStudied""#;

fn map_topic_row(row: &SqliteRow) -> Result<Topic, sqlx::Error> {
    let pages_raw: String = row.try_get("sourcePageNumbers")?;
    let source_page_numbers: BTreeSet<u32> = decode_json(&pages_raw)?;

    Ok(Topic {
        id: row.try_get("id")?,
        subject_name: row.try_get("subjectName")?,
        title: row.try_get("title")?,
        source_document_id: row.try_get("sourceDocumentId")?,
        source_page_numbers,
        affrontato: row.try_get("affrontato")?,
        exercise_stats: ExerciseStats {
            appearances: row.try_get::<i64, _>("exerciseAppearances")?.max(0) as u32,
            completed: row.try_get("exerciseCompleted")?,
        },
        simulation_stats: SimulationStats {
            appearances: row.try_get::<i64, _>("simulationAppearances")?.max(0) as u32,
            correct: row.try_get("simulationCorrect")?,
        },
        mastery_score: row
            .try_get::<Option<i64>, _>("masteryScore")?
            .map(|v| v.clamp(0, 100) as u8),
        last_practiced: row.try_get("lastPracticed")?,
        last_studied: row.try_get("lastStudied")?,
    })
}

pub async fn upsert_topic(conn: &mut SqliteConnection, topic: &Topic) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "topics"
          ("id","subjectName","title","sourceDocumentId","sourcePageNumbers","affrontato",
           "exerciseAppearances","exerciseCompleted","simulationAppearances","simulationCorrect",
           "masteryScore","lastPracticed","lastStudied")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT("subjectName","id") DO UPDATE SET
          "title" = excluded."title",
          "sourceDocumentId" = excluded."sourceDocumentId",
          "sourcePageNumbers" = excluded."sourcePageNumbers",
          "affrontato" = excluded."affrontato",
          "exerciseAppearances" = excluded."exerciseAppearances",
          "exerciseCompleted" = excluded."exerciseCompleted",
          "simulationAppearances" = excluded."simulationAppearances",
          "simulationCorrect" = excluded."simulationCorrect",
          "masteryScore" = excluded."masteryScore",
          "lastPracticed" = excluded."lastPracticed",
          "lastStudied" = excluded."lastStudied"
        "#,
    )
    .bind(&topic.id)
    .bind(&topic.subject_name)
    .bind(&topic.title)
    .bind(&topic.source_document_id)
    .bind(encode_json(&topic.source_page_numbers)?)
    .bind(topic.affrontato)
    .bind(topic.exercise_stats.appearances as i64)
    .bind(topic.exercise_stats.completed)
    .bind(topic.simulation_stats.appearances as i64)
    .bind(topic.simulation_stats.correct)
    .bind(topic.mastery_score.map(i64::from))
    .bind(topic.last_practiced)
    .bind(topic.last_studied)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_topic(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
) -> Result<Option<Topic>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {TOPIC_COLUMNS} FROM "topics" WHERE "subjectName" = ? AND "id" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(subject)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(map_topic_row).transpose()
}

/// Topics in insertion order, which is the tie-break order for ranking.
pub async fn list_topics(conn: &mut SqliteConnection, subject: &str) -> Result<Vec<Topic>, sqlx::Error> {
    let sql = format!(r#"SELECT {TOPIC_COLUMNS} FROM "topics" WHERE "subjectName" = ? ORDER BY rowid ASC"#);
    let rows = sqlx::query(&sql).bind(subject).fetch_all(&mut *conn).await?;
    rows.iter().map(map_topic_row).collect()
}

pub async fn list_topics_for_document(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
) -> Result<Vec<Topic>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {TOPIC_COLUMNS} FROM "topics"
           WHERE "subjectName" = ? AND "sourceDocumentId" = ? ORDER BY rowid ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(subject)
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_topic_row).collect()
}

pub async fn delete_topic(conn: &mut SqliteConnection, subject: &str, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "topics" WHERE "subjectName" = ? AND "id" = ?"#)
        .bind(subject)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
