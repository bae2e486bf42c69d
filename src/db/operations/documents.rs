use std::collections::BTreeSet;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::types::{ContentChunk, Document};

const DOCUMENT_COLUMNS: &str = r#""id","subjectName","title","totalPages","studiedPages","comprehensionScore","studiedPagesUpdatedAt","createdAt""#;

fn map_document_row(row: &SqliteRow) -> Result<Document, sqlx::Error> {
    Ok(Document {
        id: row.try_get("id")?,
        subject_name: row.try_get("subjectName")?,
        title: row.try_get("title")?,
        total_pages: row.try_get::<i64, _>("totalPages")?.max(0) as u32,
        studied_pages: row.try_get("studiedPages")?,
        content_chunks: Vec::new(),
        comprehension_score: row.try_get("comprehensionScore")?,
        studied_pages_updated_at: row.try_get("studiedPagesUpdatedAt")?,
        created_at: row.try_get("createdAt")?,
    })
}

pub async fn upsert_document(conn: &mut SqliteConnection, doc: &Document) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "documents"
          ("id","subjectName","title","totalPages","studiedPages","comprehensionScore","studiedPagesUpdatedAt","createdAt")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT("subjectName","id") DO UPDATE SET
          "title" = excluded."title",
          "totalPages" = excluded."totalPages",
          "studiedPages" = excluded."studiedPages",
          "comprehensionScore" = excluded."comprehensionScore",
          "studiedPagesUpdatedAt" = COALESCE(excluded."studiedPagesUpdatedAt", "documents"."studiedPagesUpdatedAt")
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.subject_name)
    .bind(&doc.title)
    .bind(doc.total_pages as i64)
    .bind(&doc.studied_pages)
    .bind(doc.comprehension_score)
    .bind(doc.studied_pages_updated_at)
    .bind(doc.created_at)
    .execute(&mut *conn)
    .await?;

    replace_chunks(conn, &doc.subject_name, &doc.id, &doc.content_chunks).await
}

async fn replace_chunks(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
    chunks: &[ContentChunk],
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM "document_chunks" WHERE "subjectName" = ? AND "documentId" = ?"#)
        .bind(subject)
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for (index, chunk) in chunks.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO "document_chunks" ("subjectName","documentId","chunkIndex","pageNumber","text","isStudied")
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(subject)
        .bind(document_id)
        .bind(index as i64)
        .bind(chunk.page_number as i64)
        .bind(&chunk.text)
        .bind(chunk.is_studied)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn load_chunks(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
) -> Result<Vec<ContentChunk>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "pageNumber","text","isStudied" FROM "document_chunks"
           WHERE "subjectName" = ? AND "documentId" = ? ORDER BY "chunkIndex" ASC"#,
    )
    .bind(subject)
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ContentChunk {
                page_number: row.try_get::<i64, _>("pageNumber")?.max(0) as u32,
                text: row.try_get("text")?,
                is_studied: row.try_get("isStudied")?,
            })
        })
        .collect()
}

/// Loads a document together with its content chunks.
pub async fn get_document(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
) -> Result<Option<Document>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {DOCUMENT_COLUMNS} FROM "documents" WHERE "subjectName" = ? AND "id" = ? LIMIT 1"#
    );
    let row = sqlx::query(&sql)
        .bind(subject)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else { return Ok(None) };
    let mut doc = map_document_row(&row)?;
    doc.content_chunks = load_chunks(conn, subject, &doc.id).await?;
    Ok(Some(doc))
}

/// Lists a subject's documents in insertion order, without their chunks.
pub async fn list_documents(conn: &mut SqliteConnection, subject: &str) -> Result<Vec<Document>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {DOCUMENT_COLUMNS} FROM "documents" WHERE "subjectName" = ? ORDER BY rowid ASC"#
    );
    let rows = sqlx::query(&sql).bind(subject).fetch_all(&mut *conn).await?;
    rows.iter().map(map_document_row).collect()
}

pub async fn list_documents_studied_after(
    conn: &mut SqliteConnection,
    subject: &str,
    since: i64,
) -> Result<Vec<Document>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {DOCUMENT_COLUMNS} FROM "documents"
           WHERE "subjectName" = ? AND "studiedPagesUpdatedAt" > ?
           ORDER BY "studiedPagesUpdatedAt" ASC"#
    );
    let rows = sqlx::query(&sql)
        .bind(subject)
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(map_document_row).collect()
}

pub async fn update_studied_pages(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
    studied_pages: &str,
    updated_at: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "documents" SET "studiedPages" = ?,
           "studiedPagesUpdatedAt" = COALESCE(?, "studiedPagesUpdatedAt")
           WHERE "subjectName" = ? AND "id" = ?"#,
    )
    .bind(studied_pages)
    .bind(updated_at)
    .bind(subject)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mark_chunks_studied(
    conn: &mut SqliteConnection,
    subject: &str,
    document_id: &str,
    pages: &BTreeSet<u32>,
) -> Result<(), sqlx::Error> {
    if pages.is_empty() {
        sqlx::query(r#"UPDATE "document_chunks" SET "isStudied" = 0 WHERE "subjectName" = ? AND "documentId" = ?"#)
            .bind(subject)
            .bind(document_id)
            .execute(&mut *conn)
            .await?;
        return Ok(());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"UPDATE "document_chunks" SET "isStudied" = CASE WHEN "pageNumber" IN ("#,
    );
    {
        let mut sep = qb.separated(", ");
        for page in pages {
            sep.push_bind(*page as i64);
        }
        sep.push_unseparated(r#") THEN 1 ELSE 0 END WHERE "subjectName" = "#);
    }
    qb.push_bind(subject);
    qb.push(r#" AND "documentId" = "#);
    qb.push_bind(document_id);

    qb.build().execute(&mut *conn).await?;
    Ok(())
}

pub async fn set_comprehension_score(
    conn: &mut SqliteConnection,
    subject: &str,
    id: &str,
    score: Option<f64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "documents" SET "comprehensionScore" = ? WHERE "subjectName" = ? AND "id" = ?"#)
        .bind(score)
        .bind(subject)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_document(conn: &mut SqliteConnection, subject: &str, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query(r#"DELETE FROM "document_chunks" WHERE "subjectName" = ? AND "documentId" = ?"#)
        .bind(subject)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query(r#"DELETE FROM "documents" WHERE "subjectName" = ? AND "id" = ?"#)
        .bind(subject)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
