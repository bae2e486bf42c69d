use sqlx::SqlitePool;

pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
pub const SCHEMA_VERSION: &str = "2.0.0";

pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
            }
            ';' if !in_single_quote && !in_double_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }

        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

fn strip_comment_lines(stmt: &str) -> String {
    stmt.lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies the embedded schema once; later calls see the recorded version and return.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    match version.as_deref() {
        Some(SCHEMA_VERSION) => return Ok(()),
        Some(other) => {
            return Err(sqlx::Error::Configuration(
                format!("database schema {other} is not supported, expected {SCHEMA_VERSION}").into(),
            ))
        }
        None => {}
    }

    for stmt in split_sql_statements(SCHEMA_SQL) {
        let sql = strip_comment_lines(&stmt);
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#)
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    tracing::info!(version = SCHEMA_VERSION, "schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ignores_semicolons_in_quotes() {
        let stmts = split_sql_statements("SELECT 'a;b'; SELECT \"x;y\";\n\n");
        assert_eq!(stmts, vec!["SELECT 'a;b'", "SELECT \"x;y\""]);
    }

    #[test]
    fn test_embedded_schema_has_all_collections() {
        let stmts = split_sql_statements(SCHEMA_SQL);
        for table in [
            "documents",
            "document_chunks",
            "topics",
            "exercise_instances",
            "simulations",
            "coach_sync_state",
        ] {
            let needle = format!("CREATE TABLE IF NOT EXISTS \"{table}\"");
            assert!(stmts.iter().any(|s| s.contains(&needle)), "missing {table}");
        }
    }
}
