use rusqlite::Statement;

use crate::core::shape::{tokenize, TokenKind};
use crate::error::{AppError, AppResult};

/// Words that never appear in a read-only statement.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "UPSERT", "MERGE", "TRUNCATE", "ALTER", "DROP",
    "CREATE", "ATTACH", "DETACH", "VACUUM", "REINDEX", "GRANT", "REVOKE",
];

/// Rejects statements carrying a write keyword outside literals and comments.
///
/// `REPLACE` counts only as a statement keyword; followed by `(` it is the
/// scalar function. Runs before anything is sent to the database.
pub fn validate_read_only(sql: &str) -> AppResult<()> {
    let tokens = tokenize(sql);
    if tokens.is_empty() {
        return Err(AppError::InvalidRequest("empty statement".into()));
    }
    let is_write = |idx: usize| {
        let t = &tokens[idx];
        if t.kind != TokenKind::Word {
            return false;
        }
        if t.is_keyword("REPLACE") {
            return !tokens
                .get(idx + 1)
                .is_some_and(|n| n.kind == TokenKind::Punct && n.text == "(");
        }
        WRITE_KEYWORDS.iter().any(|kw| t.text.eq_ignore_ascii_case(kw))
    };
    if let Some(tok) = (0..tokens.len()).find(|&i| is_write(i)).map(|i| &tokens[i]) {
        tracing::warn!(keyword = %tok.text, "rejected statement with write keyword");
        return Err(AppError::Validation {
            keyword: tok.text.to_ascii_uppercase(),
        });
    }
    Ok(())
}

/// Engine-level check on a prepared statement.
pub fn is_statement_readonly(stmt: &Statement<'_>) -> bool {
    stmt.readonly()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_keywords_rejected_case_insensitively() {
        for sql in [
            "DELETE FROM t",
            "update t set a = 1",
            "TrUnCaTe t",
            "SELECT * FROM t; drop table t",
            "alter table t add column c",
            "WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x",
        ] {
            assert!(
                matches!(validate_read_only(sql), Err(AppError::Validation { .. })),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_replace_statement_rejected_but_function_allowed() {
        for sql in [
            "REPLACE INTO t (id, v) VALUES (1, 2)",
            "replace into t select * from u",
            "SELECT 1; Replace INTO t VALUES (1)",
        ] {
            assert!(
                matches!(
                    validate_read_only(sql),
                    Err(AppError::Validation { ref keyword }) if keyword == "REPLACE"
                ),
                "{sql}"
            );
        }
        assert!(validate_read_only("SELECT REPLACE (name, 'a', 'b') AS n FROM t").is_ok());
        assert!(validate_read_only("SELECT 'replace into t' AS s FROM t").is_ok());
    }

    #[test]
    fn test_reads_pass() {
        for sql in [
            "SELECT * FROM t",
            "SELECT 'delete me' AS label, \"update\" FROM t",
            "SELECT updated_at, created_by FROM t -- drop later",
            "SELECT replace(name, 'a', 'b') FROM t",
            "WITH x AS (SELECT 1 AS id) SELECT id FROM x",
        ] {
            assert!(validate_read_only(sql).is_ok(), "{sql}");
        }
    }

    #[test]
    fn test_empty_statement() {
        assert!(matches!(validate_read_only("  -- nothing\n"), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_engine_check() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(is_statement_readonly(&conn.prepare("SELECT id FROM t").unwrap()));
        assert!(!is_statement_readonly(&conn.prepare("INSERT INTO t VALUES (1)").unwrap()));
    }
}
