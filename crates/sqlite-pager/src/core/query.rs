use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rusqlite::{types::Value as SqlValue, types::ValueRef, Connection, Row};
use serde_json::Value;

use crate::core::readonly;
use crate::core::types::{DbRow, Params, QueryOutput};
use crate::error::{AppError, AppResult};

/// Runs one read-only statement with named parameters bound.
///
/// Parameters the statement does not reference are skipped, so a caller's
/// map can be reused for both the page query and its count estimate.
pub fn run_read_query(conn: &Connection, sql: &str, params: &Params) -> AppResult<QueryOutput> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    if !readonly::is_statement_readonly(&stmt) {
        return Err(AppError::NotReadonly);
    }

    for (key, value) in params {
        let name = param_name(key);
        if let Some(idx) = stmt.parameter_index(&name)? {
            stmt.raw_bind_parameter(idx, to_sql_value(key, value)?)?;
        }
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = Vec::new();
    let mut r = stmt.raw_query();
    while let Some(row) = r.next()? {
        rows.push(row_to_json_object(row, &columns)?);
    }

    Ok(QueryOutput {
        columns,
        rows,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Bare names bind as `:name`; explicit `:`/`@`/`$` prefixes are kept.
fn param_name(key: &str) -> String {
    if key.starts_with([':', '@', '$']) {
        key.to_string()
    } else {
        format!(":{key}")
    }
}

fn to_sql_value(key: &str, v: &Value) -> AppResult<SqlValue> {
    Ok(match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(AppError::InvalidRequest(format!(
                "parameter {key} must be a scalar"
            )))
        }
    })
}

fn row_to_json_object(row: &Row<'_>, col_names: &[String]) -> AppResult<DbRow> {
    let mut out = DbRow::with_capacity(col_names.len());
    for (i, name) in col_names.iter().enumerate() {
        let v = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(x) => Value::from(x),
            ValueRef::Real(x) => Value::from(x),
            ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => serde_json::json!({
                "$type": "blob",
                "base64": BASE64.encode(b),
                "size": b.len()
            }),
        };
        out.insert(name.clone(), v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB);
             INSERT INTO t VALUES (1, 'a', 1.5, x'0102'), (2, 'b', NULL, NULL), (3, 'c', 3.0, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_named_parameters_bind() {
        let mut params = Params::new();
        params.insert("min_id".into(), json!(2));
        params.insert("@unused".into(), json!("ignored"));
        let out = run_read_query(&conn(), "SELECT id, name FROM t WHERE id >= :min_id ORDER BY id", &params).unwrap();
        assert_eq!(out.columns, vec!["id", "name"]);
        let ids: Vec<&Value> = out.rows.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(2), &json!(3)]);
    }

    #[test]
    fn test_value_conversion() {
        let out = run_read_query(&conn(), "SELECT * FROM t WHERE id <= 2 ORDER BY id", &Params::new()).unwrap();
        assert_eq!(out.rows[0]["score"], json!(1.5));
        assert_eq!(out.rows[0]["data"]["base64"], json!("AQI="));
        assert_eq!(out.rows[0]["data"]["size"], json!(2));
        assert_eq!(out.rows[1]["score"], Value::Null);
    }

    #[test]
    fn test_write_statement_refused() {
        let err = run_read_query(&conn(), "DELETE FROM t", &Params::new()).unwrap_err();
        assert!(matches!(err, AppError::NotReadonly));
    }

    #[test]
    fn test_non_scalar_parameter() {
        let mut params = Params::new();
        params.insert("id".into(), json!([1, 2]));
        let err = run_read_query(&conn(), "SELECT * FROM t WHERE id = :id", &params).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn test_syntax_error_is_query_error() {
        let err = run_read_query(&conn(), "SELECT FROM WHERE", &Params::new()).unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
    }
}
