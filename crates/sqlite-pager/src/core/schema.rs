use rusqlite::{Connection, Row};

use crate::core::types::{ColumnMeta, SchemaObject};
use crate::error::{AppError, AppResult};

pub fn list_objects(conn: &Connection) -> AppResult<Vec<SchemaObject>> {
    let mut stmt = conn.prepare(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY type, name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SchemaObject {
                name: r.get(0)?,
                kind: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_columns(conn: &Connection, table: &str) -> AppResult<Vec<ColumnMeta>> {
    // Use PRAGMA table_info; table name is not parameterizable in SQLite, so we must
    // validate it as an identifier to prevent injection.
    if !is_safe_table_ref(table) {
        return Err(AppError::InvalidRequest(format!(
            "invalid table identifier: {table}"
        )));
    }

    // `schema.table` moves the qualifier onto the pragma.
    let sql = match table.split_once('.') {
        Some((schema, name)) => format!("PRAGMA {schema}.table_info({name})"),
        None => format!("PRAGMA table_info({table})"),
    };
    let mut stmt = conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |row: &Row<'_>| {
            let decl_type: Option<String> = row.get("type")?;
            Ok(ColumnMeta {
                name: row.get("name")?,
                decl_type: decl_type.filter(|t| !t.is_empty()),
                not_null: row.get::<_, i64>("notnull")? != 0,
                primary_key: row.get("pk")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

pub(crate) fn is_safe_identifier(s: &str) -> bool {
    // Minimal safe subset: [A-Za-z_][A-Za-z0-9_]*
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name` or `qualifier.name`; used for table refs and cursor fields that get
/// interpolated into SQL text.
pub(crate) fn is_safe_table_ref(s: &str) -> bool {
    match s.split_once('.') {
        None => is_safe_identifier(s),
        Some((qualifier, name)) => is_safe_identifier(qualifier) && is_safe_identifier(name),
    }
}
