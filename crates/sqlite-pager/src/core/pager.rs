//! One page of a keyset scan.
//!
//! Pages are only gap- and overlap-free when the cursor field is unique
//! across the result set. With ties on the field, rows sharing the boundary
//! value can be skipped (strict `>`) or repeated (inclusive anchors).

use serde_json::Value;

use crate::core::cursor::{Cursor, Operator};
use crate::core::port::ExecutionPort;
use crate::core::readonly::validate_read_only;
use crate::core::rewrite::{row_value, ResolvedField, RewriteInput, StatementRewriter};
use crate::core::shape::{ClauseAnalyzer, KeywordScanner};
use crate::core::types::{DbRow, Direction, PageRequest, PageResult, Params, RewriteNote};
use crate::error::{AppError, AppResult};

pub struct PaginationController<P, A = KeywordScanner> {
    port: P,
    rewriter: StatementRewriter<A>,
    default_field: String,
}

impl<P: ExecutionPort> PaginationController<P, KeywordScanner> {
    pub fn new(port: P, default_field: impl Into<String>) -> Self {
        Self::with_rewriter(port, StatementRewriter::new(), default_field)
    }
}

impl<P: ExecutionPort, A: ClauseAnalyzer> PaginationController<P, A> {
    pub fn with_rewriter(port: P, rewriter: StatementRewriter<A>, default_field: impl Into<String>) -> Self {
        Self {
            port,
            rewriter,
            default_field: default_field.into(),
        }
    }

    pub async fn fetch_page(&self, request: &PageRequest) -> AppResult<PageResult> {
        if request.page_size == 0 {
            return Err(AppError::InvalidRequest("page_size must be positive".into()));
        }
        validate_read_only(&request.sql)?;

        let rewrite = self.rewriter.rewrite(RewriteInput {
            sql: &request.sql,
            cursor_field: request.cursor_field.as_deref(),
            cursor: request.cursor.as_deref(),
            // One row of look-ahead decides has_more.
            page_size: request.page_size.saturating_add(1),
            default_field: &self.default_field,
            parameters: &request.parameters,
            direction: request.direction,
        })?;
        let mut notes = rewrite.notes;

        let total_count = if request.include_total {
            self.estimate_total(&request.sql, &request.parameters, &mut notes).await
        } else {
            None
        };

        let output = self.port.execute(&rewrite.sql, &rewrite.parameters).await?;
        let returned = output.rows.len();
        let mut rows = output.rows;
        rows.truncate(request.page_size);
        if rewrite.direction == Direction::Prev {
            rows.reverse();
        }

        let has_more = returned > request.page_size;
        let field = &rewrite.field;
        let inbound = rewrite.cursor.is_some();

        // (row that continues the walk, row that turns around), in natural order.
        let (ahead, behind) = match rewrite.direction {
            Direction::Next => (
                (rows.last(), field.forward()),
                (rows.first(), field.reverse_anchor()),
            ),
            Direction::Prev => (
                (rows.first(), field.backward()),
                (rows.last(), field.forward_anchor()),
            ),
        };

        let next_cursor = if has_more {
            cursor_from(ahead.0, field, ahead.1, &mut notes)?
        } else {
            None
        };
        let prev_cursor = if inbound {
            cursor_from(behind.0, field, behind.1, &mut notes)?
        } else {
            None
        };

        tracing::debug!(
            cursor_field = %field.expr,
            page_size = request.page_size,
            rows = rows.len(),
            has_more,
            elapsed_ms = output.elapsed_ms,
            "fetched page"
        );

        Ok(PageResult {
            columns: output.columns,
            rows,
            next_cursor,
            prev_cursor,
            has_more,
            total_count,
            cursor_field: field.expr.clone(),
            field_source: field.source,
            direction: rewrite.direction,
            page_size: request.page_size,
            elapsed_ms: output.elapsed_ms,
            notes,
        })
    }

    /// Count over the statement's whole result. Failure is not fatal.
    async fn estimate_total(&self, sql: &str, params: &Params, notes: &mut Vec<RewriteNote>) -> Option<u64> {
        let count_sql = self.rewriter.count_statement(sql);
        match self.port.execute(&count_sql, params).await {
            Ok(out) => {
                let total = out
                    .rows
                    .first()
                    .and_then(|r| r.get("total_count"))
                    .and_then(Value::as_u64);
                if total.is_none() {
                    notes.push(RewriteNote::CountUnavailable {
                        reason: "count query returned no value".into(),
                    });
                }
                total
            }
            Err(e) => {
                tracing::warn!(error = %e, "total count estimate failed");
                notes.push(RewriteNote::CountUnavailable { reason: e.to_string() });
                None
            }
        }
    }
}

fn cursor_from(
    row: Option<&DbRow>,
    field: &ResolvedField,
    op: Operator,
    notes: &mut Vec<RewriteNote>,
) -> AppResult<Option<String>> {
    let Some(row) = row else { return Ok(None) };
    match row_value(row, &field.key) {
        Some(v) => Cursor::new(&field.expr, v.clone(), op).encode().map(Some),
        None => {
            let note = RewriteNote::CursorFieldMissing {
                field: field.key.clone(),
            };
            if !notes.contains(&note) {
                tracing::warn!(field = %field.key, "cursor field absent from result rows");
                notes.push(note);
            }
            Ok(None)
        }
    }
}
