//! Whole-result scans driven one page at a time.
//!
//! A run pulls batches through the [`PaginationController`], folds every row
//! into the accumulators and routes it to the configured output. Batches are
//! strictly sequential; the deadline is only consulted between them.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::core::aggregate::Accumulators;
use crate::core::pager::PaginationController;
use crate::core::port::ExecutionPort;
use crate::core::readonly::validate_read_only;
use crate::core::shape::{ClauseAnalyzer, KeywordScanner};
use crate::core::sink::{ResultMetadata, ResultPayload, ResultSink};
use crate::core::types::{
    DbRow, Direction, ErrorReport, OutputType, PageRequest, PageResult, RewriteNote, StreamRequest, StreamSummary,
    Termination,
};
use crate::error::{AppError, AppResult};

pub struct StreamingAggregator<P, A = KeywordScanner> {
    pager: PaginationController<P, A>,
    sink: Arc<dyn ResultSink>,
}

impl<P: ExecutionPort, A: ClauseAnalyzer> StreamingAggregator<P, A> {
    pub fn new(pager: PaginationController<P, A>, sink: Arc<dyn ResultSink>) -> Self {
        Self { pager, sink }
    }

    /// Runs to exhaustion, `max_rows`, the deadline or the first failed batch.
    ///
    /// Only requests rejected before any row is read come back as `Err`.
    /// Later failures end the run with [`Termination::Failed`] and keep the
    /// aggregates gathered so far.
    pub async fn run(&self, request: &StreamRequest) -> AppResult<StreamSummary> {
        if request.batch_size == 0 {
            return Err(AppError::InvalidRequest("batch_size must be positive".into()));
        }
        if request.max_rows == 0 {
            return Err(AppError::InvalidRequest("max_rows must be positive".into()));
        }
        validate_read_only(&request.sql)?;

        let id = Uuid::new_v4().to_string();
        let started = Instant::now();
        tracing::info!(
            result_id = %id,
            batch_size = request.batch_size,
            max_rows = request.max_rows,
            output = ?request.output_type,
            "stream started"
        );

        let mut acc = Accumulators::new(&request.aggregations);
        let mut output = Output::new(request.output_type);
        let mut sink_error: Option<String> = None;
        let mut notes: Vec<RewriteNote> = Vec::new();
        let mut cursor_field = request.cursor_field.clone().unwrap_or_default();
        let mut cursor: Option<String> = None;
        let mut total_rows = 0usize;
        let mut batch_count = 0usize;

        let termination = loop {
            if total_rows >= request.max_rows {
                break Termination::MaxRows;
            }
            if request.deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                break Termination::Deadline;
            }

            let page_request = PageRequest {
                sql: request.sql.clone(),
                cursor_field: request.cursor_field.clone(),
                page_size: request.batch_size.min(request.max_rows - total_rows),
                cursor: cursor.take(),
                parameters: request.parameters.clone(),
                direction: Some(Direction::Next),
                include_total: false,
            };
            let page = match self.pager.fetch_page(&page_request).await {
                Ok(page) => page,
                Err(e @ (AppError::InvalidRequest(_) | AppError::Validation { .. })) if batch_count == 0 => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::warn!(result_id = %id, batch = batch_count + 1, error = %e, "stream batch failed");
                    break Termination::Failed(ErrorReport::from(&e));
                }
            };

            batch_count += 1;
            cursor_field.clone_from(&page.cursor_field);
            for note in &page.notes {
                if !notes.contains(note) {
                    notes.push(note.clone());
                }
            }
            total_rows += page.rows.len();
            for row in &page.rows {
                acc.observe(row);
            }
            if sink_error.is_none() {
                if let Err(e) = output.consume(self.sink.as_ref(), &id, &page).await {
                    tracing::warn!(result_id = %id, error = %e, "result sink append failed");
                    sink_error = Some(e.to_string());
                }
            }
            tracing::debug!(result_id = %id, batch = batch_count, rows = page.rows.len(), total_rows, "batch folded");

            if !page.has_more {
                break Termination::Exhausted;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break Termination::CursorUnavailable,
            }
        };

        let mut summary = StreamSummary {
            result_id: id.clone(),
            resource_uri: format!("results://{id}"),
            output_type: request.output_type,
            cursor_field,
            total_rows,
            batch_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            aggregations: acc.finish(),
            termination,
            sink_error,
            notes,
        };

        let artifact = output.finish(&summary)?;
        let payload = ResultPayload {
            metadata: ResultMetadata {
                id: id.clone(),
                created_at: Utc::now(),
                output_type: request.output_type,
                sql: request.sql.clone(),
                cursor_field: summary.cursor_field.clone(),
                total_rows,
                batch_count,
                elapsed_ms: summary.elapsed_ms,
                aggregations: summary.aggregations.clone(),
                termination: summary.termination.clone(),
            },
            artifact,
        };
        if let Err(e) = self.sink.store(&id, &payload).await {
            tracing::warn!(result_id = %id, error = %e, "result sink store failed");
            summary.sink_error.get_or_insert(e.to_string());
        }

        tracing::info!(
            result_id = %id,
            total_rows,
            batch_count,
            elapsed_ms = summary.elapsed_ms,
            termination = ?summary.termination,
            "stream finished"
        );
        Ok(summary)
    }
}

/// Per-run artifact state.
enum Output {
    Json { columns: Vec<String>, rows: Vec<DbRow> },
    Csv { columns: Option<Vec<String>> },
    Summary,
}

impl Output {
    fn new(output_type: OutputType) -> Self {
        match output_type {
            OutputType::Json => Output::Json {
                columns: Vec::new(),
                rows: Vec::new(),
            },
            OutputType::Csv => Output::Csv { columns: None },
            OutputType::Summary => Output::Summary,
        }
    }

    async fn consume(&mut self, sink: &dyn ResultSink, id: &str, page: &PageResult) -> AppResult<()> {
        match self {
            Output::Json { columns, rows } => {
                if columns.is_empty() {
                    columns.clone_from(&page.columns);
                }
                rows.extend(page.rows.iter().cloned());
                Ok(())
            }
            Output::Csv { columns } => {
                let mut chunk = String::new();
                if columns.is_none() {
                    chunk.push_str(&csv_line(page.columns.iter().map(|c| csv_field(c))));
                    *columns = Some(page.columns.clone());
                }
                let header = columns.as_deref().unwrap_or(&page.columns);
                for row in &page.rows {
                    let cells = header.iter().map(|c| csv_value(row.get(c).unwrap_or(&Value::Null)));
                    chunk.push_str(&csv_line(cells));
                }
                if chunk.is_empty() {
                    return Ok(());
                }
                sink.append(id, OutputType::Csv, &chunk).await
            }
            Output::Summary => Ok(()),
        }
    }

    /// Body handed to [`ResultSink::store`]. CSV was appended as it went.
    fn finish(self, summary: &StreamSummary) -> AppResult<Option<String>> {
        Ok(match self {
            Output::Json { columns, rows } => {
                Some(serde_json::to_string(&serde_json::json!({ "columns": columns, "rows": rows }))?)
            }
            Output::Csv { columns: Some(_) } => None,
            Output::Csv { columns: None } => Some(String::new()),
            Output::Summary => Some(serde_json::to_string_pretty(summary)?),
        })
    }
}

fn csv_line(cells: impl Iterator<Item = String>) -> String {
    let mut line = cells.collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn csv_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => csv_field(s),
        other => csv_field(&other.to_string()),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
