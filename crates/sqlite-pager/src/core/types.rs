use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::aggregate::{AggregationResult, AggregationSpec};
use crate::core::rewrite::FieldSource;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default)]
    pub decl_type: Option<String>,
    #[serde(default)]
    pub not_null: bool,
    /// Position within the primary key (1-based), 0 when not part of it.
    #[serde(default)]
    pub primary_key: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaObject {
    pub name: String,
    /// `table` or `view`.
    pub kind: String,
}

pub type DbRow = HashMap<String, Value>;

/// Named statement parameters. Keys may carry a `:`, `@` or `$` prefix.
pub type Params = BTreeMap<String, Value>;

/// What the execution port returns for one statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<DbRow>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Recoverable decisions the rewriter or controller made on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteNote {
    AmbiguousField {
        candidates: Vec<String>,
        fallback: String,
    },
    FieldNotInferred {
        fallback: String,
    },
    CursorDiscarded {
        reason: String,
    },
    OrderMismatch {
        order_expr: String,
        cursor_field: String,
    },
    ExistingLimitPreserved,
    CompoundStatement,
    CommonTableExpression,
    /// The cursor predicate filters rows before GROUP BY.
    GroupedStatement,
    CountUnavailable {
        reason: String,
    },
    CursorFieldMissing {
        field: String,
    },
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub sql: String,
    pub cursor_field: Option<String>,
    pub page_size: usize,
    pub cursor: Option<String>,
    pub parameters: Params,
    /// Inferred from the cursor's operator when absent.
    pub direction: Option<Direction>,
    pub include_total: bool,
}

impl PageRequest {
    pub fn new(sql: impl Into<String>, page_size: usize) -> Self {
        Self {
            sql: sql.into(),
            cursor_field: None,
            page_size,
            cursor: None,
            parameters: Params::new(),
            direction: None,
            include_total: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub columns: Vec<String>,
    pub rows: Vec<DbRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: Option<u64>,
    pub cursor_field: String,
    pub field_source: FieldSource,
    pub direction: Direction,
    pub page_size: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<RewriteNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Json,
    Csv,
    #[default]
    Summary,
}

impl OutputType {
    pub fn extension(self) -> &'static str {
        match self {
            OutputType::Json | OutputType::Summary => "json",
            OutputType::Csv => "csv",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputType::Json | OutputType::Summary => "application/json",
            OutputType::Csv => "text/csv",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub sql: String,
    pub cursor_field: Option<String>,
    pub batch_size: usize,
    pub max_rows: usize,
    pub aggregations: Vec<AggregationSpec>,
    pub output_type: OutputType,
    pub parameters: Params,
    /// Polled between batches; an in-flight batch always completes.
    pub deadline: Option<tokio::time::Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorReport {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Why a streaming run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    Exhausted,
    MaxRows,
    Deadline,
    /// More rows exist but the last row carried no usable cursor value.
    CursorUnavailable,
    Failed(ErrorReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub result_id: String,
    pub resource_uri: String,
    pub output_type: OutputType,
    pub cursor_field: String,
    pub total_rows: usize,
    pub batch_count: usize,
    pub elapsed_ms: u64,
    pub aggregations: Vec<AggregationResult>,
    pub termination: Termination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<RewriteNote>,
}
