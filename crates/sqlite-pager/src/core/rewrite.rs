//! Turns a caller's read-only statement into one page of a keyset scan.
//!
//! Rewriting works on the [`StatementShape`] produced by a [`ClauseAnalyzer`]
//! and never looks inside subqueries. CTEs and compound statements are
//! rewritten as if they were simple selects and flagged in the notes; when
//! their arms carry their own ordering the page boundaries may be wrong.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::core::cursor::{Cursor, Operator};
use crate::core::schema::is_safe_table_ref;
use crate::core::shape::{blank_comments, unquote, ClauseAnalyzer, KeywordScanner, OrderTerm, StatementShape};
use crate::core::types::{DbRow, Direction, Params, RewriteNote, SortOrder};
use crate::error::{AppError, AppResult};

const CURSOR_PARAM: &str = "cursor_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Explicit,
    OrderBy,
    SelectList,
    Default,
}

/// The column used for both ordering and cursor comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// As it appears in SQL, possibly qualified (`t.id`).
    pub expr: String,
    /// Key under which the value appears in result rows (`id`).
    pub key: String,
    pub source: FieldSource,
    /// Direction of the ordering the statement will carry for this field.
    pub order: SortOrder,
}

impl ResolvedField {
    fn new(expr: &str, source: FieldSource) -> Self {
        Self {
            expr: expr.to_string(),
            key: key_of(expr),
            source,
            order: SortOrder::Asc,
        }
    }

    fn matches(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.expr) || name.eq_ignore_ascii_case(&self.key)
    }

    /// Whether an ORDER BY term sorts on this field.
    fn leads(&self, term: &OrderTerm) -> bool {
        term.column
            .as_deref()
            .is_some_and(|column| self.matches(column) || key_of(column).eq_ignore_ascii_case(&self.key))
    }

    /// Reference usable outside a `page_source` wrapper, where qualifiers no
    /// longer resolve.
    fn outer_ref(&self) -> String {
        if self.expr.contains('.') {
            format!("\"{}\"", self.key.replace('"', "\"\""))
        } else {
            self.expr.clone()
        }
    }

    /// Strict comparison that continues in the statement's natural order.
    pub fn forward(&self) -> Operator {
        match self.order {
            SortOrder::Asc => Operator::Gt,
            SortOrder::Desc => Operator::Lt,
        }
    }

    /// Strict comparison that walks against the natural order.
    pub fn backward(&self) -> Operator {
        match self.order {
            SortOrder::Asc => Operator::Lt,
            SortOrder::Desc => Operator::Gt,
        }
    }

    /// Inclusive anchor for turning around from a forward page.
    pub fn reverse_anchor(&self) -> Operator {
        match self.order {
            SortOrder::Asc => Operator::Le,
            SortOrder::Desc => Operator::Ge,
        }
    }

    /// Inclusive anchor for turning around from a backward page.
    pub fn forward_anchor(&self) -> Operator {
        match self.order {
            SortOrder::Asc => Operator::Ge,
            SortOrder::Desc => Operator::Le,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewriteInput<'a> {
    pub sql: &'a str,
    pub cursor_field: Option<&'a str>,
    pub cursor: Option<&'a str>,
    pub page_size: usize,
    pub default_field: &'a str,
    pub parameters: &'a Params,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub sql: String,
    pub parameters: Params,
    pub field: ResolvedField,
    pub direction: Direction,
    /// The inbound cursor, when it decoded and matched the field.
    pub cursor: Option<Cursor>,
    pub notes: Vec<RewriteNote>,
}

#[derive(Debug, Clone, Default)]
pub struct StatementRewriter<A = KeywordScanner> {
    analyzer: A,
}

impl StatementRewriter<KeywordScanner> {
    pub fn new() -> Self {
        Self::with_analyzer(KeywordScanner)
    }
}

impl<A: ClauseAnalyzer> StatementRewriter<A> {
    pub fn with_analyzer(analyzer: A) -> Self {
        Self { analyzer }
    }

    pub fn rewrite(&self, input: RewriteInput<'_>) -> AppResult<Rewrite> {
        if input.page_size == 0 {
            return Err(AppError::InvalidRequest("page size must be positive".into()));
        }
        let text = blank_comments(input.sql);
        let shape = self.analyzer.analyze(&text);
        let body = &text[..shape.body_len];
        let mut notes = Vec::new();
        if shape.leading_cte {
            notes.push(RewriteNote::CommonTableExpression);
        }
        if shape.compound {
            notes.push(RewriteNote::CompoundStatement);
        }

        let field = resolve_field(&shape, input.cursor_field, input.default_field, &mut notes)?;

        let cursor = input.cursor.and_then(|token| match Cursor::decode(token) {
            Ok(c) if field.matches(&c.field) => Some(c),
            Ok(c) => {
                tracing::warn!(cursor_field = %c.field, field = %field.expr, "cursor field mismatch; starting from first page");
                notes.push(RewriteNote::CursorDiscarded {
                    reason: format!("cursor is for {}, statement pages on {}", c.field, field.expr),
                });
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable cursor; starting from first page");
                notes.push(RewriteNote::CursorDiscarded { reason: e.to_string() });
                None
            }
        });

        if shape.has_grouping && cursor.is_some() {
            notes.push(RewriteNote::GroupedStatement);
        }

        let direction = input.direction.unwrap_or(match &cursor {
            Some(c) if c.operator.is_ascending() != (field.order == SortOrder::Asc) => Direction::Prev,
            _ => Direction::Next,
        });

        let mut parameters = input.parameters.clone();
        let mut predicate = |column: &str| {
            cursor.as_ref().map(|c| {
                let name = unique_param_name(&parameters);
                parameters.insert(format!(":{name}"), c.value.clone());
                format!("{column} {} :{name}", c.operator.as_sql())
            })
        };

        let sql = if shape.limit.is_some() {
            // The caller's LIMIT/OFFSET bounds the whole result, so it stays
            // inside and the page is cut from the outside.
            notes.push(RewriteNote::ExistingLimitPreserved);
            let column = field.outer_ref();
            let mut sql = format!("SELECT * FROM ({}) AS page_source", body.trim());
            if let Some(p) = predicate(&column) {
                push_part(&mut sql, &format!("WHERE {p}"));
            }
            push_part(&mut sql, &render_order(&[(column.as_str(), field.order == SortOrder::Desc)], direction));
            push_part(&mut sql, &format!("LIMIT {}", input.page_size));
            sql
        } else {
            let mut sql = String::with_capacity(body.len() + 64);

            // FROM/WHERE region, with the cursor predicate spliced in.
            match (predicate(&field.expr), shape.where_clause) {
                (Some(p), Some(w)) => {
                    sql.push_str(body[..w.start].trim_end());
                    sql.push_str(" (");
                    sql.push_str(body[w.start..w.end].trim());
                    sql.push_str(") AND ");
                    sql.push_str(&p);
                }
                (Some(p), None) => {
                    sql.push_str(body[..shape.filter_end].trim_end());
                    sql.push_str(" WHERE ");
                    sql.push_str(&p);
                }
                (None, _) => sql.push_str(body[..shape.filter_end].trim_end()),
            }

            // GROUP BY / HAVING / WINDOW untouched.
            let tail_start = shape.tail_start();
            if shape.filter_end < tail_start {
                push_part(&mut sql, &body[shape.filter_end..tail_start]);
            }

            let order = match &shape.order_by {
                Some(o) if o.terms.first().is_some_and(|t| field.leads(t)) => match direction {
                    Direction::Next => body[o.span.start..o.span.end].trim().to_string(),
                    Direction::Prev => {
                        let terms: Vec<(&str, bool)> =
                            o.terms.iter().map(|t| (t.expr.as_str(), t.descending)).collect();
                        render_order(&terms, direction)
                    }
                },
                // The cursor field leads; the statement's own terms break ties.
                Some(o) => {
                    let terms: Vec<(&str, bool)> = std::iter::once((field.expr.as_str(), false))
                        .chain(o.terms.iter().map(|t| (t.expr.as_str(), t.descending)))
                        .collect();
                    render_order(&terms, direction)
                }
                None => render_order(&[(field.expr.as_str(), false)], direction),
            };
            push_part(&mut sql, &order);
            push_part(&mut sql, &format!("LIMIT {}", input.page_size));
            sql
        };

        tracing::debug!(sql = %sql, cursor_field = %field.expr, ?direction, "rewrote statement");

        Ok(Rewrite {
            sql,
            parameters,
            field,
            direction,
            cursor,
            notes,
        })
    }

    /// Wraps the statement in a row count. ORDER BY is dropped; a LIMIT keeps
    /// it, since it decides which rows belong to the result.
    pub fn count_statement(&self, sql: &str) -> String {
        let text = blank_comments(sql);
        let shape = self.analyzer.analyze(&text);
        let end = if shape.limit.is_some() {
            shape.body_len
        } else {
            shape.tail_start()
        };
        let inner = text[..end].trim();
        format!("SELECT COUNT(*) AS total_count FROM ({inner}) AS page_source")
    }
}

/// `ORDER BY a ASC, b DESC`, every direction flipped for a Prev page.
fn render_order(terms: &[(&str, bool)], direction: Direction) -> String {
    let rendered: Vec<String> = terms
        .iter()
        .map(|(expr, descending)| {
            let descending = *descending != (direction == Direction::Prev);
            format!("{expr} {}", if descending { "DESC" } else { "ASC" })
        })
        .collect();
    format!("ORDER BY {}", rendered.join(", "))
}

/// Row key for a possibly qualified, possibly quoted column reference.
fn key_of(expr: &str) -> String {
    unquote(expr.rsplit('.').next().unwrap_or(expr))
}

fn push_part(sql: &mut String, part: &str) {
    let part = part.trim();
    if part.is_empty() {
        return;
    }
    if !sql.is_empty() {
        sql.push(' ');
    }
    sql.push_str(part);
}

/// Picks the ordering column: explicit, then existing ORDER BY, then the
/// select list, then the configured default.
pub fn resolve_field(
    shape: &StatementShape,
    explicit: Option<&str>,
    default_field: &str,
    notes: &mut Vec<RewriteNote>,
) -> AppResult<ResolvedField> {
    let first_order = shape.order_by.as_ref().and_then(|o| o.terms.first());

    let mut field = if let Some(name) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        if !is_safe_table_ref(name) {
            return Err(AppError::InvalidRequest(format!("invalid cursor field: {name}")));
        }
        ResolvedField::new(name, FieldSource::Explicit)
    } else if let Some(column) = first_order.and_then(|t| t.column.as_deref()) {
        ResolvedField::new(column, FieldSource::OrderBy)
    } else {
        match infer_from_select_list(&shape.select_columns) {
            Inference::Found(name) => ResolvedField::new(&name, FieldSource::SelectList),
            outcome => {
                if !is_safe_table_ref(default_field) {
                    return Err(AppError::InvalidRequest(format!(
                        "invalid default cursor field: {default_field}"
                    )));
                }
                tracing::warn!(fallback = %default_field, "could not infer cursor field; using default");
                notes.push(match outcome {
                    Inference::Ambiguous(candidates) => RewriteNote::AmbiguousField {
                        candidates,
                        fallback: default_field.to_string(),
                    },
                    _ => RewriteNote::FieldNotInferred {
                        fallback: default_field.to_string(),
                    },
                });
                ResolvedField::new(default_field, FieldSource::Default)
            }
        }
    };

    if let Some(term) = first_order {
        if field.leads(term) {
            if term.descending {
                field.order = SortOrder::Desc;
            }
        } else {
            tracing::warn!(order = %term.expr, field = %field.expr, "statement is ordered by another expression; cursor field goes first");
            notes.push(RewriteNote::OrderMismatch {
                order_expr: term.expr.clone(),
                cursor_field: field.expr.clone(),
            });
        }
    }

    Ok(field)
}

enum Inference {
    Found(String),
    Ambiguous(Vec<String>),
    Nothing,
}

fn key_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)^(id|rowid|_rowid_|oid)$").expect("static regex"),
            Regex::new(r"^(?i:[a-z0-9_]+_id)$|^[a-z][a-z0-9]*Id$").expect("static regex"),
            Regex::new(r"(?i)^([a-z0-9_]+_)?(uuid|guid|pk|key)$").expect("static regex"),
        ]
    })
}

/// Tiered match against common key naming; the first non-empty tier wins.
fn infer_from_select_list(columns: &[String]) -> Inference {
    for pattern in key_patterns() {
        let hits: Vec<String> = columns.iter().filter(|c| pattern.is_match(c)).cloned().collect();
        match hits.len() {
            0 => continue,
            1 => return Inference::Found(hits.into_iter().next().unwrap_or_default()),
            _ => return Inference::Ambiguous(hits),
        }
    }
    Inference::Nothing
}

fn unique_param_name(params: &Params) -> String {
    let taken = |name: &str| {
        params
            .keys()
            .any(|k| k.trim_start_matches([':', '@', '$']).eq_ignore_ascii_case(name))
    };
    if !taken(CURSOR_PARAM) {
        return CURSOR_PARAM.to_string();
    }
    (1..)
        .map(|n| format!("{CURSOR_PARAM}_{n}"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| CURSOR_PARAM.to_string())
}

/// Value of the cursor field in a result row, if it can anchor a cursor.
pub fn row_value<'a>(row: &'a DbRow, key: &str) -> Option<&'a Value> {
    let v = row
        .get(key)
        .or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))?;
    crate::core::cursor::is_scalar(v).then_some(v)
}
