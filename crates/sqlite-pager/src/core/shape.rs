//! Clause detection for caller-supplied SQL.
//!
//! This is not a parser. A depth-aware keyword scan finds the top-level
//! clauses the paginator needs to splice around, and reports them as a
//! [`StatementShape`]. Anything nested in parentheses (subqueries, window
//! definitions, CTE bodies) is invisible to the scan.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Word,
    Quoted,
    Literal,
    Number,
    Punct,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    pub depth: u32,
}

impl Token<'_> {
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(kw)
    }

    fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Quoted)
    }
}

/// Splits SQL into tokens, dropping whitespace and comments.
///
/// Bytes >= 0x80 are treated as identifier characters so multi-byte UTF-8
/// never gets split; every token boundary falls on an ASCII byte.
pub(crate) fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut depth: u32 = 0;
    let mut i = 0;

    let mut push = |kind, start: usize, end: usize, depth: u32| {
        out.push(Token {
            kind,
            text: &sql[start..end],
            start,
            end,
            depth,
        })
    };

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b if b.is_ascii_whitespace() => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
            }
            b'\'' => {
                let end = skip_quoted(bytes, i, b'\'');
                push(TokenKind::Literal, i, end, depth);
                i = end;
            }
            b'"' | b'`' => {
                let end = skip_quoted(bytes, i, b);
                push(TokenKind::Quoted, i, end, depth);
                i = end;
            }
            b'[' => {
                let end = find_from(bytes, i + 1, b"]").map_or(bytes.len(), |p| p + 1);
                push(TokenKind::Quoted, i, end, depth);
                i = end;
            }
            b'(' => {
                push(TokenKind::Punct, i, i + 1, depth);
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                push(TokenKind::Punct, i, i + 1, depth);
                i += 1;
            }
            b if is_word_byte(b) && !b.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                push(TokenKind::Word, start, i, depth);
            }
            b if b.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (is_word_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                push(TokenKind::Number, start, i, depth);
            }
            _ => {
                push(TokenKind::Punct, i, i + 1, depth);
                i += 1;
            }
        }
    }

    out
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // Doubled quote is an escaped quote.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Overwrites comments with spaces, keeping every byte offset in place.
///
/// Text spliced out of the result can be joined with new clauses without a
/// `--` comment swallowing them.
pub(crate) fn blank_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, q);
                continue;
            }
            b'[' => {
                i = find_from(bytes, i + 1, b"]").map_or(bytes.len(), |p| p + 1);
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                find_from(bytes, i + 2, b"\n").unwrap_or(bytes.len())
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2)
            }
            _ => {
                i += 1;
                continue;
            }
        };
        out.push_str(&sql[copied..i]);
        out.extend(std::iter::repeat(' ').take(end - i));
        copied = end;
        i = end;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Removes surrounding identifier quotes: `"a"`, `` `a` `` and `[a]`.
pub(crate) fn unquote(name: &str) -> String {
    let b = name.as_bytes();
    if b.len() >= 2 {
        let (first, last) = (b[0], b[b.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'`' && last == b'`') {
            let q = first as char;
            let doubled: String = [q, q].iter().collect();
            return name[1..name.len() - 1].replace(&doubled, &q.to_string());
        }
        if first == b'[' && last == b']' {
            return name[1..name.len() - 1].to_string();
        }
    }
    name.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    /// Expression text as written, without direction/NULLS/COLLATE modifiers.
    pub expr: String,
    pub descending: bool,
    /// Set when the expression is a plain or dotted column reference.
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    pub span: Span,
    pub terms: Vec<OrderTerm>,
}

/// Where the top-level clauses of a statement sit.
///
/// All offsets index into the statement text passed to the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementShape {
    /// Length of the statement without trailing semicolons and comments.
    pub body_len: usize,
    /// Output column names of the (first) select list; `*` for wildcards.
    pub select_columns: Vec<String>,
    /// Predicate text following the top-level `WHERE` keyword.
    pub where_clause: Option<Span>,
    /// End of the FROM/WHERE region: new predicates belong before this.
    pub filter_end: usize,
    pub has_grouping: bool,
    pub order_by: Option<OrderClause>,
    pub limit: Option<Span>,
    pub leading_cte: bool,
    pub compound: bool,
}

impl StatementShape {
    /// Start of the trailing ORDER BY / LIMIT section.
    pub fn tail_start(&self) -> usize {
        let order = self.order_by.as_ref().map(|o| o.span.start);
        let limit = self.limit.map(|l| l.start);
        match (order, limit) {
            (Some(o), Some(l)) => o.min(l),
            (Some(o), None) => o,
            (None, Some(l)) => l,
            (None, None) => self.body_len,
        }
    }
}

/// Produces a [`StatementShape`] from SQL text.
pub trait ClauseAnalyzer: Send + Sync {
    fn analyze(&self, sql: &str) -> StatementShape;
}

/// Default analyzer: top-level keyword scan over the token stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScanner;

const FILTER_TERMINATORS: &[&str] = &["GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT"];
const COMPOUND_OPERATORS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];

impl ClauseAnalyzer for KeywordScanner {
    fn analyze(&self, sql: &str) -> StatementShape {
        // Body ends at the last real token: trailing `;` and comments drop off.
        let mut tokens = tokenize(sql);
        while tokens.last().is_some_and(|t| t.kind == TokenKind::Punct && t.text == ";") {
            tokens.pop();
        }
        let body_len = tokens.last().map_or(0, |t| t.end);
        let body = &sql[..body_len];
        let top: Vec<&Token<'_>> = tokens.iter().filter(|t| t.depth == 0).collect();

        let mut shape = StatementShape {
            body_len,
            filter_end: body_len,
            leading_cte: top.first().is_some_and(|t| t.is_keyword("WITH")),
            ..StatementShape::default()
        };

        let mut select_seen = false;
        let mut in_from = false;
        let mut where_start: Option<usize> = None;
        let mut filter_end: Option<usize> = None;

        let mut idx = 0;
        while idx < top.len() {
            let tok = top[idx];
            if tok.kind != TokenKind::Word {
                idx += 1;
                continue;
            }
            let upper = tok.text.to_ascii_uppercase();
            match upper.as_str() {
                "SELECT" if !select_seen => {
                    select_seen = true;
                    shape.select_columns = select_list(&tokens, tok.start);
                }
                kw if COMPOUND_OPERATORS.contains(&kw) => {
                    // Clause positions below refer to the last arm.
                    shape.compound = true;
                    in_from = false;
                    where_start = None;
                    filter_end = None;
                    shape.has_grouping = false;
                }
                "FROM" => in_from = true,
                "WHERE" if in_from && where_start.is_none() && filter_end.is_none() => {
                    where_start = Some(tok.end);
                }
                "ORDER" if top.get(idx + 1).is_some_and(|n| n.is_keyword("BY")) => {
                    filter_end.get_or_insert(tok.start);
                    let end = top[idx + 1..]
                        .iter()
                        .find(|t| t.is_keyword("LIMIT"))
                        .map_or(body_len, |t| t.start);
                    shape.order_by = Some(OrderClause {
                        span: Span { start: tok.start, end },
                        terms: order_terms(body, &tokens, top[idx + 1].end, end),
                    });
                }
                "LIMIT" => {
                    filter_end.get_or_insert(tok.start);
                    shape.limit = Some(Span {
                        start: tok.start,
                        end: body_len,
                    });
                    break;
                }
                kw if FILTER_TERMINATORS.contains(&kw) => {
                    if kw == "GROUP" || kw == "HAVING" {
                        shape.has_grouping = true;
                    }
                    filter_end.get_or_insert(tok.start);
                }
                _ => {}
            }
            idx += 1;
        }

        shape.filter_end = filter_end.unwrap_or(body_len);
        shape.where_clause = where_start.map(|start| Span {
            start,
            end: shape.filter_end,
        });
        shape
    }
}

/// Output names of the select list that starts at `select_at`.
fn select_list(tokens: &[Token<'_>], select_at: usize) -> Vec<String> {
    let mut items: Vec<Vec<&Token<'_>>> = vec![Vec::new()];
    let mut started = false;
    for tok in tokens.iter().filter(|t| t.start > select_at) {
        if tok.depth == 0 && tok.is_keyword("FROM") {
            break;
        }
        if tok.depth > 0 {
            // Only depth-0 tokens name an item; nested tokens still mark it non-empty.
            if let Some(cur) = items.last_mut() {
                cur.push(tok);
            }
            continue;
        }
        if !started && (tok.is_keyword("DISTINCT") || tok.is_keyword("ALL")) {
            continue;
        }
        started = true;
        if tok.is_punct(",") {
            items.push(Vec::new());
        } else if let Some(cur) = items.last_mut() {
            cur.push(tok);
        }
    }

    items
        .iter()
        .filter_map(|item| {
            let top: Vec<&&Token<'_>> = item.iter().filter(|t| t.depth == 0).collect();
            let last = **top.last()?;
            if last.is_punct("*") {
                return Some("*".to_string());
            }
            if !last.is_name() || last.is_keyword("END") {
                return None;
            }
            let named = match top.len() {
                1 => true,
                n => {
                    let prev = top[n - 2];
                    prev.is_keyword("AS") || prev.is_punct(".") || prev.is_name() || prev.is_punct(")")
                }
            };
            named.then(|| unquote(last.text))
        })
        .collect()
}

fn order_terms(body: &str, tokens: &[Token<'_>], from: usize, to: usize) -> Vec<OrderTerm> {
    let mut terms: Vec<Vec<&Token<'_>>> = vec![Vec::new()];
    for tok in tokens.iter().filter(|t| t.start >= from && t.end <= to) {
        if tok.depth == 0 && tok.is_punct(",") {
            terms.push(Vec::new());
        } else if let Some(cur) = terms.last_mut() {
            cur.push(tok);
        }
    }

    terms
        .into_iter()
        .filter(|t| !t.is_empty())
        .map(|mut toks| {
            let mut descending = false;
            loop {
                let n = toks.len();
                if n >= 3
                    && toks[n - 2].is_keyword("NULLS")
                    && (toks[n - 1].is_keyword("FIRST") || toks[n - 1].is_keyword("LAST"))
                {
                    toks.truncate(n - 2);
                } else if n >= 2 && (toks[n - 1].is_keyword("ASC") || toks[n - 1].is_keyword("DESC")) {
                    descending = toks[n - 1].is_keyword("DESC");
                    toks.truncate(n - 1);
                } else if n >= 3 && toks[n - 2].is_keyword("COLLATE") {
                    toks.truncate(n - 2);
                } else {
                    break;
                }
            }
            let expr = body[toks[0].start..toks[toks.len() - 1].end].to_string();
            OrderTerm {
                column: column_ref(&toks).then(|| expr.clone()),
                expr,
                descending,
            }
        })
        .collect()
}

/// `name`, `t.name`, `"quoted"`: alternating names and dots.
fn column_ref(toks: &[&Token<'_>]) -> bool {
    toks.len() % 2 == 1
        && toks.iter().enumerate().all(|(i, t)| {
            if i % 2 == 0 {
                t.is_name()
            } else {
                t.is_punct(".")
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(sql: &str) -> StatementShape {
        KeywordScanner.analyze(sql)
    }

    #[test]
    fn test_plain_select() {
        let sql = "SELECT id, name FROM users";
        let s = shape(sql);
        assert_eq!(s.select_columns, vec!["id", "name"]);
        assert!(s.where_clause.is_none());
        assert!(s.order_by.is_none());
        assert!(s.limit.is_none());
        assert_eq!(s.filter_end, sql.len());
    }

    #[test]
    fn test_where_order_limit_positions() {
        let sql = "SELECT * FROM t WHERE a = 1 OR b = 2 ORDER BY t.id DESC LIMIT 10 OFFSET 5;";
        let s = shape(sql);
        let w = s.where_clause.unwrap();
        assert_eq!(sql[w.start..w.end].trim(), "a = 1 OR b = 2");
        let order = s.order_by.unwrap();
        assert_eq!(sql[order.span.start..order.span.end].trim(), "ORDER BY t.id DESC");
        assert_eq!(order.terms[0].expr, "t.id");
        assert!(order.terms[0].descending);
        assert_eq!(order.terms[0].column.as_deref(), Some("t.id"));
        let limit = s.limit.unwrap();
        assert_eq!(&sql[limit.start..limit.end], "LIMIT 10 OFFSET 5");
        assert_eq!(s.body_len, sql.len() - 1);
    }

    #[test]
    fn test_nested_keywords_are_ignored() {
        let sql = "SELECT a, (SELECT max(x) FROM u WHERE u.k = t.k ORDER BY x LIMIT 1) AS top \
                   FROM t WHERE a IN (SELECT a FROM v LIMIT 3)";
        let s = shape(sql);
        assert_eq!(s.select_columns, vec!["a", "top"]);
        assert!(s.order_by.is_none());
        assert!(s.limit.is_none());
        let w = s.where_clause.unwrap();
        assert!(sql[w.start..w.end].contains("IN (SELECT a FROM v LIMIT 3)"));
    }

    #[test]
    fn test_keywords_inside_literals_and_comments() {
        let sql = "SELECT 'order by x' AS label, \"limit\" FROM t -- WHERE nothing\n";
        let s = shape(sql);
        assert!(s.order_by.is_none());
        assert!(s.where_clause.is_none());
        assert_eq!(s.select_columns, vec!["label", "limit"]);
    }

    #[test]
    fn test_grouping_ends_filter_region() {
        let sql = "SELECT k, count(*) AS n FROM t WHERE v > 0 GROUP BY k HAVING n > 1";
        let s = shape(sql);
        assert!(s.has_grouping);
        assert_eq!(&sql[s.filter_end..s.filter_end + 5], "GROUP");
        let w = s.where_clause.unwrap();
        assert_eq!(sql[w.start..w.end].trim(), "v > 0");
    }

    #[test]
    fn test_order_modifiers_and_expressions() {
        let s = shape("SELECT * FROM t ORDER BY lower(name) COLLATE NOCASE ASC NULLS LAST, 2");
        let terms = s.order_by.unwrap().terms;
        assert_eq!(terms[0].expr, "lower(name)");
        assert!(terms[0].column.is_none());
        assert!(!terms[0].descending);
        assert_eq!(terms[1].expr, "2");
        assert!(terms[1].column.is_none());
    }

    #[test]
    fn test_cte_and_compound_flags() {
        let s = shape("WITH x AS (SELECT id FROM a ORDER BY id) SELECT id FROM x");
        assert!(s.leading_cte);
        assert!(!s.compound);
        assert!(s.order_by.is_none());
        assert_eq!(s.select_columns, vec!["id"]);

        let s = shape("SELECT id FROM a WHERE x = 1 UNION ALL SELECT id FROM b ORDER BY id");
        assert!(s.compound);
        assert!(s.where_clause.is_none());
        assert!(s.order_by.is_some());
    }

    #[test]
    fn test_select_list_names() {
        let s = shape("SELECT DISTINCT t.user_id, amount * 2, sum(x) total, CASE WHEN a THEN 1 END, t.* FROM t");
        assert_eq!(s.select_columns, vec!["user_id", "total", "*"]);
    }

    #[test]
    fn test_blank_comments_keeps_offsets() {
        let sql = "SELECT '--x' AS a, \"/*y*/\" -- gone\nFROM t /* é */ WHERE a > 0";
        let blanked = blank_comments(sql);
        assert_eq!(blanked.len(), sql.len());
        assert!(blanked.contains("'--x'"));
        assert!(blanked.contains("\"/*y*/\""));
        assert!(!blanked.contains("gone"));
        assert!(!blanked.contains('é'));
        assert_eq!(shape(&blanked), shape(sql));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"Order \"\"Id\"\"\""), "Order \"Id\"");
        assert_eq!(unquote("[my col]"), "my col");
        assert_eq!(unquote("plain"), "plain");
    }
}
