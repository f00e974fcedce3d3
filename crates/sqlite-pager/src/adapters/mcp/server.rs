use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};

use crate::{
    cli::Args,
    core::{
        aggregate::AggregationSpec,
        connection::{ConnectionManager, WorkerHandle},
        limits::Limits,
        pager::PaginationController,
        schema,
        sink::{FileSink, MemorySink, ResultSink},
        stream::StreamingAggregator,
        types::{Direction, OutputType, PageRequest, Params, StreamRequest},
    },
    error::{AppError, AppResult},
};

const RESULTS_SCHEME: &str = "results://";
const SQLITE_SCHEME: &str = "sqlite://";
const RESULTS_LISTED: usize = 20;

/// Everything a request handler may touch.
struct ServerState {
    args: Args,
    limits: Limits,
    cm: ConnectionManager,
    sink: Arc<dyn ResultSink>,
}

impl ServerState {
    fn new(args: Args) -> Self {
        let sink: Arc<dyn ResultSink> = match &args.results_dir {
            Some(dir) => Arc::new(FileSink::new(dir)),
            None => Arc::new(MemorySink::new()),
        };
        Self {
            limits: Limits::from_args(&args),
            cm: ConnectionManager::new(),
            sink,
            args,
        }
    }

    fn worker(&self, db_path: &str) -> AppResult<WorkerHandle> {
        let db_path = validate_db_path(Path::new(db_path), &self.args.allowed_dir)?;
        self.cm.ensure_worker(&db_path)
    }

    fn pager(&self, worker: WorkerHandle) -> PaginationController<WorkerHandle> {
        PaginationController::new(worker, self.args.default_cursor_field.clone())
    }
}

/// MCP server (JSON-RPC 2.0 over stdio).
///
/// - initialize
/// - tools/list
/// - tools/call: fetch_page, stream_aggregate, get_schema
/// - resources/list (stored stream results)
/// - resources/read (results://{id}, sqlite://.../tables/...)
pub async fn run(args: Args) -> AppResult<()> {
    let state = ServerState::new(args);
    tracing::info!(
        results_dir = ?state.args.results_dir,
        allowed_dirs = state.args.allowed_dir.len(),
        "mcp server listening on stdio"
    );

    let mut stdin = io::BufReader::new(io::stdin());
    let mut stdout = io::BufWriter::new(io::stdout());
    let mut line = String::new();

    loop {
        line.clear();
        let n = stdin.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                let resp = jsonrpc_error(Value::Null, -32700, format!("parse error: {e}"), None);
                write_line(&mut stdout, &resp).await?;
                continue;
            }
        };

        // Notifications (no id) are ignored.
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        if id.is_null() {
            continue;
        }

        let Some(method) = msg.get("method").and_then(|m| m.as_str()) else {
            let resp = jsonrpc_error(id, -32600, "invalid request: missing method".into(), None);
            write_line(&mut stdout, &resp).await?;
            continue;
        };

        let params = msg.get("params").cloned().unwrap_or(Value::Null);
        let resp = dispatch(&state, id, method, params).await;
        write_line(&mut stdout, &resp).await?;
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}

async fn dispatch(state: &ServerState, id: Value, method: &str, params: Value) -> Value {
    tracing::debug!(method, "request");
    match method {
        "initialize" => handle_initialize(id),
        "tools/list" => handle_tools_list(id),
        "tools/call" => handle_tools_call(id, params, state).await,
        "resources/list" => handle_resources_list(id, state).await,
        "resources/read" => handle_resources_read(id, params, state).await,
        _ => jsonrpc_error(id, -32601, format!("method not found: {method}"), None),
    }
}

fn handle_initialize(id: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "serverInfo": {
                "name": "sqlite-pager",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { }
            }
        }
    })
}

fn handle_tools_list(id: Value) -> Value {
    let parameters = serde_json::json!({
        "type": "object",
        "description": "Named statement parameters (:name, @name, $name or bare name)."
    });
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "fetch_page",
                    "description": "Fetch one page of a read-only SELECT using keyset (cursor) pagination.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "db_path": { "type": "string" },
                            "sql": { "type": "string" },
                            "cursor_field": { "type": "string" },
                            "page_size": { "type": "integer", "minimum": 1 },
                            "cursor": { "type": "string", "description": "next_cursor or prev_cursor from an earlier page" },
                            "parameters": parameters,
                            "direction": { "type": "string", "enum": ["next", "prev"] },
                            "include_total": { "type": "boolean" }
                        },
                        "required": ["db_path", "sql"]
                    }
                },
                {
                    "name": "stream_aggregate",
                    "description": "Walk a whole read-only SELECT in batches, computing aggregates and storing the result as a resource.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "db_path": { "type": "string" },
                            "sql": { "type": "string" },
                            "cursor_field": { "type": "string" },
                            "batch_size": { "type": "integer", "minimum": 1 },
                            "max_rows": { "type": "integer", "minimum": 1 },
                            "aggregations": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "field": { "type": "string" },
                                        "operation": {
                                            "type": "string",
                                            "enum": ["sum", "avg", "min", "max", "count", "countDistinct"]
                                        }
                                    },
                                    "required": ["field", "operation"]
                                }
                            },
                            "output_type": { "type": "string", "enum": ["json", "csv", "summary"] },
                            "parameters": parameters
                        },
                        "required": ["db_path", "sql"]
                    }
                },
                {
                    "name": "get_schema",
                    "description": "Get database structure (tables, views and columns).",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "db_path": { "type": "string" }
                        },
                        "required": ["db_path"]
                    }
                }
            ]
        }
    })
}

async fn handle_tools_call(id: Value, params: Value, state: &ServerState) -> Value {
    let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
        return jsonrpc_error(id, -32602, "invalid params: missing name".into(), None);
    };
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let res = match name {
        "fetch_page" => tool_fetch_page(arguments, state).await,
        "stream_aggregate" => tool_stream_aggregate(arguments, state).await,
        "get_schema" => tool_get_schema(arguments, state).await,
        other => Err(AppError::InvalidRequest(format!("unknown tool: {other}"))),
    };

    match res {
        Ok((text, structured)) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{ "type": "text", "text": text }],
                "structuredContent": structured,
                "isError": false
            }
        }),
        Err(e) => {
            tracing::warn!(tool = name, code = e.code(), error = %e, "tool call failed");
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": format!("{}: {}", e.code(), e) }],
                    "isError": true
                }
            })
        }
    }
}

async fn handle_resources_list(id: Value, state: &ServerState) -> Value {
    match state.sink.list(RESULTS_LISTED).await {
        Ok(results) => {
            let resources: Vec<Value> = results
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "uri": format!("{RESULTS_SCHEME}{}", m.id),
                        "name": format!("stream result {}", m.id),
                        "description": format!("{} rows in {} batches, {}", m.total_rows, m.batch_count, m.created_at.to_rfc3339()),
                        "mimeType": m.output_type.mime_type()
                    })
                })
                .collect();
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": resources }
            })
        }
        Err(e) => resource_error(id, e),
    }
}

async fn handle_resources_read(id: Value, params: Value, state: &ServerState) -> Value {
    let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
        return jsonrpc_error(id, -32602, "invalid params: missing uri".into(), None);
    };

    let res = if let Some(result_id) = uri.strip_prefix(RESULTS_SCHEME) {
        read_result_resource(result_id, state).await
    } else {
        read_sqlite_table_resource(uri, state).await
    };

    match res {
        Ok((mime, text, structured)) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "contents": [{
                    "uri": uri,
                    "mimeType": mime,
                    "text": text
                }],
                "structuredContent": structured
            }
        }),
        Err(e) => resource_error(id, e),
    }
}

fn resource_error(id: Value, e: AppError) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32000, "message": format!("{}: {}", e.code(), e) }
    })
}

#[derive(Debug, Deserialize)]
struct FetchPageArgs {
    db_path: String,
    sql: String,
    cursor_field: Option<String>,
    page_size: Option<usize>,
    cursor: Option<String>,
    #[serde(default)]
    parameters: Params,
    direction: Option<Direction>,
    #[serde(default)]
    include_total: bool,
}

#[derive(Debug, Deserialize)]
struct StreamAggregateArgs {
    db_path: String,
    sql: String,
    cursor_field: Option<String>,
    batch_size: Option<usize>,
    max_rows: Option<usize>,
    #[serde(default)]
    aggregations: Vec<AggregationSpec>,
    #[serde(default)]
    output_type: OutputType,
    #[serde(default)]
    parameters: Params,
}

#[derive(Debug, Deserialize)]
struct GetSchemaArgs {
    db_path: String,
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> AppResult<T> {
    serde_json::from_value(arguments).map_err(|e| AppError::InvalidRequest(format!("invalid arguments: {e}")))
}

async fn tool_fetch_page(arguments: Value, state: &ServerState) -> AppResult<(String, Value)> {
    let a: FetchPageArgs = parse_args(arguments)?;
    let pager = state.pager(state.worker(&a.db_path)?);

    let request = PageRequest {
        sql: a.sql,
        cursor_field: a.cursor_field,
        page_size: state.limits.page_size(a.page_size),
        cursor: a.cursor,
        parameters: a.parameters,
        direction: a.direction,
        include_total: a.include_total,
    };
    let page = pager.fetch_page(&request).await?;

    let structured = serde_json::to_value(&page)?;
    let text = serde_json::to_string_pretty(&structured).unwrap_or_else(|_| "<result>".into());
    Ok((text, structured))
}

async fn tool_stream_aggregate(arguments: Value, state: &ServerState) -> AppResult<(String, Value)> {
    let a: StreamAggregateArgs = parse_args(arguments)?;
    let pager = state.pager(state.worker(&a.db_path)?);
    let aggregator = StreamingAggregator::new(pager, state.sink.clone());

    let deadline = (state.args.timeout_ms > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_millis(state.args.timeout_ms));
    let request = StreamRequest {
        sql: a.sql,
        cursor_field: a.cursor_field,
        batch_size: state.limits.page_size(a.batch_size),
        max_rows: state.limits.max_rows(a.max_rows),
        aggregations: a.aggregations,
        output_type: a.output_type,
        parameters: a.parameters,
        deadline,
    };
    let summary = aggregator.run(&request).await?;

    let structured = serde_json::to_value(&summary)?;
    let text = serde_json::to_string_pretty(&structured).unwrap_or_else(|_| "<result>".into());
    Ok((text, structured))
}

async fn tool_get_schema(arguments: Value, state: &ServerState) -> AppResult<(String, Value)> {
    let a: GetSchemaArgs = parse_args(arguments)?;
    let worker = state.worker(&a.db_path)?;

    let objects = worker.objects().await?;
    let mut out_tables = Vec::with_capacity(objects.len());
    for o in objects {
        let cols = worker.columns(o.name.clone()).await?;
        out_tables.push(serde_json::json!({ "name": o.name, "kind": o.kind, "columns": cols }));
    }

    let structured = serde_json::json!({ "tables": out_tables });
    let text = serde_json::to_string_pretty(&structured).unwrap_or_else(|_| "<result>".into());
    Ok((text, structured))
}

async fn read_result_resource(result_id: &str, state: &ServerState) -> AppResult<(&'static str, String, Value)> {
    let payload = state.sink.fetch(result_id).await?;
    let mime = payload.metadata.output_type.mime_type();
    let structured = serde_json::to_value(&payload.metadata)?;
    Ok((mime, payload.artifact.unwrap_or_default(), structured))
}

/// First page of a table, ordered by its single-column primary key when it
/// has one. `?cursor=` continues from an earlier preview.
async fn read_sqlite_table_resource(uri: &str, state: &ServerState) -> AppResult<(&'static str, String, Value)> {
    let TableUri { db_path, table, cursor } = parse_sqlite_table_uri(uri)?;
    if !schema::is_safe_table_ref(&table) {
        return Err(AppError::InvalidRequest(format!(
            "invalid table name in resource uri: {table}"
        )));
    }
    let db_path = validate_db_path(&db_path, &state.args.allowed_dir)?;
    let worker = state.cm.ensure_worker(&db_path)?;

    let columns = worker.columns(table.clone()).await?;
    let mut pk = columns.iter().filter(|c| c.primary_key > 0);
    let cursor_field = match (pk.next(), pk.next()) {
        (Some(c), None) => Some(c.name.clone()),
        _ => None,
    };

    let request = PageRequest {
        cursor_field,
        cursor,
        ..PageRequest::new(format!("SELECT * FROM {table}"), state.limits.default_page_size)
    };
    let page = state.pager(worker).fetch_page(&request).await?;
    let structured = serde_json::to_value(&page)?;
    let text = serde_json::to_string_pretty(&structured).unwrap_or_else(|_| "<result>".into());
    Ok(("application/json", text, structured))
}

#[derive(Debug, PartialEq)]
struct TableUri {
    db_path: PathBuf,
    table: String,
    cursor: Option<String>,
}

// sqlite://{abs_path_to_db}/tables/{table_name}[?cursor={token}]
fn parse_sqlite_table_uri(uri: &str) -> AppResult<TableUri> {
    let uri = uri.strip_prefix(SQLITE_SCHEME).ok_or_else(|| {
        AppError::InvalidRequest("resource uri must start with sqlite:// or results://".into())
    })?;
    let (path, query) = match uri.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (uri, None),
    };
    let Some((db_path, table)) = path.rsplit_once("/tables/") else {
        return Err(AppError::InvalidRequest(
            "resource uri must be sqlite://{abs_path}/tables/{table}".into(),
        ));
    };
    if db_path.is_empty() || table.is_empty() {
        return Err(AppError::InvalidRequest("missing database path or table name".into()));
    }

    let mut cursor = None;
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some(("cursor", v)) if !v.is_empty() => cursor = Some(v.to_string()),
            _ => {
                return Err(AppError::InvalidRequest(format!(
                    "unsupported resource query parameter: {pair}"
                )))
            }
        }
    }

    Ok(TableUri {
        db_path: PathBuf::from(db_path),
        table: table.to_string(),
        cursor,
    })
}

fn validate_db_path(db_path: &Path, allowed_dirs: &[PathBuf]) -> AppResult<PathBuf> {
    let abs = if db_path.is_absolute() {
        db_path.to_path_buf()
    } else {
        std::env::current_dir()?.join(db_path)
    };

    let abs_norm = normalize_lexical(&abs);
    if allowed_dirs.is_empty() {
        return Ok(abs_norm);
    }

    for d in allowed_dirs {
        let d = normalize_lexical(d);
        if abs_norm.starts_with(&d) {
            return Ok(abs_norm);
        }
    }
    tracing::warn!(path = %abs_norm.display(), "database path outside allowed directories");
    Err(AppError::PathNotAllowed(abs_norm))
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize_lexical(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            // Never climbs above the root.
            Component::ParentDir => {
                out.pop();
            }
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(comp.as_os_str()),
            Component::Normal(c) => out.push(c),
        }
    }

    out
}

async fn write_line(w: &mut io::BufWriter<io::Stdout>, v: &Value) -> AppResult<()> {
    let bytes = serde_json::to_vec(v)?;
    w.write_all(&bytes).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}

fn jsonrpc_error(id: Value, code: i64, message: String, data: Option<Value>) -> Value {
    let mut err = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    });
    if let Some(d) = data {
        if let Some(obj) = err.get_mut("error").and_then(|v| v.as_object_mut()) {
            obj.insert("data".to_string(), d);
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::*;
    use crate::core::pager::tests::seed_orders;

    fn state(extra: &[&str]) -> ServerState {
        let argv = ["sqlite-pager"].iter().chain(extra.iter()).copied();
        ServerState::new(Args::parse_from(argv))
    }

    async fn call(state: &ServerState, tool: &str, arguments: Value) -> Value {
        let resp = dispatch(
            state,
            json!(1),
            "tools/call",
            json!({ "name": tool, "arguments": arguments }),
        )
        .await;
        resp["result"].clone()
    }

    #[test]
    fn test_parse_table_uri() {
        let parsed = parse_sqlite_table_uri("sqlite:///data/app.db/tables/orders").unwrap();
        assert_eq!(
            parsed,
            TableUri {
                db_path: PathBuf::from("/data/app.db"),
                table: "orders".into(),
                cursor: None,
            }
        );

        let parsed = parse_sqlite_table_uri("sqlite:///data/app.db/tables/main.orders?cursor=eyJmIjoiaWQifQ").unwrap();
        assert_eq!(parsed.table, "main.orders");
        assert_eq!(parsed.cursor.as_deref(), Some("eyJmIjoiaWQifQ"));

        for bad in [
            "file:///data/app.db/tables/orders",
            "sqlite:///data/app.db/orders",
            "sqlite:///data/app.db/tables/",
            "sqlite:///data/app.db/tables/orders?limit=5",
        ] {
            assert!(parse_sqlite_table_uri(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_validate_db_path() {
        let allowed = vec![PathBuf::from("/srv/data")];
        assert_eq!(
            validate_db_path(Path::new("/srv/data/./a.db"), &allowed).unwrap(),
            PathBuf::from("/srv/data/a.db")
        );
        let err = validate_db_path(Path::new("/srv/data/../etc/passwd"), &allowed).unwrap_err();
        assert!(matches!(err, AppError::PathNotAllowed(p) if p == Path::new("/srv/etc/passwd")));
        assert_eq!(
            validate_db_path(Path::new("/x/../../y.db"), &[]).unwrap(),
            PathBuf::from("/y.db")
        );
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let s = state(&[]);
        let resp = dispatch(&s, json!(7), "prompts/list", Value::Null).await;
        assert_eq!(resp["error"]["code"], json!(-32601));

        let result = call(&s, "write_query", json!({})).await;
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"].as_str().unwrap().starts_with("INVALID_REQUEST"));
    }

    #[tokio::test]
    async fn test_fetch_page_tool_walks_pages() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("orders.db");
        seed_orders(&db, &[10, 20, 30]);
        let s = state(&["--allowed-dir", dir.path().to_str().unwrap()]);
        let db = db.to_str().unwrap();

        let first = call(&s, "fetch_page", json!({ "db_path": db, "sql": "SELECT * FROM orders", "page_size": 2 })).await;
        let page = &first["structuredContent"];
        assert_eq!(page["rows"].as_array().unwrap().len(), 2);
        assert_eq!(page["has_more"], json!(true));
        assert_eq!(page["cursor_field"], json!("id"));

        let next = page["next_cursor"].clone();
        let second = call(
            &s,
            "fetch_page",
            json!({ "db_path": db, "sql": "SELECT * FROM orders", "page_size": 2, "cursor": next }),
        )
        .await;
        let page = &second["structuredContent"];
        assert_eq!(page["rows"][0]["id"], json!(3));
        assert_eq!(page["has_more"], json!(false));
        assert!(page.get("next_cursor").is_none());

        let rejected = call(&s, "fetch_page", json!({ "db_path": db, "sql": "DELETE FROM orders" })).await;
        assert!(rejected["content"][0]["text"].as_str().unwrap().starts_with("VALIDATION_ERROR"));

        let outside = call(&s, "fetch_page", json!({ "db_path": "/tmp/elsewhere.db", "sql": "SELECT 1" })).await;
        assert!(outside["content"][0]["text"].as_str().unwrap().starts_with("PATH_NOT_ALLOWED"));
    }

    #[tokio::test]
    async fn test_stream_result_becomes_resource() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("orders.db");
        seed_orders(&db, &[10, 20, 30, 40, 5]);
        let results = dir.path().join("results");
        let s = state(&["--results-dir", results.to_str().unwrap()]);

        let result = call(
            &s,
            "stream_aggregate",
            json!({
                "db_path": db.to_str().unwrap(),
                "sql": "SELECT id, amount FROM orders",
                "batch_size": 2,
                "aggregations": [{ "field": "amount", "operation": "sum" }],
                "output_type": "csv"
            }),
        )
        .await;
        let summary = &result["structuredContent"];
        assert_eq!(summary["total_rows"], json!(5));
        assert_eq!(summary["aggregations"][0]["value"], json!(105));
        let uri = summary["resource_uri"].as_str().unwrap().to_string();

        let listed = dispatch(&s, json!(2), "resources/list", Value::Null).await;
        assert_eq!(listed["result"]["resources"][0]["uri"], json!(uri));

        let read = dispatch(&s, json!(3), "resources/read", json!({ "uri": uri })).await;
        let contents = &read["result"]["contents"][0];
        assert_eq!(contents["mimeType"], json!("text/csv"));
        assert!(contents["text"].as_str().unwrap().starts_with("id,amount\n1,10\n"));

        let missing = dispatch(&s, json!(4), "resources/read", json!({ "uri": "results://nope" })).await;
        assert!(missing["error"]["message"].as_str().unwrap().starts_with("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_table_preview_resource() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("orders.db");
        seed_orders(&db, &[1, 2, 3]);
        let s = state(&["--default-page-size", "2"]);
        let uri = format!("sqlite://{}/tables/orders", db.display());

        let read = dispatch(&s, json!(1), "resources/read", json!({ "uri": uri })).await;
        let page = &read["result"]["structuredContent"];
        assert_eq!(page["rows"].as_array().unwrap().len(), 2);
        let next = page["next_cursor"].as_str().unwrap();

        let read = dispatch(&s, json!(2), "resources/read", json!({ "uri": format!("{uri}?cursor={next}") })).await;
        let page = &read["result"]["structuredContent"];
        assert_eq!(page["rows"][0]["id"], json!(3));
        assert_eq!(page["has_more"], json!(false));

        let qualified = format!("sqlite://{}/tables/main.orders", db.display());
        let read = dispatch(&s, json!(3), "resources/read", json!({ "uri": qualified })).await;
        let page = &read["result"]["structuredContent"];
        assert_eq!(page["cursor_field"], json!("id"));
        assert_eq!(page["rows"][0]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_get_schema_tool() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("orders.db");
        seed_orders(&db, &[1]);
        let s = state(&[]);

        let result = call(&s, "get_schema", json!({ "db_path": db.to_str().unwrap() })).await;
        let tables = &result["structuredContent"]["tables"];
        assert_eq!(tables[0]["name"], json!("orders"));
        assert_eq!(tables[0]["kind"], json!("table"));
        assert_eq!(tables[0]["columns"].as_array().unwrap().len(), 3);
    }
}
