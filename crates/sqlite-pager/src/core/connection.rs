use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;

use crate::{
    core::{
        port::ExecutionPort,
        query, schema,
        types::{ColumnMeta, Params, QueryOutput, SchemaObject},
    },
    error::{AppError, AppResult},
};

/// One worker thread per database file, created on first use.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<Mutex<HashMap<PathBuf, WorkerHandle>>>,
    busy_timeout_ms: u64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            busy_timeout_ms: 2_000,
        }
    }

    pub fn ensure_worker(&self, db_path: &Path) -> AppResult<WorkerHandle> {
        let db_path = absolute(db_path)?;
        let mut guard = self.inner.lock().map_err(|_| AppError::Internal("poisoned lock".into()))?;
        if let Some(h) = guard.get(&db_path) {
            return Ok(h.clone());
        }

        let h = WorkerHandle::spawn(db_path.clone(), self.busy_timeout_ms);
        guard.insert(db_path, h.clone());
        Ok(h)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: std::sync::mpsc::Sender<DbTask>,
    pub db_path: PathBuf,
}

impl WorkerHandle {
    fn spawn(db_path: PathBuf, busy_timeout_ms: u64) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<DbTask>();
        let path_for_thread = db_path.clone();
        thread::spawn(move || db_worker_main(path_for_thread, busy_timeout_ms, rx));
        Self { tx, db_path }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<AppResult<T>>) -> DbTask) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| AppError::Internal("db worker unavailable".into()))?;
        rx.await
            .map_err(|_| AppError::Internal("db worker dropped response".into()))?
    }

    /// Read-only query; the engine-level read-only check runs inside the worker.
    pub async fn read_query(&self, sql: String, params: Params) -> AppResult<QueryOutput> {
        self.request(|respond_to| DbTask::ReadQuery {
            sql,
            params,
            respond_to,
        })
        .await
    }

    pub async fn objects(&self) -> AppResult<Vec<SchemaObject>> {
        self.request(|respond_to| DbTask::Objects { respond_to }).await
    }

    pub async fn columns(&self, table: String) -> AppResult<Vec<ColumnMeta>> {
        self.request(|respond_to| DbTask::Columns { table, respond_to })
            .await
    }
}

#[async_trait]
impl ExecutionPort for WorkerHandle {
    async fn execute(&self, sql: &str, parameters: &Params) -> AppResult<QueryOutput> {
        self.read_query(sql.to_string(), parameters.clone()).await
    }
}

enum DbTask {
    ReadQuery {
        sql: String,
        params: Params,
        respond_to: oneshot::Sender<AppResult<QueryOutput>>,
    },
    Objects {
        respond_to: oneshot::Sender<AppResult<Vec<SchemaObject>>>,
    },
    Columns {
        table: String,
        respond_to: oneshot::Sender<AppResult<Vec<ColumnMeta>>>,
    },
}

fn db_worker_main(db_path: PathBuf, busy_timeout_ms: u64, rx: std::sync::mpsc::Receiver<DbTask>) {
    let conn = match open_conn(&db_path, busy_timeout_ms) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error=%e, path=%db_path.display(), "failed to open db in worker; dropping tasks");
            // Drain tasks and respond error.
            while let Ok(task) = rx.recv() {
                respond_err(task, e.clone());
            }
            return;
        }
    };

    while let Ok(task) = rx.recv() {
        match task {
            DbTask::ReadQuery {
                sql,
                params,
                respond_to,
            } => {
                let res = query::run_read_query(&conn, &sql, &params);
                if let Ok(out) = &res {
                    tracing::debug!(rows = out.rows.len(), elapsed_ms = out.elapsed_ms, "query finished");
                }
                let _ = respond_to.send(res);
            }
            DbTask::Objects { respond_to } => {
                let _ = respond_to.send(schema::list_objects(&conn));
            }
            DbTask::Columns { table, respond_to } => {
                let _ = respond_to.send(schema::list_columns(&conn, &table));
            }
        }
    }
}

fn respond_err(task: DbTask, err: AppError) {
    match task {
        DbTask::ReadQuery { respond_to, .. } => {
            let _ = respond_to.send(Err(err));
        }
        DbTask::Objects { respond_to } => {
            let _ = respond_to.send(Err(err));
        }
        DbTask::Columns { respond_to, .. } => {
            let _ = respond_to.send(Err(err));
        }
    }
}

/// Opens read-only; the database must already exist.
fn open_conn(path: &Path, busy_timeout_ms: u64) -> AppResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags).map_err(|source| AppError::DbOpenFailed {
        path: path.to_path_buf(),
        reason: source.to_string(),
    })?;
    let _ = conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms));
    Ok(conn)
}

fn absolute(path: &Path) -> AppResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}
