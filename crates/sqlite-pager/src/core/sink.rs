//! Destinations for streamed results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::core::aggregate::AggregationResult;
use crate::core::types::{OutputType, Termination};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub output_type: OutputType,
    pub sql: String,
    pub cursor_field: String,
    pub total_rows: usize,
    pub batch_count: usize,
    pub elapsed_ms: u64,
    pub aggregations: Vec<AggregationResult>,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct ResultPayload {
    pub metadata: ResultMetadata,
    /// Full artifact body. `None` on store keeps whatever was appended.
    pub artifact: Option<String>,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Appends to the artifact body of `id`.
    async fn append(&self, id: &str, output_type: OutputType, chunk: &str) -> AppResult<()>;

    async fn store(&self, id: &str, payload: &ResultPayload) -> AppResult<()>;

    /// Fails with [`AppError::NotFound`] for unknown ids.
    async fn fetch(&self, id: &str) -> AppResult<ResultPayload>;

    /// Most recent first.
    async fn list(&self, limit: usize) -> AppResult<Vec<ResultMetadata>>;
}

fn check_id(id: &str) -> AppResult<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::InvalidRequest(format!("invalid result id: {id}")));
    }
    Ok(())
}

/// `<dir>/<id>.<json|csv>` for the artifact, `<dir>/<id>.meta.json` for metadata.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn artifact_path(&self, id: &str, output_type: OutputType) -> PathBuf {
        self.dir.join(format!("{id}.{}", output_type.extension()))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.meta.json"))
    }

    async fn ensure_dir(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| sink_err(&self.dir, e))
    }
}

fn sink_err(path: &Path, e: std::io::Error) -> AppError {
    AppError::Sink(format!("{}: {e}", path.display()))
}

#[async_trait]
impl ResultSink for FileSink {
    async fn append(&self, id: &str, output_type: OutputType, chunk: &str) -> AppResult<()> {
        check_id(id)?;
        self.ensure_dir().await?;
        let path = self.artifact_path(id, output_type);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| sink_err(&path, e))?;
        file.write_all(chunk.as_bytes()).await.map_err(|e| sink_err(&path, e))?;
        file.flush().await.map_err(|e| sink_err(&path, e))
    }

    async fn store(&self, id: &str, payload: &ResultPayload) -> AppResult<()> {
        check_id(id)?;
        self.ensure_dir().await?;
        if let Some(body) = &payload.artifact {
            let path = self.artifact_path(id, payload.metadata.output_type);
            tokio::fs::write(&path, body).await.map_err(|e| sink_err(&path, e))?;
        }
        let path = self.meta_path(id);
        let meta = serde_json::to_vec_pretty(&payload.metadata)?;
        tokio::fs::write(&path, meta).await.map_err(|e| sink_err(&path, e))
    }

    async fn fetch(&self, id: &str) -> AppResult<ResultPayload> {
        check_id(id)?;
        let path = self.meta_path(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(id.to_string()))
            }
            Err(e) => return Err(sink_err(&path, e)),
        };
        let metadata: ResultMetadata = serde_json::from_slice(&raw)?;
        let path = self.artifact_path(id, metadata.output_type);
        let artifact = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(sink_err(&path, e)),
        };
        Ok(ResultPayload {
            metadata,
            artifact: Some(artifact),
        })
    }

    async fn list(&self, limit: usize) -> AppResult<Vec<ResultMetadata>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(sink_err(&self.dir, e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| sink_err(&self.dir, e))? {
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".meta.json") {
                continue;
            }
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(|e| sink_err(&path, e))
                .and_then(|raw| serde_json::from_slice::<ResultMetadata>(&raw).map_err(AppError::from));
            match parsed {
                Ok(meta) => out.push(meta),
                Err(e) => tracing::warn!(error = %e, path = %path.display(), "skipping unreadable result metadata"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct MemoryEntry {
    metadata: Option<ResultMetadata>,
    artifact: String,
}

/// Keeps results for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, MemoryEntry>) -> T) -> AppResult<T> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("poisoned lock".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&self, id: &str, _output_type: OutputType, chunk: &str) -> AppResult<()> {
        check_id(id)?;
        self.with_entries(|m| m.entry(id.to_string()).or_default().artifact.push_str(chunk))
    }

    async fn store(&self, id: &str, payload: &ResultPayload) -> AppResult<()> {
        check_id(id)?;
        self.with_entries(|m| {
            let entry = m.entry(id.to_string()).or_default();
            entry.metadata = Some(payload.metadata.clone());
            if let Some(body) = &payload.artifact {
                entry.artifact = body.clone();
            }
        })
    }

    async fn fetch(&self, id: &str) -> AppResult<ResultPayload> {
        check_id(id)?;
        self.with_entries(|m| {
            m.get(id).and_then(|e| {
                Some(ResultPayload {
                    metadata: e.metadata.clone()?,
                    artifact: Some(e.artifact.clone()),
                })
            })
        })?
        .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn list(&self, limit: usize) -> AppResult<Vec<ResultMetadata>> {
        let mut out: Vec<ResultMetadata> =
            self.with_entries(|m| m.values().filter_map(|e| e.metadata.clone()).collect())?;
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metadata(id: &str, output_type: OutputType, created_at: DateTime<Utc>) -> ResultMetadata {
        ResultMetadata {
            id: id.to_string(),
            created_at,
            output_type,
            sql: "SELECT 1".into(),
            cursor_field: "id".into(),
            total_rows: 1,
            batch_count: 1,
            elapsed_ms: 3,
            aggregations: Vec::new(),
            termination: Termination::Exhausted,
        }
    }

    async fn exercise(sink: &dyn ResultSink) {
        let now = Utc::now();
        sink.append("run-1", OutputType::Csv, "id\n").await.unwrap();
        sink.append("run-1", OutputType::Csv, "1\n").await.unwrap();
        sink.store(
            "run-1",
            &ResultPayload {
                metadata: metadata("run-1", OutputType::Csv, now - Duration::seconds(10)),
                artifact: None,
            },
        )
        .await
        .unwrap();
        sink.store(
            "run-2",
            &ResultPayload {
                metadata: metadata("run-2", OutputType::Json, now),
                artifact: Some("{\"rows\":[]}".into()),
            },
        )
        .await
        .unwrap();

        let fetched = sink.fetch("run-1").await.unwrap();
        assert_eq!(fetched.artifact.as_deref(), Some("id\n1\n"));
        assert_eq!(fetched.metadata.output_type, OutputType::Csv);

        let recent: Vec<String> = sink.list(10).await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(recent, vec!["run-2", "run-1"]);
        assert_eq!(sink.list(1).await.unwrap().len(), 1);

        assert!(matches!(sink.fetch("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(sink.fetch("../etc/passwd").await, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_memory_sink() {
        exercise(&MemorySink::new()).await;
    }

    #[tokio::test]
    async fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("results"));
        assert!(sink.list(5).await.unwrap().is_empty());
        exercise(&sink).await;
        assert!(dir.path().join("results/run-1.csv").exists());
        assert!(dir.path().join("results/run-2.meta.json").exists());
    }
}
