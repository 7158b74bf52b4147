//! Result sinks: durable storage for final selections.
//!
//! Every sink upserts by `url` (plus tenant when one is given). A backing
//! store that cannot enforce that key degrades to plain inserts, which is
//! always logged since duplicates become possible.

use crate::config::{SinkConfig, SinkKind};
use crate::error::{ConfigError, SinkError};
use crate::paper::CandidatePaper;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Attempts allowed for dropping unknown columns from a PostgREST write.
const MAX_COLUMN_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Upsert,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReport {
    pub written: usize,
    pub mode: WriteMode,
    /// Fields the store rejected and that were dropped from the write.
    pub omitted_columns: Vec<String>,
}

impl SinkReport {
    fn upserted(written: usize) -> Self {
        Self {
            written,
            mode: WriteMode::Upsert,
            omitted_columns: Vec::new(),
        }
    }
}

/// Stores candidate records keyed by url (+ optional tenant).
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(
        &self,
        tenant: Option<&str>,
        papers: &[CandidatePaper],
    ) -> Result<SinkReport, SinkError>;
}

/// In-memory sink.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<(Option<String>, String), CandidatePaper>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, tenant: Option<&str>, url: &str) -> Option<CandidatePaper> {
        self.lock()
            .get(&(tenant.map(str::to_string), url.to_string()))
            .cloned()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(Option<String>, String), CandidatePaper>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(
        &self,
        tenant: Option<&str>,
        papers: &[CandidatePaper],
    ) -> Result<SinkReport, SinkError> {
        let mut rows = self.lock();
        for paper in papers {
            let mut paper = paper.clone();
            paper.sanitize_for_storage();
            rows.insert((tenant.map(str::to_string), paper.url.clone()), paper);
        }
        Ok(SinkReport::upserted(papers.len()))
    }
}

/// Serialize a paper into a storage row.
fn storage_row(
    paper: &CandidatePaper,
    tenant: Option<(&str, &str)>,
) -> Result<Map<String, Value>, SinkError> {
    let mut paper = paper.clone();
    paper.sanitize_for_storage();
    let mut row = match serde_json::to_value(&paper)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    // Origin is run metadata, not a stored column.
    row.remove("source");
    if let Some((column, id)) = tenant {
        row.insert(column.to_string(), Value::String(id.to_string()));
    }
    Ok(row)
}

/// A JSON-array file upserted by url, written atomically.
pub struct JsonFileSink {
    path: PathBuf,
    tenant_column: String,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tenant_column: "user_id".to_string(),
        }
    }

    pub fn with_tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_existing(&self) -> Result<Vec<Map<String, Value>>, SinkError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => {
                let rows: Vec<Value> = serde_json::from_slice(&bytes)?;
                Ok(rows
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn row_key(&self, row: &Map<String, Value>) -> (Option<String>, String) {
        let tenant = row
            .get(&self.tenant_column)
            .and_then(Value::as_str)
            .map(str::to_string);
        let url = row
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        (tenant, url)
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn store(
        &self,
        tenant: Option<&str>,
        papers: &[CandidatePaper],
    ) -> Result<SinkReport, SinkError> {
        let mut rows = self.read_existing().await?;
        let mut index: HashMap<(Option<String>, String), usize> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (self.row_key(row), i))
            .collect();

        let tenant = tenant.map(|id| (self.tenant_column.as_str(), id));
        for paper in papers {
            let row = storage_row(paper, tenant)?;
            let key = self.row_key(&row);
            match index.get(&key) {
                Some(&i) => rows[i] = row,
                None => {
                    index.insert(key, rows.len());
                    rows.push(row);
                }
            }
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&rows)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            path = %self.path.display(),
            written = papers.len(),
            total = rows.len(),
            "Stored papers to JSON file"
        );
        Ok(SinkReport::upserted(papers.len()))
    }
}

/// PostgREST (e.g. Supabase) table sink.
pub struct PostgrestSink {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
    tenant_column: String,
}

impl PostgrestSink {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: "papers".to_string(),
            tenant_column: "user_id".to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    async fn post(
        &self,
        rows: &[Map<String, Value>],
        mode: WriteMode,
        on_conflict: &str,
    ) -> Result<(u16, String), SinkError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(rows);
        request = match mode {
            WriteMode::Upsert => request
                .query(&[("on_conflict", on_conflict)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal"),
            WriteMode::Insert => request.header("Prefer", "return=minimal"),
        };
        let response = request.send().await.map_err(|e| SinkError::Request {
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

/// The PostgREST error code and message of a failed write, if any.
fn postgrest_error(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => (
            v["code"].as_str().map(str::to_string),
            v["message"].as_str().unwrap_or(body).to_string(),
        ),
        Err(_) => (None, body.to_string()),
    }
}

/// Column name from `Could not find the 'x' column of 'papers' in the schema cache`.
fn missing_column(message: &str) -> Option<String> {
    let rest = message.split("Could not find the '").nth(1)?;
    let end = rest.find("' column")?;
    Some(rest[..end].to_string())
}

#[async_trait]
impl ResultSink for PostgrestSink {
    async fn store(
        &self,
        tenant: Option<&str>,
        papers: &[CandidatePaper],
    ) -> Result<SinkReport, SinkError> {
        if papers.is_empty() {
            return Ok(SinkReport::upserted(0));
        }
        let tenant_pair = tenant.map(|id| (self.tenant_column.as_str(), id));
        let mut rows = papers
            .iter()
            .map(|p| storage_row(p, tenant_pair))
            .collect::<Result<Vec<_>, _>>()?;

        let on_conflict = match tenant {
            Some(_) => format!("url,{}", self.tenant_column),
            None => "url".to_string(),
        };
        let mut mode = WriteMode::Upsert;
        let mut omitted: Vec<String> = Vec::new();

        loop {
            let (status, body) = self.post(&rows, mode, &on_conflict).await?;
            if (200..300).contains(&status) {
                info!(
                    table = self.table.as_str(),
                    written = rows.len(),
                    ?mode,
                    "Stored papers via PostgREST"
                );
                return Ok(SinkReport {
                    written: rows.len(),
                    mode,
                    omitted_columns: omitted,
                });
            }

            let (code, message) = postgrest_error(&body);
            match code.as_deref() {
                Some("42P10") if mode == WriteMode::Upsert => {
                    warn!(
                        table = self.table.as_str(),
                        on_conflict = on_conflict.as_str(),
                        "No unique constraint for upsert key, falling back to insert; duplicates are possible"
                    );
                    mode = WriteMode::Insert;
                }
                Some("PGRST204") => {
                    let Some(column) = missing_column(&message) else {
                        return Err(SinkError::Status { status, body });
                    };
                    if omitted.len() >= MAX_COLUMN_RETRIES || omitted.contains(&column) {
                        return Err(SinkError::UnknownColumn { column });
                    }
                    warn!(
                        table = self.table.as_str(),
                        column = column.as_str(),
                        "Table lacks column, retrying without it"
                    );
                    for row in &mut rows {
                        row.remove(&column);
                    }
                    omitted.push(column);
                }
                _ => {
                    debug!(status, body = body.as_str(), "PostgREST write failed");
                    return Err(SinkError::Status { status, body });
                }
            }
        }
    }
}

/// Build the configured sink. `SinkKind::None` yields `None`.
pub fn build_sink(config: &SinkConfig) -> Result<Option<Arc<dyn ResultSink>>, ConfigError> {
    match config.kind {
        SinkKind::None => Ok(None),
        SinkKind::Json => {
            let path = config.path.clone().ok_or_else(|| ConfigError::MissingField {
                field: "sink.path".to_string(),
            })?;
            Ok(Some(Arc::new(
                JsonFileSink::new(path).with_tenant_column(config.tenant_column.clone()),
            )))
        }
        SinkKind::Postgrest => {
            let url = config.url.clone().ok_or_else(|| ConfigError::MissingField {
                field: "sink.url".to_string(),
            })?;
            let key = std::env::var(&config.key_env).map_err(|_| ConfigError::EnvVarMissing {
                var: config.key_env.clone(),
            })?;
            Ok(Some(Arc::new(
                PostgrestSink::new(url, key)
                    .with_table(config.table.clone())
                    .with_tenant_column(config.tenant_column.clone()),
            )))
        }
    }
}
