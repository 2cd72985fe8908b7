use apiscout_scanner::{Exchange, ExchangeStore, SchemaNode};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointRecord {
    pub id: i64,
    pub url: String,
    pub method: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub call_count: i64,
    pub avg_response_size: f64,
    /// Schema of the first body seen for this endpoint.
    pub schema: Option<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub id: i64,
    pub endpoint_id: i64,
    pub timestamp: i64,
    pub status_code: u16,
    pub response_body: Value,
    pub response_size: i64,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub base_url: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub pages_crawled: i64,
    pub apis_found: i64,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_endpoints: i64,
    pub total_calls: i64,
    /// On-disk size of the main database file in bytes.
    pub database_size: u64,
    /// Endpoint count per HTTP method.
    pub methods: BTreeMap<String, i64>,
}

impl DatabaseStats {
    pub fn database_size_mb(&self) -> f64 {
        (self.database_size as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
    }
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

impl Database {
    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.init_schema()?;
        debug!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn, path: None };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS api_endpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    call_count INTEGER NOT NULL DEFAULT 0,
    avg_response_size REAL NOT NULL DEFAULT 0,
    schema_json TEXT,
    UNIQUE(url, method)
);

CREATE TABLE IF NOT EXISTS api_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    status_code INTEGER NOT NULL,
    response_body TEXT,
    response_headers TEXT,     -- JSON object
    request_headers TEXT,      -- JSON object
    response_size INTEGER,
    content_type TEXT,
    FOREIGN KEY(endpoint_id) REFERENCES api_endpoints(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    base_url TEXT NOT NULL,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    apis_found INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled'))
);

CREATE INDEX IF NOT EXISTS idx_api_endpoints_url ON api_endpoints(url);
CREATE INDEX IF NOT EXISTS idx_api_calls_endpoint ON api_calls(endpoint_id);
CREATE INDEX IF NOT EXISTS idx_api_calls_timestamp ON api_calls(timestamp);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, base_url: &str) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, base_url, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                &session_id,
                current_timestamp(),
                base_url,
                SessionStatus::Running.as_str()
            ],
        )?;

        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str, pages_crawled: usize, apis_found: usize) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed, pages_crawled, apis_found)
    }

    pub fn cancel_session(&self, session_id: &str, pages_crawled: usize, apis_found: usize) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Cancelled, pages_crawled, apis_found)
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![SessionStatus::Failed.as_str(), current_timestamp(), session_id],
        )?;
        Ok(())
    }

    fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        pages_crawled: usize,
        apis_found: usize,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions
             SET status = ?1, end_time = ?2, pages_crawled = ?3, apis_found = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                current_timestamp(),
                pages_crawled as i64,
                apis_found as i64,
                session_id
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, base_url, start_time, end_time, pages_crawled, apis_found, status
                 FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    let status: String = row.get(6)?;
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        base_url: row.get(1)?,
                        start_time: row.get(2)?,
                        end_time: row.get(3)?,
                        pages_crawled: row.get(4)?,
                        apis_found: row.get(5)?,
                        status: SessionStatus::parse(&status),
                    })
                },
            )
            .optional()
    }

    // Endpoint operations
    /// Find or create the `(url, method)` endpoint, then count one call of
    /// `size` bytes against it. The schema is only written on creation.
    pub fn upsert_endpoint(
        &self,
        url: &str,
        method: &str,
        size: usize,
        schema: &SchemaNode,
    ) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let now = current_timestamp();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM api_endpoints WHERE url = ?1 AND method = ?2",
                params![url, method],
                |row| row.get(0),
            )
            .optional()?;

        let endpoint_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO api_endpoints (url, method, first_seen, last_seen, call_count, avg_response_size, schema_json)
                     VALUES (?1, ?2, ?3, ?3, 0, 0, ?4)",
                    params![url, method, now, to_json(schema)?],
                )?;
                let id = tx.last_insert_rowid();
                info!("New endpoint: {} {}", method, url);
                id
            }
        };

        // SET expressions see the pre-update row.
        tx.execute(
            "UPDATE api_endpoints
             SET last_seen = ?1,
                 avg_response_size = (avg_response_size * call_count + ?2) / (call_count + 1),
                 call_count = call_count + 1
             WHERE id = ?3",
            params![now, size as f64, endpoint_id],
        )?;

        tx.commit()?;
        Ok(endpoint_id)
    }

    pub fn append_call(&self, endpoint_id: i64, exchange: &Exchange) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO api_calls (
                endpoint_id, timestamp, status_code, response_body,
                response_headers, request_headers, response_size, content_type
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                endpoint_id,
                exchange.timestamp.timestamp(),
                exchange.status_code,
                to_json(&exchange.body)?,
                to_json(&exchange.response_headers)?,
                to_json(&exchange.request_headers)?,
                exchange.size as i64,
                &exchange.content_type,
            ],
        )?;

        let call_id = self.conn.last_insert_rowid();
        debug!("API call saved (ID: {})", call_id);
        Ok(call_id)
    }

    // Query methods
    /// Every endpoint, most called first.
    pub fn get_all_endpoints(&self) -> Result<Vec<EndpointRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, method, first_seen, last_seen, call_count, avg_response_size, schema_json
             FROM api_endpoints
             ORDER BY call_count DESC, id ASC",
        )?;

        let endpoints = stmt
            .query_map([], |row| {
                let schema_json: Option<String> = row.get(7)?;
                Ok(EndpointRecord {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    method: row.get(2)?,
                    first_seen: row.get(3)?,
                    last_seen: row.get(4)?,
                    call_count: row.get(5)?,
                    avg_response_size: row.get(6)?,
                    schema: schema_json.and_then(|s| serde_json::from_str(&s).ok()),
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(endpoints)
    }

    pub fn get_calls_for_endpoint(&self, endpoint_id: i64) -> Result<Vec<CallRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, endpoint_id, timestamp, status_code, response_body, response_size, content_type
             FROM api_calls WHERE endpoint_id = ?1 ORDER BY id",
        )?;

        let calls = stmt
            .query_map(params![endpoint_id], |row| {
                let body: Option<String> = row.get(4)?;
                Ok(CallRecord {
                    id: row.get(0)?,
                    endpoint_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    status_code: row.get(3)?,
                    response_body: body
                        .and_then(|b| serde_json::from_str(&b).ok())
                        .unwrap_or(Value::Null),
                    response_size: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    content_type: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(calls)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let total_endpoints: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM api_endpoints", [], |row| row.get(0))?;
        let total_calls: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM api_calls", [], |row| row.get(0))?;

        let mut stmt = self
            .conn
            .prepare("SELECT method, COUNT(*) FROM api_endpoints GROUP BY method")?;
        let methods = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, i64>>>()?;

        // Pages not yet checkpointed still live in the -wal file.
        let database_size = self
            .path
            .as_deref()
            .map(|p| {
                let mut wal = p.as_os_str().to_owned();
                wal.push("-wal");
                file_size(p) + file_size(Path::new(&wal))
            })
            .unwrap_or(0);

        Ok(DatabaseStats {
            total_endpoints,
            total_calls,
            database_size,
            methods,
        })
    }

    /// Delete every endpoint, call and session and reset the id counters.
    pub fn clear_all_data(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "
            DELETE FROM api_calls;
            DELETE FROM api_endpoints;
            DELETE FROM crawl_sessions;
            DELETE FROM sqlite_sequence WHERE name IN ('api_calls', 'api_endpoints');
            ",
        )?;
        tx.commit()?;
        info!("All data cleared from database");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

impl ExchangeStore for Database {
    type Error = rusqlite::Error;

    fn upsert_endpoint(
        &self,
        url: &str,
        method: &str,
        size: usize,
        schema: &SchemaNode,
    ) -> Result<i64> {
        Database::upsert_endpoint(self, url, method, size, schema)
    }

    fn append_call(&self, endpoint_id: i64, exchange: &Exchange) -> Result<i64> {
        Database::append_call(self, endpoint_id, exchange)
    }
}
