//! SQLite store for subagent runs
//!
//! 각 run 은 생성 시점(status=running)과 종료 시점에 한 번씩 upsert 된다.
//! 프로세스 재시작 후 여전히 `running` 인 행은 고아(orphan)로 보고
//! `failed: interrupted by process restart` 로 재분류한다.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info};

/// 재시작으로 중단된 run 의 에러 메시지
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by process restart";

/// Subagent run 상태
///
/// `running → {completed, failed, timeout}` 한 번만 전이한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// 실패 계열 (failed, timeout)
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Timeout)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "timeout" => Ok(RunStatus::Timeout),
            other => Err(Error::Storage(format!("unknown run status: {}", other))),
        }
    }
}

/// 영속화되는 run 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunRecord {
    pub id: String,
    pub label: String,
    pub task: String,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub model: Option<String>,
    pub parent_session_id: Option<String>,
    pub spawn_depth: u32,
    pub tokens_used: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Run 영속화 계약
pub trait RunStore: Send + Sync {
    /// id 기준 upsert
    fn upsert(&self, record: &RunRecord) -> Result<()>;

    /// 단건 조회
    fn get(&self, id: &str) -> Result<Option<RunRecord>>;

    /// 최근 N일 내 시작된, 종료된 run 목록 (최신순)
    fn recent(&self, days: u32) -> Result<Vec<RunRecord>>;

    /// 아직 running 상태인 run 목록
    fn running(&self) -> Result<Vec<RunRecord>>;

    /// N일보다 오래된 종료 run 삭제, 삭제 건수 반환
    fn prune(&self, older_than_days: u32) -> Result<usize>;

    /// 고아 run 을 failed 로 재분류하고 재분류된 레코드를 반환
    fn recover_orphans(&self) -> Result<Vec<RunRecord>> {
        let mut recovered = Vec::new();
        for mut record in self.running()? {
            record.status = RunStatus::Failed;
            record.error = Some(INTERRUPTED_BY_RESTART.to_string());
            record.completed_at = Some(Utc::now());
            self.upsert(&record)?;
            recovered.push(record);
        }
        Ok(recovered)
    }
}

/// SQLite 구현
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// 파일 DB 열기 (상위 디렉토리 생성)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;
        Self::with_connection(conn)
    }

    /// 기본 위치 (~/.local/share/sentinel/runs.db)
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| Error::Storage("Cannot find data directory".to_string()))?
            .join(crate::storage::APP_DIR);
        Self::open(dir.join("runs.db"))
    }

    /// In-memory DB (테스트용)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subagent_runs (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                task TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'timeout')),
                result TEXT,
                error TEXT,
                model TEXT,
                parent_session_id TEXT,
                spawn_depth INTEGER NOT NULL DEFAULT 1,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_subagent_runs_started
                ON subagent_runs(started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_subagent_runs_status
                ON subagent_runs(status);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        debug!("subagent run store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        let status: String = row.get(3)?;
        let started_at: String = row.get(10)?;
        let completed_at: Option<String> = row.get(11)?;
        let tokens: i64 = row.get(9)?;
        let depth: i64 = row.get(8)?;
        Ok(RunRecord {
            id: row.get(0)?,
            label: row.get(1)?,
            task: row.get(2)?,
            status: status.parse().unwrap_or(RunStatus::Failed),
            result: row.get(4)?,
            error: row.get(5)?,
            model: row.get(6)?,
            parent_session_id: row.get(7)?,
            spawn_depth: depth.max(0) as u32,
            tokens_used: tokens.max(0) as u64,
            started_at: parse_time(&started_at).unwrap_or_else(Utc::now),
            completed_at: completed_at.as_deref().and_then(parse_time),
        })
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params, Self::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query runs: {}", e)))?
            .filter_map(|row| match row {
                Ok(record) => Some(record),
                Err(e) => {
                    error!(error = %e, "skipping undecodable subagent run row");
                    None
                }
            })
            .collect();
        Ok(rows)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, label, task, status, result, error, model, \
     parent_session_id, spawn_depth, tokens_used, started_at, completed_at FROM subagent_runs";

impl RunStore for SqliteRunStore {
    fn upsert(&self, record: &RunRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO subagent_runs
                (id, label, task, status, result, error, model, parent_session_id,
                 spawn_depth, tokens_used, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                task = excluded.task,
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                model = excluded.model,
                parent_session_id = excluded.parent_session_id,
                spawn_depth = excluded.spawn_depth,
                tokens_used = excluded.tokens_used,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
            params![
                record.id,
                record.label,
                record.task,
                record.status.as_str(),
                record.result,
                record.error,
                record.model,
                record.parent_session_id,
                record.spawn_depth as i64,
                record.tokens_used as i64,
                record.started_at.to_rfc3339(),
                record.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert run {}: {}", record.id, e)))?;

        debug!(run_id = %record.id, status = %record.status, "run persisted");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            Self::from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get run {}: {}", id, e)))
    }

    fn recent(&self, days: u32) -> Result<Vec<RunRecord>> {
        let since = (Utc::now() - Duration::days(days as i64)).to_rfc3339();
        self.query(
            &format!(
                "{} WHERE status != 'running' AND started_at >= ?1 ORDER BY started_at DESC",
                SELECT_COLUMNS
            ),
            &[&since],
        )
    }

    fn running(&self) -> Result<Vec<RunRecord>> {
        self.query(
            &format!("{} WHERE status = 'running' ORDER BY started_at", SELECT_COLUMNS),
            &[],
        )
    }

    fn prune(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(older_than_days as i64)).to_rfc3339();
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM subagent_runs WHERE status != 'running' AND started_at < ?1",
                params![cutoff],
            )
            .map_err(|e| Error::Storage(format!("Failed to prune runs: {}", e)))?;
        if removed > 0 {
            info!(removed, "pruned old subagent runs");
        }
        Ok(removed)
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
