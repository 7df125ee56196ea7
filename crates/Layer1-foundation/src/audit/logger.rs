//! SQLite Audit Sink - 구조화된 감사 로그 저장 및 조회

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use tracing::{debug, error};

use super::sink::AuditSink;
use super::types::{AuditEntry, AuditId, AuditKind};
use crate::{Error, Result};

// ============================================================================
// SqliteAuditSink
// ============================================================================

/// 감사 로거 설정
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    /// 데이터베이스 경로
    pub db_path: PathBuf,

    /// 최대 보관 기간 (일)
    pub retention_days: u32,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        let db_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::storage::APP_DIR)
            .join("audit.db");

        Self {
            db_path,
            retention_days: 90,
        }
    }
}

/// 구조화된 감사 싱크
///
/// ## 사용법
///
/// ```ignore
/// use sentinel_foundation::audit::{AuditSink, SqliteAuditSink, AuditLoggerConfig};
///
/// let sink = SqliteAuditSink::new(AuditLoggerConfig::default())?;
/// guard.set_audit_sink(Arc::new(sink));
///
/// // 최근 20건 조회
/// let rows = sink.query_recent(20)?;
/// ```
pub struct SqliteAuditSink {
    db: Mutex<Connection>,
    config: AuditLoggerConfig,
}

impl SqliteAuditSink {
    pub fn new(config: AuditLoggerConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.db_path)
            .map_err(|e| Error::Storage(format!("Failed to open audit database: {}", e)))?;
        Self::init(conn, config)
    }

    /// 테스트용 in-memory 싱크
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::init(conn, AuditLoggerConfig::default())
    }

    fn init(conn: Connection, config: AuditLoggerConfig) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_audit (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                tool TEXT NOT NULL,
                caller TEXT NOT NULL,
                access_level TEXT NOT NULL,
                allowed INTEGER NOT NULL,
                args TEXT NOT NULL,
                result TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tool_audit_timestamp ON tool_audit(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_tool_audit_tool ON tool_audit(tool);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize audit schema: {}", e)))?;

        Ok(Self {
            db: Mutex::new(conn),
            config,
        })
    }

    fn insert(&self, entry: &AuditEntry) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            r#"
            INSERT INTO tool_audit (id, timestamp, kind, tool, caller, access_level, allowed, args, result)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.id.0,
                entry.timestamp.to_rfc3339(),
                entry.kind.as_str(),
                entry.tool,
                entry.caller,
                entry.access_level.as_str(),
                entry.allowed as i32,
                entry.args.to_string(),
                entry.result,
            ],
        )?;
        debug!(audit_id = %entry.id, tool = %entry.tool, allowed = entry.allowed, "audit entry stored");
        Ok(())
    }

    /// 최근 엔트리 조회 (최신순)
    pub fn query_recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, timestamp, kind, tool, caller, access_level, allowed, args, result \
             FROM tool_audit ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let timestamp: String = row.get(1)?;
                let kind: String = row.get(2)?;
                let level: String = row.get(5)?;
                let allowed: i32 = row.get(6)?;
                let args: String = row.get(7)?;
                Ok(AuditEntry {
                    id: AuditId(row.get(0)?),
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    kind: if kind == "execution" {
                        AuditKind::Execution
                    } else {
                        AuditKind::Check
                    },
                    tool: row.get(3)?,
                    caller: row.get(4)?,
                    access_level: level.parse().unwrap_or_default(),
                    allowed: allowed != 0,
                    args: serde_json::from_str(&args).unwrap_or(serde_json::Value::Null),
                    result: row.get(8)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// 보관 기간이 지난 엔트리 삭제
    pub fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
        let db = self.db.lock();
        let removed = db.execute(
            "DELETE FROM tool_audit WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.insert(entry) {
            error!(tool = %entry.tool, error = %e, "failed to store audit entry");
        }
    }
}
