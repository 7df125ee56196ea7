//! Storage module for Sentinel
//!
//! - `runs`: SQLite - subagent 실행 기록 (크래시 복구용)
//! - `json`: JSON/TOML - 설정 파일 저장/로드

mod json;
mod runs;

// SQLite Storage (subagent run 기록)
pub use runs::{RunRecord, RunStatus, RunStore, SqliteRunStore, INTERRUPTED_BY_RESTART};

// File Storage (설정)
pub use json::{read_file, JsonStore, APP_DIR};
