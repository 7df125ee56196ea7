//! Error types for Sentinel
//!
//! 모든 에러를 중앙에서 관리
//!
//! 정책 거부(AccessDenied)와 핸들러 실패는 모두 이 타입으로 표현되고,
//! Executor 경계에서 `{"status":"error","tool":..,"error":..}` JSON으로 변환된다.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// 접근 거부 사유 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// 권한 레벨 부족
    Permission,
    /// 위험한 셸 명령
    CommandSafety,
    /// 보호된 경로
    Path,
    /// SSH 허용 목록 밖의 호스트
    Host,
    /// 파괴적 도구 속도 제한 / 쿨다운
    RateLimit,
    /// 활성 프로필에 의한 차단
    Profile,
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenialKind::Permission => "permission",
            DenialKind::CommandSafety => "command_safety",
            DenialKind::Path => "path",
            DenialKind::Host => "host",
            DenialKind::RateLimit => "rate_limit",
            DenialKind::Profile => "profile",
        };
        f.write_str(s)
    }
}

/// Sentinel 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    // ========================================================================
    // 도구 디스패치
    // ========================================================================
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    ArgumentParse(String),

    #[error("access denied: {reason}")]
    AccessDenied { kind: DenialKind, reason: String },

    #[error("blocked by hook: {0}")]
    HookBlocked(String),

    #[error("{tool} failed: {message}")]
    Handler { tool: String, message: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 확인(Confirmation) 흐름
    // ========================================================================
    #[error("confirmation denied for {0}")]
    ConfirmationDenied(String),

    #[error("confirmation timed out for {0}")]
    ConfirmationTimeout(String),

    #[error("{0} requires confirmation but no approval handler is configured")]
    NoApprovalHandler(String),

    // ========================================================================
    // Subagent 관련
    // ========================================================================
    #[error("spawn depth {depth} exceeds maximum {max}")]
    SpawnDepthExceeded { depth: u32, max: u32 },

    #[error("subagent concurrency limit reached ({max} running)")]
    ConcurrencyLimitExceeded { max: usize },

    #[error("child limit reached ({max} per parent)")]
    ChildLimitExceeded { max: usize },

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 접근 거부 에러 생성 헬퍼
    pub fn denied(kind: DenialKind, reason: impl Into<String>) -> Self {
        Error::AccessDenied {
            kind,
            reason: reason.into(),
        }
    }

    /// 핸들러 실패 에러 생성 헬퍼
    pub fn handler(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Handler {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// 정책 단계에서 발생한 거부인지 (핸들러에 도달하지 않음)
    pub fn is_policy_denial(&self) -> bool {
        matches!(
            self,
            Error::AccessDenied { .. }
                | Error::HookBlocked(_)
                | Error::NoApprovalHandler(_)
                | Error::ConfirmationDenied(_)
        )
    }

    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::ConcurrencyLimitExceeded { .. }
                | Error::AccessDenied {
                    kind: DenialKind::RateLimit,
                    ..
                }
        )
    }

    /// 거부 분류 (AccessDenied 일 때만)
    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            Error::AccessDenied { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
