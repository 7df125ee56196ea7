//! Audit Log Types - 감사 로그 타입 정의
//!
//! Guard 판정과 도구 실행 결과를 같은 엔트리 형태로 기록한다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AccessLevel, CallerIdentity};
use crate::strings::{sanitize_json, truncate_with_ellipsis, AUDIT_VALUE_MAX_CHARS};

// ============================================================================
// Audit Entry ID
// ============================================================================

/// 감사 로그 엔트리 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Audit Kind
// ============================================================================

/// 엔트리 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Guard 판정
    Check,
    /// 핸들러 실행 결과
    Execution,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Check => "check",
            AuditKind::Execution => "execution",
        }
    }
}

// ============================================================================
// Audit Entry
// ============================================================================

/// 감사 로그 엔트리
///
/// `args`, `result` 는 생성 시점에 정리된다 (200자 초과 값 잘림).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub tool: String,
    pub caller: String,
    pub access_level: AccessLevel,
    /// check: 허용 여부, execution: 성공 여부
    pub allowed: bool,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl AuditEntry {
    /// Guard 판정 엔트리
    pub fn check(tool: &str, caller: &CallerIdentity, allowed: bool, args: &Value) -> Self {
        Self {
            id: AuditId::new(),
            timestamp: Utc::now(),
            kind: AuditKind::Check,
            tool: tool.to_string(),
            caller: caller.caller_jid.clone(),
            access_level: caller.level,
            allowed,
            args: sanitize_json(args, AUDIT_VALUE_MAX_CHARS),
            result: None,
        }
    }

    /// 실행 결과 엔트리
    pub fn execution(
        tool: &str,
        caller: &CallerIdentity,
        success: bool,
        args: &Value,
        result: &str,
    ) -> Self {
        Self {
            kind: AuditKind::Execution,
            result: Some(truncate_with_ellipsis(result, AUDIT_VALUE_MAX_CHARS)),
            ..Self::check(tool, caller, success, args)
        }
    }

    /// 로그 라인 태그 (거부 / 허용 / 성공 / 실패)
    pub fn tag(&self) -> &'static str {
        match (self.kind, self.allowed) {
            (AuditKind::Check, true) => "ALLOWED",
            (AuditKind::Check, false) => "DENIED",
            (AuditKind::Execution, true) => "OK",
            (AuditKind::Execution, false) => "FAILED",
        }
    }

    /// 라인 기반 포맷
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} [{}] tool={} caller={} level={} args={}",
            self.timestamp.to_rfc3339(),
            self.tag(),
            self.tool,
            self.caller,
            self.access_level,
            self.args
        );
        if let Some(result) = &self.result {
            line.push_str(" result=");
            line.push_str(&result.replace('\n', "\\n"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_sanitized() {
        let caller = CallerIdentity::new("s", "bob", AccessLevel::User);
        let entry = AuditEntry::check("bash", &caller, false, &json!({"command": "x".repeat(500)}));
        let cmd = entry.args["command"].as_str().unwrap();
        assert_eq!(cmd.chars().count(), 203);
        assert_eq!(entry.tag(), "DENIED");
    }

    #[test]
    fn test_execution_line() {
        let caller = CallerIdentity::new("s", "bob", AccessLevel::Admin);
        let entry = AuditEntry::execution("read_file", &caller, true, &json!({}), "line1\nline2");
        let line = entry.to_line();
        assert!(line.contains("[OK]"));
        assert!(line.contains("tool=read_file"));
        assert!(line.contains("level=admin"));
        assert!(line.contains("result=line1\\nline2"));
    }
}
