//! 핵심 데이터 타입
//!
//! - 접근 레벨 / 도구 권한
//! - ToolDefinition, ToolCall, ToolResult
//! - ToolCheckResult (Guard 판정 결과)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

// ============================================================================
// AccessLevel
// ============================================================================

/// 호출자 접근 레벨
///
/// `owner > admin > user > none` 순서로 정렬된다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    User,
    Admin,
    Owner,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::User => "user",
            AccessLevel::Admin => "admin",
            AccessLevel::Owner => "owner",
        }
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::User
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(AccessLevel::Owner),
            "admin" => Ok(AccessLevel::Admin),
            "user" => Ok(AccessLevel::User),
            "none" | "" => Ok(AccessLevel::None),
            other => Err(Error::InvalidInput(format!("unknown access level: {}", other))),
        }
    }
}

// ============================================================================
// ToolPermission
// ============================================================================

/// 도구별 요구 권한
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    Owner,
    Admin,
    User,
    Public,
}

impl ToolPermission {
    /// 이 권한을 통과하기 위한 최소 접근 레벨
    pub fn required_level(&self) -> AccessLevel {
        match self {
            ToolPermission::Owner => AccessLevel::Owner,
            ToolPermission::Admin => AccessLevel::Admin,
            ToolPermission::User => AccessLevel::User,
            ToolPermission::Public => AccessLevel::None,
        }
    }

    pub fn allows(&self, level: AccessLevel) -> bool {
        level >= self.required_level()
    }
}

impl Default for ToolPermission {
    fn default() -> Self {
        ToolPermission::User
    }
}

// ============================================================================
// CallerIdentity
// ============================================================================

/// 요청 단위 호출자 정보
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// 세션 ID
    pub session_id: String,
    /// 요청자 주소 (채널별 사용자 식별자)
    pub caller_jid: String,
    /// 접근 레벨
    pub level: AccessLevel,
}

impl CallerIdentity {
    pub fn new(
        session_id: impl Into<String>,
        caller_jid: impl Into<String>,
        level: AccessLevel,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            caller_jid: caller_jid.into(),
            level,
        }
    }

    /// 시스템 내부 호출 (요청 스코프 밖)
    pub fn system() -> Self {
        Self::new("system", "system", AccessLevel::Owner)
    }
}

// ============================================================================
// ToolDefinition / ToolCall
// ============================================================================

/// 도구 정의 (LLM에 노출되는 스키마)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema 형태의 파라미터 정의
    pub parameters: Value,
    /// 공유 외부 상태를 변경하는 도구 (배치 순차 실행 대상)
    #[serde(default)]
    pub order_sensitive: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            order_sensitive: false,
        }
    }

    pub fn order_sensitive(mut self) -> Self {
        self.order_sensitive = true;
        self
    }
}

/// LLM이 요청한 도구 호출
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// 원시 인자 페이로드 (JSON 문자열)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// JSON 값으로부터 생성
    pub fn with_json(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self::new(id, name, arguments.to_string())
    }
}

// ============================================================================
// ToolResult
// ============================================================================

/// 도구 실행 결과
///
/// `content`는 항상 채워지며, `for_llm`/`for_user`가 없으면 `content`로 대체된다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_llm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub for_user: Option<String>,
    /// 사용자에게 표시하지 않음
    #[serde(default)]
    pub silent: bool,
    /// 결과가 나중에 알림 채널로 전달됨
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// 기술용/사용자용 내용을 분리한 결과
    pub fn dual(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        let for_llm = for_llm.into();
        Self {
            content: for_llm.clone(),
            for_llm: Some(for_llm),
            for_user: Some(for_user.into()),
            ..Default::default()
        }
    }

    /// 정규화된 에러 결과 `{status:"error", tool, error}`
    pub fn error(tool: impl Into<String>, message: impl AsRef<str>) -> Self {
        let tool = tool.into();
        let content = serde_json::json!({
            "status": "error",
            "tool": tool,
            "error": message.as_ref(),
        })
        .to_string();
        Self {
            tool,
            content,
            is_error: true,
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn llm_content(&self) -> &str {
        self.for_llm.as_deref().unwrap_or(&self.content)
    }

    pub fn user_content(&self) -> &str {
        self.for_user.as_deref().unwrap_or(&self.content)
    }
}

// ============================================================================
// ToolCheckResult
// ============================================================================

/// Guard 판정 결과
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requires_confirmation: bool,
    /// 비차단 경고 (배치 임계치 도달 등)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ToolCheckResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}
