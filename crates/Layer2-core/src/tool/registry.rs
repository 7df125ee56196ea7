//! Tool Registry - 도구 등록 및 조회
//!
//! 이름은 `[A-Za-z0-9_-]+` 로 정규화되어 저장된다.
//! 같은 이름을 다시 등록하면 핸들러가 교체된다 (중복 없음).

use sentinel_foundation::{Error, Result, ToolDefinition};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::handler::ToolHandler;

/// 정의 + 핸들러
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

/// 도구 이름 정규화
///
/// 허용되지 않는 문자 구간은 `_` 하나로 바뀌고, 앞뒤 구분자는 제거된다.
pub fn sanitize_tool_name(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() && !out.ends_with(['-', '_']) {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else if c == '-' || c == '_' {
            if pending_sep && !out.is_empty() && !out.ends_with(['-', '_']) {
                out.push('_');
            }
            pending_sep = false;
            if !out.is_empty() && !out.ends_with(['-', '_']) {
                out.push(c);
            }
        } else {
            pending_sep = true;
        }
    }

    let trimmed = out.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("invalid tool name: {:?}", name)));
    }
    Ok(trimmed.to_string())
}

/// 도구 레지스트리
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 등록 (upsert). 기존 항목을 교체했으면 true
    pub fn register(
        &mut self,
        mut definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<bool> {
        let name = sanitize_tool_name(&definition.name)?;
        definition.name = name.clone();
        Ok(self
            .tools
            .insert(name, RegisteredTool { definition, handler })
            .is_some())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredTool> {
        self.tools.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 이름순 정렬된 도구 이름
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 이름순 정렬된 정의 목록
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// 거부 목록을 뺀 복사본
    pub fn filtered(&self, deny: &HashSet<String>) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| !deny.contains(*name))
                .map(|(name, tool)| (name.clone(), tool.clone()))
                .collect(),
        }
    }
}
