//! Tool Loop Detector - 반복 호출 감지
//!
//! 최근 호출 (도구, 인자 해시) 링 버퍼와 최근 에러 메시지 링을 유지하며
//! 네 가지 패턴을 감지한다:
//!
//! - `repeat`: 같은 (도구, 인자) 연속 호출
//! - `ping_pong`: A, B, A, B ... 교대 호출
//! - `strategy_loop`: 도구는 바뀌지만 같은 에러가 반복됨
//! - `destructive_batch`: 같은 파괴적 도구 연속 호출 (즉시 Breaker)
//!
//! 감지 결과는 권고일 뿐 호출을 막지 않는다. 호출자가 Breaker 에서 멈춰야 한다.

use sentinel_foundation::hash::hash_tool_call;
use sentinel_foundation::strings::truncate_chars;
use sentinel_foundation::LoopDetectionConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;

/// 에러 비교 시 사용하는 최대 길이
const ERROR_KEY_MAX_CHARS: usize = 200;

/// 감지 심각도 (`None < Warning < Critical < Breaker`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSeverity {
    #[default]
    None,
    Warning,
    Critical,
    Breaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPattern {
    Repeat,
    PingPong,
    StrategyLoop,
    DestructiveBatch,
}

impl LoopPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPattern::Repeat => "repeat",
            LoopPattern::PingPong => "ping_pong",
            LoopPattern::StrategyLoop => "strategy_loop",
            LoopPattern::DestructiveBatch => "destructive_batch",
        }
    }
}

/// 판정 결과
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoopCheck {
    pub severity: LoopSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<LoopPattern>,
    /// 패턴 길이
    pub streak: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl LoopCheck {
    pub fn none() -> Self {
        Self::default()
    }

    fn detected(severity: LoopSeverity, pattern: LoopPattern, streak: usize, message: String) -> Self {
        Self {
            severity,
            pattern: Some(pattern),
            streak,
            message,
        }
    }

    pub fn is_none(&self) -> bool {
        self.severity == LoopSeverity::None
    }
}

/// 링 버퍼 엔트리
#[derive(Debug, Clone)]
pub struct LoopHistoryEntry {
    pub tool: String,
    pub hash: u64,
    pub at: Instant,
}

/// 반복 호출 감지기
#[derive(Debug)]
pub struct ToolLoopDetector {
    config: LoopDetectionConfig,
    history: VecDeque<LoopHistoryEntry>,
    errors: VecDeque<String>,
    destructive_tool: Option<String>,
    destructive_streak: usize,
}

impl Default for ToolLoopDetector {
    fn default() -> Self {
        Self::new(LoopDetectionConfig::default())
    }
}

impl ToolLoopDetector {
    pub fn new(config: LoopDetectionConfig) -> Self {
        let config = config.normalized();
        Self {
            history: VecDeque::with_capacity(config.history_size),
            errors: VecDeque::with_capacity(config.history_size),
            config,
            destructive_tool: None,
            destructive_streak: 0,
        }
    }

    pub fn config(&self) -> &LoopDetectionConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: LoopDetectionConfig) {
        self.config = config.normalized();
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
        while self.errors.len() > self.config.history_size {
            self.errors.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &LoopHistoryEntry> {
        self.history.iter()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.errors.clear();
        self.destructive_tool = None;
        self.destructive_streak = 0;
    }

    /// 호출 기록 후 판정. `destructive` 는 Guard 의 파괴적 도구 태그
    pub fn check(&mut self, tool: &str, args: &Value, destructive: bool) -> LoopCheck {
        if !self.config.enabled {
            return LoopCheck::none();
        }

        let hash = hash_tool_call(tool, args);
        if self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(LoopHistoryEntry {
            tool: tool.to_string(),
            hash,
            at: Instant::now(),
        });

        if destructive {
            if self.destructive_tool.as_deref() == Some(tool) {
                self.destructive_streak += 1;
            } else {
                self.destructive_tool = Some(tool.to_string());
                self.destructive_streak = 1;
            }
        } else {
            self.destructive_tool = None;
            self.destructive_streak = 0;
        }

        let candidates = [
            self.check_destructive_batch(tool),
            self.check_repeat(tool, hash),
            self.check_ping_pong(),
            self.check_strategy(),
        ];

        // 같은 심각도면 앞선 패턴 우선
        let mut best = LoopCheck::none();
        for candidate in candidates.into_iter().flatten() {
            if candidate.severity > best.severity {
                best = candidate;
            }
        }
        best
    }

    /// 도구 출력에서 에러를 추출해 기록. 성공 출력은 에러 기록을 비운다.
    pub fn record_result(&mut self, output: &str) {
        if !self.config.enabled {
            return;
        }
        match extract_error(output) {
            Some(error) => {
                if self.errors.len() >= self.config.history_size {
                    self.errors.pop_front();
                }
                self.errors.push_back(error);
            }
            None => self.errors.clear(),
        }
    }

    fn severity_for(&self, count: usize) -> LoopSeverity {
        if count >= self.config.breaker_threshold {
            LoopSeverity::Breaker
        } else if count >= self.config.critical_threshold {
            LoopSeverity::Critical
        } else if count >= self.config.warning_threshold {
            LoopSeverity::Warning
        } else {
            LoopSeverity::None
        }
    }

    fn check_destructive_batch(&self, tool: &str) -> Option<LoopCheck> {
        (self.destructive_streak >= self.config.destructive_batch_threshold).then(|| {
            LoopCheck::detected(
                LoopSeverity::Breaker,
                LoopPattern::DestructiveBatch,
                self.destructive_streak,
                format!(
                    "{} consecutive {} calls; stop and confirm before deleting more",
                    self.destructive_streak, tool
                ),
            )
        })
    }

    fn check_repeat(&self, tool: &str, hash: u64) -> Option<LoopCheck> {
        let streak = self
            .history
            .iter()
            .rev()
            .take_while(|e| e.hash == hash)
            .count();
        let severity = self.severity_for(streak);
        (severity > LoopSeverity::None).then(|| {
            LoopCheck::detected(
                severity,
                LoopPattern::Repeat,
                streak,
                format!("{} called {} times in a row with identical arguments", tool, streak),
            )
        })
    }

    fn check_ping_pong(&self) -> Option<LoopCheck> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }
        let a = self.history[n - 1].hash;
        let b = self.history[n - 2].hash;
        if a == b {
            return None;
        }

        let length = self
            .history
            .iter()
            .rev()
            .enumerate()
            .take_while(|(i, e)| e.hash == if i % 2 == 0 { a } else { b })
            .count();

        let severity = if length >= self.config.critical_threshold {
            LoopSeverity::Critical
        } else if length >= self.config.warning_threshold {
            LoopSeverity::Warning
        } else {
            return None;
        };
        Some(LoopCheck::detected(
            severity,
            LoopPattern::PingPong,
            length,
            format!(
                "alternating between {} and {} for {} calls",
                self.history[n - 2].tool,
                self.history[n - 1].tool,
                length
            ),
        ))
    }

    fn check_strategy(&self) -> Option<LoopCheck> {
        let last = self.errors.back()?;
        let repeats = self.errors.iter().rev().take_while(|e| *e == last).count();
        (repeats >= self.config.strategy_threshold).then(|| {
            LoopCheck::detected(
                LoopSeverity::Critical,
                LoopPattern::StrategyLoop,
                repeats,
                format!(
                    "the same error occurred {} times across different approaches: {}",
                    repeats, last
                ),
            )
        })
    }
}

/// 출력에서 인식 가능한 에러 메시지 추출
///
/// 정규화된 에러 JSON, HTTP 상태 라인, `Error:` / `Failed` 접두 라인.
pub fn extract_error(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.get("status").and_then(Value::as_str) == Some("error") {
                let message = value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("error");
                return Some(error_key(message));
            }
        }
    }

    for line in trimmed.lines().map(str::trim) {
        if is_http_error_line(line) {
            return Some(error_key(line));
        }
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("error:")
            || lower.starts_with("error ")
            || lower.starts_with("fatal:")
            || lower.starts_with("failed")
        {
            return Some(error_key(line));
        }
    }
    None
}

fn is_http_error_line(line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let first = parts.next().unwrap_or_default();
    let status = if first.starts_with("HTTP/") {
        parts.next()
    } else if first.eq_ignore_ascii_case("status") || first.eq_ignore_ascii_case("status:") {
        parts.find(|p| p.chars().all(|c| c.is_ascii_digit()))
    } else {
        None
    };
    status
        .and_then(|s| s.parse::<u16>().ok())
        .map(|code| (400..600).contains(&code))
        .unwrap_or(false)
}

fn error_key(message: &str) -> String {
    truncate_chars(message.trim(), ERROR_KEY_MAX_CHARS).to_string()
}
