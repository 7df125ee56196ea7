//! 문자열 잘라내기 유틸리티
//!
//! 모든 길이 계산은 바이트가 아닌 `char` 단위다 (UTF-8 경계 보존).

use serde_json::Value;

/// 감사 로그에 기록되는 인자 값 최대 길이
pub const AUDIT_VALUE_MAX_CHARS: usize = 200;

/// `max_chars` 를 넘으면 잘라서 반환
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// 잘라낸 경우 `...` 접미사를 붙인다
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    let cut = truncate_chars(s, max_chars);
    if cut.len() < s.len() {
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

/// 도구 출력 상한 적용
///
/// 넘치면 앞부분만 남기고 명시적인 잘림 표시를 붙인다.
pub fn cap_output(s: String, max_chars: usize) -> String {
    let cut = truncate_chars(&s, max_chars);
    if cut.len() == s.len() {
        return s;
    }
    let total = s.chars().count();
    format!(
        "{}\n\n[output truncated: showing first {} of {} characters]",
        cut, max_chars, total
    )
}

/// JSON 인자 정리: 긴 문자열 값을 재귀적으로 잘라낸다
pub fn sanitize_json(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_with_ellipsis(s, max_chars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize_json(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_json(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}
