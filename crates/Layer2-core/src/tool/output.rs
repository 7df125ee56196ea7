//! 핸들러 출력 → ToolResult 변환

use sentinel_foundation::strings::{cap_output, truncate_with_ellipsis};
use sentinel_foundation::{Error, ToolResult};

use super::handler::ToolOutput;

/// 성공 출력 직렬화 + 출력 상한 적용
pub fn render_output(tool: &str, output: ToolOutput, max_chars: usize) -> ToolResult {
    let mut result = match output {
        ToolOutput::Text(text) => ToolResult::text(text),
        ToolOutput::Bytes(bytes) => ToolResult::text(String::from_utf8_lossy(&bytes).into_owned()),
        ToolOutput::Json(serde_json::Value::String(s)) => ToolResult::text(s),
        ToolOutput::Json(value) => ToolResult::text(value.to_string()),
        ToolOutput::Error(message) => {
            let mut r = ToolResult::text(format!("Error: {}", message));
            r.is_error = true;
            r
        }
        ToolOutput::Result(result) => result,
    };

    result.tool = tool.to_string();
    result.content = cap_output(std::mem::take(&mut result.content), max_chars);
    result.for_llm = result.for_llm.take().map(|s| cap_output(s, max_chars));
    result.for_user = result.for_user.take().map(|s| cap_output(s, max_chars));
    result
}

/// 에러 → 정규화된 에러 결과 (에러 문자열 상한 적용)
pub fn render_error(tool: &str, error: &Error, max_error_chars: usize) -> ToolResult {
    ToolResult::error(tool, truncate_with_ellipsis(&error.to_string(), max_error_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_render_variants() {
        assert_eq!(render_output("t", ToolOutput::from("hi"), 100).content, "hi");
        assert_eq!(
            render_output("t", ToolOutput::Bytes(b"raw".to_vec()), 100).content,
            "raw"
        );
        assert_eq!(
            render_output("t", ToolOutput::Json(json!("plain")), 100).content,
            "plain"
        );
        assert_eq!(
            render_output("t", ToolOutput::Json(json!({"a": 1})), 100).content,
            r#"{"a":1}"#
        );
        let err = render_output("t", ToolOutput::Error("nope".into()), 100);
        assert!(err.is_error);
        assert_eq!(err.content, "Error: nope");
    }

    #[test]
    fn test_output_capped() {
        let big = "y".repeat(1000);
        let r = render_output("t", ToolOutput::Text(big), 100);
        assert!(r.content.contains("[output truncated: showing first 100 of 1000 characters]"));
        assert!(!r.is_error);
    }

    #[test]
    fn test_error_capped() {
        let long = Error::handler("bash", "e".repeat(5000));
        let r = render_error("bash", &long, 2000);
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["tool"], "bash");
        assert!(v["error"].as_str().unwrap().chars().count() <= 2003);
    }
}
