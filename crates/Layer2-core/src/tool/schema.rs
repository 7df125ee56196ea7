//! 인자 스키마 검증
//!
//! LLM 이 보낸 원시 JSON 인자를 도구의 JSON-Schema 와 대조해
//! 타입이 정해진 `ToolArgs` 로 변환한다. 핸들러는 개별 필드를 직접
//! 캐스팅하지 않고 검증된 값만 받는다.

use sentinel_foundation::{Error, Result};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

// ============================================================================
// ArgValue
// ============================================================================

/// 선언된 파라미터 타입별 값
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Array(Vec<Value>),
    Object(Map<String, Value>),
    Null,
}

impl ArgValue {
    /// 스키마가 없는 값의 타입 추론
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ArgValue::Integer(i),
                None => ArgValue::Number(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => ArgValue::String(s.clone()),
            Value::Array(items) => ArgValue::Array(items.clone()),
            Value::Object(map) => ArgValue::Object(map.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::String(s) => Value::String(s.clone()),
            ArgValue::Integer(i) => Value::from(*i),
            ArgValue::Number(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            ArgValue::Boolean(b) => Value::Bool(*b),
            ArgValue::Array(items) => Value::Array(items.clone()),
            ArgValue::Object(map) => Value::Object(map.clone()),
            ArgValue::Null => Value::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::String(_) => "string",
            ArgValue::Integer(_) => "integer",
            ArgValue::Number(_) => "number",
            ArgValue::Boolean(_) => "boolean",
            ArgValue::Array(_) => "array",
            ArgValue::Object(_) => "object",
            ArgValue::Null => "null",
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::String(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::String(s)
    }
}

impl From<i64> for ArgValue {
    fn from(i: i64) -> Self {
        ArgValue::Integer(i)
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Boolean(b)
    }
}

// ============================================================================
// ToolArgs
// ============================================================================

/// 검증된 도구 인자
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 스키마 없이 JSON 객체로부터 생성 (타입 추론)
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::ArgumentParse("arguments must be a JSON object".to_string()))?;
        Ok(Self {
            values: map
                .iter()
                .map(|(k, v)| (k.clone(), ArgValue::infer(v)))
                .collect(),
        })
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<ArgValue> {
        self.values.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.values.iter()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// 정수 값도 실수로 읽는다
    pub fn f64(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Number(f)) => Some(*f),
            Some(ArgValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ArgValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn array(&self, name: &str) -> Option<&[Value]> {
        match self.values.get(name) {
            Some(ArgValue::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        match self.values.get(name) {
            Some(ArgValue::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.str(name)
            .ok_or_else(|| Error::ArgumentParse(format!("missing required parameter: {}", name)))
    }

    pub fn require_i64(&self, name: &str) -> Result<i64> {
        self.i64(name)
            .ok_or_else(|| Error::ArgumentParse(format!("missing required parameter: {}", name)))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

// ============================================================================
// 파싱 / 검증
// ============================================================================

/// 원시 인자 문자열 파싱. 빈 문자열은 `{}`.
pub fn parse_arguments(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::ArgumentParse(format!("malformed JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::ArgumentParse(
            "arguments must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(name: &str, expected: &str, value: &Value) -> Error {
    Error::ArgumentParse(format!(
        "parameter '{}' expects {}, got {}",
        name,
        expected,
        json_kind(value)
    ))
}

fn coerce(name: &str, ty: &str, value: &Value) -> Result<ArgValue> {
    match (ty, value) {
        ("string", Value::String(s)) => Ok(ArgValue::String(s.clone())),
        ("integer", Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(ArgValue::Integer)
            .ok_or_else(|| mismatch(name, ty, value)),
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(ArgValue::Integer)
            .map_err(|_| mismatch(name, ty, value)),
        ("number", Value::Number(n)) => Ok(ArgValue::Number(n.as_f64().unwrap_or_default())),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ArgValue::Number)
            .ok_or_else(|| mismatch(name, ty, value)),
        ("boolean", Value::Bool(b)) => Ok(ArgValue::Boolean(*b)),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(ArgValue::Boolean(true)),
            "false" => Ok(ArgValue::Boolean(false)),
            _ => Err(mismatch(name, ty, value)),
        },
        ("array", Value::Array(items)) => Ok(ArgValue::Array(items.clone())),
        ("object", Value::Object(map)) => Ok(ArgValue::Object(map.clone())),
        ("null", Value::Null) => Ok(ArgValue::Null),
        ("string" | "integer" | "number" | "boolean" | "array" | "object" | "null", _) => {
            Err(mismatch(name, ty, value))
        }
        // 알 수 없는 타입 선언은 추론으로 대체
        _ => Ok(ArgValue::infer(value)),
    }
}

fn declared_types(spec: Option<&Value>) -> Vec<&str> {
    match spec.and_then(|s| s.get("type")) {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// 스키마 기준 인자 검증 및 변환
pub fn validate_args(schema: &Value, raw: &Value) -> Result<ToolArgs> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::ArgumentParse("arguments must be a JSON object".to_string()))?;
    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for name in &required {
        if object.get(*name).map_or(true, Value::is_null) {
            return Err(Error::ArgumentParse(format!(
                "missing required parameter: {}",
                name
            )));
        }
    }

    let mut args = ToolArgs::new();
    for (name, value) in object {
        let spec = properties.and_then(|p| p.get(name));
        if value.is_null() && !required.contains(&name.as_str()) {
            continue;
        }

        let types = declared_types(spec);
        let converted = if types.is_empty() {
            ArgValue::infer(value)
        } else {
            let mut last_err = None;
            let mut found = None;
            for ty in &types {
                match coerce(name, ty, value) {
                    Ok(v) => {
                        found = Some(v);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            match (found, last_err) {
                (Some(v), _) => v,
                (None, Some(e)) => return Err(e),
                (None, None) => ArgValue::infer(value),
            }
        };

        if let Some(choices) = spec.and_then(|s| s.get("enum")).and_then(Value::as_array) {
            if !choices.contains(&converted.to_json()) {
                let allowed: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
                return Err(Error::ArgumentParse(format!(
                    "parameter '{}' must be one of [{}]",
                    name,
                    allowed.join(", ")
                )));
            }
        }

        args.insert(name.clone(), converted);
    }
    Ok(args)
}
