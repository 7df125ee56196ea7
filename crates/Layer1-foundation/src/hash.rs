//! 결정적 도구 호출 해시
//!
//! 객체 키 순서와 무관하게 같은 (도구, 인자) 쌍은 항상 같은 해시를 가진다.
//! ToolLoopDetector 의 반복 감지에 사용된다.

use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// JSON 값 해시 (키 순서 무관)
pub fn hash_json(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    write_value(value, &mut hasher);
    hasher.finish()
}

/// 도구 이름 + 인자 해시
pub fn hash_tool_call(tool: &str, args: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    tool.hash(&mut hasher);
    hasher.write_u8(0xff);
    write_value(args, &mut hasher);
    hasher.finish()
}

fn write_value(value: &Value, hasher: &mut DefaultHasher) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            b.hash(hasher);
        }
        Value::Number(n) => {
            hasher.write_u8(2);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            hasher.write_u8(3);
            s.hash(hasher);
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            hasher.write_usize(items.len());
            for item in items {
                write_value(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            hasher.write_usize(map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(hasher);
                write_value(&map[key], hasher);
            }
        }
    }
}
