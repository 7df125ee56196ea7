//! SSH 호스트 허용 목록

use serde_json::Value;

/// 허용 목록 (exact / `*.domain` / `*`)
///
/// 빈 목록은 모든 호스트를 거부한다.
#[derive(Debug, Clone, Default)]
pub struct HostAllowlist {
    entries: Vec<String>,
}

impl HostAllowlist {
    pub fn new(entries: &[String]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.entries.iter().any(|entry| {
            if entry == "*" {
                true
            } else if let Some(domain) = entry.strip_prefix("*.") {
                // 하위 도메인만 (apex 제외)
                host.len() > domain.len() + 1
                    && host.ends_with(domain)
                    && host[..host.len() - domain.len()].ends_with('.')
            } else {
                *entry == host
            }
        })
    }
}

/// `user@host:path`, `host:22`, `[::1]:22` 에서 호스트만 추출
pub fn parse_host_spec(spec: &str) -> Option<String> {
    let spec = spec.trim();
    let without_user = match spec.rsplit_once('@') {
        Some((_, rest)) => rest,
        None => spec,
    };
    let host = if let Some(rest) = without_user.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        without_user.split(':').next().unwrap_or_default()
    };
    let host = host.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// 원격 경로 형태 (`host:path`) 인 경우만 호스트 반환
fn remote_path_host(spec: &str) -> Option<String> {
    let spec = spec.trim();
    // 로컬 절대/상대 경로
    if spec.starts_with('/') || spec.starts_with('.') || spec.starts_with('~') {
        return None;
    }
    let (before, _) = spec.split_once(':')?;
    parse_host_spec(before)
}

/// 원격 셸 도구 인자에서 대상 호스트 추출
pub fn extract_hosts(args: &Value) -> Vec<String> {
    let mut hosts = Vec::new();
    let Some(map) = args.as_object() else {
        return hosts;
    };

    for key in ["host", "hostname", "target"] {
        if let Some(host) = map.get(key).and_then(Value::as_str).and_then(parse_host_spec) {
            hosts.push(host);
        }
    }
    for key in ["source", "destination", "src", "dest"] {
        if let Some(host) = map.get(key).and_then(Value::as_str).and_then(remote_path_host) {
            hosts.push(host);
        }
    }

    hosts.sort();
    hosts.dedup();
    hosts
}
