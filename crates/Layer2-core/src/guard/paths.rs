//! 보호 경로 검사
//!
//! 규칙은 exact / prefix (디렉토리 하위 전체) / glob 으로 매칭된다.
//! `**/` 로 시작하는 glob 은 어느 깊이에서든 꼬리 부분이 맞으면 매칭된다.

use glob::Pattern;
use sentinel_foundation::{AccessLevel, DenialKind, Error, ProtectedPathRule, Result};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
enum Matcher {
    /// 경로 자체 또는 그 하위
    Prefix(PathBuf),
    /// 전체 경로 glob
    Glob(Pattern),
    /// `**/<tail>`
    AnyDepth(Pattern),
}

#[derive(Debug, Clone)]
struct CompiledPathRule {
    source: String,
    matcher: Matcher,
    admin_readable: bool,
}

/// 컴파일된 보호 경로 목록
#[derive(Debug, Clone, Default)]
pub struct ProtectedPaths {
    rules: Vec<CompiledPathRule>,
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn compile_glob(source: &str, pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::InvalidPattern {
        pattern: source.to_string(),
        message: e.to_string(),
    })
}

/// `~` / `~/...` 확장
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// `.` / `..` 정리 (파일시스템 접근 없음)
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // 루트 위로는 올라가지 않는다
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// 도구 인자 경로를 절대 경로로 해석
///
/// 존재하는 경로는 심볼릭 링크까지 풀어낸다.
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = expand_home(raw.trim());
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    let normalized = normalize_path(&joined);
    std::fs::canonicalize(&normalized).unwrap_or(normalized)
}

/// 끝에서부터 n 개 컴포넌트로 만든 상대 경로들
fn suffixes(path: &Path) -> Vec<PathBuf> {
    let names: Vec<_> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();
    (0..names.len())
        .map(|start| names[start..].iter().collect())
        .collect()
}

impl CompiledPathRule {
    fn compile(rule: &ProtectedPathRule) -> Result<Self> {
        let source = rule.pattern.trim();
        let matcher = if let Some(tail) = source.strip_prefix("**/") {
            Matcher::AnyDepth(compile_glob(source, tail)?)
        } else {
            let expanded = expand_home(source);
            let text = expanded.to_string_lossy();
            if has_glob_meta(&text) {
                Matcher::Glob(compile_glob(source, &text)?)
            } else {
                Matcher::Prefix(normalize_path(&expanded))
            }
        };
        Ok(Self {
            source: source.to_string(),
            matcher,
            admin_readable: rule.admin_readable,
        })
    }

    fn matches(&self, path: &Path) -> bool {
        match &self.matcher {
            Matcher::Prefix(prefix) => path.starts_with(prefix),
            Matcher::Glob(pattern) => path.ancestors().any(|a| pattern.matches_path(a)),
            Matcher::AnyDepth(tail) => path
                .ancestors()
                .any(|a| suffixes(a).iter().any(|s| tail.matches_path(s))),
        }
    }
}

impl ProtectedPaths {
    pub fn new(rules: &[ProtectedPathRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(CompiledPathRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 매칭되는 첫 규칙의 원본 패턴
    pub fn matching_rule(&self, path: &Path) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.matches(path))
            .map(|r| r.source.as_str())
    }

    /// 접근 가능 여부
    ///
    /// owner 는 항상 통과, admin 은 `admin_readable` 경로를 읽을 수만 있다.
    pub fn check(&self, path: &Path, level: AccessLevel, write: bool) -> Result<()> {
        if level == AccessLevel::Owner {
            return Ok(());
        }
        for rule in &self.rules {
            if !rule.matches(path) {
                continue;
            }
            if rule.admin_readable && !write && level >= AccessLevel::Admin {
                continue;
            }
            return Err(Error::denied(
                DenialKind::Path,
                format!(
                    "path {} is protected ({})",
                    path.display(),
                    rule.source
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ProtectedPaths {
        ProtectedPaths::new(&[
            ProtectedPathRule::new("/srv/secrets"),
            ProtectedPathRule::new("/etc/shadow"),
            ProtectedPathRule::new("/opt/keys/*.key"),
            ProtectedPathRule::new("**/*.pem"),
            ProtectedPathRule::new("**/.env").admin_readable(),
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_and_prefix() {
        let p = paths();
        assert!(p.check(Path::new("/etc/shadow"), AccessLevel::Admin, false).is_err());
        assert!(p
            .check(Path::new("/srv/secrets/db/password"), AccessLevel::User, false)
            .is_err());
        // 컴포넌트 단위 prefix
        assert!(p
            .check(Path::new("/srv/secrets-public/readme"), AccessLevel::User, false)
            .is_ok());
    }

    #[test]
    fn test_glob_rules() {
        let p = paths();
        assert!(p.matching_rule(Path::new("/opt/keys/prod.key")).is_some());
        assert!(p.matching_rule(Path::new("/opt/keys/readme.txt")).is_none());
        assert!(p.matching_rule(Path::new("/home/a/project/tls/server.pem")).is_some());
        assert!(p.matching_rule(Path::new("/home/a/project/.env")).is_some());
        assert!(p.matching_rule(Path::new("/home/a/project/.envrc")).is_none());
    }

    #[test]
    fn test_owner_bypass_and_admin_read() {
        let p = paths();
        let env = Path::new("/work/app/.env");
        assert!(p.check(env, AccessLevel::Owner, true).is_ok());
        assert!(p.check(env, AccessLevel::Admin, false).is_ok());
        assert!(p.check(env, AccessLevel::Admin, true).is_err());
        let err = p.check(env, AccessLevel::User, false).unwrap_err();
        assert_eq!(err.denial_kind(), Some(DenialKind::Path));
    }

    #[test]
    fn test_resolve_relative_and_dotdot() {
        let base = Path::new("/nonexistent-sentinel-base/work");
        let resolved = resolve_path("../../srv/secrets/x", base);
        assert_eq!(resolved, PathBuf::from("/srv/secrets/x"));
        let p = paths();
        assert!(p.check(&resolved, AccessLevel::User, false).is_err());
    }

    #[test]
    fn test_home_expansion() {
        if let Some(home) = dirs::home_dir() {
            let p = ProtectedPaths::new(&[ProtectedPathRule::new("~/.ssh")]).unwrap();
            let key = resolve_path("~/.ssh/id_rsa", Path::new("/"));
            assert!(key.starts_with(&home));
            assert!(p.check(&key, AccessLevel::Admin, false).is_err());
        }
    }

    #[test]
    fn test_invalid_glob() {
        let err = ProtectedPaths::new(&[ProtectedPathRule::new("/a/[b")]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }
}
