//! Command Safety - 셸 명령 분류기
//!
//! 두 가지 일을 한다:
//!
//! 1. 위험 패턴 검사 (`CommandPolicy::evaluate`)
//!    - 기본 패턴: 루트 재귀 삭제, 파일시스템 포맷, 원시 디바이스 쓰기,
//!      루트 777, fork bomb, 방화벽 flush, 계정 삭제, 파괴적 SQL
//!    - 운영자 추가 패턴: owner 가 아니면 항상 차단
//!    - `sudo` (admin 이상), reboot/shutdown 계열 (allow 플래그 + owner)
//!
//! 2. 읽기 전용 판별 (`is_read_only_command`)
//!    - 확인(confirmation) 단계를 건너뛸 때만 사용하며 위험 패턴 검사는 항상 수행된다
//!    - 따옴표를 인식하며 `&&`, `;`, `||` 로 나누고 `|` 로는 나누지 않는다
//!    - 따옴표 밖의 출력 리다이렉션이 하나라도 있으면 읽기 전용이 아니다
//!
//! 완전한 셸 파서가 아닌, 감사 가능한 단순 휴리스틱이다.

use regex::Regex;
use sentinel_foundation::{AccessLevel, DenialKind, Error, PatternRule, Result};

// ============================================================================
// 기본 위험 패턴
// ============================================================================

/// (정규식, 사유)
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        r"\brm\s+(?:-[a-zA-Z]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:-[a-zA-Z-]+\s+)*(?:/\*?|~/?|\$HOME/?)(?:\s|$|[;&|])",
        "recursive deletion of root or home directory",
    ),
    (r"\brm\s+.*--no-preserve-root", "recursive deletion of root directory"),
    (
        r"\b(?:mkfs(?:\.[a-z0-9]+)?|mke2fs|wipefs)\b",
        "filesystem formatting",
    ),
    (
        r"\bdd\b[^;&|]*\bof=/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk)",
        "raw device write",
    ),
    (
        r">\s*/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk)[a-z0-9]*",
        "raw device write",
    ),
    (
        r"\bchmod\s+(?:-[a-zA-Z]+\s+)*(?:0?777|a\+rwx|ugo\+rwx)\s+/(?:\s|$|[;&|])",
        "world-writable permissions on root",
    ),
    (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
    (
        r"\bip6?tables\s+(?:.*\s)?(?:-F|--flush)(?:\s|$)",
        "firewall flush",
    ),
    (r"\bufw\s+(?:disable|reset)\b", "firewall disable"),
    (r"\bnft\s+flush\s+ruleset\b", "firewall flush"),
    (
        r"\b(?:userdel|deluser|groupdel|delgroup)\b",
        "account deletion",
    ),
    (r"(?i)\bdrop\s+(?:database|schema|table)\b", "destructive SQL"),
    (r"(?i)\btruncate\s+table\b", "destructive SQL"),
    (
        r#"(?i)\bdelete\s+from\s+[\w.`"]+\s*(?:;|$|"|')"#,
        "destructive SQL without WHERE clause",
    ),
];

const SUDO_PATTERN: &str = r"(?:^\s*|[;&|(]\s*)sudo\b";

const REBOOT_PATTERN: &str = r"(?:^\s*|[;&|(]\s*|\bsudo\s+)(?:reboot|shutdown|poweroff|halt|init\s+[06]|systemctl\s+(?:reboot|poweroff|halt))(?:\s|$|[;&|)])";

/// 검사 전용 프로그램 (쓰기 / 임의 실행 불가)
pub const READ_ONLY_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "more", "wc", "grep", "egrep", "fgrep", "rg", "pwd",
    "echo", "printf", "whoami", "id", "groups", "date", "uname", "hostname", "uptime", "df",
    "du", "free", "ps", "pgrep", "printenv", "which", "whereis", "type", "file", "stat", "tree",
    "diff", "cmp", "md5sum", "sha1sum", "sha256sum", "cut", "tr", "jq", "nl", "basename",
    "dirname", "realpath", "readlink", "lsblk", "lscpu", "lsof", "true", "test",
];

// ============================================================================
// CommandPolicy
// ============================================================================

/// 컴파일된 위험 패턴
#[derive(Debug, Clone)]
pub struct DangerousPattern {
    pub source: String,
    pub reason: String,
    /// 운영자 추가 패턴 여부
    pub custom: bool,
    regex: Regex,
}

impl DangerousPattern {
    fn compile(source: &str, reason: &str, custom: bool) -> Result<Self> {
        let regex = Regex::new(source).map_err(|e| Error::InvalidPattern {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            reason: reason.to_string(),
            custom,
            regex,
        })
    }

    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

/// 명령 검사에 영향을 주는 Guard 플래그
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandFlags {
    pub allow_destructive: bool,
    pub sudo_owner_only: bool,
    pub allow_reboot: bool,
}

/// 셸 명령 정책
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    defaults: Vec<DangerousPattern>,
    custom: Vec<DangerousPattern>,
    sudo: Regex,
    reboot: Regex,
}

fn compile_fixed(source: &str) -> Result<Regex> {
    Regex::new(source).map_err(|e| Error::InvalidPattern {
        pattern: source.to_string(),
        message: e.to_string(),
    })
}

impl CommandPolicy {
    /// 패턴 컴파일 실패는 시작 시 치명적인 설정 오류다
    pub fn new(custom: &[PatternRule]) -> Result<Self> {
        let defaults = DEFAULT_PATTERNS
            .iter()
            .map(|(source, reason)| DangerousPattern::compile(source, reason, false))
            .collect::<Result<Vec<_>>>()?;
        let custom = custom
            .iter()
            .map(|rule| {
                let reason = if rule.reason.is_empty() {
                    "matches operator-defined pattern"
                } else {
                    rule.reason.as_str()
                };
                DangerousPattern::compile(&rule.pattern, reason, true)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            defaults,
            custom,
            sudo: compile_fixed(SUDO_PATTERN)?,
            reboot: compile_fixed(REBOOT_PATTERN)?,
        })
    }

    pub fn uses_sudo(&self, command: &str) -> bool {
        self.sudo.is_match(command)
    }

    pub fn is_reboot(&self, command: &str) -> bool {
        self.reboot.is_match(command)
    }

    /// 명령에 매칭되는 모든 위험 패턴
    pub fn matching(&self, command: &str) -> Vec<&DangerousPattern> {
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .filter(|p| p.is_match(command))
            .collect()
    }

    /// 호출자 레벨에서 명령 실행 가능 여부
    pub fn evaluate(&self, command: &str, level: AccessLevel, flags: CommandFlags) -> Result<()> {
        if self.uses_sudo(command) {
            let required = if flags.sudo_owner_only {
                AccessLevel::Owner
            } else {
                AccessLevel::Admin
            };
            if level < required {
                return Err(Error::denied(
                    DenialKind::CommandSafety,
                    format!("sudo requires {} access (you have {})", required, level),
                ));
            }
        }

        if self.is_reboot(command) {
            if !flags.allow_reboot {
                return Err(Error::denied(
                    DenialKind::CommandSafety,
                    "reboot/shutdown commands are disabled",
                ));
            }
            if level != AccessLevel::Owner {
                return Err(Error::denied(
                    DenialKind::CommandSafety,
                    format!("reboot/shutdown requires owner access (you have {})", level),
                ));
            }
        }

        let owner = level == AccessLevel::Owner;
        for pattern in &self.defaults {
            if pattern.is_match(command) && !(flags.allow_destructive && owner) {
                return Err(Error::denied(
                    DenialKind::CommandSafety,
                    format!("blocked dangerous command: {}", pattern.reason),
                ));
            }
        }
        for pattern in &self.custom {
            if pattern.is_match(command) && !owner {
                return Err(Error::denied(
                    DenialKind::CommandSafety,
                    format!("blocked by operator rule: {}", pattern.reason),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// 읽기 전용 판별
// ============================================================================

#[derive(Debug, Default)]
struct ShellScan {
    segments: Vec<String>,
    redirect: bool,
    substitution: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// 따옴표를 인식하며 명령을 훑는다. 따옴표가 닫히지 않으면 `None`.
fn scan(command: &str) -> Option<ShellScan> {
    let chars: Vec<char> = command.chars().collect();
    let mut out = ShellScan::default();
    let mut current = String::new();
    let mut quote = Quote::None;
    let mut i = 0;

    let flush = |current: &mut String, out: &mut ShellScan| {
        out.segments.push(std::mem::take(current));
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match quote {
            Quote::Single => {
                current.push(c);
                if c == '\'' {
                    quote = Quote::None;
                }
            }
            Quote::Double => {
                current.push(c);
                match c {
                    '\\' => {
                        current.push(next?);
                        i += 2;
                        continue;
                    }
                    '"' => quote = Quote::None,
                    '`' => out.substitution = true,
                    '$' if next == Some('(') => out.substitution = true,
                    _ => {}
                }
            }
            Quote::None => match c {
                '\\' => {
                    current.push(c);
                    current.push(next?);
                    i += 2;
                    continue;
                }
                '\'' => {
                    quote = Quote::Single;
                    current.push(c);
                }
                '"' => {
                    quote = Quote::Double;
                    current.push(c);
                }
                '>' => {
                    out.redirect = true;
                    current.push(c);
                }
                '`' => {
                    out.substitution = true;
                    current.push(c);
                }
                '$' | '<' if next == Some('(') => {
                    out.substitution = true;
                    current.push(c);
                }
                ';' | '\n' => flush(&mut current, &mut out),
                '&' => {
                    if next == Some('&') {
                        flush(&mut current, &mut out);
                        i += 2;
                        continue;
                    }
                    let prev = if i > 0 { Some(chars[i - 1]) } else { None };
                    if prev == Some('>') || prev == Some('|') || next == Some('>') {
                        current.push(c);
                    } else {
                        // 백그라운드 실행도 명령 경계
                        flush(&mut current, &mut out);
                    }
                }
                '|' => {
                    if next == Some('|') {
                        flush(&mut current, &mut out);
                        i += 2;
                        continue;
                    }
                    current.push(c);
                }
                _ => current.push(c),
            },
        }
        i += 1;
    }

    if quote != Quote::None {
        return None;
    }
    flush(&mut current, &mut out);
    Some(out)
}

/// `&&`, `;`, `||` 기준 세그먼트 (파이프라인은 하나의 세그먼트)
pub fn split_segments(command: &str) -> Option<Vec<String>> {
    scan(command).map(|s| {
        s.segments
            .into_iter()
            .map(|seg| seg.trim().to_string())
            .filter(|seg| !seg.is_empty())
            .collect()
    })
}

/// 따옴표 밖 출력 리다이렉션 여부 (따옴표가 깨졌으면 true 로 간주)
pub fn has_unquoted_redirect(command: &str) -> bool {
    scan(command).map(|s| s.redirect).unwrap_or(true)
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            let mut chars = name.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// 세그먼트의 실행 프로그램 이름 (`VAR=value` 접두 제거, 경로 제거)
pub fn leading_program(segment: &str) -> Option<String> {
    let tokens = shlex::split(segment)?;
    tokens
        .into_iter()
        .find(|t| !is_env_assignment(t))
        .map(|t| match t.rsplit_once('/') {
            Some((_, base)) => base.to_string(),
            None => t,
        })
}

/// 휴리스틱 읽기 전용 명령 판별
pub fn is_read_only_command(command: &str) -> bool {
    let Some(scan) = scan(command) else {
        return false;
    };
    if scan.redirect || scan.substitution {
        return false;
    }

    let segments: Vec<&str> = scan
        .segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    !segments.is_empty()
        && segments.iter().all(|seg| {
            leading_program(seg)
                .map(|p| READ_ONLY_PROGRAMS.contains(&p.as_str()))
                .unwrap_or(false)
        })
}
