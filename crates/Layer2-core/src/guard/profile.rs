//! 이름 붙은 allow/deny 프로필

use sentinel_foundation::{DenialKind, Error, GuardConfig, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct CompiledProfile {
    allow_all: bool,
    allow: HashSet<String>,
    deny: HashSet<String>,
}

/// group 매크로가 확장된 프로필 집합
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: HashMap<String, CompiledProfile>,
}

impl ProfileSet {
    pub fn new(config: &GuardConfig) -> Self {
        let profiles = config
            .profiles
            .iter()
            .map(|(name, profile)| {
                let compiled = CompiledProfile {
                    allow_all: profile.allow.iter().any(|a| a == "*"),
                    allow: config.expand_groups(&profile.allow),
                    deny: config.expand_groups(&profile.deny),
                };
                (name.clone(), compiled)
            })
            .collect();
        Self { profiles }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// deny 우선, 명시적으로 허용되지 않은 도구는 거부
    pub fn check(&self, profile: &str, tool: &str) -> Result<()> {
        let Some(p) = self.profiles.get(profile) else {
            return Err(Error::denied(
                DenialKind::Profile,
                format!("unknown profile: {}", profile),
            ));
        };
        if p.deny.contains(tool) {
            return Err(Error::denied(
                DenialKind::Profile,
                format!("{} is denied by profile {}", tool, profile),
            ));
        }
        if p.allow_all || p.allow.contains(tool) {
            return Ok(());
        }
        Err(Error::denied(
            DenialKind::Profile,
            format!("{} is not allowed by profile {}", tool, profile),
        ))
    }
}
