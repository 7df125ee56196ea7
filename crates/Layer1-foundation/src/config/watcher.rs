//! 설정 파일 변경 감지 (mtime polling)

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use super::sentinel::SentinelConfig;

/// 설정 파일이 바뀌었을 때 새 설정을 돌려준다
///
/// 파싱에 실패하면 경고만 남기고 이전 설정을 유지하도록 `None` 을 반환한다.
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn poll(&mut self) -> Option<SentinelConfig> {
        let current = modified(&self.path)?;
        if self.last_modified == Some(current) {
            return None;
        }
        self.last_modified = Some(current);

        match SentinelConfig::load_from(&self.path) {
            Ok(config) => {
                info!(path = %self.path.display(), "config reloaded");
                Some(config)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring invalid config");
                None
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
