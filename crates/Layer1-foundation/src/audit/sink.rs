//! Audit sinks - 라인 기반 파일 / 메모리

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

use super::types::AuditEntry;
use crate::Result;

/// 감사 로그 저장소
///
/// 기록은 best-effort 다. 실패는 로그로 남기고 호출자에게 전파하지 않는다.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// 라인 기반 파일 싱크 (append-only)
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", entry.to_line()) {
            error!(path = %self.path.display(), error = %e, "failed to write audit line");
        }
    }
}

/// 메모리 싱크 (테스트 / 임베딩용)
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) {
        self.entries.lock().push(entry.clone());
    }
}
