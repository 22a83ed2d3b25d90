//! 작업 문서 파일 저장소.
//!
//! 쓰기는 같은 디렉토리의 임시 파일에 기록한 뒤 rename하므로 읽는 쪽이
//! 절반만 쓰인 문서를 보지 않습니다. 읽기는 파일이 없거나 손상된 경우
//! 초기 문서를 반환합니다.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use super::document::JobDocument;
use crate::error::CoreResult;

/// JSON 값을 원자적으로 파일에 기록합니다.
///
/// 상위 디렉토리가 없으면 생성합니다.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// 작업 문서 파일 저장소.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 문서를 원자적으로 저장합니다.
    pub fn save(&self, doc: &JobDocument) -> CoreResult<()> {
        write_json_atomic(&self.path, doc)
    }

    /// 문서를 읽습니다. 파일이 없거나 손상되었으면 `None`.
    pub fn read(&self) -> Option<JobDocument> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "작업 문서 읽기 실패");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "작업 문서 파싱 실패");
                None
            }
        }
    }

    /// 문서를 읽고, 없으면 초기 문서를 반환합니다.
    pub fn load(&self) -> JobDocument {
        self.read().unwrap_or_else(JobDocument::initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::types::{Symbol, Timeframe};
    use chrono::Utc;

    #[test]
    fn test_missing_file_is_initial() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path().join("status.json"));
        assert!(store.read().is_none());
        assert!(store.load().is_initial());
    }

    #[test]
    fn test_corrupt_file_is_initial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, b"{\"job_id\": \"full_2025").unwrap();

        let store = DocumentStore::new(&path);
        assert_eq!(store.load().status, JobStatus::Idle);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path().join("nested").join("status.json"));

        let doc = JobDocument::new(
            "full_20250106_090000",
            &[Symbol::parse("AAPL").unwrap()],
            &[Timeframe::Day1],
            Utc::now(),
        );
        store.save(&doc).unwrap();
        store.save(&doc).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.job_id, "full_20250106_090000");
        assert_eq!(loaded.symbols.len(), 1);

        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
