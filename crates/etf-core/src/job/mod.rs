//! 작업 문서와 상태 모델.

pub mod document;
pub mod persist;
pub mod status;

pub use document::{
    JobDocument, Progress, RetryTask, SymbolRecord, TimeframeRecord, UnitUpdate, INITIAL_JOB_ID,
};
pub use persist::{write_json_atomic, DocumentStore};
pub use status::{JobStatus, SymbolStatus, TimeframeStatus};
