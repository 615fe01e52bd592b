#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod config;
pub mod digest;
pub mod storage;

pub use bale_domain::{
    artifact_dir, artifact_path, Artifact, Digest, DigestAlgorithm, ObjectKey, ObjectMetadata,
};
pub use config::{parse_duration, StorageOptions};
pub use digest::{digest_bytes, Digester};
pub use storage::{
    AggregateError, ArchiveFilter, ArtifactLock, RenameFallback, RenameOutcome,
    SourceIgnoreFilter, Storage, StorageError, DEFAULT_DIR_MODE, DEFAULT_EXE_FILE_MODE,
    DEFAULT_FILE_MODE, GARBAGE_COUNT_LIMIT, VCS_PATTERNS,
};
