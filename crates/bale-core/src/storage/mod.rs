use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use bale_domain::{artifact_path, Artifact, Digest, DigestAlgorithm, DigestParseError, ObjectMetadata};
use flate2::{read::GzDecoder, Compression, GzBuilder};
use fs4::FileExt;
use tar::Header;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::StorageOptions;
use crate::digest::Digester;

mod archive;
mod atomic;
mod filesystem;
mod gc;
mod lock;
mod path;
mod sourceignore;
mod verify;

#[cfg(test)]
mod tests;

pub use archive::{ArchiveFilter, DEFAULT_DIR_MODE, DEFAULT_EXE_FILE_MODE, DEFAULT_FILE_MODE};
pub use atomic::{RenameFallback, RenameOutcome};
pub use gc::GARBAGE_COUNT_LIMIT;
pub use lock::ArtifactLock;
pub use sourceignore::{SourceIgnoreFilter, VCS_PATTERNS};

use atomic::{rename_with_fallback, stage, HashingWriter};
use path::{join_within, lock_path_for, secure_join};

/// Errors surfaced by the artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid dir path: {}", .0.display())]
    InvalidDir(PathBuf),
    #[error("invalid storage address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("artifact path {0:?} does not resolve inside the storage root")]
    InvalidArtifactPath(String),
    #[error("sub path {0:?} does not resolve inside the artifact")]
    InvalidSubPath(String),
    #[error("invalid ignore pattern {pattern:?}: {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },
    #[error("artifact has no digest")]
    NoDigest,
    #[error("failed to parse artifact digest '{digest}': {source}")]
    InvalidDigest {
        digest: String,
        #[source]
        source: DigestParseError,
    },
    #[error("computed digest doesn't match '{digest}'")]
    DigestMismatch { digest: String, actual: String },
    #[error("archive entry {entry:?} escapes the extraction root")]
    UnsafeArchiveEntry { entry: String },
    #[error("reached file walking limit, already walked over: {limit}")]
    WalkLimit { limit: usize },
    #[error("can't walk over file: {0}")]
    Walk(String),
    #[error("failed to remove files: {}", failed.join(" "))]
    RemoveFiles {
        failed: Vec<String>,
        deleted: Vec<PathBuf>,
    },
    #[error("garbage collection deadline exceeded")]
    DeadlineExceeded,
    #[error("garbage collection task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Whether the error means the artifact (or its directory) does not exist.
    /// An artifact path that cannot be resolved inside the root counts as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == ErrorKind::NotFound,
            Self::InvalidArtifactPath(_) => true,
            _ => false,
        }
    }
}

/// Several independent failures reported as one error.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<StorageError>,
}

impl AggregateError {
    #[must_use]
    pub fn new(errors: Vec<StorageError>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn errors(&self) -> &[StorageError] {
        &self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => Ok(()),
            [single] => write!(f, "{single}"),
            many => {
                f.write_str("[")?;
                for (idx, err) in many.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{err}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl std::error::Error for AggregateError {}

fn io_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> StorageError + 'a {
    move |source| StorageError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Manages artifact files under a local base directory: atomic writes, deterministic
/// archives, verification, locking and retention.
///
/// Writers sharing an artifact path must coordinate through [`Storage::lock`]; the
/// storage itself does not serialize concurrent writes to the same path.
#[derive(Clone, Debug)]
pub struct Storage {
    base_path: PathBuf,
    hostname: String,
    artifact_retention_ttl: Duration,
    artifact_retention_records: usize,
    digest_algorithm: DigestAlgorithm,
    rename_fallback: RenameFallback,
}

impl Storage {
    /// Build the storage from validated options.
    ///
    /// # Errors
    ///
    /// Fails when the advertised address cannot be derived or the storage path is not
    /// an existing directory.
    pub fn new(options: &StorageOptions) -> Result<Self, StorageError> {
        let hostname = options.advertised_address()?;
        match fs::metadata(&options.storage_path) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(StorageError::InvalidDir(options.storage_path.clone())),
        }
        debug!(
            base = %options.storage_path.display(),
            %hostname,
            ttl_secs = options.artifact_retention_ttl.as_secs(),
            records = options.artifact_retention_records,
            "artifact storage ready"
        );
        Ok(Self {
            base_path: options.storage_path.clone(),
            hostname,
            artifact_retention_ttl: options.artifact_retention_ttl,
            artifact_retention_records: options.artifact_retention_records,
            digest_algorithm: options.artifact_digest_algo,
            rename_fallback: RenameFallback::default(),
        })
    }

    /// Choose how renames behave when the temp file and destination live on
    /// different devices.
    #[must_use]
    pub fn with_rename_fallback(mut self, fallback: RenameFallback) -> Self {
        self.rename_fallback = fallback;
        self
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub fn artifact_retention_ttl(&self) -> Duration {
        self.artifact_retention_ttl
    }

    #[must_use]
    pub fn artifact_retention_records(&self) -> usize {
        self.artifact_retention_records
    }

    #[must_use]
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    #[must_use]
    pub fn rename_fallback(&self) -> RenameFallback {
        self.rename_fallback
    }

    /// New artifact record for an object, with its path, revision and URL set.
    pub fn artifact_for<M>(&self, kind: &str, metadata: &M, revision: &str, filename: &str) -> Artifact
    where
        M: ObjectMetadata + ?Sized,
    {
        let mut artifact = Artifact {
            path: artifact_path(kind, metadata.namespace(), metadata.name(), filename),
            revision: revision.to_string(),
            ..Artifact::default()
        };
        self.set_artifact_url(&mut artifact);
        artifact
    }

    /// Derive the artifact URL from the storage hostname. No-op for an empty path.
    pub fn set_artifact_url(&self, artifact: &mut Artifact) {
        if artifact.path.is_empty() {
            return;
        }
        artifact.url = self.url_for(&artifact.path);
    }

    fn url_for(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        if self.hostname.starts_with("http://") || self.hostname.starts_with("https://") {
            format!("{}/{path}", self.hostname)
        } else {
            format!("http://{}/{path}", self.hostname)
        }
    }

    /// Rewrite the host (and port) of `url` to the storage hostname.
    /// Returns `None` when `url` cannot be parsed.
    #[must_use]
    pub fn set_hostname(&self, url: &str) -> Option<String> {
        let mut parsed = url::Url::parse(url).ok()?;
        let authority = self
            .hostname
            .split_once("://")
            .map_or(self.hostname.as_str(), |(_, rest)| rest)
            .trim_end_matches('/');
        let (host, port) = split_authority(authority);
        parsed.set_host(Some(host)).ok()?;
        parsed.set_port(port).ok()?;
        Some(parsed.to_string())
    }

    /// Secure local path of the artifact under the base path.
    ///
    /// `None` for an empty path or a path that would resolve outside the base
    /// directory; callers must treat it as "does not exist".
    #[must_use]
    pub fn local_path(&self, artifact: &Artifact) -> Option<PathBuf> {
        secure_join(&self.base_path, &artifact.path)
    }

    fn resolve(&self, artifact: &Artifact) -> Result<PathBuf, StorageError> {
        self.local_path(artifact)
            .ok_or_else(|| StorageError::InvalidArtifactPath(artifact.path.clone()))
    }

    fn artifact_parent(&self, artifact: &Artifact) -> Result<(PathBuf, PathBuf), StorageError> {
        let local = self.resolve(artifact)?;
        let dir = local
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidArtifactPath(artifact.path.clone()))?;
        Ok((local, dir))
    }

    /// True only when a regular file (not a directory or symlink) sits at the
    /// artifact's local path.
    #[must_use]
    pub fn artifact_exist(&self, artifact: &Artifact) -> bool {
        let Some(path) = self.local_path(artifact) else {
            return false;
        };
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_file())
            .unwrap_or(false)
    }

    /// Create the artifact's parent directory.
    pub fn mkdir_all(&self, artifact: &Artifact) -> Result<(), StorageError> {
        let (_, dir) = self.artifact_parent(artifact)?;
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir).map_err(io_error("create directory", &dir))
    }
}

/// Split `host[:port]`, keeping bracketed IPv6 hosts intact.
fn split_authority(authority: &str) -> (&str, Option<u16>) {
    let port_sep = if authority.starts_with('[') {
        authority.find("]:").map(|idx| idx + 1)
    } else if authority.matches(':').count() == 1 {
        authority.find(':')
    } else {
        None
    };
    match port_sep {
        Some(idx) => match authority[idx + 1..].parse::<u16>() {
            Ok(port) => (&authority[..idx], Some(port)),
            Err(_) => (authority, None),
        },
        None => (authority, None),
    }
}

fn record_write(artifact: &mut Artifact, digest: &Digest, size: u64) {
    artifact.digest = digest.to_string();
    artifact.size = Some(size);
    artifact.last_update_time = Some(OffsetDateTime::now_utc());
}
