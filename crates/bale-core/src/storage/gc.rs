use super::*;

/// Most candidate files [`Storage::garbage_collect`] is willing to scan next to an
/// artifact.
pub const GARBAGE_COUNT_LIMIT: usize = 1000;

/// Deadline and cancellation shared between a collection and its caller.
#[derive(Clone, Debug, Default)]
struct GcControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl GcControl {
    fn check(&self) -> Result<(), StorageError> {
        let expired = self.deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if expired || self.cancelled.load(Ordering::Relaxed) {
            return Err(StorageError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Raises the cancel flag when the collection future goes away, finished or not.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

struct Candidate {
    path: PathBuf,
    modified: SystemTime,
}

impl Storage {
    /// Files next to `artifact` that retention allows deleting.
    ///
    /// Scans the artifact's directory (direct children only, lock files excluded) and
    /// fails without partial results on any walk error or once more than
    /// `total_count_limit` candidates are seen. Files older than `ttl` are garbage;
    /// beyond that the oldest are added until at most `max_items_to_be_retained`
    /// remain. The artifact's own file is never garbage.
    pub fn garbage_files(
        &self,
        artifact: &Artifact,
        total_count_limit: usize,
        max_items_to_be_retained: usize,
        ttl: Duration,
    ) -> Result<Vec<PathBuf>, StorageError> {
        self.scan_garbage(
            artifact,
            total_count_limit,
            max_items_to_be_retained,
            ttl,
            &GcControl::default(),
        )
    }

    fn scan_garbage(
        &self,
        artifact: &Artifact,
        total_count_limit: usize,
        max_items_to_be_retained: usize,
        ttl: Duration,
        control: &GcControl,
    ) -> Result<Vec<PathBuf>, StorageError> {
        control.check()?;
        let (local, dir) = self.artifact_parent(artifact)?;
        let now = SystemTime::now();

        let mut candidates = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|err| StorageError::Walk(err.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().ends_with(".lock") {
                continue;
            }
            if candidates.len() >= total_count_limit {
                return Err(StorageError::WalkLimit {
                    limit: total_count_limit,
                });
            }
            let modified = entry
                .metadata()
                .map_err(|err| StorageError::Walk(err.to_string()))?
                .modified()
                .map_err(|err| StorageError::Walk(format!("{}: {err}", entry.path().display())))?;
            candidates.push(Candidate {
                path: entry.into_path(),
                modified,
            });
        }

        let mut marked = vec![false; candidates.len()];
        let mut garbage = Vec::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            let age = now.duration_since(candidate.modified).unwrap_or_default();
            if age > ttl && candidate.path != local {
                marked[idx] = true;
                garbage.push(candidate.path.clone());
            }
        }

        let mut remaining = candidates.len() - garbage.len();
        if remaining <= max_items_to_be_retained {
            return Ok(garbage);
        }

        let mut by_age: Vec<usize> = (0..candidates.len()).collect();
        by_age.sort_by_key(|&idx| candidates[idx].modified);
        for idx in by_age {
            if remaining <= max_items_to_be_retained {
                break;
            }
            if marked[idx] || candidates[idx].path == local {
                continue;
            }
            marked[idx] = true;
            garbage.push(candidates[idx].path.clone());
            remaining -= 1;
        }
        Ok(garbage)
    }

    fn collect_garbage(&self, artifact: &Artifact, control: &GcControl) -> Result<Vec<PathBuf>, StorageError> {
        let garbage = self.scan_garbage(
            artifact,
            GARBAGE_COUNT_LIMIT,
            self.artifact_retention_records,
            self.artifact_retention_ttl,
            control,
        )?;

        let mut deleted = Vec::with_capacity(garbage.len());
        let mut errors = Vec::new();
        for path in garbage {
            control.check()?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "garbage already removed");
                    continue;
                }
                Err(err) => {
                    errors.push(StorageError::Io {
                        action: "remove",
                        path,
                        source: err,
                    });
                    continue;
                }
            }
            let lock = lock_path_for(&path);
            match fs::remove_file(&lock) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %lock.display(), %err, "failed to remove lock file"),
            }
            deleted.push(path);
        }

        if !errors.is_empty() {
            warn!(failed = errors.len(), "garbage collection could not remove some files");
            return Err(AggregateError::new(errors).into());
        }
        debug!(
            artifact = %artifact.path,
            deleted = deleted.len(),
            "garbage collection complete"
        );
        Ok(deleted)
    }

    /// Delete the garbage next to `artifact` using the configured retention policy.
    ///
    /// The scan and deletions run on the blocking pool. Once `timeout` elapses this
    /// returns [`StorageError::DeadlineExceeded`], and the background work stops
    /// before its next deletion. Dropping the future stops it the same way.
    pub async fn garbage_collect(
        &self,
        artifact: &Artifact,
        timeout: Duration,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let control = GcControl {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let _cancel = CancelOnDrop(Arc::clone(&control.cancelled));

        let storage = self.clone();
        let artifact = artifact.clone();
        let worker = control.clone();
        let task = tokio::task::spawn_blocking(move || storage.collect_garbage(&artifact, &worker));

        let joined = match control.deadline {
            Some(deadline) => {
                tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), task)
                    .await
                    .map_err(|_| StorageError::DeadlineExceeded)?
            }
            None => task.await,
        };
        joined.map_err(|err| StorageError::Task(err.to_string()))?
    }
}
