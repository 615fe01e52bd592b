use super::*;

/// Exclusive advisory lock on an artifact's `.lock` sidecar.
///
/// Released on drop or through [`ArtifactLock::unlock`]. The OS drops the lock when
/// the holding process exits.
#[derive(Debug)]
pub struct ArtifactLock {
    file: Option<File>,
    path: PathBuf,
}

impl ArtifactLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unlock(mut self) -> Result<(), StorageError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            FileExt::unlock(&file).map_err(io_error("unlock", &self.path))?;
            debug!(path = %self.path.display(), "artifact lock released");
        }
        Ok(())
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "failed to release artifact lock");
        }
    }
}

impl Storage {
    fn open_lock_file(&self, artifact: &Artifact) -> Result<(File, PathBuf), StorageError> {
        let local = self.resolve(artifact)?;
        let path = lock_path_for(&local);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error("create lock directory", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_error("open lock", &path))?;
        Ok((file, path))
    }

    /// Block until the artifact's lock is held exclusively.
    pub fn lock(&self, artifact: &Artifact) -> Result<ArtifactLock, StorageError> {
        let (file, path) = self.open_lock_file(artifact)?;
        file.lock_exclusive().map_err(io_error("lock", &path))?;
        debug!(path = %path.display(), "artifact lock acquired");
        Ok(ArtifactLock {
            file: Some(file),
            path,
        })
    }

    /// Take the artifact's lock if nobody else holds it.
    pub fn try_lock(&self, artifact: &Artifact) -> Result<Option<ArtifactLock>, StorageError> {
        let (file, path) = self.open_lock_file(artifact)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(ArtifactLock {
                file: Some(file),
                path,
            })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(StorageError::Io {
                action: "lock",
                path,
                source: err,
            }),
        }
    }
}
