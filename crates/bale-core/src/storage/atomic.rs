use super::*;

/// What to do when an atomic rename fails because source and destination live on
/// different devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenameFallback {
    /// Copy the data over and delete the source. The write is no longer atomic.
    #[default]
    CopyAcrossDevices,
    /// Return the rename error.
    Disabled,
}

/// How a staged file reached its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenameOutcome {
    Atomic,
    Copied,
}

/// Tees written bytes into a [`Digester`] and counts them.
pub(super) struct HashingWriter<W> {
    inner: W,
    digester: Digester,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub(super) fn new(inner: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            digester: Digester::new(algorithm),
            written: 0,
        }
    }

    pub(super) fn into_parts(self) -> (W, Digest, u64) {
        (self.inner, self.digester.finalize(), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.digester.update(&buf[..written]);
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Create a temp file next to `dest` so the final rename stays on one filesystem.
pub(super) fn stage(dest: &Path) -> Result<NamedTempFile, StorageError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut prefix = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    prefix.push('.');
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_error("create temp file in", dir))
}

pub(super) fn rename_with_fallback(
    from: &Path,
    to: &Path,
    fallback: RenameFallback,
) -> Result<RenameOutcome, StorageError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(RenameOutcome::Atomic),
        Err(err)
            if err.kind() == ErrorKind::CrossesDevices
                && fallback == RenameFallback::CopyAcrossDevices =>
        {
            warn!(
                from = %from.display(),
                to = %to.display(),
                "rename crosses devices, copying instead; the write is not atomic"
            );
            copy_then_remove(from, to)?;
            Ok(RenameOutcome::Copied)
        }
        Err(err) => Err(StorageError::Io {
            action: "rename into",
            path: to.to_path_buf(),
            source: err,
        }),
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> Result<(), StorageError> {
    let meta = fs::symlink_metadata(from).map_err(io_error("stat", from))?;
    if !meta.is_dir() {
        fs::copy(from, to).map_err(io_error("copy into", to))?;
        return fs::remove_file(from).map_err(io_error("remove", from));
    }
    for entry in walkdir::WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|err| StorageError::Walk(err.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|err| StorageError::Walk(err.to_string()))?;
        let target = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(io_error("create directory", &target))?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link = fs::read_link(entry.path()).map_err(io_error("read link", entry.path()))?;
                std::os::unix::fs::symlink(link, &target).map_err(io_error("create link", &target))?;
            }
        } else {
            fs::copy(entry.path(), &target).map_err(io_error("copy into", &target))?;
        }
    }
    fs::remove_dir_all(from).map_err(io_error("remove", from))
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_error("chmod", path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), StorageError> {
    Ok(())
}

impl Storage {
    /// Flush a staged temp file, optionally chmod it, and move it over `dest`.
    /// The temp file is deleted on any failure.
    pub(super) fn commit_staged(
        &self,
        staged: NamedTempFile,
        dest: &Path,
        mode: Option<u32>,
    ) -> Result<RenameOutcome, StorageError> {
        staged
            .as_file()
            .sync_all()
            .map_err(io_error("flush", staged.path()))?;
        let temp_path = staged.into_temp_path();
        if let Some(mode) = mode {
            set_mode(&temp_path, mode)?;
        }
        let outcome = rename_with_fallback(&temp_path, dest, self.rename_fallback)?;
        // Already moved; nothing left to clean up.
        let _ = temp_path.keep();
        if let Some(parent) = dest.parent() {
            fsync_dir(parent).ok();
        }
        Ok(outcome)
    }

    fn write_streamed<R: Read>(
        &self,
        artifact: &mut Artifact,
        mut reader: R,
        mode: Option<u32>,
    ) -> Result<(), StorageError> {
        let (local, _) = self.artifact_parent(artifact)?;
        let staged = stage(&local)?;
        let mut writer = HashingWriter::new(staged, self.digest_algorithm);
        io::copy(&mut reader, &mut writer).map_err(io_error("write", &local))?;
        let (staged, digest, size) = writer.into_parts();
        let outcome = self.commit_staged(staged, &local, mode)?;
        debug!(
            path = %local.display(),
            digest = %digest,
            size,
            atomic = outcome == RenameOutcome::Atomic,
            "artifact written"
        );
        record_write(artifact, &digest, size);
        Ok(())
    }

    /// Atomically write `reader` to the artifact path and chmod the result to `mode`.
    ///
    /// The artifact's parent directory must exist. On success `digest`, `size` and
    /// `last_update_time` describe the new content.
    pub fn atomic_write_file<R: Read>(
        &self,
        artifact: &mut Artifact,
        reader: R,
        mode: u32,
    ) -> Result<(), StorageError> {
        self.write_streamed(artifact, reader, Some(mode))
    }

    /// Atomically write `reader` to the artifact path, keeping the temp file's mode.
    pub fn copy<R: Read>(&self, artifact: &mut Artifact, reader: R) -> Result<(), StorageError> {
        self.write_streamed(artifact, reader, None)
    }

    /// [`Storage::copy`] from a local file.
    pub fn copy_from_path(&self, artifact: &mut Artifact, path: &Path) -> Result<(), StorageError> {
        let file = File::open(path).map_err(io_error("open", path))?;
        self.copy(artifact, file)
    }
}
