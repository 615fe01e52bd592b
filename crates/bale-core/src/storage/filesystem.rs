use super::*;

impl Storage {
    /// Delete the artifact file. A missing file is an error (see
    /// [`StorageError::is_not_found`]).
    pub fn remove(&self, artifact: &Artifact) -> Result<(), StorageError> {
        let local = self.resolve(artifact)?;
        fs::remove_file(&local).map_err(io_error("remove", &local))?;
        debug!(path = %local.display(), "artifact removed");
        Ok(())
    }

    /// Delete the artifact's whole directory.
    ///
    /// Returns the removed directory, or `None` when it did not exist.
    pub fn remove_all(&self, artifact: &Artifact) -> Result<Option<PathBuf>, StorageError> {
        let (_, dir) = self.artifact_parent(artifact)?;
        if dir == self.base_path {
            return Err(StorageError::InvalidArtifactPath(artifact.path.clone()));
        }
        match fs::symlink_metadata(&dir) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error("stat", &dir)(err)),
        }
        fs::remove_dir_all(&dir).map_err(io_error("remove", &dir))?;
        debug!(dir = %dir.display(), "artifact directory removed");
        Ok(Some(dir))
    }

    /// Delete every file in the artifact's directory tree except the artifact itself.
    ///
    /// Directories and symlinks are left alone. Failures do not stop the sweep: they
    /// are collected into [`StorageError::RemoveFiles`], which also carries the paths
    /// that were deleted.
    pub fn remove_all_but_current(&self, artifact: &Artifact) -> Result<Vec<PathBuf>, StorageError> {
        let (local, dir) = self.artifact_parent(artifact)?;
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        for entry in walkdir::WalkDir::new(&dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let name = err
                        .path()
                        .and_then(Path::file_name)
                        .map_or_else(|| err.to_string(), |n| n.to_string_lossy().into_owned());
                    failed.push(name);
                    continue;
                }
            };
            let file_type = entry.file_type();
            if entry.path() == local || file_type.is_dir() || file_type.is_symlink() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => deleted.push(entry.path().to_path_buf()),
                Err(err) => {
                    debug!(path = %entry.path().display(), %err, "failed to remove file");
                    failed.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }

        if failed.is_empty() {
            Ok(deleted)
        } else {
            Err(StorageError::RemoveFiles { failed, deleted })
        }
    }

    /// Point `<artifact dir>/<link_name>` at the artifact, replacing any existing link
    /// atomically. Returns the URL of the link.
    #[cfg(unix)]
    pub fn symlink(&self, artifact: &Artifact, link_name: &str) -> Result<String, StorageError> {
        if link_name.is_empty() || link_name.contains(['/', '\\']) || link_name == "." || link_name == ".." {
            return Err(StorageError::InvalidSubPath(link_name.to_string()));
        }
        let (local, dir) = self.artifact_parent(artifact)?;
        let link = dir.join(link_name);
        let staged = dir.join(format!("{link_name}.tmp"));
        match fs::remove_file(&staged) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_error("remove", &staged)(err)),
        }
        std::os::unix::fs::symlink(&local, &staged).map_err(io_error("create link", &staged))?;
        if let Err(err) = fs::rename(&staged, &link) {
            let _ = fs::remove_file(&staged);
            return Err(io_error("rename into", &link)(err));
        }

        let link_path = match artifact.path.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{link_name}"),
            None => link_name.to_string(),
        };
        Ok(self.url_for(&link_path))
    }

    /// Extract the tar+gzip artifact and move `sub_path` of its content to `to_path`.
    ///
    /// An empty `sub_path` selects the whole tree. Entries that would land outside the
    /// extraction directory are rejected.
    pub fn copy_to_path(
        &self,
        artifact: &Artifact,
        sub_path: &str,
        to_path: &Path,
    ) -> Result<(), StorageError> {
        let local = self.resolve(artifact)?;
        let file = File::open(&local).map_err(io_error("open", &local))?;
        let scratch = tempfile::Builder::new()
            .prefix("bale-")
            .tempdir()
            .map_err(io_error("create temp dir for", &local))?;

        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let entries = archive.entries().map_err(io_error("read archive", &local))?;
        for entry in entries {
            let mut entry = entry.map_err(io_error("read archive", &local))?;
            let name = entry.path().map_or_else(
                |_| String::from("<invalid>"),
                |p| p.to_string_lossy().into_owned(),
            );
            let unpacked = entry
                .unpack_in(scratch.path())
                .map_err(io_error("extract archive", &local))?;
            if !unpacked {
                return Err(StorageError::UnsafeArchiveEntry { entry: name });
            }
        }

        let from = join_within(scratch.path(), sub_path)
            .ok_or_else(|| StorageError::InvalidSubPath(sub_path.to_string()))?;
        fs::symlink_metadata(&from).map_err(io_error("copy from", &from))?;
        if let Some(parent) = to_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error("create directory", parent))?;
        }
        rename_with_fallback(&from, to_path, self.rename_fallback)?;
        debug!(
            artifact = %local.display(),
            sub_path,
            to = %to_path.display(),
            "artifact content copied"
        );
        Ok(())
    }
}
