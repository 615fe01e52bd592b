use super::*;

/// Mode of directory entries in archives.
pub const DEFAULT_DIR_MODE: u32 = 0o750;
/// Mode of regular file entries in archives, and of archives themselves.
pub const DEFAULT_FILE_MODE: u32 = 0o600;
/// Mode of file entries that had any executable bit set.
pub const DEFAULT_EXE_FILE_MODE: u32 = 0o700;

/// Decides which source entries are left out of an archive.
///
/// `rel_path` is relative to the archived directory. Excluding a directory prunes
/// everything below it.
pub trait ArchiveFilter {
    fn excludes(&self, rel_path: &Path, is_dir: bool) -> bool;
}

impl<F> ArchiveFilter for F
where
    F: Fn(&Path, bool) -> bool,
{
    fn excludes(&self, rel_path: &Path, is_dir: bool) -> bool {
        self(rel_path, is_dir)
    }
}

fn normalize_entry_name(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Yields exactly `expected` bytes of `inner`, failing if it ends early or has more.
///
/// The tar header size is fixed before the copy, so a file that changes size while
/// being archived would otherwise produce a padded or truncated entry.
struct ExactSize<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactSize<R> {
    fn new(inner: R, expected: u64) -> Self {
        Self {
            inner,
            remaining: expected,
        }
    }
}

impl<R: Read> Read for ExactSize<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "file grew while being archived",
                )),
            };
        }
        let limit = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let read = self.inner.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "file shrank while being archived",
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Header with ownership, timestamps and permissions normalized so the archive
/// only depends on entry names and content.
fn sanitized_header(metadata: &fs::Metadata) -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    // Empty names always fit the header fields.
    header.set_username("").ok();
    header.set_groupname("").ok();
    if metadata.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(DEFAULT_DIR_MODE);
        header.set_size(0);
    } else {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(if is_executable(metadata) {
            DEFAULT_EXE_FILE_MODE
        } else {
            DEFAULT_FILE_MODE
        });
        header.set_size(metadata.len());
    }
    header
}

fn write_tree<W: Write>(
    source_dir: &Path,
    filter: Option<&dyn ArchiveFilter>,
    writer: W,
) -> Result<W, StorageError> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let walker = walkdir::WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let Some(filter) = filter else {
                return true;
            };
            let rel = entry.path().strip_prefix(source_dir).unwrap_or(entry.path());
            !filter.excludes(rel, entry.file_type().is_dir())
        });

    for entry in walker {
        let entry = entry.map_err(|err| StorageError::Walk(err.to_string()))?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(source_dir)
            .map_err(|err| StorageError::Walk(err.to_string()))?;
        let name = normalize_entry_name(rel);
        let metadata = entry
            .metadata()
            .map_err(|err| StorageError::Walk(err.to_string()))?;
        let mut header = sanitized_header(&metadata);
        if file_type.is_dir() {
            builder
                .append_data(&mut header, &name, io::empty())
                .map_err(io_error("archive", path))?;
        } else {
            let file = File::open(path).map_err(io_error("open", path))?;
            builder
                .append_data(&mut header, &name, ExactSize::new(file, metadata.len()))
                .map_err(io_error("archive", path))?;
        }
    }

    builder.finish().map_err(io_error("finish archive of", source_dir))?;
    let encoder = builder
        .into_inner()
        .map_err(io_error("finish archive of", source_dir))?;
    encoder
        .finish()
        .map_err(io_error("compress archive of", source_dir))
}

impl Storage {
    /// Write a deterministic tar+gzip archive of `source_dir` to the artifact path.
    ///
    /// Entries are added in lexical order with zeroed ownership and timestamps and one
    /// of three fixed modes, so the digest depends only on relative names and content.
    /// Symlinks and special files are skipped. Entries for which `filter` returns true
    /// are left out.
    pub fn archive(
        &self,
        artifact: &mut Artifact,
        source_dir: &Path,
        filter: Option<&dyn ArchiveFilter>,
    ) -> Result<(), StorageError> {
        match fs::metadata(source_dir) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(StorageError::InvalidDir(source_dir.to_path_buf())),
        }

        let (local, _) = self.artifact_parent(artifact)?;
        let staged = stage(&local)?;
        let writer = HashingWriter::new(staged, self.digest_algorithm);
        let writer = write_tree(source_dir, filter, writer)?;
        let (staged, digest, size) = writer.into_parts();
        self.commit_staged(staged, &local, Some(DEFAULT_FILE_MODE))?;

        debug!(
            source = %source_dir.display(),
            path = %local.display(),
            digest = %digest,
            size,
            "archive written"
        );
        record_write(artifact, &digest, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(data: &[u8], expected: u64) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        ExactSize::new(data, expected).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn exact_size_passes_matching_content() {
        assert_eq!(drain(b"abc", 3).unwrap(), b"abc");
        assert!(drain(b"", 0).unwrap().is_empty());
    }

    #[test]
    fn exact_size_rejects_shrunk_and_grown_files() {
        let short = drain(b"abc", 5).unwrap_err();
        assert_eq!(short.kind(), ErrorKind::UnexpectedEof);
        let long = drain(b"abcdef", 5).unwrap_err();
        assert_eq!(long.kind(), ErrorKind::InvalidData);
    }
}
