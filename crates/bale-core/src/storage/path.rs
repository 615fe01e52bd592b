use super::*;

use std::ffi::OsString;

/// Join a slash-separated `path` under `base` without ever leaving it.
///
/// `..` segments are resolved lexically and may not climb above `base`. Every existing
/// component that is a symlink, the final one included, must canonicalize to
/// somewhere inside the canonical `base`. An empty result (the base itself) is
/// returned as `base`.
pub(super) fn join_within(base: &Path, path: &str) -> Option<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let mut joined = base.to_path_buf();
    if segments.is_empty() {
        return Some(joined);
    }
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    for segment in segments {
        joined.push(segment);
        if !link_stays_within(&joined, &canonical_base) {
            return None;
        }
    }
    Some(joined)
}

/// False when `path` is a symlink that is dangling or resolves outside `canonical_base`.
fn link_stays_within(path: &Path, canonical_base: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => path
            .canonicalize()
            .is_ok_and(|target| target.starts_with(canonical_base)),
        _ => true,
    }
}

/// Like [`join_within`], but a path that resolves to `base` itself is rejected.
pub(super) fn secure_join(base: &Path, path: &str) -> Option<PathBuf> {
    let joined = join_within(base, path)?;
    (joined != base).then_some(joined)
}

/// `<path>.lock`, the advisory lock sidecar of an artifact file.
pub(super) fn lock_path_for(path: &Path) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(".lock");
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn joins_nested_paths() {
        let base = Path::new("/srv/data");
        assert_eq!(
            secure_join(base, "gitrepository/default/app/a.tar.gz"),
            Some(base.join("gitrepository/default/app/a.tar.gz"))
        );
        assert_eq!(
            secure_join(base, "/bucket//ns/./name/b.tgz"),
            Some(base.join("bucket/ns/name/b.tgz"))
        );
        assert_eq!(
            secure_join(base, "a/b/../c"),
            Some(base.join("a/c"))
        );
    }

    #[test]
    fn rejects_escapes_and_empty_paths() {
        let base = Path::new("/srv/data");
        assert_eq!(secure_join(base, ""), None);
        assert_eq!(secure_join(base, "."), None);
        assert_eq!(secure_join(base, "a/.."), None);
        assert_eq!(secure_join(base, "../etc/passwd"), None);
        assert_eq!(secure_join(base, "a/../../etc/passwd"), None);
        assert_eq!(join_within(base, ""), Some(base.to_path_buf()));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_directories_leaving_the_base() {
        let outside = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let base = temp.path().join("base");
        fs::create_dir_all(base.join("inner")).unwrap();
        std::os::unix::fs::symlink(outside.path(), base.join("escape")).unwrap();
        std::os::unix::fs::symlink(base.join("inner"), base.join("alias")).unwrap();

        assert_eq!(secure_join(&base, "escape/file"), None);
        assert_eq!(
            secure_join(&base, "alias/file"),
            Some(base.join("alias/file"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn rejects_final_symlinks_leaving_the_base() {
        let outside = tempdir().unwrap();
        let secret = outside.path().join("secret");
        fs::write(&secret, b"outside").unwrap();
        let temp = tempdir().unwrap();
        let base = temp.path().join("base");
        let dir = base.join("gitrepository/default/podinfo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("source.tar.gz"), b"inside").unwrap();
        std::os::unix::fs::symlink(&secret, dir.join("leak")).unwrap();
        std::os::unix::fs::symlink(dir.join("source.tar.gz"), dir.join("latest")).unwrap();
        std::os::unix::fs::symlink(base.join("missing"), dir.join("dangling")).unwrap();

        assert_eq!(secure_join(&base, "gitrepository/default/podinfo/leak"), None);
        assert_eq!(secure_join(&base, "gitrepository/default/podinfo/dangling"), None);
        assert_eq!(
            secure_join(&base, "gitrepository/default/podinfo/latest"),
            Some(dir.join("latest"))
        );
    }

    #[test]
    fn lock_sidecar_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/a/b/c.tar.gz")),
            PathBuf::from("/data/a/b/c.tar.gz.lock")
        );
    }
}
