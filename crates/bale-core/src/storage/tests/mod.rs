//! Storage engine tests, split by topic.

use super::*;
use anyhow::Result;
use filetime::{set_file_mtime, FileTime};
use tempfile::{tempdir, TempDir};

use bale_domain::ObjectKey;

fn options_for(root: &Path) -> StorageOptions {
    StorageOptions {
        storage_path: root.to_path_buf(),
        storage_address: "localhost:9090".to_string(),
        ..StorageOptions::default()
    }
}

fn new_storage() -> Result<(TempDir, Storage)> {
    let temp = tempdir()?;
    let storage = Storage::new(&options_for(temp.path()))?;
    Ok((temp, storage))
}

fn new_storage_with(ttl: Duration, records: usize) -> Result<(TempDir, Storage)> {
    let temp = tempdir()?;
    let options = StorageOptions {
        artifact_retention_ttl: ttl,
        artifact_retention_records: records,
        ..options_for(temp.path())
    };
    let storage = Storage::new(&options)?;
    Ok((temp, storage))
}

fn demo_artifact(storage: &Storage, filename: &str) -> Artifact {
    storage.artifact_for(
        "GitRepository",
        &ObjectKey::new("default", "podinfo"),
        "main@sha1:0123456789abcdef",
        filename,
    )
}

fn artifact_dir_of(storage: &Storage, artifact: &Artifact) -> PathBuf {
    storage
        .local_path(artifact)
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .expect("dir")
}

/// Permission bits do not stop root, so permission-failure tests skip themselves.
#[cfg(unix)]
fn running_as_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    fs::metadata("/proc/self").map(|m| m.uid() == 0).unwrap_or(false)
}

/// Write `contents` at `path` (creating parents) and backdate it by `age`.
fn touch_aged(path: &Path, contents: &[u8], age: Duration) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    let mtime = SystemTime::now() - age;
    set_file_mtime(path, FileTime::from_system_time(mtime))?;
    Ok(())
}

fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(())
}

fn archive_entries(path: &Path) -> Result<Vec<(String, u32)>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        assert_eq!(header.mtime()?, 0);
        assert_eq!(header.uid()?, 0);
        assert_eq!(header.gid()?, 0);
        entries.push((
            entry.path()?.to_string_lossy().trim_end_matches('/').to_string(),
            header.mode()?,
        ));
    }
    Ok(entries)
}

mod lock;
