use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use bale_core::{
    Artifact, ObjectKey, SourceIgnoreFilter, Storage, StorageError, GARBAGE_COUNT_LIMIT,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cli::{ArchiveArgs, Command, GcArgs, PutArgs, RemoveArgs, StorageArgs, VerifyArgs};
use crate::output::ExecutionOutcome;

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Archive(_) => "archive",
            Command::Put(_) => "put",
            Command::Verify(_) => "verify",
            Command::Gc(_) => "gc",
            Command::Remove(_) => "remove",
            Command::Exists(_) => "exists",
        }
    }
}

/// Run `command`, mapping every failure into an outcome with the right status.
pub fn execute(storage_args: &StorageArgs, command: &Command) -> ExecutionOutcome {
    let result = Storage::new(&storage_args.options())
        .map_err(anyhow::Error::from)
        .and_then(|storage| run(&storage, command));
    match result {
        Ok(outcome) => outcome,
        Err(err) => outcome_from_error(&err),
    }
}

fn run(storage: &Storage, command: &Command) -> Result<ExecutionOutcome> {
    match command {
        Command::Archive(args) => archive(storage, args),
        Command::Put(args) => put(storage, args),
        Command::Verify(args) => verify(storage, args),
        Command::Gc(args) => gc(storage, args),
        Command::Remove(args) => remove(storage, args),
        Command::Exists(args) => Ok(exists(storage, &args.path)),
    }
}

fn outcome_from_error(err: &anyhow::Error) -> ExecutionOutcome {
    let message = format!("{err:#}");
    let Some(storage_err) = err.downcast_ref::<StorageError>() else {
        return ExecutionOutcome::failure(message, json!({ "reason": "internal" }));
    };
    let (reason, user_error) = match storage_err {
        StorageError::InvalidDir(_) => ("invalid_dir", true),
        StorageError::InvalidAddress { .. } => ("invalid_address", true),
        StorageError::InvalidArtifactPath(_) => ("invalid_artifact_path", true),
        StorageError::InvalidSubPath(_) => ("invalid_sub_path", true),
        StorageError::InvalidIgnorePattern { .. } => ("invalid_ignore_pattern", true),
        StorageError::NoDigest => ("no_digest", true),
        StorageError::InvalidDigest { .. } => ("invalid_digest", true),
        err if err.is_not_found() => ("not_found", true),
        StorageError::DigestMismatch { .. } => ("digest_mismatch", false),
        StorageError::DeadlineExceeded => ("deadline_exceeded", false),
        _ => ("storage_error", false),
    };
    let details = json!({ "reason": reason });
    if user_error {
        ExecutionOutcome::user_error(message, details)
    } else {
        ExecutionOutcome::failure(message, details)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn artifact_value(artifact: &Artifact) -> Result<Value> {
    serde_json::to_value(artifact).context("failed to serialize artifact")
}

fn lookup(storage: &Storage, path: &str) -> Artifact {
    let mut artifact = Artifact::new(path);
    storage.set_artifact_url(&mut artifact);
    artifact
}

fn archive(storage: &Storage, args: &ArchiveArgs) -> Result<ExecutionOutcome> {
    let mut patterns = args.ignore.clone();
    if let Some(path) = &args.ignore_file {
        let file = File::open(path)
            .with_context(|| format!("failed to open ignore file {}", path.display()))?;
        let extra = SourceIgnoreFilter::read_patterns(BufReader::new(file))
            .with_context(|| format!("failed to read ignore file {}", path.display()))?;
        patterns.extend(extra);
    }
    let filter = SourceIgnoreFilter::new(&patterns, &[])?;

    let key = ObjectKey::new(&args.object.namespace, &args.object.name);
    let mut artifact = storage.artifact_for(
        &args.object.kind,
        &key,
        &args.object.revision,
        &args.filename,
    );
    storage.mkdir_all(&artifact)?;
    {
        let _lock = storage.lock(&artifact)?;
        storage.archive(&mut artifact, &args.dir, Some(&filter))?;
    }

    let mut details = json!({ "artifact": artifact_value(&artifact)? });
    if let Some(link) = &args.link {
        details["link"] = json!(link_url(storage, &artifact, link)?);
    }
    if !args.no_gc {
        match runtime()?.block_on(storage.garbage_collect(&artifact, args.gc_timeout)) {
            Ok(deleted) => details["deleted"] = json!(deleted),
            Err(err) => {
                warn!(%err, path = %artifact.path, "garbage collection failed");
                details["gc_error"] = json!(err.to_string());
            }
        }
    }
    Ok(ExecutionOutcome::success(
        format!("archived {} ({})", artifact.path, artifact.digest),
        details,
    ))
}

#[cfg(unix)]
fn link_url(storage: &Storage, artifact: &Artifact, link: &str) -> Result<String> {
    Ok(storage.symlink(artifact, link)?)
}

#[cfg(not(unix))]
fn link_url(_storage: &Storage, _artifact: &Artifact, _link: &str) -> Result<String> {
    anyhow::bail!("symlinks are only supported on unix")
}

fn put(storage: &Storage, args: &PutArgs) -> Result<ExecutionOutcome> {
    let filename = match &args.filename {
        Some(name) => name.clone(),
        None => file_name(&args.file)?,
    };
    let key = ObjectKey::new(&args.object.namespace, &args.object.name);
    let mut artifact =
        storage.artifact_for(&args.object.kind, &key, &args.object.revision, &filename);
    storage.mkdir_all(&artifact)?;
    {
        let _lock = storage.lock(&artifact)?;
        storage.copy_from_path(&mut artifact, &args.file)?;
    }
    Ok(ExecutionOutcome::success(
        format!("stored {} ({})", artifact.path, artifact.digest),
        json!({ "artifact": artifact_value(&artifact)? }),
    ))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn verify(storage: &Storage, args: &VerifyArgs) -> Result<ExecutionOutcome> {
    let mut artifact = lookup(storage, &args.path);
    artifact.digest = args.digest.clone();
    storage.verify_artifact(&artifact)?;
    Ok(ExecutionOutcome::success(
        format!("{} matches {}", artifact.path, artifact.digest),
        json!({ "path": artifact.path, "digest": artifact.digest }),
    ))
}

fn gc(storage: &Storage, args: &GcArgs) -> Result<ExecutionOutcome> {
    let artifact = lookup(storage, &args.path);
    debug!(
        path = %artifact.path,
        limit = GARBAGE_COUNT_LIMIT,
        ttl_secs = storage.artifact_retention_ttl().as_secs(),
        records = storage.artifact_retention_records(),
        "collecting garbage"
    );
    let deleted = runtime()?.block_on(storage.garbage_collect(&artifact, args.timeout))?;
    Ok(ExecutionOutcome::success(
        format!("removed {} file(s)", deleted.len()),
        json!({ "deleted": deleted }),
    ))
}

fn remove(storage: &Storage, args: &RemoveArgs) -> Result<ExecutionOutcome> {
    let artifact = lookup(storage, &args.path);
    if args.all {
        let removed = storage.remove_all(&artifact)?;
        let message = match &removed {
            Some(dir) => format!("removed {}", dir.display()),
            None => "nothing to remove".to_string(),
        };
        return Ok(ExecutionOutcome::success(message, json!({ "removed": removed })));
    }
    if args.all_but_current {
        return match storage.remove_all_but_current(&artifact) {
            Ok(deleted) => Ok(ExecutionOutcome::success(
                format!("removed {} file(s)", deleted.len()),
                json!({ "deleted": deleted }),
            )),
            Err(StorageError::RemoveFiles { failed, deleted }) => Ok(ExecutionOutcome::failure(
                format!("failed to remove files: {}", failed.join(" ")),
                json!({ "deleted": deleted, "failed": failed, "reason": "partial_removal" }),
            )),
            Err(err) => Err(err.into()),
        };
    }
    storage.remove(&artifact)?;
    Ok(ExecutionOutcome::success(
        format!("removed {}", artifact.path),
        json!({ "path": artifact.path }),
    ))
}

fn exists(storage: &Storage, path: &str) -> ExecutionOutcome {
    let artifact = lookup(storage, path);
    let local = storage.local_path(&artifact);
    let found = storage.artifact_exist(&artifact);
    let details = json!({
        "exists": found,
        "path": artifact.path,
        "local_path": local,
        "url": artifact.url,
    });
    if found {
        ExecutionOutcome::success(format!("{path} exists"), details)
    } else {
        ExecutionOutcome::user_error(format!("{path} not found"), details)
    }
}
