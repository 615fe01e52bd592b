use super::*;

use std::sync::mpsc;
use std::thread;

#[test]
fn lock_creates_sidecar_and_excludes_others() -> Result<()> {
    let (_temp, storage) = new_storage()?;
    let artifact = demo_artifact(&storage, "source.tar.gz");

    let guard = storage.lock(&artifact)?;
    let local = storage.local_path(&artifact).expect("path");
    assert_eq!(guard.path(), lock_path_for(&local));
    assert!(guard.path().exists());
    assert!(storage.try_lock(&artifact)?.is_none(), "lock is held");

    guard.unlock()?;
    let again = storage.try_lock(&artifact)?;
    assert!(again.is_some(), "lock is free after unlock");
    Ok(())
}

#[test]
fn dropping_the_guard_releases_the_lock() -> Result<()> {
    let (_temp, storage) = new_storage()?;
    let artifact = demo_artifact(&storage, "source.tar.gz");
    {
        let _guard = storage.lock(&artifact)?;
        assert!(storage.try_lock(&artifact)?.is_none());
    }
    assert!(storage.try_lock(&artifact)?.is_some());
    Ok(())
}

#[test]
fn lock_blocks_until_released() -> Result<()> {
    let (_temp, storage) = new_storage()?;
    let artifact = demo_artifact(&storage, "source.tar.gz");
    let guard = storage.lock(&artifact)?;

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let storage = storage.clone();
        let artifact = artifact.clone();
        thread::spawn(move || -> Result<()> {
            let _guard = storage.lock(&artifact)?;
            tx.send(())?;
            Ok(())
        })
    };

    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "second locker must wait"
    );
    drop(guard);
    rx.recv_timeout(Duration::from_secs(5))?;
    waiter.join().expect("waiter thread")?;
    Ok(())
}

#[test]
fn lock_rejects_unresolvable_paths() -> Result<()> {
    let (_temp, storage) = new_storage()?;
    let err = storage.lock(&Artifact::new("../outside")).unwrap_err();
    assert!(matches!(err, StorageError::InvalidArtifactPath(_)));
    Ok(())
}
