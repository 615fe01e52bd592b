use super::*;

impl Storage {
    /// Recompute the digest of the stored artifact and compare it with the record.
    ///
    /// The file is streamed through the hasher; it is never loaded whole.
    pub fn verify_artifact(&self, artifact: &Artifact) -> Result<(), StorageError> {
        if artifact.digest.is_empty() {
            return Err(StorageError::NoDigest);
        }
        let expected: Digest =
            artifact
                .digest
                .parse()
                .map_err(|source| StorageError::InvalidDigest {
                    digest: artifact.digest.clone(),
                    source,
                })?;

        let local = self.resolve(artifact)?;
        let mut file = File::open(&local).map_err(io_error("open", &local))?;
        let mut digester = Digester::new(expected.algorithm());
        let mut buf = [0u8; 32 * 1024];
        loop {
            let read = file.read(&mut buf).map_err(io_error("read", &local))?;
            if read == 0 {
                break;
            }
            digester.update(&buf[..read]);
        }

        let actual = digester.finalize();
        if actual != expected {
            return Err(StorageError::DigestMismatch {
                digest: artifact.digest.clone(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}
