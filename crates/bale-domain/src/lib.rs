#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod artifact;
pub mod digest;
pub mod path;

pub use artifact::{Artifact, ObjectKey, ObjectMetadata};
pub use digest::{Digest, DigestAlgorithm, DigestParseError};
pub use path::{artifact_dir, artifact_path, clean_slash_path};
