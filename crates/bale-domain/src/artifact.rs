use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Record describing a stored artifact.
///
/// `path` is relative to the storage root and slash-separated. After any successful
/// write, `digest`, `size` and `last_update_time` describe the bytes currently at
/// `path`. `url` is derived from the storage hostname and never authoritative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_update_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Whether this record carries `revision`.
    pub fn has_revision(&self, revision: &str) -> bool {
        !self.revision.is_empty() && self.revision == revision
    }

    /// Whether this record carries the same digest as `digest`.
    pub fn has_digest(&self, digest: &str) -> bool {
        !self.digest.is_empty() && self.digest == digest
    }

    /// The final path segment, if any.
    pub fn filename(&self) -> Option<&str> {
        self.path.rsplit('/').find(|segment| !segment.is_empty())
    }
}

/// Namespace/name identity of the object an artifact belongs to.
pub trait ObjectMetadata {
    fn namespace(&self) -> &str;
    fn name(&self) -> &str;
}

/// Plain [`ObjectMetadata`] implementation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl ObjectMetadata for ObjectKey {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn serializes_camel_case_and_skips_empty_fields() {
        let artifact = Artifact {
            path: "gitrepository/default/app/source.tar.gz".into(),
            revision: "main@sha1:abcd".into(),
            last_update_time: Some(datetime!(2024-01-02 03:04:05 UTC)),
            size: Some(42),
            ..Artifact::default()
        };
        let value = serde_json::to_value(&artifact).expect("serialize");
        assert_eq!(value["lastUpdateTime"], "2024-01-02T03:04:05Z");
        assert_eq!(value["size"], 42);
        assert!(value.get("digest").is_none(), "empty digest is omitted");
        assert!(value.get("url").is_none(), "empty url is omitted");

        let back: Artifact = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, artifact);
    }

    #[test]
    fn filename_is_last_segment() {
        assert_eq!(
            Artifact::new("bucket/ns/name/data.tgz").filename(),
            Some("data.tgz")
        );
        assert_eq!(Artifact::new("").filename(), None);
    }

    #[test]
    fn revision_and_digest_matching_ignores_empty() {
        let artifact = Artifact::new("a/b/c");
        assert!(!artifact.has_revision(""));
        assert!(!artifact.has_digest(""));
    }
}
