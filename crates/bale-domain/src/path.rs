/// Directory of an object's artifacts, relative to the storage root:
/// `<kind-lowercase>/<namespace>/<name>`.
pub fn artifact_dir(kind: &str, namespace: &str, name: &str) -> String {
    let kind = kind.to_lowercase();
    join_segments(&[kind.as_str(), namespace, name])
}

/// Artifact file path relative to the storage root:
/// `<kind-lowercase>/<namespace>/<name>/<filename>`. An empty filename yields the
/// directory itself.
pub fn artifact_path(kind: &str, namespace: &str, name: &str, filename: &str) -> String {
    let dir = artifact_dir(kind, namespace, name);
    join_segments(&[dir.as_str(), filename])
}

fn join_segments(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .filter(|segment| !segment.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return joined;
    }
    clean_slash_path(&joined)
}

/// Lexically clean a slash-separated path: collapse repeated separators, drop `.`
/// segments and resolve `..` against preceding segments. Leading `..` segments of a
/// relative path are kept; a rooted path never climbs above `/`.
pub fn clean_slash_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if rooted => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    let body = out.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dir_lowercases_kind() {
        let cases = [
            ("GitRepository", "default", "test-repo", "gitrepository/default/test-repo"),
            ("HelmRepository", "kube-system", "bitnami", "helmrepository/kube-system/bitnami"),
            ("Bucket", "flux-system", "my-bucket", "bucket/flux-system/my-bucket"),
            ("MixedCaseKind", "test-ns", "test-obj", "mixedcasekind/test-ns/test-obj"),
        ];
        for (kind, namespace, name, expected) in cases {
            assert_eq!(artifact_dir(kind, namespace, name), expected, "kind {kind}");
        }
    }

    #[test]
    fn artifact_path_appends_filename() {
        assert_eq!(
            artifact_path("GitRepository", "default", "test-repo", "source.tar.gz"),
            "gitrepository/default/test-repo/source.tar.gz"
        );
        assert_eq!(
            artifact_path("MixedCaseKind", "test-ns", "test-obj", "artifact-v1.0.0.tar.gz"),
            "mixedcasekind/test-ns/test-obj/artifact-v1.0.0.tar.gz"
        );
    }

    #[test]
    fn artifact_path_without_filename_is_the_dir() {
        assert_eq!(
            artifact_path("GitRepository", "default", "test-repo", ""),
            "gitrepository/default/test-repo"
        );
    }

    #[test]
    fn clean_resolves_dots_and_separators() {
        assert_eq!(clean_slash_path("a//b/./c"), "a/b/c");
        assert_eq!(clean_slash_path("a/b/../c"), "a/c");
        assert_eq!(clean_slash_path("../a"), "../a");
        assert_eq!(clean_slash_path("/../a"), "/a");
        assert_eq!(clean_slash_path("a/.."), ".");
        assert_eq!(clean_slash_path(""), ".");
    }
}
