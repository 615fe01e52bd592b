use super::*;

use std::io::BufRead;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Patterns always excluded from source archives.
pub const VCS_PATTERNS: &[&str] = &[".git/", ".gitignore", ".gitmodules", ".gitattributes"];

/// Gitignore-style exclusion rules for [`Storage::archive`].
///
/// Rules are scoped to `domain`: a list of path segments, relative to the archive
/// root, below which the patterns apply. Paths outside the domain never match.
#[derive(Debug, Clone)]
pub struct SourceIgnoreFilter {
    matcher: Gitignore,
    domain: Vec<String>,
}

impl SourceIgnoreFilter {
    /// Combine `patterns` with [`VCS_PATTERNS`]. With no patterns only VCS metadata
    /// is excluded.
    pub fn new<I, S>(patterns: I, domain: &[&str]) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GitignoreBuilder::new(".");
        let vcs = VCS_PATTERNS.iter().map(|pattern| (*pattern).to_string());
        let custom = patterns.into_iter().map(|p| p.as_ref().to_string());
        for pattern in vcs.chain(custom) {
            builder
                .add_line(None, &pattern)
                .map_err(|err| StorageError::InvalidIgnorePattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })?;
        }
        let matcher = builder
            .build()
            .map_err(|err| StorageError::InvalidIgnorePattern {
                pattern: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            matcher,
            domain: domain
                .iter()
                .filter(|segment| !segment.is_empty())
                .map(|segment| (*segment).to_string())
                .collect(),
        })
    }

    /// Parse a `.sourceignore` style file: one pattern per line, blank lines and `#`
    /// comments skipped.
    pub fn read_patterns<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
        let mut patterns = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim_end();
            if trimmed.trim_start().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            patterns.push(trimmed.to_string());
        }
        Ok(patterns)
    }

    /// Whether `rel_path` (relative to the archive root) is excluded.
    pub fn is_excluded(&self, rel_path: &Path, is_dir: bool) -> bool {
        let segments: Vec<String> = rel_path
            .components()
            .filter_map(|component| match component {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if segments.len() <= self.domain.len() || !segments.starts_with(&self.domain) {
            return false;
        }
        let scoped: PathBuf = segments[self.domain.len()..].iter().collect();
        self.matcher
            .matched_path_or_any_parents(&scoped, is_dir)
            .is_ignore()
    }
}

impl ArchiveFilter for SourceIgnoreFilter {
    fn excludes(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.is_excluded(rel_path, is_dir)
    }
}
