//! Path handling and the repository path safety resolver
//!
//! Every file address coming from a caller goes through [`validate`] (lexical
//! checks, usable for any repository type) or [`resolve`] (lexical checks plus
//! containment under a filesystem root) before any adapter is touched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, PathError, Result};

/// A path normalized to use forward slashes internally.
///
/// Backslashes become forward slashes, repeated slashes collapse, and `.` /
/// `..` segments are resolved lexically. A leading `..` on a relative path
/// is dropped, so a relative `NormalizedPath` never climbs above its start.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Create a new NormalizedPath from any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        Self {
            inner: clean(&raw),
        }
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Convert to a platform-native PathBuf for I/O operations.
    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.inner)
    }

    /// Join this path with a segment, resolving dot segments.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.replace('\\', "/");
        if segment.is_empty() {
            return self.clone();
        }
        let joined = if self.inner.ends_with('/') {
            format!("{}{}", self.inner, segment)
        } else {
            format!("{}/{}", self.inner, segment)
        };
        Self {
            inner: clean(&joined),
        }
    }

    /// Get the parent directory.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.inner.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) => Some(Self {
                inner: "/".to_string(),
            }),
            Some(idx) => Some(Self {
                inner: trimmed[..idx].to_string(),
            }),
            None => None,
        }
    }

    /// Get the file name component.
    pub fn file_name(&self) -> Option<&str> {
        let trimmed = self.inner.trim_end_matches('/');
        trimmed.rsplit('/').next().filter(|s| !s.is_empty())
    }

    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    pub fn is_dir(&self) -> bool {
        self.to_native().is_dir()
    }

    /// Whether `self` equals `base` or lies beneath it.
    pub fn starts_with(&self, base: &NormalizedPath) -> bool {
        if base.inner == "/" {
            return self.inner.starts_with('/');
        }
        self.inner == base.inner
            || self
                .inner
                .strip_prefix(&base.inner)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn clean(raw: &str) -> String {
    let absolute = raw.starts_with('/');
    let network = raw.starts_with("//") && !raw.starts_with("///");
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let body = parts.join("/");
    if network {
        format!("//{body}")
    } else if absolute {
        format!("/{body}")
    } else {
        body
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.inner)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<&str> for NormalizedPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<PathBuf> for NormalizedPath {
    fn from(p: PathBuf) -> Self {
        Self::new(p)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(p: &Path) -> Self {
        Self::new(p)
    }
}

/// Whether an operation may address the repository root itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
    Allow,
    Deny,
}

/// A caller-supplied path split into segments, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    segments: Vec<String>,
    is_dir: bool,
}

impl RequestPath {
    /// Split a slash-separated request path.
    ///
    /// A trailing `/` marks a directory address. A leading `/` is ignored, so
    /// `"/"` addresses the root directory. Interior empty segments are kept
    /// so that [`validate`] can reject them.
    pub fn parse(raw: &str) -> std::result::Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let is_dir = raw.ends_with('/');
        let body = raw.strip_prefix('/').unwrap_or(raw);
        let body = body.strip_suffix('/').unwrap_or(body);
        let segments = if body.is_empty() {
            Vec::new()
        } else {
            body.split('/').map(str::to_string).collect()
        };
        Ok(Self { segments, is_dir })
    }

    /// Build a request from already-split segments.
    pub fn from_segments<I, S>(segments: I, is_dir: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            is_dir,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// A validated, repository-relative path.
///
/// Canonical form: `a/b/file.json` for files, `a/b/` for directories, and
/// the empty string for the root. Never contains `.`/`..` or empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath {
    inner: String,
}

impl RelativePath {
    /// The repository root.
    pub fn root() -> Self {
        Self {
            inner: String::new(),
        }
    }

    /// Parse and validate, allowing the root.
    pub fn parse(raw: &str) -> std::result::Result<Self, PathError> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        validate(&RequestPath::parse(raw)?, RootPolicy::Allow)
    }

    /// Parse and validate a file address (no root, no trailing slash).
    pub fn file(raw: &str) -> std::result::Result<Self, PathError> {
        let path = validate(&RequestPath::parse(raw)?, RootPolicy::Deny)?;
        if path.is_dir() {
            return Err(PathError::NotAFile {
                path: path.inner.clone(),
            });
        }
        Ok(path)
    }

    fn from_validated(segments: &[String], is_dir: bool) -> Self {
        let mut inner = segments.join("/");
        if is_dir && !inner.is_empty() {
            inner.push('/');
        }
        Self { inner }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_dir(&self) -> bool {
        self.is_root() || self.inner.ends_with('/')
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn extension(&self) -> Option<&str> {
        if self.is_dir() {
            return None;
        }
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Whether any segment is a dotfile (`.keep`, `.github/...`).
    pub fn is_hidden(&self) -> bool {
        self.segments().any(|s| s.starts_with('.'))
    }

    /// The containing directory, in directory form. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<String> = self.segments().map(str::to_string).collect();
        Some(Self::from_validated(&segments[..segments.len() - 1], true))
    }

    /// All ancestor directories from the top down, excluding the root.
    pub fn ancestors(&self) -> Vec<Self> {
        let segments: Vec<String> = self.segments().map(str::to_string).collect();
        let count = if self.is_dir() {
            segments.len()
        } else {
            segments.len().saturating_sub(1)
        };
        (1..=count)
            .map(|n| Self::from_validated(&segments[..n], true))
            .collect()
    }

    /// This path in directory form.
    pub fn as_dir(&self) -> Self {
        let segments: Vec<String> = self.segments().map(str::to_string).collect();
        Self::from_validated(&segments, true)
    }

    /// This path in file form. `None` for the root.
    pub fn as_file(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<String> = self.segments().map(str::to_string).collect();
        Some(Self::from_validated(&segments, false))
    }

    /// Append a single validated segment.
    pub fn child(&self, segment: &str, is_dir: bool) -> std::result::Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments: Vec<String> = self.segments().map(str::to_string).collect();
        segments.push(segment.to_string());
        Ok(Self::from_validated(&segments, is_dir))
    }

    /// Whether `self` equals `dir` or lies beneath it. `dir` is treated as a directory.
    pub fn starts_with(&self, dir: &RelativePath) -> bool {
        let prefix = dir.as_dir();
        prefix.is_root() || self.inner.starts_with(prefix.as_str())
    }

    /// Remove a directory prefix; `None` when `self` is not under it.
    pub fn strip_prefix(&self, dir: &RelativePath) -> Option<Self> {
        let prefix = dir.as_dir();
        if prefix.is_root() {
            return Some(self.clone());
        }
        self.inner.strip_prefix(prefix.as_str()).map(|rest| Self {
            inner: rest.to_string(),
        })
    }
}

impl std::fmt::Display for RelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.inner.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl TryFrom<String> for RelativePath {
    type Error = PathError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for RelativePath {
    type Error = PathError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RelativePath> for String {
    fn from(value: RelativePath) -> Self {
        value.inner
    }
}

fn validate_segment(segment: &str) -> std::result::Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment {
            path: segment.to_string(),
        });
    }
    if segment == "." || segment == ".." {
        return Err(PathError::DotSegment {
            segment: segment.to_string(),
        });
    }
    if segment.contains('\\') {
        return Err(PathError::Backslash {
            segment: segment.to_string(),
        });
    }
    if segment.contains('/') || segment.contains('\0') || Path::new(segment).has_root() {
        return Err(PathError::Absolute {
            path: segment.to_string(),
        });
    }
    Ok(())
}

/// Lexically validate a request path.
///
/// Rejects `.`/`..`, empty interior segments, backslashes and the root
/// (unless `policy` allows it). No filesystem access.
pub fn validate(
    request: &RequestPath,
    policy: RootPolicy,
) -> std::result::Result<RelativePath, PathError> {
    if request.segments.is_empty() {
        return match policy {
            RootPolicy::Allow => Ok(RelativePath::root()),
            RootPolicy::Deny => Err(PathError::RootNotAllowed),
        };
    }
    for segment in &request.segments {
        validate_segment(segment).map_err(|err| match err {
            PathError::EmptySegment { .. } => PathError::EmptySegment {
                path: request.segments.join("/"),
            },
            other => other,
        })?;
    }
    Ok(RelativePath::from_validated(&request.segments, request.is_dir))
}

/// A request path resolved beneath a filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute, platform-native location.
    pub absolute: PathBuf,
    /// Canonical repository-relative form.
    pub relative: RelativePath,
}

impl ResolvedPath {
    pub fn is_dir(&self) -> bool {
        self.relative.is_dir()
    }
}

/// Resolve `request` beneath `root`.
///
/// Performs [`validate`], then checks that the resulting location stays
/// inside the canonical root even when an existing ancestor is a symlink.
///
/// # Errors
///
/// `Error::Path` for any rejected request, `Error::Io` when `root` itself
/// cannot be canonicalized.
pub fn resolve(root: &Path, request: &RequestPath, policy: RootPolicy) -> Result<ResolvedPath> {
    let relative = validate(request, policy)?;
    let canonical_root = dunce::canonicalize(root).map_err(|e| Error::io(root, e))?;

    let mut absolute = canonical_root.clone();
    for segment in relative.segments() {
        absolute.push(segment);
    }

    // The deepest existing ancestor decides where the path really lands.
    let mut ancestor = absolute.as_path();
    let landing = loop {
        if ancestor.exists() {
            break dunce::canonicalize(ancestor).map_err(|e| Error::io(ancestor, e))?;
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => break canonical_root.clone(),
        }
    };
    if !landing.starts_with(&canonical_root) {
        tracing::warn!(path = %relative, root = %root.display(), "rejected path escaping repository root");
        return Err(PathError::Escapes {
            path: relative.as_str().to_string(),
        }
        .into());
    }

    Ok(ResolvedPath { absolute, relative })
}

/// Join a directory prefix and a relative path.
pub fn join_relative(prefix: &RelativePath, rel: &RelativePath) -> RelativePath {
    let mut segments: Vec<String> = prefix.segments().map(str::to_string).collect();
    segments.extend(rel.segments().map(str::to_string));
    RelativePath::from_validated(&segments, rel.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_marks_trailing_slash_as_directory() {
        let request = RequestPath::parse("folder/nested/").unwrap();
        assert!(request.is_dir());
        assert_eq!(request.segments(), ["folder", "nested"]);
    }

    #[test]
    fn slash_alone_addresses_root() {
        let request = RequestPath::parse("/").unwrap();
        assert!(request.segments().is_empty());
        assert_eq!(
            validate(&request, RootPolicy::Allow).unwrap(),
            RelativePath::root()
        );
        assert_eq!(
            validate(&request, RootPolicy::Deny).unwrap_err(),
            PathError::RootNotAllowed
        );
    }

    #[test]
    fn ancestors_list_directories_top_down() {
        let path = RelativePath::parse("a/b/c.json").unwrap();
        let ancestors: Vec<String> = path.ancestors().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, ["a/", "a/b/"]);
    }

    #[test]
    fn strip_prefix_handles_root_and_nested() {
        let path = RelativePath::parse("grafana/dash.json").unwrap();
        let prefix = RelativePath::parse("grafana/").unwrap();
        assert_eq!(path.strip_prefix(&prefix).unwrap().as_str(), "dash.json");
        assert_eq!(path.strip_prefix(&RelativePath::root()).unwrap(), path);
        assert!(path.strip_prefix(&RelativePath::parse("other/").unwrap()).is_none());
    }

    #[test]
    fn hidden_segments_are_detected() {
        assert!(RelativePath::parse("folder/nested/.keep").unwrap().is_hidden());
        assert!(RelativePath::parse(".github/workflow.yaml").unwrap().is_hidden());
        assert!(!RelativePath::parse("folder/dash.json").unwrap().is_hidden());
    }
}
