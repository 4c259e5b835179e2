//! Source-to-destination path mapping with glob excludes.
//!
//! Paths on both sides are `/`-separated and always rendered with a leading
//! slash. Configured roots also accept `\\` as a separator; paths reported
//! by providers do not, since `\\` is a legal name character on Unix. Mapping is a pure function of its inputs so a checkpoint written in
//! one run stays valid for the next.

use std::fmt;

use eyre::{eyre, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{ProviderError, ProviderResult};

/// A normalized destination path such as `/Migration/docs/report.pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestPath(String);

impl DestPath {
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = String::new();
        for seg in segments {
            out.push('/');
            out.push_str(seg);
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    /// Parse and normalize a configured destination path string.
    pub fn parse(raw: &str) -> ProviderResult<Self> {
        Ok(Self::from_segments(split_root_segments(raw)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last path component; empty for the root.
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or_default()
    }

    pub fn parent(&self) -> Option<DestPath> {
        if self.is_root() {
            return None;
        }
        let segs: Vec<&str> = self.segments().collect();
        Some(Self::from_segments(segs[..segs.len() - 1].iter().copied()))
    }

    pub fn join(&self, name: &str) -> DestPath {
        Self::from_segments(self.segments().chain(std::iter::once(name)))
    }

    /// True when `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &DestPath) -> bool {
        let mut mine = self.segments();
        other.segments().all(|seg| mine.next() == Some(seg))
    }
}

impl fmt::Display for DestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of mapping one source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedPath {
    Mapped(DestPath),
    Excluded,
}

impl MappedPath {
    pub fn dest(&self) -> Option<&DestPath> {
        match self {
            MappedPath::Mapped(dest) => Some(dest),
            MappedPath::Excluded => None,
        }
    }
}

/// Ordered glob exclude patterns.
///
/// Patterns without a `/` are matched against every component of the path
/// relative to the source root, so excluding a folder name also excludes its
/// contents. Patterns containing a `/` are matched against the whole relative
/// path.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    patterns: Vec<String>,
    component_globs: GlobSet,
    path_globs: GlobSet,
}

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut components = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for pat in patterns {
            let pat = pat.as_ref().trim();
            if pat.is_empty() {
                continue;
            }
            let target = if pat.contains('/') {
                &mut paths
            } else {
                &mut components
            };
            let glob = Glob::new(pat.trim_start_matches('/'))
                .map_err(|err| eyre!("invalid exclude pattern {pat:?}: {err}"))?;
            target.add(glob);
            kept.push(pat.to_owned());
        }
        Ok(Self {
            patterns: kept,
            component_globs: components
                .build()
                .map_err(|err| eyre!("failed to compile exclude patterns: {err}"))?,
            path_globs: paths
                .build()
                .map_err(|err| eyre!("failed to compile exclude patterns: {err}"))?,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            component_globs: GlobSet::empty(),
            path_globs: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check relative path segments against the patterns.
    pub fn is_excluded(&self, relative: &[&str]) -> bool {
        if relative.iter().any(|seg| self.component_globs.is_match(seg)) {
            return true;
        }
        !self.path_globs.is_empty() && self.path_globs.is_match(relative.join("/"))
    }
}

impl Default for ExcludeFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// Translates source paths into destination paths under a configured root.
#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: String,
    dest_root: DestPath,
    filter: ExcludeFilter,
}

impl PathMapper {
    pub fn new(source_root: &str, dest_root: &str, filter: ExcludeFilter) -> ProviderResult<Self> {
        Ok(Self {
            source_root: normalize_root(source_root)?,
            dest_root: DestPath::parse(dest_root)?,
            filter,
        })
    }

    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    pub fn dest_root(&self) -> &DestPath {
        &self.dest_root
    }

    pub fn map(&self, source_path: &str) -> ProviderResult<MappedPath> {
        let root = split_segments(&self.source_root)?;
        let relative = strip_root(source_path, &root)?;
        if self.filter.is_excluded(&relative) {
            return Ok(MappedPath::Excluded);
        }
        Ok(MappedPath::Mapped(DestPath::from_segments(
            self.dest_root.segments().chain(relative.iter().copied()),
        )))
    }
}

/// Map `source_path` from `source_root` onto `dest_root` with no excludes.
///
/// An empty `dest_root` re-roots directly under the destination root.
pub fn map_path(source_path: &str, source_root: &str, dest_root: &str) -> ProviderResult<DestPath> {
    let root = split_root_segments(source_root)?;
    let relative = strip_root(source_path, &root)?;
    let dest = DestPath::parse(dest_root)?;
    Ok(DestPath::from_segments(
        dest.segments().chain(relative.iter().copied()),
    ))
}

/// Normalize a provider-reported source path to `/a/b` form.
pub fn normalize_source(path: &str) -> ProviderResult<String> {
    Ok(DestPath::from_segments(split_segments(path)?).0)
}

/// Normalize a configured source root, accepting either separator.
pub fn normalize_root(path: &str) -> ProviderResult<String> {
    Ok(DestPath::from_segments(split_root_segments(path)?).0)
}

fn split_segments(raw: &str) -> ProviderResult<Vec<&str>> {
    collect_segments(raw, raw.split('/'))
}

fn split_root_segments(raw: &str) -> ProviderResult<Vec<&str>> {
    collect_segments(raw, raw.split(['/', '\\']))
}

fn collect_segments<'a>(raw: &str, parts: impl Iterator<Item = &'a str>) -> ProviderResult<Vec<&'a str>> {
    let mut out = Vec::new();
    for seg in parts {
        match seg {
            "" | "." => continue,
            ".." => {
                return Err(ProviderError::invalid(format!(
                    "parent directory reference in path {raw:?}"
                )))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn strip_root<'a>(source_path: &'a str, root: &[&str]) -> ProviderResult<Vec<&'a str>> {
    let segments = split_segments(source_path)?;
    if segments.len() < root.len() || segments[..root.len()] != *root {
        return Err(ProviderError::invalid(format!(
            "{source_path} is outside the source root /{}",
            root.join("/")
        )));
    }
    Ok(segments[root.len()..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(excludes: &[&str]) -> PathMapper {
        PathMapper::new("/", "/Migration", ExcludeFilter::new(excludes).unwrap()).unwrap()
    }

    #[test]
    fn maps_under_destination_root() {
        let dest = map_path("/docs/report.pdf", "/", "/Migration").unwrap();
        assert_eq!(dest.as_str(), "/Migration/docs/report.pdf");
    }

    #[test]
    fn mapping_is_deterministic() {
        let m = mapper(&[]);
        let first = m.map("/docs/report.pdf").unwrap();
        for _ in 0..10 {
            assert_eq!(m.map("/docs/report.pdf").unwrap(), first);
        }
    }

    #[test]
    fn empty_dest_root_means_destination_root() {
        let dest = map_path("/docs/report.pdf", "/", "").unwrap();
        assert_eq!(dest.as_str(), "/docs/report.pdf");
        assert_eq!(map_path("/", "/", "").unwrap(), DestPath::root());
    }

    #[test]
    fn strips_nested_source_root() {
        let dest = map_path("/Team/Projects/a/b.txt", "/Team/Projects/", "Backup/").unwrap();
        assert_eq!(dest.as_str(), "/Backup/a/b.txt");
    }

    #[test]
    fn normalizes_separators_and_slashes() {
        let dest = map_path("/docs//sub//file.txt/", "\\", "\\Migration\\\\Archive//").unwrap();
        assert_eq!(dest.as_str(), "/Migration/Archive/docs/sub/file.txt");
        let m = PathMapper::new("\\Team\\Projects", "/M", ExcludeFilter::empty()).unwrap();
        assert_eq!(m.source_root(), "/Team/Projects");
    }

    #[test]
    fn backslashes_in_entry_names_are_kept() {
        let m = mapper(&[]);
        assert_eq!(
            m.map("/docs/a\\b.txt").unwrap(),
            MappedPath::Mapped(DestPath::root().join("Migration").join("docs").join("a\\b.txt"))
        );
        assert_eq!(normalize_source("/docs/a\\b.txt").unwrap(), "/docs/a\\b.txt");
    }

    #[test]
    fn rejects_paths_outside_root() {
        let err = map_path("/other/file.txt", "/docs", "/Migration").unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::InvalidRequest);
        // component-wise prefix: /docsX is not under /docs
        assert!(map_path("/docsX/file.txt", "/docs", "/M").is_err());
    }

    #[test]
    fn rejects_parent_references() {
        assert!(map_path("/docs/../secret", "/", "/M").is_err());
    }

    #[test]
    fn excludes_by_name_and_glob() {
        let m = mapper(&[".DS_Store", "*.tmp", "~*"]);
        assert_eq!(m.map("/docs/.DS_Store").unwrap(), MappedPath::Excluded);
        assert_eq!(m.map("/docs/build.tmp").unwrap(), MappedPath::Excluded);
        assert_eq!(m.map("/docs/~lock.docx").unwrap(), MappedPath::Excluded);
        assert!(matches!(m.map("/docs/report.tmp.pdf").unwrap(), MappedPath::Mapped(_)));
    }

    #[test]
    fn excluded_folder_excludes_children() {
        let m = mapper(&["node_modules"]);
        assert_eq!(m.map("/app/node_modules").unwrap(), MappedPath::Excluded);
        assert_eq!(m.map("/app/node_modules/pkg/index.js").unwrap(), MappedPath::Excluded);
    }

    #[test]
    fn path_patterns_match_relative_path() {
        let m = mapper(&["archive/**/*.log"]);
        assert_eq!(m.map("/archive/2020/app.log").unwrap(), MappedPath::Excluded);
        assert!(matches!(m.map("/current/app.log").unwrap(), MappedPath::Mapped(_)));
    }

    #[test]
    fn root_segments_are_not_filtered() {
        let m = PathMapper::new("/tmp", "/M", ExcludeFilter::new(&["tmp"]).unwrap()).unwrap();
        assert_eq!(
            m.map("/tmp/a.txt").unwrap(),
            MappedPath::Mapped(DestPath::parse("/M/a.txt").unwrap())
        );
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(ExcludeFilter::new(&["[unclosed"]).is_err());
    }

    #[test]
    fn dest_path_navigation() {
        let p = DestPath::parse("/Migration/docs/report.pdf").unwrap();
        assert_eq!(p.name(), "report.pdf");
        assert_eq!(p.parent().unwrap().as_str(), "/Migration/docs");
        assert_eq!(DestPath::parse("/Migration").unwrap().parent(), Some(DestPath::root()));
        assert_eq!(DestPath::root().parent(), None);
        assert!(p.starts_with(&DestPath::parse("/Migration").unwrap()));
        assert!(!p.starts_with(&DestPath::parse("/Mig").unwrap()));
        assert_eq!(DestPath::root().join("a").as_str(), "/a");
    }
}
