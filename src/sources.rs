//! Source selection: walks the source roots and yields the files to preprocess.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::text::normalize_extensions;

/// A file selected for preprocessing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path below its source root; the output lands at the same place below the destination
    pub relative: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    extensions: Vec<String>,
    exclude_extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl SourceFilter {
    /// An empty `extensions` list accepts every extension not explicitly excluded
    pub fn new(extensions: &[String], exclude_extensions: &[String], exclude_dirs: &[String]) -> Self {
        SourceFilter {
            extensions: normalize_extensions(extensions),
            exclude_extensions: normalize_extensions(exclude_extensions),
            exclude_dirs: exclude_dirs.to_vec(),
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if self.exclude_extensions.contains(&ext) {
            return false;
        }
        self.extensions.is_empty() || self.extensions.contains(&ext)
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.exclude_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
    }
}

/// Collect matching files under every root, ordered by relative path.
/// A root may also name a single file.
pub fn collect_sources(roots: &[PathBuf], filter: &SourceFilter) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !filter.is_excluded_dir(e));
        for entry in walker {
            let entry =
                entry.with_context(|| format!("Cannot walk source root {}", root.display()))?;
            if !entry.file_type().is_file() || !filter.accepts(entry.path()) {
                continue;
            }
            let relative = match entry.path().strip_prefix(root) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                _ => PathBuf::from(entry.file_name()),
            };
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                relative,
            });
        }
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_normalizes_extensions() {
        let filter = SourceFilter::new(&strings(&["*.java", ".TXT"]), &strings(&["xml"]), &[]);
        assert!(filter.accepts(Path::new("a/B.java")));
        assert!(filter.accepts(Path::new("notes.txt")));
        assert!(!filter.accepts(Path::new("pom.xml")));
        assert!(!filter.accepts(Path::new("Makefile")));

        let everything = SourceFilter::new(&[], &strings(&["*.class"]), &[]);
        assert!(everything.accepts(Path::new("Makefile")));
        assert!(!everything.accepts(Path::new("A.class")));
    }

    #[test]
    fn test_collect_sources_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("pkg/inner")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("pkg/inner/C.java"), "").unwrap();
        fs::write(root.join("pkg/A.java"), "").unwrap();
        fs::write(root.join("B.java"), "").unwrap();
        fs::write(root.join("build.xml"), "").unwrap();
        fs::write(root.join(".git/HEAD.java"), "").unwrap();

        let filter = SourceFilter::new(&strings(&["java"]), &[], &strings(&[".git"]));
        let files = collect_sources(&[root.clone()], &filter).unwrap();
        let relative: Vec<PathBuf> = files.iter().map(|f| f.relative.clone()).collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("B.java"),
                PathBuf::from("pkg/A.java"),
                PathBuf::from("pkg/inner/C.java"),
            ]
        );
        assert_eq!(files[0].path, root.join("B.java"));
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Only.java");
        fs::write(&file, "").unwrap();
        let files = collect_sources(&[file.clone()], &SourceFilter::default()).unwrap();
        assert_eq!(
            files,
            vec![SourceFile {
                path: file,
                relative: PathBuf::from("Only.java"),
            }]
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_sources(&[dir.path().join("nope")], &SourceFilter::default()).is_err());
    }
}
