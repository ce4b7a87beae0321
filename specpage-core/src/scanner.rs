use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::document::DocId;

const SOURCE_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Working directories of documentation platforms and build tools.
const IGNORED_DIRS: &[&str] = &["node_modules", ".docusaurus", "build", "target"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Folds a later change of the same path into this one. `None` means the
    /// two cancel out.
    pub fn then(self, next: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::*;
        match (self, next) {
            (Created, Removed) => None,
            (Created, _) => Some(Created),
            (Removed, Created) | (Removed, Modified) => Some(Modified),
            (_, Removed) => Some(Removed),
            (Modified, _) => Some(Modified),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl SourceChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: DocId,
    pub path: PathBuf,
}

/// Decides which paths under the source root are specification sources.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    source_dir: PathBuf,
    output_dir: Option<PathBuf>,
}

impl SourceFilter {
    pub fn new<P: AsRef<Path>>(source_dir: P) -> Self {
        Self {
            source_dir: absolute(source_dir.as_ref()),
            output_dir: None,
        }
    }

    /// Excludes the output tree when it sits inside the source tree.
    pub fn output_dir<P: AsRef<Path>>(mut self, output_dir: P) -> Self {
        self.output_dir = Some(absolute(output_dir.as_ref()));
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        if self.output_dir.as_deref().is_some_and(|out| path.starts_with(out)) {
            return true;
        }
        let Ok(relative) = path.strip_prefix(&self.source_dir) else {
            return true;
        };
        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        })
    }

    pub fn is_source(&self, path: &Path) -> bool {
        let path = absolute(path);
        let has_source_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        has_source_extension && !self.is_excluded_dir(&path)
    }

    pub fn doc_id(&self, path: &Path) -> Option<DocId> {
        let path = absolute(path);
        let relative = path.strip_prefix(&self.source_dir).ok()?;
        DocId::from_relative_path(relative)
    }

    /// Every source file, sorted by path.
    pub fn scan(&self) -> Result<Vec<SourceFile>, walkdir::Error> {
        let mut sources = Vec::new();
        let walker = WalkDir::new(&self.source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded_dir(entry.path()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.is_source(entry.path()) {
                continue;
            }
            if let Some(id) = self.doc_id(entry.path()) {
                sources.push(SourceFile {
                    id,
                    path: entry.path().to_path_buf(),
                });
            }
        }

        tracing::debug!(count = sources.len(), dir = %self.source_dir.display(), "scanned sources");
        Ok(sources)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_change_kinds_coalesce() {
        use ChangeKind::*;
        assert_eq!(Created.then(Modified), Some(Created));
        assert_eq!(Created.then(Removed), None);
        assert_eq!(Removed.then(Created), Some(Modified));
        assert_eq!(Modified.then(Removed), Some(Removed));
        assert_eq!(Modified.then(Modified), Some(Modified));
    }

    #[test]
    fn test_scan_skips_ignored_locations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for path in [
            "a.yaml",
            "nested/b.yml",
            "notes.md",
            ".hidden/c.yaml",
            "node_modules/d.yaml",
            "out/e.yaml",
        ] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "meta: {}\n").unwrap();
        }

        let filter = SourceFilter::new(root).output_dir(root.join("out"));
        let ids: Vec<String> = filter
            .scan()
            .unwrap()
            .into_iter()
            .map(|source| source.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "nested/b"]);
    }

    #[test]
    fn test_is_source_for_paths_that_no_longer_exist() {
        let dir = tempfile::tempdir().unwrap();
        let filter = SourceFilter::new(dir.path());
        let gone = filter.source_dir().join("gone.yaml");
        assert!(filter.is_source(&gone));
        assert_eq!(filter.doc_id(&gone), Some(DocId::new("gone")));
        assert!(!filter.is_source(&filter.source_dir().join("build/x.yaml")));
    }
}
