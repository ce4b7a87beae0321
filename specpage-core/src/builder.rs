use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::SiteConfig;
use crate::document::{DocId, DocumentError, SpecDocument};
use crate::event::{Event, EventKind, EventSink, TracingSink};
use crate::renderer::{identifiers, render};
use crate::scanner::{ChangeKind, SourceChange, SourceFile, SourceFilter};
use crate::template::{PageTemplate, TemplateError};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("source directory not specified")]
    MissingSourceDir,
    #[error("source directory {} does not exist", .0.display())]
    SourceDirNotFound(PathBuf),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("could not scan sources: {0}")]
    Scan(#[from] walkdir::Error),
    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not serialize the index: {0}")]
    Index(#[from] serde_json::Error),
}

/// A source file that could not be turned into a page.
#[derive(Debug)]
pub struct DocumentFailure {
    pub path: PathBuf,
    pub error: DocumentError,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub rendered: Vec<DocId>,
    pub removed: Vec<DocId>,
    pub failures: Vec<DocumentFailure>,
    /// Set when the build stopped writing because it was cancelled.
    pub cancelled: bool,
}

impl BuildReport {
    pub fn has_fatal(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub id: DocId,
    pub title: String,
    pub path: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl IndexEntry {
    fn from_document(doc: &SpecDocument) -> Self {
        let meta = doc.meta();
        Self {
            id: doc.id().clone(),
            title: doc.title(),
            path: doc.id().page_path().to_string_lossy().replace('\\', "/"),
            kind: meta.kind,
            level: meta.level,
            domain: meta.domain,
            status: meta.status,
        }
    }
}

#[derive(Debug, Serialize)]
struct Index<'a> {
    title: &'a str,
    pages: Vec<IndexEntry>,
}

pub struct ConverterBuilder {
    source_dir: Option<PathBuf>,
    output_dir: PathBuf,
    site: SiteConfig,
    sink: Arc<dyn EventSink>,
}

impl Default for ConverterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConverterBuilder {
    pub fn new() -> Self {
        Self {
            source_dir: None,
            output_dir: PathBuf::from("./docs"),
            site: SiteConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn source_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.source_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn site_config(mut self, config: SiteConfig) -> Self {
        self.site = config;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<Converter, BuildError> {
        let source_dir = self.source_dir.ok_or(BuildError::MissingSourceDir)?;
        if !source_dir.is_dir() {
            return Err(BuildError::SourceDirNotFound(source_dir));
        }

        let template = PageTemplate::new(self.site.theme_dir.as_deref())?;
        let filter = SourceFilter::new(&source_dir).output_dir(&self.output_dir);

        Ok(Converter {
            filter,
            output_dir: self.output_dir,
            template,
            site: self.site,
            sink: self.sink,
        })
    }
}

/// Converts a source tree into an output tree of pages.
///
/// All methods are synchronous; callers on an async runtime should run them
/// on the blocking pool.
pub struct Converter {
    filter: SourceFilter,
    output_dir: PathBuf,
    template: PageTemplate,
    site: SiteConfig,
    sink: Arc<dyn EventSink>,
}

/// Outcome of loading the documents of one batch.
struct Loaded {
    documents: Vec<SpecDocument>,
    failed: BTreeSet<DocId>,
}

impl Converter {
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::new()
    }

    pub fn source_dir(&self) -> &Path {
        self.filter.source_dir()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn filter(&self) -> &SourceFilter {
        &self.filter
    }

    fn emit(&self, kind: EventKind) {
        self.sink.emit(Event::now(kind));
    }

    /// Convert every source file.
    pub fn convert_all(&self, cancel: &CancellationToken) -> Result<BuildReport, BuildError> {
        let sources = self.scan()?;
        tracing::info!(count = sources.len(), "converting sources");

        let mut report = BuildReport::default();
        let loaded = self.load(&sources, &mut report);
        let known = self.known_ids(&sources, &loaded.failed, &BTreeSet::new());

        if !self.write_pages(&loaded.documents, &known, cancel, &mut report)? {
            return Ok(report);
        }
        let fresh: BTreeMap<DocId, IndexEntry> = loaded
            .documents
            .iter()
            .map(|doc| (doc.id().clone(), IndexEntry::from_document(doc)))
            .collect();
        self.write_index(&sources, fresh, cancel, &mut report)?;
        Ok(report)
    }

    /// Apply a batch of source changes. Changed documents are re-rendered,
    /// removed ones lose their page, and documents that mention the id of an
    /// added or removed document are re-rendered so their links follow.
    pub fn rebuild(
        &self,
        changes: &[SourceChange],
        cancel: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        let sources = self.scan()?;
        let current: BTreeSet<&DocId> = sources.iter().map(|source| &source.id).collect();

        let mut affected: BTreeSet<DocId> = BTreeSet::new();
        let mut appeared: BTreeSet<DocId> = BTreeSet::new();
        let mut removed: BTreeSet<DocId> = BTreeSet::new();

        for change in changes {
            if !self.filter.is_source(&change.path) {
                continue;
            }
            let Some(id) = self.filter.doc_id(&change.path) else {
                continue;
            };
            if current.contains(&id) {
                let had_page = self.output_dir.join(id.page_path()).exists();
                if change.kind == ChangeKind::Created || !had_page {
                    appeared.insert(id.clone());
                }
                affected.insert(id);
            } else {
                removed.insert(id);
            }
        }

        let topology_changed: BTreeSet<&DocId> = appeared.iter().chain(&removed).collect();
        if !topology_changed.is_empty() {
            for source in &sources {
                if affected.contains(&source.id) {
                    continue;
                }
                let Ok(raw) = std::fs::read_to_string(&source.path) else {
                    continue;
                };
                let mentions = identifiers(&raw)
                    .into_iter()
                    .any(|(_, token)| topology_changed.contains(&DocId::new(token)));
                if mentions {
                    tracing::debug!(id = %source.id, "re-rendering dependent document");
                    affected.insert(source.id.clone());
                }
            }
        }

        tracing::info!(
            changed = affected.len(),
            removed = removed.len(),
            "rebuilding after source changes"
        );

        let mut report = BuildReport::default();
        let batch: Vec<SourceFile> = sources
            .iter()
            .filter(|source| affected.contains(&source.id))
            .cloned()
            .collect();
        let loaded = self.load(&batch, &mut report);
        let known = self.known_ids(&sources, &loaded.failed, &removed);

        if !self.write_pages(&loaded.documents, &known, cancel, &mut report)? {
            return Ok(report);
        }

        for id in &removed {
            let page = self.output_dir.join(id.page_path());
            if !page.exists() {
                continue;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            std::fs::remove_file(&page).map_err(|source| BuildError::Write {
                path: page.clone(),
                source,
            })?;
            self.emit(EventKind::PageRemoved { path: page });
            report.removed.push(id.clone());
        }

        let fresh: BTreeMap<DocId, IndexEntry> = loaded
            .documents
            .iter()
            .map(|doc| (doc.id().clone(), IndexEntry::from_document(doc)))
            .collect();
        self.write_index(&sources, fresh, cancel, &mut report)?;
        Ok(report)
    }

    fn scan(&self) -> Result<Vec<SourceFile>, BuildError> {
        Ok(self.filter.scan()?)
    }

    fn read_document(&self, source: &SourceFile) -> Result<SpecDocument, DocumentError> {
        let raw = std::fs::read_to_string(&source.path)?;
        SpecDocument::from_source(source.id.clone(), source.path.clone(), &raw)
    }

    fn load(&self, sources: &[SourceFile], report: &mut BuildReport) -> Loaded {
        let mut loaded = Loaded {
            documents: Vec::new(),
            failed: BTreeSet::new(),
        };
        let mut seen: BTreeSet<&DocId> = BTreeSet::new();

        for source in sources {
            let result = if seen.insert(&source.id) {
                self.read_document(source)
            } else {
                Err(DocumentError::DuplicateId(source.id.clone()))
            };

            match result {
                Ok(doc) => loaded.documents.push(doc),
                Err(error) => {
                    self.report_failure(&source.path, &error);
                    loaded.failed.insert(source.id.clone());
                    report.failures.push(DocumentFailure {
                        path: source.path.clone(),
                        error,
                    });
                }
            }
        }
        loaded
    }

    fn report_failure(&self, path: &Path, error: &DocumentError) {
        let kind = match error {
            DocumentError::Parse(err) => EventKind::ParseError {
                path: path.to_path_buf(),
                line: err.line,
                column: err.column,
                cause: err.cause,
                message: err.message.clone(),
            },
            DocumentError::Invalid(errors) => EventKind::InvalidDocument {
                path: path.to_path_buf(),
                errors: errors.clone(),
            },
            other => EventKind::InvalidDocument {
                path: path.to_path_buf(),
                errors: vec![other.to_string()],
            },
        };
        self.emit(kind);
    }

    /// Ids that links may point at: sources that loaded, plus sources that
    /// failed this time but still have a page from an earlier build.
    fn known_ids(
        &self,
        sources: &[SourceFile],
        failed: &BTreeSet<DocId>,
        removed: &BTreeSet<DocId>,
    ) -> BTreeSet<DocId> {
        sources
            .iter()
            .map(|source| &source.id)
            .filter(|id| !removed.contains(*id))
            .filter(|id| {
                !failed.contains(*id) || self.output_dir.join(id.page_path()).exists()
            })
            .cloned()
            .collect()
    }

    /// Returns `false` when the build was cancelled before all pages were
    /// written.
    fn write_pages(
        &self,
        documents: &[SpecDocument],
        known: &BTreeSet<DocId>,
        cancel: &CancellationToken,
        report: &mut BuildReport,
    ) -> Result<bool, BuildError> {
        for doc in documents {
            let page = render(doc, known);
            for warning in &page.warnings {
                self.emit(EventKind::ValidationWarning {
                    path: doc.source_path().to_path_buf(),
                    kind: warning.kind,
                    section: warning.section.clone(),
                    message: warning.message.clone(),
                });
            }

            let text = self.template.render(&page)?;
            let path = self.output_dir.join(doc.id().page_path());
            if !self.write_file(&path, &text, cancel)? {
                report.cancelled = true;
                return Ok(false);
            }
            self.emit(EventKind::PageWritten { path });
            report.rendered.push(doc.id().clone());
        }
        Ok(true)
    }

    fn write_index(
        &self,
        sources: &[SourceFile],
        mut fresh: BTreeMap<DocId, IndexEntry>,
        cancel: &CancellationToken,
        report: &mut BuildReport,
    ) -> Result<(), BuildError> {
        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();
        for source in sources {
            if !seen.insert(&source.id) {
                continue;
            }
            let entry = match fresh.remove(&source.id) {
                Some(entry) => Some(entry),
                None if self.output_dir.join(source.id.page_path()).exists() => self
                    .read_document(source)
                    .ok()
                    .map(|doc| IndexEntry::from_document(&doc)),
                None => None,
            };
            entries.extend(entry);
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        let index = Index {
            title: &self.site.title,
            pages: entries,
        };
        let json = serde_json::to_string_pretty(&index)?;
        let path = self.output_dir.join(INDEX_FILE);
        if !self.write_file(&path, &json, cancel)? {
            report.cancelled = true;
        }
        Ok(())
    }

    /// Writes `contents` unless the build has been cancelled. Returns whether
    /// the file was written.
    fn write_file(
        &self,
        path: &Path,
        contents: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, BuildError> {
        if cancel.is_cancelled() {
            tracing::debug!(path = %path.display(), "skipping write for cancelled build");
            return Ok(false);
        }
        let io_error = |source| BuildError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, contents).map_err(io_error)?;
        Ok(true)
    }
}
