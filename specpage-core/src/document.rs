use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::parser::{ParseError, RawTree, parse};
use crate::validator::{
    DIAGRAM_SOURCE_KEYS, Warning, WarningKind, describe, key_string, scalar, validate,
};

/// Identifier of a document: its source path relative to the source root,
/// without extension, with `/` separators (`services/auth`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_relative_path(path: &Path) -> Option<Self> {
        let stem = path.with_extension("");
        let segments: Vec<String> = stem
            .components()
            .map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        (!segments.is_empty()).then(|| Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used where the publishing platform wants a flat id.
    pub fn slug(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Output page location relative to the output root.
    pub fn page_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.md", self.0))
    }

    /// Markdown link target from this page to `other`.
    pub fn link_to(&self, other: &DocId) -> String {
        let depth = self.0.matches('/').count();
        format!("{}{}.md", "../".repeat(depth), other.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("could not read source: {0}")]
    Read(#[from] std::io::Error),
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("another source file already uses the id `{0}`")]
    DuplicateId(DocId),
}

impl DocumentError {
    /// Line and column, when the failure points into the source text.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            DocumentError::Parse(err) => Some((err.line, err.column)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Meta {
    pub title: Option<String>,
    pub purpose: Option<String>,
    pub kind: Option<String>,
    pub level: Option<String>,
    pub domain: Option<String>,
    pub status: Option<String>,
    pub version: Option<String>,
    pub owner: Option<String>,
    pub last_updated: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Relationships {
    pub depends_on: Vec<String>,
    pub used_by: Vec<String>,
    pub integrates_with: Vec<String>,
    pub internal: Vec<String>,
    pub external: Vec<String>,
}

impl Relationships {
    pub fn is_empty(&self) -> bool {
        self.depends_on.is_empty()
            && self.used_by.is_empty()
            && self.integrates_with.is_empty()
            && self.internal.is_empty()
            && self.external.is_empty()
    }

    /// Ids that name other specification documents, in first-seen order.
    pub fn linked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self
            .depends_on
            .iter()
            .chain(&self.internal)
            .chain(&self.used_by)
            .chain(&self.integrates_with)
        {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: String,
    pub source: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reference {
    pub key: String,
    pub kind: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    pub version: Option<String>,
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// One parsed and validated source file. Built fresh for every render.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    id: DocId,
    source_path: PathBuf,
    sections: Mapping,
    warnings: Vec<Warning>,
}

impl SpecDocument {
    pub fn new(id: DocId, source_path: PathBuf, tree: RawTree, warnings: Vec<Warning>) -> Self {
        let sections = match tree {
            Value::Mapping(sections) => sections,
            _ => Mapping::new(),
        };
        Self {
            id,
            source_path,
            sections,
            warnings,
        }
    }

    /// Parse and validate `raw_text`. Fatal validation errors are returned as
    /// [`DocumentError::Invalid`]; warnings are kept on the document.
    pub fn from_source(
        id: DocId,
        source_path: PathBuf,
        raw_text: &str,
    ) -> Result<Self, DocumentError> {
        let tree = parse(raw_text)?;
        let validation = validate(&tree);
        if validation.is_fatal() {
            return Err(DocumentError::Invalid(validation.errors));
        }
        Ok(Self::new(id, source_path, tree, validation.warnings))
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn sections(&self) -> &Mapping {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn title(&self) -> String {
        self.meta()
            .title
            .unwrap_or_else(|| self.id.slug().replace(['-', '_'], " "))
    }

    pub fn meta(&self) -> Meta {
        let Some(meta) = self.section("meta").and_then(Value::as_mapping) else {
            return Meta::default();
        };
        let mut fallbacks = Vec::new();
        Meta {
            title: scalar(meta, "title"),
            purpose: scalar(meta, "purpose"),
            kind: scalar(meta, "type"),
            level: scalar(meta, "level"),
            domain: scalar(meta, "domain"),
            status: scalar(meta, "status"),
            version: scalar(meta, "version"),
            owner: scalar(meta, "owner"),
            last_updated: scalar(meta, "last_updated").or_else(|| scalar(meta, "last-updated")),
            tags: meta
                .get("tags")
                .map(|tags| string_list(tags, "meta", &mut fallbacks))
                .unwrap_or_default(),
        }
    }

    pub fn relationships(&self, fallbacks: &mut Vec<Warning>) -> Relationships {
        let mut relationships = Relationships::default();

        if let Some(section) = self.section("relationships") {
            match section.as_mapping() {
                Some(map) => {
                    let mut list = |field: &str| {
                        map.get(field)
                            .map(|value| string_list(value, "relationships", fallbacks))
                            .unwrap_or_default()
                    };
                    relationships.depends_on = list("depends_on");
                    relationships.used_by = list("used_by");
                    relationships.integrates_with = list("integrates_with");
                }
                None => fallbacks.push(shape_fallback("relationships", section)),
            }
        }

        if let Some(section) = self.section("dependencies") {
            match section.as_mapping() {
                Some(map) => {
                    let mut list = |field: &str| {
                        map.get(field)
                            .map(|value| string_list(value, "dependencies", fallbacks))
                            .unwrap_or_default()
                    };
                    relationships.internal = list("internal");
                    relationships.external = list("external");
                }
                None => fallbacks.push(shape_fallback("dependencies", section)),
            }
        }

        relationships
    }

    pub fn diagrams(&self, fallbacks: &mut Vec<Warning>) -> Vec<Diagram> {
        let Some(section) = self.section("diagrams") else {
            return Vec::new();
        };
        let Some(entries) = section.as_sequence() else {
            fallbacks.push(shape_fallback("diagrams", section));
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let Some(map) = entry.as_mapping() else {
                    fallbacks.push(shape_fallback("diagrams", entry));
                    return None;
                };
                let source_key = DIAGRAM_SOURCE_KEYS
                    .iter()
                    .find(|key| scalar(map, key).is_some());
                let language = match source_key {
                    Some(&"mermaid") => "mermaid".to_string(),
                    Some(&"plantuml") => "plantuml".to_string(),
                    _ => scalar(map, "language").unwrap_or_else(|| "text".to_string()),
                };
                Some(Diagram {
                    title: scalar(map, "title"),
                    description: scalar(map, "description"),
                    language,
                    source: source_key.and_then(|key| raw_scalar(map, key)),
                })
            })
            .collect()
    }

    pub fn references(&self, fallbacks: &mut Vec<Warning>) -> Vec<Reference> {
        let Some(section) = self.section("references") else {
            return Vec::new();
        };
        let Some(entries) = section.as_mapping() else {
            fallbacks.push(shape_fallback("references", section));
            return Vec::new();
        };

        entries
            .iter()
            .map(|(key, entry)| {
                let key = key_string(key);
                let Some(map) = entry.as_mapping() else {
                    fallbacks.push(shape_fallback("references", entry));
                    return Reference {
                        notes: Some(flow_string(entry)),
                        key,
                        ..Reference::default()
                    };
                };
                Reference {
                    kind: scalar(map, "type"),
                    title: scalar(map, "title"),
                    url: scalar(map, "url"),
                    path: scalar(map, "path"),
                    version: scalar(map, "version"),
                    owner: scalar(map, "owner"),
                    tags: map
                        .get("tags")
                        .map(|tags| string_list(tags, "references", fallbacks))
                        .unwrap_or_default(),
                    notes: scalar(map, "notes"),
                    key,
                }
            })
            .collect()
    }
}

/// Scalar text kept byte for byte (no trimming), for diagram sources.
fn raw_scalar(map: &Mapping, field: &str) -> Option<String> {
    match map.get(field)? {
        Value::String(s) => Some(s.clone()),
        _ => scalar(map, field),
    }
}

/// Reads a list of names. Mappings contribute their `name` or `id`; anything
/// else is stringified and reported.
pub(crate) fn string_list(
    value: &Value,
    section: &str,
    fallbacks: &mut Vec<Warning>,
) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Sequence(items) => items.iter().collect(),
        Value::Null => return Vec::new(),
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Mapping(map) => scalar(map, "name").or_else(|| scalar(map, "id")).or_else(|| {
                fallbacks.push(shape_fallback(section, item));
                Some(flow_string(item))
            }),
            Value::Null => None,
            other => {
                fallbacks.push(shape_fallback(section, other));
                Some(flow_string(other))
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn shape_fallback(section: &str, value: &Value) -> Warning {
    Warning::new(
        WarningKind::RenderFallback,
        section,
        format!("unexpected {}, rendered as plain text", describe(value)),
    )
}

/// Single-line best-effort text for any value.
pub(crate) fn flow_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> SpecDocument {
        SpecDocument::from_source(DocId::new("svc/auth"), PathBuf::from("svc/auth.yaml"), text)
            .unwrap()
    }

    #[test]
    fn test_id_from_relative_path() {
        let id = DocId::from_relative_path(Path::new("services/auth.yaml")).unwrap();
        assert_eq!(id.as_str(), "services/auth");
        assert_eq!(id.slug(), "auth");
        assert_eq!(id.page_path(), PathBuf::from("services/auth.md"));
        assert!(DocId::from_relative_path(Path::new("../escape.yaml")).is_none());
    }

    #[test]
    fn test_link_to_walks_up_directories() {
        let from = DocId::new("services/auth");
        assert_eq!(from.link_to(&DocId::new("web")), "../web.md");
        assert_eq!(DocId::new("web").link_to(&from), "services/auth.md");
    }

    #[test]
    fn test_missing_meta_is_invalid() {
        let err = SpecDocument::from_source(DocId::new("x"), PathBuf::from("x.yaml"), "a: 1\n")
            .unwrap_err();
        assert!(matches!(err, DocumentError::Invalid(_)));
        assert!(err.location().is_none());
    }

    #[test]
    fn test_parse_failure_keeps_location() {
        let err =
            SpecDocument::from_source(DocId::new("x"), PathBuf::from("x.yaml"), "meta: 'open\n")
                .unwrap_err();
        assert!(err.location().is_some());
    }

    #[test]
    fn test_meta_fields() {
        let doc =
            doc("meta:\n  purpose: Login\n  type: service\n  version: 2\n  tags: [auth, web]\n");
        let meta = doc.meta();
        assert_eq!(meta.purpose.as_deref(), Some("Login"));
        assert_eq!(meta.kind.as_deref(), Some("service"));
        assert_eq!(meta.version.as_deref(), Some("2"));
        assert_eq!(meta.tags, vec!["auth", "web"]);
        assert_eq!(doc.title(), "auth");
    }

    #[test]
    fn test_relationships_accept_names_and_mappings() {
        let doc = doc(
            "meta: {}\nrelationships:\n  depends_on: [db, cache]\n  used_by: web\ndependencies:\n  external:\n    - name: stripe\n    - [odd]\n",
        );
        let mut fallbacks = Vec::new();
        let rel = doc.relationships(&mut fallbacks);
        assert_eq!(rel.depends_on, vec!["db", "cache"]);
        assert_eq!(rel.used_by, vec!["web"]);
        assert_eq!(rel.external, vec!["stripe", "[\"odd\"]"]);
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].kind, WarningKind::RenderFallback);
    }

    #[test]
    fn test_diagram_language_follows_source_key() {
        let doc = doc(
            "meta: {}\ndiagrams:\n  - title: A\n    mermaid: |\n      graph TD\n        a --> b\n  - title: B\n    plantuml: '@startuml'\n",
        );
        let diagrams = doc.diagrams(&mut Vec::new());
        assert_eq!(diagrams[0].language, "mermaid");
        assert_eq!(
            diagrams[0].source.as_deref(),
            Some("graph TD\n  a --> b\n")
        );
        assert_eq!(diagrams[1].language, "plantuml");
    }
}
