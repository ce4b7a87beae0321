use serde_yaml::{Mapping, Value};

use super::RenderedSection;
use super::graph::relationship_graph;
use super::links::LinkResolver;
use crate::document::{Reference, Relationships, SpecDocument, flow_string, shape_fallback};
use crate::markdown::{
    Anchors, code_span, escape_block, escape_inline, fenced_block, quote_if_needed, slugify,
};
use crate::validator::{Warning, key_string, scalar};

/// Top-level sections with a fixed place on the page.
pub(super) const PLACED_SECTIONS: &[&str] = &[
    "meta",
    "relationships",
    "diagrams",
    "contracts",
    "validation",
    "references",
    "dependencies",
];

/// Headings the page always carries; a free-form section may not reuse them.
const FIXED_TITLES: &[&str] = &[
    "Meta",
    "Relationships",
    "Diagrams",
    "Contracts",
    "Validation",
    "References",
    "Warnings and Errors",
    super::TOC_TITLE,
];

const META_FIELDS: &[(&str, &str)] = &[
    ("purpose", "Purpose"),
    ("type", "Type"),
    ("level", "Level"),
    ("domain", "Domain"),
    ("status", "Status"),
    ("version", "Version"),
    ("owner", "Owner"),
    ("last_updated", "Last updated"),
    ("last-updated", "Last updated"),
];

const CONTRACT_KINDS: &[(&str, &str)] = &[
    ("capabilities", "Capabilities"),
    ("apis", "APIs"),
    ("events", "Events"),
    ("states", "States"),
];

const VALIDATION_KINDS: &[(&str, &str)] = &[
    ("acceptance_criteria", "Acceptance Criteria"),
    ("edge_cases", "Edge Cases"),
    ("assumptions", "Assumptions"),
    ("open_questions", "Open Questions"),
];

const REFERENCE_KINDS_TO_SPECS: &[&str] = &["spec", "specification", "internal"];

/// Deepest heading level used for nested mappings.
const MAX_HEADING_LEVEL: u8 = 4;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextStyle {
    /// Escaped prose with bare document ids turned into links.
    Linked,
    /// Identifiers and signatures: quoted when they carry markup.
    Quoted,
}

/// Accumulates the sections of one page in order.
pub(super) struct PageWriter<'a> {
    doc: &'a SpecDocument,
    links: LinkResolver<'a>,
    anchors: Anchors,
    pub(super) fallbacks: Vec<Warning>,
    pub(super) sections: Vec<RenderedSection>,
}

impl<'a> PageWriter<'a> {
    pub(super) fn new(doc: &'a SpecDocument, links: LinkResolver<'a>) -> Self {
        Self {
            doc,
            links,
            anchors: Anchors::default(),
            fallbacks: Vec::new(),
            sections: Vec::new(),
        }
    }

    fn heading(&mut self, level: u8, title: &str) -> String {
        let anchor = self.anchors.unique(title);
        format!("{} {} {{#{anchor}}}\n\n", "#".repeat(level as usize), escape_inline(title))
    }

    pub(super) fn push_section(&mut self, title: &str, content: &str) {
        let anchor = self.anchors.unique(title);
        let content = content.trim_end();
        self.sections.push(RenderedSection {
            title: title.to_string(),
            level: 2,
            markdown: format!("## {} {{#{anchor}}}\n\n{content}\n", escape_inline(title)),
            anchor,
        });
    }

    fn fallback(&mut self, section: &str, value: &Value) {
        let warning = shape_fallback(section, value);
        if !self.fallbacks.contains(&warning) {
            self.fallbacks.push(warning);
        }
    }

    pub(super) fn meta(&mut self) {
        let meta_map = self.doc.section("meta").and_then(Value::as_mapping);
        let mut lines = vec![format!("- **ID:** {}", code_span(self.doc.id().as_str()))];

        if let Some(map) = meta_map {
            for (field, label) in META_FIELDS {
                if let Some(value) = scalar(map, field) {
                    lines.push(format!("- **{label}:** {}", self.links.link_bare_ids(&value)));
                }
            }
            let tags = self.doc.meta().tags;
            if !tags.is_empty() {
                let tags: Vec<String> = tags.iter().map(|tag| code_span(tag)).collect();
                lines.push(format!("- **Tags:** {}", tags.join(", ")));
            }
            for (key, value) in map {
                let key = key_string(key);
                let known = key == "title"
                    || key == "tags"
                    || META_FIELDS.iter().any(|(field, _)| *field == key);
                if !known {
                    let text = self.list_item("meta", value, TextStyle::Linked);
                    lines.push(format!("- **{}:** {text}", escape_inline(&title_case(&key))));
                }
            }
        }

        self.push_section("Meta", &lines.join("\n"));
    }

    pub(super) fn relationships(&mut self, relationships: &Relationships) {
        let content = match relationship_graph(self.doc.id().as_str(), relationships) {
            Some(graph) => fenced_block("mermaid", &graph),
            None => "_No relationships defined._".to_string(),
        };
        self.push_section("Relationships", &content);
    }

    pub(super) fn diagrams(&mut self) {
        let diagrams = self.doc.diagrams(&mut self.fallbacks);
        let mut content = String::new();
        for (idx, diagram) in diagrams.iter().enumerate() {
            let title = diagram
                .title
                .clone()
                .unwrap_or_else(|| format!("Diagram {}", idx + 1));
            content.push_str(&self.heading(3, &title));
            if let Some(description) = &diagram.description {
                content.push_str(&escape_block(description));
                content.push_str("\n\n");
            }
            match &diagram.source {
                Some(source) => content.push_str(&fenced_block(&diagram.language, source)),
                None => content.push_str("_No diagram source provided._\n"),
            }
            content.push('\n');
        }
        if content.is_empty() {
            content = "_No diagrams defined._".to_string();
        }
        self.push_section("Diagrams", &content);
    }

    pub(super) fn contracts(&mut self) {
        let content = self.keyed_groups("contracts", CONTRACT_KINDS, TextStyle::Quoted, None);
        let content = content.unwrap_or_else(|| "_No contracts defined._".to_string());
        self.push_section("Contracts", &content);
    }

    pub(super) fn validation(&mut self) {
        let content = self.keyed_groups(
            "validation",
            VALIDATION_KINDS,
            TextStyle::Linked,
            Some("acceptance_criteria"),
        );
        let content = content.unwrap_or_else(|| "_No validation criteria defined._".to_string());
        self.push_section("Validation", &content);
    }

    /// Renders a mapping section as one subsection per key, known keys first
    /// in `kinds` order, the rest in source order. Items under
    /// `checklist_key` become task list entries.
    fn keyed_groups(
        &mut self,
        section: &str,
        kinds: &[(&str, &str)],
        style: TextStyle,
        checklist_key: Option<&str>,
    ) -> Option<String> {
        let value = self.doc.section(section)?;
        if value.is_null() {
            return None;
        }
        let Some(map) = value.as_mapping() else {
            self.fallback(section, value);
            return Some(self.block(section, value, 3, style));
        };
        if map.is_empty() {
            return None;
        }

        let mut ordered: Vec<(String, String, &Value)> = Vec::new();
        for (key, title) in kinds {
            if let Some(value) = map.get(*key) {
                ordered.push((key.to_string(), title.to_string(), value));
            }
        }
        for (key, value) in map {
            let key = key_string(key);
            if !kinds.iter().any(|(known, _)| *known == key) {
                let title = title_case(&key);
                ordered.push((key, title, value));
            }
        }

        let mut content = String::new();
        for (key, title, value) in ordered {
            content.push_str(&self.heading(3, &title));
            let checklist = checklist_key == Some(key.as_str());
            content.push_str(&self.group(section, value, style, checklist));
            content.push('\n');
        }
        Some(content)
    }

    fn group(&mut self, section: &str, value: &Value, style: TextStyle, checklist: bool) -> String {
        match value {
            Value::Sequence(items) if !items.is_empty() => {
                let marker = if checklist { "- [ ] " } else { "- " };
                let lines: Vec<String> = items
                    .iter()
                    .map(|item| format!("{marker}{}", self.list_item(section, item, style)))
                    .collect();
                lines.join("\n") + "\n"
            }
            Value::Mapping(map) if !map.is_empty() => {
                let lines: Vec<String> = map
                    .iter()
                    .map(|(key, item)| {
                        let key = key_string(key);
                        let text = self.list_item(section, item, style);
                        format!("- **{}**: {text}", escape_inline(&key))
                    })
                    .collect();
                lines.join("\n") + "\n"
            }
            other => self.block(section, other, MAX_HEADING_LEVEL, style),
        }
    }

    /// Generic rendering for a value, nesting mappings as headings from
    /// `level` down to [`MAX_HEADING_LEVEL`].
    fn block(&mut self, section: &str, value: &Value, level: u8, style: TextStyle) -> String {
        match value {
            Value::Null => "_Empty._\n".to_string(),
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                let text = flow_string(value);
                let paragraph = match style {
                    TextStyle::Linked => text
                        .trim()
                        .lines()
                        .map(|line| self.links.link_bare_ids(line))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    TextStyle::Quoted => escape_block(&text),
                };
                paragraph + "\n"
            }
            Value::Sequence(items) if items.is_empty() => "_Empty._\n".to_string(),
            Value::Sequence(_) => self.group(section, value, style, false),
            Value::Mapping(map) if level <= MAX_HEADING_LEVEL => {
                self.nested(section, map, level, style)
            }
            other => self.yaml_fallback(section, other),
        }
    }

    fn nested(&mut self, section: &str, map: &Mapping, level: u8, style: TextStyle) -> String {
        if map.is_empty() {
            return "_Empty._\n".to_string();
        }
        let mut content = String::new();
        for (key, value) in map {
            content.push_str(&self.heading(level, &title_case(&key_string(key))));
            content.push_str(&self.block(section, value, level + 1, style));
            content.push('\n');
        }
        content
    }

    fn yaml_fallback(&mut self, section: &str, value: &Value) -> String {
        self.fallback(section, value);
        let yaml = serde_yaml::to_string(value).unwrap_or_else(|_| flow_string(value));
        fenced_block("yaml", &yaml)
    }

    /// One list entry, without its bullet marker.
    fn list_item(&mut self, section: &str, item: &Value, style: TextStyle) -> String {
        let styled = |this: &Self, text: &str| match style {
            TextStyle::Linked => this.links.link_bare_ids(text),
            TextStyle::Quoted => quote_if_needed(text),
        };
        match item {
            Value::Null => "_empty_".to_string(),
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                styled(self, &flow_string(item))
            }
            Value::Mapping(map) if map.values().all(is_scalar) => {
                let name = ["name", "title", "id"]
                    .iter()
                    .find_map(|field| scalar(map, field).map(|v| (*field, v)));
                let mut parts = Vec::new();
                for (key, value) in map {
                    let key = key_string(key);
                    if name.as_ref().is_some_and(|(field, _)| *field == key) || value.is_null() {
                        continue;
                    }
                    parts.push(format!(
                        "{}: {}",
                        escape_inline(&key),
                        styled(self, &flow_string(value))
                    ));
                }
                match name {
                    Some((_, name)) if parts.is_empty() => format!("**{}**", escape_inline(&name)),
                    Some((_, name)) => {
                        format!("**{}**: {}", escape_inline(&name), parts.join("; "))
                    }
                    None => parts.join("; "),
                }
            }
            other => {
                self.fallback(section, other);
                code_span(&flow_string(other))
            }
        }
    }

    pub(super) fn remaining(&mut self) {
        let remaining: Vec<(String, Value)> = self
            .doc
            .sections()
            .iter()
            .map(|(key, value)| (key_string(key), value.clone()))
            .filter(|(key, _)| !PLACED_SECTIONS.contains(&key.as_str()))
            .collect();
        for (key, value) in remaining {
            let content = self.block(&key, &value, 3, TextStyle::Linked);
            self.push_section(&free_section_title(&key), &content);
        }
    }

    pub(super) fn references(&mut self, relationships: &Relationships) {
        let references = self.doc.references(&mut self.fallbacks);
        let mut content = String::new();

        for reference in &references {
            let title = reference.title.clone().unwrap_or_else(|| reference.key.clone());
            content.push_str(&self.heading(3, &title));

            let mut lines = Vec::new();
            if let Some(kind) = &reference.kind {
                lines.push(format!("- **Type:** {}", escape_inline(kind)));
            }
            if let Some(link) = self.reference_link(reference) {
                lines.push(format!("- **Link:** {link}"));
            }
            if let Some(version) = &reference.version {
                lines.push(format!("- **Version:** {}", escape_inline(version)));
            }
            if let Some(owner) = &reference.owner {
                lines.push(format!("- **Owner:** {}", escape_inline(owner)));
            }
            if !reference.tags.is_empty() {
                let tags: Vec<String> = reference.tags.iter().map(|tag| code_span(tag)).collect();
                lines.push(format!("- **Tags:** {}", tags.join(", ")));
            }
            if let Some(notes) = &reference.notes {
                lines.push(format!("- **Notes:** {}", self.links.link_bare_ids(notes)));
            }
            if lines.is_empty() {
                lines.push("_No details._".to_string());
            }
            content.push_str(&lines.join("\n"));
            content.push_str("\n\n");
        }

        let linked = relationships.linked_ids();
        if !linked.is_empty() {
            content.push_str(&self.heading(3, "Linked Specifications"));
            for id in linked {
                content.push_str(&format!("- {}\n", self.links.resolve_or_mark(&id)));
            }
        }

        if content.is_empty() {
            content = "_No references defined._".to_string();
        }
        self.push_section("References", &content);
    }

    fn reference_link(&self, reference: &Reference) -> Option<String> {
        let points_at_spec = reference
            .kind
            .as_deref()
            .is_some_and(|kind| REFERENCE_KINDS_TO_SPECS.contains(&kind.to_lowercase().as_str()));
        if points_at_spec {
            let target = reference
                .path
                .as_deref()
                .map(strip_source_extension)
                .unwrap_or(&reference.key);
            return Some(self.links.resolve_or_mark(target));
        }
        if let Some(url) = &reference.url {
            return Some(format!("[{}](<{}>)", escape_inline(url), url.trim()));
        }
        if let Some(path) = &reference.path {
            return Some(code_span(path));
        }
        self.links.resolve(&reference.key)
    }

    pub(super) fn warnings(&mut self) {
        let mut warnings: Vec<Warning> = self.doc.warnings().to_vec();
        warnings.extend(self.fallbacks.iter().cloned());

        let content = if warnings.is_empty() {
            "_No warnings._".to_string()
        } else {
            warnings
                .iter()
                .map(|warning| {
                    format!(
                        "- **{}** ({}): {}",
                        escape_inline(&warning.section),
                        warning.kind.label(),
                        escape_inline(&warning.message)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.push_section("Warnings and Errors", &content);
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::String(_) | Value::Number(_) | Value::Bool(_)
    )
}

fn strip_source_extension(path: &str) -> &str {
    let path = path.trim().trim_start_matches("./");
    path.strip_suffix(".yaml")
        .or_else(|| path.strip_suffix(".yml"))
        .unwrap_or(path)
}

/// `acceptance_criteria` -> `Acceptance Criteria`.
/// Title for a free-form section, marked when it would read like a fixed one.
fn free_section_title(key: &str) -> String {
    let title = title_case(key);
    let slug = slugify(&title);
    if FIXED_TITLES.iter().any(|fixed| slugify(fixed) == slug) {
        format!("{title} (custom)")
    } else {
        title
    }
}

pub(super) fn title_case(key: &str) -> String {
    key.split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("acceptance_criteria"), "Acceptance Criteria");
        assert_eq!(title_case("non-functional"), "Non Functional");
        assert_eq!(title_case("apis"), "Apis");
    }

    #[test]
    fn test_free_section_title_avoids_fixed_headings() {
        assert_eq!(free_section_title("glossary"), "Glossary");
        assert_eq!(
            free_section_title("warnings_and_errors"),
            "Warnings And Errors (custom)"
        );
        assert_eq!(
            free_section_title("table-of-contents"),
            "Table Of Contents (custom)"
        );
        assert_eq!(free_section_title("Meta"), "Meta (custom)");
    }

    #[test]
    fn test_strip_source_extension() {
        assert_eq!(strip_source_extension("./svc/auth.yaml"), "svc/auth");
        assert_eq!(strip_source_extension("web.yml"), "web");
        assert_eq!(strip_source_extension("web"), "web");
    }
}
