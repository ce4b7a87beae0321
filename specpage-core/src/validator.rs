//! Section schema checks.
//!
//! Only a structurally unusable tree is fatal. Everything else becomes a
//! [`Warning`] that travels with the document into its rendered page.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::fmt;

use crate::parser::RawTree;

pub const KNOWN_TYPES: &[&str] = &[
    "system",
    "service",
    "component",
    "widget",
    "agent",
    "container",
    "mobile_component",
    "library",
];

pub const KNOWN_LEVELS: &[&str] = &["system", "container", "component", "code"];

/// Source keys that may hold a diagram's text.
pub const DIAGRAM_SOURCE_KEYS: &[&str] = &["mermaid", "plantuml", "diagram", "source"];

const KNOWN_SECTIONS: &[&str] = &[
    "meta",
    "relationships",
    "dependencies",
    "diagrams",
    "contracts",
    "validation",
    "references",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MissingSection,
    MissingField,
    UnknownValue,
    MalformedEntry,
    SuspectedTypo,
    RenderFallback,
}

impl WarningKind {
    pub fn label(self) -> &'static str {
        match self {
            WarningKind::MissingSection => "missing section",
            WarningKind::MissingField => "missing field",
            WarningKind::UnknownValue => "unknown value",
            WarningKind::MalformedEntry => "malformed entry",
            WarningKind::SuspectedTypo => "suspected typo",
            WarningKind::RenderFallback => "render fallback",
        }
    }
}

/// A non-fatal problem found while validating or rendering a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub section: String,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, section: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            section: section.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.section, self.message)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl ValidationResult {
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn validate(tree: &RawTree) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(root) = tree.as_mapping() else {
        result
            .errors
            .push(format!("the document root must be a mapping, found {}", describe(tree)));
        return result;
    };

    match root.get("meta") {
        None => result
            .errors
            .push("the required `meta` section is missing".to_string()),
        Some(meta) => check_meta(meta, &mut result.warnings),
    }

    if let Some(diagrams) = root.get("diagrams") {
        check_diagrams(diagrams, &mut result.warnings);
    }
    if let Some(references) = root.get("references") {
        check_references(references, &mut result.warnings);
    }

    for section in ["contracts", "validation"] {
        if !root.contains_key(section) {
            result.warnings.push(Warning::new(
                WarningKind::MissingSection,
                section,
                format!("no `{section}` section is defined"),
            ));
        }
    }

    check_section_names(root, &mut result.warnings);
    result
}

fn check_meta(meta: &Value, warnings: &mut Vec<Warning>) {
    let Some(meta) = meta.as_mapping() else {
        warnings.push(Warning::new(
            WarningKind::MalformedEntry,
            "meta",
            format!("expected a mapping, found {}", describe(meta)),
        ));
        return;
    };

    for field in ["purpose", "type", "level"] {
        if scalar(meta, field).is_none() {
            warnings.push(Warning::new(
                WarningKind::MissingField,
                "meta",
                format!("missing field `{field}`"),
            ));
        }
    }

    for (field, allowed) in [("type", KNOWN_TYPES), ("level", KNOWN_LEVELS)] {
        if let Some(value) = scalar(meta, field) {
            if !allowed.contains(&value.as_str()) {
                warnings.push(Warning::new(
                    WarningKind::UnknownValue,
                    "meta",
                    format!(
                        "`{field}` is `{value}`, expected one of: {}",
                        allowed.join(", ")
                    ),
                ));
            }
        }
    }
}

fn check_diagrams(diagrams: &Value, warnings: &mut Vec<Warning>) {
    let Some(entries) = diagrams.as_sequence() else {
        warnings.push(Warning::new(
            WarningKind::MalformedEntry,
            "diagrams",
            format!("expected a list, found {}", describe(diagrams)),
        ));
        return;
    };

    for (idx, entry) in entries.iter().enumerate() {
        let position = idx + 1;
        let Some(entry) = entry.as_mapping() else {
            warnings.push(Warning::new(
                WarningKind::MalformedEntry,
                "diagrams",
                format!("entry {position} is not a mapping"),
            ));
            continue;
        };
        if scalar(entry, "title").is_none() {
            warnings.push(Warning::new(
                WarningKind::MissingField,
                "diagrams",
                format!("entry {position} has no `title`"),
            ));
        }
        if !DIAGRAM_SOURCE_KEYS.iter().any(|key| scalar(entry, key).is_some()) {
            warnings.push(Warning::new(
                WarningKind::MissingField,
                "diagrams",
                format!(
                    "entry {position} has no diagram source ({})",
                    DIAGRAM_SOURCE_KEYS.join(", ")
                ),
            ));
        }
    }
}

fn check_references(references: &Value, warnings: &mut Vec<Warning>) {
    let Some(entries) = references.as_mapping() else {
        warnings.push(Warning::new(
            WarningKind::MalformedEntry,
            "references",
            format!("expected a mapping, found {}", describe(references)),
        ));
        return;
    };

    for (key, entry) in entries {
        let name = key_string(key);
        let Some(entry) = entry.as_mapping() else {
            warnings.push(Warning::new(
                WarningKind::MalformedEntry,
                "references",
                format!("`{name}` is not a mapping"),
            ));
            continue;
        };
        for field in ["type", "title"] {
            if scalar(entry, field).is_none() {
                warnings.push(Warning::new(
                    WarningKind::MissingField,
                    "references",
                    format!("`{name}` has no `{field}`"),
                ));
            }
        }
    }
}

fn check_section_names(root: &Mapping, warnings: &mut Vec<Warning>) {
    for key in root.keys() {
        let name = key_string(key);
        if KNOWN_SECTIONS.contains(&name.as_str()) {
            continue;
        }
        if let Some(known) = KNOWN_SECTIONS
            .iter()
            .find(|known| edit_distance(&name.to_lowercase(), known) <= (known.len() / 4).max(1))
        {
            warnings.push(Warning::new(
                WarningKind::SuspectedTypo,
                name.clone(),
                format!("unknown section `{name}`, did you mean `{known}`?"),
            ));
        }
    }
}

/// Returns the trimmed scalar at `field` as a string, ignoring empty values.
pub(crate) fn scalar(map: &Mapping, field: &str) -> Option<String> {
    let text = match map.get(field)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub(crate) fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        prev = current;
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn kinds(result: &ValidationResult) -> Vec<(WarningKind, String)> {
        result
            .warnings
            .iter()
            .map(|w| (w.kind, w.section.clone()))
            .collect()
    }

    #[test]
    fn test_complete_document_has_no_findings() {
        let tree = parse(
            "meta:\n  purpose: Auth\n  type: service\n  level: container\ncontracts: {}\nvalidation: {}\n",
        )
        .unwrap();
        let result = validate(&tree);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_non_mapping_root_is_fatal() {
        let result = validate(&parse("- a\n- b\n").unwrap());
        assert!(result.is_fatal());
        assert!(result.errors[0].contains("a list"));
    }

    #[test]
    fn test_missing_meta_is_fatal() {
        let result = validate(&parse("contracts: {}\n").unwrap());
        assert!(result.is_fatal());
    }

    #[test]
    fn test_meta_fields_and_enumerations() {
        let tree = parse("meta:\n  type: spaceship\n  level: galaxy\n").unwrap();
        let result = validate(&tree);
        assert!(!result.is_fatal());
        let messages: Vec<_> = result.warnings.iter().map(|w| w.message.clone()).collect();
        assert!(messages.contains(&"missing field `purpose`".to_string()));
        assert!(messages.iter().any(|m| m.starts_with("`type` is `spaceship`")));
        assert!(messages.iter().any(|m| m.starts_with("`level` is `galaxy`")));
    }

    #[test]
    fn test_missing_contracts_and_validation_warn() {
        let tree = parse("meta:\n  purpose: a\n  type: service\n  level: code\n").unwrap();
        let result = validate(&tree);
        assert_eq!(
            kinds(&result),
            vec![
                (WarningKind::MissingSection, "contracts".to_string()),
                (WarningKind::MissingSection, "validation".to_string()),
            ]
        );
    }

    #[test]
    fn test_diagram_entries() {
        let tree = parse(
            "meta: {purpose: a, type: service, level: code}\ncontracts: {}\nvalidation: {}\ndiagrams:\n  - title: Flow\n    mermaid: graph TD\n  - description: no title or source\n",
        )
        .unwrap();
        let result = validate(&tree);
        let messages: Vec<_> = result.warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("entry 2 has no `title`"));
        assert!(messages[1].contains("entry 2 has no diagram source"));
    }

    #[test]
    fn test_reference_entries() {
        let tree = parse(
            "meta: {purpose: a, type: service, level: code}\ncontracts: {}\nvalidation: {}\nreferences:\n  rfc:\n    url: https://example.com\n",
        )
        .unwrap();
        let result = validate(&tree);
        let messages: Vec<_> = result.warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["`rfc` has no `type`", "`rfc` has no `title`"]);
    }

    #[test]
    fn test_misspelled_section() {
        let tree = parse(
            "meta: {purpose: a, type: service, level: code}\ncontract: {}\nvalidation: {}\noverview: hi\n",
        )
        .unwrap();
        let result = validate(&tree);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SuspectedTypo && w.section == "contract"));
        assert!(!result.warnings.iter().any(|w| w.section == "overview"));
    }

    #[test]
    fn test_short_names_are_not_typos() {
        let tree = parse(
            "meta: {purpose: a, type: service, level: code}
contracts: {}
validation: {}
data: x
",
        )
        .unwrap();
        assert!(validate(&tree).warnings.is_empty());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("contract", "contracts"), 1);
        assert_eq!(edit_distance("valdation", "validation"), 1);
        assert_eq!(edit_distance("overview", "meta"), 7);
        assert_eq!(edit_distance("data", "meta"), 2);
    }
}
