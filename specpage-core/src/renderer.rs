//! Turns a [`SpecDocument`] into a documentation page.
//!
//! Section order is fixed: Meta, Relationships, Diagrams, Contracts,
//! Validation, every other top-level section in source order, References,
//! Warnings and Errors. The table of contents is read back from the finished
//! body so it can only list headings that really exist.

mod graph;
mod links;
mod sections;

use serde::Serialize;
use std::collections::BTreeSet;

use crate::document::{DocId, SpecDocument};
use crate::markdown::{self, escape_inline};
use crate::validator::Warning;

pub use links::{LinkResolver, identifiers};
use sections::PageWriter;

pub const TOC_TITLE: &str = "Table of Contents";

/// Page metadata for the publishing platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frontmatter {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    pub sidebar_label: String,
}

/// One top-level section; `markdown` starts with its own heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSection {
    pub title: String,
    pub level: u8,
    pub anchor: String,
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub text: String,
    pub anchor: String,
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub id: DocId,
    pub frontmatter: Frontmatter,
    pub body: Vec<RenderedSection>,
    /// Validation warnings followed by anything the renderer had to fall
    /// back on.
    pub warnings: Vec<Warning>,
    pub toc: Vec<TocEntry>,
}

impl RenderedPage {
    pub fn body_markdown(&self) -> String {
        self.body
            .iter()
            .map(|section| section.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn toc_markdown(&self) -> String {
        let top = self.toc.iter().map(|entry| entry.level).min().unwrap_or(2);
        let mut out = format!("## {TOC_TITLE} {{#{}}}\n\n", toc_anchor(&self.body));
        for entry in &self.toc {
            let indent = "  ".repeat((entry.level - top) as usize);
            out.push_str(&format!(
                "{indent}- [{}](#{})\n",
                escape_inline(&entry.text),
                entry.anchor
            ));
        }
        out
    }

    pub fn section_titles(&self) -> Vec<&str> {
        self.body.iter().map(|section| section.title.as_str()).collect()
    }
}

/// The ToC heading needs an anchor that no body heading already took.
fn toc_anchor(body: &[RenderedSection]) -> String {
    let base = markdown::slugify(TOC_TITLE);
    let mut anchor = base.clone();
    let mut n = 0;
    while body.iter().any(|section| section.markdown.contains(&format!("{{#{anchor}}}"))) {
        n += 1;
        anchor = format!("{base}-{n}");
    }
    anchor
}

/// Render `doc`. `known_ids` is every document id that currently has a page;
/// links to anything else are marked as not found.
pub fn render(doc: &SpecDocument, known_ids: &BTreeSet<DocId>) -> RenderedPage {
    let mut writer = PageWriter::new(doc, LinkResolver::new(doc.id(), known_ids));

    let relationships = doc.relationships(&mut writer.fallbacks);

    writer.meta();
    writer.relationships(&relationships);
    writer.diagrams();
    writer.contracts();
    writer.validation();
    writer.remaining();
    writer.references(&relationships);
    writer.warnings();

    let mut warnings = doc.warnings().to_vec();
    warnings.extend(writer.fallbacks.iter().cloned());

    let body = writer.sections;
    let toc = table_of_contents(&body);

    RenderedPage {
        id: doc.id().clone(),
        frontmatter: frontmatter(doc),
        body,
        warnings,
        toc,
    }
}

fn table_of_contents(body: &[RenderedSection]) -> Vec<TocEntry> {
    let markdown = body
        .iter()
        .map(|section| section.markdown.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    markdown::headings(&markdown)
        .into_iter()
        .filter(|heading| heading.level <= 3)
        .map(|heading| TocEntry {
            level: heading.level,
            anchor: heading
                .anchor
                .unwrap_or_else(|| markdown::slugify(&heading.text)),
            text: heading.text,
        })
        .collect()
}

fn frontmatter(doc: &SpecDocument) -> Frontmatter {
    let meta = doc.meta();
    let title = doc.title();

    let mut keywords: Vec<String> = Vec::new();
    for keyword in [&meta.kind, &meta.level, &meta.domain]
        .into_iter()
        .flatten()
        .chain(meta.tags.iter())
    {
        if !keywords.contains(keyword) {
            keywords.push(keyword.clone());
        }
    }

    Frontmatter {
        id: doc.id().slug().to_string(),
        sidebar_label: title.clone(),
        title,
        description: meta
            .purpose
            .map(|purpose| purpose.split_whitespace().collect::<Vec<_>>().join(" ")),
        keywords,
    }
}
