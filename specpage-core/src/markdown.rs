//! Markdown helpers shared by the page renderer and the preview server.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd, html};
use std::collections::BTreeMap;

/// Characters that change meaning inside Markdown or MDX text.
const STRUCTURAL: &[char] = &['<', '>', '{', '}', '[', ']', '|', '*', '_', '`', '#', '\\', '~'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    pub anchor: Option<String>,
}

/// Escape text for use inside a single Markdown line.
pub fn escape_inline(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    escape_fragment(&flat)
}

/// Escape a multi-line paragraph, keeping its line breaks.
pub fn escape_block(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| escape_fragment(line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Escape a piece of a line without touching its surrounding spaces.
pub fn escape_fragment(line: &str) -> String {
    let encoded = html_escape::encode_text(line);
    let encoded: &str = encoded.as_ref();
    let mut out = String::with_capacity(encoded.len() + 8);
    for (idx, ch) in encoded.char_indices() {
        let at_start = encoded[..idx].trim().is_empty();
        let needs_escape = matches!(ch, '\\' | '`' | '*' | '_' | '[' | ']' | '{' | '}' | '|' | '~')
            || (at_start && matches!(ch, '#' | '-' | '+' | '='));
        if needs_escape {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn has_structural_markup(text: &str) -> bool {
    text.contains(STRUCTURAL)
}

/// Inline code span that survives any backticks inside `text`.
pub fn code_span(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let ticks = "`".repeat(longest_backtick_run(&flat) + 1);
    if flat.starts_with('`') || flat.ends_with('`') {
        format!("{ticks} {flat} {ticks}")
    } else {
        format!("{ticks}{flat}{ticks}")
    }
}

/// Text as-is when harmless, otherwise quoted in a code span.
pub fn quote_if_needed(text: &str) -> String {
    if has_structural_markup(text) {
        code_span(text)
    } else {
        escape_inline(text)
    }
}

/// Fenced block carrying `content` verbatim.
pub fn fenced_block(language: &str, content: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(content).max(2) + 1);
    let body = content.trim_end_matches('\n');
    format!("{fence}{language}\n{body}\n{fence}\n")
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

/// Hands out unique anchors for one page.
#[derive(Debug, Default)]
pub struct Anchors {
    used: BTreeMap<String, usize>,
}

impl Anchors {
    pub fn unique(&mut self, text: &str) -> String {
        let base = slugify(text);
        let count = self.used.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            let candidate = format!("{base}-{}", *count - 1);
            // A literal heading may already own the suffixed form.
            if self.used.contains_key(&candidate) {
                self.unique(&candidate)
            } else {
                self.used.insert(candidate.clone(), 1);
                candidate
            }
        }
    }
}

/// Headings as a Markdown reader sees them, in document order.
pub fn headings(markdown: &str) -> Vec<Heading> {
    let parser = Parser::new_ext(markdown, Options::ENABLE_HEADING_ATTRIBUTES);

    let mut headings = Vec::new();
    let mut current: Option<Heading> = None;
    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, id, .. }) => {
                current = Some(Heading {
                    level: heading_level(level),
                    text: String::new(),
                    anchor: id.map(|id| id.to_string()),
                });
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(mut heading) = current.take() {
                    heading.text = heading.text.trim().to_string();
                    headings.push(heading);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = current.as_mut() {
                    heading.text.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(heading) = current.as_mut() {
                    heading.text.push(' ');
                }
            }
            _ => {}
        }
    }
    headings
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Split a page into its YAML frontmatter and body.
pub fn split_frontmatter(page: &str) -> (Option<&str>, &str) {
    let Some(rest) = page.strip_prefix("---\n") else {
        return (None, page);
    };
    match rest.find("\n---\n") {
        Some(end) => (Some(&rest[..end + 1]), &rest[end + 5..]),
        None => (None, page),
    }
}

pub fn to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::all());
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}
