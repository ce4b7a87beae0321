use std::collections::BTreeSet;

use crate::document::DocId;
use crate::markdown::{code_span, escape_fragment, escape_inline};

const EDGE_PUNCTUATION: &[char] = &['.', '-', '/'];

/// Resolves document ids to relative page links from one page.
pub struct LinkResolver<'a> {
    from: &'a DocId,
    known: &'a BTreeSet<DocId>,
}

impl<'a> LinkResolver<'a> {
    pub fn new(from: &'a DocId, known: &'a BTreeSet<DocId>) -> Self {
        Self { from, known }
    }

    pub fn resolve(&self, id: &str) -> Option<String> {
        let id = DocId::new(id.trim());
        self.known
            .contains(&id)
            .then(|| format!("[{}]({})", escape_inline(id.as_str()), self.from.link_to(&id)))
    }

    /// A link when `id` is known, otherwise the id marked as not found.
    pub fn resolve_or_mark(&self, id: &str) -> String {
        self.resolve(id)
            .unwrap_or_else(|| format!("{} (reference not found)", code_span(id.trim())))
    }

    /// Escapes `text`, turning bare ids of other documents into links.
    pub fn link_bare_ids(&self, text: &str) -> String {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut out = String::with_capacity(flat.len());
        let mut cursor = 0;
        for (start, token) in identifiers(&flat) {
            let id = DocId::new(token);
            if &id == self.from || !self.known.contains(&id) {
                continue;
            }
            out.push_str(&escape_fragment(&flat[cursor..start]));
            out.push_str(&format!("[{}]({})", escape_inline(token), self.from.link_to(&id)));
            cursor = start + token.len();
        }
        out.push_str(&escape_fragment(&flat[cursor..]));
        out
    }
}

fn is_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/')
}

/// Id-shaped tokens in `text` with their byte offsets. Leading and trailing
/// punctuation is not part of a token.
pub fn identifiers(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (start, is_id_char(ch)) {
            (None, true) => start = Some(idx),
            (Some(from), false) => {
                tokens.extend(trimmed_token(text, from, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        tokens.extend(trimmed_token(text, from, text.len()));
    }
    tokens
}

fn trimmed_token(text: &str, from: usize, to: usize) -> Option<(usize, &str)> {
    let raw = &text[from..to];
    let lead = raw.len() - raw.trim_start_matches(EDGE_PUNCTUATION).len();
    let token = raw[lead..].trim_end_matches(EDGE_PUNCTUATION);
    (!token.is_empty()).then_some((from + lead, token))
}
