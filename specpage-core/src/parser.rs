//! Parsing raw specification documents into an ordered tree.
//!
//! Documents are YAML. The tree keeps mapping keys in source order; the
//! renderer decides the final section order on its own.

use serde::Serialize;
use serde_yaml::Value;
use std::fmt;

/// Ordered tree of mappings, sequences and scalars produced by [`parse`].
pub type RawTree = Value;

/// Broad category of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseCause {
    /// Nothing but whitespace, comments or an explicit null.
    Empty,
    /// Input stopped in the middle of a structure.
    Incomplete,
    /// A quoted string or flow collection was never closed.
    Unterminated,
    /// The same key appears twice in one mapping.
    DuplicateKey,
    /// Anything else the YAML scanner rejects.
    Syntax,
}

impl ParseCause {
    fn describe(self) -> &'static str {
        match self {
            ParseCause::Empty => "the document is empty",
            ParseCause::Incomplete => "the document ends before a structure is complete",
            ParseCause::Unterminated => {
                "a quoted string, list or mapping is opened but never closed"
            }
            ParseCause::DuplicateKey => "a key is defined more than once in the same mapping",
            ParseCause::Syntax => "the document is not valid YAML",
        }
    }
}

impl fmt::Display for ParseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A document could not be parsed. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub cause: ParseCause,
}

impl ParseError {
    fn new(cause: ParseCause, line: usize, column: usize, hint: Option<String>) -> Self {
        let message = match hint {
            Some(hint) => format!("{} ({hint})", cause.describe()),
            None => cause.describe().to_string(),
        };
        Self {
            message,
            line,
            column,
            cause,
        }
    }
}

/// Parse the raw text of one source file.
pub fn parse(raw_text: &str) -> Result<RawTree, ParseError> {
    if is_blank(raw_text) {
        return Err(ParseError::new(ParseCause::Empty, 1, 1, None));
    }

    match serde_yaml::from_str::<Value>(raw_text) {
        Ok(Value::Null) => Err(ParseError::new(ParseCause::Empty, 1, 1, None)),
        Ok(tree) => Ok(tree),
        Err(err) => Err(translate(raw_text, &err)),
    }
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

fn translate(raw_text: &str, err: &serde_yaml::Error) -> ParseError {
    let detail = err.to_string();
    tracing::debug!(error = %detail, "yaml parser rejected document");

    let cause = classify(&detail);
    let duplicate_key = (cause == ParseCause::DuplicateKey)
        .then(|| duplicate_key_name(&detail))
        .flatten();

    // Duplicate keys are reported against the enclosing mapping, so look
    // for the repeated key ourselves.
    let (line, column) = duplicate_key
        .as_deref()
        .and_then(|key| locate_duplicate(raw_text, key))
        .or_else(|| {
            err.location()
                .map(|location| (location.line().max(1), location.column().max(1)))
        })
        .unwrap_or_else(|| end_of_input(raw_text));

    let hint = duplicate_key.map(|key| format!("key `{key}`"));
    ParseError::new(cause, line, column, hint)
}

fn classify(detail: &str) -> ParseCause {
    let lower = detail.to_lowercase();
    if lower.contains("duplicate entry") || lower.contains("duplicate key") {
        ParseCause::DuplicateKey
    } else if lower.contains("quoted scalar")
        || lower.contains("did not find expected ',' or")
        || lower.contains("flow sequence")
        || lower.contains("flow mapping")
    {
        ParseCause::Unterminated
    } else if lower.contains("end of stream") || lower.contains("unexpected end") {
        ParseCause::Incomplete
    } else {
        ParseCause::Syntax
    }
}

fn duplicate_key_name(detail: &str) -> Option<String> {
    let rest = detail.split("with key").nth(1)?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn locate_duplicate(raw_text: &str, key: &str) -> Option<(usize, usize)> {
    // Keys seen so far in each open block, by indentation.
    let mut open: Vec<(usize, Vec<String>)> = Vec::new();

    for (idx, line) in raw_text.lines().enumerate() {
        let content = line.trim_start();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }
        let mut indent = line.len() - content.len();
        let mut content = content;
        if let Some(item) = content.strip_prefix("- ") {
            // A list item opens a fresh mapping.
            indent += 2;
            open.retain(|(depth, _)| *depth < indent);
            content = item.trim_start();
        }
        open.retain(|(depth, _)| *depth <= indent);

        let Some(name) = content.split_once(':').map(|(name, _)| name.trim()) else {
            continue;
        };
        let name = name.trim_matches(|c| c == '"' || c == '\'');
        let slot = match open.iter().position(|(depth, _)| *depth == indent) {
            Some(slot) => slot,
            None => {
                open.push((indent, Vec::new()));
                open.len() - 1
            }
        };
        let block = &mut open[slot].1;
        if name == key && block.iter().any(|seen| seen == key) {
            return Some((idx + 1, indent + 1));
        }
        block.push(name.to_string());
    }
    None
}

fn end_of_input(raw_text: &str) -> (usize, usize) {
    let line = raw_text.lines().count().max(1);
    let column = raw_text.lines().last().map(|l| l.len() + 1).unwrap_or(1);
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_key_order() {
        let tree = parse("zeta: 1\nalpha: 2\nmeta:\n  purpose: x\n").unwrap();
        let keys: Vec<_> = tree
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["zeta", "alpha", "meta"]);
    }

    #[test]
    fn test_empty_input() {
        for text in ["", "   \n\n", "# only a comment\n", "---\n"] {
            let err = parse(text).unwrap_err();
            assert_eq!(err.cause, ParseCause::Empty);
            assert_eq!((err.line, err.column), (1, 1));
        }
    }

    #[test]
    fn test_explicit_null_is_empty() {
        assert_eq!(parse("~\n").unwrap_err().cause, ParseCause::Empty);
    }

    #[test]
    fn test_unterminated_quote() {
        let err = parse("meta:\n  purpose: \"never closed\n").unwrap_err();
        assert_eq!(err.cause, ParseCause::Unterminated);
        assert!(err.line >= 2);
    }

    #[test]
    fn test_unterminated_flow_sequence() {
        let err = parse("meta:\n  tags: [a, b\nother: 1\n").unwrap_err();
        assert_eq!(err.cause, ParseCause::Unterminated);
    }

    #[test]
    fn test_duplicate_key() {
        let err = parse("meta:\n  purpose: a\nmeta:\n  purpose: b\n").unwrap_err();
        assert_eq!(err.cause, ParseCause::DuplicateKey);
        assert!(err.message.contains("more than once"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_message_is_not_raw_library_text() {
        let err = parse("a: b: c\n").unwrap_err();
        assert_eq!(err.cause, ParseCause::Syntax);
        assert_eq!(err.message, ParseCause::Syntax.describe());
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_display_includes_location() {
        let err = parse("meta:\n  purpose: 'x\n").unwrap_err();
        let shown = err.to_string();
        assert!(shown.starts_with(&format!("line {}, column {}", err.line, err.column)));
    }

    #[test]
    fn test_scalar_root_parses() {
        // Rejecting a non-mapping root is the validator's job.
        assert_eq!(parse("just text\n").unwrap(), Value::String("just text".into()));
    }
}
