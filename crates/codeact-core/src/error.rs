//! Error types for snippet evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What went wrong, as reported back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The snippet does not parse.
    SyntaxInvalid,
    /// An import of a module outside the allowed and authorised set.
    ImportBlocked,
    /// A reference to a built-in or reflective name the policy forbids.
    NameBlocked,
    /// An attribute access the policy forbids for that runtime type.
    AttributeBlocked,
    /// A syntax construct outside the allowed node kinds.
    NodeBlocked,
    /// A name that was never bound.
    UndefinedName,
    /// Any other fault raised while evaluating.
    RuntimeFault,
}

impl ErrorKind {
    /// Capability-policy violations. These abort the whole snippet and can
    /// never be caught by the snippet itself.
    pub fn is_policy_violation(self) -> bool {
        matches!(
            self,
            ErrorKind::ImportBlocked
                | ErrorKind::NameBlocked
                | ErrorKind::AttributeBlocked
                | ErrorKind::NodeBlocked
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SyntaxInvalid => "SyntaxInvalid",
            ErrorKind::ImportBlocked => "ImportBlocked",
            ErrorKind::NameBlocked => "NameBlocked",
            ErrorKind::AttributeBlocked => "AttributeBlocked",
            ErrorKind::NodeBlocked => "NodeBlocked",
            ErrorKind::UndefinedName => "UndefinedName",
            ErrorKind::RuntimeFault => "RuntimeFault",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based source location of the offending construct. Columns count
/// characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
    /// The full text of `line`.
    pub source_line: String,
}

/// A single, well-typed evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EvaluationError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceSpan>,
}

impl EvaluationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeFault, message)
    }

    pub fn with_location(mut self, location: SourceSpan) -> Self {
        self.location = Some(location);
        self
    }
}

/// Byte offset to line/column translation for one snippet.
#[derive(Debug)]
pub(crate) struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            source,
            line_starts,
        }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self
            .source
            .get(start..offset)
            .map_or(0, |prefix| prefix.chars().count());
        (line + 1, column + 1)
    }

    fn line_text(&self, line: usize) -> String {
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .map_or(self.source.len(), |next| next - 1);
        self.source
            .get(start..end)
            .unwrap_or_default()
            .trim_end_matches('\r')
            .to_string()
    }

    pub fn span(&self, start: usize, end: usize) -> SourceSpan {
        let (line, column) = self.position(start);
        let (end_line, end_column) = self.position(end.max(start));
        SourceSpan {
            line,
            column,
            end_line,
            end_column,
            source_line: self.line_text(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_classification() {
        assert!(ErrorKind::ImportBlocked.is_policy_violation());
        assert!(ErrorKind::AttributeBlocked.is_policy_violation());
        assert!(ErrorKind::NodeBlocked.is_policy_violation());
        assert!(!ErrorKind::RuntimeFault.is_policy_violation());
        assert!(!ErrorKind::UndefinedName.is_policy_violation());
        assert!(!ErrorKind::SyntaxInvalid.is_policy_violation());
    }

    #[test]
    fn test_error_display() {
        let err = EvaluationError::new(ErrorKind::ImportBlocked, "Import of os is not allowed.");
        assert_eq!(err.to_string(), "ImportBlocked: Import of os is not allowed.");
    }

    #[test]
    fn test_line_index_spans() {
        let src = "x = 1\ny = é + z\n";
        let index = LineIndex::new(src);
        let z = src.find('z').unwrap();
        let span = index.span(z, z + 1);
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 9);
        assert_eq!(span.end_column, 10);
        assert_eq!(span.source_line, "y = é + z");
    }

    #[test]
    fn test_line_index_clamps_offsets() {
        let index = LineIndex::new("a");
        let span = index.span(10, 20);
        assert_eq!(span.line, 1);
        assert_eq!(span.column, 2);
    }
}
