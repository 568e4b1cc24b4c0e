//! Source text and locations.
//!
//! A [`Location`] is either a span into a shared [`Source`] or a synthetic
//! string produced by a rewrite. Locations compare, hash, and order by their
//! text view, which is what rule and variable identity rely on.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A named piece of source text (a policy file, a JSON document, or a query
/// expression).
#[derive(Debug)]
pub struct Source {
    /// Name of the source (file path or synthetic label).
    pub name: String,
    /// Full contents of the source.
    pub contents: String,
}

impl Source {
    /// Creates a new source from a name and its contents.
    #[must_use]
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            contents: contents.into(),
        })
    }

    /// Computes the 1-based line and column of a byte offset.
    #[must_use]
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for (i, ch) in self.contents.char_indices() {
            if i >= offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }
}

/// A view into source text, or a synthetic string introduced by a rewrite.
#[derive(Clone)]
pub enum Location {
    /// A byte span into a [`Source`].
    Span {
        /// The originating source.
        source: Arc<Source>,
        /// Byte offset of the start of the span.
        start: usize,
        /// Byte length of the span.
        len: usize,
    },
    /// Text with no originating source.
    Synthetic(Arc<str>),
}

impl Location {
    /// Creates a span location.
    #[must_use]
    pub fn span(source: Arc<Source>, start: usize, len: usize) -> Self {
        Self::Span { source, start, len }
    }

    /// Creates a synthetic location from owned text.
    #[must_use]
    pub fn synthetic(text: impl AsRef<str>) -> Self {
        Self::Synthetic(Arc::from(text.as_ref()))
    }

    /// Returns the text of this location.
    #[must_use]
    pub fn view(&self) -> &str {
        match self {
            Self::Span { source, start, len } => &source.contents[*start..*start + *len],
            Self::Synthetic(text) => text,
        }
    }

    /// Returns a `file:line:col` description for error messages, or the text
    /// itself for synthetic locations.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Span { source, start, .. } => {
                let (line, col) = source.line_col(*start);
                format!("{}:{line}:{col}", source.name)
            }
            Self::Synthetic(text) => format!("<synthetic:{text}>"),
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::Synthetic(Arc::from(""))
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.view())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.view())
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.view() == other.view()
    }
}

impl Eq for Location {}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        self.view().cmp(other.view())
    }
}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.view().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_view() {
        let source = Source::new("test.rego", "package p\nmsg = 1");
        let loc = Location::span(source, 8, 1);
        assert_eq!(loc.view(), "p");
    }

    #[test]
    fn test_synthetic_equals_span() {
        let source = Source::new("test.rego", "package p");
        let span = Location::span(source, 8, 1);
        let synth = Location::synthetic("p");
        assert_eq!(span, synth);
    }

    #[test]
    fn test_line_col() {
        let source = Source::new("test.rego", "package p\nmsg = 1");
        let loc = Location::span(source, 10, 3);
        assert!(loc.describe().ends_with("2:1"));
    }

    #[test]
    fn test_ordering_by_text() {
        let a = Location::synthetic("alpha");
        let b = Location::synthetic("beta");
        assert!(a < b);
    }
}
