//! Reference line parser
//!
//! Splits text into a `Root -> Line | Directive -> token` tree. Good enough to
//! exercise the cache with real structure; not a language parser.

use crate::error::ParseError;
use crate::host::RootParser;
use crate::options::ParseOptions;
use crate::text::SourceText;
use crate::tree::{GreenElement, GreenNode, GreenToken, Root, SyntaxKind, SyntaxRoot};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parser producing one node per source line
#[derive(Debug, Clone, Copy, Default)]
pub struct LineParser;

impl LineParser {
    /// Create parser
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse without a cancellation token
    #[must_use]
    pub fn parse_text(text: &str) -> Arc<GreenNode> {
        let lines = text.split_inclusive('\n').map(parse_line).collect();
        Arc::new(GreenNode::new(SyntaxKind::Root, lines))
    }
}

impl RootParser for LineParser {
    fn parse(
        &self,
        _path: &str,
        _options: &ParseOptions,
        text: &SourceText,
        cancel: &CancellationToken,
    ) -> Result<Root, ParseError> {
        let mut lines = Vec::new();
        for line in text.as_str().split_inclusive('\n') {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled);
            }
            lines.push(parse_line(line));
        }
        Ok(SyntaxRoot::detached(Arc::new(GreenNode::new(
            SyntaxKind::Root,
            lines,
        ))))
    }
}

fn parse_line(line: &str) -> GreenElement {
    let kind = if line.trim_start().starts_with('#') {
        SyntaxKind::Directive
    } else {
        SyntaxKind::Line
    };

    let mut tokens = Vec::new();
    let mut rest = line;
    while let Some(first) = rest.chars().next() {
        let (token_kind, len) = if first == '\n' || first == '\r' {
            let len = rest.find(|c| c != '\n' && c != '\r').unwrap_or(rest.len());
            (SyntaxKind::Newline, len)
        } else if first.is_whitespace() {
            let len = rest
                .find(|c: char| !c.is_whitespace() || c == '\n' || c == '\r')
                .unwrap_or(rest.len());
            (SyntaxKind::Whitespace, len)
        } else {
            let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
            (SyntaxKind::Word, len)
        };
        let (head, tail) = rest.split_at(len);
        tokens.push(GreenElement::Token(GreenToken::new(token_kind, head)));
        rest = tail;
    }

    GreenElement::Node(Arc::new(GreenNode::new(kind, tokens)))
}
