//! Surface reader.
//!
//! Turns the token stream into the parse-shaped tree the pipeline starts
//! from: `File <<= Group++`, with `Brace`/`Square`/`Paren` nesting, `List`
//! for comma-separated items, and flat token `Group`s everywhere else.
//! Statement boundaries (newline or `;`) split groups inside `File` and
//! `Brace`; newlines are insignificant inside `Square` and `Paren`.

use std::sync::Arc;

use dike_ast::{Ast, Location, NodeId, NodeKind, Source};
use tracing::trace;

use crate::error::{EngineError, Result};
use crate::lexer::{lex, SpannedToken, Token};

/// Parses a module, data, or query source into its parse-shaped tree.
///
/// `root_kind` selects the wrapper: [`NodeKind::File`] for modules,
/// [`NodeKind::Query`] for query expressions.
pub fn parse_source(ast: &mut Ast, source: Arc<Source>, root_kind: NodeKind) -> Result<NodeId> {
    trace!(name = %source.name, "Reading source");
    let tokens = lex(&source.contents).map_err(|offset| {
        let location = Location::span(Arc::clone(&source), offset, 1);
        EngineError::ParseError {
            source_name: source.name.clone(),
            location: location.describe(),
            message: format!("Unexpected character {:?}", location.view()),
        }
    })?;
    let mut reader = Reader {
        ast,
        source: Arc::clone(&source),
        tokens: &tokens,
        pos: 0,
    };
    let root = reader.ast.node(root_kind);
    reader.read_statements(root, None)?;
    if reader.pos < tokens.len() {
        let location = reader.token_location(reader.pos);
        return Err(EngineError::ParseError {
            source_name: source.name.clone(),
            location: location.describe(),
            message: format!("Unexpected {:?}", location.view()),
        });
    }
    Ok(root)
}

struct Reader<'a> {
    ast: &'a mut Ast,
    source: Arc<Source>,
    tokens: &'a [SpannedToken],
    pos: usize,
}

impl Reader<'_> {
    fn token_location(&self, pos: usize) -> Location {
        let token = &self.tokens[pos];
        Location::span(Arc::clone(&self.source), token.start, token.len)
    }

    fn token_text(&self, pos: usize) -> &str {
        let token = &self.tokens[pos];
        &self.source.contents[token.start..token.start + token.len]
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|t| t.token)
    }

    fn parse_error(&self, pos: usize, message: impl Into<String>) -> EngineError {
        let location = if pos < self.tokens.len() {
            self.token_location(pos).describe()
        } else {
            format!("{}:<eof>", self.source.name)
        };
        EngineError::ParseError {
            source_name: self.source.name.clone(),
            location,
            message: message.into(),
        }
    }

    /// Reads statement-split content into `parent` until `close` (or EOF).
    /// Comma-separated runs collapse into a `List` child.
    fn read_statements(&mut self, parent: NodeId, close: Option<Token>) -> Result<()> {
        let mut group = self.ast.node(NodeKind::Group);
        let mut list: Option<NodeId> = None;
        let mut swallow_commas = false;

        macro_rules! finish_group {
            () => {
                if !self.ast.is_empty(group) {
                    match list {
                        Some(l) => {
                            self.ast.push_back(l, group);
                            self.ast.push_back(parent, l);
                            list = None;
                        }
                        None => self.ast.push_back(parent, group),
                    }
                    group = self.ast.node(NodeKind::Group);
                } else if let Some(l) = list.take() {
                    self.ast.push_back(parent, l);
                }
                swallow_commas = false;
            };
        }

        while let Some(token) = self.peek() {
            if Some(token) == close {
                self.pos += 1;
                finish_group!();
                return Ok(());
            }
            match token {
                Token::Newline => {
                    self.pos += 1;
                    if self.continues_statement(group) {
                        continue;
                    }
                    finish_group!();
                }
                Token::Semicolon => {
                    self.pos += 1;
                    finish_group!();
                }
                Token::Comma => {
                    self.pos += 1;
                    if swallow_commas {
                        continue;
                    }
                    let l = match list {
                        Some(l) => l,
                        None => {
                            let l = self.ast.node(NodeKind::List);
                            list = Some(l);
                            l
                        }
                    };
                    if !self.ast.is_empty(group) {
                        self.ast.push_back(l, group);
                        group = self.ast.node(NodeKind::Group);
                    }
                }
                Token::BraceClose | Token::SquareClose | Token::ParenClose => {
                    return Err(self.parse_error(self.pos, "Unbalanced closing bracket"));
                }
                _ => {
                    if self.ast.is_empty(group) && self.starts_declaration() {
                        swallow_commas = true;
                    }
                    let unit = self.read_unit()?;
                    self.ast.push_back(group, unit);
                }
            }
        }
        if close.is_some() {
            return Err(self.parse_error(self.pos, "Unclosed bracket"));
        }
        finish_group!();
        Ok(())
    }

    /// Reads comma/semicolon-split content (newlines insignificant) into
    /// `parent` until `close`.
    fn read_items(&mut self, parent: NodeId, close: Token) -> Result<()> {
        let mut group = self.ast.node(NodeKind::Group);
        let mut list: Option<NodeId> = None;

        macro_rules! finish_group {
            () => {
                if !self.ast.is_empty(group) {
                    match list {
                        Some(l) => {
                            self.ast.push_back(l, group);
                            self.ast.push_back(parent, l);
                            list = None;
                        }
                        None => self.ast.push_back(parent, group),
                    }
                    group = self.ast.node(NodeKind::Group);
                } else if let Some(l) = list.take() {
                    self.ast.push_back(parent, l);
                }
            };
        }

        while let Some(token) = self.peek() {
            if token == close {
                self.pos += 1;
                finish_group!();
                return Ok(());
            }
            match token {
                Token::Newline => {
                    self.pos += 1;
                }
                Token::Semicolon => {
                    self.pos += 1;
                    finish_group!();
                }
                Token::Comma => {
                    self.pos += 1;
                    let l = match list {
                        Some(l) => l,
                        None => {
                            let l = self.ast.node(NodeKind::List);
                            list = Some(l);
                            l
                        }
                    };
                    if !self.ast.is_empty(group) {
                        self.ast.push_back(l, group);
                        group = self.ast.node(NodeKind::Group);
                    }
                }
                Token::BraceClose | Token::SquareClose | Token::ParenClose => {
                    return Err(self.parse_error(self.pos, "Unbalanced closing bracket"));
                }
                _ => {
                    let unit = self.read_unit()?;
                    self.ast.push_back(group, unit);
                }
            }
        }
        Err(self.parse_error(self.pos, "Unclosed bracket"))
    }

    fn read_unit(&mut self) -> Result<NodeId> {
        let pos = self.pos;
        let token = self.tokens[pos].token;
        self.pos += 1;
        let location = self.token_location(pos);
        let node = match token {
            Token::BraceOpen => {
                let brace = self.ast.node_at(NodeKind::Brace, location);
                self.read_statements(brace, Some(Token::BraceClose))?;
                brace
            }
            Token::SquareOpen => {
                let square = self.ast.node_at(NodeKind::Square, location);
                self.read_items(square, Token::SquareClose)?;
                square
            }
            Token::ParenOpen => {
                let paren = self.ast.node_at(NodeKind::Paren, location);
                self.read_items(paren, Token::ParenClose)?;
                paren
            }
            other => {
                let kind = leaf_kind(other)
                    .ok_or_else(|| self.parse_error(pos, "Unexpected token"))?;
                self.ast.node_at(kind, location)
            }
        };
        Ok(node)
    }

    /// A newline continues the current statement after an infix operator or
    /// before an `else` branch.
    fn continues_statement(&self, group: NodeId) -> bool {
        if let Some(last) = self.ast.back(group) {
            if matches!(
                self.ast.kind(last),
                NodeKind::Add
                    | NodeKind::Subtract
                    | NodeKind::Multiply
                    | NodeKind::Divide
                    | NodeKind::Modulo
                    | NodeKind::And
                    | NodeKind::Or
                    | NodeKind::Equals
                    | NodeKind::NotEquals
                    | NodeKind::LessThan
                    | NodeKind::LessThanOrEquals
                    | NodeKind::GreaterThan
                    | NodeKind::GreaterThanOrEquals
                    | NodeKind::Assign
                    | NodeKind::Unify
                    | NodeKind::Dot
                    | NodeKind::Colon
                    | NodeKind::Not
                    | NodeKind::With
                    | NodeKind::As
                    | NodeKind::Else
                    | NodeKind::Default
                    | NodeKind::Package
                    | NodeKind::Import
            ) {
                return true;
            }
        }
        let mut next = self.pos;
        while next < self.tokens.len() && self.tokens[next].token == Token::Newline {
            next += 1;
        }
        next < self.tokens.len() && self.tokens[next].token == Token::Else
    }

    /// `some …` and `every …` declare comma-separated variables; the commas
    /// are separators within one statement, not list item boundaries.
    fn starts_declaration(&self) -> bool {
        match self.peek() {
            Some(Token::Some) => true,
            Some(Token::Ident) => self.token_text(self.pos) == "every",
            _ => false,
        }
    }
}

fn leaf_kind(token: Token) -> Option<NodeKind> {
    Some(match token {
        Token::Ident => NodeKind::Var,
        Token::Int => NodeKind::JSONInt,
        Token::Float => NodeKind::JSONFloat,
        Token::String => NodeKind::JSONString,
        Token::RawString => NodeKind::RawString,
        Token::True => NodeKind::JSONTrue,
        Token::False => NodeKind::JSONFalse,
        Token::Null => NodeKind::JSONNull,
        Token::Package => NodeKind::Package,
        Token::Import => NodeKind::Import,
        Token::Default => NodeKind::Default,
        Token::Some => NodeKind::SomeKw,
        Token::Else => NodeKind::Else,
        Token::As => NodeKind::As,
        Token::With => NodeKind::With,
        Token::Not => NodeKind::Not,
        Token::EmptySet => NodeKind::EmptySet,
        Token::Assign => NodeKind::Assign,
        Token::Unify => NodeKind::Unify,
        Token::Equals => NodeKind::Equals,
        Token::NotEquals => NodeKind::NotEquals,
        Token::LessThan => NodeKind::LessThan,
        Token::LessThanOrEquals => NodeKind::LessThanOrEquals,
        Token::GreaterThan => NodeKind::GreaterThan,
        Token::GreaterThanOrEquals => NodeKind::GreaterThanOrEquals,
        Token::Add => NodeKind::Add,
        Token::Subtract => NodeKind::Subtract,
        Token::Multiply => NodeKind::Multiply,
        Token::Divide => NodeKind::Divide,
        Token::Modulo => NodeKind::Modulo,
        Token::And => NodeKind::And,
        Token::Or => NodeKind::Or,
        Token::Dot => NodeKind::Dot,
        Token::Colon => NodeKind::Colon,
        Token::Placeholder => NodeKind::Placeholder,
        Token::Newline
        | Token::Semicolon
        | Token::Comma
        | Token::BraceOpen
        | Token::BraceClose
        | Token::SquareOpen
        | Token::SquareClose
        | Token::ParenOpen
        | Token::ParenClose => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(source: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let source = Source::new("test.rego", source);
        let root = parse_source(&mut ast, source, NodeKind::File).unwrap();
        (ast, root)
    }

    #[test]
    fn test_statements_split_on_newline() {
        let (ast, file) = read("package p\nmsg = 1");
        assert_eq!(ast.len(file), 2);
        assert_eq!(ast.kind(ast.child(file, 0)), NodeKind::Group);
    }

    #[test]
    fn test_rule_body_brace() {
        let (ast, file) = read("allow { x := 1; x > 0 }");
        let group = ast.child(file, 0);
        let brace = ast.child(group, 1);
        assert_eq!(ast.kind(brace), NodeKind::Brace);
        assert_eq!(ast.len(brace), 2);
    }

    #[test]
    fn test_comma_items_make_list() {
        let (ast, file) = read("xs = [1, 2, 3]");
        let group = ast.child(file, 0);
        let square = ast.child(group, 2);
        assert_eq!(ast.kind(square), NodeKind::Square);
        let list = ast.child(square, 0);
        assert_eq!(ast.kind(list), NodeKind::List);
        assert_eq!(ast.len(list), 3);
    }

    #[test]
    fn test_object_brace_list() {
        let (ast, file) = read("o = {\"a\": 1, \"b\": 2}");
        let group = ast.child(file, 0);
        let brace = ast.child(group, 2);
        let list = ast.child(brace, 0);
        assert_eq!(ast.kind(list), NodeKind::List);
        assert_eq!(ast.len(list), 2);
    }

    #[test]
    fn test_some_commas_swallowed() {
        let (ast, file) = read("p { some k, v in o }");
        let group = ast.child(file, 0);
        let brace = ast.child(group, 1);
        // one statement, not a list
        assert_eq!(ast.len(brace), 1);
        assert_eq!(ast.kind(ast.child(brace, 0)), NodeKind::Group);
    }

    #[test]
    fn test_else_line_continues() {
        let (ast, file) = read("p = 1 { q }\nelse = 2 { r }");
        assert_eq!(ast.len(file), 1);
    }

    #[test]
    fn test_unbalanced_brace_is_error() {
        let mut ast = Ast::new();
        let source = Source::new("bad.rego", "p { x");
        let result = parse_source(&mut ast, source, NodeKind::File);
        assert!(matches!(result, Err(EngineError::ParseError { .. })));
    }

    #[test]
    fn test_empty_set_token() {
        let (ast, file) = read("s = set()");
        let group = ast.child(file, 0);
        assert_eq!(ast.kind(ast.child(group, 2)), NodeKind::EmptySet);
    }
}
