//! Surface lexer for Rego v0 syntax.

use logos::Logos;

/// Tokens of the Rego surface language.
///
/// Keyword-like identifiers (`in`, `every`, `contains`, `if`) are lexed as
/// plain identifiers; the `keywords` pass promotes them, which keeps them
/// usable as variable names in the positions Rego allows.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // Statement separators are significant inside rule bodies.
    #[token("\n")]
    Newline,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,

    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("[")]
    SquareOpen,
    #[token("]")]
    SquareClose,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,

    #[token("package")]
    Package,
    #[token("import")]
    Import,
    #[token("default")]
    Default,
    #[token("some")]
    Some,
    #[token("else")]
    Else,
    #[token("as")]
    As,
    #[token("with")]
    With,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("set()")]
    EmptySet,

    #[token(":=")]
    Assign,
    #[token("==")]
    Equals,
    #[token("!=")]
    NotEquals,
    #[token("<=")]
    LessThanOrEquals,
    #[token(">=")]
    GreaterThanOrEquals,
    #[token("<")]
    LessThan,
    #[token(">")]
    GreaterThan,
    #[token("=")]
    Unify,
    #[token("+")]
    Add,
    #[token("-")]
    Subtract,
    #[token("*")]
    Multiply,
    #[token("/")]
    Divide,
    #[token("%")]
    Modulo,
    #[token("&")]
    And,
    #[token("|")]
    Or,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("_")]
    Placeholder,

    #[regex(r"[A-Za-z][A-Za-z0-9_]*|_[A-Za-z0-9_]+")]
    Ident,

    // Negation is a Subtract token; the infix passes rebuild unary minus.
    #[regex(r"(0|[1-9][0-9]*)\.[0-9]+([eE][+-]?[0-9]+)?|(0|[1-9][0-9]*)[eE][+-]?[0-9]+")]
    Float,
    #[regex(r"0|[1-9][0-9]*")]
    Int,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    String,
    #[regex(r"`[^`]*`")]
    RawString,
}

/// A lexed token with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpannedToken {
    /// The token.
    pub token: Token,
    /// Byte offset of the start.
    pub start: usize,
    /// Byte length.
    pub len: usize,
}

/// Lexes a source string, returning the token stream or the byte offset of
/// the first unlexable character.
pub fn lex(contents: &str) -> std::result::Result<Vec<SpannedToken>, usize> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(contents);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push(SpannedToken {
                token,
                start: span.start,
                len: span.end - span.start,
            }),
            Err(()) => return Err(span.start),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_lex_package() {
        assert_eq!(
            kinds("package p.q"),
            vec![Token::Package, Token::Ident, Token::Dot, Token::Ident]
        );
    }

    #[test]
    fn test_lex_rule() {
        assert_eq!(
            kinds("allow { x := 1 }"),
            vec![
                Token::Ident,
                Token::BraceOpen,
                Token::Ident,
                Token::Assign,
                Token::Int,
                Token::BraceClose,
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            kinds("x >= 2 + 3.5"),
            vec![
                Token::Ident,
                Token::GreaterThanOrEquals,
                Token::Int,
                Token::Add,
                Token::Float,
            ]
        );
    }

    #[test]
    fn test_lex_strings() {
        assert_eq!(kinds(r#""hi \"there\"""#), vec![Token::String]);
        assert_eq!(kinds("`raw text`"), vec![Token::RawString]);
    }

    #[test]
    fn test_lex_comments_skipped() {
        assert_eq!(
            kinds("x # comment\ny"),
            vec![Token::Ident, Token::Newline, Token::Ident]
        );
    }

    #[test]
    fn test_lex_empty_set() {
        assert_eq!(kinds("set()"), vec![Token::EmptySet]);
    }

    #[test]
    fn test_lex_placeholder_vs_ident() {
        assert_eq!(kinds("_"), vec![Token::Placeholder]);
        assert_eq!(kinds("_x"), vec![Token::Ident]);
    }

    #[test]
    fn test_lex_error_offset() {
        assert_eq!(lex("x @ y"), Err(2));
    }
}
