//! The lexer reads source text and turns the characters into tokens the
//! parser can assemble into an AST.

use super::token::{keyword_kind, Token, TokenKind};
use std::path::PathBuf;
use std::sync::Arc;
use steward_core::{CompileError, Span};

/// Streaming lexer over one file's contents. `next_token` is pull-based and
/// keeps yielding `Eof` once the input is exhausted.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    file: Arc<PathBuf>,
    started: bool,
}

impl Lexer {
    pub fn new(source: &str, file: PathBuf) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 0,
            col: 0,
            file: Arc::new(file),
            started: false,
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, CompileError> {
        let content = std::fs::read_to_string(path).map_err(|e| CompileError::Syntax {
            reason: format!("failed to read {}: {}", path.display(), e),
            span: Span::new(Arc::new(path.to_path_buf()), 0, 0),
        })?;
        Ok(Self::new(&content, path.to_path_buf()))
    }

    pub fn file(&self) -> Arc<PathBuf> {
        self.file.clone()
    }

    fn here(&self) -> Span {
        Span::new(self.file.clone(), self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// The next grammatical token.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        // A zero-width indent precedes the first real token of a file, so
        // the parser can treat every statement as indent-prefixed.
        if !self.started {
            self.started = true;
            return Ok(Token::new(TokenKind::Indent, "", self.here()));
        }

        loop {
            match self.peek() {
                None => return Ok(Token::new(TokenKind::Eof, "", self.here())),
                Some('\n') => {
                    self.advance();
                    return Ok(self.scan_indent());
                }
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    return self.scan_identifier_or_prefixed_string()
                }
                Some(c) if c.is_ascii_digit() => return Ok(self.scan_number()),
                Some('"' | '\'') => return self.scan_string(StringFlavor::Plain),
                Some(_) => return Ok(self.scan_operator()),
            }
        }
    }

    /// Every newline yields an indent token whose text is the run of
    /// leading tabs and spaces on the next line.
    fn scan_indent(&mut self) -> Token {
        let span = self.here();
        let mut indent = String::new();
        while let Some(c @ (' ' | '\t')) = self.peek() {
            indent.push(c);
            self.advance();
        }
        Token::new(TokenKind::Indent, indent, span)
    }

    fn scan_identifier_or_prefixed_string(&mut self) -> Result<Token, CompileError> {
        let span = self.here();
        let first = self.advance().unwrap_or_default();

        if first == 'f' && matches!(self.peek(), Some('"' | '\'')) {
            let token = self.scan_string(StringFlavor::Format)?;
            return Ok(Token::new(TokenKind::FString, token.text, span));
        }
        if first == 'r' && matches!(self.peek(), Some('"' | '\'')) {
            let token = self.scan_string(StringFlavor::Raw)?;
            return Ok(Token::new(TokenKind::String, token.text, span));
        }

        let mut ident = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = keyword_kind(&ident).unwrap_or(TokenKind::Identifier);
        Ok(Token::new(kind, ident, span))
    }

    fn scan_number(&mut self) -> Token {
        let span = self.here();
        let mut number = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                number.push(c);
                self.advance();
            } else if c == '.' && !is_float && self.peek_next() != Some('.') {
                // A second dot, or `..`, is not part of the number.
                is_float = true;
                number.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        Token::new(kind, number, span)
    }

    fn scan_string(&mut self, flavor: StringFlavor) -> Result<Token, CompileError> {
        let span = self.here();
        let delimiter = self.advance().unwrap_or('"');
        let mut raw = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::Syntax {
                        reason: "EOL while scanning string literal".to_string(),
                        span: self.here(),
                    })
                }
                Some('\n') => {
                    return Err(CompileError::Syntax {
                        reason: "EOL while scanning string literal".to_string(),
                        span: self.here(),
                    })
                }
                Some(c) if c == delimiter => {
                    self.advance();
                    break;
                }
                Some('\\') if flavor != StringFlavor::Raw => {
                    // Keep the escape pair intact so an escaped delimiter
                    // does not end the literal; decoding happens below.
                    raw.push('\\');
                    self.advance();
                    if let Some(next) = self.advance() {
                        raw.push(next);
                    }
                }
                Some(c) => {
                    raw.push(c);
                    self.advance();
                }
            }
        }

        let text = match flavor {
            StringFlavor::Raw => raw,
            _ => decode_escapes(&raw, &span)?,
        };
        let kind = match flavor {
            StringFlavor::Format => TokenKind::FString,
            _ => TokenKind::String,
        };
        Ok(Token::new(kind, text, span))
    }

    fn scan_operator(&mut self) -> Token {
        let span = self.here();
        let c = self.advance().unwrap_or_default();
        let (kind, text): (TokenKind, String) = match c {
            '(' => (TokenKind::LeftParen, c.into()),
            ')' => (TokenKind::RightParen, c.into()),
            '[' => (TokenKind::LeftBracket, c.into()),
            ']' => (TokenKind::RightBracket, c.into()),
            '{' => (TokenKind::LeftBrace, c.into()),
            '}' => (TokenKind::RightBrace, c.into()),
            ',' => (TokenKind::Comma, c.into()),
            '@' => (TokenKind::At, c.into()),
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    if self.peek() == Some('.') {
                        self.advance();
                        (TokenKind::TripleDot, "...".into())
                    } else {
                        (TokenKind::DoubleDot, "..".into())
                    }
                } else {
                    (TokenKind::Dot, ".".into())
                }
            }
            ':' => {
                if self.peek() == Some(':') {
                    self.advance();
                    (TokenKind::DoubleColon, "::".into())
                } else {
                    (TokenKind::Colon, ":".into())
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::ComparisonOp, "==".into())
                } else {
                    (TokenKind::Assign, "=".into())
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::ComparisonOp, "!=".into())
                } else {
                    (TokenKind::Unknown, "!".into())
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::ComparisonOp, "<=".into())
                } else {
                    (TokenKind::ComparisonOp, "<".into())
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::ComparisonOp, ">=".into())
                } else {
                    (TokenKind::ComparisonOp, ">".into())
                }
            }
            '+' | '-' | '%' => (TokenKind::ArithmeticOp, c.into()),
            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    (TokenKind::ArithmeticOp, "**".into())
                } else {
                    (TokenKind::ArithmeticOp, "*".into())
                }
            }
            '/' => {
                if self.peek() == Some('/') {
                    self.advance();
                    (TokenKind::ArithmeticOp, "//".into())
                } else {
                    (TokenKind::ArithmeticOp, "/".into())
                }
            }
            other => (TokenKind::Unknown, other.into()),
        };
        Token::new(kind, text, span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringFlavor {
    Plain,
    Raw,
    Format,
}

fn decode_escapes(raw: &str, span: &Span) -> Result<String, CompileError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let code = u8::from_str_radix(&hex, 16).map_err(|_| CompileError::Syntax {
                    reason: format!("invalid \\x escape '\\x{hex}'"),
                    span: span.clone(),
                })?;
                out.push(code as char);
            }
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err(CompileError::Syntax {
                        reason: "invalid \\u escape, expected '{'".to_string(),
                        span: span.clone(),
                    });
                }
                let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| CompileError::Syntax {
                        reason: format!("invalid \\u escape '\\u{{{hex}}}'"),
                        span: span.clone(),
                    })?;
                out.push(code);
            }
            Some(other) => {
                return Err(CompileError::Syntax {
                    reason: format!("invalid escape sequence '\\{other}'"),
                    span: span.clone(),
                })
            }
            None => {
                return Err(CompileError::Syntax {
                    reason: "string ends in a bare backslash".to_string(),
                    span: span.clone(),
                })
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source, PathBuf::from("<test>"));
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token().expect("lexing failed");
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    #[test]
    fn leading_indent_is_zero_width() {
        let tokens = lex_all("a = 1");
        assert_eq!(tokens[0].kind, TokenKind::Indent);
        assert_eq!(tokens[0].text, "");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn eof_is_idempotent() {
        let mut lexer = Lexer::new("x", PathBuf::from("<test>"));
        loop {
            if lexer.next_token().unwrap().kind == TokenKind::Eof {
                break;
            }
        }
        for _ in 0..4 {
            assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
        }
    }

    #[test]
    fn keywords_and_identifiers() {
        let tokens = lex_all("resource implement promise webserver True");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            &kinds[..6],
            &[
                TokenKind::Indent,
                TokenKind::Resource,
                TokenKind::Implement,
                TokenKind::Promise,
                TokenKind::Identifier,
                TokenKind::True,
            ]
        );
    }

    #[test]
    fn numbers() {
        let tokens = lex_all("12 3.5 7.");
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[1].text, "12");
        assert_eq!(tokens[2].kind, TokenKind::Float);
        assert_eq!(tokens[2].text, "3.5");
        assert_eq!(tokens[3].kind, TokenKind::Float);
        assert_eq!(tokens[3].text, "7.");
    }

    #[test]
    fn second_dot_ends_a_number() {
        let tokens = lex_all("1..2");
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[2].kind, TokenKind::DoubleDot);
        assert_eq!(tokens[3].kind, TokenKind::Integer);
    }

    #[test]
    fn string_escapes() {
        let tokens = lex_all(r#"'a\nb'"#);
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].text, "a\nb");
    }

    #[test]
    fn raw_string_keeps_backslashes() {
        let tokens = lex_all(r#"r'a\nb'"#);
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].text, r"a\nb");
    }

    #[test]
    fn f_string_is_preserved() {
        let tokens = lex_all(r#"f"hello {name}""#);
        assert_eq!(tokens[1].kind, TokenKind::FString);
        assert_eq!(tokens[1].text, "hello {name}");
    }

    #[test]
    fn newline_in_string_is_an_error() {
        let mut lexer = Lexer::new("'abc\ndef'", PathBuf::from("<test>"));
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn operators() {
        let tokens = lex_all("= == != <= ** // / :: ... % @");
        let kinds: Vec<(TokenKind, &str)> = tokens[1..tokens.len() - 1]
            .iter()
            .map(|t| (t.kind, t.text.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TokenKind::Assign, "="),
                (TokenKind::ComparisonOp, "=="),
                (TokenKind::ComparisonOp, "!="),
                (TokenKind::ComparisonOp, "<="),
                (TokenKind::ArithmeticOp, "**"),
                (TokenKind::ArithmeticOp, "//"),
                (TokenKind::ArithmeticOp, "/"),
                (TokenKind::DoubleColon, "::"),
                (TokenKind::TripleDot, "..."),
                (TokenKind::ArithmeticOp, "%"),
                (TokenKind::At, "@"),
            ]
        );
    }

    #[test]
    fn indent_tokens_carry_leading_whitespace() {
        let tokens = lex_all("a\n    b\n\tc");
        let indents: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Indent)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(indents, vec!["", "    ", "\t"]);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = lex_all("a # trailing comment\nb");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Indent,
                TokenKind::Identifier,
                TokenKind::Indent,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unknown_characters_are_tokens_not_errors() {
        let tokens = lex_all("a ; b");
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].text, ";");
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens = lex_all("ab\n  cd");
        let cd = tokens
            .iter()
            .find(|t| t.text == "cd")
            .expect("cd token missing");
        assert_eq!(cd.span.line, 1);
        assert_eq!(cd.span.col, 2);
    }
}
