//! Lexer implementation using logos

use super::token::{Token, TokenKind};
use crate::common::{CompileError, CompileResult, Span};
use logos::Logos;

/// Lexer for three-address listings
pub struct Lexer<'a> {
    inner: logos::Lexer<'a, TokenKind>,
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            at_eof: false,
        }
    }

    /// Get the next token; `Eof` repeats once the input is exhausted
    pub fn next_token(&mut self) -> CompileResult<Token> {
        if self.at_eof {
            let len = self.inner.source().len();
            return Ok(Token::new(TokenKind::Eof, Span::new(len, len)));
        }

        match self.inner.next() {
            Some(Ok(kind)) => Ok(Token::new(kind, self.inner.span().into())),
            Some(Err(())) => Err(CompileError::lexer(
                format!("unexpected character '{}'", self.inner.slice()),
                self.inner.span().into(),
            )),
            None => {
                self.at_eof = true;
                let len = self.inner.source().len();
                Ok(Token::new(TokenKind::Eof, Span::new(len, len)))
            }
        }
    }

    /// Tokenize the entire source and return all tokens
    pub fn tokenize_all(mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_types() {
        let mut lexer = Lexer::new("fn var extern byte sword ptr goto bytes");

        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Fn));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Var));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Extern));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Byte));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::SWord));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Ptr));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Goto));
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::Identifier(s) if s == "bytes"
        ));
    }

    #[test]
    fn test_literals() {
        let tokens = Lexer::new(r#"42 0x1F 0b101 'a' '\n' "hi\"""#).tokenize_all().unwrap();

        assert!(matches!(&tokens[0].kind, TokenKind::IntLiteral(s) if s == "42"));
        assert!(matches!(&tokens[1].kind, TokenKind::HexLiteral(s) if s == "0x1F"));
        assert!(matches!(&tokens[2].kind, TokenKind::BinaryLiteral(s) if s == "0b101"));
        assert!(matches!(&tokens[3].kind, TokenKind::CharLiteral(s) if s == "'a'"));
        assert!(matches!(&tokens[4].kind, TokenKind::CharLiteral(s) if s == "'\\n'"));
        assert!(matches!(&tokens[5].kind, TokenKind::StringLiteral(s) if s == "\"hi\\\"\""));
        assert!(matches!(tokens[6].kind, TokenKind::Eof));
    }

    #[test]
    fn test_operators() {
        let tokens = Lexer::new("<< >> <= >= == != -> - ~").tokenize_all().unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LtLt,
                TokenKind::GtGt,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::Tilde,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_spans() {
        let mut lexer = Lexer::new("# header\nx // trailing\n  y");
        let x = lexer.next_token().unwrap();
        assert_eq!(x.span, Span::new(9, 10));
        let y = lexer.next_token().unwrap();
        assert_eq!(y.span, Span::new(25, 26));
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("x @");
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.span(), Some(Span::new(2, 3)));
    }
}
