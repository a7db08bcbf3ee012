//! Token definitions for the three-address language

use crate::common::Span;
use logos::Logos;

/// Token with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    // === Keywords ===
    #[token("var")]
    Var,
    #[token("extern")]
    Extern,
    #[token("fn")]
    Fn,
    #[token("goto")]
    Goto,
    #[token("if")]
    If,
    #[token("return")]
    Return,
    #[token("call")]
    Call,

    // Types
    #[token("byte")]
    Byte,
    #[token("sbyte")]
    SByte,
    #[token("word")]
    Word,
    #[token("sword")]
    SWord,
    #[token("ptr")]
    Ptr,

    // === Identifiers ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // === Literals ===
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| lex.slice().to_string())]
    HexLiteral(String),

    #[regex(r"0[bB][01]+", |lex| lex.slice().to_string())]
    BinaryLiteral(String),

    #[regex(r"[0-9]+", |lex| lex.slice().to_string())]
    IntLiteral(String),

    #[regex(r"'([^'\\]|\\.|\\x[0-9a-fA-F][0-9a-fA-F])'", |lex| lex.slice().to_string())]
    CharLiteral(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice().to_string())]
    StringLiteral(String),

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    LtLt,
    #[token(">>")]
    GtGt,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,

    #[token("=")]
    Eq,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("->")]
    Arrow,

    // Special
    Eof,
}

impl TokenKind {
    /// Whether this token starts a type
    pub fn is_type_start(&self) -> bool {
        matches!(
            self,
            TokenKind::Byte | TokenKind::SByte | TokenKind::Word | TokenKind::SWord | TokenKind::Ptr
        )
    }

    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            TokenKind::EqEq | TokenKind::NotEq | TokenKind::Lt | TokenKind::Gt | TokenKind::LtEq | TokenKind::GtEq
        )
    }

    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Amp
                | TokenKind::Pipe
                | TokenKind::Caret
                | TokenKind::LtLt
                | TokenKind::GtGt
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Identifier(s) => write!(f, "identifier '{}'", s),
            TokenKind::IntLiteral(s) => write!(f, "integer '{}'", s),
            TokenKind::HexLiteral(s) => write!(f, "hex '{}'", s),
            TokenKind::BinaryLiteral(s) => write!(f, "binary '{}'", s),
            TokenKind::CharLiteral(s) => write!(f, "char {}", s),
            TokenKind::StringLiteral(s) => write!(f, "string {}", s),
            TokenKind::Var => write!(f, "'var'"),
            TokenKind::Extern => write!(f, "'extern'"),
            TokenKind::Fn => write!(f, "'fn'"),
            TokenKind::Goto => write!(f, "'goto'"),
            TokenKind::If => write!(f, "'if'"),
            TokenKind::Return => write!(f, "'return'"),
            TokenKind::Call => write!(f, "'call'"),
            TokenKind::Byte => write!(f, "'byte'"),
            TokenKind::SByte => write!(f, "'sbyte'"),
            TokenKind::Word => write!(f, "'word'"),
            TokenKind::SWord => write!(f, "'sword'"),
            TokenKind::Ptr => write!(f, "'ptr'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Amp => write!(f, "'&'"),
            TokenKind::Pipe => write!(f, "'|'"),
            TokenKind::Caret => write!(f, "'^'"),
            TokenKind::Tilde => write!(f, "'~'"),
            TokenKind::LtLt => write!(f, "'<<'"),
            TokenKind::GtGt => write!(f, "'>>'"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::NotEq => write!(f, "'!='"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::LtEq => write!(f, "'<='"),
            TokenKind::GtEq => write!(f, "'>='"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::Semi => write!(f, "';'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}
