//! Lexer module for tokenizing three-address listings

mod token;
mod scanner;

pub use token::{Token, TokenKind};
pub use scanner::Lexer;
