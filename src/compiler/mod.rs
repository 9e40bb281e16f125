//! The compiler pipeline: lexing with automatic semicolon
//! insertion, then a single pass from tokens to bytecode.

pub mod lex;
pub mod parse;
pub mod syntax;

pub use lex::{Lexeme, Lexer, Token};
pub use parse::parse;
pub use syntax::ParseError;
