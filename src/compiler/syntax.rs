//! Compile-time errors: a message, an optional source
//! position, and the `need_more` bit the repl uses to ask
//! for a continuation line.

use std::io::{self, Write};

use thiserror::Error;

use crate::common::{text, Position, Source};

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    pub pos: Option<Position>,
    pub len: usize,
    pub message: String,
    /// Set when the offending lexeme was the end of input,
    /// i.e. the error could be recovered by appending more
    /// source.
    pub need_more: bool,
}

impl ParseError {
    /// An error with no usable position.
    pub fn plain(message: impl Into<String>) -> ParseError {
        ParseError {
            pos: None,
            len: 0,
            message: message.into(),
            need_more: false,
        }
    }

    /// Renders the error with the offending line and a
    /// caret underline.
    pub fn report<W: Write>(&self, out: &mut W, source: &Source) -> io::Result<()> {
        match self.pos {
            Some(pos) => {
                writeln!(
                    out,
                    ">>> Parse error at {}:{}:{}:",
                    source.origin, pos.line, pos.column
                )?;
                text::show_line_segment(
                    out,
                    &source.contents,
                    pos.line.saturating_sub(1),
                    pos.column.saturating_sub(1),
                    self.len,
                )?;
                writeln!(out, " {}", self.message)
            }
            None => writeln!(out, ">>> Parse error in {}: {}", source.origin, self.message),
        }
    }
}
