use std::{fs, io, path::Path, rc::Rc};

/// `Source` represents some literal source code.
/// Whether a repl line, a file on disk, or a module body —
/// it's essentially a string with an origin, the origin
/// serving as the source's name in diagnostics.
#[derive(Debug, PartialEq, Eq)]
pub struct Source {
    pub contents: String,
    pub origin: String,
}

impl Source {
    /// Creates a new `Source` from a string and an origin name.
    pub fn new(contents: &str, origin: &str) -> Rc<Source> {
        Rc::new(Source {
            contents: contents.to_string(),
            origin: origin.to_string(),
        })
    }

    /// Build a `Source` by reading a file.
    pub fn path(path: &Path) -> io::Result<Rc<Source>> {
        let contents = fs::read_to_string(path)?;
        Ok(Source::new(&contents, &path.to_string_lossy()))
    }

    /// Build an anonymous `Source` containing just a string.
    /// Diagnostics will point at `(source)`.
    pub fn source(contents: &str) -> Rc<Source> {
        Source::new(contents, "(source)")
    }
}

/// A line/column pair, both 1-based, as reported in
/// diagnostics. Columns count bytes from the line start;
/// display widths are computed only when rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}
