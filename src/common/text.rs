//! Diagnostic line rendering: extracting the n-th source
//! line and printing caret/tilde underlines aligned by
//! display width rather than byte count.

use std::io::{self, Write};

use unicode_width::UnicodeWidthChar;

/// Returns the `lineno`-th (0-based) line of `text`,
/// without its trailing newline. Out-of-range line numbers
/// yield an empty string.
pub fn nth_line(text: &str, lineno: usize) -> &str {
    text.split('\n').nth(lineno).unwrap_or("")
}

/// Writes up to `limit` bytes of `line`, replacing
/// malformed or zero-width-unknown sequences with `?`, and
/// returns the total display width written. Advances
/// `*line` past the consumed bytes.
fn write_counting<W: Write>(out: &mut W, line: &mut &[u8], limit: usize) -> io::Result<usize> {
    let boundary = limit.min(line.len());
    let mut width = 0;
    let mut offset = 0;

    while offset < boundary {
        match decode_one(&line[offset..]) {
            Some((c, n)) => {
                let mut buf = [0u8; 4];
                out.write_all(c.encode_utf8(&mut buf).as_bytes())?;
                width += UnicodeWidthChar::width(c).unwrap_or(1);
                offset += n;
            }
            None => {
                // invalid byte: render as '?' of width 1
                out.write_all(b"?")?;
                width += 1;
                offset += 1;
            }
        }
    }

    *line = &line[offset..];
    Ok(width)
}

fn decode_one(bytes: &[u8]) -> Option<(char, usize)> {
    let len = match bytes.first()? {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return None,
    };
    let s = std::str::from_utf8(bytes.get(..len)?).ok()?;
    let c = s.chars().next()?;
    Some((c, len))
}

/// Prints a single source line, sanitized.
pub fn show_line<W: Write>(out: &mut W, text: &str, lineno: usize) -> io::Result<()> {
    let mut line = nth_line(text, lineno).as_bytes();
    write_counting(out, &mut line, usize::MAX)?;
    writeln!(out)
}

/// Prints a source line followed by a `^~~~` underline
/// below the byte segment `[seg_offset, seg_offset + seg_len)`.
pub fn show_line_segment<W: Write>(
    out: &mut W,
    text: &str,
    lineno: usize,
    seg_offset: usize,
    seg_len: usize,
) -> io::Result<()> {
    let mut line = nth_line(text, lineno).as_bytes();

    let width_before = write_counting(out, &mut line, seg_offset)?;
    let width_segment = write_counting(out, &mut line, seg_len)?;
    write_counting(out, &mut line, usize::MAX)?;
    writeln!(out)?;

    for _ in 0..width_before {
        out.write_all(b" ")?;
    }
    out.write_all(b"^")?;
    if width_segment > 1 {
        for _ in 0..width_segment - 1 {
            out.write_all(b"~")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn render_segment(text: &str, lineno: usize, off: usize, len: usize) -> String {
        let mut buf = Vec::new();
        show_line_segment(&mut buf, text, lineno, off, len).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn nth() {
        let text = "one\ntwo\nthree";
        assert_eq!(nth_line(text, 0), "one");
        assert_eq!(nth_line(text, 2), "three");
        assert_eq!(nth_line(text, 9), "");
    }

    #[test]
    fn underline() {
        let r = render_segment("x = yy + z\n", 0, 4, 2);
        assert_eq!(r, "x = yy + z\n    ^~");
    }

    #[test]
    fn underline_single() {
        let r = render_segment("a\n", 0, 0, 1);
        assert_eq!(r, "a\n^");
    }

    #[test]
    fn wide_chars_align() {
        // '世' is two columns wide, so the caret lands at column 2.
        let r = render_segment("世x", 0, 3, 1);
        assert_eq!(r, "世x\n  ^");
    }
}
