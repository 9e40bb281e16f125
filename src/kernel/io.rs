//! Console builtins.

use std::io::{BufRead, Read, Write};

use crate::{
    kernel::{guardn, guard_str},
    vm::{
        state::{RuntimeError, State},
        value::{Str, Value},
    },
};

fn read_line_raw() -> Vec<u8> {
    let mut line = Vec::new();
    std::io::stdin().lock().read_until(b'\n', &mut line).ok();
    line
}

/// `Input()`: prompt on the output sink, then read one
/// line, without its newline. End of input reads as the
/// empty string.
pub fn input(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 0)?;

    state.out().write_all(b"Input() -> ").ok();
    state.out().flush().ok();

    let mut line = read_line_raw();
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Value::str(Str::new(&line)))
}

/// `RawRead(mode)`: `"L"` reads a line keeping the newline,
/// `"s"` strips it, `"B"` reads a single byte.
pub fn raw_read(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let mode = guard_str(args, 0)?;

    match mode.as_bytes() {
        b"L" => Ok(Value::str(Str::new(&read_line_raw()))),
        b"s" => {
            let mut line = read_line_raw();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            Ok(Value::str(Str::new(&line)))
        }
        b"B" => {
            let mut byte = [0u8; 1];
            let n = std::io::stdin().lock().read(&mut byte).unwrap_or(0);
            Ok(Value::str(Str::new(&byte[..n])))
        }
        _ => Err(RuntimeError::new(
            "invalid argument; expected either of: \"L\", \"s\", \"B\"",
        )),
    }
}

pub fn raw_write(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?.clone();
    state.out().write_all(s.as_bytes()).ok();
    Ok(Value::Nil)
}
