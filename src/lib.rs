//! # calx
//!
//! A small scripting language built around
//! arbitrary-precision decimal arithmetic. Source text is
//! lexed (with automatic semicolon insertion), compiled in
//! a single pass to bytecode, and executed by a stack-based
//! virtual machine whose numbers are signed decimals with
//! explicit precision control.
//!
//! ## Embedding
//!
//! ```
//! use calx::{compile, make_state, Source};
//!
//! let mut state = make_state();
//! let source = Source::new("x := 6 * 7; x;", "(demo)");
//! let func = compile(&mut state, source).unwrap();
//! let result = state.eval(func);
//! assert!(result.is_some());
//! ```
//!
//! Compilation errors carry a position and a `need_more`
//! bit (set when the input simply ended too early), which
//! is what the repl uses to prompt for continuation lines.
//! Runtime errors are rendered to stderr with a stack
//! trace, and `eval` yields `None`.

pub mod common;
pub mod compiler;
pub mod kernel;
pub mod number;
pub mod vm;

use std::{io::Write, path::PathBuf, rc::Rc};

pub use common::source::{Position, Source};
pub use compiler::syntax::ParseError;
pub use number::{Number, NumberTruncateParams};
pub use vm::{
    state::{RuntimeError, State},
    value::Func,
    Value,
};

/// Compiles a source into an entry function, honoring the
/// `CALX_DEBUG` bytecode dump.
pub fn compile(state: &mut State, source: Rc<Source>) -> Result<Rc<Func>, ParseError> {
    let func = compiler::parse::parse(state, source)?;
    if state.debug_dump {
        let mut err = std::io::stderr().lock();
        writeln!(err, "--- dump of {} ---", func.chunk.origin).ok();
        vm::dasm::dump(&mut err, &func.chunk.code, func.ip, func.shape().offset).ok();
        writeln!(err, "--- end of dump ---").ok();
    }
    Ok(func)
}

/// A fully initialized interpreter state: builtins
/// registered, environment configuration read, prelude
/// evaluated. Prints go to stdout.
pub fn make_state() -> State {
    make_state_with_output(Box::new(std::io::stdout()))
}

/// Same, but with prints routed to the given sink.
pub fn make_state_with_output(out: Box<dyn Write>) -> State {
    let mut state = State::with_output(out);

    if let Ok(v) = std::env::var("CALX_DEBUG") {
        if v.contains('1') {
            state.debug_dump = true;
        }
    }
    if let Ok(v) = std::env::var("CALX_PATH") {
        if !v.is_empty() {
            state.module_root = Some(PathBuf::from(v));
        }
    }

    kernel::inject(&mut state);
    inject_stdlib(&mut state);
    state
}

fn inject_stdlib(state: &mut State) {
    let source = Source::new(include_str!("stdlib.calx"), "(stdlib)");
    let func = match compile(state, source.clone()) {
        Ok(func) => func,
        Err(e) => {
            e.report(&mut std::io::stderr().lock(), &source).ok();
            panic!("cannot compile stdlib (see above)");
        }
    };
    if state.eval(func).is_none() {
        panic!("cannot evaluate stdlib (see above)");
    }
}
