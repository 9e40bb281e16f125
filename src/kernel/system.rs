//! Process-facing builtins: clocks, entropy, errors,
//! tracebacks, compilation, module loading, weakrefs.

use std::{
    io::Write,
    rc::Rc,
    sync::OnceLock,
    time::Instant,
};

use tracing::debug;

use crate::{
    common::Source,
    kernel::{guard_str, guardn},
    number::Number,
    vm::{
        dasm,
        state::{make_wref, RuntimeError, State},
        value::{Func, Value},
    },
};

pub fn error(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?;
    let capped = &s.as_bytes()[..s.len().min(8192)];
    Err(RuntimeError::new(
        String::from_utf8_lossy(capped).into_owned(),
    ))
}

/// `Clock()`: monotonic seconds since the first call, with
/// nine fractional digits.
pub fn clock(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 0)?;

    static START: OnceLock<Instant> = OnceLock::new();
    let elapsed = START.get_or_init(Instant::now).elapsed();
    let text = format!("{}.{:09}", elapsed.as_secs(), elapsed.subsec_nanos());
    Ok(Value::num(Number::parse(&text)))
}

/// `Random32()`: an entropy-backed 32-bit unsigned number.
pub fn random32(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 0)?;
    let r: u32 = rand::random();
    Ok(Value::num(Number::from_usize(r as usize)))
}

pub fn where_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 0)?;
    state.print_traceback();
    Ok(Value::Nil)
}

pub fn dasm(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let func: &Rc<Func> = match &args[0] {
        Value::Func(f) => f,
        other => {
            return Err(RuntimeError::new(format!(
                "argument #1: expected function (bytecode), got {}",
                other.kind_name_long()
            )))
        }
    };

    let mut err = std::io::stderr().lock();
    dasm::dump(&mut err, &func.chunk.code, func.ip, func.shape().offset).ok();
    Ok(Value::Nil)
}

/// `LoadString(s)`: compile source text into a callable
/// function. Compile errors are reported and surface as a
/// runtime error.
pub fn load_string(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?;

    let text = String::from_utf8_lossy(s.as_bytes()).into_owned();
    let source = Source::new(&text, "(LoadString() arg)");
    match crate::compile(state, source.clone()) {
        Ok(func) => Ok(Value::Func(func)),
        Err(e) => {
            e.report(&mut std::io::stderr().lock(), &source).ok();
            Err(RuntimeError::new("compilation failed"))
        }
    }
}

/// `Require(name)`: load and evaluate
/// `CALX_PATH/name.calx`, with a strict module-name
/// whitelist.
pub fn require(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?;

    let root = match &state.module_root {
        Some(root) => root.clone(),
        None => {
            return Err(RuntimeError::new(
                "cannot Require(): CALX_PATH was not set",
            ))
        }
    };

    let name = s.as_bytes();
    if name.is_empty() {
        return Err(RuntimeError::new("empty string passed"));
    }
    if name.iter().any(|&c| matches!(c, 0 | b'.' | b'/')) {
        return Err(RuntimeError::new("module name contains prohibited symbol"));
    }
    if name.len() > 8192 {
        return Err(RuntimeError::new("module name is too long"));
    }

    let path = root.join(format!("{}.calx", String::from_utf8_lossy(name)));
    debug!(path = %path.display(), "loading module");

    let source = match Source::path(&path) {
        Ok(source) => source,
        Err(e) => {
            let mut err = std::io::stderr().lock();
            writeln!(err, "{}: {}", path.display(), e).ok();
            return Err(RuntimeError::new("cannot load module"));
        }
    };

    let func = match crate::compile(state, source.clone()) {
        Ok(func) => func,
        Err(e) => {
            e.report(&mut std::io::stderr().lock(), &source).ok();
            return Err(RuntimeError::new("cannot load module"));
        }
    };

    match state.eval(func) {
        Some(v) => Ok(v),
        None => Err(RuntimeError::new("module evaluation failed")),
    }
}

pub fn wref(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    match make_wref(&args[0]) {
        Some(w) => Ok(Value::Wref(Rc::new(w))),
        None => Err(RuntimeError::new(format!(
            "cannot make weakref to {} value",
            args[0].kind_name()
        ))),
    }
}

pub fn wvalue(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    match &args[0] {
        Value::Wref(w) => Ok(w.deref()),
        other => Err(RuntimeError::new(format!(
            "argument #1: expected weakref, got {}",
            other.kind_name_long()
        ))),
    }
}
