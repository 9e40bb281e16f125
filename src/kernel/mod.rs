//! The host bridge: native functions exposed to bytecode,
//! plus the stylized argument guards they share.

pub mod container;
pub mod io;
pub mod math;
pub mod system;

use std::{cell::RefCell, rc::Rc};

use crate::{
    number::Number,
    vm::{
        state::{RuntimeError, State},
        value::{Dict, List, Native, NativeFn, Str, Value},
    },
};

pub(crate) fn guardn(args: &[Value], expect: usize) -> Result<(), RuntimeError> {
    if args.len() != expect {
        return Err(RuntimeError::new(format!(
            "# of arguments: expected {}, got {}",
            expect,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn guardn_range(args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::new(format!(
            "# of arguments: expected {} to {}, got {}",
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn kind_mismatch(i: usize, expect: &str, got: &Value) -> RuntimeError {
    RuntimeError::new(format!(
        "argument #{}: expected {}, got {}",
        i + 1,
        expect,
        got.kind_name_long()
    ))
}

pub(crate) fn guard_num<'a>(args: &'a [Value], i: usize) -> Result<&'a Rc<Number>, RuntimeError> {
    match &args[i] {
        Value::Num(n) => Ok(n),
        other => Err(kind_mismatch(i, "number", other)),
    }
}

pub(crate) fn guard_str<'a>(args: &'a [Value], i: usize) -> Result<&'a Rc<Str>, RuntimeError> {
    match &args[i] {
        Value::Str(s) => Ok(s),
        other => Err(kind_mismatch(i, "string", other)),
    }
}

pub(crate) fn guard_str_opt<'a>(
    args: &'a [Value],
    i: usize,
) -> Result<Option<&'a Rc<Str>>, RuntimeError> {
    match &args[i] {
        Value::Nil => Ok(None),
        Value::Str(s) => Ok(Some(s)),
        other => Err(RuntimeError::new(format!(
            "argument #{}: expected string or nil, got {}",
            i + 1,
            other.kind_name_long()
        ))),
    }
}

pub(crate) fn guard_list<'a>(
    args: &'a [Value],
    i: usize,
) -> Result<&'a Rc<RefCell<List>>, RuntimeError> {
    match &args[i] {
        Value::List(list) => Ok(list),
        other => Err(kind_mismatch(i, "list", other)),
    }
}

pub(crate) fn guard_dict<'a>(
    args: &'a [Value],
    i: usize,
) -> Result<&'a Rc<RefCell<Dict>>, RuntimeError> {
    match &args[i] {
        Value::Dict(dict) => Ok(dict),
        other => Err(kind_mismatch(i, "dict", other)),
    }
}

/// Converts a nonnegative integer argument, distinguishing
/// "negative" from "too big" in the message.
pub(crate) fn guard_scale(n: &Number) -> Result<usize, RuntimeError> {
    match n.to_usize() {
        Some(v) => Ok(v),
        None if n.is_negative() => Err(RuntimeError::new("scale is negative")),
        None => Err(RuntimeError::new("scale is too big")),
    }
}

pub(crate) fn guard_base(n: &Number) -> Result<u8, RuntimeError> {
    match n.to_usize() {
        Some(v) if (2..=36).contains(&v) => Ok(v as u8),
        _ => Err(RuntimeError::new("invalid base")),
    }
}

pub(crate) fn guard_magnitude(n: &Number) -> Result<usize, RuntimeError> {
    match n.to_usize() {
        Some(v) => Ok(v),
        None if n.is_negative() => Err(RuntimeError::new("scale magnitude is negative")),
        None => Err(RuntimeError::new("scale magnitude is too big")),
    }
}

/// Registers every builtin as a global.
pub fn inject(state: &mut State) {
    let natives: &[(&'static str, NativeFn)] = &[
        ("Dasm", system::dasm),
        ("Kind", container::kind),
        ("Pop", container::pop),
        ("RemoveKey", container::remove_key),
        ("NextKey", container::next_key),
        ("Ord", container::ord),
        ("Chr", container::chr),
        ("Input", io::input),
        ("RawRead", io::raw_read),
        ("RawWrite", io::raw_write),
        ("Error", system::error),
        ("Clock", system::clock),
        ("Scale", math::scale),
        ("Where", system::where_),
        ("Random32", system::random32),
        ("trunc", math::trunc),
        ("floor", math::floor),
        ("ceil", math::ceil),
        ("round", math::round),
        ("frac", math::frac),
        ("LoadString", system::load_string),
        ("Require", system::require),
        ("ToNumber", math::to_number),
        ("Encode", math::encode),
        ("Decode", math::decode),
        ("NumDigits", math::num_digits),
        ("DownScale", math::down_scale),
        ("UpScale", math::up_scale),
        ("Wref", system::wref),
        ("Wvalue", system::wvalue),
    ];

    for &(name, func) in natives {
        state.set_global(name, Value::Native(Rc::new(Native { name, func })));
    }
}
