//! Introspection and container builtins.

use crate::{
    kernel::{guard_dict, guard_list, guard_num, guard_str, guard_str_opt, guardn},
    number::Number,
    vm::{
        state::{RuntimeError, State},
        value::{Str, Value},
    },
};

pub fn kind(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    Ok(Value::str(Str::new(args[0].kind_name().as_bytes())))
}

pub fn pop(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let list = guard_list(args, 0)?;
    match list.borrow_mut().pop() {
        Some(v) => Ok(v),
        None => Err(RuntimeError::new("the list is empty")),
    }
}

/// `NextKey(d, k)`: the key after `k` in bucket order, or
/// the first key when `k` is nil; nil once exhausted.
pub fn next_key(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let dict = guard_dict(args, 0)?;
    let key = guard_str_opt(args, 1)?;

    let dict = dict.borrow();
    let table = dict.table();
    let idx = match key {
        None => table.indexed_first(0),
        Some(s) => table.indexed_next(s.as_bytes(), s.hash()),
    };
    Ok(match idx {
        Some(i) => Value::str(Str::new(table.key_at(i))),
        None => Value::Nil,
    })
}

pub fn remove_key(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let dict = guard_dict(args, 0)?;
    let key = guard_str(args, 1)?;
    dict.borrow_mut().remove(key);
    Ok(Value::Nil)
}

pub fn ord(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?;
    if s.len() != 1 {
        return Err(RuntimeError::new(
            "can only be applied to a single-character string",
        ));
    }
    Ok(Value::num(Number::from_usize(s.as_bytes()[0] as usize)))
}

pub fn chr(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    let byte = n.to_u32() as u8;
    Ok(Value::str(Str::new(&[byte])))
}
