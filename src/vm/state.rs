//! The interpreter state and the bytecode evaluator.
//!
//! The value stack and call stack live on the Rust stack of
//! [`State::run`], so nested evaluations (a native function
//! compiling and running more code) each get fresh stacks
//! for free. The `State` itself carries what outlives an
//! evaluation: the globals, the ambient precision, the
//! output sink and the host configuration.

use std::{
    io::{self, Write},
    mem,
    path::PathBuf,
    rc::Rc,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    common::text,
    number::{Number, NumberTruncateParams, CMP_EQ, CMP_GREATER, CMP_LESS},
    vm::{
        chunk::{Aop, Chunk, Op},
        table::{fnv, Table},
        value::{
            append_repr, print_value, take_num, take_str, Dict, Func, Str, Value, Wref,
        },
    },
};

/// One line of a stack trace.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub origin: String,
    pub line: usize,
    pub text: String,
}

/// A runtime failure: a message plus the traceback captured
/// where the evaluator unwound.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> RuntimeError {
        RuntimeError {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Renders the error the way the toplevel reports it.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Runtime error: {}", self.message)?;
        write_trace(out, &self.trace)
    }
}

fn write_trace<W: Write>(out: &mut W, entries: &[TraceEntry]) -> io::Result<()> {
    writeln!(out, "Stack trace (most recent first):")?;
    for entry in entries {
        writeln!(out, ">>> at {}:{}:", entry.origin, entry.line)?;
        text::show_line(out, &entry.text, 0)?;
    }
    Ok(())
}

/// A site where one function called another. The entry
/// frame has no `call_ip`.
struct CallSite {
    call_ip: Option<usize>,
    callee: Rc<Func>,
    prev_locals_offset: usize,
}

pub struct State {
    globals_table: Table<u32>,
    globals: Vec<Option<Value>>,
    ntp: NumberTruncateParams,
    out: Box<dyn Write>,

    /// Call-stack snapshot taken before entering a native
    /// function, so builtins can render a traceback.
    native_frames: Vec<(Rc<Chunk>, usize)>,

    /// `CALX_PATH`: module root and `rc.calx` location.
    pub module_root: Option<PathBuf>,
    /// `CALX_DEBUG`: dump compiled chunks to stderr.
    pub debug_dump: bool,
}

impl State {
    pub fn new() -> State {
        State::with_output(Box::new(io::stdout()))
    }

    /// A state writing `print` output to the given sink.
    pub fn with_output(out: Box<dyn Write>) -> State {
        State {
            globals_table: Table::new(0),
            globals: Vec::new(),
            ntp: NumberTruncateParams::from_prec(20),
            out,
            native_frames: Vec::new(),
            module_root: None,
            debug_dump: false,
        }
    }

    pub fn ntp(&self) -> NumberTruncateParams {
        self.ntp
    }

    pub fn set_ntp(&mut self, ntp: NumberTruncateParams) {
        self.ntp = ntp;
    }

    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    /// Interns a global name, allocating an (initially
    /// unset) slot on first reference.
    pub fn intern_global(&mut self, name: &[u8]) -> u32 {
        let old_size = self.globals.len() as u32;
        let idx = *self.globals_table.slot(name, fnv(name), || old_size);
        if idx == old_size {
            self.globals.push(None);
        }
        idx
    }

    /// Defines (or redefines) a global.
    pub fn set_global(&mut self, name: &str, value: Value) {
        let idx = self.intern_global(name.as_bytes());
        self.globals[idx as usize] = Some(value);
    }

    fn global_name(&self, idx: u32) -> String {
        let key = self.globals_table.key_at(idx);
        let capped = &key[..key.len().min(8192)];
        String::from_utf8_lossy(capped).into_owned()
    }

    /// Prints the current traceback, as seen from inside a
    /// native function.
    pub fn print_traceback(&self) {
        let entries: Vec<TraceEntry> = self
            .native_frames
            .iter()
            .map(|(chunk, ip)| trace_entry(chunk, *ip))
            .collect();
        write_trace(&mut io::stderr().lock(), &entries).ok();
    }

    /// Evaluates an entry function. Failures are rendered
    /// to stderr (message plus traceback) and yield `None`.
    pub fn eval(&mut self, func: Rc<Func>) -> Option<Value> {
        match self.run(func) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e.message, "evaluation failed");
                e.report(&mut io::stderr().lock()).ok();
                None
            }
        }
    }

    fn run(&mut self, callee: Rc<Func>) -> Result<Value, RuntimeError> {
        let shape = callee.shape();
        if shape.nargs_encoded != 0 {
            return Err(RuntimeError::new(
                "cannot evaluate a function that takes arguments",
            ));
        }

        let nlocals = shape.nlocals as usize;
        let mut stack: Vec<Value> = Vec::with_capacity(shape.maxstack + nlocals + 1);
        let mut frames: Vec<CallSite> = Vec::with_capacity(8);

        let mut chunk = callee.chunk.clone();
        let mut ip = callee.ip + 1;
        let mut locals_offset = 1usize;

        stack.push(Value::Func(callee.clone()));
        for _ in 0..nlocals {
            stack.push(Value::Nil);
        }
        frames.push(CallSite {
            call_ip: None,
            callee,
            prev_locals_offset: 0,
        });

        macro_rules! throw {
            ($e:expr) => {
                return Err(attach_trace($e, ip, &frames))
            };
        }

        loop {
            let instr = chunk.code[ip];
            match instr.op {
                Op::LoadConst => {
                    stack.push(chunk.consts[instr.c as usize].clone());
                    ip += 1;
                }

                Op::LoadLocal => {
                    let v = stack[locals_offset + instr.c as usize].clone();
                    stack.push(v);
                    ip += 1;
                }

                Op::LoadGlobal => {
                    let v = match &self.globals[instr.c as usize] {
                        Some(v) => v.clone(),
                        None => throw!(self.missing_global(instr.c)),
                    };
                    stack.push(v);
                    ip += 1;
                }

                Op::LoadAt => {
                    let i = pop(&mut stack);
                    let c = pop(&mut stack);
                    match get_elem_at(c, i) {
                        Ok(v) => stack.push(v),
                        Err(e) => throw!(e),
                    }
                    ip += 1;
                }

                Op::StoreLocal => {
                    let v = pop(&mut stack);
                    stack[locals_offset + instr.c as usize] = v;
                    ip += 1;
                }

                Op::StoreGlobal => {
                    let v = pop(&mut stack);
                    self.globals[instr.c as usize] = Some(v);
                    ip += 1;
                }

                Op::StoreAt => {
                    let v = pop(&mut stack);
                    let i = pop(&mut stack);
                    let c = pop(&mut stack);
                    if let Err(e) = store_elem_at(c, i, v) {
                        throw!(e);
                    }
                    ip += 1;
                }

                Op::ModifyLocal => {
                    let aop = Aop::from_u8(instr.a);
                    let v = pop(&mut stack);
                    let idx = locals_offset + instr.c as usize;
                    if let Err(e) = aop_check(aop, &stack[idx], &v) {
                        throw!(e);
                    }
                    let old = mem::replace(&mut stack[idx], Value::Nil);
                    match perform_aop(self.ntp, aop, old, v) {
                        Ok(r) => stack[idx] = r,
                        Err(e) => throw!(e),
                    }
                    ip += 1;
                }

                Op::ModifyGlobal => {
                    let aop = Aop::from_u8(instr.a);
                    let idx = instr.c as usize;
                    if self.globals[idx].is_none() {
                        throw!(self.missing_global(instr.c));
                    }
                    let v = pop(&mut stack);
                    if let Some(old) = &self.globals[idx] {
                        if let Err(e) = aop_check(aop, old, &v) {
                            throw!(e);
                        }
                    }
                    let old = self.globals[idx].take().unwrap_or(Value::Nil);
                    match perform_aop(self.ntp, aop, old, v) {
                        Ok(r) => self.globals[idx] = Some(r),
                        Err(e) => throw!(e),
                    }
                    ip += 1;
                }

                Op::ModifyAt => {
                    let aop = Aop::from_u8(instr.a);
                    let v = pop(&mut stack);
                    let i = pop(&mut stack);
                    let c = pop(&mut stack);
                    if let Err(e) = modify_elem_at(self.ntp, aop, c, i, v) {
                        throw!(e);
                    }
                    ip += 1;
                }

                Op::Print => {
                    let v = pop(&mut stack);
                    print_value(&mut self.out, &v).ok();
                    ip += 1;
                }

                Op::Return => {
                    let cs = match frames.pop() {
                        Some(cs) => cs,
                        None => throw!(RuntimeError::new("return with no active frame")),
                    };
                    let result = pop(&mut stack);
                    stack.truncate(locals_offset - 1);
                    match cs.call_ip {
                        None => return Ok(result),
                        Some(call_ip) => {
                            stack.push(result);
                            locals_offset = cs.prev_locals_offset;
                            if let Some(top) = frames.last() {
                                chunk = top.callee.chunk.clone();
                            }
                            ip = call_ip + 1;
                        }
                    }
                }

                Op::Jump => {
                    ip = (ip as i64 + instr.jump_offset() as i64) as usize;
                }

                Op::JumpUnless => {
                    let v = pop(&mut stack);
                    if v.is_truthy() {
                        ip += 1;
                    } else {
                        ip = (ip as i64 + instr.jump_offset() as i64) as usize;
                    }
                }

                Op::Call => {
                    let mut nargs = instr.c as usize;

                    if instr.a != 0 {
                        // Scatter: spread the top-of-stack
                        // list into call arguments.
                        let v = pop(&mut stack);
                        let items = match &v {
                            Value::List(list) => list.borrow().clone(),
                            other => throw!(RuntimeError::new(format!(
                                "cannot scatter {} value (expected list)",
                                other.kind_name()
                            ))),
                        };
                        nargs = nargs - 1 + items.len();
                        stack.extend(items);
                    }

                    let callee_value = stack[stack.len() - nargs - 1].clone();
                    match callee_value {
                        Value::Func(func) => {
                            let shape = func.shape();
                            let enc = shape.nargs_encoded;
                            if enc >= 0 {
                                if nargs != enc as usize {
                                    throw!(RuntimeError::new(format!(
                                        "wrong number of arguments: expected {}, got {}",
                                        enc, nargs
                                    )));
                                }
                            } else {
                                let required = (!enc) as usize;
                                if nargs < required {
                                    throw!(RuntimeError::new(format!(
                                        "wrong number of arguments: expected at least {}, got {}",
                                        required, nargs
                                    )));
                                }
                                let gathered = stack.split_off(stack.len() - (nargs - required));
                                stack.push(Value::list(gathered));
                                nargs = required + 1;
                            }

                            let nvars = shape.nlocals as usize - nargs;
                            stack.reserve(shape.maxstack + nvars);
                            frames.push(CallSite {
                                call_ip: Some(ip),
                                callee: func.clone(),
                                prev_locals_offset: locals_offset,
                            });
                            for _ in 0..nvars {
                                stack.push(Value::Nil);
                            }
                            locals_offset = stack.len() - shape.nlocals as usize;
                            chunk = func.chunk.clone();
                            ip = func.ip + 1;
                        }

                        Value::Native(native) => {
                            self.native_frames = snapshot(&frames, ip);
                            let args_start = stack.len() - nargs;
                            match (native.func)(self, &stack[args_start..]) {
                                Ok(r) => {
                                    stack.truncate(args_start - 1);
                                    stack.push(r);
                                    ip += 1;
                                }
                                Err(e) => throw!(e),
                            }
                        }

                        other => throw!(RuntimeError::new(format!(
                            "attempt to call {} value",
                            other.kind_name()
                        ))),
                    }
                }

                Op::Function => {
                    let f = Func {
                        chunk: chunk.clone(),
                        ip,
                    };
                    stack.push(Value::Func(Rc::new(f)));
                    ip += chunk.shapes[instr.c as usize].offset;
                }

                Op::Neg => {
                    let v = pop(&mut stack);
                    match v {
                        Value::Num(n) => stack.push(Value::num(take_num(n).negate())),
                        other => throw!(RuntimeError::new(format!(
                            "attempt to negate {}",
                            other.kind_name()
                        ))),
                    }
                    ip += 1;
                }

                Op::Not => {
                    let v = pop(&mut stack);
                    stack.push(Value::Flag(!v.is_truthy()));
                    ip += 1;
                }

                Op::Len => {
                    let v = pop(&mut stack);
                    let n = match &v {
                        Value::List(list) => list.borrow().len(),
                        Value::Dict(dict) => dict.borrow().len() as usize,
                        Value::Str(s) => s.len(),
                        other => throw!(RuntimeError::new(format!(
                            "attempt to compute length of {}",
                            other.kind_name()
                        ))),
                    };
                    stack.push(Value::num(Number::from_usize(n)));
                    ip += 1;
                }

                Op::Aop => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    match perform_aop(self.ntp, Aop::from_u8(instr.a), left, right) {
                        Ok(v) => stack.push(v),
                        Err(e) => throw!(e),
                    }
                    ip += 1;
                }

                Op::Cmp2Way => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    stack.push(Value::Flag(left.equals(&right) == (instr.a != 0)));
                    ip += 1;
                }

                Op::Cmp3Way => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    match cmp_3way(instr.a, left, right) {
                        Ok(v) => stack.push(v),
                        Err(e) => throw!(e),
                    }
                    ip += 1;
                }

                Op::List => {
                    let items = stack.split_off(stack.len() - instr.c as usize);
                    stack.push(Value::list(items));
                    ip += 1;
                }

                Op::Dict => {
                    let n = instr.c as usize * 2;
                    let kv_start = stack.len() - n;
                    for pair in stack[kv_start..].chunks(2) {
                        if !matches!(pair[0], Value::Str(_)) {
                            throw!(RuntimeError::new(format!(
                                "attempt to create dict with {} key (expected string)",
                                pair[0].kind_name()
                            )));
                        }
                    }
                    let kv = stack.split_off(kv_start);
                    let mut it = kv.into_iter();
                    let pairs = std::iter::from_fn(|| match (it.next(), it.next()) {
                        (Some(Value::Str(k)), Some(v)) => Some((k, v)),
                        _ => None,
                    });
                    let dict = Dict::from_pairs(pairs);
                    stack.push(Value::Dict(Rc::new(std::cell::RefCell::new(dict))));
                    ip += 1;
                }

                Op::LoadSymbolic | Op::StoreSymbolic | Op::ModifySymbolic => {
                    panic!("symbolic opcode reached the VM")
                }
            }
        }
    }

    fn missing_global(&self, idx: u32) -> RuntimeError {
        RuntimeError::new(format!("undefined global '{}'", self.global_name(idx)))
    }
}

impl Default for State {
    fn default() -> State {
        State::new()
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().unwrap_or(Value::Nil)
}

fn trace_entry(chunk: &Chunk, ip: usize) -> TraceEntry {
    let line = chunk.line_of(ip).unwrap_or(0);
    TraceEntry {
        origin: chunk.origin.clone(),
        line,
        text: text::nth_line(&chunk.source, line.saturating_sub(1)).to_string(),
    }
}

fn build_trace(frames: &[CallSite], ip: usize) -> Vec<TraceEntry> {
    let mut entries = Vec::new();
    let mut cur = Some(ip);
    for cs in frames.iter().rev() {
        let Some(i) = cur else { break };
        entries.push(trace_entry(&cs.callee.chunk, i));
        cur = cs.call_ip;
    }
    entries
}

fn snapshot(frames: &[CallSite], ip: usize) -> Vec<(Rc<Chunk>, usize)> {
    let mut v = Vec::new();
    let mut cur = Some(ip);
    for cs in frames.iter().rev() {
        let Some(i) = cur else { break };
        v.push((cs.callee.chunk.clone(), i));
        cur = cs.call_ip;
    }
    v
}

fn attach_trace(mut e: RuntimeError, ip: usize, frames: &[CallSite]) -> RuntimeError {
    if e.trace.is_empty() {
        e.trace = build_trace(frames, ip);
    }
    e
}

fn kind_error(aop: Aop, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::new(format!(
        "attempt to compute {} {} {}",
        left.kind_name(),
        aop.symbol(),
        right.kind_name()
    ))
}

/// Checks whether an arithmetic sub-operation can be
/// applied, without consuming the operands. Compound
/// assignments use this so a failing modify leaves its
/// target untouched.
fn aop_check(aop: Aop, left: &Value, right: &Value) -> Result<(), RuntimeError> {
    match aop {
        Aop::And | Aop::Or | Aop::Concat => Ok(()),
        _ => {
            let (l, r) = match (left, right) {
                (Value::Num(l), Value::Num(r)) => (l, r),
                _ => return Err(kind_error(aop, left, right)),
            };
            match aop {
                Aop::Div => {
                    if r.is_zero() {
                        return Err(RuntimeError::new("division by zero"));
                    }
                }
                Aop::Idiv | Aop::Mod => {
                    if r.is_int_zero() {
                        return Err(RuntimeError::new("division by zero"));
                    }
                }
                Aop::Pow => {
                    if r.is_negative() && !r.is_zero() {
                        return Err(RuntimeError::new("exponent is negative"));
                    }
                    if !r.is_frac_zero() {
                        return Err(RuntimeError::new(
                            "fraction part of exponent is non-zero",
                        ));
                    }
                    if r.to_usize().is_none() && !l.is_zero() && !l.abs_eq_small(1) {
                        return Err(RuntimeError::new("exponent is too large"));
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }
}

/// Applies an arithmetic sub-operation, consuming both
/// operands.
fn perform_aop(
    ntp: NumberTruncateParams,
    aop: Aop,
    left: Value,
    right: Value,
) -> Result<Value, RuntimeError> {
    match aop {
        Aop::And => Ok(if left.is_truthy() { right } else { left }),
        Aop::Or => Ok(if left.is_truthy() { left } else { right }),

        Aop::Concat => {
            let mut s = match left {
                Value::Str(rc) => take_str(rc),
                other => {
                    let mut s = Str::with_capacity(16);
                    append_repr(&mut s, &other);
                    s
                }
            };
            append_repr(&mut s, &right);
            Ok(Value::str(s))
        }

        _ => {
            aop_check(aop, &left, &right)?;
            let (l, r) = match (left, right) {
                (Value::Num(l), Value::Num(r)) => (l, r),
                (l, r) => return Err(kind_error(aop, &l, &r)),
            };
            let result = match aop {
                Aop::Add => Number::add(take_num(l), take_num(r)),
                Aop::Sub => Number::sub(take_num(l), take_num(r)),
                Aop::Mul => Number::mul(take_num(l), take_num(r)),
                Aop::Div => Number::div(take_num(l), take_num(r), ntp),
                Aop::Idiv => Number::idiv(take_num(l), take_num(r)),
                Aop::Mod => Number::imod(take_num(l), take_num(r)),
                Aop::Pow => match Number::pow(take_num(l), &r) {
                    Some(v) => v,
                    None => return Err(RuntimeError::new("exponent is too large")),
                },
                Aop::BitAnd => Number::bit_and(take_num(l), take_num(r)),
                Aop::BitOr => Number::bit_or(take_num(l), take_num(r)),
                Aop::BitXor => Number::bit_xor(take_num(l), take_num(r)),
                Aop::Shl => Number::bit_shl(take_num(l), take_num(r)),
                Aop::Shr => Number::bit_lshr(take_num(l), take_num(r)),
                Aop::And | Aop::Or | Aop::Concat => {
                    return Err(RuntimeError::new("bad arithmetic sub-operation"))
                }
            };
            Ok(Value::num(result))
        }
    }
}

fn cmp_symbol(mask: u8) -> &'static str {
    match mask {
        m if m == CMP_LESS => "<",
        m if m == CMP_LESS | CMP_EQ => "<=",
        m if m == CMP_GREATER => ">",
        _ => ">=",
    }
}

fn cmp_3way(mask: u8, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (&left, &right) {
        (Value::Num(l), Value::Num(r)) => Ok(Value::Flag(mask & l.compare(r) != 0)),
        (Value::Str(l), Value::Str(r)) => Ok(Value::Flag(mask & l.compare(r) != 0)),
        _ => Err(RuntimeError::new(format!(
            "attempt to compute {} {} {}",
            left.kind_name(),
            cmp_symbol(mask),
            right.kind_name()
        ))),
    }
}

/// Indexing for reads: out-of-range list and string
/// indices, and missing dict keys, read as nil.
fn get_elem_at(container: Value, index: Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(list) => {
            let n = match &index {
                Value::Num(n) => n,
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index list with {} (expected number)",
                        other.kind_name()
                    )))
                }
            };
            Ok(match n.to_usize() {
                Some(idx) => list.borrow().get(idx).cloned().unwrap_or(Value::Nil),
                None => Value::Nil,
            })
        }

        Value::Dict(dict) => {
            let key = match &index {
                Value::Str(s) => s,
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index dict with {} (expected string)",
                        other.kind_name()
                    )))
                }
            };
            Ok(dict.borrow().get(key).cloned().unwrap_or(Value::Nil))
        }

        Value::Str(s) => {
            let n = match &index {
                Value::Num(n) => n,
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index string with {} (expected number)",
                        other.kind_name()
                    )))
                }
            };
            Ok(match n.to_usize() {
                Some(idx) if idx < s.len() => Value::str(Str::new(&s.as_bytes()[idx..idx + 1])),
                _ => Value::Nil,
            })
        }

        other => Err(RuntimeError::new(format!(
            "attempt to index {} value",
            other.kind_name()
        ))),
    }
}

fn store_elem_at(container: Value, index: Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(list) => {
            let n = match &index {
                Value::Num(n) => n,
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index list with {} (expected number)",
                        other.kind_name()
                    )))
                }
            };
            let mut items = list.borrow_mut();
            match n.to_usize() {
                Some(idx) if idx < items.len() => items[idx] = value,
                Some(idx) if idx == items.len() => items.push(value),
                _ => {
                    return Err(RuntimeError::new(
                        "attempt to insert past the end of the list",
                    ))
                }
            }
            Ok(())
        }

        Value::Dict(dict) => {
            let key = match &index {
                Value::Str(s) => s.clone(),
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index dict with {} (expected string)",
                        other.kind_name()
                    )))
                }
            };
            dict.borrow_mut().insert(&key, value);
            Ok(())
        }

        Value::Str(_) => Err(RuntimeError::new("strings are immutable")),

        other => Err(RuntimeError::new(format!(
            "attempt to index {} value",
            other.kind_name()
        ))),
    }
}

fn modify_elem_at(
    ntp: NumberTruncateParams,
    aop: Aop,
    container: Value,
    index: Value,
    value: Value,
) -> Result<(), RuntimeError> {
    match container {
        Value::List(list) => {
            let n = match &index {
                Value::Num(n) => n,
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index list with {} (expected number)",
                        other.kind_name()
                    )))
                }
            };
            let mut items = list.borrow_mut();
            let idx = match n.to_usize() {
                Some(idx) if idx < items.len() => idx,
                Some(idx) if idx == items.len() => {
                    items.push(Value::Nil);
                    idx
                }
                _ => {
                    return Err(RuntimeError::new(
                        "attempt to insert past the end of the list",
                    ))
                }
            };
            aop_check(aop, &items[idx], &value)?;
            let old = mem::replace(&mut items[idx], Value::Nil);
            items[idx] = perform_aop(ntp, aop, old, value)?;
            Ok(())
        }

        Value::Dict(dict) => {
            let key = match &index {
                Value::Str(s) => s.clone(),
                other => {
                    return Err(RuntimeError::new(format!(
                        "attempt to index dict with {} (expected string)",
                        other.kind_name()
                    )))
                }
            };
            let mut d = dict.borrow_mut();
            let slot = d.slot_mut(&key);
            aop_check(aop, slot, &value)?;
            let old = mem::replace(slot, Value::Nil);
            *slot = perform_aop(ntp, aop, old, value)?;
            Ok(())
        }

        Value::Str(_) => Err(RuntimeError::new("strings are immutable")),

        other => Err(RuntimeError::new(format!(
            "attempt to index {} value",
            other.kind_name()
        ))),
    }
}

/// `Wref` constructor used by the host bridge; only lists
/// and dicts are weakrefable.
pub fn make_wref(v: &Value) -> Option<Wref> {
    match v {
        Value::List(rc) => Some(Wref::List(Rc::downgrade(rc))),
        Value::Dict(rc) => Some(Wref::Dict(Rc::downgrade(rc))),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn num(s: &str) -> Value {
        Value::num(Number::parse(s))
    }

    fn ntp() -> NumberTruncateParams {
        NumberTruncateParams::from_prec(20)
    }

    #[test]
    fn global_interning() {
        let mut state = State::new();
        let a = state.intern_global(b"x");
        let b = state.intern_global(b"y");
        let c = state.intern_global(b"x");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert!(state.globals[a as usize].is_none());
        assert_eq!(state.missing_global(b).message, "undefined global 'y'");
    }

    #[test]
    fn aop_basic() {
        let r = perform_aop(ntp(), Aop::Add, num("2"), num("3")).unwrap();
        assert!(r.equals(&num("5")));

        let r = perform_aop(ntp(), Aop::Div, num("1"), num("8")).unwrap();
        assert!(r.equals(&num("0.125")));

        let e = perform_aop(ntp(), Aop::Div, num("1"), num("0")).unwrap_err();
        assert_eq!(e.message, "division by zero");

        let e = perform_aop(ntp(), Aop::Add, num("1"), Value::Nil).unwrap_err();
        assert_eq!(e.message, "attempt to compute number + nil");
    }

    #[test]
    fn aop_logic_and_concat() {
        let r = perform_aop(ntp(), Aop::And, Value::Flag(true), num("7")).unwrap();
        assert!(r.equals(&num("7")));

        let r = perform_aop(ntp(), Aop::Or, Value::Nil, num("7")).unwrap();
        assert!(r.equals(&num("7")));

        let r = perform_aop(
            ntp(),
            Aop::Concat,
            Value::str(Str::new(b"n = ")),
            num("1.5"),
        )
        .unwrap();
        assert!(r.equals(&Value::str(Str::new(b"n = 1.5"))));

        let r = perform_aop(ntp(), Aop::Concat, num("2"), Value::Nil).unwrap();
        assert!(r.equals(&Value::str(Str::new(b"2<nil>"))));
    }

    #[test]
    fn pow_guards() {
        let e = perform_aop(ntp(), Aop::Pow, num("2"), num("-1")).unwrap_err();
        assert_eq!(e.message, "exponent is negative");

        let e = perform_aop(ntp(), Aop::Pow, num("2"), num("0.5")).unwrap_err();
        assert_eq!(e.message, "fraction part of exponent is non-zero");

        let e = perform_aop(ntp(), Aop::Pow, num("2"), num("99999999999999999999999"))
            .unwrap_err();
        assert_eq!(e.message, "exponent is too large");

        let r = perform_aop(ntp(), Aop::Pow, num("-1"), num("99999999999999999999999"))
            .unwrap();
        assert!(r.equals(&num("-1")));
    }

    #[test]
    fn indexing_reads_nil() {
        let list = Value::list(vec![num("10"), num("20")]);
        assert!(get_elem_at(list.clone(), num("1")).unwrap().equals(&num("20")));
        assert!(matches!(
            get_elem_at(list.clone(), num("5")).unwrap(),
            Value::Nil
        ));
        assert!(matches!(
            get_elem_at(list.clone(), num("-1")).unwrap(),
            Value::Nil
        ));
        let e = get_elem_at(list, Value::Nil).unwrap_err();
        assert_eq!(e.message, "attempt to index list with nil (expected number)");
    }

    #[test]
    fn store_appends_at_end_only() {
        let list = Value::list(vec![]);
        store_elem_at(list.clone(), num("0"), num("1")).unwrap();
        store_elem_at(list.clone(), num("1"), num("2")).unwrap();
        let e = store_elem_at(list.clone(), num("9"), num("3")).unwrap_err();
        assert_eq!(e.message, "attempt to insert past the end of the list");
        let Value::List(items) = list else {
            panic!("expected list")
        };
        assert_eq!(items.borrow().len(), 2);
    }

    #[test]
    fn failed_modify_keeps_slot() {
        let list = Value::list(vec![num("10")]);
        let e = modify_elem_at(ntp(), Aop::Add, list.clone(), num("0"), Value::Nil).unwrap_err();
        assert_eq!(e.message, "attempt to compute number + nil");
        let Value::List(items) = list else {
            panic!("expected list")
        };
        assert!(items.borrow()[0].equals(&num("10")));
    }
}
