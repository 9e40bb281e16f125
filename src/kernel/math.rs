//! Numeric builtins: rounding, precision control, base
//! conversion, digit counting, decimal-point scaling.

use crate::{
    kernel::{guard_base, guard_magnitude, guard_num, guard_scale, guard_str, guardn, guardn_range},
    number::{Number, NumberTruncateParams},
    vm::{
        state::{RuntimeError, State},
        value::{take_num, Str, Value},
    },
};

fn owned(n: &std::rc::Rc<Number>) -> Number {
    take_num(n.clone())
}

pub fn trunc(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    Ok(Value::num(owned(n).trunc()))
}

pub fn floor(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    Ok(Value::num(owned(n).floor()))
}

pub fn ceil(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    Ok(Value::num(owned(n).ceil()))
}

pub fn round(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    Ok(Value::num(owned(n).round()))
}

pub fn frac(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let n = guard_num(args, 0)?;
    Ok(Value::num(owned(n).frac()))
}

/// `Scale()` reads the ambient precision in decimal digits;
/// `Scale(p)` sets it.
pub fn scale(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn_range(args, 0, 1)?;
    if args.is_empty() {
        let prec = state.ntp().to_prec();
        return Ok(Value::num(Number::from_usize(prec)));
    }
    let n = guard_num(args, 0)?;
    let prec = guard_scale(n)?;
    state.set_ntp(NumberTruncateParams::from_prec(prec));
    Ok(Value::Nil)
}

pub fn to_number(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 1)?;
    let s = guard_str(args, 0)?;

    if !Number::parse_base_validate(s.as_bytes(), 10) {
        return Err(RuntimeError::new("invalid number format"));
    }
    let text = String::from_utf8_lossy(s.as_bytes());
    Ok(Value::num(Number::parse(&text)))
}

/// `Encode(n, base, scale?)`: render `n` in the given base
/// with up to `scale` fractional digits.
pub fn encode(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn_range(args, 2, 3)?;
    let n = guard_num(args, 0)?;
    let base = guard_base(guard_num(args, 1)?)?;
    let nfrac = match args.get(2) {
        None | Some(Value::Nil) => 0,
        Some(Value::Num(s)) => guard_scale(s)?,
        Some(other) => {
            return Err(RuntimeError::new(format!(
                "argument #3: expected number or nil, got {}",
                other.kind_name_long()
            )))
        }
    };

    let rendered = n.format_base(base, nfrac);
    Ok(Value::str(Str::new(rendered.as_bytes())))
}

/// `Decode(s, base)`: parse base-N text at the ambient
/// truncation parameters.
pub fn decode(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let s = guard_str(args, 0)?;
    let base = guard_base(guard_num(args, 1)?)?;

    if !Number::parse_base_validate(s.as_bytes(), base) {
        return Err(RuntimeError::new("invalid number format"));
    }
    Ok(Value::num(Number::parse_base(
        s.as_bytes(),
        base,
        state.ntp(),
    )))
}

/// `NumDigits(n, which)`: `"i"` integer digits, `"f"`
/// fractional digits, `"+"` both.
pub fn num_digits(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let n = guard_num(args, 0)?;
    let which = guard_str(args, 1)?;

    let count = match which.as_bytes() {
        b"i" => n.int_digits(),
        b"f" => n.frac_digits(),
        b"+" => n.int_digits() + n.frac_digits(),
        _ => {
            return Err(RuntimeError::new(
                "invalid second argument; expected either of: \"i\", \"f\", \"+\"",
            ))
        }
    };
    Ok(Value::num(Number::from_usize(count)))
}

pub fn down_scale(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let n = guard_num(args, 0)?;
    let mag = guard_magnitude(guard_num(args, 1)?)?;
    Ok(Value::num(owned(n).scale_down(mag)))
}

pub fn up_scale(_state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    guardn(args, 2)?;
    let n = guard_num(args, 0)?;
    let mag = guard_magnitude(guard_num(args, 1)?)?;
    Ok(Value::num(owned(n).scale_up(mag)))
}
