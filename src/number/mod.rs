//! The arbitrary-precision signed decimal number.
//!
//! A number is `(-1)^sign * sum(words[i] * B^(i - scale))`
//! with `B = 10^9`. `words[..scale]` is the fractional
//! part, `words[scale..]` the integer part. The integer
//! part never carries leading zero limbs; canonical zero is
//! the empty limb vector with scale zero.
//!
//! Operations take their operands by value. Callers that
//! share numbers behind `Rc` unwrap-or-clone first, which
//! is the copy-on-write discipline: a uniquely owned buffer
//! may be mutated in place, a shared one is cloned.

pub mod deci;
pub mod ntp;

use std::fmt;

use deci::{BASE, BASE_LOG};
pub use ntp::NumberTruncateParams;

/// Comparison outcomes as a bitmask, so that subsets such
/// as `CMP_LESS | CMP_EQ` are directly testable.
pub const CMP_LESS: u8 = 1 << 0;
pub const CMP_EQ: u8 = 1 << 1;
pub const CMP_GREATER: u8 = 1 << 2;

fn pow10(p: usize) -> u32 {
    let mut r = 1u32;
    for _ in 0..p {
        r *= 10;
    }
    r
}

#[derive(Debug, Clone)]
pub struct Number {
    sign: bool,
    scale: usize,
    words: Vec<u32>,
}

impl Number {
    pub fn zero() -> Number {
        Number {
            sign: false,
            scale: 0,
            words: vec![],
        }
    }

    pub fn from_usize(mut x: usize) -> Number {
        let mut words = vec![];
        while x != 0 {
            words.push((x % BASE as usize) as u32);
            x /= BASE as usize;
        }
        Number {
            sign: false,
            scale: 0,
            words,
        }
    }

    pub fn is_zero(&self) -> bool {
        deci::is_zero(&self.words)
    }

    /// True if the integer part is empty.
    pub fn is_int_zero(&self) -> bool {
        self.words.len() == self.scale
    }

    /// True if every fractional limb is zero.
    pub fn is_frac_zero(&self) -> bool {
        deci::is_zero(&self.words[..self.scale])
    }

    pub fn is_negative(&self) -> bool {
        self.sign
    }

    pub fn abs_eq_small(&self, w: u32) -> bool {
        if w == 0 {
            return self.is_zero();
        }
        if !self.is_frac_zero() {
            return false;
        }
        let int = &self.words[self.scale..];
        int.len() == 1 && int[0] == w
    }

    /// Converts the integer part, failing on overflow or a
    /// negative (nonzero) value.
    pub fn to_usize(&self) -> Option<usize> {
        if self.sign {
            return if self.is_zero() { Some(0) } else { None };
        }
        let mut r: usize = 0;
        for &w in self.words[self.scale..].iter().rev() {
            r = r.checked_mul(BASE as usize)?.checked_add(w as usize)?;
        }
        Some(r)
    }

    /// Wrapping conversion of the integer part, used by the
    /// bitwise operations.
    pub fn to_u32(&self) -> u32 {
        let mut r: u32 = 0;
        for &w in self.words[self.scale..].iter().rev() {
            r = r.wrapping_mul(BASE as u32).wrapping_add(w);
        }
        if self.sign {
            r.wrapping_neg()
        } else {
            r
        }
    }

    pub fn int_digits(&self) -> usize {
        let n = self.words.len() - self.scale;
        if n == 0 {
            return 0;
        }
        let mut count = (n - 1) * BASE_LOG;
        let mut hi = self.words[self.words.len() - 1];
        while hi != 0 {
            count += 1;
            hi /= 10;
        }
        count
    }

    pub fn frac_digits(&self) -> usize {
        let ds = deci::skip_zeros(&self.words[..self.scale]);
        if ds == self.scale {
            return 0;
        }
        let mut count = (self.scale - ds) * BASE_LOG;
        let mut lo = self.words[ds];
        while lo % 10 == 0 {
            count -= 1;
            lo /= 10;
        }
        count
    }

    // Shape adjustments. These preserve the represented
    // value except where documented.

    fn trim_int_zeros(&mut self) {
        let n = deci::normalized_len(&self.words[self.scale..]);
        self.words.truncate(self.scale + n);
    }

    /// Drops low zero fractional limbs (shrinking the
    /// scale) and trims the integer part.
    fn normalize_full(&mut self) {
        let ds = deci::skip_zeros(&self.words[..self.scale]);
        if ds != 0 {
            self.words.drain(..ds);
            self.scale -= ds;
        }
        self.trim_int_zeros();
    }

    /// Keeps only `sr <= scale` fractional limbs, dropping
    /// the lowest ones (truncation toward zero).
    fn with_scale_dropped(mut self, sr: usize) -> Number {
        debug_assert!(sr <= self.scale);
        self.words.drain(..self.scale - sr);
        self.scale = sr;
        self
    }

    /// Pads low zero limbs until the scale is `sr >= scale`.
    fn with_scale_padded(mut self, sr: usize) -> Number {
        debug_assert!(sr >= self.scale);
        let d = sr - self.scale;
        if d != 0 {
            self.words.splice(..0, std::iter::repeat(0).take(d));
            self.scale = sr;
        }
        self
    }

    /// Pads high zero limbs until there are `n` limbs total.
    fn extend_words(&mut self, n: usize) {
        if self.words.len() < n {
            self.words.resize(n, 0);
        }
    }

    // Arithmetic.

    pub fn negate(mut self) -> Number {
        self.sign = !self.sign;
        self
    }

    pub fn abs_add_small(mut self, b: u32) -> Number {
        if b == 0 {
            return self;
        }
        let sa = self.scale;
        if sa == self.words.len() {
            self.words.push(b);
            return self;
        }
        if deci::add_small_in_place(&mut self.words[sa..], b) {
            self.words.push(1);
        }
        self
    }

    pub fn mul_small(mut self, m: u32) -> Number {
        if m == 0 {
            return Number::zero();
        }
        let hi = deci::mul_small_in_place(&mut self.words, m);
        if hi != 0 {
            self.words.push(hi);
        }
        self
    }

    pub fn add(a: Number, b: Number) -> Number {
        Number::do_add_or_sub(a, b, true)
    }

    pub fn sub(a: Number, b: Number) -> Number {
        Number::do_add_or_sub(a, b, false)
    }

    fn do_add_or_sub(mut a: Number, mut b: Number, add: bool) -> Number {
        let mut negate_result = false;

        // Accumulate into the wider operand.
        if a.words.len() < b.words.len() {
            std::mem::swap(&mut a, &mut b);
            negate_result = !add;
        }

        let ninta = a.words.len() - a.scale;
        let nintb = b.words.len() - b.scale;
        if ninta < nintb {
            // a is all fraction-heavy; give it room for b's
            // integer limbs.
            let target = a.scale + nintb;
            a.extend_words(target);
        } else if a.scale < b.scale {
            a = a.with_scale_padded(b.scale);
        }

        let off = a.scale - b.scale;
        if a.sign ^ b.sign ^ add {
            // Same effective sign: add magnitudes.
            if deci::add_in_place(&mut a.words[off..], &b.words) {
                a.words.push(1);
            }
        } else {
            // Opposite signs: subtract magnitudes and fix
            // up the sign if the subtraction flipped.
            if deci::sub_in_place(&mut a.words[off..], &b.words) {
                deci::uncomplement(&mut a.words);
                negate_result = !negate_result;
            }
            a.trim_int_zeros();
        }

        a.sign ^= negate_result;
        a
    }

    pub fn mul(a: Number, b: Number) -> Number {
        let mut r = Number {
            sign: a.sign ^ b.sign,
            scale: a.scale + b.scale,
            words: deci::mul_words(&a.words, &b.words),
        };
        r.normalize_full();
        r
    }

    pub fn pow_usize(mut base: Number, e: usize) -> Number {
        if e == 0 {
            return Number::from_usize(1);
        }

        // Highest set bit of the exponent.
        let mut h: usize = 1;
        let mut tmp = e >> 1;
        while tmp != 0 {
            h <<= 1;
            tmp >>= 1;
        }

        base.normalize_full();
        let mut s = base.clone();
        while h > 1 {
            h >>= 1;
            s = Number::mul(s.clone(), s);
            if e & h != 0 {
                s = Number::mul(s, base.clone());
            }
        }
        s
    }

    /// Raises `base` to a nonnegative integer exponent.
    /// Returns `None` when the exponent does not fit a
    /// machine word and the base is not 0 or +-1 (such a
    /// power would be astronomically large).
    pub fn pow(base: Number, e: &Number) -> Option<Number> {
        match e.to_usize() {
            Some(x) => Some(Number::pow_usize(base, x)),
            None => {
                if base.is_zero() {
                    return Some(base);
                }
                if base.abs_eq_small(1) {
                    if base.sign && (e.to_u32() & 1) != 0 {
                        Some(base)
                    } else {
                        Some(Number::from_usize(1))
                    }
                } else {
                    None
                }
            }
        }
    }

    /// Division to `max(scale(a), ntp.scale)` fractional
    /// limbs, truncated toward zero and masked by the
    /// truncation parameters. `b` must be nonzero.
    pub fn div(a: Number, b: Number, ntp: NumberTruncateParams) -> Number {
        let sign = a.sign ^ b.sign;
        let sr = ntp.scale.max(a.scale);

        // Multiply the dividend by B^(b.scale) so b can be
        // divided in as a plain integer, and by B^(sr - sa)
        // so the quotient lands at scale sr.
        let mut prepared = a.with_scale_padded(sr + b.scale);
        prepared.scale = sr;

        let (q, _) = deci::divmod_words(&prepared.words, &b.words);

        let mut r = Number {
            sign,
            scale: sr,
            words: q,
        };
        r.extend_words(sr);
        r.trim_int_zeros();

        let mut r = r.with_scale_dropped(ntp.scale);
        if ntp.scale > 0 {
            r.words[0] -= r.words[0] % ntp.submod;
        }
        r
    }

    /// Integer division over the integer parts. The integer
    /// part of `b` must be nonzero.
    pub fn idiv(a: Number, b: Number) -> Number {
        let sign = a.sign ^ b.sign;
        let a = a.with_scale_dropped(0);
        let (q, _) = deci::divmod_words(&a.words, &b.words[b.scale..]);
        Number {
            sign,
            scale: 0,
            words: q,
        }
    }

    /// Integer remainder; keeps the sign of `a`.
    pub fn imod(a: Number, b: Number) -> Number {
        let sign = a.sign;
        let a = a.with_scale_dropped(0);
        let (_, rem) = deci::divmod_words(&a.words, &b.words[b.scale..]);
        Number {
            sign,
            scale: 0,
            words: rem,
        }
    }

    pub fn trunc(self) -> Number {
        self.with_scale_dropped(0)
    }

    pub fn floor(self) -> Number {
        let a = if self.sign && !self.is_frac_zero() {
            self.abs_add_small(1)
        } else {
            self
        };
        a.with_scale_dropped(0)
    }

    pub fn ceil(self) -> Number {
        let a = if !self.sign && !self.is_frac_zero() {
            self.abs_add_small(1)
        } else {
            self
        };
        a.with_scale_dropped(0)
    }

    /// Rounds half away from zero.
    pub fn round(self) -> Number {
        let a = if self.scale > 0 && self.words[self.scale - 1] as u64 >= BASE / 2 {
            self.abs_add_small(1)
        } else {
            self
        };
        a.with_scale_dropped(0)
    }

    pub fn frac(mut self) -> Number {
        self.words.truncate(self.scale);
        self
    }

    // Bitwise operations narrow to 32-bit unsigned.

    pub fn bit_and(a: Number, b: Number) -> Number {
        Number::from_usize((a.to_u32() & b.to_u32()) as usize)
    }

    pub fn bit_or(a: Number, b: Number) -> Number {
        Number::from_usize((a.to_u32() | b.to_u32()) as usize)
    }

    pub fn bit_xor(a: Number, b: Number) -> Number {
        Number::from_usize((a.to_u32() ^ b.to_u32()) as usize)
    }

    pub fn bit_shl(a: Number, b: Number) -> Number {
        let x = a.to_u32();
        let y = b.to_u32();
        let z = if y < 32 { x << y } else { 0 };
        Number::from_usize(z as usize)
    }

    pub fn bit_lshr(a: Number, b: Number) -> Number {
        let x = a.to_u32();
        let y = b.to_u32();
        let z = if y < 32 { x >> y } else { 0 };
        Number::from_usize(z as usize)
    }

    /// Divides by 10^n: shift the limb boundary, then a
    /// single-limb divmod handles the sub-limb remainder.
    pub fn scale_down(mut self, n: usize) -> Number {
        let q = n / BASE_LOG;
        let r = n % BASE_LOG;

        let s = self.scale + q;
        self.extend_words(s);
        self.scale = s;

        if r != 0 {
            let f = pow10(r);
            let m = deci::divmod_small_in_place(&mut self.words, f);
            if m != 0 {
                let new_scale = self.scale + 1;
                self = self.with_scale_padded(new_scale);
                self.words[0] = m * pow10(BASE_LOG - r);
            }
        }

        self.normalize_full();
        self
    }

    /// Multiplies by 10^n: symmetric to [`scale_down`].
    pub fn scale_up(mut self, n: usize) -> Number {
        let q = n / BASE_LOG;
        let r = n % BASE_LOG;

        let new_scale = self.scale.max(q);
        self = self.with_scale_padded(new_scale);
        self.scale -= q;
        self.normalize_full();

        if r != 0 {
            self = self.mul_small(pow10(r));
        }
        self
    }

    /// Three-way comparison returning one of the `CMP_*`
    /// masks. Both-zero compares equal regardless of sign.
    pub fn compare(&self, other: &Number) -> u8 {
        if self.sign == other.sign {
            if self.sign {
                compare_abs(other, self)
            } else {
                compare_abs(self, other)
            }
        } else if self.is_zero() && other.is_zero() {
            CMP_EQ
        } else if self.sign {
            CMP_LESS
        } else {
            CMP_GREATER
        }
    }
}

fn compare_abs(a: &Number, b: &Number) -> u8 {
    let ninta = a.words.len() - a.scale;
    let nintb = b.words.len() - b.scale;
    if ninta != nintb {
        return if ninta < nintb { CMP_LESS } else { CMP_GREATER };
    }

    // Walk from the most significant limb down, aligning
    // scales; `w1` is the operand with the larger scale.
    let flip = a.scale < b.scale;
    let (w1, w2) = if flip {
        (&b.words, &a.words)
    } else {
        (&a.words, &b.words)
    };

    for i in 0..w2.len() {
        let x = w1[w1.len() - 1 - i];
        let y = w2[w2.len() - 1 - i];
        if x != y {
            let r = if x < y { CMP_LESS } else { CMP_GREATER };
            return if flip { r ^ (CMP_LESS | CMP_GREATER) } else { r };
        }
    }
    for &w in &w1[..w1.len() - w2.len()] {
        if w != 0 {
            return if flip { CMP_LESS } else { CMP_GREATER };
        }
    }
    CMP_EQ
}

// Parsing.

fn nchars_to_nwords(n: usize) -> usize {
    n / BASE_LOG + usize::from(n % BASE_LOG != 0)
}

fn parse_word(s: &[u8]) -> u32 {
    s.iter().fold(0u32, |r, &c| r * 10 + (c - b'0') as u32)
}

fn parse_word_pad(s: &[u8]) -> u32 {
    let mut r = parse_word(s);
    for _ in 0..BASE_LOG - s.len() {
        r *= 10;
    }
    r
}

// Low limbs take nine-digit groups from the right; the top
// limb takes whatever remains.
fn parse_int_part(s: &[u8], out: &mut [u32]) {
    if out.is_empty() {
        return;
    }
    let n = out.len();
    let mut end = s.len();
    for slot in out.iter_mut().take(n - 1) {
        *slot = parse_word(&s[end - BASE_LOG..end]);
        end -= BASE_LOG;
    }
    out[n - 1] = parse_word(&s[..end]);
}

// High fractional limbs take nine-digit groups from the
// left; the lowest limb is right-padded with zeros.
fn parse_frac_part(s: &[u8], out: &mut [u32]) {
    if out.is_empty() {
        return;
    }
    let n = out.len();
    let mut start = 0;
    for i in (1..n).rev() {
        out[i] = parse_word(&s[start..start + BASE_LOG]);
        start += BASE_LOG;
    }
    out[0] = parse_word_pad(&s[start..]);
}

fn parse_clean(s: &str) -> Number {
    let b = s.as_bytes();
    let mut i = 0;
    let mut sign = false;
    if i < b.len() && b[i] == b'-' {
        sign = true;
        i += 1;
    }
    while i < b.len() && b[i] == b'0' {
        i += 1;
    }
    let rest = &b[i..];

    match rest.iter().position(|&c| c == b'.') {
        Some(dot) => {
            let int_part = &rest[..dot];
            let mut frac = &rest[dot + 1..];
            while let [head @ .., b'0'] = frac {
                frac = head;
            }

            let int_nwords = nchars_to_nwords(int_part.len());
            let frac_nwords = nchars_to_nwords(frac.len());
            let mut words = vec![0u32; int_nwords + frac_nwords];
            parse_frac_part(frac, &mut words[..frac_nwords]);
            parse_int_part(int_part, &mut words[frac_nwords..]);
            Number {
                sign,
                scale: frac_nwords,
                words,
            }
        }
        None => {
            let nwords = nchars_to_nwords(rest.len());
            let mut words = vec![0u32; nwords];
            parse_int_part(rest, &mut words);
            Number {
                sign,
                scale: 0,
                words,
            }
        }
    }
}

impl Number {
    /// Parses base-10 text of the shape
    /// `[-]? (D+ | D* '.' D+ | D+ '.' D*)` with optional
    /// apostrophe separators. The caller validates the
    /// shape; limbs are packed directly from the digits.
    pub fn parse(s: &str) -> Number {
        if s.contains('\'') {
            let cleaned: String = s.chars().filter(|&c| c != '\'').collect();
            parse_clean(&cleaned)
        } else {
            parse_clean(s)
        }
    }

    /// Checks text against the numeric grammar for `base`.
    pub fn parse_base_validate(s: &[u8], base: u8) -> bool {
        let mut s = s;
        if let [b'-', rest @ ..] = s {
            s = rest;
        }

        let mut seen_digit = false;
        let mut seen_dot = false;
        for &c in s {
            match c {
                b'.' => {
                    if seen_dot {
                        return false;
                    }
                    seen_dot = true;
                }
                b'\'' => {}
                _ => match decode_digit(c) {
                    Some(d) if d < base => seen_digit = true,
                    _ => return false,
                },
            }
        }
        seen_digit
    }

    /// Parses pre-validated base-N text by Horner
    /// evaluation, then divides by `base^frac_digits` at
    /// the given truncation parameters.
    pub fn parse_base(s: &[u8], base: u8, ntp: NumberTruncateParams) -> Number {
        let mut a = Number::zero();
        let mut s = s;
        let mut negate = false;
        if let [b'-', rest @ ..] = s {
            negate = true;
            s = rest;
        }

        let mut base_scale = 0usize;
        let mut seen_dot = false;
        for &c in s {
            match c {
                b'.' => seen_dot = true,
                b'\'' => {}
                _ => {
                    if seen_dot {
                        base_scale += 1;
                    }
                    a = a.mul_small(base as u32);
                    a = a.abs_add_small(decode_digit(c).unwrap_or(0) as u32);
                }
            }
        }

        if base_scale > 0 {
            let divisor = Number::pow_usize(Number::from_usize(base as usize), base_scale);
            a = Number::div(a, divisor, ntp);
        }
        if negate {
            a = a.negate();
        }
        a
    }

    /// Renders in base `base` (2..=36): repeated divmod for
    /// the integer digits, multiply-and-peel for exactly
    /// `nfrac` fractional digits, trailing zeros trimmed.
    pub fn format_base(&self, base: u8, nfrac: usize) -> String {
        const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

        let mut head: Vec<u8> = vec![];
        let mut int_words = self.words[self.scale..].to_vec();
        let mut int_len = deci::normalized_len(&int_words);
        while int_len > 0 {
            let d = deci::divmod_small_in_place(&mut int_words[..int_len], base as u32);
            head.push(CHARS[d as usize]);
            int_len = deci::normalized_len(&int_words[..int_len]);
        }
        if head.is_empty() {
            head.push(b'0');
        }
        if self.sign {
            head.push(b'-');
        }
        head.reverse();

        let mut frac_words = self.words[..self.scale].to_vec();
        let mut tail: Vec<u8> = vec![];
        for _ in 0..nfrac {
            let digit = deci::mul_small_in_place(&mut frac_words, base as u32);
            tail.push(CHARS[digit as usize]);
        }
        while tail.last() == Some(&b'0') {
            tail.pop();
        }

        let mut out = String::from_utf8(head).unwrap_or_default();
        if !tail.is_empty() {
            out.push('.');
            out.push_str(std::str::from_utf8(&tail).unwrap_or_default());
        }
        if out == "-0" {
            out = "0".to_string();
        }
        out
    }
}

fn decode_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'z' => Some(c - b'a' + 10),
        b'A'..=b'Z' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        if self.sign {
            f.write_str("-")?;
        }

        let int = &self.words[self.scale..];
        if !int.is_empty() {
            write!(f, "{}", int[int.len() - 1])?;
            for &w in int[..int.len() - 1].iter().rev() {
                write!(f, "{:09}", w)?;
            }
        }

        let frac = &self.words[..self.scale];
        let ds = deci::skip_zeros(frac);
        if ds != self.scale {
            f.write_str(".")?;
            for &w in frac[ds + 1..].iter().rev() {
                write!(f, "{:09}", w)?;
            }
            let lowest = format!("{:09}", frac[ds]);
            f.write_str(lowest.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn n(s: &str) -> Number {
        Number::parse(s)
    }

    fn prec(p: usize) -> NumberTruncateParams {
        NumberTruncateParams::from_prec(p)
    }

    #[test]
    fn parse_and_format() {
        assert_eq!(n("0").to_string(), "0");
        assert_eq!(n("-0").to_string(), "0");
        assert_eq!(n("42").to_string(), "42");
        assert_eq!(n("1'000'000'007").to_string(), "1000000007");
        assert_eq!(n("3.14").to_string(), "3.14");
        assert_eq!(n("-0.5").to_string(), "-.5");
        assert_eq!(n("000123.4500").to_string(), "123.45");
        assert_eq!(n("12345678901234567890.00000000001").to_string(), "12345678901234567890.00000000001");
        assert_eq!(n("7.").to_string(), "7");
        assert_eq!(n(".25").to_string(), ".25");
    }

    #[test]
    fn add_sub_signs() {
        let r = Number::add(n("1.5"), n("2.25"));
        assert_eq!(r.to_string(), "3.75");

        let r = Number::sub(n("1"), n("2"));
        assert_eq!(r.to_string(), "-1");

        let r = Number::add(n("-3"), n("10.125"));
        assert_eq!(r.to_string(), "7.125");

        let r = Number::sub(n("1000000000000000000"), n("1"));
        assert_eq!(r.to_string(), "999999999999999999");

        let r = Number::add(n("999999999.999999999"), n("0.000000001"));
        assert_eq!(r.to_string(), "1000000000");
    }

    #[test]
    fn mul_scales() {
        let r = Number::mul(n("1.5"), n("-2.5"));
        assert_eq!(r.to_string(), "-3.75");

        let r = Number::mul(n("123456789.123456789"), n("0"));
        assert!(r.is_zero());

        let r = Number::mul(n("999999999999"), n("999999999999"));
        assert_eq!(r.to_string(), "999999999998000000000001");
    }

    #[test]
    fn div_truncates_to_ntp() {
        let r = Number::div(n("1"), n("3"), prec(40));
        assert_eq!(r.to_string(), ".3333333333333333333333333333333333333333");

        let r = Number::div(n("1"), n("4"), prec(1));
        assert_eq!(r.to_string(), ".2");

        let r = Number::div(n("10"), n("2"), prec(20));
        assert_eq!(r.to_string(), "5");

        // scale(a) larger than the ambient scale is kept
        let r = Number::div(n("0.0000000001"), n("1"), prec(0));
        assert_eq!(r.to_string(), ".0000000001");
    }

    #[test]
    fn idiv_imod() {
        assert_eq!(Number::idiv(n("17.9"), n("5")).to_string(), "3");
        assert_eq!(Number::imod(n("17.9"), n("5")).to_string(), "2");
        assert_eq!(Number::idiv(n("-17"), n("5")).to_string(), "-3");
        assert_eq!(Number::imod(n("-17"), n("5")).to_string(), "-2");
    }

    #[test]
    fn pow_cases() {
        let r = Number::pow(n("2"), &n("10")).unwrap();
        assert_eq!(r.to_string(), "1024");

        let r = Number::pow(n("10"), &n("0")).unwrap();
        assert_eq!(r.to_string(), "1");

        let r = Number::pow(n("0.5"), &n("2")).unwrap();
        assert_eq!(r.to_string(), ".25");

        let huge = n("99999999999999999999999999999");
        assert!(Number::pow(n("0"), &huge).unwrap().is_zero());
        assert_eq!(Number::pow(n("-1"), &huge).unwrap().to_string(), "-1");
        assert_eq!(Number::pow(n("1"), &huge).unwrap().to_string(), "1");
        assert!(Number::pow(n("2"), &huge).is_none());
    }

    #[test]
    fn rounding_family() {
        assert_eq!(n("2.5").trunc().to_string(), "2");
        assert_eq!(n("-2.5").trunc().to_string(), "-2");
        assert_eq!(n("2.5").floor().to_string(), "2");
        assert_eq!(n("-2.5").floor().to_string(), "-3");
        assert_eq!(n("2.5").ceil().to_string(), "3");
        assert_eq!(n("-2.5").ceil().to_string(), "-2");
        assert_eq!(n("2.5").round().to_string(), "3");
        assert_eq!(n("2.4").round().to_string(), "2");
        assert_eq!(n("-2.5").round().to_string(), "-3");
        assert_eq!(n("2.75").frac().to_string(), ".75");
    }

    #[test]
    fn compare_masks() {
        assert_eq!(n("1").compare(&n("2")), CMP_LESS);
        assert_eq!(n("2").compare(&n("1")), CMP_GREATER);
        assert_eq!(n("2").compare(&n("2.0")), CMP_EQ);
        assert_eq!(n("0").compare(&n("-0")), CMP_EQ);
        assert_eq!(n("-1").compare(&n("1")), CMP_LESS);
        assert_eq!(n("-1").compare(&n("-2")), CMP_GREATER);
        assert_eq!(n("0.1").compare(&n("0.0999999999")), CMP_GREATER);
    }

    #[test]
    fn scaling() {
        assert_eq!(n("123.456").scale_down(2).to_string(), "1.23456");
        assert_eq!(n("123.456").scale_up(2).to_string(), "12345.6");
        assert_eq!(n("1").scale_down(10).to_string(), ".0000000001");
        assert_eq!(n("0.0000000001").scale_up(10).to_string(), "1");
    }

    #[test]
    fn digit_counts() {
        assert_eq!(n("123.45").int_digits(), 3);
        assert_eq!(n("123.45").frac_digits(), 2);
        assert_eq!(n("0").int_digits(), 0);
        assert_eq!(n("0").frac_digits(), 0);
        assert_eq!(n("10000000000").int_digits(), 11);
        assert_eq!(n("0.0000000005").frac_digits(), 10);
    }

    #[test]
    fn base_conversion() {
        assert_eq!(n("255").format_base(16, 0), "FF");
        assert_eq!(n("255").format_base(2, 0), "11111111");
        assert_eq!(n("-10.5").format_base(16, 4), "-A.8");
        assert_eq!(n("0.5").format_base(2, 8), "0.1");

        assert!(Number::parse_base_validate(b"FF", 16));
        assert!(!Number::parse_base_validate(b"FF", 15));
        assert!(!Number::parse_base_validate(b"1..2", 10));
        assert!(!Number::parse_base_validate(b"", 10));
        assert!(!Number::parse_base_validate(b"-", 10));

        let r = Number::parse_base(b"ff", 16, prec(20));
        assert_eq!(r.to_string(), "255");

        let r = Number::parse_base(b"A.8", 16, prec(20));
        assert_eq!(r.to_string(), "10.5");
    }

    #[test]
    fn base_round_trip() {
        let ntp = prec(45);
        for base in 2u8..=36 {
            let x = n("1234.3125");
            let s = x.format_base(base, 50);
            let back = Number::parse_base(s.as_bytes(), base, ntp);
            // 0.3125 renders exactly in bases divisible by 2
            if base % 2 == 0 {
                assert_eq!(back.compare(&n("1234.3125")), CMP_EQ, "base {}", base);
            }
        }
    }

    #[test]
    fn bitwise() {
        assert_eq!(Number::bit_and(n("12"), n("10")).to_string(), "8");
        assert_eq!(Number::bit_or(n("12"), n("10")).to_string(), "14");
        assert_eq!(Number::bit_xor(n("12"), n("10")).to_string(), "6");
        assert_eq!(Number::bit_shl(n("1"), n("10")).to_string(), "1024");
        assert_eq!(Number::bit_shl(n("1"), n("40")).to_string(), "0");
        assert_eq!(Number::bit_lshr(n("1024"), n("3")).to_string(), "128");
    }

    proptest! {
        #[test]
        fn format_parse_round_trip(int in 0u64..1_000_000_000_000, frac in 0u32..1_000_000) {
            let text = format!("{}.{:06}", int, frac);
            let x = n(&text);
            let back = n(&x.to_string());
            prop_assert_eq!(x.compare(&back), CMP_EQ);
        }

        #[test]
        fn add_commutes(a in 0u64..u64::MAX / 2, b in 0u64..u64::MAX / 2) {
            let x = Number::add(n(&a.to_string()), n(&b.to_string()));
            let y = Number::add(n(&b.to_string()), n(&a.to_string()));
            prop_assert_eq!(x.compare(&y), CMP_EQ);
            prop_assert_eq!(x.to_string(), (a + b).to_string());
        }

        #[test]
        fn sub_matches_i128(a in 0i64..i64::MAX, b in 0i64..i64::MAX) {
            let x = Number::sub(n(&a.to_string()), n(&b.to_string()));
            prop_assert_eq!(x.to_string(), (a as i128 - b as i128).to_string());
        }
    }
}
