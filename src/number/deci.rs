//! Limb-level primitives for base-10^9 arithmetic.
//!
//! A magnitude is a little-endian slice of `u32` limbs, each
//! in `0..BASE`. Nothing here knows about signs or scales;
//! that layering lives in [`crate::number`].

/// The limb base. Nine decimal digits per limb.
pub const BASE: u64 = 1_000_000_000;

/// Decimal digits per limb.
pub const BASE_LOG: usize = 9;

/// Length of `words` after trimming high zero limbs.
pub fn normalized_len(words: &[u32]) -> usize {
    let mut n = words.len();
    while n > 0 && words[n - 1] == 0 {
        n -= 1;
    }
    n
}

/// Number of zero limbs at the low end of `words`.
pub fn skip_zeros(words: &[u32]) -> usize {
    words.iter().take_while(|&&w| w == 0).count()
}

pub fn is_zero(words: &[u32]) -> bool {
    words.iter().all(|&w| w == 0)
}

/// Adds `b` into `a` in place, propagating the carry
/// through all of `a`. Returns `true` if a carry remains
/// (the caller pushes a `1` limb).
pub fn add_in_place(a: &mut [u32], b: &[u32]) -> bool {
    debug_assert!(a.len() >= b.len());
    let mut carry = 0u64;
    for i in 0..a.len() {
        let rhs = if i < b.len() { b[i] as u64 } else { 0 };
        if rhs == 0 && carry == 0 && i >= b.len() {
            return false;
        }
        let t = a[i] as u64 + rhs + carry;
        if t >= BASE {
            a[i] = (t - BASE) as u32;
            carry = 1;
        } else {
            a[i] = t as u32;
            carry = 0;
        }
    }
    carry != 0
}

/// Subtracts `b` from `a` in place. Returns `true` if the
/// subtraction borrowed out, in which case `a` holds the
/// ten's complement of the true difference; follow up with
/// [`uncomplement`].
pub fn sub_in_place(a: &mut [u32], b: &[u32]) -> bool {
    debug_assert!(a.len() >= b.len());
    let mut borrow = 0i64;
    for i in 0..a.len() {
        let rhs = if i < b.len() { b[i] as i64 } else { 0 };
        if rhs == 0 && borrow == 0 && i >= b.len() {
            return false;
        }
        let mut cur = a[i] as i64 - rhs - borrow;
        if cur < 0 {
            cur += BASE as i64;
            borrow = 1;
        } else {
            borrow = 0;
        }
        a[i] = cur as u32;
    }
    borrow != 0
}

/// Replaces `a` with `BASE^n - a`. Only meaningful right
/// after [`sub_in_place`] reported a borrow (so `a` is
/// nonzero).
pub fn uncomplement(a: &mut [u32]) {
    let mut carry = 1u64;
    for w in a.iter_mut() {
        let t = (BASE - 1) - *w as u64 + carry;
        if t >= BASE {
            *w = (t - BASE) as u32;
            carry = 1;
        } else {
            *w = t as u32;
            carry = 0;
        }
    }
}

/// Adds a single limb into `a`, returning the final carry.
pub fn add_small_in_place(a: &mut [u32], b: u32) -> bool {
    let mut carry = b as u64;
    for w in a.iter_mut() {
        if carry == 0 {
            return false;
        }
        let t = *w as u64 + carry;
        *w = (t % BASE) as u32;
        carry = t / BASE;
    }
    carry != 0
}

/// Multiplies `a` by a single limb in place, returning the
/// carry-out limb (zero if none).
pub fn mul_small_in_place(a: &mut [u32], m: u32) -> u32 {
    let mut carry = 0u64;
    for w in a.iter_mut() {
        let t = *w as u64 * m as u64 + carry;
        *w = (t % BASE) as u32;
        carry = t / BASE;
    }
    carry as u32
}

/// Divides `a` by a single limb in place (quotient replaces
/// `a`), returning the remainder.
pub fn divmod_small_in_place(a: &mut [u32], d: u32) -> u32 {
    debug_assert!(d != 0);
    let mut rem = 0u64;
    for w in a.iter_mut().rev() {
        let cur = rem * BASE + *w as u64;
        *w = (cur / d as u64) as u32;
        rem = cur % d as u64;
    }
    rem as u32
}

/// Schoolbook multiplication. The multiplication kernel is
/// deliberately a single primitive; callers never see how
/// the product is computed.
pub fn mul_words(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; a.len() + b.len()];
    for (i, &x) in a.iter().enumerate() {
        if x == 0 {
            continue;
        }
        let mut carry = 0u64;
        for (j, &y) in b.iter().enumerate() {
            let t = out[i + j] as u64 + x as u64 * y as u64 + carry;
            out[i + j] = (t % BASE) as u32;
            carry = t / BASE;
        }
        let mut k = i + b.len();
        while carry != 0 {
            let t = out[k] as u64 + carry;
            out[k] = (t % BASE) as u32;
            carry = t / BASE;
            k += 1;
        }
    }
    out
}

/// Long division: returns `(quotient, remainder)` with high
/// zero limbs trimmed. Knuth's algorithm D in base 10^9,
/// with a single-limb fast path.
///
/// Panics if the divisor is zero; callers are expected to
/// have rejected that case already.
pub fn divmod_words(u: &[u32], v: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let n = normalized_len(v);
    assert!(n > 0, "division by zero magnitude");
    let v = &v[..n];
    let u = &u[..normalized_len(u)];

    if n == 1 {
        let mut q = u.to_vec();
        let r = divmod_small_in_place(&mut q, v[0]);
        q.truncate(normalized_len(&q));
        return (q, if r == 0 { vec![] } else { vec![r] });
    }

    if u.len() < n {
        return (vec![], u.to_vec());
    }

    // Normalize so the top divisor limb is at least BASE/2;
    // this keeps the qhat estimate within one of the truth.
    let d = (BASE / (v[n - 1] as u64 + 1)) as u32;
    let mut vn = v.to_vec();
    let mut un = u.to_vec();
    un.push(0);
    if d > 1 {
        let hi = mul_small_in_place(&mut vn, d);
        debug_assert_eq!(hi, 0);
        let hi = mul_small_in_place(&mut un, d);
        debug_assert_eq!(hi, 0);
    }

    let m = u.len() - n;
    let mut q = vec![0u32; m + 1];
    let vh = vn[n - 1] as u64;
    let vl = vn[n - 2] as u64;

    for j in (0..=m).rev() {
        let top = un[j + n] as u64 * BASE + un[j + n - 1] as u64;
        let mut qhat = top / vh;
        let mut rhat = top % vh;
        while qhat >= BASE || qhat * vl > rhat * BASE + un[j + n - 2] as u64 {
            qhat -= 1;
            rhat += vh;
            if rhat >= BASE {
                break;
            }
        }

        // Multiply-and-subtract qhat * vn from un[j..j+n].
        let mut borrow = 0u64;
        for i in 0..n {
            let p = qhat * vn[i] as u64 + borrow;
            borrow = p / BASE;
            let mut cur = un[j + i] as i64 - (p % BASE) as i64;
            if cur < 0 {
                cur += BASE as i64;
                borrow += 1;
            }
            un[j + i] = cur as u32;
        }
        let mut top_cur = un[j + n] as i64 - borrow as i64;

        if top_cur < 0 {
            // qhat was one too large; add the divisor back.
            qhat -= 1;
            top_cur += BASE as i64;
            let mut carry = 0u64;
            for i in 0..n {
                let t = un[j + i] as u64 + vn[i] as u64 + carry;
                un[j + i] = (t % BASE) as u32;
                carry = t / BASE;
            }
            top_cur = (top_cur + carry as i64) - BASE as i64;
            debug_assert!(top_cur >= 0);
        }
        un[j + n] = top_cur as u32;
        q[j] = qhat as u32;
    }

    // Undo the normalization to recover the remainder.
    un.truncate(n);
    if d > 1 {
        let r = divmod_small_in_place(&mut un, d);
        debug_assert_eq!(r, 0);
    }

    q.truncate(normalized_len(&q));
    un.truncate(normalized_len(&un));
    (q, un)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn limbs(strategy_len: usize) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0u32..BASE as u32, 0..strategy_len)
    }

    #[test]
    fn small_divmod() {
        let mut a = vec![0, 1]; // 1e9
        let r = divmod_small_in_place(&mut a, 3);
        assert_eq!(a, vec![333333333, 0]);
        assert_eq!(r, 1);
    }

    #[test]
    fn mul_carries() {
        // (B - 1) * (B - 1) = B^2 - 2B + 1
        let out = mul_words(&[999999999], &[999999999]);
        assert_eq!(out, vec![1, 999999998]);
    }

    #[test]
    fn sub_complement() {
        // 1 - 2 borrows; complement gives |1 - 2| = 1
        let mut a = vec![1];
        assert!(sub_in_place(&mut a, &[2]));
        uncomplement(&mut a);
        assert_eq!(a, vec![1]);
    }

    #[test]
    fn divmod_two_limb() {
        // (5 * B + 7) / (B + 1): q = 4, r = B + 3
        let (q, r) = divmod_words(&[7, 5], &[1, 1]);
        assert_eq!(q, vec![4]);
        assert_eq!(r, vec![3, 1]);
    }

    #[test]
    fn divmod_exact() {
        let v = vec![123456789, 987654321];
        let u = mul_words(&v, &[42, 7]);
        let (q, r) = divmod_words(&u, &v);
        assert_eq!(q, vec![42, 7]);
        assert!(r.is_empty());
    }

    proptest! {
        #[test]
        fn divmod_identity(u in limbs(8), v in limbs(5)) {
            prop_assume!(!is_zero(&v));
            let (q, r) = divmod_words(&u, &v);

            // check u == q * v + r
            let mut back = mul_words(&q, &v);
            while back.len() < r.len() {
                back.push(0);
            }
            if add_in_place(&mut back, &r) {
                back.push(1);
            }
            back.truncate(normalized_len(&back));

            let mut u_norm = u.clone();
            u_norm.truncate(normalized_len(&u_norm));
            prop_assert_eq!(back, u_norm);

            // and r < v
            let rn = normalized_len(&r);
            let vn = normalized_len(&v);
            prop_assert!(rn <= vn);
            if rn == vn && rn > 0 {
                let less = r[..rn].iter().rev().lt(v[..vn].iter().rev());
                prop_assert!(less);
            }
        }

        #[test]
        fn add_then_sub(a in limbs(6), b in limbs(6)) {
            let mut acc = a.clone();
            let longer = a.len().max(b.len());
            acc.resize(longer, 0);
            if add_in_place(&mut acc, &b) {
                acc.push(1);
            }
            let borrowed = sub_in_place(&mut acc, &b);
            prop_assert!(!borrowed);
            acc.truncate(normalized_len(&acc));
            let mut a_norm = a;
            a_norm.truncate(normalized_len(&a_norm));
            prop_assert_eq!(acc, a_norm);
        }
    }
}
