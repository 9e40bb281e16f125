//! Precision as process state: how many fractional limbs
//! to keep, and which decimal tail of the lowest limb to
//! zero out.

use crate::number::deci::BASE_LOG;

/// Truncation parameters for division and base-N decoding.
///
/// `scale` is the number of fractional limbs kept; `submod`
/// zeroes out `value % submod` in the lowest fractional
/// limb. `submod == 1` means the limb is kept byte-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberTruncateParams {
    pub scale: usize,
    pub submod: u32,
}

fn pow10(p: usize) -> u32 {
    let mut r = 1u32;
    for _ in 0..p {
        r *= 10;
    }
    r
}

impl NumberTruncateParams {
    /// Maps a precision in decimal digits to truncation
    /// parameters.
    pub fn from_prec(prec: usize) -> NumberTruncateParams {
        let q = prec / BASE_LOG;
        let r = prec % BASE_LOG;
        if r == 0 {
            NumberTruncateParams { scale: q, submod: 1 }
        } else {
            NumberTruncateParams {
                scale: q + 1,
                submod: pow10(BASE_LOG - r),
            }
        }
    }

    /// The inverse mapping. `submod` is a power of ten, so
    /// its binary trailing-zero count equals the decimal one.
    pub fn to_prec(self) -> usize {
        self.scale * BASE_LOG - self.submod.trailing_zeros() as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        for prec in 0..200 {
            let ntp = NumberTruncateParams::from_prec(prec);
            assert_eq!(ntp.to_prec(), prec, "prec {}", prec);
        }
    }

    #[test]
    fn exact_multiples() {
        let ntp = NumberTruncateParams::from_prec(18);
        assert_eq!(ntp, NumberTruncateParams { scale: 2, submod: 1 });

        let ntp = NumberTruncateParams::from_prec(20);
        assert_eq!(ntp, NumberTruncateParams { scale: 3, submod: 10_000_000 });
    }
}
