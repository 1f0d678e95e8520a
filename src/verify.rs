//! # Verify — Independent CPU Validation of Candidate Factors
//!
//! Every `(p, k, n, c)` the sieve emits is re-checked on the host before it
//! is reported:
//!
//! 1. **`try_all_factors`** — trial-divides the target `k·2^n + c` by each
//!    entry of the fixed small-prime table. A hit means the target has a
//!    trivially known divisor and the candidate is silently dropped. The
//!    per-prime arithmetic is the same left-to-right inverse power of two
//!    as the sieve, rebuilt in a 16-bit word (REDC over 2^16), so it shares
//!    no code path with the 64-bit engine it cross-checks.
//! 2. **`verify_factor`** — recomputes `k·2^n mod p` in 64-bit Montgomery
//!    form and demands exactly `1` (for `c = −1`) or `p − 1` (for
//!    `c = +1`). A failure here means the sieve produced garbage and the
//!    whole run is poisoned.

use crate::arith::MontgomeryCtx;
use crate::primes::SmallPrimes;

/// True iff `p` divides `k·2^n + c` (`c ∈ {−1, +1}`), by Montgomery
/// recompute: square-and-double `2^n mod p`, multiply in `k`, convert out,
/// compare against `1` or `p − 1`.
pub fn verify_factor(p: u64, k: u64, n: u32, c: i32) -> bool {
    let ctx = MontgomeryCtx::new(p);
    let b = ctx.mul(ctx.two_pow(n), ctx.to_mont(k));
    let r = ctx.from_mont(b);
    (c == -1 && r == 1) || (c == 1 && r == p - 1)
}

// ---- 16-bit REDC (word size 2^16) ----

/// Inverse of odd `n` modulo 2^16, by the `3n ^ 2` seed trick plus Newton
/// steps. Only the low 16 bits are meaningful to callers.
fn invmod2pow16(n: u32) -> u32 {
    let i = n as u16;
    let mut r: u32 = n.wrapping_mul(3) ^ 2;
    r = (2u32.wrapping_mul(r))
        .wrapping_sub(((r as u16).wrapping_mul(r as u16) as u32).wrapping_mul(i as u32));
    r = (2u32.wrapping_mul(r))
        .wrapping_sub(((r as u16).wrapping_mul(r as u16) as u32).wrapping_mul(i as u32));
    r = (2u32.wrapping_mul(r)).wrapping_sub(r.wrapping_mul(r).wrapping_mul(n));
    r
}

/// 16-bit Montgomery multiply: `a·b·2^-16 mod n`, with `ns = -n⁻¹ mod 2^16`.
fn mulredc16(a: u32, b: u32, n: u16, ns: u16) -> u32 {
    let t = a.wrapping_mul(b);
    let mut hi = (t >> 16) as u16;
    let mut lo = t as u16;
    lo = lo.wrapping_mul(ns);
    hi = hi.wrapping_add(u16::from(lo != 0));
    let mp = ((lo as u32 * n as u32) >> 16) as u16;
    let r = mp as u32 + hi as u32;
    if r > n as u32 {
        r - n as u32
    } else {
        r
    }
}

/// Left-to-right `2^-nexp mod p` in the 16-bit word, seeded with the top
/// four bits of the exponent folded into `r0 = 2^(16 - t)`.
fn invpow2_redc16(nexp: u32, p: u16, ps: u16, bbits: u32, r0: u32) -> u32 {
    let mut r = r0;
    if r >= p as u32 {
        r %= p as u32;
    }
    for b in (0..=bbits).rev() {
        r = mulredc16(r, r, p, ps);
        if nexp & (1u32 << b) != 0 {
            r = if r & 1 != 0 { (r + p as u32) >> 1 } else { r >> 1 };
        }
    }
    mulredc16(r, 1, p, ps)
}

/// Does the small prime `p` divide `k·2^n + c`? Requires `n ≥ 16`.
fn try_factor(k: u64, n: u32, c: i32, p: u32) -> bool {
    let bbits = 31 - n.leading_zeros();
    let r0 = 1u32 << (16 - (n >> (bbits - 3)));
    let ps = invmod2pow16(p).wrapping_neg() as u16;

    let mut kcalc = invpow2_redc16(n, p as u16, ps, bbits - 4, r0);
    if c > 0 {
        kcalc = p - kcalc;
    }
    kcalc == (k % p as u64) as u32
}

/// Return the first small prime dividing `k·2^n + c`, or 0 when the target
/// has no divisor in the table.
pub fn try_all_factors(k: u64, n: u32, c: i32, table: &SmallPrimes) -> u32 {
    for sp in table.iter() {
        if try_factor(k, n, c, sp) {
            return sp;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::pow_mod;

    /// Direct check that p | k·2^n + c, via plain modular exponentiation.
    fn divides_directly(p: u64, k: u64, n: u32, c: i32) -> bool {
        let r = (k % p) as u128 * pow_mod(2, n as u64, p) as u128 % p as u128;
        if c == 1 {
            r == p as u128 - 1
        } else {
            r == 1
        }
    }

    #[test]
    fn verify_factor_micro_cases() {
        // 3 | 1*2^2 - 1
        assert!(verify_factor(3, 1, 2, -1));
        // 5 | 3*2^3 + 1 = 25
        assert!(verify_factor(5, 3, 3, 1));
        assert!(!verify_factor(5, 3, 3, -1));
        assert!(!verify_factor(7, 3, 3, 1));
        // 193707721 and 761838257287 both divide 2^67 - 1
        assert!(verify_factor(193707721, 1, 67, -1));
        assert!(verify_factor(761838257287, 1, 67, -1));
        // 59649589127497217 | 2^128 + 1
        assert!(verify_factor(59649589127497217, 1, 128, 1));
        assert!(!verify_factor(59649589127497217, 1, 128, -1));
    }

    #[test]
    fn verify_factor_matches_direct() {
        for &p in &[101u64, 193707721, 999999937, 761838257287] {
            for k in [1u64, 3, 5, 1201, 9999] {
                for n in [65u32, 66, 67, 100, 128, 1000] {
                    for c in [-1i32, 1] {
                        assert_eq!(
                            verify_factor(p, k, n, c),
                            divides_directly(p, k, n, c),
                            "p={} k={} n={} c={}",
                            p,
                            k,
                            n,
                            c
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn try_factor_matches_direct_per_prime() {
        let table = SmallPrimes::new();
        for sp in table.iter().take(200) {
            for k in [1u64, 3, 7, 12345, 2147483647] {
                for n in [65u32, 100, 1024, 999983] {
                    for c in [-1i32, 1] {
                        assert_eq!(
                            try_factor(k, n, c, sp),
                            divides_directly(sp as u64, k, n, c),
                            "sp={} k={} n={} c={}",
                            sp,
                            k,
                            n,
                            c
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn try_all_factors_finds_known_divisors() {
        let table = SmallPrimes::new();
        // 31 | 2^65 - 1 (ord_2(31) = 5 divides 65), and no smaller table prime does
        assert_eq!(try_all_factors(1, 65, -1, &table), 31);
        // 11 | 2^65 + 1 (ord_2(11) = 10, 2^65 ≡ -1 mod 11)
        assert_eq!(try_all_factors(1, 65, 1, &table), 11);
        // 2^67 - 1 = 193707721 · 761838257287, both beyond the table
        assert_eq!(try_all_factors(1, 67, -1, &table), 0);
    }
}
