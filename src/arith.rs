//! # Arith — Montgomery Arithmetic Primitives
//!
//! Fixed-width modular arithmetic shared by every stage of the sieve:
//!
//! 1. **Hensel inverse** — `-p⁻¹ mod 2^64` for odd `p`, by Newton iteration
//!    to a fixpoint. One of these is precomputed per prime and carried in
//!    the `Ps[]` device buffer.
//! 2. **REDC** — Montgomery reduction `t·2^-64 mod p` of a 128-bit value,
//!    the only reduction the inner loops ever perform. No division by `p`
//!    happens anywhere on the hot path.
//! 3. **Inverse power of two** (`invpow2`) — the left-to-right computation
//!    of `2^-e mod p` seeded from a precomputed `2^(64-t)` that already
//!    encodes the top bits of `e`. Used by the setup task for both the
//!    initial residue and the terminal check target.
//! 4. **Step advance** (`advance`) — `K·2^-nstep mod p` in one reduction,
//!    valid because the search constraints guarantee `2^(64-nstep) ≤ p`.
//! 5. **`MontgomeryCtx`** — a self-contained context for callers that need
//!    general modular powering (the factor verifier, the deterministic
//!    primality test).
//!
//! ## References
//!
//! - Peter L. Montgomery, "Modular Multiplication Without Trial Division",
//!   Mathematics of Computation, 44(170):519–521, 1985.

/// Floor of log base 2. `v` must be nonzero.
#[inline]
pub fn lg2(v: u64) -> u32 {
    63 - v.leading_zeros()
}

/// Modular exponentiation: base^exp mod modulus, with u128 intermediates.
pub fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result: u64 = 1;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result as u128 * base as u128 % modulus as u128) as u64;
        }
        exp >>= 1;
        base = (base as u128 * base as u128 % modulus as u128) as u64;
    }
    result
}

/// `-p⁻¹ mod 2^64` for odd `p`, by Hensel lifting: iterate
/// `q ← q·(2 − p·q)` until it stops moving. Converges quadratically, so the
/// loop runs at most six times from the seed `q = 1`.
#[inline]
pub fn hensel_inverse(p: u64) -> u64 {
    debug_assert!(p & 1 == 1, "Montgomery requires an odd modulus");
    let mut q: u64 = 1;
    let mut prev: u64 = 0;
    while q != prev {
        prev = q;
        q = q.wrapping_mul(2u64.wrapping_sub(p.wrapping_mul(q)));
    }
    q.wrapping_neg()
}

/// Montgomery reduction: `t·2^-64 mod p`, with `ps = -p⁻¹ mod 2^64`.
/// Requires `t < p·2^64`; the result is fully reduced.
#[inline]
pub fn redc(t: u128, p: u64, ps: u64) -> u64 {
    let m = (t as u64).wrapping_mul(ps);
    let u = t + (m as u128) * (p as u128);
    let r = (u >> 64) as u64;
    if r >= p {
        r - p
    } else {
        r
    }
}

/// Montgomery multiplication: `a·b·2^-64 mod p` for `a, b < p`.
#[inline]
pub fn mulredc(a: u64, b: u64, p: u64, ps: u64) -> u64 {
    redc((a as u128) * (b as u128), p, ps)
}

/// Modular addition for `a, b < p < 2^63`.
#[inline]
pub fn mont_add(a: u64, b: u64, p: u64) -> u64 {
    let c = if a >= p - b { p } else { 0 };
    a + b - c
}

/// `2^-exp mod p` by left-to-right binary powering, returned as a plain
/// (non-Montgomery) residue.
///
/// `r0` is the Montgomery form of `2^-t` where `t` is the top bits of
/// `exp` (`r0 = 2^(64-t)`, so no conversion is needed), and `bbits` indexes
/// the highest bit of `exp` still to be consumed. Each round squares; a set
/// bit halves the residue (add `p` first when odd). The trailing reduction
/// by 1 converts out of Montgomery form.
pub fn invpow2(exp: u32, r0: u64, bbits: u32, p: u64, ps: u64) -> u64 {
    let mut r = r0;
    if r >= p {
        r %= p;
    }
    for b in (0..=bbits).rev() {
        r = mulredc(r, r, p, ps);
        if exp & (1u32 << b) != 0 {
            r = if r & 1 != 0 { (r + p) >> 1 } else { r >> 1 };
        }
    }
    mulredc(r, 1, p, ps)
}

/// Inner-loop advance selection. All three compute `K·2^-nstep mod p`; they
/// differ only in how the shifted 128-bit input to the reduction is formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    /// `nstep > 32`: one Montgomery multiply by the constant `2^(64-nstep)`,
    /// which fits a word and is below `p` by the setup constraint.
    General,
    /// `nstep == 32`: the two halves of `K` are the two words of the input.
    Step32,
    /// `nstep < 32`: the shift crosses the word boundary, widen first.
    Small,
}

impl StepKind {
    pub fn for_nstep(nstep: u32) -> StepKind {
        match nstep {
            32 => StepKind::Step32,
            s if s < 32 => StepKind::Small,
            _ => StepKind::General,
        }
    }
}

/// One scan step: `K·2^-nstep mod p`, with `mont_nstep = 64 - nstep`.
#[inline]
pub fn advance(kind: StepKind, k: u64, mont_nstep: u32, p: u64, ps: u64) -> u64 {
    match kind {
        StepKind::General => mulredc(k, 1u64 << mont_nstep, p, ps),
        StepKind::Step32 => {
            let lo = (k << 32) as u128;
            let hi = (k >> 32) as u128;
            redc(hi << 64 | lo, p, ps)
        }
        StepKind::Small => redc((k as u128) << mont_nstep, p, ps),
    }
}

/// Montgomery multiplication context for a fixed odd modulus.
///
/// Used where the full conversion machinery is wanted (factor verification,
/// strong-pseudoprime testing); the sieve kernels instead work from the raw
/// `(p, Ps)` pairs held in device buffers.
#[derive(Clone, Copy, Debug)]
pub struct MontgomeryCtx {
    /// The modulus (odd, > 1).
    pub p: u64,
    /// `-p⁻¹ mod 2^64`.
    ps: u64,
    /// `2^64 mod p` (Montgomery form of 1).
    one: u64,
    /// `2^128 mod p` (for converting into Montgomery form).
    r2: u64,
}

impl MontgomeryCtx {
    pub fn new(p: u64) -> Self {
        debug_assert!(p > 1 && p & 1 == 1, "Montgomery requires odd modulus > 1");
        let ps = hensel_inverse(p);
        let one = p.wrapping_neg() % p;
        let r2 = ((one as u128 * one as u128) % p as u128) as u64;
        MontgomeryCtx { p, ps, one, r2 }
    }

    /// Montgomery form of 1.
    #[inline]
    pub fn one(&self) -> u64 {
        self.one
    }

    #[inline]
    pub fn to_mont(&self, a: u64) -> u64 {
        self.mul(a % self.p, self.r2)
    }

    #[inline]
    pub fn from_mont(&self, a: u64) -> u64 {
        redc(a as u128, self.p, self.ps)
    }

    #[inline]
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        mulredc(a, b, self.p, self.ps)
    }

    #[inline]
    pub fn sqr(&self, a: u64) -> u64 {
        self.mul(a, a)
    }

    #[inline]
    pub fn add(&self, a: u64, b: u64) -> u64 {
        mont_add(a, b, self.p)
    }

    /// Montgomery-form exponentiation; `base` and the result are in
    /// Montgomery form.
    pub fn pow_mod(&self, base: u64, mut exp: u64) -> u64 {
        let mut result = self.one;
        let mut b = base;
        while exp > 0 {
            if exp & 1 == 1 {
                result = self.mul(result, b);
            }
            exp >>= 1;
            if exp > 0 {
                b = self.sqr(b);
            }
        }
        result
    }

    /// Montgomery form of `2^n`, by left-to-right square-and-double over the
    /// bits of `n` below the leader. Doubling is an addition, so the whole
    /// walk stays division-free.
    pub fn two_pow(&self, n: u32) -> u64 {
        if n == 0 {
            return self.one;
        }
        let mut a = self.add(self.one, self.one); // 2 in Montgomery form
        let bits = 32 - n.leading_zeros();
        for i in (0..bits - 1).rev() {
            a = self.sqr(a);
            if n & (1u32 << i) != 0 {
                a = self.add(a, a);
            }
        }
        a
    }
}
