//! # Kernels — Indexed Compute Tasks over the Device Buffers
//!
//! The five task bodies the engine dispatches onto the queue, one prime per
//! lane, fanned out over the thread pool:
//!
//! - `clear_counts` / `clear_results` — zero the per-batch and per-drain
//!   counters.
//! - `getsegprimes` — fill `primes[]` with the batch's prime interval.
//! - `setup` — per prime, derive the Montgomery parameter `Ps`, the initial
//!   residue `K = 2^-nmin mod p`, and the terminal target
//!   `lK = 2^-lastN mod p`.
//! - `sieve` — walk `n` upward in `nstep` strides, decoding factor hits
//!   from the residue window at each position. Proth/Riesel and
//!   Cullen/Woodall have separate decoders; the residue advance comes in
//!   general, 32-step, and small-step forms (see [`StepKind`]).
//! - `check` — compare every terminal residue against its independently
//!   seeded target, raise the flag on mismatch, and fold group checksums.
//!
//! ## Window decode
//!
//! At position `n` the lane holds the canonical residue `K = 2^-n mod p`.
//! For any factor `p | k·2^m ∓ 1` with `m = n + t`, `t < nstep`, and `k` in
//! range, the residue equals the plain integer `k·2^t` — the setup
//! constraints `kmax·2^nstep < pmin` keep it unreduced — so stripping
//! trailing zeros recovers `(k, m)` exactly. `K` hits are factors of
//! `k·2^m − 1`, `p − K` hits factors of `k·2^m + 1`. Consecutive windows
//! partition the scan, so nothing is reported twice.

use rayon::prelude::*;
use std::sync::atomic::Ordering;

use crate::arith::{advance, hensel_inverse, invpow2, StepKind};
use crate::device::{DeviceBuffers, GROUP_SIZE};
use crate::segprimes::generate_segment;

/// Static arguments of the setup task.
#[derive(Clone, Copy, Debug)]
pub struct SetupParams {
    pub r0: u64,
    pub bbits: u32,
    pub nmin: u32,
    pub r1: u64,
    pub bbits1: u32,
    pub last_n: u32,
}

/// Static arguments of the sieve task; `nstart` varies per invocation.
#[derive(Clone, Copy, Debug)]
pub struct SieveParams {
    pub nstart: u32,
    pub nstep: u32,
    pub kernel_nstep: u32,
    pub mont_nstep: u32,
    /// Internal (decremented) lower bound; accepted exponents are
    /// `nmin < m ≤ nmax`.
    pub nmin: u32,
    pub nmax: u32,
    pub kmin: u32,
    pub kmax: u32,
    pub kstep: u32,
    pub koffset: u32,
    pub kind: StepKind,
    pub cw: bool,
}

/// Zero the batch prime counter.
pub fn clear_counts(buf: &DeviceBuffers) {
    buf.primecount[0].store(0, Ordering::Release);
}

/// Zero everything the host drains: flag, factor count, checksums, and both
/// prime counters.
pub fn clear_results(buf: &DeviceBuffers) {
    buf.flag.store(0, Ordering::Release);
    buf.factor_count.store(0, Ordering::Release);
    buf.primecount[0].store(0, Ordering::Release);
    buf.primecount[1].store(0, Ordering::Release);
    let mut checksum = buf.checksum.lock().unwrap();
    checksum.iter_mut().for_each(|c| *c = 0);
}

/// Fill `primes[]` with the primes in `[start, stop)` and publish the batch
/// count. The unclamped count also feeds the running maximum used for
/// overflow detection.
pub fn getsegprimes(buf: &DeviceBuffers, start: u64, stop: u64) {
    let found = generate_segment(start, stop);
    let mut primes = buf.primes.lock().unwrap();
    let stored = found.len().min(primes.len());
    primes[..stored].copy_from_slice(&found[..stored]);
    let count = found.len() as u32;
    buf.primecount[0].store(count, Ordering::Release);
    buf.primecount[1].fetch_max(count, Ordering::AcqRel);
}

/// Per-prime Montgomery state: `Ps`, initial residue, terminal target.
pub fn setup(buf: &DeviceBuffers, prm: &SetupParams) {
    let count = buf.batch_len();
    let primes = buf.primes.lock().unwrap();
    let mut ps = buf.ps.lock().unwrap();
    let mut k = buf.k.lock().unwrap();
    let mut lk = buf.lk.lock().unwrap();

    (
        &primes[..count],
        &mut ps[..count],
        &mut k[..count],
        &mut lk[..count],
    )
        .into_par_iter()
        .for_each(|(&p, ps_i, k_i, lk_i)| {
            let q = hensel_inverse(p);
            *ps_i = q;
            *k_i = invpow2(prm.nmin, prm.r0, prm.bbits, p, q);
            *lk_i = invpow2(prm.last_n, prm.r1, prm.bbits1, p, q);
        });
}

/// Decode Proth/Riesel hits from one side of the residue window.
/// `p_signed` is `-p` for the `K` side (`c = -1`) and `+p` for `p - K`.
#[inline]
fn decode_pr(buf: &DeviceBuffers, p_signed: i64, side: u64, n: u32, prm: &SieveParams) {
    let t = side.trailing_zeros();
    if t >= prm.nstep {
        return;
    }
    let k = side >> t;
    let m = n + t;
    if k >= prm.kmin as u64
        && k <= prm.kmax as u64
        && k % prm.kstep as u64 == prm.koffset as u64
        && m > prm.nmin
        && m <= prm.nmax
    {
        buf.push_factor(p_signed, k as u32, m);
    }
}

/// Decode a Cullen/Woodall diagonal hit: `side == m·2^j` with `m = n + j`.
/// Within a window `m < 2n`, so `j` is pinned to the bit-length gap between
/// `side` and `n` (or one less); both candidates are checked exactly.
#[inline]
fn decode_cw(buf: &DeviceBuffers, p_signed: i64, side: u64, n: u32, prm: &SieveParams) {
    let gap = (63 - side.leading_zeros()) as i64 - (31 - n.leading_zeros()) as i64;
    for j in [gap, gap - 1] {
        if j < 0 || j >= prm.nstep as i64 {
            continue;
        }
        let j = j as u32;
        let m = n + j;
        if side >> j == m as u64 && (m as u64) << j == side && m > prm.nmin && m <= prm.nmax {
            buf.push_factor(p_signed, m, m);
        }
    }
}

/// One sieve invocation: for every prime in the batch, scan the positions
/// in `[nstart, nstart + kernel_nstep)` that lie below `nmax`, testing the
/// window at each position and advancing the residue by `2^-nstep`. The
/// final advance of the batch leaves `K = 2^-lastN mod p` for the check.
pub fn sieve(buf: &DeviceBuffers, prm: &SieveParams) {
    let count = buf.batch_len();
    let primes = buf.primes.lock().unwrap();
    let ps = buf.ps.lock().unwrap();
    let mut k = buf.k.lock().unwrap();

    let stop = prm.nstart as u64 + prm.kernel_nstep as u64;

    (&primes[..count], &ps[..count], &mut k[..count])
        .into_par_iter()
        .for_each(|(&p, &psi, slot)| {
            let mut kv = *slot;
            let mut n = prm.nstart;
            while (n as u64) < stop && n < prm.nmax {
                if prm.cw {
                    decode_cw(buf, -(p as i64), kv, n, prm);
                    decode_cw(buf, p as i64, p - kv, n, prm);
                } else {
                    decode_pr(buf, -(p as i64), kv, n, prm);
                    decode_pr(buf, p as i64, p - kv, n, prm);
                }
                kv = advance(prm.kind, kv, prm.mont_nstep, p, psi);
                n += prm.nstep;
            }
            *slot = kv;
        });
}

/// Compare terminal residues against the independently seeded targets and
/// fold the drain-window checksums: group sums of final `K` into
/// `checksum[1..]`, the batch prime count into `checksum[0]`.
pub fn check(buf: &DeviceBuffers) {
    let count = buf.batch_len();
    let k = buf.k.lock().unwrap();
    let lk = buf.lk.lock().unwrap();
    let mut checksum = buf.checksum.lock().unwrap();

    let (head, groups) = checksum.split_at_mut(1);
    groups.par_iter_mut().enumerate().for_each(|(g, slot)| {
        let lo = g * GROUP_SIZE;
        if lo >= count {
            return;
        }
        let hi = (lo + GROUP_SIZE).min(count);
        let mut sum = 0u64;
        for i in lo..hi {
            if k[i] != lk[i] {
                buf.flag.fetch_add(1, Ordering::Relaxed);
            }
            sum = sum.wrapping_add(k[i]);
        }
        *slot = slot.wrapping_add(sum);
    });
    head[0] = head[0].wrapping_add(count as u64);
}
