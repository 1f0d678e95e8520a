//! # Segprimes — Segmented Prime Generation on the Search Interval
//!
//! Produces the dense, ascending array of primes in `[start, stop)` that a
//! batch of the sieve works through. The number line is walked with a
//! mod-30 wheel (residues coprime to {2, 3, 5}); the wheel phase for an
//! arbitrary starting point is pinned once on the host, and the interval is
//! then split into 60-wide windows dispatched as parallel tasks. Each task
//! screens its ≤16 wheel candidates with the deterministic u64 primality
//! test.
//!
//! The phase pinning walks exactly like the original search code: advance
//! to the first `N ≥ start` with `N ≡ ±1 (mod 6)` and `N mod 5 ≠ 0`, probe
//! forward on the mod-6 wheel until a multiple of 5 pins the index, then
//! step the mod-30 gap table backwards to recover the index of the start.

use rayon::prelude::*;

use crate::primes::is_prime64;

/// Gap table between consecutive residues coprime to 30.
pub const WHEEL: [u32; 8] = [4, 2, 4, 2, 4, 6, 2, 6];

/// Pin the mod-30 wheel for `start`: returns the first wheel-admissible
/// `N ≥ start` and the index into [`WHEEL`] whose gap leads to the next
/// admissible number. Callers pass `start ≥ 7`.
pub fn find_wheel_offset(start: u64) -> (u64, usize) {
    debug_assert!(start >= 7);

    // First N >= start on the mod-6 wheel, excluding multiples of 5.
    let mut i = 1;
    let mut n = (start / 6) * 6 - 1;
    while n < start || n % 5 == 0 {
        if i == 1 {
            i = 0;
            n += 2;
        } else {
            i = 1;
            n += 4;
        }
    }
    let aligned = n;

    // Probe forward until a multiple of 5 is struck; which mod-6 step hit
    // it decides whether we are at wheel index 5 or 7.
    let mut idx: usize;
    loop {
        if i == 1 {
            n += 2;
            i = 0;
            if n % 5 == 0 {
                n -= 2;
                idx = 5;
                break;
            }
        } else {
            n += 4;
            i = 1;
            if n % 5 == 0 {
                n -= 4;
                idx = 7;
                break;
            }
        }
    }

    // Walk the gap table backwards to the aligned start.
    while n != aligned {
        idx = if idx == 0 { 7 } else { idx - 1 };
        n -= WHEEL[idx] as u64;
    }

    (aligned, idx)
}

/// All primes in `[start, stop)`, ascending. One task per 60-wide window.
pub fn generate_segment(start: u64, stop: u64) -> Vec<u64> {
    if stop <= start.max(7) {
        return Vec::new();
    }
    let (base, idx) = find_wheel_offset(start.max(7));
    if base >= stop {
        return Vec::new();
    }

    let ntasks = (stop - base) / 60 + 1;
    (0..ntasks)
        .into_par_iter()
        .flat_map_iter(|g| {
            let mut n = base + 60 * g;
            let mut j = idx;
            let end = (base + 60 * (g + 1)).min(stop);
            let mut window = Vec::with_capacity(16);
            while n < end {
                if is_prime64(n) {
                    window.push(n);
                }
                n += WHEEL[j] as u64;
                j = (j + 1) & 7;
            }
            window.into_iter()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::generate_primes;

    fn gcd(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            let t = b;
            b = a % b;
            a = t;
        }
        a
    }

    #[test]
    fn wheel_offset_enumerates_coprime_residues() {
        for start in [7u64, 8, 11, 29, 30, 31, 97, 1000, 123456, 1_000_003] {
            let (aligned, mut idx) = find_wheel_offset(start);
            assert!(aligned >= start);
            assert_eq!(gcd(aligned, 30), 1, "start={}", start);
            // nothing admissible was skipped between start and aligned
            for m in start..aligned {
                assert_ne!(gcd(m, 30), 1, "skipped {} for start {}", m, start);
            }
            // stepping the gap table visits exactly the coprime residues
            let mut n = aligned;
            let mut expected: Vec<u64> = (aligned..aligned + 240).filter(|&m| gcd(m, 30) == 1).collect();
            let mut walked = Vec::new();
            while n < aligned + 240 {
                walked.push(n);
                n += WHEEL[idx] as u64;
                idx = (idx + 1) & 7;
            }
            expected.truncate(walked.len());
            assert_eq!(walked, expected, "start={}", start);
        }
    }

    #[test]
    fn segment_matches_wheel_sieve() {
        let got = generate_segment(1_000_000, 1_050_000);
        let expected: Vec<u64> = generate_primes(1_050_000)
            .into_iter()
            .filter(|&p| p >= 1_000_000 && p < 1_050_000)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn segment_boundaries_are_half_open() {
        // 1_000_003 is prime
        assert!(generate_segment(1_000_003, 1_000_004).contains(&1_000_003));
        assert!(generate_segment(1_000_000, 1_000_003).is_empty());
        assert!(generate_segment(500, 500).is_empty());
    }

    #[test]
    fn segment_large_interval_spot_check() {
        // factor of 2^67 - 1; the window around it must contain it
        let p = 761838257287u64;
        let got = generate_segment(p - 500, p + 500);
        assert!(got.contains(&p));
        assert!(got.windows(2).all(|w| w[0] < w[1]));
        for &q in &got {
            assert!(is_prime64(q));
        }
    }
}
