//! End-to-end engine tests on narrow prime ranges.
//!
//! These drive the full pipeline — segmented generation, Montgomery setup,
//! the windowed exponent scan, the terminal-residue check, CPU
//! verification, checkpointing, and the results file — against ranges
//! placed around known factors of Mersenne and Fermat numbers:
//!
//! - `2^67 − 1 = 193707721 · 761838257287` (Cole, 1903)
//! - `2^128 + 1 = 59649589127497217 · 5704689200685129054721`
//!   (Morrison–Brillhart, 1970)
//!
//! Expected counters are recomputed independently with plain modular
//! exponentiation (`pow_mod` + Fermat inversion), never with the engine's
//! own REDC machinery.
//!
//! Run with `--release` for comfort; the ranges are narrow enough for
//! debug builds too.

use pcwsieve::arith::pow_mod;
use pcwsieve::engine::{self, SearchState};
use pcwsieve::host::StandaloneHost;
use pcwsieve::primes::{is_prime64, SmallPrimes};
use pcwsieve::verify::try_all_factors;

const M67_FACTOR: u64 = 761838257287;
const A: u64 = 761838257000;
const B: u64 = 761838257300;
const C: u64 = 761838258000;

fn primes_in(lo: u64, hi: u64) -> Vec<u64> {
    (lo..hi).filter(|&x| is_prime64(x)).collect()
}

/// Independent checksum over a prime range: the terminal residues
/// `2^-last_n mod p` for every prime, by Fermat inversion.
fn residue_checksum(lo: u64, hi: u64, last_n: u32) -> u64 {
    primes_in(lo, hi)
        .iter()
        .fold(0u64, |acc, &p| acc.wrapping_add(pow_mod(2, p - 1 - last_n as u64, p)))
}

/// Reference factor scan for k = 1: `p | 2^m ∓ 1` over the exponent range,
/// with the same small-prime suppression the drain applies.
fn reference_lines_k1(lo: u64, hi: u64, nmin: u32, nmax: u32, table: &SmallPrimes) -> Vec<String> {
    let mut lines = Vec::new();
    for p in primes_in(lo, hi) {
        for m in nmin..=nmax {
            let r = pow_mod(2, m as u64, p);
            let c = if r == 1 {
                -1
            } else if r == p - 1 {
                1
            } else {
                continue;
            };
            if try_all_factors(1, m, c, table) == 0 {
                lines.push(format!("{} | 1*2^{}{:+}", p, m, c));
            }
        }
    }
    lines
}

fn read_results(dir: &std::path::Path) -> Vec<String> {
    let raw = std::fs::read_to_string(dir.join("factors.txt")).unwrap();
    raw.lines().map(str::to_string).collect()
}

fn run_range(dir: &std::path::Path, pmin: u64, pmax: u64) -> SearchState {
    let host = StandaloneHost::new(dir);
    let mut sd = SearchState::new(pmin, pmax, 1, 1, 65, 100, false);
    engine::run(&mut sd, &host).unwrap();
    sd
}

#[test]
fn finds_known_mersenne_factor_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let sd = run_range(dir.path(), A, C);

    let expected_primes = primes_in(A, C);
    assert_eq!(sd.primecount, expected_primes.len() as u64);

    // one factor: 761838257287 | 1*2^67-1, contributing k + n - 1 = 67
    assert_eq!(sd.factorcount, 1);
    let expected_checksum = residue_checksum(A, C, sd.last_n).wrapping_add(67);
    assert_eq!(sd.checksum, expected_checksum);

    let lines = read_results(dir.path());
    assert_eq!(
        lines[..lines.len() - 1],
        [format!("{} | 1*2^67-1", M67_FACTOR)]
    );
    assert_eq!(*lines.last().unwrap(), format!("{:016X}", sd.checksum));
}

#[test]
fn emitted_lines_match_reference_scan() {
    let dir = tempfile::tempdir().unwrap();
    let sd = run_range(dir.path(), A, C);

    let table = SmallPrimes::new();
    let mut expected = reference_lines_k1(A, C, 65, 100, &table);
    expected.sort();

    let mut got = read_results(dir.path());
    got.pop(); // digest line
    got.sort();
    assert_eq!(got, expected);
    assert_eq!(sd.factorcount as usize, got.len());
}

#[test]
fn finds_known_fermat_factor_end_to_end() {
    let p = 59649589127497217u64; // divides 2^128 + 1
    let dir = tempfile::tempdir().unwrap();
    let host = StandaloneHost::new(dir.path());
    let mut sd = SearchState::new(p - 500, p + 500, 1, 1, 65, 150, false);
    engine::run(&mut sd, &host).unwrap();

    assert_eq!(sd.factorcount, 1);
    let lines = read_results(dir.path());
    assert!(lines.contains(&format!("{} | 1*2^128+1", p)));

    let expected_checksum =
        residue_checksum(p - 500, p + 500, sd.last_n).wrapping_add(1 + 128 + 1);
    assert_eq!(sd.checksum, expected_checksum);
}

#[test]
fn cullen_woodall_range_digest() {
    let (lo, hi) = (43_000_000_000u64, 43_000_002_000u64);
    let dir = tempfile::tempdir().unwrap();
    let host = StandaloneHost::new(dir.path());
    let mut sd = SearchState::new(lo, hi, 0, 0, 65, 100, true);
    engine::run(&mut sd, &host).unwrap();

    assert_eq!(sd.primecount, primes_in(lo, hi).len() as u64);

    // reference diagonal scan: p | m·2^m ∓ 1
    let mut expected_factors = 0u64;
    let mut factor_contrib = 0u64;
    let table = SmallPrimes::new();
    for p in primes_in(lo, hi) {
        for m in 65u32..=100 {
            let r = (m as u128 * pow_mod(2, m as u64, p) as u128 % p as u128) as u64;
            let c = if r == 1 {
                -1
            } else if r == p - 1 {
                1
            } else {
                continue;
            };
            if try_all_factors(m as u64, m, c, &table) == 0 {
                expected_factors += 1;
                factor_contrib = factor_contrib
                    .wrapping_add(m as u64)
                    .wrapping_add(m as u64)
                    .wrapping_add(if c == 1 { 1 } else { u64::MAX });
            }
        }
    }
    assert_eq!(sd.factorcount, expected_factors);

    let expected_checksum =
        residue_checksum(lo, hi, sd.last_n).wrapping_add(factor_contrib);
    assert_eq!(sd.checksum, expected_checksum);

    let lines = read_results(dir.path());
    if expected_factors == 0 {
        assert_eq!(lines, vec!["no factors".to_string(), format!("{:016X}", sd.checksum)]);
    }
}

#[test]
fn empty_range_writes_zero_digest() {
    let dir = tempfile::tempdir().unwrap();
    let sd = run_range(dir.path(), A, A);

    assert_eq!(sd.factorcount, 0);
    assert_eq!(sd.primecount, 0);
    assert_eq!(sd.checksum, 0);
    let raw = std::fs::read_to_string(dir.path().join("factors.txt")).unwrap();
    assert_eq!(raw, "no factors\n0000000000000000\n");
}

#[test]
fn partition_invariance_of_counters_and_lines() {
    let d_ab = tempfile::tempdir().unwrap();
    let d_bc = tempfile::tempdir().unwrap();
    let d_ac = tempfile::tempdir().unwrap();

    let ab = run_range(d_ab.path(), A, B);
    let bc = run_range(d_bc.path(), B, C);
    let ac = run_range(d_ac.path(), A, C);

    assert_eq!(ab.primecount + bc.primecount, ac.primecount);
    assert_eq!(ab.factorcount + bc.factorcount, ac.factorcount);
    assert_eq!(ab.checksum.wrapping_add(bc.checksum), ac.checksum);

    let mut split_lines: Vec<String> = Vec::new();
    for d in [d_ab.path(), d_bc.path()] {
        let mut lines = read_results(d);
        lines.pop();
        if lines.last().map(String::as_str) == Some("no factors") {
            lines.pop();
        }
        split_lines.extend(lines);
    }
    split_lines.sort();

    let mut whole_lines = read_results(d_ac.path());
    whole_lines.pop();
    whole_lines.sort();
    assert_eq!(split_lines, whole_lines);
}

#[test]
fn resume_from_checkpoint_matches_uninterrupted_run() {
    // uninterrupted reference
    let d_full = tempfile::tempdir().unwrap();
    let full = run_range(d_full.path(), A, C);

    // first half, then a hand-carried checkpoint into a fresh directory
    let d_ab = tempfile::tempdir().unwrap();
    let ab = run_range(d_ab.path(), A, B);

    let mut probe = SearchState::new(A, C, 1, 1, 65, 100, false);
    probe.setup_search().unwrap();
    let workunit = probe.workunit;

    let d_resume = tempfile::tempdir().unwrap();
    std::fs::write(
        d_resume.path().join("PCWstateA.txt"),
        format!(
            "{} {} {} {} {} {}\n",
            workunit, B, ab.primecount, ab.checksum, ab.factorcount, 12345
        ),
    )
    .unwrap();
    // the results written before the interruption survive in place
    let mut carried = read_results(d_ab.path());
    carried.pop();
    let mut seed = carried.join("\n");
    if !seed.is_empty() {
        seed.push('\n');
    }
    std::fs::write(d_resume.path().join("factors.txt"), seed).unwrap();

    let resumed = run_range(d_resume.path(), A, C);

    assert_eq!(resumed.primecount, full.primecount);
    assert_eq!(resumed.factorcount, full.factorcount);
    assert_eq!(resumed.checksum, full.checksum);
    assert_eq!(
        std::fs::read_to_string(d_resume.path().join("factors.txt")).unwrap(),
        std::fs::read_to_string(d_full.path().join("factors.txt")).unwrap()
    );
}

#[test]
fn resume_at_pmax_completes_without_touching_results() {
    let mut probe = SearchState::new(A, C, 1, 1, 65, 100, false);
    probe.setup_search().unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("PCWstateB.txt"),
        format!("{} {} 28 77 0 9\n", probe.workunit, C),
    )
    .unwrap();
    std::fs::write(dir.path().join("factors.txt"), "sentinel\n").unwrap();

    let sd = run_range(dir.path(), A, C);
    assert_eq!(sd.p, C);
    assert_eq!(sd.primecount, 28);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("factors.txt")).unwrap(),
        "sentinel\n"
    );
}

#[test]
fn stop_request_defers_to_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let host = StandaloneHost::new(dir.path());
    host.request_stop();

    let mut sd = SearchState::new(A, C, 1, 1, 65, 100, false);
    engine::run(&mut sd, &host).unwrap();

    // no batch was drained, no digest written
    assert_eq!(sd.factorcount, 0);
    assert_eq!(std::fs::read_to_string(dir.path().join("factors.txt")).unwrap(), "");
}

#[test]
fn checkpoint_files_written_at_completion() {
    let dir = tempfile::tempdir().unwrap();
    let sd = run_range(dir.path(), A, C);

    let state = std::fs::read_to_string(dir.path().join("PCWstateA.txt")).unwrap();
    let fields: Vec<u64> = state
        .split_whitespace()
        .map(|f| f.parse().unwrap())
        .collect();
    assert_eq!(fields[0], sd.workunit);
    assert_eq!(fields[1], C);
    assert_eq!(fields[2], sd.primecount);
    assert_eq!(fields[3], sd.checksum);
    assert_eq!(fields[4], sd.factorcount);
}
