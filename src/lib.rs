//! # PCWSieve — Factor Sieve for Proth/Riesel and Cullen/Woodall Numbers
//!
//! A distributed-computing worker that hunts prime divisors `p` of
//! `k·2^n ± 1` (Proth/Riesel) and, in a second mode, of `n·2^n ± 1`
//! (Cullen/Woodall). For every prime in `[pmin, pmax)` the engine walks the
//! exponent range with a Montgomery-form giant-step scan, decodes factor
//! candidates from the residue windows, re-verifies each candidate on the
//! CPU, and folds everything into a replica-comparable 64-bit checksum.
//!
//! ## Module Organization
//!
//! **Arithmetic core**:
//! - [`arith`] — Hensel inverses, REDC, the left-to-right `2^-e mod p`
//!   power, the stride advance, and [`arith::MontgomeryCtx`]
//! - [`primes`] — wheel-30 generation, deterministic u64 primality, the
//!   fixed small-prime trial table
//! - [`segprimes`] — segmented prime generation over the search interval
//! - [`verify`] — independent CPU validation of emitted factors
//!
//! **Engine**:
//! - [`device`] — buffers, in-order task queue, polled completion
//! - [`kernels`] — the setup / sieve / check compute tasks
//! - [`engine`] — orchestration, result drains, the results file
//! - [`checkpoint`] — two-file alternating state store
//! - [`selftest`] — known-answer ranges
//!
//! **Edges**:
//! - [`host`] — the distributed-computing client seam ([`host::HostClient`])
//! - [`parse`] — suffixed numeric argument parsing
//!
//! ## Pipeline
//!
//! Every batch follows the same shape: **generate primes → derive
//! Montgomery state → scan exponents → cross-check terminal residues →
//! drain, verify, checkpoint**. All device-side work is dispatched through
//! one in-order queue; the host sleeps in polled waits inside critical
//! sections so the controlling client can only suspend the worker between
//! tasks.

pub mod arith;
pub mod checkpoint;
pub mod device;
pub mod engine;
pub mod host;
pub mod kernels;
pub mod parse;
pub mod primes;
pub mod segprimes;
pub mod selftest;
pub mod verify;
