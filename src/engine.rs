//! # Engine — Search Orchestration
//!
//! Owns the whole life of a workunit: parameter derivation, substrate
//! profiling, the batch loop over the prime range, result drains with CPU
//! verification, checkpoints, and the terminating checksum line.
//!
//! ## Batch anatomy
//!
//! The prime range `[pmin, pmax)` is consumed in `range`-wide batches. For
//! each batch the engine enqueues, in order: clear the batch counter,
//! generate the batch's primes, derive per-prime Montgomery state, run the
//! sieve over the whole `n` range in `kernel_nstep` strides, and run the
//! terminal-residue check. The host then waits on the generation event
//! before starting the next batch, which bounds queue depth and gives the
//! controlling client its suspension window.
//!
//! ## Derived constants
//!
//! `setup_search` derives the scan stride `nstep` (largest stride whose
//! residue window stays unreduced: `kmax·2^nstep < pmin`, with
//! `2^(64-nstep) ≤ pmin` so one reduction covers the advance), the seeded
//! starting residues `r0`/`r1` for `2^-nmin` and `2^-lastN`, and the
//! workunit identifier used to match checkpoints.
//!
//! ## Checksum
//!
//! The running 64-bit checksum absorbs, per drain, the per-group sums of
//! terminal residues, and per accepted factor `k + n ± 1` (sign matching
//! `c`). It is additive over disjoint prime ranges, which is what the
//! project's replica validation relies on — the contributions must never
//! change.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::arith::{lg2, StepKind};
use crate::checkpoint;
use crate::device::{self, DeviceBuffers, Queue, GROUP_SIZE, NUM_RESULTS};
use crate::host::{now_epoch, HostClient};
use crate::kernels::{self, SetupParams, SieveParams};
use crate::primes::{estimate_count, SmallPrimes};
use crate::segprimes::generate_segment;
use crate::verify::{try_all_factors, verify_factor};

pub const RESULTS_FILENAME: &str = "factors.txt";

/// Default residue class for reported k: odd. The `twin-kstep` feature
/// selects the twin-search class k ≡ 3 (mod 6) instead.
#[cfg(not(feature = "twin-kstep"))]
pub const KSTEP: u32 = 2;
#[cfg(not(feature = "twin-kstep"))]
pub const KOFFSET: u32 = 1;
#[cfg(feature = "twin-kstep")]
pub const KSTEP: u32 = 6;
#[cfg(feature = "twin-kstep")]
pub const KOFFSET: u32 = 3;

/// Full state of one search: immutable parameters, derived sieve
/// constants, and the running counters the checkpoint persists.
pub struct SearchState {
    // parameters
    pub pmin: u64,
    pub pmax: u64,
    pub kmin: u32,
    pub kmax: u32,
    pub nmin: u32,
    pub nmax: u32,
    pub cw: bool,
    pub test: bool,
    pub kstep: u32,
    pub koffset: u32,
    /// Compute-class substrate: longer kernels, larger profile targets.
    pub compute: bool,

    // derived by setup_search
    pub nstep: u32,
    pub mont_nstep: u32,
    pub bbits: u32,
    pub r0: u64,
    pub bbits1: u32,
    pub r1: u64,
    pub last_n: u32,
    pub kernel_nstep: u32,
    pub workunit: u64,

    // running state
    pub p: u64,
    pub primecount: u64,
    pub checksum: u64,
    pub factorcount: u64,
    pub last_trickle: u64,
    pub write_state_a_next: bool,
}

impl SearchState {
    pub fn new(pmin: u64, pmax: u64, kmin: u32, kmax: u32, nmin: u32, nmax: u32, cw: bool) -> Self {
        SearchState {
            pmin,
            pmax,
            kmin,
            kmax,
            nmin,
            nmax,
            cw,
            test: false,
            kstep: KSTEP,
            koffset: KOFFSET,
            compute: true,
            nstep: 0,
            mont_nstep: 0,
            bbits: 0,
            r0: 0,
            bbits1: 0,
            r1: 0,
            last_n: 0,
            kernel_nstep: 0,
            workunit: 0,
            p: 0,
            primecount: 0,
            checksum: 0,
            factorcount: 0,
            last_trickle: 0,
            write_state_a_next: true,
        }
    }

    /// Validate parameters and derive the sieve constants. Bounds in
    /// comments refer to the internal (post-decrement) `nmin`.
    pub fn setup_search(&mut self) -> Result<()> {
        self.p = self.pmin;

        if self.pmin == 0 || self.pmax == 0 {
            bail!("-p and -P arguments are required");
        }
        if self.nmin == 0 || self.nmax == 0 {
            bail!("-n and -N arguments are required");
        }
        if self.nmin > self.nmax {
            bail!("nmin <= nmax is required");
        }

        if self.cw {
            if self.nmax as u64 >= self.pmin {
                bail!("nmax < pmin is required");
            }
            self.kmax = self.nmax;
            self.kmin = self.nmin;
        } else {
            if self.kmax == 0 {
                bail!("-K argument is required");
            }
            if self.kmin > self.kmax {
                bail!("kmin <= kmax is required");
            }
            if self.kmax as u64 >= self.pmin {
                bail!("kmax < pmin is required");
            }
            // snap both ends onto the k residue lattice
            self.kmin = (self.kmin / self.kstep) * self.kstep + self.koffset;
            self.kmax = (self.kmax / self.kstep) * self.kstep + self.koffset;
        }

        let mut nstep = 1u32;
        while ((self.kmax as u128) << nstep) < self.pmin as u128 {
            nstep += 1;
        }

        if (1u128 << (64 - nstep)) > self.pmin as u128 {
            // compute the next pmin at which the advance fits one reduction
            let pmin_1 = 1u64 << (64 - nstep);
            let mut sug = self.kmax as u64 + 1;
            let mut s = 1u32;
            while ((self.kmax as u128) << s) < sug as u128 {
                s += 1;
            }
            while (1u128 << (64 - s)) > sug as u128 {
                sug = sug.saturating_mul(2);
                s += 1;
            }
            let sug = sug.min(pmin_1);
            bail!(
                "pmin is not large enough (or nmax is close to nmin); \
                 this program will work by the time pmin == {}",
                sug
            );
        }

        let span = self.nmax - self.nmin + 1;
        if nstep > span {
            nstep = span;
        }
        // back off one position so adjacent windows overlap on both signs
        nstep -= 1;
        if nstep == 0 {
            nstep = 1;
        }
        if nstep >= 32 && (1u64 << 32) <= self.pmin {
            nstep = 32;
        }
        self.nstep = nstep;
        self.mont_nstep = 64 - nstep;
        self.kernel_nstep = nstep * if self.compute { 15_000 } else { 3_000 };

        self.nmin -= 1;

        let bbits = lg2(self.nmin as u64);
        if bbits < 6 {
            bail!("nmin too small at {} (must be at least 65)", self.nmin + 1);
        }
        self.r0 = 1u64 << (64 - (self.nmin >> (bbits - 5)));
        self.bbits = bbits - 6;

        let mut maxn = ((self.nmax - self.nmin) / nstep) * nstep + self.nmin;
        if maxn < self.nmax {
            maxn += nstep;
        }
        let bbits1 = lg2(maxn as u64) - 5;
        self.r1 = 1u64 << (64 - (maxn >> bbits1));
        self.bbits1 = bbits1 - 1;
        self.last_n = maxn;

        self.workunit = self.pmin
            + self.pmax
            + self.nmin as u64
            + self.nmax as u64
            + self.kmin as u64
            + self.kmax as u64;

        Ok(())
    }
}

/// Pick the batch width: start from the core count, cap at the substrate's
/// global-size limit and the workunit width, then rescale against a 10 ms
/// generator target measured on a representative interval. `psize` bounds
/// any batch's prime count with a 1.5× margin over the density estimate.
fn profile_substrate(sd: &SearchState) -> (u64, u32) {
    let computeunits = rayon::current_num_threads().max(1) as u64;
    let mut calc_range = (computeunits * 750_000).min(4_294_900_000);
    calc_range = calc_range.min((sd.pmax - sd.p).max(60));

    let prof_start = sd.p.max(100_000_000);
    let t0 = Instant::now();
    let found = generate_segment(prof_start, prof_start + calc_range);
    let kernel_ms = (t0.elapsed().as_secs_f64() * 1000.0).max(0.01);

    let multi = 10.0 / kernel_ms;
    calc_range = ((calc_range as f64 * multi) as u64).clamp(60, 4_294_900_000);
    tracing::debug!(
        kernel_ms,
        range = calc_range,
        profiled_primes = found.len(),
        "generator profile"
    );

    let est = estimate_count(prof_start, prof_start + calc_range);
    let psize = ((est as f64 * 1.5) as u64 + 256).min(u32::MAX as u64) as u32;
    (calc_range, psize)
}

fn truncate_results(host: &dyn HostClient) -> Result<()> {
    let path = host.resolve_filename(RESULTS_FILENAME);
    std::fs::write(&path, "").with_context(|| format!("cannot open {}", path.display()))
}

/// Append verified results. Failure here is fatal: the results file is the
/// workunit's product.
fn report_solution(host: &dyn HostClient, text: &str) -> Result<()> {
    let path = host.resolve_filename(RESULTS_FILENAME);
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    f.write_all(text.as_bytes())
        .with_context(|| format!("cannot write to {}", path.display()))?;
    Ok(())
}

/// Daily trickle-up to the controlling client, embedding progress and time
/// accounting. Suppressed standalone.
fn handle_trickle_up(sd: &mut SearchState, host: &dyn HostClient) {
    if host.is_standalone() {
        return;
    }
    let now = now_epoch();
    if now.saturating_sub(sd.last_trickle) > 86_400 {
        sd.last_trickle = now;
        let progress = (sd.p - sd.pmin) as f64 / (sd.pmax - sd.pmin).max(1) as f64;
        let msg = format!(
            "<trickle_up>\n   <progress>{:.6}</progress>\n   <cputime>{:.6}</cputime>\n   <runtime>{:.6}</runtime>\n</trickle_up>\n",
            progress,
            host.cpu_time(),
            host.elapsed_time()
        );
        host.send_trickle_up("cwsieve_progress", &msg);
    }
}

fn do_checkpoint(sd: &mut SearchState, host: &dyn HostClient) {
    handle_trickle_up(sd, host);
    checkpoint::write_state(sd, host);
    if host.is_standalone() {
        println!("Checkpoint, current p: {}", sd.p);
    }
    host.checkpoint_completed();
}

/// Drain the device-side results: fold checksums and the prime total into
/// the running state, enforce the integrity checks, then verify and report
/// every factor candidate.
fn get_results(
    sd: &mut SearchState,
    buf: &DeviceBuffers,
    table: &SmallPrimes,
    host: &dyn HostClient,
) -> Result<()> {
    use std::sync::atomic::Ordering;

    {
        let checksum = buf.checksum.lock().unwrap();
        sd.primecount += checksum[0];
        for g in &checksum[1..] {
            sd.checksum = sd.checksum.wrapping_add(*g);
        }
    }

    if buf.flag.load(Ordering::Acquire) > 0 {
        bail!("terminal residue checksum failure in the sieve substrate");
    }
    let maxcount = buf.primecount[1].load(Ordering::Acquire);
    if maxcount > buf.psize {
        bail!("prime array overflow ({} > {})", maxcount, buf.psize);
    }
    let fcount = buf.factor_count.load(Ordering::Acquire);
    if fcount > NUM_RESULTS {
        bail!("number of results ({}) overflowed the array", fcount);
    }
    if fcount == 0 {
        return Ok(());
    }

    let mut factors: Vec<(i64, u64)> = (0..fcount as usize)
        .map(|i| {
            (
                buf.factor_p[i].load(Ordering::Relaxed),
                buf.factor_kn[i].load(Ordering::Relaxed),
            )
        })
        .collect();
    factors.sort_unstable_by_key(|&(p, _)| p.unsigned_abs());

    let mut out = String::new();
    for (sp, kn) in factors {
        let p = sp.unsigned_abs();
        let k = kn as u32;
        let n = (kn >> 32) as u32;
        let c: i32 = if sp < 0 { -1 } else { 1 };

        if !sd.cw {
            // only the configured k residue class is reportable
            let b = k / sd.kstep;
            if k != sd.kstep * b + sd.koffset {
                continue;
            }
        }
        if try_all_factors(k as u64, n, c, table) != 0 {
            // the target has a trivially small divisor
            continue;
        }
        if !verify_factor(p, k as u64, n, c) {
            bail!(
                "sieve substrate produced an invalid factor: {} | {}*2^{}{:+}",
                p,
                k,
                n,
                c
            );
        }

        sd.factorcount += 1;
        out.push_str(&format!("{} | {}*2^{}{:+}\n", p, k, n, c));
        sd.checksum = sd
            .checksum
            .wrapping_add(k as u64)
            .wrapping_add(n as u64);
        sd.checksum = if c == 1 {
            sd.checksum.wrapping_add(1)
        } else {
            sd.checksum.wrapping_sub(1)
        };
    }

    if !out.is_empty() {
        report_solution(host, &out)?;
    }
    Ok(())
}

/// Run one workunit to completion (or until the client requests a stop).
pub fn run(sd: &mut SearchState, host: &dyn HostClient) -> Result<()> {
    let table = SmallPrimes::new();
    sd.setup_search()?;

    tracing::info!(
        "Starting sieve at p: {} n: {} k: {}",
        sd.pmin,
        sd.nmin + 1,
        sd.kmin
    );
    tracing::info!(
        "Stopping sieve at P: {} N: {} K: {}",
        sd.pmax,
        sd.nmax,
        sd.kmax
    );
    if host.is_standalone() {
        println!(
            "Starting sieve at p: {} n: {} k: {}",
            sd.pmin,
            sd.nmin + 1,
            sd.kmin
        );
        println!(
            "Stopping sieve at P: {} N: {} K: {}",
            sd.pmax, sd.nmax, sd.kmax
        );
    }

    if sd.test {
        truncate_results(host)?;
    } else if checkpoint::read_state(sd, host) {
        tracing::info!("Resuming search from checkpoint. Current p: {}", sd.p);
        if host.is_standalone() {
            println!("Resuming search from checkpoint. Current p: {}", sd.p);
        }
        if sd.p == sd.pmax {
            tracing::info!("Workunit complete.");
            if host.is_standalone() {
                println!("Workunit complete.");
            }
            return Ok(());
        }
    } else {
        truncate_results(host)?;
        sd.last_trickle = now_epoch();
    }

    let (range, psize) = profile_substrate(sd);
    let numgroups = psize / GROUP_SIZE as u32 + 2;
    let buffers = Arc::new(DeviceBuffers::new(psize, numgroups));
    let queue = Queue::new();

    tracing::info!(nstep = sd.nstep, range, psize, "Starting search...");
    if host.is_standalone() {
        println!("Starting search...");
        println!("nstep: {}", sd.nstep);
    }

    let setup_prm = SetupParams {
        r0: sd.r0,
        bbits: sd.bbits,
        nmin: sd.nmin,
        r1: sd.r1,
        bbits1: sd.bbits1,
        last_n: sd.last_n,
    };
    let mut sieve_prm = SieveParams {
        nstart: sd.nmin,
        nstep: sd.nstep,
        kernel_nstep: sd.kernel_nstep,
        mont_nstep: sd.mont_nstep,
        nmin: sd.nmin,
        nmax: sd.nmax,
        kmin: sd.kmin,
        kmax: sd.kmax,
        kstep: sd.kstep,
        koffset: sd.koffset,
        kind: StepKind::for_nstep(sd.nstep),
        cw: sd.cw,
    };

    {
        let b = Arc::clone(&buffers);
        queue.enqueue(move || kernels::clear_results(&b));
    }

    let mut profile_pending = true;
    let mut progress_last = Instant::now();
    let mut ckpt_last = Instant::now();
    let run_start = Instant::now();

    while sd.p < sd.pmax {
        if host.is_stop_requested() {
            device::sleep_cpu(host, &queue);
            tracing::info!("stop requested; recovery will use the last checkpoint");
            return Ok(());
        }

        {
            let b = Arc::clone(&buffers);
            queue.enqueue(move || kernels::clear_counts(&b));
        }

        let stop = (sd.p + range).min(sd.pmax);

        if progress_last.elapsed().as_secs() >= 1 {
            let fd = (sd.p - sd.pmin) as f64 / (sd.pmax - sd.pmin) as f64;
            host.fraction_done(fd);
            if host.is_standalone() {
                println!("Tests done: {:.1}%", fd * 100.0);
            }
            progress_last = Instant::now();
        }

        if ckpt_last.elapsed().as_secs() > 60 {
            device::sleep_cpu(host, &queue);
            host.begin_critical_section();
            get_results(sd, &buffers, &table, host)?;
            do_checkpoint(sd, host);
            host.end_critical_section();
            ckpt_last = Instant::now();
            let b = Arc::clone(&buffers);
            queue.enqueue(move || kernels::clear_results(&b));
        }

        let gen_event = {
            let b = Arc::clone(&buffers);
            let (start, end) = (sd.p, stop);
            queue.enqueue(move || kernels::getsegprimes(&b, start, end))
        };
        {
            let b = Arc::clone(&buffers);
            let prm = setup_prm;
            queue.enqueue(move || kernels::setup(&b, &prm));
        }

        let mut nstart = sd.nmin;

        if profile_pending {
            // time one sieve invocation, then rescale the stride count to
            // the target kernel runtime (rounded to a multiple of nstep)
            device::sleep_cpu(host, &queue);
            sieve_prm.nstart = nstart;
            let t0 = Instant::now();
            let ev = {
                let b = Arc::clone(&buffers);
                let prm = sieve_prm;
                queue.enqueue(move || kernels::sieve(&b, &prm))
            };
            device::wait_on_event(host, &ev);
            let kernel_ms = (t0.elapsed().as_secs_f64() * 1000.0).max(0.01);
            nstart += sd.kernel_nstep;

            let target = if sd.compute { 50.0 } else { 10.0 };
            let scaled = ((sd.kernel_nstep as f64 * (target / kernel_ms)) as u64)
                .min(1 << 30) as u32;
            let new_knstep = ((scaled / sd.nstep) * sd.nstep).max(sd.nstep);
            tracing::debug!(kernel_ms, old = sd.kernel_nstep, new = new_knstep, "sieve profile");
            sd.kernel_nstep = new_knstep;
            sieve_prm.kernel_nstep = new_knstep;
            profile_pending = false;
        }

        while nstart <= sd.nmax {
            sieve_prm.nstart = nstart;
            let b = Arc::clone(&buffers);
            let prm = sieve_prm;
            queue.enqueue(move || kernels::sieve(&b, &prm));
            nstart += sd.kernel_nstep;
        }

        {
            let b = Arc::clone(&buffers);
            queue.enqueue(move || kernels::check(&b));
        }

        // bound the queue depth and sleep the host while the batch runs
        device::wait_on_event(host, &gen_event);

        sd.p += range;
    }

    // final drain and digest
    device::sleep_cpu(host, &queue);
    host.begin_critical_section();
    sd.p = sd.pmax;
    host.fraction_done(1.0);
    if host.is_standalone() {
        println!("Tests done: 100.0%");
    }
    get_results(sd, &buffers, &table, host)?;
    do_checkpoint(sd, host);

    let digest = if sd.factorcount == 0 {
        format!("no factors\n{:016X}\n", sd.checksum)
    } else {
        format!("{:016X}\n", sd.checksum)
    };
    report_solution(host, &digest)?;
    host.end_critical_section();

    tracing::info!(
        "Search complete. factors {}, prime count {}",
        sd.factorcount,
        sd.primecount
    );
    if host.is_standalone() {
        println!("Search finished in {} sec.", run_start.elapsed().as_secs());
        println!(
            "factors {}, prime count {}, checksum {:016X}",
            sd.factorcount, sd.primecount, sd.checksum
        );
    }

    Ok(())
}
