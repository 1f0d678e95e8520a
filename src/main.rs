//! # Main — CLI Entry Point
//!
//! Parses the traditional sieve flag set (`-p/-P` prime range, `-k/-K`
//! multiplier range, `-n/-N` exponent range, `-c` Cullen/Woodall mode,
//! `-s` self-test) with magnitude-suffixed numbers, configures logging and
//! the thread pool, and hands off to the engine. Parameter validation
//! beyond raw ranges lives in `engine::setup_search`, which reports the
//! same operator-facing messages whether arguments came from the command
//! line or a job description.

use anyhow::Result;
use clap::Parser;

use pcwsieve::engine::{self, SearchState};
use pcwsieve::host::StandaloneHost;
use pcwsieve::parse;
use pcwsieve::selftest;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn parse_pmin(s: &str) -> Result<u64, String> {
    parse::parse_u64(s, 3, (1u64 << 62) - 1).map_err(|e| e.to_string())
}

fn parse_pmax(s: &str) -> Result<u64, String> {
    parse::parse_u64(s, 4, (1u64 << 62) - 1).map_err(|e| e.to_string())
}

fn parse_k(s: &str) -> Result<u32, String> {
    parse::parse_u32(s, 1, (1u32 << 31) - 1).map_err(|e| e.to_string())
}

fn parse_n(s: &str) -> Result<u32, String> {
    parse::parse_u32(s, 65, (1u32 << 31) - 1).map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(
    name = "pcwsieve",
    about = "Sieve for prime divisors of k*2^n+/-1 (Proth/Riesel) and n*2^n+/-1 (Cullen/Woodall)",
    version
)]
struct Cli {
    /// Sieve primes pmin <= p < pmax < 2^62
    #[arg(short = 'p', value_name = "pmin", value_parser = parse_pmin)]
    pmin: Option<u64>,

    /// Upper end of the prime range
    #[arg(short = 'P', value_name = "pmax", value_parser = parse_pmax)]
    pmax: Option<u64>,

    /// Sieve for k*2^n+/-1 with kmin <= k <= kmax < 2^31
    #[arg(short = 'k', value_name = "kmin", value_parser = parse_k)]
    kmin: Option<u32>,

    /// Upper end of the k range (required unless -c)
    #[arg(short = 'K', value_name = "kmax", value_parser = parse_k)]
    kmax: Option<u32>,

    /// Sieve for 65 <= nmin <= n <= nmax < 2^31
    #[arg(short = 'n', value_name = "nmin", value_parser = parse_n)]
    nmin: Option<u32>,

    /// Upper end of the n range
    #[arg(short = 'N', value_name = "nmax", value_parser = parse_n)]
    nmax: Option<u32>,

    /// Search for Cullen/Woodall factors
    #[arg(short = 'c')]
    cw: bool,

    /// Perform a self test to verify proper operation of the program
    #[arg(short = 's', long = "test")]
    test: bool,

    /// Device selection (accepted for compatibility, ignored)
    #[arg(short = 'd', long = "device", value_name = "id")]
    device: Option<String>,

    /// Worker threads (defaults to all logical cores)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    // LOG_FORMAT=json for fleet log collectors, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    tracing::info!(
        "pcwsieve {} starting, {} worker threads",
        env!("CARGO_PKG_VERSION"),
        rayon::current_num_threads()
    );
    if let Some(id) = &cli.device {
        tracing::debug!(device = %id, "device argument accepted and ignored");
    }

    let host = StandaloneHost::new(".");

    if cli.test {
        println!("Performing self test.");
        tracing::info!("Performing self test.");
        selftest::run_test(&host)?;
        return Ok(());
    }

    if cli.cw {
        println!("Searching for Cullen/Woodall factors.");
        tracing::info!("Searching for Cullen/Woodall factors.");
    }

    let mut sd = SearchState::new(
        cli.pmin.unwrap_or(0),
        cli.pmax.unwrap_or(0),
        cli.kmin.unwrap_or(0),
        cli.kmax.unwrap_or(0),
        cli.nmin.unwrap_or(0),
        cli.nmax.unwrap_or(0),
        cli.cw,
    );
    engine::run(&mut sd, &host)
}
