//! # Checkpoint — Two-File Alternating State Store
//!
//! Run state is persisted as a single space-separated line,
//!
//! ```text
//! workunit p primecount checksum factorcount last_trickle
//! ```
//!
//! written alternately to `PCWstateA.txt` and `PCWstateB.txt`. Alternation
//! means a crash mid-write can corrupt at most the newer file; recovery
//! parses both, discards any whose workunit identifier does not match the
//! current parameters, and restores the survivor with the larger `p`. The
//! next write then goes to the file that was *not* chosen, preserving the
//! invariant that the older checkpoint is never overwritten by a write that
//! might fail.
//!
//! A failed state write is logged and tolerated; the previous checkpoint
//! pair still covers recovery.

use std::fs;
use std::path::Path;

use crate::engine::SearchState;
use crate::host::HostClient;

pub const STATE_FILENAME_A: &str = "PCWstateA.txt";
pub const STATE_FILENAME_B: &str = "PCWstateB.txt";

fn parse_state_file(path: &Path) -> Option<[u64; 6]> {
    let raw = fs::read_to_string(path).ok()?;
    let mut fields = raw.split_whitespace();
    let mut vals = [0u64; 6];
    for v in vals.iter_mut() {
        *v = fields.next()?.parse().ok()?;
    }
    Some(vals)
}

/// Write the current state to the file indicated by the alternation bit;
/// flip the bit only after a successful write.
pub fn write_state(sd: &mut SearchState, host: &dyn HostClient) {
    let name = if sd.write_state_a_next {
        STATE_FILENAME_A
    } else {
        STATE_FILENAME_B
    };
    let path = host.resolve_filename(name);
    let line = format!(
        "{} {} {} {} {} {}\n",
        sd.workunit, sd.p, sd.primecount, sd.checksum, sd.factorcount, sd.last_trickle
    );
    match fs::write(&path, line) {
        Ok(()) => sd.write_state_a_next = !sd.write_state_a_next,
        Err(e) => tracing::warn!("cannot write {}: {}; continuing", path.display(), e),
    }
}

/// Restore the most recent valid checkpoint. Returns false when neither
/// state file matches the current workunit.
pub fn read_state(sd: &mut SearchState, host: &dyn HostClient) -> bool {
    let a = parse_state_file(&host.resolve_filename(STATE_FILENAME_A))
        .filter(|v| v[0] == sd.workunit);
    let b = parse_state_file(&host.resolve_filename(STATE_FILENAME_B))
        .filter(|v| v[0] == sd.workunit);

    let (chosen, from_a) = match (a, b) {
        (Some(a), Some(b)) => {
            if a[1] > b[1] {
                (a, true)
            } else {
                (b, false)
            }
        }
        (Some(a), None) => (a, true),
        (None, Some(b)) => (b, false),
        (None, None) => return false,
    };

    sd.p = chosen[1];
    sd.primecount = chosen[2];
    sd.checksum = chosen[3];
    sd.factorcount = chosen[4];
    sd.last_trickle = chosen[5];
    sd.write_state_a_next = !from_a;
    true
}
