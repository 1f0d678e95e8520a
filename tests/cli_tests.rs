//! CLI integration tests for the `pcwsieve` binary.
//!
//! These spawn the compiled binary with `assert_cmd` and assert on exit
//! status and output. Argument-validation tests are pure parser checks;
//! the end-to-end test runs a real (narrow) workunit inside a temp
//! directory and inspects the files it leaves behind.

use assert_cmd::Command;
use predicates::prelude::*;

fn pcwsieve() -> Command {
    Command::cargo_bin("pcwsieve").unwrap()
}

#[test]
fn help_documents_the_flag_set() {
    pcwsieve().arg("-h").assert().success().stdout(
        predicate::str::contains("pmin")
            .and(predicate::str::contains("pmax"))
            .and(predicate::str::contains("kmin"))
            .and(predicate::str::contains("nmin"))
            .and(predicate::str::contains("Cullen/Woodall"))
            .and(predicate::str::contains("self test")),
    );
}

#[test]
fn missing_required_arguments_fail() {
    pcwsieve()
        .assert()
        .failure()
        .stderr(predicate::str::contains("-p and -P arguments are required"));
}

#[test]
fn missing_k_range_fails_in_proth_riesel_mode() {
    pcwsieve()
        .args(["-p", "761838257000", "-P", "761838258000", "-n", "65", "-N", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("-K argument is required"));
}

#[test]
fn out_of_range_argument_fails() {
    pcwsieve()
        .args(["-p", "2", "-P", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn unparsable_argument_fails() {
    pcwsieve()
        .args(["-p", "12Q", "-P", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse"));
}

#[test]
fn nmin_below_floor_is_rejected() {
    pcwsieve()
        .args(["-p", "1G", "-P", "2G", "-k", "1", "-K", "9", "-n", "64", "-N", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn infeasible_pmin_suggests_a_workable_one() {
    pcwsieve()
        .args(["-p", "1M", "-P", "2M", "-k", "1", "-K", "9999", "-n", "65", "-N", "1000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pmin is not large enough"));
}

#[test]
fn narrow_workunit_end_to_end_with_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    pcwsieve()
        .current_dir(dir.path())
        .args([
            "-p", "761838257e3",
            "-P", "761838258e3",
            "-k", "1",
            "-K", "1",
            "-n", "65",
            "-N", "1e2",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Starting sieve at p: 761838257000 n: 65 k: 1")
                .and(predicate::str::contains("factors 1, prime count")),
        );

    let results = std::fs::read_to_string(dir.path().join("factors.txt")).unwrap();
    assert!(results.contains("761838257287 | 1*2^67-1\n"), "{}", results);

    // both the digest and a matching checkpoint are left behind
    let last = results.lines().last().unwrap();
    assert_eq!(last.len(), 16);
    assert!(dir.path().join("PCWstateA.txt").exists());
}

#[test]
fn cw_mode_announces_itself() {
    pcwsieve()
        .args(["-c"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Searching for Cullen/Woodall factors."));
}
