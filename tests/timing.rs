// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Single-thread end-to-end scenarios built around an instrumented
//! Fibonacci workload: every call above the threshold brackets itself
//! with a timer, so the node count of the resulting call graph is fully
//! determined by the sequence of measured calls.

use std::fs;
use std::sync::{Mutex, MutexGuard};

// Enabling, depth clamping, and clearing are process-global, so the
// scenarios take turns.
static SERIAL: Mutex<()> = Mutex::new(());

fn setup() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    calltrace::clear();
    calltrace::enable(true);
    calltrace::set_max_depth(usize::MAX);
    guard
}

const MEASURE_ABOVE: u64 = 36;

fn fib(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    if n > MEASURE_ABOVE {
        let _guard = calltrace::timer("fibonacci");
        fib(n - 1) + fib(n - 2)
    } else {
        fib_iterative(n)
    }
}

fn fib_iterative(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

fn time_fib(n: u64) -> u64 {
    let _guard = calltrace::timer(&format!("time_fib({})", n));
    fib(n)
}

#[test]
fn repeated_measured_fib_calls_build_31_nodes() {
    let _serial = setup();
    {
        let _total = calltrace::timer("timing_manager_test");
        for n in [37u64, 39, 41, 43, 45, 41, 37, 45] {
            time_fib(n);
        }
    }
    // one node per distinct time_fib label, each over a chain of
    // "fibonacci" nodes as deep as the recursion stays measured, plus
    // the enclosing timer; repeats reuse their nodes
    assert_eq!(calltrace::node_count(), 31);
}

#[test]
fn enabled_single_fib_builds_11_nodes() {
    let _serial = setup();
    {
        let _toggle = calltrace::timer("@toggle_on");
        time_fib(45);
    }
    assert_eq!(calltrace::node_count(), 11);
}

#[test]
fn disabled_instrumentation_builds_nothing() {
    let _serial = setup();
    calltrace::enable(false);
    {
        let _toggle = calltrace::timer("@toggle_off");
        time_fib(45);
    }
    assert_eq!(calltrace::node_count(), 0);
    calltrace::enable(true);
}

#[test]
fn disabling_mid_flight_stops_recording() {
    let _serial = setup();
    {
        let _toggle = calltrace::timer("@toggle_on");
        time_fib(45);
        calltrace::enable(false);
        let _off = calltrace::timer("@toggle_off");
        time_fib(43);
    }
    assert_eq!(calltrace::node_count(), 11);
    calltrace::enable(true);
}

#[test]
fn depth_clamp_keeps_seven_nodes() {
    let _serial = setup();
    calltrace::set_max_depth(3);
    {
        let _scope = calltrace::timer("depth_test");
        for n in [40u64, 41, 42] {
            time_fib(n);
        }
    }
    assert_eq!(calltrace::node_count(), 7);
    calltrace::set_max_depth(usize::MAX);
}

#[test]
fn depth_zero_disables_storage() {
    let _serial = setup();
    calltrace::set_max_depth(0);
    {
        let _scope = calltrace::timer("depth_zero");
        time_fib(40);
    }
    assert_eq!(calltrace::node_count(), 0);
    calltrace::set_max_depth(usize::MAX);
}

#[test]
fn nested_handles_with_the_same_label_accumulate_or_chain() {
    let _serial = setup();
    {
        // re-entry after closing reuses the node
        for _ in 0..2 {
            let _outer = calltrace::timer("reentrant");
        }
        // recursion while still open chains a child
        let _outer = calltrace::timer("reentrant");
        let _inner = calltrace::timer("reentrant");
    }
    assert_eq!(calltrace::node_count(), 2);
}

#[test]
fn json_round_trip_preserves_depth_label_laps() {
    let _serial = setup();
    {
        let _alpha = calltrace::timer("alpha");
        for _ in 0..2 {
            let _beta = calltrace::timer("beta");
        }
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.tree.json");
    assert!(calltrace::write_json(&path));

    let content = fs::read_to_string(&path).unwrap();
    let parsed: calltrace::JsonReport = serde_json::from_str(&content).unwrap();
    let rank = &parsed.ranks[0];
    let alpha = rank
        .graph
        .iter()
        .find(|node| node.label == "alpha")
        .expect("alpha node present");
    assert_eq!(alpha.depth, 1);
    assert_eq!(alpha.laps, 1);
    assert!(alpha.accum >= 0.0);
    let beta = &alpha.children[0];
    assert_eq!(beta.label, "beta");
    assert_eq!(beta.depth, 2);
    assert_eq!(beta.laps, 2);
}

#[test]
fn finalize_twice_produces_identical_reports() {
    let _serial = setup();
    let dir = tempfile::tempdir().unwrap();
    let settings = calltrace::Settings::instance();
    let previous = settings.output_path();
    settings.set_output_path(dir.path().to_str().unwrap());

    {
        let _scope = calltrace::timer("finalize_idempotence");
        time_fib(38);
    }
    assert!(calltrace::finalize());
    let first = read_reports(dir.path());
    assert!(!first.is_empty());

    assert!(calltrace::finalize());
    let second = read_reports(dir.path());
    assert_eq!(first, second);

    settings.set_output_path(&previous);
}

#[test]
fn finalize_closes_open_scopes_in_stack_clearing_mode() {
    let _serial = setup();
    let dir = tempfile::tempdir().unwrap();
    let settings = calltrace::Settings::instance();
    let previous = settings.output_path();
    settings.set_output_path(dir.path().to_str().unwrap());

    let guard = calltrace::timer("left_open");
    assert!(calltrace::finalize());
    assert_eq!(calltrace::merged_node_count(), 1);
    // the original handle is stale now; dropping it changes nothing
    drop(guard);
    assert_eq!(calltrace::merged_node_count(), 1);

    settings.set_output_path(&previous);
}

#[test]
fn auto_timer_labels_with_the_function_name() {
    let _serial = setup();

    fn region_under_test() {
        let _guard = calltrace::auto_timer!();
    }
    region_under_test();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auto.tree.json");
    assert!(calltrace::write_json(&path));
    let parsed: calltrace::JsonReport =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(parsed.ranks[0]
        .graph
        .iter()
        .any(|node| node.label.ends_with("region_under_test")));
}

/// Sorted (name, bytes) pairs of every report file in `dir`.
fn read_reports(dir: &std::path::Path) -> Vec<(String, Vec<u8>)> {
    let mut reports: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    reports.sort();
    reports
}
