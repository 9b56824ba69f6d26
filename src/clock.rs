// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Raw measurement sources: monotonic wall clock, per-thread CPU clock,
//! peak resident set size, and OS thread ids. All readings are `f64`
//! seconds (or bytes) so component arithmetic stays unit-agnostic.

use std::time::Instant;

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Pin the process epoch so wall readings are anchored near program start.
pub(crate) fn touch_epoch() {
    Lazy::force(&EPOCH);
}

pub(crate) fn wall_now() -> f64 {
    EPOCH.elapsed().as_secs_f64()
}

#[cfg(unix)]
fn clock_seconds(clock: libc::clockid_t) -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(clock, &mut ts) };
    if rc != 0 {
        return 0.0;
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
}

/// CPU time consumed by the calling thread.
#[cfg(unix)]
pub(crate) fn thread_cpu_now() -> f64 {
    clock_seconds(libc::CLOCK_THREAD_CPUTIME_ID)
}

#[cfg(not(unix))]
pub(crate) fn thread_cpu_now() -> f64 {
    wall_now()
}

/// Peak resident set size of the process, in bytes.
#[cfg(unix)]
pub(crate) fn peak_rss_bytes() -> f64 {
    // SAFETY: zeroed rusage is a valid out-parameter.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return 0.0;
    }
    #[cfg(target_os = "macos")]
    return usage.ru_maxrss as f64;
    #[cfg(not(target_os = "macos"))]
    return usage.ru_maxrss as f64 * 1024.0;
}

#[cfg(not(unix))]
pub(crate) fn peak_rss_bytes() -> f64 {
    0.0
}

#[cfg(target_os = "linux")]
pub(crate) fn current_tid() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_tid() -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
