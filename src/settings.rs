// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Process-wide configuration. Every option has an environment default
//! (`CALLTRACE_*`) read once at first use; an unparsable value logs a
//! warning and keeps the built-in default. Flags and numbers live in
//! atomics, strings behind a mutex, so readers on the measurement path
//! never block each other.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::Error;
use crate::graph::Scope;

pub(crate) const ENV_PREFIX: &str = "CALLTRACE_";

const DEFAULT_MAX_BOOKMARKS: usize = 50;
const DEFAULT_PRECISION: usize = 3;
const DEFAULT_WIDTH: usize = 8;
const DEFAULT_OUTPUT_PATH: &str = "./calltrace-output";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimingUnits {
    Sec,
    Ms,
    Us,
    Ns,
}

impl TimingUnits {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sec" | "s" => Some(TimingUnits::Sec),
            "ms" | "msec" => Some(TimingUnits::Ms),
            "us" | "usec" => Some(TimingUnits::Us),
            "ns" | "nsec" => Some(TimingUnits::Ns),
            _ => None,
        }
    }

    /// Multiplier taking a reading in seconds to this unit.
    pub fn scale(self) -> f64 {
        match self {
            TimingUnits::Sec => 1.0,
            TimingUnits::Ms => 1e3,
            TimingUnits::Us => 1e6,
            TimingUnits::Ns => 1e9,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimingUnits::Sec => "sec",
            TimingUnits::Ms => "ms",
            TimingUnits::Us => "us",
            TimingUnits::Ns => "ns",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TimingUnits::Sec => 0,
            TimingUnits::Ms => 1,
            TimingUnits::Us => 2,
            TimingUnits::Ns => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TimingUnits::Ms,
            2 => TimingUnits::Us,
            3 => TimingUnits::Ns,
            _ => TimingUnits::Sec,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUnits {
    Kb,
    Mb,
    Gb,
}

impl MemoryUnits {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kb" => Some(MemoryUnits::Kb),
            "mb" => Some(MemoryUnits::Mb),
            "gb" => Some(MemoryUnits::Gb),
            _ => None,
        }
    }

    /// Multiplier taking a reading in bytes to this unit.
    pub fn scale(self) -> f64 {
        match self {
            MemoryUnits::Kb => 1.0 / 1024.0,
            MemoryUnits::Mb => 1.0 / (1024.0 * 1024.0),
            MemoryUnits::Gb => 1.0 / (1024.0 * 1024.0 * 1024.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MemoryUnits::Kb => "KB",
            MemoryUnits::Mb => "MB",
            MemoryUnits::Gb => "GB",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            MemoryUnits::Kb => 0,
            MemoryUnits::Mb => 1,
            MemoryUnits::Gb => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MemoryUnits::Kb,
            2 => MemoryUnits::Gb,
            _ => MemoryUnits::Mb,
        }
    }
}

pub struct Settings {
    enabled: AtomicBool,
    max_depth: AtomicUsize,
    flat_profile: AtomicBool,
    timeline_profile: AtomicBool,
    collapse_threads: AtomicBool,
    collapse_processes: AtomicBool,
    max_thread_bookmarks: AtomicUsize,
    precision: AtomicUsize,
    width: AtomicUsize,
    scientific: AtomicBool,
    timing_units: AtomicU8,
    memory_units: AtomicU8,
    stack_clearing: AtomicBool,
    output_path: Mutex<String>,
    output_prefix: Mutex<String>,
    program_name: Mutex<String>,
    argv: Mutex<Vec<String>>,
}

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

impl Settings {
    pub fn instance() -> &'static Settings {
        &SETTINGS
    }

    fn from_env() -> Settings {
        Settings {
            enabled: AtomicBool::new(env_flag("ENABLED", true)),
            max_depth: AtomicUsize::new(env_parse("MAX_DEPTH", usize::MAX)),
            flat_profile: AtomicBool::new(env_flag("FLAT_PROFILE", false)),
            timeline_profile: AtomicBool::new(env_flag("TIMELINE_PROFILE", false)),
            collapse_threads: AtomicBool::new(env_flag("COLLAPSE_THREADS", true)),
            collapse_processes: AtomicBool::new(env_flag("COLLAPSE_PROCESSES", false)),
            max_thread_bookmarks: AtomicUsize::new(env_parse(
                "MAX_THREAD_BOOKMARKS",
                DEFAULT_MAX_BOOKMARKS,
            )),
            precision: AtomicUsize::new(env_parse("PRECISION", DEFAULT_PRECISION)),
            width: AtomicUsize::new(env_parse("WIDTH", DEFAULT_WIDTH)),
            scientific: AtomicBool::new(env_flag("SCIENTIFIC", false)),
            timing_units: AtomicU8::new(
                env_unit("TIMING_UNITS", TimingUnits::Sec, TimingUnits::parse).as_u8(),
            ),
            memory_units: AtomicU8::new(
                env_unit("MEMORY_UNITS", MemoryUnits::Mb, MemoryUnits::parse).as_u8(),
            ),
            stack_clearing: AtomicBool::new(env_flag("STACK_CLEARING", true)),
            output_path: Mutex::new(env_string("OUTPUT_PATH", DEFAULT_OUTPUT_PATH)),
            output_prefix: Mutex::new(env_string("OUTPUT_PREFIX", "")),
            program_name: Mutex::new(String::new()),
            argv: Mutex::new(Vec::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    pub fn set_max_depth(&self, depth: usize) {
        self.max_depth.store(depth, Ordering::Relaxed);
    }

    pub fn flat_profile(&self) -> bool {
        self.flat_profile.load(Ordering::Relaxed)
    }

    pub fn set_flat_profile(&self, on: bool) {
        self.flat_profile.store(on, Ordering::Relaxed);
    }

    pub fn timeline_profile(&self) -> bool {
        self.timeline_profile.load(Ordering::Relaxed)
    }

    pub fn set_timeline_profile(&self, on: bool) {
        self.timeline_profile.store(on, Ordering::Relaxed);
    }

    /// Scope applied when a measurement does not name one. Timeline wins
    /// over flat when both are requested.
    pub fn default_scope(&self) -> Scope {
        if self.timeline_profile() {
            Scope::Timeline
        } else if self.flat_profile() {
            Scope::Flat
        } else {
            Scope::Tree
        }
    }

    pub fn collapse_threads(&self) -> bool {
        self.collapse_threads.load(Ordering::Relaxed)
    }

    pub fn set_collapse_threads(&self, on: bool) {
        self.collapse_threads.store(on, Ordering::Relaxed);
    }

    pub fn collapse_processes(&self) -> bool {
        self.collapse_processes.load(Ordering::Relaxed)
    }

    pub fn max_thread_bookmarks(&self) -> usize {
        self.max_thread_bookmarks.load(Ordering::Relaxed)
    }

    pub fn set_max_thread_bookmarks(&self, cap: usize) {
        self.max_thread_bookmarks.store(cap, Ordering::Relaxed);
    }

    pub fn precision(&self) -> usize {
        self.precision.load(Ordering::Relaxed)
    }

    pub fn set_precision(&self, digits: usize) {
        self.precision.store(digits, Ordering::Relaxed);
    }

    pub fn width(&self) -> usize {
        self.width.load(Ordering::Relaxed)
    }

    pub fn set_width(&self, columns: usize) {
        self.width.store(columns, Ordering::Relaxed);
    }

    pub fn scientific(&self) -> bool {
        self.scientific.load(Ordering::Relaxed)
    }

    pub fn set_scientific(&self, on: bool) {
        self.scientific.store(on, Ordering::Relaxed);
    }

    pub fn timing_units(&self) -> TimingUnits {
        TimingUnits::from_u8(self.timing_units.load(Ordering::Relaxed))
    }

    pub fn set_timing_units(&self, units: TimingUnits) {
        self.timing_units.store(units.as_u8(), Ordering::Relaxed);
    }

    pub fn memory_units(&self) -> MemoryUnits {
        MemoryUnits::from_u8(self.memory_units.load(Ordering::Relaxed))
    }

    pub fn set_memory_units(&self, units: MemoryUnits) {
        self.memory_units.store(units.as_u8(), Ordering::Relaxed);
    }

    pub fn stack_clearing(&self) -> bool {
        self.stack_clearing.load(Ordering::Relaxed)
    }

    pub fn set_stack_clearing(&self, on: bool) {
        self.stack_clearing.store(on, Ordering::Relaxed);
    }

    pub fn output_path(&self) -> String {
        self.output_path.lock().clone()
    }

    pub fn set_output_path(&self, path: &str) {
        *self.output_path.lock() = path.to_owned();
    }

    pub fn output_prefix(&self) -> String {
        self.output_prefix.lock().clone()
    }

    pub fn set_output_prefix(&self, prefix: &str) {
        *self.output_prefix.lock() = prefix.to_owned();
    }

    pub fn program_name(&self) -> String {
        self.program_name.lock().clone()
    }

    pub fn argv(&self) -> Vec<String> {
        self.argv.lock().clone()
    }

    pub(crate) fn set_program(&self, name: &str, argv: &[String]) {
        *self.program_name.lock() = name.to_owned();
        *self.argv.lock() = argv.to_vec();
    }
}

fn env_raw(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

fn env_string(key: &'static str, default: &str) -> String {
    env_raw(key).unwrap_or_else(|| default.to_owned())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> T {
    match env_raw(key) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("{}", Error::Config(key, value));
                default
            }
        },
        None => default,
    }
}

fn env_flag(key: &'static str, default: bool) -> bool {
    match env_raw(key) {
        Some(value) => match parse_flag(&value) {
            Some(flag) => flag,
            None => {
                log::warn!("{}", Error::Config(key, value));
                default
            }
        },
        None => default,
    }
}

fn env_unit<U>(key: &'static str, default: U, parse: fn(&str) -> Option<U>) -> U {
    match env_raw(key) {
        Some(value) => match parse(&value) {
            Some(unit) => unit,
            None => {
                log::warn!("{}", Error::Config(key, value));
                default
            }
        },
        None => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "y" => Some(true),
        "0" | "false" | "off" | "no" | "n" => Some(false),
        _ => None,
    }
}
