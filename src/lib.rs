// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! In-process performance instrumentation. Application code brackets
//! regions of interest with scoped guards; each region feeds a per-thread
//! call graph of labeled nodes holding statistical aggregates (wall time,
//! CPU time, memory, counters). At finalization the worker trees are
//! merged into a master tree and rendered as text and JSON reports keyed
//! by the hierarchical label path.
//!
//! ```no_run
//! calltrace::init("demo", &[]);
//! {
//!     let _total = calltrace::timer("total");
//!     for _ in 0..3 {
//!         let _step = calltrace::timer("step");
//!         // measured work
//!     }
//! }
//! calltrace::finalize();
//! ```
//!
//! Threads record independently. A parent hands its spawn position to a
//! worker as a [`Bookmark`], and finalization stitches the worker's tree
//! back beneath that node:
//!
//! ```no_run
//! let bookmark = calltrace::capture_bookmark();
//! let worker = std::thread::spawn(move || {
//!     calltrace::adopt_bookmark(&bookmark);
//!     let _guard = calltrace::timer("worker");
//! });
//! worker.join().unwrap();
//! calltrace::finalize();
//! ```

#[macro_use]
extern crate quick_error;

mod aggregate;
mod clock;
mod component;
mod error;
mod graph;
mod profiler;
mod registry;
mod report;
mod settings;

pub use aggregate::finalize;
pub use component::{
    Category, Component, ComponentSet, CpuClock, Gauge, Marker, Metric, PeakRss, TripCount,
    WallClock,
};
pub use error::{Error, Result};
pub use graph::{Bookmark, Scope};
pub use profiler::{
    adopt_bookmark, capture_bookmark, clear, enable, get_max_depth, init, is_enabled, measure,
    measure_with, merged_node_count, node_count, set_max_depth, timer, MeasureGuard,
};
pub use registry::{hash_label, label_of};
pub use report::{
    report, report_to, write_json, Format, JsonNode, JsonRank, JsonReport, ReportBuilder,
};
pub use settings::{MemoryUnits, Settings, TimingUnits};

/// Scoped wall-clock measurement labeled with the enclosing function's
/// name; an optional argument is appended to the label, so
/// `auto_timer!(format!("({})", n))` yields `my_func(42)`-style labels.
#[macro_export]
macro_rules! auto_timer {
    () => {
        $crate::timer($crate::__function_name!())
    };
    ($suffix:expr) => {{
        let __label = format!("{}{}", $crate::__function_name!(), $suffix);
        $crate::timer(&__label)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __function_name {
    () => {{
        fn __here() {}
        fn name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = name_of(__here);
        name.strip_suffix("::__here").unwrap_or(name)
    }};
}
