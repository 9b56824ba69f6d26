// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Measurement primitives. A component captures a baseline on `start`,
//! folds the delta into its running [`Metric`] on `stop`, and merges with
//! peers of the same kind during cross-thread aggregation. Anything
//! implementing [`Component`] flows through [`ComponentSet`] unchanged, so
//! callers can bring their own observables.

use std::fmt;

use crate::clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Timing,
    Memory,
    Percent,
    Other,
}

/// Running statistics for one measurement stream: the latest sample, the
/// sum over all samples, extrema, and the second moment for the standard
/// deviation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metric {
    value: f64,
    accum: f64,
    min: f64,
    max: f64,
    sumsq: f64,
    laps: u64,
}

impl Default for Metric {
    fn default() -> Self {
        Metric {
            value: 0.0,
            accum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sumsq: 0.0,
            laps: 0,
        }
    }
}

impl Metric {
    /// Fold one completed interval (or one reading) into the statistics.
    pub fn sample(&mut self, delta: f64) {
        self.value = delta;
        self.accum += delta;
        self.sumsq += delta * delta;
        self.min = self.min.min(delta);
        self.max = self.max.max(delta);
        self.laps += 1;
    }

    pub(crate) fn combine(&mut self, other: &Metric) {
        if other.laps == 0 {
            return;
        }
        self.value = other.value;
        self.accum += other.accum;
        self.sumsq += other.sumsq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.laps += other.laps;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn accum(&self) -> f64 {
        self.accum
    }

    pub fn laps(&self) -> u64 {
        self.laps
    }

    pub fn min(&self) -> f64 {
        if self.laps == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.laps == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn mean(&self) -> f64 {
        if self.laps == 0 {
            0.0
        } else {
            self.accum / self.laps as f64
        }
    }

    /// Sample standard deviation over the recorded laps.
    pub fn stddev(&self) -> f64 {
        if self.laps < 2 {
            return 0.0;
        }
        let n = self.laps as f64;
        let variance = (self.sumsq - self.accum * self.accum / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }
}

pub trait Component: Send + Sync {
    /// Stable identifier used to match components across threads.
    fn kind(&self) -> &'static str;

    fn category(&self) -> Category;

    fn is_running(&self) -> bool;

    fn start(&mut self);

    fn stop(&mut self);

    /// The most recent sample.
    fn record(&self) -> f64 {
        self.metric().value()
    }

    fn metric(&self) -> &Metric;

    fn metric_mut(&mut self) -> &mut Metric;

    /// Whether this component contributes a stored aggregate. Tag-only
    /// markers return false and are skipped by reports and merges.
    fn stores(&self) -> bool {
        true
    }

    fn merge(&mut self, other: &dyn Component) {
        if self.kind() == other.kind() {
            self.metric_mut().combine(other.metric());
        } else {
            log::debug!(
                "refusing to merge component {} into {}",
                other.kind(),
                self.kind()
            );
        }
    }

    /// Secondary entries published by the last interval: labeled values
    /// the store attaches as child nodes of the measured region, e.g.
    /// per-kernel breakdowns. Drained after every stop.
    fn take_secondary(&mut self) -> Vec<(String, Metric)> {
        Vec::new()
    }

    fn boxed_clone(&self) -> Box<dyn Component>;

    /// A fresh, unstarted instance of the same kind.
    fn fresh(&self) -> Box<dyn Component>;
}

/// Wall time between `start` and `stop`.
#[derive(Clone, Debug, Default)]
pub struct WallClock {
    baseline: Option<f64>,
    metric: Metric,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for WallClock {
    fn kind(&self) -> &'static str {
        "wall_clock"
    }

    fn category(&self) -> Category {
        Category::Timing
    }

    fn is_running(&self) -> bool {
        self.baseline.is_some()
    }

    fn start(&mut self) {
        if self.baseline.is_some() {
            log::debug!("wall_clock: start while already running, keeping prior baseline");
            return;
        }
        self.baseline = Some(clock::wall_now());
    }

    fn stop(&mut self) {
        match self.baseline.take() {
            Some(baseline) => self.metric.sample(clock::wall_now() - baseline),
            None => log::debug!("wall_clock: stop without start, ignored"),
        }
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(WallClock::new())
    }
}

/// CPU time consumed by the measuring thread between `start` and `stop`.
#[derive(Clone, Debug, Default)]
pub struct CpuClock {
    baseline: Option<f64>,
    metric: Metric,
}

impl CpuClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for CpuClock {
    fn kind(&self) -> &'static str {
        "cpu_clock"
    }

    fn category(&self) -> Category {
        Category::Timing
    }

    fn is_running(&self) -> bool {
        self.baseline.is_some()
    }

    fn start(&mut self) {
        if self.baseline.is_some() {
            log::debug!("cpu_clock: start while already running, keeping prior baseline");
            return;
        }
        self.baseline = Some(clock::thread_cpu_now());
    }

    fn stop(&mut self) {
        match self.baseline.take() {
            Some(baseline) => self.metric.sample(clock::thread_cpu_now() - baseline),
            None => log::debug!("cpu_clock: stop without start, ignored"),
        }
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(CpuClock::new())
    }
}

/// Growth of the process peak resident set size across the region.
#[derive(Clone, Debug, Default)]
pub struct PeakRss {
    baseline: Option<f64>,
    metric: Metric,
}

impl PeakRss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for PeakRss {
    fn kind(&self) -> &'static str {
        "peak_rss"
    }

    fn category(&self) -> Category {
        Category::Memory
    }

    fn is_running(&self) -> bool {
        self.baseline.is_some()
    }

    fn start(&mut self) {
        if self.baseline.is_some() {
            log::debug!("peak_rss: start while already running, keeping prior baseline");
            return;
        }
        self.baseline = Some(clock::peak_rss_bytes());
    }

    fn stop(&mut self) {
        match self.baseline.take() {
            // Peak RSS never shrinks, so clamp out clock-like noise.
            Some(baseline) => self
                .metric
                .sample((clock::peak_rss_bytes() - baseline).max(0.0)),
            None => log::debug!("peak_rss: stop without start, ignored"),
        }
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(PeakRss::new())
    }
}

/// Counts completed start/stop cycles, one unit per lap.
#[derive(Clone, Debug, Default)]
pub struct TripCount {
    running: bool,
    metric: Metric,
}

impl TripCount {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for TripCount {
    fn kind(&self) -> &'static str {
        "trip_count"
    }

    fn category(&self) -> Category {
        Category::Other
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        if self.running {
            log::debug!("trip_count: start while already running, ignored");
            return;
        }
        self.running = true;
    }

    fn stop(&mut self) {
        if !self.running {
            log::debug!("trip_count: stop without start, ignored");
            return;
        }
        self.running = false;
        self.metric.sample(1.0);
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(TripCount::new())
    }
}

/// Holds externally supplied samples: manual counter deltas pushed by the
/// caller, or the secondary entries another component publishes.
#[derive(Clone, Debug)]
pub struct Gauge {
    category: Category,
    running: bool,
    metric: Metric,
}

impl Gauge {
    pub fn new(category: Category) -> Self {
        Gauge {
            category,
            running: false,
            metric: Metric::default(),
        }
    }

    pub(crate) fn from_metric(category: Category, metric: Metric) -> Self {
        Gauge {
            category,
            running: false,
            metric,
        }
    }

    /// Record one reading.
    pub fn push(&mut self, value: f64) {
        self.metric.sample(value);
    }
}

impl Component for Gauge {
    fn kind(&self) -> &'static str {
        "gauge"
    }

    fn category(&self) -> Category {
        self.category
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(Gauge::new(self.category))
    }
}

/// Tag-only component: participates in the region lifecycle but stores
/// nothing and is invisible to reports.
#[derive(Clone, Debug, Default)]
pub struct Marker {
    running: bool,
    metric: Metric,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for Marker {
    fn kind(&self) -> &'static str {
        "marker"
    }

    fn category(&self) -> Category {
        Category::Other
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn stores(&self) -> bool {
        false
    }

    fn boxed_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn fresh(&self) -> Box<dyn Component> {
        Box::new(Marker::new())
    }
}

/// The bundle of components attached to one call-graph node.
pub struct ComponentSet {
    parts: Vec<Box<dyn Component>>,
}

impl ComponentSet {
    pub fn new() -> Self {
        ComponentSet { parts: Vec::new() }
    }

    /// Wall clock only.
    pub fn wall() -> Self {
        ComponentSet::new().with(WallClock::new())
    }

    /// Wall plus thread CPU time, the default measurement bundle.
    pub fn standard() -> Self {
        ComponentSet::new().with(WallClock::new()).with(CpuClock::new())
    }

    pub fn with<C: Component + 'static>(mut self, component: C) -> Self {
        self.parts.push(Box::new(component));
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Component> {
        self.parts.iter().map(|part| part.as_ref())
    }

    /// The first storing component; its numbers represent the node in
    /// single-value renderings.
    pub(crate) fn primary(&self) -> Option<&dyn Component> {
        self.parts
            .iter()
            .find(|part| part.stores())
            .map(|part| part.as_ref())
    }

    pub(crate) fn start_all(&mut self) {
        for part in &mut self.parts {
            part.start();
        }
    }

    pub(crate) fn stop_all(&mut self) {
        for part in &mut self.parts {
            part.stop();
        }
    }

    pub(crate) fn any_running(&self) -> bool {
        self.parts.iter().any(|part| part.is_running())
    }

    /// Collect the secondary entries every component published for the
    /// interval that just closed.
    pub(crate) fn drain_secondary(&mut self) -> Vec<(String, Metric)> {
        let mut entries = Vec::new();
        for part in &mut self.parts {
            entries.append(&mut part.take_secondary());
        }
        entries
    }

    /// Fold `other` in kind-by-kind; kinds absent here are adopted.
    pub(crate) fn merge(&mut self, other: &ComponentSet) {
        for incoming in &other.parts {
            if !incoming.stores() {
                continue;
            }
            match self
                .parts
                .iter_mut()
                .find(|part| part.kind() == incoming.kind())
            {
                Some(part) => part.merge(incoming.as_ref()),
                None => self.parts.push(incoming.boxed_clone()),
            }
        }
    }
}

impl Default for ComponentSet {
    fn default() -> Self {
        ComponentSet::new()
    }
}

impl Clone for ComponentSet {
    fn clone(&self) -> Self {
        ComponentSet {
            parts: self.parts.iter().map(|part| part.boxed_clone()).collect(),
        }
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.parts.iter().map(|part| part.kind()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_tracks_extrema_and_moments() {
        let mut metric = Metric::default();
        metric.sample(2.0);
        metric.sample(4.0);
        metric.sample(6.0);
        assert_eq!(metric.laps(), 3);
        assert_eq!(metric.value(), 6.0);
        assert_eq!(metric.accum(), 12.0);
        assert_eq!(metric.min(), 2.0);
        assert_eq!(metric.max(), 6.0);
        assert_eq!(metric.mean(), 4.0);
        assert!((metric.stddev() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_metric_reports_zeros() {
        let metric = Metric::default();
        assert_eq!(metric.min(), 0.0);
        assert_eq!(metric.max(), 0.0);
        assert_eq!(metric.mean(), 0.0);
        assert_eq!(metric.stddev(), 0.0);
    }

    #[test]
    fn combine_sums_laps_and_folds_extrema() {
        let mut a = Metric::default();
        a.sample(1.0);
        a.sample(3.0);
        let mut b = Metric::default();
        b.sample(10.0);
        a.combine(&b);
        assert_eq!(a.laps(), 3);
        assert_eq!(a.accum(), 14.0);
        assert_eq!(a.min(), 1.0);
        assert_eq!(a.max(), 10.0);

        // combining an empty metric changes nothing
        let before = a;
        a.combine(&Metric::default());
        assert_eq!(a, before);
    }

    #[test]
    fn wall_clock_measures_an_interval() {
        let mut wall = WallClock::new();
        wall.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        wall.stop();
        assert_eq!(wall.metric().laps(), 1);
        assert!(wall.metric().value() > 0.0);
        assert!(!wall.is_running());
    }

    #[test]
    fn redundant_start_keeps_prior_baseline() {
        let mut wall = WallClock::new();
        wall.start();
        let baseline = wall.baseline;
        wall.start();
        assert_eq!(wall.baseline, baseline);
        wall.stop();
        assert_eq!(wall.metric().laps(), 1);
    }

    #[test]
    fn stop_without_start_is_ignored() {
        let mut cpu = CpuClock::new();
        cpu.stop();
        assert_eq!(cpu.metric().laps(), 0);
    }

    #[test]
    fn trip_count_accumulates_per_lap() {
        let mut trips = TripCount::new();
        for _ in 0..4 {
            trips.start();
            trips.stop();
        }
        assert_eq!(trips.metric().laps(), 4);
        assert_eq!(trips.metric().accum(), 4.0);
    }

    #[test]
    fn set_merge_matches_kinds_and_adopts_strays() {
        let mut left = ComponentSet::wall();
        left.start_all();
        left.stop_all();

        let mut right = ComponentSet::standard();
        right.start_all();
        right.stop_all();

        left.merge(&right);
        assert_eq!(left.len(), 2);
        let wall = left.iter().find(|c| c.kind() == "wall_clock").unwrap();
        assert_eq!(wall.metric().laps(), 2);
        let cpu = left.iter().find(|c| c.kind() == "cpu_clock").unwrap();
        assert_eq!(cpu.metric().laps(), 1);
    }

    #[test]
    fn markers_are_skipped_by_merge_and_primary() {
        let mut set = ComponentSet::new().with(Marker::new()).with(WallClock::new());
        assert_eq!(set.primary().unwrap().kind(), "wall_clock");

        let mut other = ComponentSet::new().with(Marker::new());
        other.start_all();
        other.stop_all();
        set.merge(&other);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn mismatched_kind_merge_is_refused() {
        let mut wall = WallClock::new();
        wall.start();
        wall.stop();
        let laps = wall.metric().laps();
        let mut trips = TripCount::new();
        trips.start();
        trips.stop();
        wall.merge(&trips);
        assert_eq!(wall.metric().laps(), laps);
    }
}
