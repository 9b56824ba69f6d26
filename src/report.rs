// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Report rendering. The merged rank trees are walked depth-first in
//! insertion order and emitted as indented text or as the JSON schema
//! (`ranks` → `graph` → nested children). Destinations are a caller
//! stream or files under the configured output directory; a file that
//! cannot be opened degrades to stdout with a warning.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate;
use crate::component::{Category, Component};
use crate::error::Result;
use crate::graph::{CallGraph, NodeId, ROOT};
use crate::registry;
use crate::settings::Settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    JsonTree,
    JsonFlat,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Text => "txt",
            Format::JsonTree => "tree.json",
            Format::JsonFlat => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub ranks: Vec<JsonRank>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRank {
    pub tid: u64,
    pub graph: Vec<JsonNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonNode {
    pub hash: u64,
    pub label: String,
    pub depth: usize,
    pub laps: u64,
    pub value: f64,
    pub accum: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub unit: String,
    pub children: Vec<JsonNode>,
}

/// Builds one report against the current measurement state.
pub struct ReportBuilder {
    format: Format,
    min_value: Option<f64>,
    tag: Option<String>,
}

impl ReportBuilder {
    pub fn new() -> ReportBuilder {
        ReportBuilder {
            format: Format::Text,
            min_value: None,
            tag: None,
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Drop nodes whose primary accumulated value (in base units) falls
    /// below `threshold`.
    pub fn min_value(mut self, threshold: f64) -> Self {
        self.min_value = Some(threshold);
        self
    }

    /// Override the `<tag>` part of the output filename.
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_owned());
        self
    }

    /// Render into a caller-supplied stream.
    pub fn render_to(&self, writer: &mut dyn Write) -> Result<()> {
        let ranks = aggregate::rank_views()?;
        self.render_ranks(&ranks, writer)
    }

    /// Render to the configured output directory, falling back to stdout
    /// when the file cannot be opened.
    pub fn write_default(&self) -> bool {
        self.write_to_path(&self.default_path())
    }

    /// Render to an explicit path, falling back to stdout when the file
    /// cannot be opened.
    pub fn write_to_path(&self, path: &Path) -> bool {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                log::warn!(
                    "cannot create {}: {}, writing report to stdout",
                    parent.display(),
                    err
                );
                return self.render_stdout();
            }
        }
        match fs::File::create(path) {
            Ok(file) => {
                let mut file = io::BufWriter::new(file);
                let written = self
                    .render_ranks_current(&mut file)
                    .and_then(|()| file.flush().map_err(Into::into));
                match written {
                    Ok(()) => true,
                    Err(err) => {
                        log::error!("report to {} failed: {}", path.display(), err);
                        false
                    }
                }
            }
            Err(err) => {
                log::warn!(
                    "cannot open {}: {}, writing report to stdout",
                    path.display(),
                    err
                );
                self.render_stdout()
            }
        }
    }

    fn render_stdout(&self) -> bool {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        match self.render_ranks_current(&mut lock) {
            Ok(()) => true,
            Err(err) => {
                log::error!("report failed: {}", err);
                false
            }
        }
    }

    fn render_ranks_current(&self, writer: &mut dyn Write) -> Result<()> {
        let ranks = aggregate::rank_views()?;
        self.render_ranks(&ranks, writer)
    }

    fn render_ranks(&self, ranks: &[CallGraph], writer: &mut dyn Write) -> Result<()> {
        match self.format {
            Format::Text => self.render_text(ranks, writer),
            Format::JsonTree | Format::JsonFlat => self.render_json(ranks, writer),
        }
    }

    fn render_text(&self, ranks: &[CallGraph], writer: &mut dyn Write) -> Result<()> {
        for (rank, graph) in ranks.iter().enumerate() {
            writeln!(writer, "> rank {} [tid {}]", rank, graph.tid())?;
            for id in preorder(graph) {
                let node = graph.node(id);
                if let (Some(min), Some(primary)) = (self.min_value, node.data.primary()) {
                    if primary.metric().accum() < min {
                        continue;
                    }
                }
                let pad = "  ".repeat(node.depth);
                write!(
                    writer,
                    "{}> {} [laps: {}]",
                    pad,
                    registry::display_label(node.hash),
                    node.laps
                )?;
                for component in node.data.iter().filter(|part| part.stores()) {
                    let (scale, unit) = scaled_unit(component);
                    let metric = component.metric();
                    write!(
                        writer,
                        " {}: {} {} (mean {}, min {}, max {}, stddev {})",
                        component.kind(),
                        fmt_value(metric.accum() * scale),
                        unit,
                        fmt_value(metric.mean() * scale),
                        fmt_value(metric.min() * scale),
                        fmt_value(metric.max() * scale),
                        fmt_value(metric.stddev() * scale),
                    )?;
                }
                if node.tid != graph.tid() {
                    write!(writer, " (tid {})", node.tid)?;
                }
                if node.data.any_running() {
                    write!(writer, " (running)")?;
                }
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    fn render_json(&self, ranks: &[CallGraph], writer: &mut dyn Write) -> Result<()> {
        let report = self.build_json(ranks);
        serde_json::to_writer_pretty(&mut *writer, &report)?;
        writeln!(writer)?;
        Ok(())
    }

    fn build_json(&self, ranks: &[CallGraph]) -> JsonReport {
        let ranks = ranks
            .iter()
            .map(|graph| {
                let nodes = match self.format {
                    Format::JsonFlat => preorder(graph)
                        .into_iter()
                        .filter(|&id| self.passes_filter(graph, id))
                        .map(|id| self.json_node(graph, id, false))
                        .collect(),
                    _ => graph
                        .children_of(ROOT)
                        .iter()
                        .filter(|&&id| self.passes_filter(graph, id))
                        .map(|&id| self.json_node(graph, id, true))
                        .collect(),
                };
                JsonRank {
                    tid: graph.tid(),
                    graph: nodes,
                }
            })
            .collect();
        JsonReport { ranks }
    }

    fn passes_filter(&self, graph: &CallGraph, id: NodeId) -> bool {
        match (self.min_value, graph.node(id).data.primary()) {
            (Some(min), Some(primary)) => primary.metric().accum() >= min,
            _ => true,
        }
    }

    fn json_node(&self, graph: &CallGraph, id: NodeId, nest: bool) -> JsonNode {
        let node = graph.node(id);
        let (value, accum, min, max, stddev, unit) = match node.data.primary() {
            Some(primary) => {
                let (scale, unit) = scaled_unit(primary);
                let metric = primary.metric();
                (
                    metric.value() * scale,
                    metric.accum() * scale,
                    metric.min() * scale,
                    metric.max() * scale,
                    metric.stddev() * scale,
                    unit.to_owned(),
                )
            }
            None => (0.0, 0.0, 0.0, 0.0, 0.0, String::new()),
        };
        let children = if nest {
            graph
                .children_of(id)
                .iter()
                .filter(|&&child| self.passes_filter(graph, child))
                .map(|&child| self.json_node(graph, child, true))
                .collect()
        } else {
            Vec::new()
        };
        JsonNode {
            hash: node.hash,
            label: registry::display_label(node.hash),
            depth: node.depth,
            laps: node.laps,
            value,
            accum,
            min,
            max,
            stddev,
            unit,
            children,
        }
    }

    fn default_path(&self) -> PathBuf {
        let settings = Settings::instance();
        let tag = self
            .tag
            .clone()
            .unwrap_or_else(|| settings.program_name())
            .trim()
            .to_owned();
        let tag = if tag.is_empty() {
            "report".to_owned()
        } else {
            tag
        };
        let name = expand_template(&format!("{}{}", settings.output_prefix(), tag));
        PathBuf::from(settings.output_path())
            .join(format!("{}.{}", name, self.format.extension()))
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        ReportBuilder::new()
    }
}

/// Depth-first pre-order over a graph's non-root nodes.
fn preorder(graph: &CallGraph) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = graph.children_of(ROOT).iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        out.push(id);
        stack.extend(graph.children_of(id).iter().rev().copied());
    }
    out
}

/// Scale factor and unit label for a component's base readings.
fn scaled_unit(component: &dyn Component) -> (f64, &'static str) {
    let settings = Settings::instance();
    match component.category() {
        Category::Timing => {
            let units = settings.timing_units();
            (units.scale(), units.label())
        }
        Category::Memory => {
            let units = settings.memory_units();
            (units.scale(), units.label())
        }
        Category::Percent => (1.0, "%"),
        Category::Other => (1.0, ""),
    }
}

fn fmt_value(value: f64) -> String {
    let settings = Settings::instance();
    let width = settings.width();
    let precision = settings.precision();
    if settings.scientific() {
        format!("{:>width$.precision$e}", value, width = width, precision = precision)
    } else {
        format!("{:>width$.precision$}", value, width = width, precision = precision)
    }
}

/// Expand filename placeholders: `%p` pid, `%r` process rank, `%j` job
/// id, `%m` digest of the captured command line.
fn expand_template(name: &str) -> String {
    let mut out = name.to_owned();
    if out.contains("%p") {
        out = out.replace("%p", &std::process::id().to_string());
    }
    if out.contains("%r") {
        let rank = std::env::var("SLURM_PROCID").unwrap_or_else(|_| "0".to_owned());
        out = out.replace("%r", &rank);
    }
    if out.contains("%j") {
        let job = std::env::var("SLURM_JOB_ID").unwrap_or_else(|_| "0".to_owned());
        out = out.replace("%j", &job);
    }
    if out.contains("%m") {
        out = out.replace("%m", &argv_digest());
    }
    out
}

fn argv_digest() -> String {
    let mut hasher = DefaultHasher::new();
    for arg in Settings::instance().argv() {
        arg.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Text report of the current state, written to stdout.
pub fn report() -> bool {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    report_to(&mut lock)
}

/// Text report of the current state, written to `writer`.
pub fn report_to(writer: &mut dyn Write) -> bool {
    match ReportBuilder::new().format(Format::Text).render_to(writer) {
        Ok(()) => true,
        Err(err) => {
            log::error!("report failed: {}", err);
            false
        }
    }
}

/// JSON tree report of the current state, written to `path`.
pub fn write_json<P: AsRef<Path>>(path: P) -> bool {
    ReportBuilder::new()
        .format(Format::JsonTree)
        .write_to_path(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentSet;
    use crate::graph::Scope;

    const NO_LIMIT: usize = usize::MAX;

    fn sample_graph() -> CallGraph {
        let mut graph = CallGraph::new(77);
        let outer_hash = crate::registry::intern("render_outer").unwrap();
        let inner_hash = crate::registry::intern("render_inner").unwrap();
        let outer = graph.push_scope(outer_hash, Scope::Tree, NO_LIMIT, ComponentSet::wall());
        let inner = graph.push_scope(inner_hash, Scope::Tree, NO_LIMIT, ComponentSet::wall());
        graph.pop_scope(&inner);
        graph.pop_scope(&outer);
        graph
    }

    #[test]
    fn text_rendering_indents_by_depth() {
        let graph = sample_graph();
        let builder = ReportBuilder::new();
        let mut out = Vec::new();
        builder.render_text(&[graph], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("> rank 0 [tid 77]"));
        assert!(text.contains("\n  > render_outer [laps: 1]"));
        assert!(text.contains("\n    > render_inner [laps: 1]"));
        assert!(text.contains("wall_clock:"));
    }

    #[test]
    fn json_tree_nests_children() {
        let graph = sample_graph();
        let builder = ReportBuilder::new().format(Format::JsonTree);
        let report = builder.build_json(&[graph]);
        assert_eq!(report.ranks.len(), 1);
        assert_eq!(report.ranks[0].tid, 77);
        let top = &report.ranks[0].graph[0];
        assert_eq!(top.label, "render_outer");
        assert_eq!(top.depth, 1);
        assert_eq!(top.laps, 1);
        assert_eq!(top.unit, "sec");
        assert_eq!(top.children.len(), 1);
        assert_eq!(top.children[0].label, "render_inner");
        assert_eq!(top.children[0].depth, 2);
    }

    #[test]
    fn json_flat_lists_nodes_in_preorder_without_nesting() {
        let graph = sample_graph();
        let builder = ReportBuilder::new().format(Format::JsonFlat);
        let report = builder.build_json(&[graph]);
        let nodes = &report.ranks[0].graph;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].label, "render_outer");
        assert_eq!(nodes[1].label, "render_inner");
        assert!(nodes.iter().all(|node| node.children.is_empty()));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let graph = sample_graph();
        let builder = ReportBuilder::new().format(Format::JsonTree);
        let mut out = Vec::new();
        builder.render_json(&[graph], &mut out).unwrap();
        let parsed: JsonReport = serde_json::from_slice(&out).unwrap();
        let top = &parsed.ranks[0].graph[0];
        assert_eq!(top.label, "render_outer");
        assert_eq!(top.laps, 1);
        assert!(top.accum >= 0.0);
    }

    #[test]
    fn min_value_filter_drops_small_nodes() {
        let graph = sample_graph();
        let builder = ReportBuilder::new().min_value(1e9);
        let mut out = Vec::new();
        builder.render_text(&[graph], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("render_outer"));
        assert!(text.contains("> rank 0"));
    }

    #[test]
    fn preorder_visits_parents_before_children() {
        let graph = sample_graph();
        let order = preorder(&graph);
        assert_eq!(order.len(), 2);
        assert_eq!(graph.node(order[0]).depth, 1);
        assert_eq!(graph.node(order[1]).depth, 2);
    }

    #[test]
    fn template_expansion_substitutes_pid() {
        let expanded = expand_template("run-%p");
        assert_eq!(expanded, format!("run-{}", std::process::id()));
        assert_eq!(expand_template("plain"), "plain");
    }

    #[test]
    fn path_nodes_without_data_render_with_zeroes() {
        let mut graph = CallGraph::new(5);
        let hash = crate::registry::intern("bare_path_node").unwrap();
        graph.ensure_path(&[hash]);
        let builder = ReportBuilder::new().format(Format::JsonTree);
        let report = builder.build_json(&[graph]);
        let node = &report.ranks[0].graph[0];
        assert_eq!(node.label, "bare_path_node");
        assert_eq!(node.accum, 0.0);
        assert_eq!(node.unit, "");
    }
}
