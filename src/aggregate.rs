// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Cross-thread aggregation. At finalization each quiesced thread graph
//! is folded into the master tree, stitched beneath the node its spawn
//! bookmark points at; bookmarks resolve transitively so workers spawned
//! by workers land in the right place. Merge order is tid order, which
//! makes reports deterministic for a given set of threads.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::graph::{Bookmark, CallGraph, HashPath};
use crate::profiler::{all_graphs, MASTER};
use crate::report::{Format, ReportBuilder};
use crate::settings::Settings;

/// Clone every registered thread graph, sorted by tid.
pub(crate) fn snapshot_graphs() -> Vec<CallGraph> {
    let mut graphs: Vec<CallGraph> = all_graphs()
        .iter()
        .map(|shared| shared.lock().clone())
        .collect();
    graphs.sort_by_key(|graph| graph.tid());
    graphs
}

/// Hash-path prefix beneath which a thread's sub-tree is stitched,
/// following parent bookmarks transitively. A cycle, a missing bookmark,
/// or a bookmark into a since-cleared store resolves to the master root.
fn resolve_prefix(
    tid: u64,
    bookmarks: &HashMap<u64, Bookmark>,
    epochs: &HashMap<u64, u64>,
    memo: &mut HashMap<u64, HashPath>,
    visiting: &mut HashSet<u64>,
) -> HashPath {
    if let Some(prefix) = memo.get(&tid) {
        return prefix.clone();
    }
    let prefix = match bookmarks.get(&tid) {
        None => HashPath::new(),
        Some(bookmark) => {
            let cleared = epochs
                .get(&bookmark.parent_tid)
                .map_or(false, |&current| current != bookmark.epoch);
            if cleared {
                log::debug!(
                    "bookmark into cleared thread {}, stitching at root",
                    bookmark.parent_tid
                );
                HashPath::new()
            } else if !visiting.insert(tid) {
                log::warn!("bookmark cycle involving thread {}, stitching at root", tid);
                HashPath::new()
            } else {
                let mut prefix =
                    resolve_prefix(bookmark.parent_tid, bookmarks, epochs, memo, visiting);
                prefix.extend_from_slice(&bookmark.path);
                visiting.remove(&tid);
                prefix
            }
        }
    };
    memo.insert(tid, prefix.clone());
    prefix
}

/// Fold `graphs` into `master`, creating missing stitch-path nodes.
pub(crate) fn merge_into(master: &mut CallGraph, graphs: &[CallGraph]) -> Result<()> {
    let bookmarks: HashMap<u64, Bookmark> = graphs
        .iter()
        .filter_map(|graph| {
            graph
                .active_bookmark()
                .map(|bookmark| (graph.tid(), bookmark.clone()))
        })
        .collect();
    // per-thread clear epochs; the thread's own store wins over the
    // master view when both carry the tid
    let mut epochs: HashMap<u64, u64> = HashMap::new();
    epochs.insert(master.tid(), master.epoch());
    for graph in graphs {
        epochs.insert(graph.tid(), graph.epoch());
    }
    let mut memo = HashMap::new();
    for graph in graphs {
        if graph.is_empty() {
            continue;
        }
        let mut visiting = HashSet::new();
        let prefix = resolve_prefix(graph.tid(), &bookmarks, &epochs, &mut memo, &mut visiting);
        let anchor = master.ensure_path(&prefix);
        master.absorb(graph, anchor)?;
    }
    Ok(())
}

/// The rank trees a report renders. With thread collapsing (the default)
/// this is one merged view; otherwise the master rank plus one rank per
/// worker graph that still holds data.
pub(crate) fn rank_views() -> Result<Vec<CallGraph>> {
    let graphs = snapshot_graphs();
    if Settings::instance().collapse_threads() {
        let mut view = MASTER.read().clone();
        merge_into(&mut view, &graphs)?;
        Ok(vec![view])
    } else {
        let mut view = MASTER.read().clone();
        let mut workers = Vec::new();
        for graph in graphs {
            if graph.tid() == view.tid() {
                merge_into(&mut view, std::slice::from_ref(&graph))?;
            } else if !graph.is_empty() {
                workers.push(graph);
            }
        }
        let mut ranks = vec![view];
        ranks.extend(workers);
        Ok(ranks)
    }
}

/// Close outstanding scopes (when stack clearing is on), merge worker
/// trees into the master, emit the text and JSON reports, and clear the
/// merged sources. Never raises; returns false when the merge ran out of
/// memory (nothing is written then) or when report emission failed.
pub fn finalize() -> bool {
    let settings = Settings::instance();
    if settings.stack_clearing() {
        for shared in all_graphs() {
            let mut graph = shared.lock();
            if graph.has_open_scopes() {
                log::debug!(
                    "thread {} finalized with open scopes, closing them",
                    graph.tid()
                );
                graph.close_open_scopes();
            }
        }
    }

    let graphs = snapshot_graphs();
    let collapse = settings.collapse_threads();
    {
        let mut master = MASTER.write();
        let master_tid = master.tid();
        let to_merge: Vec<CallGraph> = if collapse {
            graphs
        } else {
            graphs
                .into_iter()
                .filter(|graph| graph.tid() == master_tid)
                .collect()
        };
        if let Err(err) = merge_into(&mut master, &to_merge) {
            log::error!("finalize aborted: {}", err);
            return false;
        }
        let merged: HashSet<u64> = to_merge.iter().map(|graph| graph.tid()).collect();
        for shared in all_graphs() {
            let mut graph = shared.lock();
            if merged.contains(&graph.tid()) {
                graph.clear();
            }
        }
    }

    let text = ReportBuilder::new().format(Format::Text).write_default();
    let json = ReportBuilder::new().format(Format::JsonTree).write_default();
    text && json
}
