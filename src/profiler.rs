// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Thread binding and the scoped measurement handle. Every thread gets
//! its own call graph on first use; the graph is shared with the
//! finalizer through an `Arc` registered in a process-wide list, so data
//! survives even when a pool thread's TLS destructors never run.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::clock;
use crate::component::ComponentSet;
use crate::graph::{Bookmark, CallGraph, Scope, Token};
use crate::registry;
use crate::settings::Settings;

pub(crate) type SharedGraph = Arc<Mutex<CallGraph>>;

/// Every thread graph ever created, in registration order.
static GRAPHS: Lazy<Mutex<Vec<SharedGraph>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// The merged master tree. Populated by finalization; reports snapshot it.
pub(crate) static MASTER: Lazy<RwLock<CallGraph>> =
    Lazy::new(|| RwLock::new(CallGraph::new(clock::current_tid())));

thread_local! {
    static LOCAL: SharedGraph = {
        let graph = Arc::new(Mutex::new(CallGraph::new(clock::current_tid())));
        GRAPHS.lock().push(Arc::clone(&graph));
        graph
    };
}

pub(crate) fn local_graph() -> SharedGraph {
    LOCAL.with(Arc::clone)
}

pub(crate) fn all_graphs() -> Vec<SharedGraph> {
    GRAPHS.lock().clone()
}

/// Set up defaults, pin the clock epoch, and capture the command line.
pub fn init(program_name: &str, argv: &[String]) {
    clock::touch_epoch();
    Settings::instance().set_program(program_name, argv);
    MASTER.write().set_tid(clock::current_tid());
    // bind the calling thread so it becomes the master rank
    let _ = local_graph();
    log::debug!("calltrace initialized for {:?}", program_name);
}

/// Scoped measurement over the default component bundle (wall + CPU).
/// The returned guard closes the region when dropped, on every exit path.
pub fn measure(label: &str) -> MeasureGuard {
    MeasureGuard::open(
        label,
        Settings::instance().default_scope(),
        ComponentSet::standard(),
    )
}

/// Scoped measurement with an explicit scope and component bundle.
pub fn measure_with(label: &str, scope: Scope, components: ComponentSet) -> MeasureGuard {
    MeasureGuard::open(label, scope, components)
}

/// Wall-clock-only convenience measurement.
pub fn timer(label: &str) -> MeasureGuard {
    MeasureGuard::open(label, Settings::instance().default_scope(), ComponentSet::wall())
}

pub fn enable(on: bool) {
    Settings::instance().set_enabled(on);
}

pub fn is_enabled() -> bool {
    Settings::instance().enabled()
}

pub fn set_max_depth(depth: usize) {
    Settings::instance().set_max_depth(depth);
}

pub fn get_max_depth() -> usize {
    Settings::instance().max_depth()
}

/// Snapshot of the calling thread's position, to hand to a worker at
/// spawn so its tree can be stitched back here during aggregation.
pub fn capture_bookmark() -> Bookmark {
    let graph = local_graph();
    let graph = graph.lock();
    Bookmark {
        parent_tid: graph.tid(),
        path: graph.cursor_path(),
        epoch: graph.epoch(),
    }
}

/// Install a parent bookmark on the calling (worker) thread.
pub fn adopt_bookmark(bookmark: &Bookmark) {
    let cap = Settings::instance().max_thread_bookmarks();
    local_graph().lock().adopt_bookmark(bookmark.clone(), cap);
}

/// Discard all recorded nodes in every thread and in the master tree.
/// Settings and the label registry are preserved.
pub fn clear() {
    for graph in all_graphs() {
        graph.lock().clear();
    }
    MASTER.write().clear();
}

/// Nodes recorded by the calling thread (root excluded).
pub fn node_count() -> usize {
    local_graph().lock().len()
}

/// Nodes in the merged master tree (root excluded).
pub fn merged_node_count() -> usize {
    MASTER.read().len()
}

/// RAII measurement bracket: construction attaches a node to the calling
/// thread's call graph and starts its components; drop stops them and
/// retreats the cursor. Constructed while instrumentation is disabled it
/// carries a sentinel and does nothing on drop.
#[must_use = "dropping the guard immediately closes the measured region"]
pub struct MeasureGuard {
    graph: SharedGraph,
    token: Token,
}

impl MeasureGuard {
    fn open(label: &str, scope: Scope, components: ComponentSet) -> MeasureGuard {
        let graph = local_graph();
        let settings = Settings::instance();
        if !settings.enabled() {
            return MeasureGuard {
                graph,
                token: Token::sentinel(),
            };
        }
        let hash = match registry::intern(label) {
            Some(hash) => hash,
            None => {
                return MeasureGuard {
                    graph,
                    token: Token::sentinel(),
                }
            }
        };
        let token = graph
            .lock()
            .push_scope(hash, scope, settings.max_depth(), components);
        MeasureGuard { graph, token }
    }

    /// False when the guard is a sentinel (disabled instrumentation,
    /// rejected label, or depth overflow).
    pub fn is_active(&self) -> bool {
        self.token.is_live()
    }
}

impl Drop for MeasureGuard {
    fn drop(&mut self) {
        self.graph.lock().pop_scope(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_the_cursor_on_drop() {
        let graph = local_graph();
        let before = graph.lock().cursor();
        {
            let outer = measure("guard_cursor_outer");
            assert!(outer.is_active());
            let _inner = timer("guard_cursor_inner");
        }
        assert_eq!(graph.lock().cursor(), before);
    }

    #[test]
    fn guard_survives_unwinding() {
        let graph = local_graph();
        let before = graph.lock().cursor();
        let result = std::panic::catch_unwind(|| {
            let _guard = timer("guard_unwind");
            panic!("measured region panics");
        });
        assert!(result.is_err());
        assert_eq!(graph.lock().cursor(), before);
    }

    #[test]
    fn rejected_label_yields_a_sentinel_guard() {
        let count = node_count();
        {
            let guard = timer("   ");
            assert!(!guard.is_active());
        }
        assert_eq!(node_count(), count);
    }

    #[test]
    fn bookmark_reflects_the_open_scopes() {
        let _guard = timer("bookmark_site");
        let bookmark = capture_bookmark();
        assert_eq!(bookmark.parent_tid, clock::current_tid());
        assert_eq!(
            *bookmark.path.last().unwrap(),
            crate::registry::hash_label("bookmark_site")
        );
    }
}
