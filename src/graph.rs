// Copyright 2026 Calltrace Project Authors. Licensed under Apache-2.0.

//! Per-thread call-graph store. Nodes live in an arena `Vec` and refer to
//! each other by index, so the tree is owned strictly top-down; the cursor
//! tracks where the next insertion attaches. Insertions hand back a token
//! and the paired pop is driven by that token, never by raw stack depth,
//! which keeps depth-limited and disabled regions perfectly balanced.

use smallvec::SmallVec;

use crate::component::{Category, ComponentSet, Gauge, Metric};
use crate::error::{Error, Result};
use crate::registry;

pub(crate) type NodeId = usize;
pub(crate) const ROOT: NodeId = 0;

/// Hash path from a root to a node, outermost first.
pub(crate) type HashPath = SmallVec<[u64; 8]>;

/// How repeated labels attach to the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Re-entering a label under the same parent reuses the node;
    /// recursion builds chains of children.
    Tree,
    /// Every region attaches at depth 1 regardless of nesting.
    Flat,
    /// Every entry creates a fresh node. Unbounded under hot loops; meant
    /// for short traces only.
    Timeline,
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) hash: u64,
    pub(crate) depth: usize,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) data: ComponentSet,
    pub(crate) laps: u64,
    pub(crate) on_stack: u32,
    pub(crate) transient: bool,
    pub(crate) flat: bool,
    pub(crate) tid: u64,
    pub(crate) seq: Option<u64>,
}

impl Node {
    fn root(tid: u64) -> Node {
        Node {
            hash: 0,
            depth: 0,
            parent: None,
            children: Vec::new(),
            data: ComponentSet::new(),
            laps: 0,
            on_stack: 0,
            transient: false,
            flat: false,
            tid,
            seq: None,
        }
    }
}

/// Spawn-time relation between a worker thread and the node its parent
/// had open; aggregation stitches the worker's sub-tree beneath it. The
/// epoch records the parent store's clear count at capture, so a bookmark
/// into a since-cleared store is recognized as stale and merges at the
/// root instead of recreating the missing path.
#[derive(Clone, Debug)]
pub struct Bookmark {
    pub(crate) parent_tid: u64,
    pub(crate) path: HashPath,
    pub(crate) epoch: u64,
}

/// Receipt for one insertion. A sentinel token (no node) comes back when
/// the insertion was suppressed and makes the paired pop a no-op; the
/// generation guards against pops after forced stack clearing.
#[derive(Debug)]
pub(crate) struct Token {
    node: Option<NodeId>,
    prior: NodeId,
    generation: u64,
}

impl Token {
    pub(crate) fn sentinel() -> Token {
        Token {
            node: None,
            prior: ROOT,
            generation: 0,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.node.is_some()
    }
}

#[derive(Clone)]
pub(crate) struct CallGraph {
    nodes: Vec<Node>,
    cursor: NodeId,
    tid: u64,
    sequence: u64,
    generation: u64,
    epoch: u64,
    open: Vec<NodeId>,
    bookmarks: Vec<Bookmark>,
}

impl CallGraph {
    pub(crate) fn new(tid: u64) -> CallGraph {
        CallGraph {
            nodes: vec![Node::root(tid)],
            cursor: ROOT,
            tid,
            sequence: 0,
            generation: 1,
            epoch: 0,
            open: Vec::new(),
            bookmarks: Vec::new(),
        }
    }

    pub(crate) fn tid(&self) -> u64 {
        self.tid
    }

    /// Number of times this store has been cleared. Bookmarks captured
    /// under an older epoch point at destroyed nodes.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn set_tid(&mut self, tid: u64) {
        self.tid = tid;
        self.nodes[ROOT].tid = tid;
    }

    /// Number of recorded nodes, the root excluded.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    fn find_child(&self, parent: NodeId, hash: u64) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].hash == hash && self.nodes[child].seq.is_none())
    }

    fn new_child(&mut self, parent: NodeId, hash: u64, flat: bool, seq: Option<u64>) -> NodeId {
        let depth = self.nodes[parent].depth + 1;
        let id = self.nodes.len();
        self.nodes.push(Node {
            hash,
            depth,
            parent: Some(parent),
            children: Vec::new(),
            data: ComponentSet::new(),
            laps: 0,
            on_stack: 0,
            transient: false,
            flat,
            tid: self.tid,
            seq,
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Attach (or revisit) a node for `hash` under the current cursor and
    /// advance the cursor to it. Suppressed insertions return a sentinel
    /// and leave the cursor alone.
    pub(crate) fn insert(&mut self, hash: u64, scope: Scope, max_depth: usize) -> Token {
        let prior = self.cursor;
        let parent = match scope {
            Scope::Flat => ROOT,
            Scope::Tree | Scope::Timeline => prior,
        };
        if self.nodes[parent].depth >= max_depth {
            return Token::sentinel();
        }
        let target = match scope {
            Scope::Timeline => {
                self.sequence += 1;
                let seq = self.sequence;
                self.new_child(parent, hash, false, Some(seq))
            }
            Scope::Tree | Scope::Flat => match self.find_child(parent, hash) {
                Some(id) => id,
                None => self.new_child(parent, hash, scope == Scope::Flat, None),
            },
        };
        self.cursor = target;
        self.nodes[target].on_stack += 1;
        self.open.push(target);
        Token {
            node: Some(target),
            prior,
            generation: self.generation,
        }
    }

    /// Insert plus component start, the full front half of a scoped
    /// measurement. `seed` populates newly created (or still empty) nodes.
    pub(crate) fn push_scope(
        &mut self,
        hash: u64,
        scope: Scope,
        max_depth: usize,
        seed: ComponentSet,
    ) -> Token {
        let token = self.insert(hash, scope, max_depth);
        if let Some(id) = token.node {
            let node = &mut self.nodes[id];
            if node.data.is_empty() {
                node.data = seed;
            }
            if node.on_stack == 1 {
                node.data.start_all();
            }
        }
        token
    }

    /// The back half: stop the node's components once the last handle on
    /// it leaves the stack, count the lap, and restore the cursor.
    pub(crate) fn pop_scope(&mut self, token: &Token) {
        let Some(id) = token.node else { return };
        if token.generation != self.generation {
            return;
        }
        match self.open.iter().rposition(|&open| open == id) {
            Some(position) => {
                self.open.remove(position);
            }
            None => {
                log::debug!("{}", Error::Logic(format!("pop without insert on node {}", id)));
                return;
            }
        }
        let mut secondary = Vec::new();
        {
            let node = &mut self.nodes[id];
            node.on_stack = node.on_stack.saturating_sub(1);
            if node.on_stack == 0 {
                node.data.stop_all();
                node.laps += 1;
                secondary = node.data.drain_secondary();
            }
        }
        for (label, metric) in secondary {
            self.attach_secondary(id, &label, metric);
        }
        self.cursor = token.prior;
    }

    /// Attach a component-published entry as a child of `parent`, folding
    /// repeated labels together.
    fn attach_secondary(&mut self, parent: NodeId, label: &str, metric: Metric) {
        let Some(hash) = registry::intern(label) else { return };
        let child = match self.find_child(parent, hash) {
            Some(id) => id,
            None => self.new_child(parent, hash, false, None),
        };
        let incoming = ComponentSet::new().with(Gauge::from_metric(Category::Other, metric));
        let node = &mut self.nodes[child];
        node.data.merge(&incoming);
        if let Some(primary) = node.data.primary() {
            node.laps = primary.metric().laps();
        }
    }

    pub(crate) fn has_open_scopes(&self) -> bool {
        !self.open.is_empty()
    }

    /// Close every open scope in LIFO order. Tokens issued before this
    /// call become stale, so their eventual pops are no-ops.
    pub(crate) fn close_open_scopes(&mut self) {
        while let Some(id) = self.open.pop() {
            let mut secondary = Vec::new();
            {
                let node = &mut self.nodes[id];
                node.on_stack = node.on_stack.saturating_sub(1);
                if node.on_stack == 0 {
                    node.data.stop_all();
                    node.laps += 1;
                    secondary = node.data.drain_secondary();
                }
            }
            for (label, metric) in secondary {
                self.attach_secondary(id, &label, metric);
            }
        }
        self.cursor = ROOT;
        self.generation += 1;
    }

    /// Discard all recorded nodes and advance the clear epoch. Bookmarks
    /// held by this store describe the spawn relation, not the data, and
    /// survive; bookmarks other threads captured into this store go stale
    /// and will merge at the root.
    pub(crate) fn clear(&mut self) {
        let tid = self.tid;
        self.nodes.clear();
        self.nodes.push(Node::root(tid));
        self.cursor = ROOT;
        self.sequence = 0;
        self.open.clear();
        self.generation += 1;
        self.epoch += 1;
    }

    /// Hash path from the root down to the cursor.
    pub(crate) fn cursor_path(&self) -> HashPath {
        let mut path = HashPath::new();
        let mut id = self.cursor;
        while let Some(parent) = self.nodes[id].parent {
            path.push(self.nodes[id].hash);
            id = parent;
        }
        path.reverse();
        path
    }

    pub(crate) fn adopt_bookmark(&mut self, bookmark: Bookmark, cap: usize) {
        if self.bookmarks.len() >= cap {
            log::warn!(
                "thread {} reached the bookmark limit ({}), ignoring new bookmark",
                self.tid,
                cap
            );
            return;
        }
        self.bookmarks.push(bookmark);
    }

    /// The bookmark governing where this graph stitches during merge.
    pub(crate) fn active_bookmark(&self) -> Option<&Bookmark> {
        self.bookmarks.last()
    }

    /// Walk `path` from the root, creating any missing nodes.
    pub(crate) fn ensure_path(&mut self, path: &[u64]) -> NodeId {
        let mut at = ROOT;
        for &hash in path {
            at = match self.find_child(at, hash) {
                Some(id) => id,
                None => self.new_child(at, hash, false, None),
            };
        }
        at
    }

    /// Graft `other`'s top-level nodes beneath `anchor`, folding matching
    /// hash paths together and always appending timeline nodes. Flat
    /// nodes keep their depth-1 position.
    pub(crate) fn absorb(&mut self, other: &CallGraph, anchor: NodeId) -> Result<()> {
        self.nodes
            .try_reserve(other.nodes.len())
            .map_err(|_| Error::MergeExhausted)?;
        for &child in &other.nodes[ROOT].children {
            self.absorb_node(other, child, anchor);
        }
        Ok(())
    }

    fn absorb_node(&mut self, other: &CallGraph, src: NodeId, dst_parent: NodeId) {
        let source = &other.nodes[src];
        let parent = if source.flat { ROOT } else { dst_parent };
        let dst = if source.seq.is_some() {
            self.sequence += 1;
            let seq = self.sequence;
            self.new_child(parent, source.hash, false, Some(seq))
        } else {
            match self.find_child(parent, source.hash) {
                Some(id) => id,
                None => self.new_child(parent, source.hash, source.flat, None),
            }
        };
        let node = &mut self.nodes[dst];
        if node.laps == 0 && node.data.is_empty() {
            // fresh graft keeps the recording thread as its creator
            node.tid = source.tid;
        }
        if node.transient {
            log::trace!("refolding data into node {:#x}", node.hash);
        }
        node.data.merge(&source.data);
        node.laps += source.laps;
        node.transient = true;
        for &child in &other.nodes[src].children {
            self.absorb_node(other, child, dst);
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> NodeId {
        self.cursor
    }
}
