//! Directed acyclic graph of doers with concurrent independent branches.
//!
//! Nodes live in an arena owned by the graph and are addressed by
//! [`NodeId`]. Node 0 is the root, a [`Nothing`] labelled with the graph
//! name. Every other node hangs off at least one parent, so the whole arena
//! is reachable from the root.
//!
//! Execution state (caller counts, done latches, failure flag) is created
//! fresh for every `execute` call and never stored in the graph itself.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::context::ExecContext;
use crate::doer::{self, Arg, Doer, DoerRef};
use crate::error::{EngineError, Result};
use crate::primitive::Nothing;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone)]
struct Node {
    doer: DoerRef,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone)]
pub struct Graph {
    name: String,
    nodes: Arc<Vec<Node>>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let root = Node {
            doer: Arc::new(Nothing::new(name.clone())),
            parents: Vec::new(),
            children: Vec::new(),
        };
        Self {
            name,
            nodes: Arc::new(vec![root]),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn doer(&self, id: NodeId) -> Option<&DoerRef> {
        self.nodes.get(id.0).map(|n| &n.doer)
    }

    /// Add a node depending on every node in `parents`. An empty parent list
    /// attaches the node to the root.
    ///
    /// # Panics
    ///
    /// If a parent id does not belong to this graph.
    pub fn add(&mut self, doer: DoerRef, parents: &[NodeId]) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parents = if parents.is_empty() {
            vec![NodeId::ROOT]
        } else {
            parents.to_vec()
        };
        for p in &parents {
            assert!(
                p.0 < id.0,
                "code error graph={} parent {:?} does not exist",
                self.name,
                p
            );
        }
        let nodes = Arc::make_mut(&mut self.nodes);
        for p in &parents {
            nodes[p.0].children.push(id);
        }
        nodes.push(Node {
            doer,
            parents,
            children: Vec::new(),
        });
        id
    }

    /// Add a node after `parent`. Returns the new node, so calls chain.
    pub fn append(&mut self, parent: NodeId, doer: DoerRef) -> NodeId {
        self.add(doer, &[parent])
    }

    /// Add a dependency between two existing nodes.
    ///
    /// Rejects unknown ids, edges into the root and edges that would close
    /// a cycle. Adding an existing edge is a no-op.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.nodes.len();
        if parent.0 >= len || child.0 >= len {
            return Err(EngineError::InvalidGraph(format!(
                "graph={} edge {}->{} references unknown node",
                self.name, parent.0, child.0
            )));
        }
        if child == NodeId::ROOT {
            return Err(EngineError::InvalidGraph(format!(
                "graph={} edge into root",
                self.name
            )));
        }
        if self.nodes[parent.0].children.contains(&child) {
            return Ok(());
        }
        if parent == child || self.reaches(child, parent) {
            return Err(EngineError::InvalidGraph(format!(
                "graph={} edge {}->{} creates a cycle",
                self.name, parent.0, child.0
            )));
        }
        let nodes = Arc::make_mut(&mut self.nodes);
        nodes[parent.0].children.push(child);
        nodes[child.0].parents.push(parent);
        Ok(())
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                queue.extend(self.nodes[id.0].children.iter().copied());
            }
        }
        false
    }

    /// Node ids in breadth-first order from the root, each once.
    fn walk(&self) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([NodeId::ROOT]);
        while let Some(id) = queue.pop_front() {
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            order.push(id);
            queue.extend(self.nodes[id.0].children.iter().copied());
        }
        order
    }

    /// Render as Graphviz DOT for diagnostics.
    pub fn dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph {:?} {{", self.name);
        for id in self.walk() {
            let node = &self.nodes[id.0];
            let _ = writeln!(out, "  n{} [label={:?}];", id.0, node.doer.describe());
            for child in &node.children {
                let _ = writeln!(out, "  n{} -> n{};", id.0, child.0);
            }
        }
        out.push('}');
        out
    }
}

/// Shared state of one graph execution.
struct Run {
    nodes: Arc<Vec<Node>>,
    callers: Vec<AtomicU32>,
    done: Vec<watch::Sender<bool>>,
    failed: AtomicU32,
    errors: mpsc::UnboundedSender<EngineError>,
    tracker: TaskTracker,
    ctx: ExecContext,
}

impl Run {
    fn spawn(self: &Arc<Self>, id: NodeId) {
        let run = Arc::clone(self);
        self.tracker.spawn(async move { run.work(id).await });
    }

    async fn work(self: Arc<Self>, id: NodeId) {
        if self.callers[id.0].fetch_add(1, Ordering::SeqCst) > 0 {
            // another parent already owns this node
            return;
        }
        let _done = DoneGuard {
            run: Arc::clone(&self),
            id,
        };

        let node = &self.nodes[id.0];
        for parent in &node.parents {
            let mut rx = self.done[parent.0].subscribe();
            let _ = rx.wait_for(|done| *done).await;
        }

        if self.failed.load(Ordering::SeqCst) == 0 {
            if let Err(e) = self.ctx.exec(node.doer.as_ref()).await {
                self.fail(e);
            }
        } else {
            debug!(node = %node.doer.describe(), "graph node skipped after failure");
        }
        // Descendants are still walked so every done latch fires; they see
        // the failure flag and skip.
        self.spawn_children(id);
    }

    fn spawn_children(self: &Arc<Self>, id: NodeId) {
        for child in &self.nodes[id.0].children {
            self.spawn(*child);
        }
    }

    fn fail(&self, e: EngineError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.errors.send(e);
    }
}

/// Fires the node's done latch however the worker exits.
struct DoneGuard {
    run: Arc<Run>,
    id: NodeId,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let name = self.run.nodes[self.id.0].doer.describe();
            error!(node = %name, "graph node panicked");
            self.run
                .fail(EngineError::msg(format!("node={} panicked", name)));
            self.run.spawn_children(self.id);
        }
        self.run.done[self.id.0].send_replace(true);
    }
}

#[async_trait]
impl Doer for Graph {
    fn validate(&self) -> Result<()> {
        let errs = self
            .walk()
            .into_iter()
            .filter_map(|id| {
                let d = &self.nodes[id.0].doer;
                d.validate().err().map(|e| {
                    e.context(format!(
                        "graph={} node={} validate",
                        self.name,
                        d.describe()
                    ))
                })
            })
            .collect();
        EngineError::fold_validate(errs)
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let n = self.nodes.len();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = Arc::new(Run {
            nodes: Arc::clone(&self.nodes),
            callers: (0..n).map(|_| AtomicU32::new(0)).collect(),
            done: (0..n).map(|_| watch::channel(false).0).collect(),
            failed: AtomicU32::new(0),
            errors: tx,
            tracker: TaskTracker::new(),
            ctx: ctx.clone(),
        });

        run.spawn(NodeId::ROOT);
        run.tracker.close();
        run.tracker.wait().await;

        let mut errs = Vec::new();
        while let Ok(e) = rx.try_recv() {
            errs.push(e);
        }
        EngineError::fold_execute(errs)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    /// Binds the single free argument slot in the graph.
    ///
    /// A graph without a free slot returns `Ok(None)`, so it can sit inside
    /// a sequence or another graph that is being bound.
    ///
    /// # Panics
    ///
    /// If the graph has several free slots.
    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        let mut found: Vec<(NodeId, DoerRef)> = Vec::new();
        for id in self.walk() {
            match doer::arg_apply(&self.nodes[id.0].doer, arg) {
                Ok((bound, true)) => found.push((id, bound)),
                Ok((_, false)) => {}
                Err(e) if e.is_arg_binding() => {}
                Err(e) => return Err(e),
            }
        }
        if found.is_empty() {
            return Ok(None);
        }
        if found.len() > 1 {
            panic!(
                "code error graph={} apply found {} unbound argument slots, expected exactly one",
                self.name,
                found.len()
            );
        }
        let (id, bound) = found.remove(0);
        let mut nodes = (*self.nodes).clone();
        nodes[id.0].doer = bound;
        Ok(Some(Arc::new(Graph {
            name: self.name.clone(),
            nodes: Arc::new(nodes),
        })))
    }
}
