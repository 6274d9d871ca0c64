//! Dependency-respecting traversal of a built batch.

use std::collections::{HashSet, VecDeque};

use crate::arena::Handle;
use crate::dump;
use crate::error::IrError;
use crate::graph::{Node, NodeKind};
use crate::instr::Instruction;
use crate::Batch;

/// How an iterator obtains its emission order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GraphMode {
    /// Build the dependency graph (if needed) and schedule through it.
    #[default]
    BuildAndSchedule,
    /// Skip graph construction and emit the instruction arena in recorded
    /// order. A batch that was already built is still traversed through its
    /// graph; this mode only suppresses the build step.
    LinearPassthrough,
}

/// Emits the nodes of a batch in an order that satisfies every
/// parent-before-child edge.
///
/// The traversal is a rotating work queue: the front node is emitted when
/// both its parents have been, and re-queued at the back otherwise. The
/// first node re-queued without any intervening progress marks the start
/// of a sweep; seeing it again means the queue made a full rotation
/// without emitting anything, which only a cycle can cause.
///
/// Two iterators over the same batch emit identical sequences; the order
/// depends only on the graph structure.
pub struct GraphIterator<'a> {
    batch: &'a Batch,
    /// Nodes already emitted.
    scheduled: HashSet<Handle<Node>>,
    /// Candidate nodes, front first.
    blocked: VecDeque<Handle<Node>>,
    /// Sweep sentinel for cycle detection.
    last_blocked: Option<Handle<Node>>,
    /// Position in the instruction arena for the passthrough path.
    cursor: usize,
}

impl<'a> GraphIterator<'a> {
    /// Creates an iterator over the batch as-is.
    ///
    /// No build is triggered: an unbuilt batch is traversed in recorded
    /// order. [`Batch::iter`] is the convenience path that builds first and
    /// only needs `&mut Batch` for that reason; this constructor borrows
    /// the batch shared, so the graph stays inspectable mid-traversal.
    pub fn new(batch: &'a Batch) -> Self {
        dump::dump_if_enabled(
            "LAZR_PRINT_NODE_OUTPUT_GRAPH",
            "output-graph",
            batch,
            dump::node_graph_dot,
        );

        let mut blocked = VecDeque::new();
        if let Some(root) = batch.root {
            blocked.push_back(root);
        }
        Self {
            batch,
            scheduled: HashSet::new(),
            blocked,
            last_blocked: None,
            cursor: 0,
        }
    }

    /// Emits the next node, or `Ok(None)` once every reachable node has
    /// been emitted.
    ///
    /// # Errors
    ///
    /// [`IrError::CycleDetected`] when the queue rotates fully without
    /// progress. The iterator is left as-is for inspection and should be
    /// dropped afterwards.
    pub fn next_node(&mut self) -> Result<Option<Handle<Node>>, IrError> {
        let batch = self.batch;
        while let Some(n) = self.blocked.pop_front() {
            if self.scheduled.contains(&n) {
                continue;
            }

            let node = batch.nodes[n];
            let parent_done =
                |p: Option<Handle<Node>>| p.map_or(true, |p| self.scheduled.contains(&p));
            let ready = parent_done(node.left_parent) && parent_done(node.right_parent);

            if ready {
                self.last_blocked = None;
                self.scheduled.insert(n);

                // Depth-first bias: the left child goes to the front of the
                // queue, the right child to the back.
                if let Some(left) = node.left_child {
                    self.blocked.push_front(left);
                }
                if let Some(right) = node.right_child {
                    if node.left_child != Some(right) {
                        self.blocked.push_back(right);
                    }
                }

                return Ok(Some(n));
            }

            self.blocked.push_back(n);
            if self.last_blocked == Some(n) {
                self.log_stalled_queue();
                return Err(IrError::CycleDetected {
                    remaining: self.blocked.len(),
                });
            }
            if self.last_blocked.is_none() {
                self.last_blocked = Some(n);
            }
        }

        Ok(None)
    }

    /// Emits the next instruction, skipping collection nodes, or
    /// `Ok(None)` at end of stream.
    ///
    /// On an unbuilt batch (graph construction suppressed) the instruction
    /// arena is emitted in recorded order instead.
    pub fn next_instruction(&mut self) -> Result<Option<&'a Instruction>, IrError> {
        let batch = self.batch;

        if batch.root.is_none() {
            if self.cursor < batch.instructions.len() {
                let handle = Handle::new(self.cursor as u32);
                self.cursor += 1;
                return Ok(Some(&batch.instructions[handle]));
            }
            return Ok(None);
        }

        while let Some(n) = self.next_node()? {
            if let NodeKind::Instruction(handle) = batch.nodes[n].kind {
                return Ok(Some(&batch.instructions[handle]));
            }
        }
        Ok(None)
    }

    /// Rewinds to the start of the traversal. The graph is not rebuilt.
    pub fn reset(&mut self) {
        self.scheduled.clear();
        self.blocked.clear();
        self.last_blocked = None;
        self.cursor = 0;
        if let Some(root) = self.batch.root {
            self.blocked.push_back(root);
        }
    }

    fn log_stalled_queue(&self) {
        log::debug!(
            "traversal stalled with {} queued nodes; dumping the queue",
            self.blocked.len()
        );
        for &n in &self.blocked {
            let node = self.batch.nodes[n];
            let label = match node.kind {
                NodeKind::Instruction(h) => self.batch.instructions[h].name(),
                NodeKind::Collection => "collection".into(),
            };
            log::debug!(
                "  {n:?} {label}: parents ({:?}, {:?}), children ({:?}, {:?})",
                node.left_parent,
                node.right_parent,
                node.left_child,
                node.right_child,
            );
        }
    }
}
