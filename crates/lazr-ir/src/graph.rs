//! The dependency graph: nodes, edge insertion, and the batch builder.
//!
//! One pass over the instruction arena turns the linear stream into a DAG
//! whose edges encode every read-after-write, write-after-write, and
//! write-after-read hazard on the underlying bases. Nodes keep fan-in and
//! fan-out at two or below; wider joins are expressed structurally through
//! inert collection nodes, so a node stays a small `Copy` value and the
//! scheduler pays constant bookkeeping per node.

use std::collections::{BTreeSet, HashMap};

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::instr::Instruction;
use crate::types::Base;
use crate::{dump, Batch};

/// What a node stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Wraps one instruction from the batch's instruction arena.
    Instruction(Handle<Instruction>),
    /// Pass-through node multiplexing extra parents or children.
    Collection,
}

/// A vertex in the dependency DAG.
///
/// Parent links point at the nodes that must run first; child links at the
/// nodes waiting on this one. All four links are optional, and the
/// parent/child pointers of adjacent nodes always agree (checked by
/// [`verify_links`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub left_parent: Option<Handle<Node>>,
    pub right_parent: Option<Handle<Node>>,
    pub left_child: Option<Handle<Node>>,
    pub right_child: Option<Handle<Node>>,
}

impl Node {
    /// A fresh, unlinked node wrapping `instruction`.
    pub fn instruction(instruction: Handle<Instruction>) -> Self {
        Self {
            kind: NodeKind::Instruction(instruction),
            left_parent: None,
            right_parent: None,
            left_child: None,
            right_child: None,
        }
    }

    /// A fresh, unlinked collection node.
    pub fn collection() -> Self {
        Self {
            kind: NodeKind::Collection,
            left_parent: None,
            right_parent: None,
            left_child: None,
            right_child: None,
        }
    }

    /// The wrapped instruction, or `None` for a collection node.
    pub fn instruction_handle(&self) -> Option<Handle<Instruction>> {
        match self.kind {
            NodeKind::Instruction(h) => Some(h),
            NodeKind::Collection => None,
        }
    }

    /// Returns `true` when neither parent slot is filled.
    pub fn is_orphan(&self) -> bool {
        self.left_parent.is_none() && self.right_parent.is_none()
    }
}

fn new_node(nodes: &mut Arena<Node>, node: Node) -> Result<Handle<Node>, IrError> {
    nodes.try_append(node).ok_or(IrError::ArenaFull)
}

/// Makes `child` depend on `parent`, synthesizing a collection node when
/// `parent` already has two children.
///
/// In the overflow case the parent's left child is displaced into a fresh
/// collection node that adopts both the displaced node and `child`; the
/// displaced node's back-pointer is rewired accordingly.
///
/// # Errors
///
/// [`IrError::SelfCycle`] when `parent == child`;
/// [`IrError::GraphCorruption`] when a back-pointer that must exist is
/// missing during rewiring; [`IrError::ArenaFull`] on node exhaustion.
pub fn add_child(
    nodes: &mut Arena<Node>,
    parent: Handle<Node>,
    child: Handle<Node>,
) -> Result<(), IrError> {
    if parent == child {
        return Err(IrError::SelfCycle {
            node: parent.index(),
        });
    }

    if nodes[parent].left_child.is_none() {
        nodes[parent].left_child = Some(child);
        add_parent(nodes, child, parent)?;
    } else if nodes[parent].right_child.is_none() {
        nodes[parent].right_child = Some(child);
        add_parent(nodes, child, parent)?;
    } else {
        // Fan-out overflow: displace the left child into a collection node.
        let displaced = nodes[parent].left_child.expect("checked above");
        let cn = new_node(nodes, Node::collection())?;
        nodes[cn].left_child = Some(displaced);
        nodes[cn].right_child = Some(child);
        nodes[parent].left_child = Some(cn);

        if nodes[displaced].left_parent == Some(parent) {
            nodes[displaced].left_parent = Some(cn);
        } else if nodes[displaced].right_parent == Some(parent) {
            nodes[displaced].right_parent = Some(cn);
        } else {
            log::debug!(
                "add_child: displaced node {displaced:?} does not point back at {parent:?}"
            );
            return Err(IrError::GraphCorruption {
                node: parent.index(),
            });
        }

        add_parent(nodes, child, cn)?;
        nodes[cn].left_parent = Some(parent);
    }

    Ok(())
}

/// Records `parent` in one of `child`'s parent slots, synthesizing a
/// collection node when both slots are taken.
///
/// A no-op when `parent` is already registered. In the overflow case the
/// child's two existing parents are handed to a fresh collection node,
/// their child pointers are rewired to it, and the collection node becomes
/// the child's left parent alongside the new `parent` on the right.
pub fn add_parent(
    nodes: &mut Arena<Node>,
    child: Handle<Node>,
    parent: Handle<Node>,
) -> Result<(), IrError> {
    if nodes[child].left_parent == Some(parent) || nodes[child].right_parent == Some(parent) {
        return Ok(());
    }

    if nodes[child].left_parent.is_none() {
        nodes[child].left_parent = Some(parent);
    } else if nodes[child].right_parent.is_none() {
        nodes[child].right_parent = Some(parent);
    } else {
        // Fan-in overflow: both existing parents move onto a collection node.
        let old_left = nodes[child].left_parent.expect("checked above");
        let old_right = nodes[child].right_parent.expect("checked above");
        let cn = new_node(nodes, Node::collection())?;
        nodes[cn].left_parent = Some(old_left);
        nodes[cn].right_parent = Some(old_right);

        for grandparent in [old_left, old_right] {
            if nodes[grandparent].left_child == Some(child) {
                nodes[grandparent].left_child = Some(cn);
            } else if nodes[grandparent].right_child == Some(child) {
                nodes[grandparent].right_child = Some(cn);
            } else {
                log::debug!(
                    "add_parent: grandparent {grandparent:?} does not point at {child:?}"
                );
                return Err(IrError::GraphCorruption {
                    node: child.index(),
                });
            }
        }

        nodes[child].left_parent = Some(cn);
        nodes[child].right_parent = Some(parent);
        nodes[cn].left_child = Some(child);
    }

    Ok(())
}

/// Splices `node` directly above `other`.
///
/// `node` inherits all of `other`'s parents (their child pointers are
/// rewired), and `other` is left with `node` as its only parent. Intended
/// for graph rewriters that inject bookkeeping nodes after a build.
pub fn insert_before(
    nodes: &mut Arena<Node>,
    node: Handle<Node>,
    other: Handle<Node>,
) -> Result<(), IrError> {
    if node == other {
        return Err(IrError::SelfCycle { node: node.index() });
    }

    nodes[node].left_child = Some(other);

    if let Some(lp) = nodes[other].left_parent {
        if nodes[lp].left_child == Some(other) {
            nodes[lp].left_child = Some(node);
        } else if nodes[lp].right_child == Some(other) {
            nodes[lp].right_child = Some(node);
        } else {
            return Err(IrError::GraphCorruption {
                node: other.index(),
            });
        }
        nodes[node].left_parent = Some(lp);
    }

    if let Some(rp) = nodes[other].right_parent {
        if nodes[rp].left_child == Some(other) {
            nodes[rp].left_child = Some(node);
        } else if nodes[rp].right_child == Some(other) {
            nodes[rp].right_child = Some(node);
        } else {
            return Err(IrError::GraphCorruption {
                node: other.index(),
            });
        }
        nodes[node].right_parent = Some(rp);
    }

    nodes[other].left_parent = Some(node);
    nodes[other].right_parent = None;

    Ok(())
}

/// Checks that every parent/child pointer pair in the batch agrees.
///
/// For each node `N` and each child `C` of `N`, exactly one of `C`'s parent
/// slots must name `N`, and symmetrically for parents. Collection nodes
/// must not carry an instruction by construction, so only link symmetry is
/// checked here.
pub fn verify_links(batch: &Batch) -> Result<(), IrError> {
    for (handle, node) in batch.nodes.iter() {
        for child in [node.left_child, node.right_child].into_iter().flatten() {
            let c = batch
                .nodes
                .try_get(child)
                .ok_or(IrError::GraphCorruption {
                    node: handle.index(),
                })?;
            let back = [c.left_parent, c.right_parent]
                .into_iter()
                .filter(|&p| p == Some(handle))
                .count();
            if back != 1 {
                return Err(IrError::GraphCorruption {
                    node: handle.index(),
                });
            }
        }
        for parent in [node.left_parent, node.right_parent].into_iter().flatten() {
            let p = batch
                .nodes
                .try_get(parent)
                .ok_or(IrError::GraphCorruption {
                    node: handle.index(),
                })?;
            if p.left_child != Some(handle) && p.right_child != Some(handle) {
                return Err(IrError::GraphCorruption {
                    node: handle.index(),
                });
            }
        }
    }
    Ok(())
}

impl Batch {
    /// Builds the dependency graph from the instruction arena.
    ///
    /// Idempotent: a batch that already has a root is left untouched. On
    /// failure every node is rolled back ([`clear_nodes`](Self::clear_nodes))
    /// and the instruction arena survives, so the caller may correct the
    /// stream and retry.
    pub fn build(&mut self) -> Result<(), IrError> {
        if self.root.is_some() {
            return Ok(());
        }

        dump::dump_if_enabled(
            "LAZR_PRINT_INSTRUCTION_GRAPH",
            "instructions",
            self,
            dump::instruction_graph_dot,
        );

        match self.build_graph() {
            Ok(root) => {
                self.root = Some(root);
                dump::dump_if_enabled(
                    "LAZR_PRINT_NODE_INPUT_GRAPH",
                    "input-graph",
                    self,
                    dump::node_graph_dot,
                );
                Ok(())
            }
            Err(err) => {
                self.clear_nodes();
                Err(err)
            }
        }
    }

    /// The single pass that tracks hazards and wires up the DAG.
    fn build_graph(&mut self) -> Result<Handle<Node>, IrError> {
        // Last writer per base.
        let mut writemap: HashMap<Base, Handle<Node>> = HashMap::new();
        // Readers of a base since its last write. Ordered so that the edge
        // insertion order, and with it the built graph, is deterministic.
        let mut readmap: HashMap<Base, BTreeSet<Handle<Node>>> = HashMap::new();

        let Batch {
            instructions,
            nodes,
            ..
        } = self;

        let root = new_node(nodes, Node::collection())?;

        for (handle, instruction) in instructions.iter() {
            let ids = instruction.operand_bases()?;
            let node = new_node(nodes, Node::instruction(handle))?;

            if let Some(output) = ids.output {
                // Write-after-write: run after the previous writer.
                if let Some(&prev_writer) = writemap.get(&output) {
                    add_child(nodes, prev_writer, node)?;
                }
                writemap.insert(output, node);
            }

            // The write map already names this node for its own output, so
            // an op that reads what it writes resolves to itself here and
            // the self-guards below drop the redundant edge.
            let left_dep = ids.left.and_then(|base| writemap.get(&base).copied());
            let right_dep = ids.right.and_then(|base| writemap.get(&base).copied());

            if let Some(output) = ids.output {
                // Write-after-read: wait for every reader of the output
                // that is not already ordered through an input edge.
                if let Some(readers) = readmap.remove(&output) {
                    for reader in readers {
                        if Some(reader) != left_dep && Some(reader) != right_dep {
                            add_child(nodes, reader, node)?;
                        }
                    }
                }
            }

            if let Some(left) = ids.left {
                readmap.entry(left).or_default().insert(node);
            }
            if let Some(right) = ids.right {
                if ids.right != ids.left {
                    readmap.entry(right).or_default().insert(node);
                }
            }

            // Read-after-write edges.
            if let Some(dep) = left_dep {
                if dep != node {
                    add_child(nodes, dep, node)?;
                }
            }
            if let Some(dep) = right_dep {
                if Some(dep) != left_dep && dep != node {
                    add_child(nodes, dep, node)?;
                }
            }

            // A node that picked up no dependency hangs off the root.
            if nodes[node].is_orphan() {
                add_child(nodes, root, node)?;
            }
        }

        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Opcode, Operand, UserFunc};
    use crate::types::{Constant, View};

    fn view(id: u64) -> Operand {
        Operand::View(View::contiguous(Base(id), 8))
    }

    fn add(out: u64, left: u64, right: u64) -> Instruction {
        Instruction::op(Opcode::Add, vec![view(out), view(left), view(right)])
    }

    fn fill(out: u64, value: f64) -> Instruction {
        Instruction::op(
            Opcode::Fill,
            vec![view(out), Operand::Constant(Constant::F64(value))],
        )
    }

    fn node_of(batch: &Batch, instruction_index: usize) -> Handle<Node> {
        batch
            .nodes
            .iter()
            .find(|(_, n)| {
                n.instruction_handle()
                    .is_some_and(|h| h.index() == instruction_index)
            })
            .map(|(h, _)| h)
            .expect("instruction node not found")
    }

    fn is_ancestor(batch: &Batch, ancestor: Handle<Node>, node: Handle<Node>) -> bool {
        let mut stack = vec![ancestor];
        while let Some(n) = stack.pop() {
            if n == node {
                return true;
            }
            let current = batch.nodes[n];
            stack.extend(current.left_child);
            stack.extend(current.right_child);
        }
        false
    }

    #[test]
    fn raw_hazard_orders_writer_before_reader() {
        let mut batch = Batch::from_instructions([add(0, 1, 2), add(3, 0, 0)]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let writer = node_of(&batch, 0);
        let reader = node_of(&batch, 1);
        assert!(is_ancestor(&batch, writer, reader));
        assert!(!is_ancestor(&batch, reader, writer));
    }

    #[test]
    fn war_hazard_orders_reader_before_writer() {
        // add reads base 1; fill overwrites it afterwards.
        let mut batch = Batch::from_instructions([add(0, 1, 2), fill(1, 0.0)]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let reader = node_of(&batch, 0);
        let writer = node_of(&batch, 1);
        assert!(is_ancestor(&batch, reader, writer));
    }

    #[test]
    fn waw_hazard_orders_writes() {
        let mut batch = Batch::from_instructions([fill(0, 0.0), fill(0, 1.0)]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let first = node_of(&batch, 0);
        let second = node_of(&batch, 1);
        assert_eq!(batch.nodes[first].left_child, Some(second));
        assert_eq!(batch.nodes[second].left_parent, Some(first));
    }

    #[test]
    fn independent_ops_hang_off_root() {
        let mut batch = Batch::from_instructions([add(0, 1, 2), add(3, 4, 5)]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let root = batch.root.unwrap();
        let a = node_of(&batch, 0);
        let b = node_of(&batch, 1);
        assert_eq!(batch.nodes[a].left_parent, Some(root));
        assert_eq!(batch.nodes[b].left_parent, Some(root));
    }

    #[test]
    fn op_reading_its_own_output_gets_single_waw_edge() {
        // add(a, a, b): the read of `a` resolves to the node itself and is
        // dropped; only the WAW edge to the earlier writer survives.
        let mut batch = Batch::from_instructions([fill(0, 1.0), add(0, 0, 1)]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let first = node_of(&batch, 0);
        let second = node_of(&batch, 1);
        assert_eq!(batch.nodes[first].left_child, Some(second));
        assert_eq!(batch.nodes[first].right_child, None);
        assert_eq!(batch.nodes[second].left_parent, Some(first));
        assert_eq!(batch.nodes[second].right_parent, None);
    }

    #[test]
    fn fan_out_overflow_synthesizes_collections() {
        // One writer, five readers of base 0.
        let mut batch = Batch::from_instructions([
            fill(0, 1.0),
            add(1, 0, 0),
            add(2, 0, 0),
            add(3, 0, 0),
            add(4, 0, 0),
            add(5, 0, 0),
        ]);
        batch.build().unwrap();
        verify_links(&batch).unwrap();

        let writer = node_of(&batch, 0);
        for i in 1..=5 {
            let reader = node_of(&batch, i);
            assert!(
                is_ancestor(&batch, writer, reader),
                "writer must precede reader {i}"
            );
        }

        // The fan-out is wider than two, so collection nodes must exist.
        let collections = batch
            .nodes
            .iter()
            .filter(|(_, n)| n.kind == NodeKind::Collection)
            .count();
        assert!(collections > 1, "expected synthesized collection nodes");

        // Fan bound holds everywhere.
        for (_, node) in batch.nodes.iter() {
            let children = [node.left_child, node.right_child]
                .into_iter()
                .flatten()
                .count();
            assert!(children <= 2);
        }
    }

    #[test]
    fn fan_in_overflow_synthesizes_collection() {
        let mut batch = Batch::new();
        let a = batch.nodes.append(Node::collection());
        let b = batch.nodes.append(Node::collection());
        let c = batch.nodes.append(Node::collection());
        let target = batch.nodes.append(Node::collection());

        add_child(&mut batch.nodes, a, target).unwrap();
        add_child(&mut batch.nodes, b, target).unwrap();
        add_child(&mut batch.nodes, c, target).unwrap();

        // Third parent forced a collection node between target and {a, b}.
        let cn = batch.nodes[target].left_parent.unwrap();
        assert_eq!(batch.nodes[cn].kind, NodeKind::Collection);
        assert_eq!(batch.nodes[target].right_parent, Some(c));
        assert_eq!(batch.nodes[cn].left_parent, Some(a));
        assert_eq!(batch.nodes[cn].right_parent, Some(b));
        assert_eq!(batch.nodes[a].left_child, Some(cn));
        assert_eq!(batch.nodes[b].left_child, Some(cn));
        verify_links(&batch).unwrap();
    }

    #[test]
    fn add_child_rejects_self_edge() {
        let mut batch = Batch::new();
        let n = batch.nodes.append(Node::collection());
        let err = add_child(&mut batch.nodes, n, n).unwrap_err();
        assert!(matches!(err, IrError::SelfCycle { .. }));
    }

    #[test]
    fn add_parent_is_idempotent() {
        let mut batch = Batch::new();
        let p = batch.nodes.append(Node::collection());
        let c = batch.nodes.append(Node::collection());
        add_child(&mut batch.nodes, p, c).unwrap();
        add_parent(&mut batch.nodes, c, p).unwrap();
        assert_eq!(batch.nodes[c].left_parent, Some(p));
        assert_eq!(batch.nodes[c].right_parent, None);
    }

    #[test]
    fn build_is_idempotent() {
        let mut batch = Batch::from_instructions([add(0, 1, 2)]);
        batch.build().unwrap();
        let nodes_before = batch.nodes.len();
        batch.build().unwrap();
        assert_eq!(batch.nodes.len(), nodes_before);
    }

    #[test]
    fn failed_build_rolls_back_nodes_but_keeps_instructions() {
        let malformed = Instruction::UserFunc(UserFunc {
            id: 0,
            nout: 2,
            nin: 0,
            operands: vec![view(0), view(1)],
        });
        let mut batch = Batch::from_instructions([add(0, 1, 2), malformed]);
        let err = batch.build().unwrap_err();
        assert!(matches!(err, IrError::MalformedUserFunc { .. }));
        assert!(batch.nodes.is_empty());
        assert!(batch.root.is_none());
        assert_eq!(batch.instructions.len(), 2);

        // The batch is still appendable after the rollback.
        assert!(batch.append(fill(0, 0.0)).is_ok());
    }

    #[test]
    fn insert_before_takes_over_parents() {
        let mut batch = Batch::new();
        let p = batch.nodes.append(Node::collection());
        let target = batch.nodes.append(Node::collection());
        add_child(&mut batch.nodes, p, target).unwrap();

        let injected = batch.nodes.append(Node::collection());
        insert_before(&mut batch.nodes, injected, target).unwrap();

        assert_eq!(batch.nodes[p].left_child, Some(injected));
        assert_eq!(batch.nodes[injected].left_parent, Some(p));
        assert_eq!(batch.nodes[injected].left_child, Some(target));
        assert_eq!(batch.nodes[target].left_parent, Some(injected));
        assert_eq!(batch.nodes[target].right_parent, None);
        verify_links(&batch).unwrap();
    }

    #[test]
    fn verify_links_catches_one_sided_edge() {
        let mut batch = Batch::new();
        let a = batch.nodes.append(Node::collection());
        let b = batch.nodes.append(Node::collection());
        batch.nodes[a].left_child = Some(b); // no back-pointer on b
        let err = verify_links(&batch).unwrap_err();
        assert!(matches!(err, IrError::GraphCorruption { .. }));
    }
}
