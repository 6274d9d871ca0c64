//! DOT renderings of a batch, for debugging.
//!
//! Two views are available: the raw instruction list with its base-array
//! fan-in/fan-out, and the built dependency graph. Both can also be dumped
//! to files automatically by setting the `LAZR_PRINT_*` environment
//! variables to a filename prefix; successive dumps within one process get
//! increasing sequence numbers.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::NodeKind;
use crate::instr::{Instruction, Operand};
use crate::types::Base;
use crate::Batch;

/// Sequence number shared by every dump in this process.
static DUMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Renders the raw instruction list as DOT.
///
/// Bases appear as ellipses (named in first-use order), inline constants
/// as pentagons, instructions as boxes. Edges run input → instruction →
/// output. User functions are omitted; their operand lists live behind the
/// kernel id and carry no opcode to label.
pub fn instruction_graph_dot(batch: &Batch) -> String {
    let mut out = String::new();
    let mut base_names: HashMap<Base, usize> = HashMap::new();
    let mut next_base = 0usize;
    let mut next_const = 0usize;

    out.push_str("digraph {\n");

    for (handle, instruction) in batch.instructions.iter() {
        let Instruction::Op { opcode, operands } = instruction else {
            continue;
        };
        let i = handle.index();
        let nops = opcode.arity();

        let mut name_base = |base: Base| -> usize {
            *base_names.entry(base).or_insert_with(|| {
                let n = next_base;
                next_base += 1;
                n
            })
        };

        for slot in 1..nops.min(3) {
            match operands.get(slot) {
                Some(Operand::View(view)) => {
                    let name = name_base(view.base);
                    let _ = writeln!(
                        out,
                        "B_{name} [shape=ellipse, style=filled, fillcolor=\"#0000ff\", \
                         label=\"B_{name} - {}\"];",
                        view.base
                    );
                    let _ = writeln!(out, "B_{name} -> I_{i};");
                }
                Some(Operand::Constant(value)) => {
                    let c = next_const;
                    next_const += 1;
                    let _ = writeln!(
                        out,
                        "const_{c} [shape=pentagon, style=filled, fillcolor=\"#ff0000\", \
                         label=\"{value}\"];"
                    );
                    let _ = writeln!(out, "const_{c} -> I_{i};");
                }
                None => {}
            }
        }

        let _ = writeln!(
            out,
            "I_{i} [shape=box, style=filled, fillcolor=\"#CBD5E8\", label=\"I_{i} - {opcode}\"];"
        );

        if let Some(Operand::View(view)) = operands.first() {
            let name = name_base(view.base);
            let _ = writeln!(
                out,
                "B_{name} [shape=ellipse, style=filled, fillcolor=\"#0000ff\", \
                 label=\"B_{name} - {}\"];",
                view.base
            );
            let _ = writeln!(out, "I_{i} -> B_{name};");
        }
    }

    out.push_str("}\n");
    out
}

fn node_tag(kind: NodeKind) -> char {
    match kind {
        NodeKind::Instruction(_) => 'I',
        NodeKind::Collection => 'C',
    }
}

/// Renders the built dependency graph as DOT.
///
/// Instruction nodes are labeled with their opcode (storage-releasing ops
/// dashed), collection nodes with a distinct fill; edges run parent →
/// child.
pub fn node_graph_dot(batch: &Batch) -> String {
    let mut out = String::new();
    out.push_str("digraph {\n");

    for (handle, node) in batch.nodes.iter() {
        let tag = node_tag(node.kind);
        let ix = handle.index();

        match node.kind {
            NodeKind::Instruction(instruction) => {
                let instr = &batch.instructions[instruction];
                let style = match instr {
                    Instruction::Op { opcode, .. } if opcode.releases_storage() => {
                        "dashed,rounded"
                    }
                    _ => "filled,rounded",
                };
                let _ = writeln!(
                    out,
                    "{tag}_{ix} [shape=box style=\"{style}\" fillcolor=\"#CBD5E8\" \
                     label=\"{tag}_{ix} - {}\"];",
                    instr.name()
                );
            }
            NodeKind::Collection => {
                let _ = writeln!(
                    out,
                    "{tag}_{ix} [shape=box, style=filled, fillcolor=\"#ffffE8\", \
                     label=\"{tag}_{ix} - collection\"];"
                );
            }
        }

        for child in [node.left_child, node.right_child].into_iter().flatten() {
            let child_tag = node_tag(batch.nodes[child].kind);
            let _ = writeln!(out, "{tag}_{ix} -> {child_tag}_{};", child.index());
        }
    }

    out.push_str("}\n");
    out
}

/// Writes `render(batch)` to `<prefix><stem>-<seq>.dot` when the
/// environment variable `var` is set to `<prefix>`.
///
/// Debugging aid only: I/O failures are logged and swallowed.
pub(crate) fn dump_if_enabled(
    var: &str,
    stem: &str,
    batch: &Batch,
    render: fn(&Batch) -> String,
) {
    let Some(prefix) = std::env::var_os(var) else {
        return;
    };
    let seq = DUMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = format!("{}{stem}-{seq}.dot", prefix.to_string_lossy());
    if let Err(err) = std::fs::write(&path, render(batch)) {
        log::warn!("failed to write graph dump {path}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Opcode;
    use crate::types::{Constant, View};

    fn view(id: u64) -> Operand {
        Operand::View(View::contiguous(Base(id), 8))
    }

    #[test]
    fn instruction_dot_names_bases_and_constants() {
        let batch = Batch::from_instructions([
            Instruction::op(Opcode::Add, vec![view(0), view(1), view(2)]),
            Instruction::op(
                Opcode::Fill,
                vec![view(1), Operand::Constant(Constant::F64(0.5))],
            ),
        ]);
        let dot = instruction_graph_dot(&batch);
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("I_0 - add"));
        assert!(dot.contains("I_1 - fill"));
        assert!(dot.contains("const_0"));
        assert!(dot.contains("label=\"0.5\""));
        assert!(dot.contains("B_0 -> I_0;"));
        assert!(dot.contains("I_0 -> B_"));
    }

    #[test]
    fn node_dot_marks_collections_and_lifecycle_ops() {
        let mut batch = Batch::from_instructions([
            Instruction::op(
                Opcode::Fill,
                vec![view(0), Operand::Constant(Constant::F64(1.0))],
            ),
            Instruction::op(Opcode::Free, vec![view(0)]),
        ]);
        batch.build().unwrap();
        let dot = node_graph_dot(&batch);
        assert!(dot.contains("C_0 - collection"));
        assert!(dot.contains("fill"));
        assert!(dot.contains("style=\"dashed,rounded\""), "free renders dashed");
        assert!(dot.contains("->"));
    }

    #[test]
    fn empty_batch_renders_empty_graphs() {
        let batch = Batch::new();
        assert_eq!(instruction_graph_dot(&batch), "digraph {\n}\n");
        assert_eq!(node_graph_dot(&batch), "digraph {\n}\n");
    }
}
