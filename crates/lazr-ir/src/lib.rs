//! lazr intermediate representation.
//!
//! The IR at the heart of the lazr lazy array runtime. The front end
//! records array operations into a [`Batch`] as a flat instruction stream;
//! [`Batch::build`] turns the stream into a dependency DAG that encodes
//! every read-after-write, write-after-write, and write-after-read hazard
//! on the underlying base arrays; a [`GraphIterator`] then hands the
//! instructions to the execution engine in a hazard-respecting order.
//!
//! Bases are opaque identity handles owned by the front end; the core
//! never touches the storage behind them, it only keys hazard tracking on
//! them. Each batch is self-contained: dependencies never carry across
//! batches.

pub mod arena;
pub mod dump;
pub mod graph;

mod error;
mod instr;
mod schedule;
mod types;

pub use arena::{Arena, Handle};
pub use error::IrError;
pub use graph::{add_child, add_parent, insert_before, verify_links, Node, NodeKind};
pub use instr::{Instruction, Opcode, Operand, OperandBases, UserFunc};
pub use schedule::{GraphIterator, GraphMode};
pub use types::{Base, Bytes, Constant, Scalar, ScalarKind, View};

/// One recorded batch of array operations and its dependency graph.
///
/// A batch starts empty and appendable. Once [`build`](Self::build) has run
/// (explicitly, or implicitly through [`iter`](Self::iter) or
/// [`serialize`](Self::serialize)) the instruction arena is frozen and
/// `root` names the collection node all independent work hangs off.
///
/// Fields are public so that tooling and tests can inspect (or
/// deliberately corrupt) the graph; the methods below uphold the
/// invariants for everyone else.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    /// The recorded instruction stream, in append order.
    pub instructions: Arena<Instruction>,
    /// Nodes of the dependency DAG; empty until built.
    pub nodes: Arena<Node>,
    /// The root collection node, set by a successful build.
    pub root: Option<Handle<Node>>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch pre-populated with an instruction stream.
    pub fn from_instructions<I>(instructions: I) -> Self
    where
        I: IntoIterator<Item = Instruction>,
    {
        Self {
            instructions: instructions.into_iter().collect(),
            nodes: Arena::new(),
            root: None,
        }
    }

    /// Returns `true` once the dependency graph has been built.
    pub fn is_built(&self) -> bool {
        self.root.is_some()
    }

    /// Appends one instruction to the stream.
    ///
    /// # Errors
    ///
    /// [`IrError::BuildFrozen`] when the graph has already been built.
    /// Hazard tracking is not maintained incrementally, so a built batch
    /// no longer accepts instructions. The arena is unchanged on failure.
    pub fn append(&mut self, instruction: Instruction) -> Result<Handle<Instruction>, IrError> {
        if self.root.is_some() {
            return Err(IrError::BuildFrozen);
        }
        self.instructions
            .try_append(instruction)
            .ok_or(IrError::ArenaFull)
    }

    /// Appends every instruction in `instructions`, in order.
    pub fn extend<I>(&mut self, instructions: I) -> Result<(), IrError>
    where
        I: IntoIterator<Item = Instruction>,
    {
        for instruction in instructions {
            self.append(instruction)?;
        }
        Ok(())
    }

    /// Drops every node and clears the root, returning the batch to its
    /// pre-build state. Instructions are untouched.
    pub fn clear_nodes(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// Creates a traversal iterator, building the graph first if needed.
    ///
    /// Setting the `LAZR_DISABLE_GRAPH` environment variable suppresses the
    /// build, falling back to emission in recorded order (debug escape
    /// hatch; see [`GraphMode::LinearPassthrough`]).
    pub fn iter(&mut self) -> Result<GraphIterator<'_>, IrError> {
        let mode = if std::env::var_os("LAZR_DISABLE_GRAPH").is_some() {
            GraphMode::LinearPassthrough
        } else {
            GraphMode::BuildAndSchedule
        };
        self.iter_with_mode(mode)
    }

    /// Creates a traversal iterator with an explicit [`GraphMode`].
    pub fn iter_with_mode(&mut self, mode: GraphMode) -> Result<GraphIterator<'_>, IrError> {
        if mode == GraphMode::BuildAndSchedule {
            self.build()?;
        }
        Ok(GraphIterator::new(self))
    }

    /// Copies the scheduled instruction stream into `out`.
    ///
    /// Builds the graph if needed (instruction content is never mutated),
    /// drives a fresh traversal, and returns the number of instructions
    /// emitted.
    ///
    /// # Errors
    ///
    /// [`IrError::BufferTooSmall`] when `out` cannot hold the stream; the
    /// error carries the required length so the caller can grow the buffer
    /// and retry. Build and traversal errors propagate unchanged.
    pub fn serialize(&mut self, out: &mut [Instruction]) -> Result<usize, IrError> {
        self.build()?;

        let mut iter = GraphIterator::new(&*self);
        let mut count = 0;
        while let Some(instruction) = iter.next_instruction()? {
            if count < out.len() {
                out[count] = instruction.clone();
            }
            count += 1;
        }

        if count > out.len() {
            return Err(IrError::BufferTooSmall {
                needed: count,
                capacity: out.len(),
            });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: u64) -> Operand {
        Operand::View(View::contiguous(Base(id), 8))
    }

    fn fill(out: u64, value: f64) -> Instruction {
        Instruction::op(
            Opcode::Fill,
            vec![view(out), Operand::Constant(Constant::F64(value))],
        )
    }

    #[test]
    fn append_then_build_freezes() {
        let mut batch = Batch::new();
        batch.append(fill(0, 1.0)).unwrap();
        batch.append(fill(1, 2.0)).unwrap();
        assert!(!batch.is_built());

        batch.build().unwrap();
        assert!(batch.is_built());

        let err = batch.append(fill(2, 3.0)).unwrap_err();
        assert!(matches!(err, IrError::BuildFrozen));
        assert_eq!(batch.instructions.len(), 2, "failed append must not grow");
    }

    #[test]
    fn extend_appends_in_order() {
        let mut batch = Batch::new();
        batch.extend([fill(0, 1.0), fill(1, 2.0), fill(2, 3.0)]).unwrap();
        assert_eq!(batch.instructions.len(), 3);
    }

    #[test]
    fn clear_nodes_reopens_the_batch() {
        let mut batch = Batch::from_instructions([fill(0, 1.0)]);
        batch.build().unwrap();
        batch.clear_nodes();
        assert!(!batch.is_built());
        assert!(batch.nodes.is_empty());
        assert!(batch.append(fill(1, 2.0)).is_ok());
    }

    #[test]
    fn serialize_counts_past_capacity() {
        let mut batch = Batch::from_instructions([fill(0, 1.0), fill(1, 2.0), fill(2, 3.0)]);
        let mut small = vec![fill(9, 9.9); 1];
        let err = batch.serialize(&mut small).unwrap_err();
        assert!(matches!(
            err,
            IrError::BufferTooSmall {
                needed: 3,
                capacity: 1
            }
        ));

        let mut big = vec![fill(9, 9.9); 8];
        let count = batch.serialize(&mut big).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn serialize_exact_fit() {
        let mut batch = Batch::from_instructions([fill(0, 1.0), fill(1, 2.0)]);
        let mut out = vec![fill(9, 9.9); 2];
        assert_eq!(batch.serialize(&mut out).unwrap(), 2);
    }

    #[test]
    fn empty_batch_serializes_to_nothing() {
        let mut batch = Batch::new();
        let mut out: Vec<Instruction> = Vec::new();
        assert_eq!(batch.serialize(&mut out).unwrap(), 0);
    }
}
