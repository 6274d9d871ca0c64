//! Instructions — recorded array operations.

use std::fmt;

use crate::error::IrError;
use crate::types::{Base, Constant, View};

/// The operation an instruction performs.
///
/// Operand slot 0 is always the output; the opcode's [`arity`](Self::arity)
/// determines how many input slots follow.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Opcode {
    // Element-wise binary
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Maximum,
    Minimum,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LogicalAnd,
    LogicalOr,
    LeftShift,
    RightShift,
    Arctan2,
    // Element-wise unary
    Identity,
    Negate,
    Invert,
    Absolute,
    Sqrt,
    Exp,
    Exp2,
    Log,
    Log2,
    Log10,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Arcsin,
    Arccos,
    Arctan,
    Floor,
    Ceil,
    Trunc,
    // Reductions (output, input, axis constant)
    AddReduce,
    MultiplyReduce,
    MaximumReduce,
    MinimumReduce,
    // Generators
    Fill,
    Range,
    Random,
    // Lifecycle
    Free,
    Discard,
    Sync,
    /// No-op marker; carries no operands.
    Nop,
}

impl Opcode {
    /// Total operand count for this opcode, output slot included.
    pub fn arity(self) -> usize {
        use Opcode::*;
        match self {
            Add | Subtract | Multiply | Divide | Modulo | Power | Maximum | Minimum | Equal
            | NotEqual | Less | LessEqual | Greater | GreaterEqual | BitwiseAnd | BitwiseOr
            | BitwiseXor | LogicalAnd | LogicalOr | LeftShift | RightShift | Arctan2 => 3,
            AddReduce | MultiplyReduce | MaximumReduce | MinimumReduce => 3,
            Identity | Negate | Invert | Absolute | Sqrt | Exp | Exp2 | Log | Log2 | Log10
            | Sin | Cos | Tan | Sinh | Cosh | Tanh | Arcsin | Arccos | Arctan | Floor | Ceil
            | Trunc | Fill => 2,
            Range | Random | Free | Discard | Sync => 1,
            Nop => 0,
        }
    }

    /// Returns `true` for the lifecycle opcodes that release storage.
    ///
    /// These are rendered dashed in graph dumps.
    pub fn releases_storage(self) -> bool {
        matches!(self, Self::Free | Self::Discard)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Modulo => "modulo",
            Self::Power => "power",
            Self::Maximum => "maximum",
            Self::Minimum => "minimum",
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
            Self::Less => "less",
            Self::LessEqual => "less_equal",
            Self::Greater => "greater",
            Self::GreaterEqual => "greater_equal",
            Self::BitwiseAnd => "bitwise_and",
            Self::BitwiseOr => "bitwise_or",
            Self::BitwiseXor => "bitwise_xor",
            Self::LogicalAnd => "logical_and",
            Self::LogicalOr => "logical_or",
            Self::LeftShift => "left_shift",
            Self::RightShift => "right_shift",
            Self::Arctan2 => "arctan2",
            Self::Identity => "identity",
            Self::Negate => "negate",
            Self::Invert => "invert",
            Self::Absolute => "absolute",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Exp2 => "exp2",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Log10 => "log10",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Arcsin => "arcsin",
            Self::Arccos => "arccos",
            Self::Arctan => "arctan",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Trunc => "trunc",
            Self::AddReduce => "add_reduce",
            Self::MultiplyReduce => "multiply_reduce",
            Self::MaximumReduce => "maximum_reduce",
            Self::MinimumReduce => "minimum_reduce",
            Self::Fill => "fill",
            Self::Range => "range",
            Self::Random => "random",
            Self::Free => "free",
            Self::Discard => "discard",
            Self::Sync => "sync",
            Self::Nop => "nop",
        })
    }
}

/// A filled operand slot: either a view into a base or an inline literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    View(View),
    Constant(Constant),
}

impl Operand {
    /// The base behind this operand, or `None` for a constant.
    pub fn base(&self) -> Option<Base> {
        match self {
            Self::View(view) => Some(view.base),
            Self::Constant(_) => None,
        }
    }

    /// The view behind this operand, or `None` for a constant.
    pub fn view(&self) -> Option<&View> {
        match self {
            Self::View(view) => Some(view),
            Self::Constant(_) => None,
        }
    }
}

/// A user-supplied kernel treated as a single instruction.
///
/// `operands` holds the `nout` output slots followed by the `nin` input
/// slots. The graph builder only accepts `nout == 1` and `nin <= 2`; a
/// kernel with a wider signature has to be recorded as several
/// instructions by the front end.
#[derive(Clone, Debug, PartialEq)]
pub struct UserFunc {
    /// Front-end identifier for the kernel body.
    pub id: u64,
    /// Number of output operands.
    pub nout: usize,
    /// Number of input operands.
    pub nin: usize,
    /// Output slots, then input slots.
    pub operands: Vec<Operand>,
}

/// One recorded array operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// A built-in operation; `operands.len()` matches the opcode's arity.
    Op {
        opcode: Opcode,
        operands: Vec<Operand>,
    },
    /// A user-supplied kernel.
    UserFunc(UserFunc),
}

/// The uniform decode of an instruction's operand slots.
///
/// `output` is the base written by slot 0; `left`/`right` are the bases
/// read by slots 1 and 2. A `None` entry means the slot is absent or holds
/// a constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperandBases {
    pub nops: usize,
    pub output: Option<Base>,
    pub left: Option<Base>,
    pub right: Option<Base>,
}

impl Instruction {
    /// Shorthand for a built-in operation.
    pub fn op(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self::Op { opcode, operands }
    }

    /// Display name used in dumps and diagnostics.
    pub fn name(&self) -> String {
        match self {
            Self::Op { opcode, .. } => opcode.to_string(),
            Self::UserFunc(uf) => format!("userfunc#{}", uf.id),
        }
    }

    /// Decodes the operand slots into the uniform `(output, left, right)`
    /// triple consumed by the graph builder.
    ///
    /// # Errors
    ///
    /// Fails with [`IrError::MalformedUserFunc`] when a user function has
    /// more than one output or more than two inputs.
    pub fn operand_bases(&self) -> Result<OperandBases, IrError> {
        let (nops, operands) = match self {
            Self::Op { opcode, operands } => (opcode.arity(), operands.as_slice()),
            Self::UserFunc(uf) => {
                if uf.nout != 1 || uf.nin > 2 {
                    return Err(IrError::MalformedUserFunc {
                        nout: uf.nout,
                        nin: uf.nin,
                    });
                }
                (uf.nout + uf.nin, uf.operands.as_slice())
            }
        };

        let base_at = |slot: usize| operands.get(slot).and_then(Operand::base);

        Ok(OperandBases {
            nops,
            output: if nops >= 1 { base_at(0) } else { None },
            left: if nops >= 2 { base_at(1) } else { None },
            right: if nops >= 3 { base_at(2) } else { None },
        })
    }
}
