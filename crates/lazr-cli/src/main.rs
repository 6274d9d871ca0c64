use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use lazr_ir::{
    dump, Base, Batch, Constant, GraphMode, Instruction, Opcode, Operand, UserFunc, View,
};

/// lazr — array-runtime batch inspector
///
/// Reads a line-oriented operation trace, builds the dependency graph, and
/// prints the scheduled instruction order or DOT renderings of the batch.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input trace file
    input: PathBuf,

    /// Element count of the 1-D view given to every named operand
    #[arg(long, default_value_t = 1024)]
    length: i64,

    /// Write a DOT rendering of the raw instruction list
    #[arg(long)]
    dot_instructions: Option<PathBuf>,

    /// Write a DOT rendering of the built dependency graph
    #[arg(long)]
    dot_graph: Option<PathBuf>,

    /// Emit instructions in recorded order instead of scheduling
    #[arg(long)]
    linear: bool,

    /// Suppress the schedule listing (useful with the --dot-* flags)
    #[arg(short, long)]
    quiet: bool,
}

/// Errors from the trace reader.
#[derive(Debug, thiserror::Error)]
enum TraceError {
    #[error("line {line}: unknown operation '{op}'")]
    UnknownOp { line: usize, op: String },

    #[error("line {line}: '{op}' takes {expected} operands, found {found}")]
    OperandCount {
        line: usize,
        op: String,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: user functions need an id and 1-3 operands")]
    MalformedUserFunc { line: usize },
}

/// Interns operand names to bases and assembles instructions.
struct TraceReader {
    bases: HashMap<String, Base>,
    next_base: u64,
    length: i64,
}

impl TraceReader {
    fn new(length: i64) -> Self {
        Self {
            bases: HashMap::new(),
            next_base: 0,
            length,
        }
    }

    /// A numeric token is an inline constant; anything else names a base.
    fn operand(&mut self, token: &str) -> Operand {
        if let Ok(value) = token.parse::<f64>() {
            return Operand::Constant(Constant::F64(value));
        }
        let base = match self.bases.get(token) {
            Some(&base) => base,
            None => {
                let base = Base(self.next_base);
                self.next_base += 1;
                self.bases.insert(token.to_string(), base);
                base
            }
        };
        Operand::View(View::contiguous(base, self.length))
    }

    fn parse(&mut self, source: &str) -> Result<Vec<Instruction>, TraceError> {
        let mut instructions = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let text = raw.split('#').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }

            let mut tokens = text.split_whitespace();
            let op = tokens.next().expect("non-empty line");
            let args: Vec<&str> = tokens.collect();

            if op.eq_ignore_ascii_case("userfunc") {
                let (id, operands) = args.split_first().ok_or(TraceError::MalformedUserFunc {
                    line,
                })?;
                let id: u64 = id
                    .parse()
                    .map_err(|_| TraceError::MalformedUserFunc { line })?;
                if operands.is_empty() || operands.len() > 3 {
                    return Err(TraceError::MalformedUserFunc { line });
                }
                let operands: Vec<Operand> =
                    operands.iter().map(|t| self.operand(t)).collect();
                instructions.push(Instruction::UserFunc(UserFunc {
                    id,
                    nout: 1,
                    nin: operands.len() - 1,
                    operands,
                }));
                continue;
            }

            let opcode = parse_opcode(op).ok_or_else(|| TraceError::UnknownOp {
                line,
                op: op.to_string(),
            })?;
            if args.len() != opcode.arity() {
                return Err(TraceError::OperandCount {
                    line,
                    op: op.to_string(),
                    expected: opcode.arity(),
                    found: args.len(),
                });
            }
            let operands = args.iter().map(|t| self.operand(t)).collect();
            instructions.push(Instruction::op(opcode, operands));
        }

        Ok(instructions)
    }
}

fn parse_opcode(name: &str) -> Option<Opcode> {
    Some(match name.to_ascii_lowercase().as_str() {
        "add" => Opcode::Add,
        "sub" | "subtract" => Opcode::Subtract,
        "mul" | "multiply" => Opcode::Multiply,
        "div" | "divide" => Opcode::Divide,
        "mod" | "modulo" => Opcode::Modulo,
        "pow" | "power" => Opcode::Power,
        "max" | "maximum" => Opcode::Maximum,
        "min" | "minimum" => Opcode::Minimum,
        "eq" | "equal" => Opcode::Equal,
        "ne" | "not_equal" => Opcode::NotEqual,
        "lt" | "less" => Opcode::Less,
        "le" | "less_equal" => Opcode::LessEqual,
        "gt" | "greater" => Opcode::Greater,
        "ge" | "greater_equal" => Opcode::GreaterEqual,
        "and" | "bitwise_and" => Opcode::BitwiseAnd,
        "or" | "bitwise_or" => Opcode::BitwiseOr,
        "xor" | "bitwise_xor" => Opcode::BitwiseXor,
        "copy" | "identity" => Opcode::Identity,
        "neg" | "negate" => Opcode::Negate,
        "abs" | "absolute" => Opcode::Absolute,
        "sqrt" => Opcode::Sqrt,
        "exp" => Opcode::Exp,
        "log" => Opcode::Log,
        "sin" => Opcode::Sin,
        "cos" => Opcode::Cos,
        "tan" => Opcode::Tan,
        "floor" => Opcode::Floor,
        "ceil" => Opcode::Ceil,
        "add_reduce" => Opcode::AddReduce,
        "mul_reduce" | "multiply_reduce" => Opcode::MultiplyReduce,
        "max_reduce" | "maximum_reduce" => Opcode::MaximumReduce,
        "min_reduce" | "minimum_reduce" => Opcode::MinimumReduce,
        "fill" => Opcode::Fill,
        "range" => Opcode::Range,
        "random" => Opcode::Random,
        "free" => Opcode::Free,
        "discard" => Opcode::Discard,
        "sync" => Opcode::Sync,
        "nop" => Opcode::Nop,
        _ => return None,
    })
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    let mut reader = TraceReader::new(cli.length);
    let instructions = reader
        .parse(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("trace parse failed")?;
    log::debug!(
        "parsed {} instructions over {} bases",
        instructions.len(),
        reader.bases.len()
    );

    let mut batch = Batch::from_instructions(instructions);
    let mode = if cli.linear {
        GraphMode::LinearPassthrough
    } else {
        batch
            .build()
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("graph build failed")?;
        GraphMode::BuildAndSchedule
    };

    if let Some(path) = &cli.dot_instructions {
        std::fs::write(path, dump::instruction_graph_dot(&batch))
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    }
    if let Some(path) = &cli.dot_graph {
        std::fs::write(path, dump::node_graph_dot(&batch))
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
    }

    if !cli.quiet {
        let mut it = batch
            .iter_with_mode(mode)
            .map_err(|e| miette::miette!("{e}"))?;
        loop {
            match it.next_instruction() {
                Ok(Some(instruction)) => println!("{}", instruction.name()),
                Ok(None) => break,
                Err(e) => return Err(miette::miette!("{e}")).wrap_err("traversal failed"),
            }
        }
    }

    Ok(())
}
