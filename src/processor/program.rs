use tracing::debug;

use crate::party::error::{MpcError, MpcResult};
use crate::prep::{DataKind, DataPositions};

use super::Processor;

/// Where an input instruction reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// the inputting party
    pub player: usize,
    pub n_bits: usize,
    /// first share register, one register per chunk
    pub dest: usize,
    /// read from the prompt rather than from the prepared inputs
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Private binary inputs, all in one exchange.
    InputB(Vec<InputSpec>),
    /// `S[dest] = value` for a public value of `n_bits` bits.
    LoadClear { dest: usize, n_bits: usize, value: i128 },
    /// Opens `n_bits` bits from `S[src..]` into `C[dest..]` for every `(n_bits, dest, src)`, in one
    /// batch. Values wider than `default_length` span consecutive registers, lowest chunk first.
    Reveal(Vec<(usize, usize, usize)>),
    Xor { dest: usize, a: usize, b: usize },
    /// `S[dest] = S[a] & S[b]` for every triple `(dest, a, b)`, in one batch.
    And(Vec<(usize, usize, usize)>),
    Shl { dest: usize, src: usize, n: usize },
    Shr { dest: usize, src: usize, n: usize },
    /// Transposes the words `src` into `dest.len()` words.
    Trans { dest: Vec<usize>, src: Vec<usize> },
    BitCom { dest: usize, src: Vec<usize> },
    BitDec { dest: Vec<usize>, src: usize },
    /// A random shared bit from the preprocessing material.
    RandomBit { dest: usize },
    /// Runs `body` as often as the clear register `count` says.
    Repeat { count: usize, body: Vec<Instruction> },
}

impl Instruction {
    /// Adds the material this instruction consumes, `false` if that is only known at run time.
    fn add_usage(&self, usage: &mut DataPositions) -> bool {
        match self {
            Instruction::And(gates) => {
                usage.increase(DataKind::Triple, gates.len());
                true
            }
            Instruction::RandomBit { .. } => {
                usage.increase(DataKind::Bit, 1);
                true
            }
            Instruction::Repeat { .. } => false,
            _ => true,
        }
    }
}

/// A program the worker threads can run.
pub trait Program: Send + Sync {
    fn name(&self) -> &str;

    /// If the material the program consumes depends on values computed at run time.
    fn usage_unknown(&self) -> bool;

    /// The material one run consumes, meaningless if [Program::usage_unknown].
    fn static_usage(&self) -> DataPositions;

    /// Rejects a program that cannot run among `n_parties` before it touches any material.
    fn validate(&self, _n_parties: usize) -> MpcResult<()> {
        Ok(())
    }

    fn execute(&self, processor: &mut Processor<'_>) -> MpcResult<()>;
}

/// A program given as a list of instructions.
#[derive(Debug, Clone)]
pub struct InstructionProgram {
    name: String,
    instructions: Vec<Instruction>,
    usage: Option<DataPositions>,
}

impl InstructionProgram {
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        let mut usage = DataPositions::new();
        let known = instructions.iter().all(|ins| ins.add_usage(&mut usage));
        Self { name: name.into(), instructions, usage: known.then_some(usage) }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl Program for InstructionProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage_unknown(&self) -> bool {
        self.usage.is_none()
    }

    fn static_usage(&self) -> DataPositions {
        self.usage.clone().unwrap_or_default()
    }

    fn validate(&self, n_parties: usize) -> MpcResult<()> {
        validate(&self.instructions, n_parties)
    }

    fn execute(&self, processor: &mut Processor<'_>) -> MpcResult<()> {
        debug!(program = %self.name, "executing");
        processor.run(&self.instructions)
    }
}

/// Checks register indices before a program is dispatched.
pub fn validate(instructions: &[Instruction], n_parties: usize) -> MpcResult<()> {
    for ins in instructions {
        match ins {
            Instruction::InputB(specs) => {
                if let Some(spec) = specs.iter().find(|s| s.player >= n_parties) {
                    return Err(MpcError::InvalidParameters(format!("input from unknown party {}", spec.player)));
                }
            }
            Instruction::Trans { dest, src } if dest.len() > 64 || src.len() > 64 => {
                return Err(MpcError::InvalidParameters("transpositions are limited to 64x64 blocks".to_string()));
            }
            Instruction::BitCom { src, .. } if src.len() > 64 => {
                return Err(MpcError::InvalidParameters("cannot compose more than 64 bits".to_string()));
            }
            Instruction::BitDec { dest, .. } if dest.len() > 64 => {
                return Err(MpcError::InvalidParameters("cannot decompose into more than 64 bits".to_string()));
            }
            Instruction::Repeat { body, .. } => validate(body, n_parties)?,
            _ => (),
        }
    }
    Ok(())
}
