//! Executes programs on the share and clear registers of one worker.
mod program;

pub use program::{validate, InputSpec, Instruction, InstructionProgram, Program};

use tracing::trace;

use crate::input::{chunk_widths, split_input, InputSource, ReplicatedInput, MAX_INPUT_BITS};
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::prep::jobs::BinaryOpener;
use crate::prep::DataFiles;
use crate::protocol::beaver::beaver_mul;
use crate::protocol::MulTripleVector;
use crate::share::bits::{bitcom, bitdec, load_clear, mask, shl, shr, trans};
use crate::share::{BitVec, HasZero, RssShare, SchemeDescriptor};

/// The state a program runs against.
///
/// Registers are allocated on first write, reading a register that was never written yields zero.
pub struct Processor<'a> {
    pub session: &'a mut Session,
    opener: &'a mut BinaryOpener,
    files: &'a mut DataFiles,
    inputs: &'a mut dyn InputSource,
    prompt: &'a mut dyn InputSource,
    input: ReplicatedInput<BitVec>,
    scheme: SchemeDescriptor,
    s: Vec<RssShare<BitVec>>,
    c: Vec<BitVec>,
}

impl<'a> Processor<'a> {
    pub fn new(
        session: &'a mut Session,
        opener: &'a mut BinaryOpener,
        files: &'a mut DataFiles,
        inputs: &'a mut dyn InputSource,
        prompt: &'a mut dyn InputSource,
        scheme: SchemeDescriptor,
    ) -> Self {
        let input = ReplicatedInput::new(session.num_players());
        Self { session, opener, files, inputs, prompt, input, scheme, s: Vec::new(), c: Vec::new() }
    }

    /// Starts from the given clear registers, e.g. loop bounds set by the caller.
    pub fn with_clear(mut self, clear: Vec<BitVec>) -> Self {
        self.c = clear;
        self
    }

    pub fn share(&self, r: usize) -> RssShare<BitVec> {
        self.s.get(r).copied().unwrap_or(RssShare::ZERO)
    }

    pub fn clear(&self, r: usize) -> BitVec {
        self.c.get(r).copied().unwrap_or(BitVec::ZERO)
    }

    pub fn set_share(&mut self, r: usize, value: RssShare<BitVec>) {
        if r >= self.s.len() {
            self.s.resize(r + 1, RssShare::ZERO);
        }
        self.s[r] = value;
    }

    pub fn set_clear(&mut self, r: usize, value: BitVec) {
        if r >= self.c.len() {
            self.c.resize(r + 1, BitVec::ZERO);
        }
        self.c[r] = value;
    }

    pub fn into_clear(self) -> Vec<BitVec> {
        self.c
    }

    pub fn files(&mut self) -> &mut DataFiles {
        self.files
    }

    pub fn run(&mut self, instructions: &[Instruction]) -> MpcResult<()> {
        for ins in instructions {
            trace!(?ins, "step");
            self.step(ins)?;
        }
        Ok(())
    }

    fn step(&mut self, ins: &Instruction) -> MpcResult<()> {
        match ins {
            Instruction::InputB(specs) => self.input_b(specs),
            Instruction::LoadClear { dest, n_bits, value } => {
                let share = load_clear(self.session.i, *n_bits, *value)?;
                self.set_share(*dest, share);
                Ok(())
            }
            Instruction::Reveal(reveals) => self.reveal(reveals),
            Instruction::Xor { dest, a, b } => {
                let sum = self.share(*a) + self.share(*b);
                self.set_share(*dest, sum);
                Ok(())
            }
            Instruction::And(gates) => self.and(gates),
            Instruction::Shl { dest, src, n } => {
                self.set_share(*dest, shl(self.share(*src), *n));
                Ok(())
            }
            Instruction::Shr { dest, src, n } => {
                self.set_share(*dest, shr(self.share(*src), *n));
                Ok(())
            }
            Instruction::Trans { dest, src } => {
                let rows: Vec<_> = src.iter().map(|r| self.share(*r)).collect();
                for (r, col) in dest.iter().zip(trans(&rows, dest.len())?) {
                    self.set_share(*r, col);
                }
                Ok(())
            }
            Instruction::BitCom { dest, src } => {
                let bits: Vec<_> = src.iter().map(|r| self.share(*r)).collect();
                self.set_share(*dest, bitcom(&bits));
                Ok(())
            }
            Instruction::BitDec { dest, src } => {
                for (r, bit) in dest.iter().zip(bitdec(self.share(*src), dest.len())) {
                    self.set_share(*r, bit);
                }
                Ok(())
            }
            Instruction::RandomBit { dest } => {
                let bit = self.files.get_bits(1)?;
                self.set_share(*dest, bit[0]);
                Ok(())
            }
            Instruction::Repeat { count, body } => {
                for _ in 0..self.clear(*count).as_u64() {
                    self.run(body)?;
                }
                Ok(())
            }
        }
    }

    fn and(&mut self, gates: &[(usize, usize, usize)]) -> MpcResult<()> {
        let x: Vec<_> = gates.iter().map(|(_, a, _)| self.share(*a)).collect();
        let y: Vec<_> = gates.iter().map(|(_, _, b)| self.share(*b)).collect();
        let triples = self.files.get_triples(gates.len())?;
        let z = beaver_mul(self.session, &mut *self.opener, &x, &y, &MulTripleVector::from(&triples[..]))?;
        for ((dest, _, _), z) in gates.iter().zip(z) {
            self.set_share(*dest, z);
        }
        Ok(())
    }

    /// Opens all values of one instruction in a single batch, each chunk masked to its width.
    fn reveal(&mut self, reveals: &[(usize, usize, usize)]) -> MpcResult<()> {
        let default_length = self.scheme.default_length;
        let mut targets = Vec::new();
        let mut shares = Vec::new();
        for (n_bits, dest, src) in reveals {
            for (k, width) in chunk_widths(*n_bits, default_length).into_iter().enumerate() {
                targets.push((dest + k, width));
                shares.push(self.share(src + k));
            }
        }
        let values = self.opener.popen(self.session, &shares)?;
        for ((dest, width), v) in targets.into_iter().zip(values) {
            self.set_clear(dest, v.mask(width));
        }
        Ok(())
    }

    /// Shares all inputs of one instruction in a single exchange.
    ///
    /// Inputs from the prepared source are read before the interactive ones, which are
    /// acknowledged once at the end. An input of more than `default_length` bits occupies
    /// consecutive registers starting at its destination, lowest chunk first.
    fn input_b(&mut self, specs: &[InputSpec]) -> MpcResult<()> {
        if let Some(spec) = specs.iter().find(|s| s.n_bits == 0 || s.n_bits > MAX_INPUT_BITS) {
            return Err(MpcError::InvalidParameters(format!("cannot input {} bits", spec.n_bits)));
        }
        let me = self.session.i;
        let default_length = self.scheme.default_length;
        let ordered: Vec<&InputSpec> = specs
            .iter()
            .filter(|s| !s.interactive)
            .chain(specs.iter().filter(|s| s.interactive))
            .collect();

        self.input.reset_all();
        let mut prompted = false;
        for spec in &ordered {
            if spec.player == me {
                let value = if spec.interactive {
                    prompted = true;
                    self.prompt.next_input(spec.n_bits)?
                } else {
                    self.inputs.next_input(spec.n_bits)?
                };
                for (chunk, _) in split_input(value, spec.n_bits, default_length)? {
                    self.input.add_mine(chunk);
                }
            } else {
                for _ in chunk_widths(spec.n_bits, default_length) {
                    self.input.add_other(spec.player);
                }
            }
        }
        if prompted {
            self.prompt.acknowledge()?;
        }
        self.input.exchange(self.session)?;

        for spec in ordered {
            for (k, width) in chunk_widths(spec.n_bits, default_length).into_iter().enumerate() {
                let share = self.input.finalize(spec.player)?;
                self.set_share(spec.dest + k, mask(share, width));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;

    use crate::input::{PromptInputSource, VecInputSource};
    use crate::open::{Messaging, ReplicatedMC};
    use crate::party::error::MpcError;
    use crate::party::test_export::simple_local_setup;
    use crate::party::Session;
    use crate::prep::jobs::triples;
    use crate::prep::{DataFiles, DataKind, MaterialStore};
    use crate::protocol::{Multiplier, SecurityModel};
    use crate::share::{BitVec, SchemeDescriptor};

    use super::{InputSpec, Instruction, InstructionProgram, Processor, Program};

    fn input(player: usize, n_bits: usize, dest: usize) -> InputSpec {
        InputSpec { player, n_bits, dest, interactive: false }
    }

    fn run(
        p: &mut Session,
        program: &InstructionProgram,
        inputs: Vec<i128>,
        n_triples: usize,
        default_length: usize,
    ) -> (Result<Vec<BitVec>, MpcError>, DataFiles) {
        let store = Arc::new(MaterialStore::new());
        if n_triples > 0 {
            let mut mult = Multiplier::new(SecurityModel::SemiHonest);
            store.append(DataKind::Triple, triples(p, &mut mult, n_triples).unwrap()).unwrap();
        }
        let mut files = DataFiles::new(store);
        let mut opener = ReplicatedMC::new(Messaging::direct());
        let mut inputs = VecInputSource::new(inputs);
        let mut prompt = VecInputSource::default();
        let scheme = SchemeDescriptor::replicated(default_length).unwrap();
        let mut processor = Processor::new(p, &mut opener, &mut files, &mut inputs, &mut prompt, scheme);
        let res = program.execute(&mut processor).map(|_| processor.into_clear());
        (res, files)
    }

    #[test]
    fn and_of_lowest_input_bits() {
        let program = InstructionProgram::new(
            "and",
            vec![
                Instruction::InputB(vec![input(0, 4, 0), input(1, 4, 1)]),
                Instruction::BitDec { dest: (2..6).collect(), src: 0 },
                Instruction::BitDec { dest: (6..10).collect(), src: 1 },
                Instruction::And(vec![(10, 2, 6)]),
                Instruction::Reveal(vec![(1, 0, 10), (4, 1, 0), (4, 2, 1)]),
            ],
        );
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mine = match p.i {
                0 => vec![5],
                1 => vec![3],
                _ => vec![],
            };
            let (res, files) = run(p, &program, mine, 1, 64);
            assert_eq!(files.get_usage().get(DataKind::Triple), 1);
            res.unwrap()
        });
        for clear in [r1, r2, r3] {
            assert_eq!(clear, vec![BitVec(1), BitVec(5), BitVec(3)]);
        }
    }

    #[test]
    fn wide_inputs_fill_consecutive_registers() {
        let value: i128 = (0xabcd << 64) | 0x1234_5678_9abc_def0;
        let program = InstructionProgram::new(
            "wide",
            vec![
                Instruction::InputB(vec![input(2, 80, 4)]),
                Instruction::Reveal(vec![(80, 0, 4)]),
            ],
        );
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mine = if p.i == 2 { vec![value] } else { vec![] };
            run(p, &program, mine, 0, 64).0.unwrap()
        });
        for clear in [r1, r2, r3] {
            assert_eq!(clear, vec![BitVec(0x1234_5678_9abc_def0), BitVec(0xabcd)]);
        }
    }

    #[test]
    fn wide_reveals_are_chunked_and_masked() {
        let value: i128 = (0xabcd << 64) | 0x1234_5678_9abc_def0;
        let program = InstructionProgram::new(
            "reveal",
            vec![
                Instruction::InputB(vec![input(1, 80, 4)]),
                Instruction::LoadClear { dest: 0, n_bits: 64, value: -1 },
                Instruction::Reveal(vec![(80, 0, 4), (8, 3, 0)]),
            ],
        );
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mine = if p.i == 1 { vec![value] } else { vec![] };
            run(p, &program, mine, 0, 32).0.unwrap()
        });
        for clear in [r1, r2, r3] {
            assert_eq!(clear, vec![BitVec(0x9abc_def0), BitVec(0x1234_5678), BitVec(0xabcd), BitVec(0xff)]);
        }
    }

    #[test]
    fn oversized_transposition_fails() {
        let program = InstructionProgram::new("trans", vec![Instruction::Trans { dest: (0..65).collect(), src: vec![0] }]);
        let (r1, r2, r3) = simple_local_setup(|p| run(p, &program, vec![], 0, 64).0);
        for r in [r1, r2, r3] {
            assert!(matches!(r, Err(MpcError::InvalidParameters(_))));
        }
    }

    #[test]
    fn local_instructions() {
        let program = InstructionProgram::new(
            "local",
            vec![
                Instruction::LoadClear { dest: 0, n_bits: 8, value: 0b1011 },
                Instruction::Shl { dest: 1, src: 0, n: 4 },
                Instruction::Shr { dest: 2, src: 0, n: 1 },
                Instruction::Xor { dest: 3, a: 0, b: 1 },
                Instruction::BitDec { dest: (10..14).collect(), src: 0 },
                Instruction::BitCom { dest: 4, src: vec![13, 12, 11, 10] },
                Instruction::Trans { dest: vec![20, 21], src: vec![0, 0, 2] },
                Instruction::Reveal(vec![(64, 0, 1), (64, 1, 2), (64, 2, 3), (64, 3, 4), (64, 4, 20), (64, 5, 21)]),
            ],
        );
        let (r1, r2, r3) = simple_local_setup(|p| run(p, &program, vec![], 0, 64).0.unwrap());
        for clear in [r1, r2, r3] {
            assert_eq!(
                clear,
                vec![
                    BitVec(0b1011_0000),
                    BitVec(0b101),
                    BitVec(0b1011_1011),
                    BitVec(0b1101),
                    BitVec(0b111),
                    BitVec(0b011),
                ]
            );
        }
    }

    #[test]
    fn repeat_uses_clear_count() {
        let program = InstructionProgram::new(
            "loop",
            vec![
                Instruction::LoadClear { dest: 0, n_bits: 8, value: 1 },
                Instruction::LoadClear { dest: 1, n_bits: 8, value: 1 },
                Instruction::Repeat { count: 0, body: vec![Instruction::Xor { dest: 1, a: 1, b: 0 }] },
                Instruction::Reveal(vec![(64, 1, 1)]),
            ],
        );
        assert!(program.usage_unknown());
        let (r1, _, _) = simple_local_setup(|p| {
            let store = Arc::new(MaterialStore::new());
            let mut files = DataFiles::new(store);
            let mut opener = ReplicatedMC::new(Messaging::direct());
            let mut inputs = VecInputSource::default();
            let mut prompt = VecInputSource::default();
            let scheme = SchemeDescriptor::replicated(64).unwrap();
            let mut processor = Processor::new(p, &mut opener, &mut files, &mut inputs, &mut prompt, scheme)
                .with_clear(vec![BitVec(3)]);
            program.execute(&mut processor).unwrap();
            processor.into_clear()
        });
        // three toggles of 1 by 1
        assert_eq!(r1[1], BitVec(0));
    }

    #[test]
    fn missing_triples_fail() {
        let program = InstructionProgram::new("and", vec![Instruction::And(vec![(0, 0, 0), (1, 1, 1)])]);
        let (r1, r2, r3) = simple_local_setup(|p| run(p, &program, vec![], 1, 64).0);
        for r in [r1, r2, r3] {
            assert!(matches!(r, Err(MpcError::InsufficientPreprocessing { .. })));
        }
    }

    #[test]
    fn interactive_inputs_are_acknowledged() {
        let program = InstructionProgram::new(
            "prompt",
            vec![
                Instruction::InputB(vec![
                    InputSpec { player: 0, n_bits: 8, dest: 0, interactive: true },
                    input(0, 8, 1),
                ]),
                Instruction::Reveal(vec![(8, 0, 0), (8, 1, 1)]),
            ],
        );
        let (r1, r2, _) = simple_local_setup(|p| {
            let store = Arc::new(MaterialStore::new());
            let mut files = DataFiles::new(store);
            let mut opener = ReplicatedMC::new(Messaging::direct());
            let mut inputs = VecInputSource::new(if p.i == 0 { vec![7] } else { vec![] });
            let mut out = Vec::new();
            let mut prompt = PromptInputSource::new(Cursor::new(b"200\n".to_vec()), &mut out);
            let scheme = SchemeDescriptor::replicated(64).unwrap();
            let mut processor = Processor::new(p, &mut opener, &mut files, &mut inputs, &mut prompt, scheme);
            program.execute(&mut processor).unwrap();
            let clear = processor.into_clear();
            (clear, String::from_utf8(out).unwrap())
        });
        assert_eq!(r1.0, vec![BitVec(200), BitVec(7)]);
        assert_eq!(r2.0, r1.0);
        assert_eq!(r1.1, "Please input 8-bit integer: Thank you\n");
        assert!(r2.1.is_empty());
    }
}
