//! Secret sharing of private inputs and the sources they are read from.
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};

use tracing::debug;

use crate::party::broadcast::Broadcast;
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::share::bits::check_length;
use crate::share::{BitVec, Ring, RssShare};

/// Widest input in bits.
pub const MAX_INPUT_BITS: usize = 128;

/// Splits an input of `n_bits` bits into chunks of at most `default_length` bits, lowest first.
///
/// Returns the chunk values together with their widths. Negative values are taken in two's complement.
pub fn split_input(value: i128, n_bits: usize, default_length: usize) -> MpcResult<Vec<(BitVec, usize)>> {
    if n_bits == 0 || n_bits > MAX_INPUT_BITS {
        return Err(MpcError::InvalidParameters(format!(
            "inputs must have between 1 and {} bits, got {}",
            MAX_INPUT_BITS, n_bits
        )));
    }
    if n_bits < MAX_INPUT_BITS {
        check_length(n_bits, value)?;
    }
    let bits = value as u128;
    Ok(chunk_widths(n_bits, default_length)
        .into_iter()
        .scan(0, |offset, width| {
            let chunk = BitVec((bits >> *offset) as u64).mask(width);
            *offset += width;
            Some((chunk, width))
        })
        .collect())
}

/// Widths of the chunks an input of `n_bits` bits is split into.
pub fn chunk_widths(n_bits: usize, default_length: usize) -> Vec<usize> {
    let n_chunks = n_bits.div_ceil(default_length);
    (0..n_chunks).map(|k| default_length.min(n_bits - k * default_length)).collect()
}

/// Reassembles the chunks of [split_input] into an integer of `n_bits` bits.
pub fn join_chunks(chunks: &[(BitVec, usize)]) -> u128 {
    chunks.iter().rev().fold(0u128, |acc, (chunk, width)| (acc << *width) | chunk.as_u64() as u128)
}

/// Replicated input protocol among three parties over the ring `T`.
///
/// The owner of an input draws two components from the RNGs it shares with its neighbours and sends
/// the third one to both of them. The message is part of the broadcast transcript.
pub struct ReplicatedInput<T> {
    mine: Vec<T>,
    expected: Vec<usize>,
    shares: Vec<VecDeque<RssShare<T>>>,
}

impl<T: Ring> ReplicatedInput<T> {
    pub fn new(n_parties: usize) -> Self {
        Self {
            mine: Vec::new(),
            expected: vec![0; n_parties],
            shares: vec![VecDeque::new(); n_parties],
        }
    }

    pub fn reset_all(&mut self) {
        self.mine.clear();
        self.expected.iter_mut().for_each(|e| *e = 0);
        self.shares.iter_mut().for_each(VecDeque::clear);
    }

    /// Adds one chunk that this party inputs.
    pub fn add_mine(&mut self, chunk: T) {
        self.mine.push(chunk);
    }

    /// Announces one chunk that party `from` inputs.
    pub fn add_other(&mut self, from: usize) {
        self.expected[from] += 1;
    }

    /// Shares all added chunks in one round.
    pub fn exchange(&mut self, session: &mut Session) -> MpcResult<()> {
        if session.num_players() != 3 {
            return Err(MpcError::InvalidParameters("replicated input needs exactly three parties".to_string()));
        }
        let (me, next, prev) = (session.i, session.next(), session.prev());
        self.expected[me] = self.mine.len();
        // draw from the pairwise RNGs in owner order so both ends of every RNG stay in sync
        let mut third = Vec::new();
        let mut drawn: Vec<Vec<T>> = vec![Vec::new(); 3];
        for owner in 0..3 {
            let n = self.expected[owner];
            if owner == me {
                let si = T::generate(session.shared_rng(prev), n);
                let sii = T::generate(session.shared_rng(next), n);
                third = self.mine.iter().zip(si.iter().zip(&sii)).map(|(v, (si, sii))| *v - *si - *sii).collect();
                self.shares[me] = si.into_iter().zip(sii).map(|(si, sii)| RssShare::from(si, sii)).collect();
            } else if owner == prev {
                drawn[owner] = T::generate(session.shared_rng(prev), n);
            } else {
                drawn[owner] = T::generate(session.shared_rng(next), n);
            }
        }
        if !third.is_empty() {
            session.send_broadcast(&T::as_byte_vec_slice(&third))?;
        }
        for owner in (0..3).filter(|o| *o != me && self.expected[*o] > 0) {
            let n = self.expected[owner];
            let msg = session.receive_broadcast(owner)?;
            if msg.len() != T::serialized_size(n) {
                return Err(MpcError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("party {} sent {} bytes of input for {} chunks", owner, msg.len(), n),
                )));
            }
            let received = T::from_byte_vec(msg, n);
            let local = std::mem::take(&mut drawn[owner]);
            self.shares[owner] = if owner == prev {
                // I am the owner's next party and hold (s_{o+1}, s_{o+2})
                local.into_iter().zip(received).map(|(si, sii)| RssShare::from(si, sii)).collect()
            } else {
                // I am the owner's previous party and hold (s_{o+2}, s_o)
                received.into_iter().zip(local).map(|(si, sii)| RssShare::from(si, sii)).collect()
            };
        }
        debug!(party = me, own = self.mine.len(), "input exchanged");
        self.mine.clear();
        self.expected.iter_mut().for_each(|e| *e = 0);
        Ok(())
    }

    /// Takes the next chunk that party `from` input.
    pub fn finalize(&mut self, from: usize) -> MpcResult<RssShare<T>> {
        self.shares
            .get_mut(from)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| MpcError::InvalidParameters(format!("no pending input from party {}", from)))
    }
}

/// Where a party reads its private inputs from.
pub trait InputSource: Send {
    /// Reads the next input of `n_bits` bits.
    fn next_input(&mut self, n_bits: usize) -> MpcResult<i128>;

    /// Called once after all interactive inputs of an instruction were read.
    fn acknowledge(&mut self) -> MpcResult<()> {
        Ok(())
    }
}

/// Inputs given in advance.
#[derive(Clone, Debug, Default)]
pub struct VecInputSource {
    values: VecDeque<i128>,
}

impl VecInputSource {
    pub fn new(values: impl IntoIterator<Item = i128>) -> Self {
        Self { values: values.into_iter().collect() }
    }
}

impl InputSource for VecInputSource {
    fn next_input(&mut self, n_bits: usize) -> MpcResult<i128> {
        self.values
            .pop_front()
            .ok_or_else(|| MpcError::InvalidParameters(format!("no input of {} bits left", n_bits)))
    }
}

/// Inputs typed in at a prompt.
pub struct PromptInputSource<R, W> {
    reader: R,
    writer: W,
}

impl PromptInputSource<BufReader<io::Stdin>, io::Stdout> {
    pub fn stdin() -> Self {
        Self { reader: BufReader::new(io::stdin()), writer: io::stdout() }
    }
}

impl<R: BufRead, W: Write> PromptInputSource<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: BufRead + Send, W: Write + Send> InputSource for PromptInputSource<R, W> {
    fn next_input(&mut self, n_bits: usize) -> MpcResult<i128> {
        write!(self.writer, "Please input {}-bit integer: ", n_bits)?;
        self.writer.flush()?;
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        line.trim().parse().map_err(|_| {
            MpcError::Io(io::Error::new(io::ErrorKind::InvalidInput, format!("'{}' is not an integer", line.trim())))
        })
    }

    fn acknowledge(&mut self) -> MpcResult<()> {
        writeln!(self.writer, "Thank you")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use itertools::izip;

    use crate::party::error::MpcError;
    use crate::party::test_export::simple_local_setup;
    use crate::share::bits::mask;
    use crate::share::test::{assert_eq, consistent};
    use crate::share::{BitVec, Z64};

    use super::{chunk_widths, join_chunks, split_input, InputSource, PromptInputSource, ReplicatedInput, VecInputSource};

    #[test]
    fn inputs_are_split_into_chunks() {
        assert_eq!(chunk_widths(100, 64), vec![64, 36]);
        assert_eq!(chunk_widths(4, 64), vec![4]);
        assert_eq!(chunk_widths(128, 32), vec![32, 32, 32, 32]);
        let chunks = split_input(-1, 100, 64).unwrap();
        assert_eq!(chunks, vec![(BitVec(u64::MAX), 64), (BitVec((1 << 36) - 1), 36)]);
        assert_eq!(join_chunks(&chunks), (1u128 << 100) - 1);
        let value = (1i128 << 90) + 12345;
        assert_eq!(join_chunks(&split_input(value, 128, 20).unwrap()), value as u128);
    }

    #[test]
    fn wide_inputs_are_rejected() {
        assert!(matches!(split_input(1, 129, 64), Err(MpcError::InvalidParameters(_))));
        assert!(matches!(split_input(16, 4, 64), Err(MpcError::OutOfRange { .. })));
    }

    #[test]
    fn replicated_input_shares_all_parties_inputs() {
        // party 0 inputs two chunks, party 1 one and party 2 nothing
        let inputs: [Vec<(BitVec, usize)>; 3] = [
            vec![(BitVec(5), 4), (BitVec(0xffff), 16)],
            vec![(BitVec(3), 4)],
            vec![],
        ];
        let (s1, s2, s3) = simple_local_setup(|p| {
            let mut input = ReplicatedInput::<BitVec>::new(3);
            for (owner, chunks) in inputs.iter().enumerate() {
                for (chunk, _) in chunks {
                    if owner == p.i {
                        input.add_mine(*chunk);
                    } else {
                        input.add_other(owner);
                    }
                }
            }
            input.exchange(p).unwrap();
            let mut shares = Vec::new();
            for (owner, chunks) in inputs.iter().enumerate() {
                for (_, width) in chunks {
                    shares.push(mask(input.finalize(owner).unwrap(), *width));
                }
            }
            assert!(input.finalize(0).is_err());
            shares
        });
        let expected = [BitVec(5), BitVec(0xffff), BitVec(3)];
        for (s1, s2, s3, v) in izip!(s1, s2, s3, expected) {
            consistent(&s1, &s2, &s3);
            assert_eq(s1, s2, s3, v);
        }
    }

    #[test]
    fn arithmetic_input() {
        let (s1, s2, s3) = simple_local_setup(|p| {
            let mut input = ReplicatedInput::<Z64>::new(3);
            if p.i == 2 {
                input.add_mine(Z64::from_i64(-7));
            } else {
                input.add_other(2);
            }
            input.exchange(p).unwrap();
            input.finalize(2).unwrap()
        });
        consistent(&s1, &s2, &s3);
        assert_eq(s1, s2, s3, Z64::from_i64(-7));
    }

    #[test]
    fn prompt_reads_and_acknowledges() {
        let mut out = Vec::new();
        {
            let mut source = PromptInputSource::new(Cursor::new("12\n-3\n"), &mut out);
            assert_eq!(source.next_input(8).unwrap(), 12);
            assert_eq!(source.next_input(8).unwrap(), -3);
            source.acknowledge().unwrap();
        }
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Thank you").count(), 1);
    }

    #[test]
    fn vec_source_runs_dry() {
        let mut source = VecInputSource::new([1, 2]);
        assert_eq!(source.next_input(4).unwrap(), 1);
        assert_eq!(source.next_input(4).unwrap(), 2);
        assert!(source.next_input(4).is_err());
    }
}
