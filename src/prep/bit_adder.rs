//! Bit-sliced ripple-carry addition of binary shares.
//!
//! A bit-sliced value is a vector of words where word `k` holds bit `k` of up to 64 parallel values.
use crate::party::error::MpcResult;
use crate::party::Session;
use crate::protocol::BinaryAnd;
use crate::share::bits::trans;
use crate::share::{BitVec, HasZero, RssShare, RssShareVec};
use crate::util::transpose::BLOCK_SIZE;

/// Bit slices of words of `width` bits, one item per block of 64 words.
pub fn to_slices(words: &[RssShare<BitVec>], width: usize) -> MpcResult<Vec<RssShareVec<BitVec>>> {
    words.chunks(BLOCK_SIZE).map(|block| trans(block, width)).collect()
}

/// Inverse of [to_slices] for `n_words` words.
pub fn from_slices(items: &[RssShareVec<BitVec>], n_words: usize) -> MpcResult<Vec<RssShare<BitVec>>> {
    let mut words = Vec::with_capacity(n_words);
    let mut remaining = n_words;
    for slices in items {
        let rows = remaining.min(BLOCK_SIZE);
        words.extend(trans(slices, rows)?);
        remaining -= rows;
    }
    Ok(words)
}

pub struct BitAdder;

impl BitAdder {
    /// Adds `a[i] + b[i]` for every item `i` modulo `2^width_i`, where `width_i` is the larger
    /// number of slices of both summands.
    ///
    /// All items are processed together, so the number of rounds is the largest width minus one.
    pub fn add<A: BinaryAnd + ?Sized>(
        session: &mut Session,
        and: &mut A,
        a: &[RssShareVec<BitVec>],
        b: &[RssShareVec<BitVec>],
    ) -> MpcResult<Vec<RssShareVec<BitVec>>> {
        debug_assert_eq!(a.len(), b.len());
        let n = a.len();
        let slice = |v: &RssShareVec<BitVec>, k: usize| v.get(k).copied().unwrap_or(RssShare::ZERO);
        let widths: Vec<usize> = a.iter().zip(b).map(|(a, b)| a.len().max(b.len())).collect();
        let max_width = widths.iter().copied().max().unwrap_or(0);
        let mut carry = vec![RssShare::<BitVec>::ZERO; n];
        let mut sum: Vec<RssShareVec<BitVec>> = widths.iter().map(|w| Vec::with_capacity(*w)).collect();
        for k in 0..max_width {
            let mut needs_carry = Vec::new();
            let (mut x, mut y) = (Vec::new(), Vec::new());
            for i in (0..n).filter(|i| k < widths[*i]) {
                let (ak, bk, c) = (slice(&a[i], k), slice(&b[i], k), carry[i]);
                sum[i].push(ak + bk + c);
                if k + 1 < widths[i] {
                    // carry' = ((a ^ c) & (b ^ c)) ^ c
                    needs_carry.push(i);
                    x.push(ak + c);
                    y.push(bk + c);
                }
            }
            if !x.is_empty() {
                let t = and.and(session, &x, &y)?;
                for (i, t) in needs_carry.into_iter().zip(t) {
                    carry[i] = t + carry[i];
                }
            }
        }
        Ok(sum)
    }

    /// Adds all summands of every item, each item is a list of bit-sliced summands.
    pub fn add_many<A: BinaryAnd + ?Sized>(
        session: &mut Session,
        and: &mut A,
        items: &[Vec<RssShareVec<BitVec>>],
    ) -> MpcResult<Vec<RssShareVec<BitVec>>> {
        let mut acc: Vec<RssShareVec<BitVec>> =
            items.iter().map(|summands| summands.first().cloned().unwrap_or_default()).collect();
        let rounds = items.iter().map(Vec::len).max().unwrap_or(0);
        for r in 1..rounds {
            let with_summand: Vec<usize> = (0..items.len()).filter(|i| r < items[*i].len()).collect();
            let a: Vec<RssShareVec<BitVec>> = with_summand.iter().map(|i| acc[*i].clone()).collect();
            let b: Vec<RssShareVec<BitVec>> = with_summand.iter().map(|i| items[*i][r].clone()).collect();
            let sums = Self::add(session, and, &a, &b)?;
            for (i, s) in with_summand.into_iter().zip(sums) {
                acc[i] = s;
            }
        }
        Ok(acc)
    }
}
