//! Preprocessing material: its kinds, usage accounting, storage and the jobs that produce it.
pub mod bit_adder;
pub mod jobs;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

use crate::share::{BitVec, RssShare, Z64};

pub use store::{DataFiles, MaterialStore};

/// The kinds of preprocessing material a program can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataKind {
    /// binary multiplication triple
    Triple,
    /// random shared bit
    Bit,
    /// random bit shared in both domains
    Dabit,
    /// random value shared arithmetically and as `length` bits
    Edabit(usize),
    /// binary triple known to the owner
    PersonalTriple(usize),
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Triple => write!(f, "triples"),
            DataKind::Bit => write!(f, "bits"),
            DataKind::Dabit => write!(f, "dabits"),
            DataKind::Edabit(length) => write!(f, "{}-bit edabits", length),
            DataKind::PersonalTriple(owner) => write!(f, "personal triples of party {}", owner),
        }
    }
}

/// Usage counters (or stream positions) per [DataKind].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPositions {
    counts: BTreeMap<DataKind, usize>,
}

impl DataPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increase(&mut self, kind: DataKind, n: usize) {
        if n > 0 {
            *self.counts.entry(kind).or_insert(0) += n;
        }
    }

    pub fn get(&self, kind: DataKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DataKind, usize)> + '_ {
        self.counts.iter().map(|(k, n)| (*k, *n))
    }

    /// Raises every counter to at least the one in `other`.
    pub fn raise_to(&mut self, other: &DataPositions) {
        for (kind, n) in other.iter() {
            let current = self.get(kind);
            self.increase(kind, n.saturating_sub(current));
        }
    }
}

impl AddAssign<&DataPositions> for DataPositions {
    fn add_assign(&mut self, rhs: &DataPositions) {
        for (kind, n) in rhs.iter() {
            self.increase(kind, n);
        }
    }
}

impl Add for DataPositions {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += &rhs;
        self
    }
}

impl fmt::Display for DataPositions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return write!(f, "nothing");
        }
        let parts: Vec<String> = self.iter().map(|(kind, n)| format!("{} {}", n, kind)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A binary multiplication triple `a & b = c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triple {
    pub a: RssShare<BitVec>,
    pub b: RssShare<BitVec>,
    pub c: RssShare<BitVec>,
}

/// A random bit shared arithmetically and in binary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dabit {
    pub arith: RssShare<Z64>,
    pub bin: RssShare<BitVec>,
}

/// A random value shared arithmetically and bit-composed in a binary word of `length` bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edabit {
    pub arith: RssShare<Z64>,
    pub bin: RssShare<BitVec>,
    pub length: usize,
}
