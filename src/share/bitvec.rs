use std::fmt::{Debug, Formatter};
use std::ops::{Add, AddAssign, BitAnd, BitXor, Mul, Neg, Shl, Shr, Sub, SubAssign};

use super::{impl_word_element, mask_bits, Ring};

/// A word of 64 bits seen as an element of GF(2)^64.
///
/// Addition is XOR and multiplication is bitwise AND, so a [BitVec] holds 64 independent wires.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitVec(pub u64);

impl BitVec {
    pub fn new(x: u64) -> Self {
        Self(x)
    }

    /// Keeps the lowest `n_bits` bits.
    pub fn mask(self, n_bits: usize) -> Self {
        Self(mask_bits(self.0, n_bits))
    }

    pub fn get_bit(&self, i: usize) -> bool {
        i < 64 && (self.0 >> i) & 1 == 1
    }

    /// A word with only the lowest bit set to `b`.
    pub fn from_bit(b: bool) -> Self {
        Self(b as u64)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl_word_element!(BitVec);

impl Ring for BitVec {
    const NBYTES: usize = 8;
    const ONE: Self = Self(u64::MAX);

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add for BitVec {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl AddAssign for BitVec {
    fn add_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl Sub for BitVec {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl SubAssign for BitVec {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

impl Neg for BitVec {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self
    }
}

impl Mul for BitVec {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitXor for BitVec {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self::Output {
        self + rhs
    }
}

impl BitAnd for BitVec {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self * rhs
    }
}

impl Shl<usize> for BitVec {
    type Output = Self;

    fn shl(self, rhs: usize) -> Self::Output {
        Self(u32::try_from(rhs).ok().and_then(|r| self.0.checked_shl(r)).unwrap_or(0))
    }
}

impl Shr<usize> for BitVec {
    type Output = Self;

    fn shr(self, rhs: usize) -> Self::Output {
        Self(u32::try_from(rhs).ok().and_then(|r| self.0.checked_shr(r)).unwrap_or(0))
    }
}

impl Debug for BitVec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitVec(0x{:016x})", self.0)
    }
}
