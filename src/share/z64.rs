use std::fmt::{Debug, Formatter};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use super::{impl_word_element, mask_bits, Ring};

/// An element of the ring Z/2^64 Z.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Z64(pub u64);

impl Z64 {
    pub fn from_i64(x: i64) -> Self {
        Self(x as u64)
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// Reduces the element modulo `2^n_bits`.
    pub fn mask(self, n_bits: usize) -> Self {
        Self(mask_bits(self.0, n_bits))
    }

    /// The element `2^k`, zero if `k >= 64`.
    pub fn power_of_two(k: usize) -> Self {
        Self(1u64.checked_shl(k as u32).unwrap_or(0))
    }
}

impl_word_element!(Z64);

impl Ring for Z64 {
    const NBYTES: usize = 8;
    const ONE: Self = Self(1);

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add for Z64 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Z64 {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.wrapping_add(rhs.0);
    }
}

impl Sub for Z64 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Z64 {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.wrapping_sub(rhs.0);
    }
}

impl Neg for Z64 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(self.0.wrapping_neg())
    }
}

impl Mul for Z64 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_mul(rhs.0))
    }
}

impl Debug for Z64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Z64({})", self.0)
    }
}

#[cfg(test)]
mod test {
    use crate::share::{HasZero, Ring};

    use super::Z64;

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(Z64(u64::MAX) + Z64::ONE, Z64::ZERO);
        assert_eq!(Z64::ZERO - Z64::ONE, Z64(u64::MAX));
        assert_eq!(-Z64(5) + Z64(5), Z64::ZERO);
        assert_eq!(Z64(1 << 63) * Z64(2), Z64::ZERO);
        assert_eq!(Z64::from_i64(-3).as_i64(), -3);
    }

    #[test]
    fn mask_and_powers() {
        assert_eq!(Z64::from_i64(-1).mask(4), Z64(15));
        assert_eq!(Z64::power_of_two(3), Z64(8));
        assert_eq!(Z64::power_of_two(64), Z64::ZERO);
    }
}
