use std::ops::{Add, Mul, Neg, Sub};

use rand::{CryptoRng, Rng};

use super::{Field, HasZero};

/// An additive share with an information-theoretic MAC share.
///
/// Across all parties `Σ mac_i = alpha · Σ value_i` for the global key `alpha = Σ alpha_i`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuthShare<F> {
    pub value: F,
    pub mac: F,
}

impl<F: Field> AuthShare<F> {
    pub fn new(value: F, mac: F) -> Self {
        Self { value, mac }
    }

    /// The authenticated sharing of a public value, given this party's key share.
    pub fn constant(party_index: usize, value: F, alpha_i: F) -> Self {
        let v = if party_index == 0 { value } else { F::ZERO };
        Self { value: v, mac: alpha_i * value }
    }

    /// Deals authenticated shares of `secret` to `alpha_shares.len()` parties.
    pub fn deal<R: Rng + CryptoRng>(rng: &mut R, secret: F, alpha_shares: &[F]) -> Vec<Self> {
        let n = alpha_shares.len();
        let alpha = alpha_shares.iter().fold(F::ZERO, |acc, a| acc + *a);
        let mut values = F::generate(rng, n);
        let mut macs = F::generate(rng, n);
        let value_rest = values[1..].iter().fold(F::ZERO, |acc, v| acc + *v);
        let mac_rest = macs[1..].iter().fold(F::ZERO, |acc, m| acc + *m);
        values[0] = secret - value_rest;
        macs[0] = alpha * secret - mac_rest;
        values.into_iter().zip(macs).map(|(value, mac)| Self { value, mac }).collect()
    }
}

impl<F: Field> HasZero for AuthShare<F> {
    const ZERO: Self = Self { value: F::ZERO, mac: F::ZERO };
}

impl<F: Field> Add for AuthShare<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self { value: self.value + rhs.value, mac: self.mac + rhs.mac }
    }
}

impl<F: Field> Sub for AuthShare<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self { value: self.value - rhs.value, mac: self.mac - rhs.mac }
    }
}

impl<F: Field> Neg for AuthShare<F> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self { value: -self.value, mac: -self.mac }
    }
}

impl<F: Field> Mul<F> for AuthShare<F> {
    type Output = Self;

    fn mul(self, rhs: F) -> Self::Output {
        Self { value: self.value * rhs, mac: self.mac * rhs }
    }
}
