//! Shamir secret sharing over GF(2^64).
//!
//! Party `j` holds the evaluation of the sharing polynomial at `x_j = j + 1`.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use rand::{CryptoRng, Rng};

use crate::party::RngExt;

use super::{GF2p64, HasZero, Invertible, Ring};

/// Lagrange coefficient of party `j` for interpolating at 0 from the points of parties `0..n`.
pub fn rec_factor(j: usize, n: usize) -> GF2p64 {
    let xj = GF2p64::evaluation_point(j);
    let mut num = GF2p64::ONE;
    let mut den = GF2p64::ONE;
    for k in (0..n).filter(|k| *k != j) {
        let xk = GF2p64::evaluation_point(k);
        num *= xk;
        den *= xk - xj;
    }
    num * den.inverse()
}

/// Shares `secret` among `n` parties with a random polynomial of degree `threshold`.
pub fn deal<R: Rng + CryptoRng>(rng: &mut R, secret: GF2p64, n: usize, threshold: usize) -> Vec<GF2p64> {
    let coefficients = GF2p64::generate(rng, threshold);
    (0..n)
        .map(|j| {
            let x = GF2p64::evaluation_point(j);
            // Horner
            coefficients.iter().rev().fold(GF2p64::ZERO, |acc, c| (acc + *c) * x) + secret
        })
        .collect()
}

/// Interpolates the secret from the shares of parties `0..shares.len()`.
pub fn reconstruct(shares: &[GF2p64]) -> GF2p64 {
    let n = shares.len();
    shares
        .iter()
        .enumerate()
        .fold(GF2p64::ZERO, |acc, (j, s)| acc + *s * rec_factor(j, n))
}

/// Lagrange coefficients for every reconstruction set `{0, .., m-1}` with `t+1 <= m <= 2t+1`.
#[derive(Debug)]
pub struct ReconstructionTable {
    threshold: usize,
    coefficients: Vec<Vec<GF2p64>>,
}

impl ReconstructionTable {
    fn new(threshold: usize) -> Self {
        let coefficients = (threshold + 1..=2 * threshold + 1)
            .map(|m| (0..m).map(|j| rec_factor(j, m)).collect())
            .collect();
        Self { threshold, coefficients }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Coefficients for the set of the first `m` parties.
    pub fn for_set_size(&self, m: usize) -> &[GF2p64] {
        &self.coefficients[m - self.threshold - 1]
    }

    /// Reconstructs from the first `m` entries of `shares`.
    pub fn reconstruct_prefix(&self, shares: &[GF2p64], m: usize) -> GF2p64 {
        self.for_set_size(m)
            .iter()
            .zip(shares)
            .fold(GF2p64::ZERO, |acc, (c, s)| acc + *c * *s)
    }
}

lazy_static! {
    static ref RECONSTRUCTION_TABLES: Mutex<HashMap<usize, Arc<ReconstructionTable>>> = Mutex::new(HashMap::new());
}

/// Returns the process-wide reconstruction table for `threshold`, computing it on first use.
pub fn reconstruction_table(threshold: usize) -> Arc<ReconstructionTable> {
    let mut tables = RECONSTRUCTION_TABLES.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    tables
        .entry(threshold)
        .or_insert_with(|| Arc::new(ReconstructionTable::new(threshold)))
        .clone()
}
