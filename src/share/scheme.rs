use serde::Deserialize;

use crate::party::error::{MpcError, MpcResult};

/// Per-scheme constants of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct SchemeDescriptor {
    /// Width of a binary share word.
    pub n_bits: usize,
    /// Width of the chunks that inputs are split into.
    pub default_length: usize,
    pub n_parties: usize,
    /// Maximal number of corrupted parties.
    pub threshold: usize,
}

impl SchemeDescriptor {
    /// Replicated sharing among three parties with one corruption.
    pub fn replicated(default_length: usize) -> MpcResult<Self> {
        Self::new(64, default_length, 3, 1)
    }

    pub fn new(n_bits: usize, default_length: usize, n_parties: usize, threshold: usize) -> MpcResult<Self> {
        if default_length == 0 || default_length > n_bits || n_bits > 64 {
            return Err(MpcError::InvalidParameters(format!(
                "default length {} must be in 1..={} and the word width at most 64",
                default_length, n_bits
            )));
        }
        if n_parties < 2 * threshold + 1 {
            return Err(MpcError::InvalidParameters(format!(
                "{} parties cannot tolerate {} corruptions",
                n_parties, threshold
            )));
        }
        Ok(Self { n_bits, default_length, n_parties, threshold })
    }
}
