//! Bit-matrix transposition on blocks of up to 64x64 wires.
//!
//! A block is given as a slice of rows. Bit `j` of row `i` is the wire in column `j`.
use crate::party::error::{MpcError, MpcResult};

/// Maximal number of rows and columns of a block.
pub const BLOCK_SIZE: usize = 64;

/// In-place transposition of a full 64x64 bit matrix.
pub fn square64(a: &mut [u64; BLOCK_SIZE]) {
    let mut j = 32;
    let mut m: u64 = 0x0000_0000_FFFF_FFFF;
    while j != 0 {
        let mut k = 0;
        while k < BLOCK_SIZE {
            let t = ((a[k] >> j) ^ a[k | j]) & m;
            a[k] ^= t << j;
            a[k | j] ^= t;
            k = ((k | j) + 1) & !j;
        }
        j >>= 1;
        m ^= m << j;
    }
}

/// Transposes a `rows.len() x n_cols` block into a `n_cols x rows.len()` block.
///
/// Bits of the input rows at positions `>= n_cols` are ignored.
pub fn transpose(rows: &[u64], n_cols: usize) -> MpcResult<Vec<u64>> {
    if rows.len() > BLOCK_SIZE || n_cols > BLOCK_SIZE {
        return Err(MpcError::InvalidParameters(format!(
            "cannot transpose a {}x{} block",
            rows.len(),
            n_cols
        )));
    }
    let mut block = [0u64; BLOCK_SIZE];
    let col_mask = crate::share::mask_bits(u64::MAX, n_cols);
    for (dst, row) in block.iter_mut().zip(rows) {
        *dst = row & col_mask;
    }
    square64(&mut block);
    Ok(block[..n_cols].to_vec())
}
