//! Local bit-level algebra on replicated binary shares.
//!
//! None of these operations communicate. They act on both components independently, which is
//! sound because they are linear over GF(2).
use crate::party::error::{MpcError, MpcResult};
use crate::util::transpose::transpose;

use super::{BitVec, RssShare};

/// Rejects public values that do not fit into `n_bits` bits.
///
/// Values of 64 or more bits are never rejected since they are reduced by the ring anyway.
pub fn check_length(n_bits: usize, value: i128) -> MpcResult<()> {
    if n_bits < 64 && value.unsigned_abs() >= 1u128 << n_bits {
        return Err(MpcError::OutOfRange { value, n_bits });
    }
    Ok(())
}

/// Shares the public `value` of `n_bits` bits as held by party `party_index`.
pub fn load_clear(party_index: usize, n_bits: usize, value: i128) -> MpcResult<RssShare<BitVec>> {
    check_length(n_bits, value)?;
    Ok(RssShare::constant(party_index, BitVec(value as u64).mask(n_bits)))
}

pub fn mask(share: RssShare<BitVec>, n_bits: usize) -> RssShare<BitVec> {
    share.map(|x| x.mask(n_bits))
}

pub fn shl(share: RssShare<BitVec>, n: usize) -> RssShare<BitVec> {
    share.map(|x| x << n)
}

pub fn shr(share: RssShare<BitVec>, n: usize) -> RssShare<BitVec> {
    share.map(|x| x >> n)
}

/// Combines single-bit shares into one word, bit `i` of the result is the lowest bit of `bits[i]`.
///
/// Bits beyond the word width are dropped.
pub fn bitcom(bits: &[RssShare<BitVec>]) -> RssShare<BitVec> {
    bits.iter()
        .enumerate()
        .fold(RssShare::from(BitVec(0), BitVec(0)), |acc, (i, b)| acc + shl(mask(*b, 1), i))
}

/// Splits the lowest `n_bits` bits of a word into single-bit shares.
pub fn bitdec(share: RssShare<BitVec>, n_bits: usize) -> Vec<RssShare<BitVec>> {
    (0..n_bits).map(|i| mask(shr(share, i), 1)).collect()
}

/// Transposes a block of `rows.len() x n_cols` shared wires.
///
/// Both sides are limited to [BLOCK_SIZE](crate::util::transpose::BLOCK_SIZE).
pub fn trans(rows: &[RssShare<BitVec>], n_cols: usize) -> MpcResult<Vec<RssShare<BitVec>>> {
    let si: Vec<u64> = rows.iter().map(|r| r.si.0).collect();
    let sii: Vec<u64> = rows.iter().map(|r| r.sii.0).collect();
    Ok(transpose(&si, n_cols)?
        .into_iter()
        .zip(transpose(&sii, n_cols)?)
        .map(|(si, sii)| RssShare::from(BitVec(si), BitVec(sii)))
        .collect())
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::thread_rng;

    use crate::party::error::MpcError;
    use crate::share::test::{assert_eq, assert_eq_vector, consistent, secret_share, secret_share_vector};
    use crate::share::{BitVec, RssShare};

    use super::{bitcom, bitdec, check_length, load_clear, trans};

    #[test]
    fn out_of_range_rejection() {
        assert!(load_clear(0, 4, 15).is_ok());
        assert!(load_clear(0, 4, -15).is_ok());
        assert!(matches!(load_clear(0, 4, 16), Err(MpcError::OutOfRange { value: 16, n_bits: 4 })));
        assert!(matches!(load_clear(0, 4, -16), Err(MpcError::OutOfRange { value: -16, n_bits: 4 })));
        assert!(check_length(64, i128::MAX).is_ok());
    }

    #[test]
    fn load_clear_masks_negative_values() {
        let shares: Vec<RssShare<BitVec>> = (0..3).map(|i| load_clear(i, 4, -1).unwrap()).collect();
        consistent(&shares[0], &shares[1], &shares[2]);
        assert_eq(shares[0], shares[1], shares[2], BitVec(0xf));
    }

    #[test]
    fn transpose_shared_block() {
        let mut rng = thread_rng();
        let rows = vec![BitVec(0b011), BitVec(0b110)];
        let (s1, s2, s3) = secret_share_vector(&mut rng, rows.iter());
        let (t1, t2, t3) = (trans(&s1, 3).unwrap(), trans(&s2, 3).unwrap(), trans(&s3, 3).unwrap());
        assert_eq_vector(t1, t2, t3, vec![BitVec(0b01), BitVec(0b11), BitVec(0b10)]);
    }

    proptest! {
        #[test]
        fn bitcom_inverts_bitdec(x in any::<u64>(), n in 1usize..=64) {
            let mut rng = thread_rng();
            let (s1, s2, s3) = secret_share(&mut rng, &BitVec(x));
            let shares = [s1, s2, s3].map(|s| bitcom(&bitdec(s, n)));
            consistent(&shares[0], &shares[1], &shares[2]);
            prop_assert_eq!(shares[0].si + shares[1].si + shares[2].si, BitVec(x).mask(n));
        }
    }
}
