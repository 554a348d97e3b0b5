//! This module provides the rings and fields of the engine together with the secret sharing schemes built on them.
//!
//! The provided ring and field operations are **not constant-time**.
pub mod auth;
pub mod bits;
pub mod bitvec;
pub mod gf2p64;
pub mod rss;
pub mod scheme;
pub mod shamir;
pub mod z64;

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::network::NetSerializable;
use crate::party::{DigestExt, RngExt};

pub use bitvec::BitVec;
pub use gf2p64::GF2p64;
pub use rss::{RssShare, RssShareVec};
pub use scheme::SchemeDescriptor;
pub use z64::Z64;

/// Provides the neutral element of addition
pub trait HasZero {
    /// Zero the neutral element of addition
    const ZERO: Self;
}

/// A finite commutative ring whose elements fit into a machine word.
pub trait Ring:
    Default
    + HasZero
    + NetSerializable
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + Clone
    + Copy
    + PartialEq
    + Debug
    + RngExt
    + DigestExt
    + Send
    + Sync
    + 'static
{
    /// The element size in byte
    const NBYTES: usize;

    /// The element size in bits
    const NBITS: usize = 8 * Self::NBYTES;

    /// One the neutral element of multiplication
    const ONE: Self;

    /// Returns if the value is zero
    fn is_zero(&self) -> bool;
}

/// A finite field.
pub trait Field: Ring {}

/// Field that provide a method to compute multiplicative inverses.
pub trait Invertible: Field {
    /// Multiplicative Inverse (zero may map to zero)
    fn inverse(self) -> Self;
}

/// Reduces `x` modulo `2^n_bits`.
#[inline]
pub fn mask_bits(x: u64, n_bits: usize) -> u64 {
    if n_bits >= 64 {
        x
    } else {
        x & ((1u64 << n_bits) - 1)
    }
}

/// Implements serialization, hashing and sampling for a newtype over `u64`.
macro_rules! impl_word_element {
    ($t:ident) => {
        impl $crate::share::HasZero for $t {
            const ZERO: Self = $t(0);
        }

        impl $crate::network::NetSerializable for $t {
            fn serialized_size(n_elements: usize) -> usize {
                8 * n_elements
            }

            fn as_byte_vec(
                it: impl IntoIterator<Item = impl std::borrow::Borrow<Self>>,
                len: usize,
            ) -> Vec<u8> {
                let mut res = Vec::with_capacity(8 * len);
                for x in it {
                    res.extend_from_slice(&x.borrow().0.to_be_bytes());
                }
                res
            }

            fn as_byte_vec_slice(elements: &[Self]) -> Vec<u8> {
                Self::as_byte_vec(elements, elements.len())
            }

            fn from_byte_vec(v: Vec<u8>, len: usize) -> Vec<Self> {
                debug_assert_eq!(v.len(), 8 * len);
                v.chunks_exact(8)
                    .map(|c| {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(c);
                        $t(u64::from_be_bytes(buf))
                    })
                    .collect()
            }

            fn from_byte_slice(v: Vec<u8>, dest: &mut [Self]) {
                debug_assert_eq!(v.len(), 8 * dest.len());
                dest.iter_mut().zip(v.chunks_exact(8)).for_each(|(dst, c)| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(c);
                    dst.0 = u64::from_be_bytes(buf);
                });
            }
        }

        impl $crate::party::RngExt for $t {
            fn fill<R: rand::Rng + rand::CryptoRng>(rng: &mut R, buf: &mut [Self]) {
                for x in buf.iter_mut() {
                    x.0 = rand::RngCore::next_u64(rng);
                }
            }
        }

        impl $crate::party::DigestExt for $t {
            fn update<D: sha2::Digest>(digest: &mut D, message: &[Self]) {
                for x in message {
                    digest.update(x.0.to_be_bytes());
                }
            }
        }
    };
}

pub(crate) use impl_word_element;

#[cfg(any(test, feature = "benchmark-helper"))]
pub mod test {
    use std::borrow::Borrow;
    use std::fmt::Debug;

    use itertools::Itertools;
    use rand::{thread_rng, CryptoRng, Rng};

    use crate::party::RngExt;
    use crate::share::{RssShare, RssShareVec};

    use super::Ring;

    pub fn consistent<F: Ring>(share1: &RssShare<F>, share2: &RssShare<F>, share3: &RssShare<F>) {
        assert_eq!(
            share1.sii, share2.si,
            "share1 and share2 are inconsistent: share1={:?}, share2={:?}, share3={:?}",
            share1, share2, share3
        );
        assert_eq!(
            share2.sii, share3.si,
            "share2 and share3 are inconsistent: share1={:?}, share2={:?}, share3={:?}",
            share1, share2, share3
        );
        assert_eq!(
            share3.sii, share1.si,
            "share1 and share3 are inconsistent: share1={:?}, share2={:?}, share3={:?}",
            share1, share2, share3
        );
    }

    pub fn assert_eq<F: Ring + Debug>(share1: RssShare<F>, share2: RssShare<F>, share3: RssShare<F>, value: F) {
        let actual = share1.si + share2.si + share3.si;
        assert_eq!(actual, value, "Expected {:?}, got {:?}", value, actual);
    }

    pub fn assert_eq_vector<F: Ring>(
        share1: impl IntoIterator<Item = RssShare<F>>,
        share2: impl IntoIterator<Item = RssShare<F>>,
        share3: impl IntoIterator<Item = RssShare<F>>,
        values: impl IntoIterator<Item = F>,
    ) {
        for (s1, (s2, (s3, v))) in share1
            .into_iter()
            .zip_eq(share2.into_iter().zip_eq(share3.into_iter().zip_eq(values)))
        {
            consistent(&s1, &s2, &s3);
            assert_eq(s1, s2, s3, v);
        }
    }

    pub fn secret_share<F: Ring, R: Rng + CryptoRng>(rng: &mut R, x: &F) -> (RssShare<F>, RssShare<F>, RssShare<F>) {
        let r = F::generate(rng, 2);
        let x1 = RssShare::from(*x - r[0] - r[1], r[0]);
        let x2 = RssShare::from(r[0], r[1]);
        let x3 = RssShare::from(r[1], *x - r[0] - r[1]);
        (x1, x2, x3)
    }

    pub fn secret_share_vector<F: Ring, R: Rng + CryptoRng>(
        rng: &mut R,
        elements: impl IntoIterator<Item = impl Borrow<F>>,
    ) -> (RssShareVec<F>, RssShareVec<F>, RssShareVec<F>) {
        let (s1, (s2, s3)) = elements
            .into_iter()
            .map(|value| {
                let (s1, s2, s3) = secret_share(rng, value.borrow());
                (s1, (s2, s3))
            })
            .unzip();
        (s1, s2, s3)
    }

    pub fn random_secret_shared_vector<F: Ring>(n: usize) -> (Vec<F>, RssShareVec<F>, RssShareVec<F>, RssShareVec<F>) {
        let mut rng = thread_rng();
        let x: Vec<F> = F::generate(&mut rng, n);
        let (s1, s2, s3) = secret_share_vector(&mut rng, x.iter());
        (x, s1, s2, s3)
    }
}
