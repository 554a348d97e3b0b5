use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use super::{HasZero, Ring};

/// A party's RSS-share of a (2,3)-shared ring element.
///
/// Party `i` holds the components `s_i` and `s_{i+1}` of `s = s_0 + s_1 + s_2`.
#[derive(Clone, Debug, PartialEq)]
pub struct RssShare<T> {
    /// The first share of the party.
    pub si: T,
    /// The second share of the party.
    pub sii: T,
}

/// A vector of [RssShare]s.
pub type RssShareVec<F> = Vec<RssShare<F>>;

impl<T> RssShare<T> {
    /// Computes an RSS-share given two shares.
    pub fn from(si: T, sii: T) -> Self {
        Self { si, sii }
    }
}

impl<T: Ring> RssShare<T> {
    /// The sharing of a public value held by party `i`: `s_0 = value`, the other components are zero.
    pub fn constant(i: usize, value: T) -> Self {
        match i {
            0 => Self::from(value, T::ZERO),
            2 => Self::from(T::ZERO, value),
            _ => Self::ZERO,
        }
    }

    /// This party's additive contribution to the product with `other`.
    ///
    /// The three contributions sum to the product, they form a (3,3)-sharing.
    pub fn local_mul(&self, other: &Self) -> T {
        self.si * (other.si + other.sii) + self.sii * other.si
    }

    /// Applies `f` to both components.
    pub fn map(self, f: impl Fn(T) -> T) -> Self {
        Self::from(f(self.si), f(self.sii))
    }
}

impl<T: Add> Add<Self> for RssShare<T> {
    type Output = RssShare<<T as Add>::Output>;

    fn add(self, rhs: Self) -> Self::Output {
        RssShare {
            si: self.si + rhs.si,
            sii: self.sii + rhs.sii,
        }
    }
}

impl<T: Sub> Sub<Self> for RssShare<T> {
    type Output = RssShare<<T as Sub>::Output>;

    fn sub(self, rhs: Self) -> Self::Output {
        RssShare {
            si: self.si - rhs.si,
            sii: self.sii - rhs.sii,
        }
    }
}

impl<T: Neg> Neg for RssShare<T> {
    type Output = RssShare<<T as Neg>::Output>;

    fn neg(self) -> Self::Output {
        RssShare {
            si: -self.si,
            sii: -self.sii,
        }
    }
}

/// Multiplies the RSS-share with a scalar.
impl<T: Mul + Copy> Mul<T> for RssShare<T> {
    type Output = RssShare<<T as Mul>::Output>;

    fn mul(self, rhs: T) -> Self::Output {
        RssShare {
            si: self.si * rhs,
            sii: self.sii * rhs,
        }
    }
}

impl<T: AddAssign> AddAssign for RssShare<T> {
    fn add_assign(&mut self, rhs: Self) {
        self.si += rhs.si;
        self.sii += rhs.sii;
    }
}

impl<T: SubAssign> SubAssign for RssShare<T> {
    fn sub_assign(&mut self, rhs: Self) {
        self.si -= rhs.si;
        self.sii -= rhs.sii;
    }
}

impl<T: Copy> Copy for RssShare<T> {}

impl<T: HasZero> HasZero for RssShare<T> {
    const ZERO: Self = Self { si: T::ZERO, sii: T::ZERO };
}

#[cfg(test)]
mod test {
    use rand::thread_rng;

    use crate::share::test::{assert_eq, consistent, secret_share};
    use crate::share::{BitVec, GF2p64, HasZero, Ring, Z64};

    use super::RssShare;

    fn check_local_mul<T: Ring>(x: T, y: T) {
        let mut rng = thread_rng();
        let (x1, x2, x3) = secret_share(&mut rng, &x);
        let (y1, y2, y3) = secret_share(&mut rng, &y);
        let z = x1.local_mul(&y1) + x2.local_mul(&y2) + x3.local_mul(&y3);
        assert_eq!(z, x * y);
    }

    #[test]
    fn local_mul_is_additive_sharing_of_product() {
        check_local_mul(Z64(123456789), Z64(987654321));
        check_local_mul(BitVec(0xf0f0), BitVec(0xff00));
        check_local_mul(GF2p64(0x1234), GF2p64(0xabcdef));
    }

    #[test]
    fn constant_shares_reconstruct() {
        let v = Z64(77);
        let (c0, c1, c2) = (RssShare::constant(0, v), RssShare::constant(1, v), RssShare::constant(2, v));
        consistent(&c0, &c1, &c2);
        assert_eq(c0, c1, c2, v);
    }

    #[test]
    fn linear_operations() {
        let mut rng = thread_rng();
        let (a1, a2, a3) = secret_share(&mut rng, &Z64(10));
        let (b1, b2, b3) = secret_share(&mut rng, &Z64(3));
        let d = |a: RssShare<Z64>, b: RssShare<Z64>| (a - b) * Z64(2);
        let (d1, d2, d3) = (d(a1, b1), d(a2, b2), d(a3, b3));
        consistent(&d1, &d2, &d3);
        assert_eq(d1, d2, d3, Z64(14));
        assert_eq(-a1, -a2, -a3, Z64::from_i64(-10));
        let mut s = a1;
        s -= a1;
        assert_eq!(s, RssShare::ZERO);
    }
}
