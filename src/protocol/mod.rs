//! Multiplication of replicated shares and the verification of multiplications.
pub mod beaver;
pub mod sacrifice;

use itertools::izip;
use serde::Deserialize;
use tracing::debug;

use crate::network::PlayerExt;
use crate::party::error::MpcResult;
use crate::party::Session;
use crate::share::{BitVec, Ring, RssShare, RssShareVec};

/// The adversary the protocols of a session are secure against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityModel {
    #[default]
    SemiHonest,
    Malicious,
}

pub trait MulTripleRecorder<T> {
    /// A size hint for the number of expected triples
    fn reserve_for_more_triples(&mut self, n: usize);

    /// Record a (2,3)-shared multiplication triple a*b = c
    fn record_mul_triple(&mut self, a: &[RssShare<T>], b: &[RssShare<T>], c: &[RssShare<T>]);
}

#[derive(Debug, Clone, Copy)]
pub struct NoMulTripleRecording;

impl<T> MulTripleRecorder<T> for NoMulTripleRecording {
    fn reserve_for_more_triples(&mut self, _n: usize) {
        // do nothing
    }

    fn record_mul_triple(&mut self, _a: &[RssShare<T>], _b: &[RssShare<T>], _c: &[RssShare<T>]) {
        // do nothing
    }
}

/// Replicated shares of triples `a*b = c`, stored component-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MulTripleVector<T> {
    ai: Vec<T>,
    aii: Vec<T>,
    bi: Vec<T>,
    bii: Vec<T>,
    ci: Vec<T>,
    cii: Vec<T>,
}

impl<T: Ring> MulTripleVector<T> {
    pub fn new() -> Self {
        Self {
            ai: Vec::new(),
            aii: Vec::new(),
            bi: Vec::new(),
            bii: Vec::new(),
            ci: Vec::new(),
            cii: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ai.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ai.is_empty()
    }

    pub fn push(&mut self, a: RssShare<T>, b: RssShare<T>, c: RssShare<T>) {
        self.ai.push(a.si);
        self.aii.push(a.sii);
        self.bi.push(b.si);
        self.bii.push(b.sii);
        self.ci.push(c.si);
        self.cii.push(c.sii);
    }

    pub fn get(&self, k: usize) -> (RssShare<T>, RssShare<T>, RssShare<T>) {
        (
            RssShare::from(self.ai[k], self.aii[k]),
            RssShare::from(self.bi[k], self.bii[k]),
            RssShare::from(self.ci[k], self.cii[k]),
        )
    }

    pub fn shrink(&mut self, new_length: usize) {
        self.ai.truncate(new_length);
        self.aii.truncate(new_length);
        self.bi.truncate(new_length);
        self.bii.truncate(new_length);
        self.ci.truncate(new_length);
        self.cii.truncate(new_length);
    }

    /// Also clears the allocated capacity
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Keeps the first `at` triples and returns the rest.
    pub fn split_off(&mut self, at: usize) -> Self {
        Self {
            ai: self.ai.split_off(at),
            aii: self.aii.split_off(at),
            bi: self.bi.split_off(at),
            bii: self.bii.split_off(at),
            ci: self.ci.split_off(at),
            cii: self.cii.split_off(at),
        }
    }

    pub fn ai(&self) -> &[T] { &self.ai }
    pub fn aii(&self) -> &[T] { &self.aii }
    pub fn bi(&self) -> &[T] { &self.bi }
    pub fn bii(&self) -> &[T] { &self.bii }
    pub fn ci(&self) -> &[T] { &self.ci }
    pub fn cii(&self) -> &[T] { &self.cii }

    fn rss_iter(xi: Vec<T>, xii: Vec<T>) -> impl ExactSizeIterator<Item = RssShare<T>> {
        xi.into_iter().zip(xii).map(|(si, sii)| RssShare::from(si, sii))
    }

    pub fn into_rss_iter(self) -> impl Iterator<Item = (RssShare<T>, RssShare<T>, RssShare<T>)> {
        izip!(
            Self::rss_iter(self.ai, self.aii),
            Self::rss_iter(self.bi, self.bii),
            Self::rss_iter(self.ci, self.cii)
        )
    }

    #[allow(clippy::type_complexity)]
    pub fn as_mut_slices(&mut self) -> (&mut [T], &mut [T], &mut [T], &mut [T], &mut [T], &mut [T]) {
        (&mut self.ai, &mut self.aii, &mut self.bi, &mut self.bii, &mut self.ci, &mut self.cii)
    }
}

impl<T: Ring> MulTripleRecorder<T> for MulTripleVector<T> {
    fn reserve_for_more_triples(&mut self, n: usize) {
        self.ai.reserve_exact(n);
        self.aii.reserve_exact(n);
        self.bi.reserve_exact(n);
        self.bii.reserve_exact(n);
        self.ci.reserve_exact(n);
        self.cii.reserve_exact(n);
    }

    fn record_mul_triple(&mut self, a: &[RssShare<T>], b: &[RssShare<T>], c: &[RssShare<T>]) {
        for (a, b, c) in izip!(a, b, c) {
            self.push(*a, *b, *c);
        }
    }
}

/// One round of replicated multiplication. Each party sends `c_i` to its previous party.
pub fn mul<T: Ring, Rec: MulTripleRecorder<T>>(
    session: &mut Session,
    recorder: &mut Rec,
    a: &[RssShare<T>],
    b: &[RssShare<T>],
) -> MpcResult<RssShareVec<T>> {
    debug_assert_eq!(a.len(), b.len());
    let alphas = session.generate_alpha::<T>(a.len());
    let ci: Vec<T> = izip!(alphas, a, b).map(|(alpha_j, aj, bj)| alpha_j + aj.local_mul(bj)).collect();
    let (next, prev) = (session.next(), session.prev());
    session.player().send_elements(prev, &ci)?;
    let cii: Vec<T> = session.player().receive_elements(next, a.len())?;
    let c: RssShareVec<T> = ci.into_iter().zip(cii).map(|(ci, cii)| RssShare::from(ci, cii)).collect();
    recorder.record_mul_triple(a, b, &c);
    Ok(c)
}

/// Random triples without any check.
pub fn optimistic_triples<T: Ring>(session: &mut Session, n: usize) -> MpcResult<MulTripleVector<T>> {
    let a = session.generate_random::<T>(n);
    let b = session.generate_random::<T>(n);
    let mut triples = MulTripleVector::new();
    triples.reserve_for_more_triples(n);
    mul(session, &mut triples, &a, &b)?;
    Ok(triples)
}

/// Multiplies shares of one ring and, in the malicious model, verifies the products later.
pub struct Multiplier<T: Ring> {
    model: SecurityModel,
    recorded: MulTripleVector<T>,
}

impl<T: Ring> Multiplier<T> {
    pub fn new(model: SecurityModel) -> Self {
        Self { model, recorded: MulTripleVector::new() }
    }

    pub fn model(&self) -> SecurityModel {
        self.model
    }

    /// Number of products waiting for [Multiplier::check].
    pub fn unchecked(&self) -> usize {
        self.recorded.len()
    }

    pub fn mul(&mut self, session: &mut Session, a: &[RssShare<T>], b: &[RssShare<T>]) -> MpcResult<RssShareVec<T>> {
        match self.model {
            SecurityModel::SemiHonest => mul(session, &mut NoMulTripleRecording, a, b),
            SecurityModel::Malicious => mul(session, &mut self.recorded, a, b),
        }
    }

    /// Produces `n` triples, checked by bucket cut-and-choose in the malicious model.
    pub fn triples(&mut self, session: &mut Session, n: usize) -> MpcResult<MulTripleVector<T>> {
        match self.model {
            SecurityModel::SemiHonest => optimistic_triples(session, n),
            SecurityModel::Malicious => sacrifice::bucket_cut_and_choose(session, n),
        }
    }

    /// Verifies every product since the last check by sacrificing one checked triple each.
    pub fn check(&mut self, session: &mut Session) -> MpcResult<()> {
        if self.recorded.is_empty() {
            return Ok(());
        }
        let to_check = std::mem::take(&mut self.recorded);
        let n = to_check.len();
        let mut to_sacrifice = sacrifice::bucket_cut_and_choose(session, n)?;
        sacrifice::sacrifice(session, n, 1, &to_check, &mut to_sacrifice)?;
        debug!(party = session.i, checked = n, "multiplications verified");
        Ok(())
    }
}

/// A source of binary AND gates.
pub trait BinaryAnd {
    fn and(
        &mut self,
        session: &mut Session,
        x: &[RssShare<BitVec>],
        y: &[RssShare<BitVec>],
    ) -> MpcResult<RssShareVec<BitVec>>;
}

impl BinaryAnd for Multiplier<BitVec> {
    fn and(
        &mut self,
        session: &mut Session,
        x: &[RssShare<BitVec>],
        y: &[RssShare<BitVec>],
    ) -> MpcResult<RssShareVec<BitVec>> {
        self.mul(session, x, y)
    }
}

#[cfg(test)]
pub mod test {
    use itertools::izip;

    use crate::party::error::MpcError;
    use crate::party::test_export::simple_local_setup;
    use crate::share::test::{assert_eq, consistent, random_secret_shared_vector};
    use crate::share::{BitVec, Ring, Z64};

    use super::{optimistic_triples, MulTripleVector, Multiplier, SecurityModel};

    /// Asserts that the triples of all three parties are consistent and correct.
    pub fn check_triples<T: Ring>(t1: MulTripleVector<T>, t2: MulTripleVector<T>, t3: MulTripleVector<T>, len: usize) {
        assert_eq!(t1.len(), len);
        assert_eq!(t2.len(), len);
        assert_eq!(t3.len(), len);
        for ((a1, b1, c1), (a2, b2, c2), (a3, b3, c3)) in izip!(t1.into_rss_iter(), t2.into_rss_iter(), t3.into_rss_iter()) {
            consistent(&a1, &a2, &a3);
            consistent(&b1, &b2, &b3);
            consistent(&c1, &c2, &c3);
            let a = a1.si + a2.si + a3.si;
            let b = b1.si + b2.si + b3.si;
            assert_eq(c1, c2, c3, a * b);
        }
    }

    #[test]
    fn multiplication_is_correct() {
        let (x, x1, x2, x3) = random_secret_shared_vector::<Z64>(100);
        let (y, y1, y2, y3) = random_secret_shared_vector::<Z64>(100);
        let inputs = [(x1, y1), (x2, y2), (x3, y3)];
        let (z1, z2, z3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::Malicious);
            let (x, y) = &inputs[p.i];
            let z = mult.mul(p, x, y).unwrap();
            assert_eq!(mult.unchecked(), 100);
            mult.check(p).unwrap();
            assert_eq!(mult.unchecked(), 0);
            z
        });
        for (i, (z1, z2, z3)) in izip!(z1, z2, z3).enumerate() {
            consistent(&z1, &z2, &z3);
            assert_eq(z1, z2, z3, x[i] * y[i]);
        }
    }

    #[test]
    fn optimistic_binary_triples_are_correct() {
        let (t1, t2, t3) = simple_local_setup(|p| optimistic_triples::<BitVec>(p, 64).unwrap());
        check_triples(t1, t2, t3, 64);
    }

    #[test]
    fn wrong_product_fails_check() {
        let (_, x1, x2, x3) = random_secret_shared_vector::<BitVec>(10);
        let (_, y1, y2, y3) = random_secret_shared_vector::<BitVec>(10);
        let inputs = [(x1, y1), (x2, y2), (x3, y3)];
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::Malicious);
            let (x, y) = &inputs[p.i];
            mult.mul(p, x, y).unwrap();
            if p.i == 1 {
                // party 1 holds a wrong c_1
                let (_, _, _, _, ci, _) = mult.recorded.as_mut_slices();
                ci[0] += BitVec(1);
            }
            mult.check(p)
        });
        assert!(r1.is_ok());
        // party 2 holds the honest c_1 and party 1 sees its own view disagree
        assert!(matches!(r2, Err(MpcError::Sacrifice)));
        assert!(matches!(r3, Err(MpcError::Sacrifice)));
    }
}
