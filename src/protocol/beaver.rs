use crate::open::Opening;
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::prep::Triple;
use crate::share::{BitVec, Ring, RssShare, RssShareVec};

use super::{BinaryAnd, MulTripleVector};

impl From<&[Triple]> for MulTripleVector<BitVec> {
    fn from(triples: &[Triple]) -> Self {
        let mut res = MulTripleVector::new();
        for t in triples {
            res.push(t.a, t.b, t.c);
        }
        res
    }
}

impl From<MulTripleVector<BitVec>> for Vec<Triple> {
    fn from(triples: MulTripleVector<BitVec>) -> Self {
        triples.into_rss_iter().map(|(a, b, c)| Triple { a, b, c }).collect()
    }
}

/// Binary AND gates from a fixed supply of triples.
pub struct BeaverAnd<'a, O: ?Sized> {
    opener: &'a mut O,
    supply: Vec<Triple>,
    used: usize,
}

impl<'a, O> BeaverAnd<'a, O>
where
    O: Opening<Share = RssShare<BitVec>, Clear = BitVec> + ?Sized,
{
    pub fn new(opener: &'a mut O, supply: Vec<Triple>) -> Self {
        Self { opener, supply, used: 0 }
    }

    /// Triples not consumed yet.
    pub fn remaining(&self) -> usize {
        self.supply.len() - self.used
    }
}

impl<O> BinaryAnd for BeaverAnd<'_, O>
where
    O: Opening<Share = RssShare<BitVec>, Clear = BitVec> + ?Sized,
{
    fn and(
        &mut self,
        session: &mut Session,
        x: &[RssShare<BitVec>],
        y: &[RssShare<BitVec>],
    ) -> MpcResult<RssShareVec<BitVec>> {
        if self.remaining() < x.len() {
            return Err(MpcError::InvalidParameters(format!(
                "{} AND gates need as many triples, {} are left",
                x.len(),
                self.remaining()
            )));
        }
        let triples = MulTripleVector::from(&self.supply[self.used..self.used + x.len()]);
        self.used += x.len();
        beaver_mul(session, &mut *self.opener, x, y, &triples)
    }
}

/// Multiplies `x` and `y` by consuming one supplied triple per product.
///
/// Opens `d = x - a` and `e = y - b` in one batch, then `z = c + d*b + e*a + d*e`.
pub fn beaver_mul<T, O>(
    session: &mut Session,
    opener: &mut O,
    x: &[RssShare<T>],
    y: &[RssShare<T>],
    triples: &MulTripleVector<T>,
) -> MpcResult<RssShareVec<T>>
where
    T: Ring,
    O: Opening<Share = RssShare<T>, Clear = T> + ?Sized,
{
    let n = x.len();
    debug_assert_eq!(n, y.len());
    if triples.len() < n {
        return Err(MpcError::InvalidParameters(format!(
            "{} products need as many triples, {} were supplied",
            n,
            triples.len()
        )));
    }
    let masked: RssShareVec<T> = (0..n)
        .map(|k| {
            let (a, _, _) = triples.get(k);
            x[k] - a
        })
        .chain((0..n).map(|k| {
            let (_, b, _) = triples.get(k);
            y[k] - b
        }))
        .collect();
    let de = opener.popen(session, &masked)?;
    let (d, e) = de.split_at(n);
    Ok((0..n)
        .map(|k| {
            let (a, b, c) = triples.get(k);
            c + b * d[k] + a * e[k] + session.constant(d[k] * e[k])
        })
        .collect())
}
