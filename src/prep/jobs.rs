//! Handlers for the preprocessing job kinds.
//!
//! Every handler runs synchronously on the calling worker's [Session].
use itertools::izip;
use tracing::{debug, warn};

use crate::input::ReplicatedInput;
use crate::open::Opening;
use crate::party::error::{MpcError, MpcResult};
use crate::party::{RngExt, Session};
use crate::protocol::{BinaryAnd, Multiplier};
use crate::share::bits::{bitcom, mask, shr};
use crate::share::{mask_bits, BitVec, RssShare, RssShareVec, Z64};

use super::bit_adder::{from_slices, to_slices, BitAdder};
use super::{DataFiles, Dabit, Edabit, Triple};

/// Arithmetic openers of replicated shares.
pub type ArithOpener = dyn Opening<Share = RssShare<Z64>, Clear = Z64> + Send;
/// Binary openers of replicated shares.
pub type BinaryOpener = dyn Opening<Share = RssShare<BitVec>, Clear = BitVec> + Send;

/// Multiplies `x[k] * y[k]` for all `k`.
pub fn mult(
    session: &mut Session,
    multiplier: &mut Multiplier<Z64>,
    x: &[RssShare<Z64>],
    y: &[RssShare<Z64>],
) -> MpcResult<RssShareVec<Z64>> {
    if x.len() != y.len() {
        return Err(MpcError::InvalidParameters(format!("cannot multiply {} by {} factors", x.len(), y.len())));
    }
    multiplier.mul(session, x, y)
}

pub fn triples(session: &mut Session, multiplier: &mut Multiplier<BitVec>, n: usize) -> MpcResult<Vec<Triple>> {
    Ok(multiplier.triples(session, n)?.into())
}

/// Random bits in the lowest bit of a binary share, drawn from the pairwise RNGs without interaction.
pub fn bits(session: &mut Session, n: usize) -> RssShareVec<BitVec> {
    session.generate_random::<BitVec>(n).into_iter().map(|b| mask(b, 1)).collect()
}

/// The arithmetic sharing of the component `k` of a replicated sharing, as held by party `i`.
fn component_share(i: usize, k: usize, value: Z64) -> RssShare<Z64> {
    if k == i {
        RssShare::from(value, Z64(0))
    } else if k == (i + 1) % 3 {
        RssShare::from(Z64(0), value)
    } else {
        RssShare::from(Z64(0), Z64(0))
    }
}

/// `a + b - 2ab` for shared bits `a` and `b`.
fn arith_xor(
    session: &mut Session,
    multiplier: &mut Multiplier<Z64>,
    a: &[RssShare<Z64>],
    b: &[RssShare<Z64>],
) -> MpcResult<RssShareVec<Z64>> {
    let ab = multiplier.mul(session, a, b)?;
    Ok(izip!(a, b, ab).map(|(a, b, ab)| *a + *b - ab * Z64(2)).collect())
}

/// Random bits shared in both domains, converted by XOR-ing the three binary components arithmetically.
pub fn dabits(session: &mut Session, multiplier: &mut Multiplier<Z64>, n: usize) -> MpcResult<Vec<Dabit>> {
    let bin = bits(session, n);
    let i = session.i;
    let component = |k: usize| -> RssShareVec<Z64> {
        bin.iter()
            .map(|b| {
                let bit = if k == i { b.si } else { b.sii };
                component_share(i, k, Z64(bit.as_u64()))
            })
            .collect()
    };
    let (c0, c1, c2) = (component(0), component(1), component(2));
    let c01 = arith_xor(session, multiplier, &c0, &c1)?;
    let arith = arith_xor(session, multiplier, &c01, &c2)?;
    Ok(arith.into_iter().zip(bin).map(|(arith, bin)| Dabit { arith, bin }).collect())
}

/// Combines `length` dabits into one edabit.
fn compose(dabits: &[Dabit], length: usize) -> Edabit {
    let arith = dabits
        .iter()
        .enumerate()
        .fold(RssShare::from(Z64(0), Z64(0)), |acc, (k, d)| acc + d.arith * Z64::power_of_two(k));
    let bins: Vec<RssShare<BitVec>> = dabits.iter().map(|d| d.bin).collect();
    Edabit { arith, bin: bitcom(&bins), length }
}

/// Edabits composed from fresh dabits, or from stocked dabits if `supply` is given.
pub fn edabits(
    session: &mut Session,
    multiplier: &mut Multiplier<Z64>,
    supply: Option<&mut DataFiles>,
    n: usize,
    length: usize,
) -> MpcResult<Vec<Edabit>> {
    if length == 0 || length > 64 {
        return Err(MpcError::InvalidParameters(format!("edabits of {} bits", length)));
    }
    let dabits = match supply {
        Some(files) => files.get_dabits(n * length)?,
        None => dabits(session, multiplier, n * length)?,
    };
    Ok(dabits.chunks_exact(length).map(|chunk| compose(chunk, length)).collect())
}

/// Edabits whose value is known to `owner`, input in both domains.
pub fn personal_edabits(session: &mut Session, owner: usize, n: usize, length: usize) -> MpcResult<Vec<Edabit>> {
    if length == 0 || length > 64 {
        return Err(MpcError::InvalidParameters(format!("edabits of {} bits", length)));
    }
    let mut arith_input = ReplicatedInput::<Z64>::new(session.num_players());
    let mut bin_input = ReplicatedInput::<BitVec>::new(session.num_players());
    if session.i == owner {
        let values = BitVec::generate(&mut session.random_local, n);
        for v in values {
            let r = v.mask(length);
            arith_input.add_mine(Z64(r.as_u64()));
            bin_input.add_mine(r);
        }
    } else {
        for _ in 0..n {
            arith_input.add_other(owner);
            bin_input.add_other(owner);
        }
    }
    arith_input.exchange(session)?;
    bin_input.exchange(session)?;
    (0..n)
        .map(|_| {
            Ok(Edabit {
                arith: arith_input.finalize(owner)?,
                bin: mask(bin_input.finalize(owner)?, length),
                length,
            })
        })
        .collect()
}

/// Binary triples known to `owner`, who samples them locally and inputs all three words.
pub fn personal_triples(session: &mut Session, owner: usize, n: usize) -> MpcResult<Vec<Triple>> {
    let mut input = ReplicatedInput::<BitVec>::new(session.num_players());
    if session.i == owner {
        let a = BitVec::generate(&mut session.random_local, n);
        let b = BitVec::generate(&mut session.random_local, n);
        for (a, b) in a.into_iter().zip(b) {
            input.add_mine(a);
            input.add_mine(b);
            input.add_mine(a * b);
        }
    } else {
        for _ in 0..3 * n {
            input.add_other(owner);
        }
    }
    input.exchange(session)?;
    (0..n)
        .map(|_| {
            Ok(Triple {
                a: input.finalize(owner)?,
                b: input.finalize(owner)?,
                c: input.finalize(owner)?,
            })
        })
        .collect()
}

/// Removes the bits at positions `>= length` of edabits that are wider than `length`.
///
/// Each removed bit is converted to the arithmetic domain with a fresh dabit and subtracted from the
/// arithmetic part, all removed bits are opened masked in one binary opening.
pub fn sanitize(
    session: &mut Session,
    multiplier: &mut Multiplier<Z64>,
    opener: &mut BinaryOpener,
    edabits: &mut [Edabit],
    length: usize,
) -> MpcResult<()> {
    let positions: Vec<(usize, usize)> = edabits
        .iter()
        .enumerate()
        .flat_map(|(j, e)| (length..e.length.min(64)).map(move |k| (j, k)))
        .collect();
    let masks = dabits(session, multiplier, positions.len())?;
    let masked: RssShareVec<BitVec> = positions
        .iter()
        .zip(&masks)
        .map(|((j, k), d)| mask(shr(edabits[*j].bin, *k), 1) + d.bin)
        .collect();
    let opened = opener.popen(session, &masked)?;
    for (((j, k), d), c) in positions.iter().zip(&masks).zip(opened) {
        // b = c ^ r = c + r - 2cr
        let bit = if c.as_u64() & 1 == 1 { session.constant(Z64(1)) - d.arith } else { d.arith };
        edabits[*j].arith -= bit * Z64::power_of_two(*k);
    }
    for e in edabits.iter_mut().filter(|e| e.length > length) {
        e.bin = mask(e.bin, length);
        e.length = length;
    }
    debug!(party = session.i, removed = positions.len(), "sanitized edabits");
    Ok(())
}

/// Checks `to_check` by adding `bucket_size - 1` sacrificial edabits to each of them in both domains.
///
/// Sacrificial edabit `j * (bucket_size - 1) + l` belongs to the checked edabit `j`. The sums are
/// opened and compared modulo `2^min(length+1, 64)`.
#[allow(clippy::too_many_arguments)]
pub fn edabit_sacrifice(
    session: &mut Session,
    and: &mut Multiplier<BitVec>,
    arith_opener: &mut ArithOpener,
    bin_opener: &mut BinaryOpener,
    to_check: Vec<Edabit>,
    sacrificial: &[Edabit],
    bucket_size: usize,
) -> MpcResult<Vec<Edabit>> {
    let b = bucket_size.saturating_sub(1);
    if bucket_size < 2 || sacrificial.len() < to_check.len() * b {
        return Err(MpcError::InvalidParameters(format!(
            "{} edabits with bucket size {} need {} sacrificial edabits, got {}",
            to_check.len(),
            bucket_size,
            to_check.len() * b,
            sacrificial.len()
        )));
    }
    let Some(length) = to_check.first().map(|e| e.length) else {
        return Ok(to_check);
    };
    if to_check.iter().chain(sacrificial).any(|e| e.length != length) {
        return Err(MpcError::InvalidParameters("edabits of different lengths in one sacrifice".to_string()));
    }
    let width = (length + 1).min(64);
    let pairs: Vec<(&Edabit, &Edabit)> =
        to_check.iter().enumerate().flat_map(|(j, e)| sacrificial[j * b..(j + 1) * b].iter().map(move |s| (e, s))).collect();

    let arith_sums: RssShareVec<Z64> = pairs.iter().map(|(e, s)| e.arith + s.arith).collect();
    let lhs: Vec<RssShare<BitVec>> = pairs.iter().map(|(e, _)| e.bin).collect();
    let rhs: Vec<RssShare<BitVec>> = pairs.iter().map(|(_, s)| s.bin).collect();
    let sums = BitAdder::add(session, and, &to_slices(&lhs, width)?, &to_slices(&rhs, width)?)?;
    let bin_sums = from_slices(&sums, pairs.len())?;

    let arith_open = arith_opener.popen(session, &arith_sums)?;
    let bin_open = bin_opener.popen(session, &bin_sums)?;
    arith_opener.check(session)?;
    bin_opener.check(session)?;
    and.check(session)?;

    for (a, b) in arith_open.iter().zip(&bin_open) {
        if mask_bits(a.0, width) != mask_bits(b.as_u64(), width) {
            warn!(party = session.i, length, "edabit sacrifice failed");
            return Err(MpcError::Sacrifice);
        }
    }
    debug!(party = session.i, checked = to_check.len(), bucket_size, "edabits verified");
    Ok(to_check)
}

/// Adds the summands of every item with `and` gates.
pub fn bit_add<A: BinaryAnd + ?Sized>(
    session: &mut Session,
    and: &mut A,
    items: &[Vec<RssShareVec<BitVec>>],
) -> MpcResult<Vec<RssShareVec<BitVec>>> {
    BitAdder::add_many(session, and, items)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use itertools::izip;

    use crate::open::{HashCheckedMC, Messaging, Opening};
    use crate::party::error::MpcError;
    use crate::party::test_export::simple_local_setup;
    use crate::prep::{DataFiles, DataKind, Edabit, MaterialStore};
    use crate::protocol::{Multiplier, SecurityModel};
    use crate::share::test::consistent;
    use crate::share::{BitVec, HasZero, Ring, RssShare, Z64};

    use super::{bits, dabits, edabit_sacrifice, edabits, personal_edabits, personal_triples, sanitize};

    fn reconstruct<T: Ring>(shares: (&RssShare<T>, &RssShare<T>, &RssShare<T>)) -> T {
        shares.0.si + shares.1.si + shares.2.si
    }

    fn check_edabits(e1: &[Edabit], e2: &[Edabit], e3: &[Edabit], length: usize) {
        for (e1, e2, e3) in izip!(e1, e2, e3) {
            consistent(&e1.arith, &e2.arith, &e3.arith);
            consistent(&e1.bin, &e2.bin, &e3.bin);
            assert_eq!(e1.length, length);
            let a = reconstruct((&e1.arith, &e2.arith, &e3.arith));
            let b = reconstruct((&e1.bin, &e2.bin, &e3.bin));
            assert!(b.as_u64() < (1u64 << length));
            assert_eq!(a.0, b.as_u64());
        }
    }

    #[test]
    fn random_bits_are_bits() {
        let (b1, b2, b3) = simple_local_setup(|p| bits(p, 200));
        let mut ones = 0;
        for (b1, b2, b3) in izip!(&b1, &b2, &b3) {
            consistent(b1, b2, b3);
            let b = reconstruct((b1, b2, b3)).as_u64();
            assert!(b <= 1);
            ones += b;
        }
        assert!(ones > 0 && ones < 200);
    }

    #[test]
    fn dabits_agree_in_both_domains() {
        let (d1, d2, d3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::Malicious);
            let d = dabits(p, &mut mult, 100).unwrap();
            mult.check(p).unwrap();
            d
        });
        for (d1, d2, d3) in izip!(d1, d2, d3) {
            consistent(&d1.arith, &d2.arith, &d3.arith);
            let a = reconstruct((&d1.arith, &d2.arith, &d3.arith));
            let b = reconstruct((&d1.bin, &d2.bin, &d3.bin));
            assert!(a.0 <= 1);
            assert_eq!(a.0, b.as_u64());
        }
    }

    #[test]
    fn edabits_from_fresh_and_stocked_dabits() {
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::SemiHonest);
            let fresh = edabits(p, &mut mult, None, 10, 12).unwrap();
            let store = Arc::new(MaterialStore::new());
            store.append(DataKind::Dabit, dabits(p, &mut mult, 2 * 8).unwrap()).unwrap();
            let mut files = DataFiles::new(store);
            let stocked = edabits(p, &mut mult, Some(&mut files), 2, 8).unwrap();
            assert_eq!(files.get_usage().get(DataKind::Dabit), 16);
            let short = edabits(p, &mut mult, Some(&mut files), 1, 8);
            assert!(matches!(short, Err(MpcError::InsufficientPreprocessing { .. })));
            (fresh, stocked)
        });
        check_edabits(&r1.0, &r2.0, &r3.0, 12);
        check_edabits(&r1.1, &r2.1, &r3.1, 8);
    }

    #[test]
    fn personal_material() {
        let (r1, r2, r3) = simple_local_setup(|p| {
            let e = personal_edabits(p, 1, 5, 20).unwrap();
            let t = personal_triples(p, 2, 5).unwrap();
            (e, t)
        });
        check_edabits(&r1.0, &r2.0, &r3.0, 20);
        for (t1, t2, t3) in izip!(&r1.1, &r2.1, &r3.1) {
            consistent(&t1.c, &t2.c, &t3.c);
            let a = reconstruct((&t1.a, &t2.a, &t3.a));
            let b = reconstruct((&t1.b, &t2.b, &t3.b));
            let c = reconstruct((&t1.c, &t2.c, &t3.c));
            assert_eq!(a * b, c);
        }
    }

    #[test]
    fn sanitize_removes_high_bits() {
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::SemiHonest);
            let mut e = edabits(p, &mut mult, None, 20, 10).unwrap();
            let mut opener = HashCheckedMC::new(Messaging::direct());
            sanitize(p, &mut mult, &mut opener, &mut e, 6).unwrap();
            opener.check(p).unwrap();
            e
        });
        check_edabits(&r1, &r2, &r3, 6);
    }

    #[test]
    fn honest_edabits_survive_sacrifice() {
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::Malicious);
            let mut and = Multiplier::new(SecurityModel::Malicious);
            let to_check = edabits(p, &mut mult, None, 10, 16).unwrap();
            let sacrificial = edabits(p, &mut mult, None, 30, 16).unwrap();
            let mut arith = HashCheckedMC::new(Messaging::direct());
            let mut bin = HashCheckedMC::new(Messaging::direct());
            let checked = edabit_sacrifice(p, &mut and, &mut arith, &mut bin, to_check, &sacrificial, 4).unwrap();
            mult.check(p).unwrap();
            checked
        });
        check_edabits(&r1, &r2, &r3, 16);
    }

    #[test]
    fn inconsistent_edabit_fails_sacrifice() {
        let (r1, r2, r3) = simple_local_setup(|p| {
            let mut mult = Multiplier::new(SecurityModel::SemiHonest);
            let mut and = Multiplier::new(SecurityModel::SemiHonest);
            let mut to_check = edabits(p, &mut mult, None, 4, 8).unwrap();
            // the arithmetic part is off by 2 on every party
            to_check[1].arith += RssShare::constant(p.i, Z64(2));
            let sacrificial = edabits(p, &mut mult, None, 8, 8).unwrap();
            let mut arith = HashCheckedMC::new(Messaging::direct());
            let mut bin = HashCheckedMC::new(Messaging::direct());
            edabit_sacrifice(p, &mut and, &mut arith, &mut bin, to_check, &sacrificial, 3).map(|_| ())
        });
        for r in [r1, r2, r3] {
            assert!(matches!(r, Err(MpcError::Sacrifice)));
        }
    }

    #[test]
    fn sacrifice_needs_enough_edabits() {
        let (r1, _, _) = simple_local_setup(|p| {
            let mut and = Multiplier::new(SecurityModel::SemiHonest);
            let e = Edabit { arith: RssShare::ZERO, bin: RssShare::<BitVec>::ZERO, length: 8 };
            let mut arith = HashCheckedMC::new(Messaging::direct());
            let mut bin = HashCheckedMC::new(Messaging::direct());
            let res = edabit_sacrifice(p, &mut and, &mut arith, &mut bin, vec![e; 2], &[e; 3], 3).map(|_| ());
            // nothing was sent, the openers stay usable
            assert!(arith.popen(p, &[]).unwrap().is_empty());
            res
        });
        assert!(matches!(r1, Err(MpcError::InvalidParameters(_))));
    }
}
