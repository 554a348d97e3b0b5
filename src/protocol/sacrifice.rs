//! Bucket cut-and-choose for replicated multiplication triples.
use itertools::izip;
use tracing::{debug, warn};

use crate::network::PlayerExt;
use crate::party::broadcast::{Broadcast, BroadcastContext};
use crate::party::correlated_randomness::{shuffle_from_random_tape, GlobalRng};
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::share::{Ring, RssShare};

use super::{optimistic_triples, MulTripleVector};

// required bucket size B for B=C for 2^10, 2^11, ..., 2^19; all batches > 2^19 use B=3; all batches < 2^10 use B=5
const BUCKET_SIZE: [usize; 10] = [5, 5, 5, 4, 4, 4, 4, 4, 4, 3];

/// Returns `(N, B)`: the number of triples to produce and the bucket size for a request of `n`.
#[allow(non_snake_case)]
fn parameters(n: usize) -> MpcResult<(usize, usize)> {
    let pow = n
        .max(1)
        .checked_next_power_of_two()
        .ok_or_else(|| MpcError::InvalidParameters(format!("cannot produce {} triples", n)))?;
    let log = pow.trailing_zeros() as usize;
    let (N, B) = if log <= 10 {
        (1 << 10, BUCKET_SIZE[0])
    } else if log >= 20 {
        (pow, BUCKET_SIZE[9])
    } else {
        (pow, BUCKET_SIZE[log - 10])
    };
    Ok((N, B))
}

/// Returns `n` multiplication triples that are checked for correctness using bucket cut-and-choose.
/// This implementation has a fixed soundness of 40-bit.
///
/// Unless `n` is a power of 2 larger or equal to 2^10, this function generates more triples but only returns exactly `n`.
#[allow(non_snake_case)]
pub fn bucket_cut_and_choose<T: Ring>(session: &mut Session, n: usize) -> MpcResult<MulTripleVector<T>> {
    let (N, B) = parameters(n)?;
    let C = B;
    let M = N * B + C;
    debug!(party = session.i, n, N, B, M, "bucket cut-and-choose");
    // generate multiplication triples optimistically
    let mut triples = optimistic_triples::<T>(session, M)?;

    // obtain fresh global randomness
    let mut rng = GlobalRng::setup_global(session)?;
    let tape = rng.shuffle_tape(M);
    {
        let (ai, aii, bi, bii, ci, cii) = triples.as_mut_slices();
        for slice in [ai, aii, bi, bii, ci, cii] {
            shuffle_from_random_tape(&tape, slice);
        }
    }

    // open and check the first C triples
    let mut rest = triples.split_off(C);
    if !open_and_check(session, &triples)? {
        warn!(party = session.i, "opened triples don't check out");
        return Err(MpcError::Sacrifice);
    }

    let mut to_sacrifice = rest.split_off(N);
    sacrifice(session, N, B - 1, &rest, &mut to_sacrifice)?;
    rest.shrink(n);
    Ok(rest)
}

fn open_and_check<T: Ring>(session: &mut Session, triples: &MulTripleVector<T>) -> MpcResult<bool> {
    let len = triples.len();
    let aii_bii_cii: Vec<T> = triples.aii().iter().chain(triples.bii()).chain(triples.cii()).copied().collect();
    let (next, prev) = (session.next(), session.prev());
    session.player().send_elements(prev, &aii_bii_cii)?;
    let aiii_biii_ciii: Vec<T> = session.player().receive_elements(next, 3 * len)?;
    // check that all are correct
    for k in 0..len {
        let a = triples.ai()[k] + triples.aii()[k] + aiii_biii_ciii[k];
        let b = triples.bi()[k] + triples.bii()[k] + aiii_biii_ciii[len + k];
        let c = triples.ci()[k] + triples.cii()[k] + aiii_biii_ciii[2 * len + k];
        if a * b != c {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Checks triples by sacrificing a bucket of other triples for each of them.
///
/// Parameters
///  - `n` denotes the number of triples to check
///  - `sacrifice_bucket_size` denotes the number of triples to sacrifice for **each** triple that is checked.
///  - `to_check` contains the `n` triples to check
///  - `to_sacrifice` contains `n * sacrifice_bucket_size` triples, triple `k` is checked against
///    `k * sacrifice_bucket_size .. (k+1) * sacrifice_bucket_size`.
///
/// Returns `Ok(())` if the `to_check` values form correct multiplication triples, otherwise [MpcError::Sacrifice].
pub fn sacrifice<T: Ring>(
    session: &mut Session,
    n: usize,
    sacrifice_bucket_size: usize,
    to_check: &MulTripleVector<T>,
    to_sacrifice: &mut MulTripleVector<T>,
) -> MpcResult<()> {
    debug_assert_eq!(n, to_check.len());
    debug_assert!(to_sacrifice.len() >= n * sacrifice_bucket_size);
    to_sacrifice.shrink(n * sacrifice_bucket_size);

    #[inline]
    fn sub_from_bucket<T: Ring>(bucket: &mut [T], el: &[T], sacrifice_bucket_size: usize) {
        debug_assert_eq!(bucket.len(), el.len() * sacrifice_bucket_size);
        for (chunk, el) in bucket.chunks_exact_mut(sacrifice_bucket_size).zip(el) {
            for x in chunk.iter_mut() {
                // x - a
                *x = *el - *x;
            }
        }
    }

    let (ai, aii, bi, bii, ci, cii) = to_sacrifice.as_mut_slices();
    let (mut rho_i, mut rho_ii) = (ai.to_vec(), aii.to_vec());
    let (mut sigma_i, mut sigma_ii) = (bi.to_vec(), bii.to_vec());
    sub_from_bucket(&mut rho_i, to_check.ai(), sacrifice_bucket_size);
    sub_from_bucket(&mut rho_ii, to_check.aii(), sacrifice_bucket_size);
    sub_from_bucket(&mut sigma_i, to_check.bi(), sacrifice_bucket_size);
    sub_from_bucket(&mut sigma_ii, to_check.bii(), sacrifice_bucket_size);

    // open rho and sigma
    let (next, prev) = (session.next(), session.prev());
    let rho_ii_sigma_ii: Vec<T> = rho_ii.iter().chain(sigma_ii.iter()).copied().collect();
    session.player().send_elements(prev, &rho_ii_sigma_ii)?;
    let m = rho_i.len();
    let rho_iii_sigma_iii: Vec<T> = session.player().receive_elements(next, 2 * m)?;
    let rho: Vec<T> = izip!(&rho_i, &rho_ii, &rho_iii_sigma_iii[..m]).map(|(si, sii, siii)| *si + *sii + *siii).collect();
    let sigma: Vec<T> =
        izip!(&sigma_i, &sigma_ii, &rho_iii_sigma_iii[m..]).map(|(si, sii, siii)| *si + *sii + *siii).collect();

    let mut context = BroadcastContext::new();
    for k in 0..m {
        let (rho, sigma) = (rho[k], sigma[k]);
        let (_, _, checked_c) = to_check.get(k / sacrifice_bucket_size);
        let a = RssShare::from(ai[k], aii[k]);
        let b = RssShare::from(bi[k], bii[k]);
        let c = RssShare::from(ci[k], cii[k]);
        // z - c - sigma*a - rho*b - rho*sigma
        let zero = checked_c - c - a * sigma - b * rho - session.constant(rho * sigma);
        // compare_view sends my prev_view to P+1 and compares it to that party's next_view
        // so we write zero_i to prev_view s.t. P+1 compares it to -zero_ii - zero_iii
        context.add_to_prev_view(&[zero.si]);
        context.add_to_next_view(&[-zero.si - zero.sii]);
    }

    session.compare_view(context).map_err(|mpc_err| match mpc_err {
        MpcError::Broadcast => {
            warn!(party = session.i, "bucket triples failed");
            MpcError::Sacrifice
        }
        _ => mpc_err,
    })
}

#[cfg(test)]
mod test {
    use crate::party::test_export::simple_local_setup;
    use crate::protocol::test::check_triples;
    use crate::share::{BitVec, Z64};

    use super::{bucket_cut_and_choose, parameters};

    #[test]
    fn bucket_parameters() {
        assert_eq!(parameters(1).unwrap(), (1 << 10, 5));
        assert_eq!(parameters(1000).unwrap(), (1 << 10, 5));
        assert_eq!(parameters(1 << 13).unwrap(), (1 << 13, 4));
        assert_eq!(parameters((1 << 13) + 1).unwrap(), (1 << 14, 4));
        assert_eq!(parameters(1 << 19).unwrap(), (1 << 19, 3));
        assert_eq!(parameters(1 << 22).unwrap(), (1 << 22, 3));
    }

    #[test]
    fn correct_binary_triples() {
        let (t1, t2, t3) = simple_local_setup(|p| bucket_cut_and_choose::<BitVec>(p, 100).unwrap());
        check_triples(t1, t2, t3, 100);
    }

    #[test]
    fn correct_z64_triples() {
        let (t1, t2, t3) = simple_local_setup(|p| bucket_cut_and_choose::<Z64>(p, 1 << 10).unwrap());
        check_triples(t1, t2, t3, 1 << 10);
    }
}
