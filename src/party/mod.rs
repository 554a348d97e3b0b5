//! This module provides the session of a party: its connections, correlated randomness and broadcast transcript.
pub mod broadcast;
pub mod commitment;
pub mod correlated_randomness;
pub mod error;

use std::io::{self, ErrorKind};
use std::ops::Sub;

use rand::{CryptoRng, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::network::Player;
use crate::share::{HasZero, Ring, RssShare, RssShareVec};

use self::broadcast::Transcript;
use self::correlated_randomness::SharedRng;
use self::error::MpcResult;

///Provides methods to feed elements into a hash function.
pub trait DigestExt: Sized {
    /// Feeds a slice of elements to a hash function.
    fn update<D: Digest>(digest: &mut D, message: &[Self]);
}

/// Provides methods to generate random values.
pub trait RngExt: Sized + Clone + HasZero {
    /// Fill the given buffer with random elements.
    fn fill<R: Rng + CryptoRng>(rng: &mut R, buf: &mut [Self]);

    /// Generate a random vector of elements of length `n`.
    fn generate<R: Rng + CryptoRng>(rng: &mut R, n: usize) -> Vec<Self> {
        let mut v = vec![Self::ZERO; n];
        Self::fill(rng, &mut v);
        v
    }
}

/// The state one worker thread of a party needs to run protocols with the others.
///
/// There is exactly one [Session] per worker thread, it exclusively owns the thread's [Player].
pub struct Session {
    /// The party's index `i`.
    pub i: usize,
    pub(crate) player: Box<dyn Player>,
    shared: Vec<Option<SharedRng>>,
    pub random_local: ChaCha20Rng,
    pub(crate) transcript: Transcript,
}

impl Session {
    /// - `prot_string` - a string that describes the setup this party has (application-specific to detect inconsistent configuration between parties)
    pub fn setup(mut player: Box<dyn Player>, prot_string: Option<String>) -> MpcResult<Self> {
        let mut random_local = ChaCha20Rng::from_entropy();
        let shared = SharedRng::setup_all_pairwise(&mut random_local, player.as_mut())?;
        let n = player.num_players();
        let mut session = Self {
            i: player.my_num(),
            player,
            shared,
            random_local,
            transcript: Transcript::new(n),
        };

        if let Some(prot_str) = prot_string {
            // hash prot_string and send it to everybody
            let prot_str_hash = Sha256::digest(prot_str.as_bytes()).to_vec();
            let hashes = session.player.exchange_all(&prot_str_hash)?;
            // now check if all prot_str are the same
            if hashes.iter().any(|h| *h != prot_str_hash) {
                let message = format!("Protocol string does not match the one received from the other parties (hashes don't match). Check that the same configuration/protocol/threads etc are used to run all parties. My protocol string: '{}'", prot_str);
                error!("{}", message);
                return Err(error::MpcError::Io(io::Error::new(ErrorKind::InvalidInput, message)));
            }
        }
        debug!(party = session.i, n_parties = n, "session set up");
        Ok(session)
    }

    pub fn num_players(&self) -> usize {
        self.player.num_players()
    }

    pub fn next(&self) -> usize {
        self.player.next()
    }

    pub fn prev(&self) -> usize {
        self.player.prev()
    }

    pub fn player(&mut self) -> &mut dyn Player {
        self.player.as_mut()
    }

    /// The RNG shared with party `j`, the local RNG for the own index.
    pub fn shared_rng(&mut self, j: usize) -> &mut ChaCha20Rng {
        match self.shared.get_mut(j).and_then(Option::as_mut) {
            Some(rng) => rng.as_mut(),
            None => &mut self.random_local,
        }
    }

    /// Returns `n` replicated shares of random values.
    pub fn generate_random<T: RngExt>(&mut self, n: usize) -> RssShareVec<T> {
        let (next, prev) = (self.next(), self.prev());
        let si = T::generate(self.shared_rng(prev), n);
        let sii = T::generate(self.shared_rng(next), n);
        si.into_iter().zip(sii).map(|(si, sii)| RssShare::from(si, sii)).collect()
    }

    /// returns alpha_i s.t. alpha_1 + alpha_2 + alpha_3 = 0
    pub fn generate_alpha<T: RngExt + Sub<Output = T>>(&mut self, n: usize) -> Vec<T> {
        let (next, prev) = (self.next(), self.prev());
        let from_next = T::generate(self.shared_rng(next), n);
        let from_prev = T::generate(self.shared_rng(prev), n);
        from_next.into_iter().zip(from_prev).map(|(next, prev)| next - prev).collect()
    }

    #[inline]
    pub fn constant<T: Ring>(&self, value: T) -> RssShare<T> {
        RssShare::constant(self.i, value)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.player.bytes_sent()
    }

    pub fn teardown(&mut self) -> MpcResult<()> {
        self.player.teardown()
    }
}

#[cfg(any(test, feature = "benchmark-helper"))]
pub mod test_export {
    use std::thread;

    use crate::network::LocalNetwork;

    use super::Session;

    /// Runs `f` for every party of an in-memory network of `n` parties, each in its own thread named `party{i}`.
    ///
    /// The results are returned in party order.
    pub fn local_setup<T: Send>(n: usize, f: impl Fn(&mut Session) -> T + Send + Sync) -> Vec<T> {
        let players = LocalNetwork::mesh(n);
        thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = players
                .into_iter()
                .enumerate()
                .map(|(i, player)| {
                    thread::Builder::new()
                        .name(format!("party{}", i + 1))
                        .spawn_scoped(scope, move || {
                            let mut session = Session::setup(Box::new(player), None).unwrap();
                            f(&mut session)
                        })
                        .unwrap()
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    /// [local_setup] with three parties.
    pub fn simple_local_setup<T: Send>(f: impl Fn(&mut Session) -> T + Send + Sync) -> (T, T, T) {
        let mut results = local_setup(3, f).into_iter();
        match (results.next(), results.next(), results.next()) {
            (Some(r1), Some(r2), Some(r3)) => (r1, r2, r3),
            _ => unreachable!("three parties return three results"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::network::LocalNetwork;
    use crate::share::test::{assert_eq, consistent};
    use crate::share::{HasZero, Z64};

    use super::test_export::{local_setup, simple_local_setup};
    use super::Session;

    #[test]
    fn random_shares_are_consistent() {
        let (r1, r2, r3) = simple_local_setup(|p| p.generate_random::<Z64>(10));
        for i in 0..10 {
            consistent(&r1[i], &r2[i], &r3[i]);
        }
    }

    #[test]
    fn alphas_sum_to_zero() {
        let (a1, a2, a3) = simple_local_setup(|p| p.generate_alpha::<Z64>(10));
        for i in 0..10 {
            assert_eq!(a1[i] + a2[i] + a3[i], Z64::ZERO);
        }
    }

    #[test]
    fn constants_reconstruct() {
        let (c1, c2, c3) = simple_local_setup(|p| p.constant(Z64(99)));
        consistent(&c1, &c2, &c3);
        assert_eq(c1, c2, c3, Z64(99));
    }

    #[test]
    fn protocol_string_mismatch_is_rejected() {
        let players = LocalNetwork::mesh(3);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = players
                .into_iter()
                .enumerate()
                .map(|(i, player)| {
                    scope.spawn(move || {
                        let prot = if i == 2 { "threads=2" } else { "threads=1" };
                        Session::setup(Box::new(player), Some(prot.to_string())).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![false, false, false]);
    }

    #[test]
    fn session_works_for_more_parties() {
        let sent = local_setup(5, |p| {
            let (next, me) = (p.next(), p.i as u8);
            p.player().send_to(next, &[me]).unwrap();
            let prev = p.prev();
            p.player().receive_from(prev).unwrap()
        });
        assert_eq!(sent, vec![vec![4], vec![0], vec![1], vec![2], vec![3]]);
    }
}
