use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::network::Player;
use crate::party::broadcast::Broadcast;
use crate::party::error::{MpcError, MpcResult};
use crate::party::{commitment, Session};

const CR_SEC_PARAM: usize = 128 / 8;

/// Randomness source shared between two parties setup via a shared, short, random seed to a local RNG
pub struct SharedRng(ChaCha20Rng);

/// Randomness source shared between all parties of a session.
pub struct GlobalRng(ChaCha20Rng);

fn xor_into_seed(seed: &mut [u8; 32], part: &[u8]) {
    for (s, p) in seed.iter_mut().zip(part) {
        *s ^= p;
    }
}

impl SharedRng {
    /// Sets up a [SharedRng] with every other party, `None` at the own index.
    ///
    /// Each pair commits to fresh seed parts, then opens them. The pairwise seed is the XOR of both parts.
    pub fn setup_all_pairwise<LocalRng: Rng + CryptoRng>(
        rng: &mut LocalRng,
        player: &mut dyn Player,
    ) -> MpcResult<Vec<Option<Self>>> {
        let n = player.num_players();
        let me = player.my_num();
        let peers: Vec<usize> = (0..n).filter(|p| *p != me).collect();
        // create one random seed part per peer
        let seeds: Vec<[u8; CR_SEC_PARAM]> = (0..n)
            .map(|_| {
                let mut seed = [0u8; CR_SEC_PARAM];
                rng.fill_bytes(&mut seed);
                seed
            })
            .collect();
        // commit to them
        for &to in &peers {
            let commitment = commitment::commit(rng, &seeds[to]);
            player.send_to(to, &commitment)?;
        }
        let mut other_commit = vec![Vec::new(); n];
        for &from in &peers {
            other_commit[from] = player.receive_from(from)?;
        }
        // open
        for &to in &peers {
            player.send_to(to, &seeds[to])?;
        }
        let mut rngs: Vec<Option<Self>> = (0..n).map(|_| None).collect();
        for &from in &peers {
            let other_seed = player.receive_from(from)?;
            commitment::open(&other_commit[from], &other_seed)?;
            if other_seed.len() != CR_SEC_PARAM {
                return Err(MpcError::Commitment);
            }
            let mut common_seed = [0u8; 32];
            xor_into_seed(&mut common_seed, &seeds[from]);
            xor_into_seed(&mut common_seed, &other_seed);
            rngs[from] = Some(Self(ChaCha20Rng::from_seed(common_seed)));
        }
        Ok(rngs)
    }
}

impl GlobalRng {
    /// Agrees on a fresh common seed by broadcasting commitments to seed parts before opening them.
    pub fn setup_global(session: &mut Session) -> MpcResult<Self> {
        // create random seed part
        let mut seed = [0u8; CR_SEC_PARAM];
        session.random_local.fill_bytes(&mut seed);
        // commit to it
        let commitment = commitment::commit(&mut session.random_local, &seed);

        let commitments = session.broadcast(&commitment)?;
        let seeds = session.broadcast(&seed)?;

        // verify broadcast
        session.check_broadcast()?;
        let mut common_seed = [0u8; 32];
        for (from, (commitment, other_seed)) in commitments.iter().zip(&seeds).enumerate() {
            if from != session.i {
                // verify the commitments
                commitment::open(commitment, other_seed)?;
            }
            if other_seed.len() != CR_SEC_PARAM {
                return Err(MpcError::Commitment);
            }
            xor_into_seed(&mut common_seed, other_seed);
        }
        Ok(Self(ChaCha20Rng::from_seed(common_seed)))
    }
}

impl AsMut<ChaCha20Rng> for SharedRng {
    fn as_mut(&mut self) -> &mut ChaCha20Rng {
        &mut self.0
    }
}

impl AsMut<ChaCha20Rng> for GlobalRng {
    fn as_mut(&mut self) -> &mut ChaCha20Rng {
        &mut self.0
    }
}

impl GlobalRng {
    /// Draws a random tape for a Fisher-Yates shuffle of `len` elements.
    ///
    /// Applying the same tape to several slices permutes them identically.
    pub fn shuffle_tape(&mut self, len: usize) -> Vec<usize> {
        (1..len)
            .rev()
            .map(|i| {
                // random number from 0 to i (inclusive)
                if i < (u32::MAX as usize) {
                    self.0.gen_range(0..=i as u32) as usize
                } else {
                    self.0.gen_range(0..=i)
                }
            })
            .collect()
    }
}

/// Applies a tape returned by [GlobalRng::shuffle_tape].
pub fn shuffle_from_random_tape<T>(tape: &[usize], slice: &mut [T]) {
    debug_assert_eq!(tape.len() + 1, slice.len().max(1));
    for (tape_idx, i) in (1..slice.len()).rev().enumerate() {
        // invariant: elements with index > i have been locked in place.
        slice.swap(i, tape[tape_idx]);
    }
}

#[cfg(test)]
mod test {
    use rand::RngCore;

    use crate::party::correlated_randomness::{shuffle_from_random_tape, GlobalRng};
    use crate::party::test_export::local_setup;
    use crate::party::RngExt;
    use crate::share::Z64;

    #[test]
    fn setup_global() {
        let results = local_setup(4, |p| {
            let mut rng = GlobalRng::setup_global(p).unwrap();
            let mut buf = [0u8; 100];
            rng.as_mut().fill_bytes(&mut buf);
            let tape = rng.shuffle_tape(10);
            (buf.to_vec(), tape)
        });
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
    }

    #[test]
    fn pairwise_rngs_agree() {
        let results = local_setup(3, |p| {
            let next = Z64::generate(p.shared_rng(p.next()), 5);
            let prev = Z64::generate(p.shared_rng(p.prev()), 5);
            (next, prev)
        });
        for i in 0..3 {
            // my rng with next is next's rng with prev
            assert_eq!(results[i].0, results[(i + 1) % 3].1);
        }
        assert_ne!(results[0].0, results[1].0);
    }

    #[test]
    fn shuffle_is_permutation() {
        let tape = vec![0, 1, 1, 0];
        let mut v: Vec<usize> = (0..5).collect();
        shuffle_from_random_tape(&tape, &mut v);
        let mut sorted = v.clone();
        sorted.sort();
        assert_eq!(sorted, (0..5).collect::<Vec<_>>());
        assert_ne!(v, (0..5).collect::<Vec<_>>());
    }
}
