//! Opening of MAC-tagged additive shares with a batched MAC check.
use std::mem;

use tracing::{debug, warn};

use crate::network::NetSerializable;
use crate::party::broadcast::Broadcast;
use crate::party::commitment;
use crate::party::correlated_randomness::GlobalRng;
use crate::party::error::{MpcError, MpcResult};
use crate::party::{RngExt, Session};
use crate::share::auth::AuthShare;
use crate::share::{GF2p64, HasZero};

use super::{Messaging, Opening};

/// Opens [AuthShare]s by summing the value shares of all parties.
///
/// The MACs of the opened values are only verified in [Opening::check], which must run before any
/// opened value is used for an output.
pub struct MacCheckMC {
    messaging: Messaging,
    alpha_i: GF2p64,
    own: Vec<AuthShare<GF2p64>>,
    received: Vec<Vec<GF2p64>>,
    /// opened values and the own MAC shares on them since the last check
    pending: Vec<(GF2p64, GF2p64)>,
}

impl MacCheckMC {
    pub fn new(messaging: Messaging, alpha_i: GF2p64) -> Self {
        Self { messaging, alpha_i, own: Vec::new(), received: Vec::new(), pending: Vec::new() }
    }

    /// Number of opened values waiting for a MAC check.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Opening for MacCheckMC {
    type Share = AuthShare<GF2p64>;
    type Clear = GF2p64;

    fn prepare(&mut self, shares: &[AuthShare<GF2p64>]) -> MpcResult<()> {
        self.own = shares.to_vec();
        self.received.clear();
        Ok(())
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        let values: Vec<GF2p64> = self.own.iter().map(|s| s.value).collect();
        let me = session.i;
        for to in (0..session.num_players()).filter(|j| *j != me) {
            self.messaging.send(session.player(), to, &values)?;
        }
        Ok(())
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        let n = session.num_players();
        let mut received = Vec::with_capacity(n - 1);
        let me = session.i;
        for from in (0..n).filter(|j| *j != me) {
            received.push(self.messaging.receive(session.player(), from, self.own.len())?);
        }
        self.received = received;
        Ok(())
    }

    fn finalize(&mut self) -> MpcResult<Vec<GF2p64>> {
        let own = mem::take(&mut self.own);
        let received = mem::take(&mut self.received);
        let opened: Vec<GF2p64> = own
            .iter()
            .enumerate()
            .map(|(k, share)| received.iter().fold(share.value, |acc, values| acc + values[k]))
            .collect();
        self.pending.extend(opened.iter().zip(own.iter()).map(|(x, share)| (*x, share.mac)));
        Ok(opened)
    }

    fn check(&mut self, session: &mut Session) -> MpcResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = mem::take(&mut self.pending);
        let mut rng = GlobalRng::setup_global(session)?;
        let coefficients = GF2p64::generate(rng.as_mut(), pending.len());

        let (mut mac_sum, mut value_sum) = (GF2p64::ZERO, GF2p64::ZERO);
        for (r, (x, mac)) in coefficients.into_iter().zip(pending.iter()) {
            mac_sum += r * *mac;
            value_sum += r * *x;
        }
        let sigma = mac_sum - self.alpha_i * value_sum;
        let sigma_bytes = GF2p64::as_byte_vec_slice(&[sigma]);

        let commitment = commitment::commit(&mut session.random_local, &sigma_bytes);
        let commitments = session.broadcast(&commitment)?;
        let sigmas = session.broadcast(&sigma_bytes)?;
        session.check_broadcast()?;

        let mut total = GF2p64::ZERO;
        for (from, (commitment, sigma_j)) in commitments.iter().zip(sigmas).enumerate() {
            if from != session.i {
                commitment::open(commitment, &sigma_j)?;
            }
            if sigma_j.len() != GF2p64::serialized_size(1) {
                return Err(MpcError::Commitment);
            }
            total += GF2p64::from_byte_vec(sigma_j, 1)[0];
        }
        if total != GF2p64::ZERO {
            warn!(party = session.i, checked = pending.len(), "MAC check failed");
            return Err(MpcError::MacCheckFailed);
        }
        debug!(party = session.i, checked = pending.len(), "MAC check passed");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::thread_rng;

    use crate::open::{MacCheckMC, Messaging, Opening};
    use crate::party::error::MpcError;
    use crate::party::test_export::local_setup;
    use crate::party::RngExt;
    use crate::share::auth::AuthShare;
    use crate::share::GF2p64;

    fn deal_all(secrets: &[GF2p64], alphas: &[GF2p64]) -> Vec<Vec<AuthShare<GF2p64>>> {
        let mut rng = thread_rng();
        let mut per_party = vec![Vec::new(); alphas.len()];
        for s in secrets {
            for (j, share) in AuthShare::deal(&mut rng, *s, alphas).into_iter().enumerate() {
                per_party[j].push(share);
            }
        }
        per_party
    }

    #[test]
    fn mac_check_accepts_honest_openings() {
        let alphas = GF2p64::generate(&mut thread_rng(), 3);
        let secrets = GF2p64::generate(&mut thread_rng(), 20);
        let shares = deal_all(&secrets, &alphas);
        let results = local_setup(3, |p| {
            let mut mc = MacCheckMC::new(Messaging::direct(), alphas[p.i]);
            let first = mc.popen(p, &shares[p.i][..10]).unwrap();
            let second = mc.popen(p, &shares[p.i][10..]).unwrap();
            assert_eq!(mc.pending(), 20);
            mc.check(p).unwrap();
            assert_eq!(mc.pending(), 0);
            [first, second].concat()
        });
        for opened in results {
            assert_eq!(opened, secrets);
        }
    }

    #[test]
    fn mac_check_detects_modified_value() {
        let alphas = GF2p64::generate(&mut thread_rng(), 4);
        let secrets = GF2p64::generate(&mut thread_rng(), 5);
        let mut shares = deal_all(&secrets, &alphas);
        shares[1][2].value += GF2p64(1);
        let results = local_setup(4, |p| {
            let mut mc = MacCheckMC::new(Messaging::direct(), alphas[p.i]);
            mc.popen(p, &shares[p.i]).unwrap();
            mc.check(p)
        });
        for r in results {
            assert!(matches!(r, Err(MpcError::MacCheckFailed)));
        }
    }
}
