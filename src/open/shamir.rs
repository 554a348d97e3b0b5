//! Openings of Shamir shares over GF(2^64), every party sends its share to everybody.
use std::mem;
use std::sync::Arc;

use tracing::warn;

use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::share::shamir::{reconstruction_table, ReconstructionTable};
use crate::share::{GF2p64, SchemeDescriptor};

use super::{Messaging, Opening};

/// Reconstructs from the first `t+1` shares and checks that every larger prefix up to `2t+1` agrees.
pub fn verify_redundant(table: &ReconstructionTable, shares: &[GF2p64]) -> MpcResult<GF2p64> {
    let t = table.threshold();
    debug_assert!(shares.len() >= 2 * t + 1);
    let baseline = table.reconstruct_prefix(shares, t + 1);
    for m in t + 2..=2 * t + 1 {
        if table.reconstruct_prefix(shares, m) != baseline {
            return Err(MpcError::ReconstructionMismatch);
        }
    }
    Ok(baseline)
}

/// State shared by the semi-honest and the malicious Shamir opener.
struct ShamirExchange {
    messaging: Messaging,
    n_parties: usize,
    table: Arc<ReconstructionTable>,
    own: Vec<GF2p64>,
    /// `received[j]` are the shares of party `j`, the own entry stays empty.
    received: Vec<Vec<GF2p64>>,
}

impl ShamirExchange {
    fn new(messaging: Messaging, scheme: &SchemeDescriptor) -> Self {
        Self {
            messaging,
            n_parties: scheme.n_parties,
            table: reconstruction_table(scheme.threshold),
            own: Vec::new(),
            received: Vec::new(),
        }
    }

    fn prepare(&mut self, shares: &[GF2p64]) {
        self.own = shares.to_vec();
        self.received.clear();
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        if session.num_players() != self.n_parties {
            return Err(MpcError::InvalidParameters(format!(
                "scheme expects {} parties, the session has {}",
                self.n_parties,
                session.num_players()
            )));
        }
        let me = session.i;
        for to in (0..self.n_parties).filter(|j| *j != me) {
            self.messaging.send(session.player(), to, &self.own)?;
        }
        Ok(())
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        let mut received = vec![Vec::new(); self.n_parties];
        for (from, slot) in received.iter_mut().enumerate() {
            if from != session.i {
                *slot = self.messaging.receive(session.player(), from, self.own.len())?;
            }
        }
        self.received = received;
        Ok(())
    }

    /// Calls `reconstruct` with all shares of every opened element.
    fn finalize<F>(&mut self, mut reconstruct: F) -> MpcResult<Vec<GF2p64>>
    where
        F: FnMut(&ReconstructionTable, &[GF2p64]) -> MpcResult<GF2p64>,
    {
        if self.received.len() != self.n_parties {
            return Err(MpcError::InvalidParameters("opening finalized before receiving".to_string()));
        }
        let own = mem::take(&mut self.own);
        let received = mem::take(&mut self.received);
        let mut column = vec![GF2p64::default(); self.n_parties];
        own.iter()
            .enumerate()
            .map(|(k, own_share)| {
                for (j, entry) in column.iter_mut().enumerate() {
                    *entry = if j < received.len() && !received[j].is_empty() { received[j][k] } else { *own_share };
                }
                reconstruct(&self.table, &column)
            })
            .collect()
    }
}

/// Semi-honest opening from the shares of the first `t+1` parties.
pub struct ShamirMC {
    exchange: ShamirExchange,
}

impl ShamirMC {
    pub fn new(messaging: Messaging, scheme: &SchemeDescriptor) -> Self {
        Self { exchange: ShamirExchange::new(messaging, scheme) }
    }
}

impl Opening for ShamirMC {
    type Share = GF2p64;
    type Clear = GF2p64;

    fn prepare(&mut self, shares: &[GF2p64]) -> MpcResult<()> {
        self.exchange.prepare(shares);
        Ok(())
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        self.exchange.send(session)
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        self.exchange.receive(session)
    }

    fn finalize(&mut self) -> MpcResult<Vec<GF2p64>> {
        self.exchange.finalize(|table, shares| Ok(table.reconstruct_prefix(shares, table.threshold() + 1)))
    }

    fn check(&mut self, _session: &mut Session) -> MpcResult<()> {
        Ok(())
    }
}

/// Opening that reconstructs redundantly from all prefixes of `t+1` to `2t+1` shares.
pub struct MaliciousShamirMC {
    exchange: ShamirExchange,
}

impl MaliciousShamirMC {
    pub fn new(messaging: Messaging, scheme: &SchemeDescriptor) -> MpcResult<Self> {
        if scheme.n_parties < 2 * scheme.threshold + 1 {
            return Err(MpcError::InvalidParameters(format!(
                "redundant reconstruction needs at least {} parties",
                2 * scheme.threshold + 1
            )));
        }
        Ok(Self { exchange: ShamirExchange::new(messaging, scheme) })
    }
}

impl Opening for MaliciousShamirMC {
    type Share = GF2p64;
    type Clear = GF2p64;

    fn prepare(&mut self, shares: &[GF2p64]) -> MpcResult<()> {
        self.exchange.prepare(shares);
        Ok(())
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        self.exchange.send(session)
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        self.exchange.receive(session)
    }

    fn finalize(&mut self) -> MpcResult<Vec<GF2p64>> {
        self.exchange.finalize(verify_redundant).map_err(|err| {
            if let MpcError::ReconstructionMismatch = err {
                warn!("shares of an opening are not on a polynomial of degree t");
            }
            err
        })
    }

    fn check(&mut self, _session: &mut Session) -> MpcResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::thread_rng;

    use crate::open::{MaliciousShamirMC, Messaging, Opening, ShamirMC};
    use crate::party::error::MpcError;
    use crate::party::test_export::local_setup;
    use crate::share::shamir::{deal, reconstruction_table};
    use crate::share::{GF2p64, Ring, SchemeDescriptor};

    use super::verify_redundant;

    fn deal_all(secrets: &[u64], n: usize, t: usize) -> Vec<Vec<GF2p64>> {
        let mut rng = thread_rng();
        let mut per_party = vec![Vec::new(); n];
        for s in secrets {
            for (j, share) in deal(&mut rng, GF2p64(*s), n, t).into_iter().enumerate() {
                per_party[j].push(share);
            }
        }
        per_party
    }

    #[test]
    fn semi_honest_shamir_open() {
        let scheme = SchemeDescriptor::new(64, 64, 4, 1).unwrap();
        let shares = deal_all(&[1, 2, 3, 0xdeadbeef], 4, 1);
        let opened = local_setup(4, |p| ShamirMC::new(Messaging::direct(), &scheme).popen(p, &shares[p.i]).unwrap());
        for o in opened {
            assert_eq!(o, vec![GF2p64(1), GF2p64(2), GF2p64(3), GF2p64(0xdeadbeef)]);
        }
    }

    #[test]
    fn malicious_shamir_opens_honest_sharing() {
        let scheme = SchemeDescriptor::new(64, 64, 5, 1).unwrap();
        let shares = deal_all(&[42], 5, 1);
        let opened = local_setup(5, |p| {
            MaliciousShamirMC::new(Messaging::direct(), &scheme).unwrap().popen(p, &shares[p.i]).unwrap()
        });
        for o in opened {
            assert_eq!(o, vec![GF2p64(42)]);
        }
    }

    #[test]
    fn malicious_shamir_detects_corrupted_share() {
        let scheme = SchemeDescriptor::new(64, 64, 5, 1).unwrap();
        let mut shares = deal_all(&[42], 5, 1);
        shares[2][0] += GF2p64(1);
        let results = local_setup(5, |p| MaliciousShamirMC::new(Messaging::direct(), &scheme).unwrap().popen(p, &shares[p.i]));
        for r in results {
            assert!(matches!(r, Err(MpcError::ReconstructionMismatch)));
        }
    }

    #[test]
    fn redundant_reconstruction_needs_enough_parties() {
        let scheme = SchemeDescriptor { n_bits: 64, default_length: 64, n_parties: 4, threshold: 2 };
        assert!(matches!(MaliciousShamirMC::new(Messaging::direct(), &scheme), Err(MpcError::InvalidParameters(_))));
    }

    #[test]
    fn verify_redundant_is_pure() {
        let table = reconstruction_table(2);
        let mut shares = deal(&mut thread_rng(), GF2p64(7), 5, 2);
        assert_eq!(verify_redundant(&table, &shares).unwrap(), GF2p64(7));
        shares[4] += GF2p64::ONE;
        assert!(matches!(verify_redundant(&table, &shares), Err(MpcError::ReconstructionMismatch)));
    }
}
