//! Openings of replicated 2-out-of-3 shares.
//!
//! Party `i` holds `(s_i, s_{i+1})` and misses `s_{i-1}`, which it receives from its previous party.
use std::mem;

use tracing::warn;

use crate::party::broadcast::{Broadcast, BroadcastContext};
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::share::{Ring, RssShare};

use super::{Messaging, Opening};

/// Semi-honest opening, the missing component is sent by the previous party.
pub struct ReplicatedMC<T> {
    messaging: Messaging,
    shares: Vec<RssShare<T>>,
    received: Vec<T>,
}

impl<T: Ring> ReplicatedMC<T> {
    pub fn new(messaging: Messaging) -> Self {
        Self { messaging, shares: Vec::new(), received: Vec::new() }
    }
}

impl<T: Ring> Opening for ReplicatedMC<T> {
    type Share = RssShare<T>;
    type Clear = T;

    fn prepare(&mut self, shares: &[RssShare<T>]) -> MpcResult<()> {
        self.shares = shares.to_vec();
        self.received.clear();
        Ok(())
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        let si: Vec<T> = self.shares.iter().map(|s| s.si).collect();
        let next = session.next();
        self.messaging.send(session.player(), next, &si)
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        let prev = session.prev();
        self.received = self.messaging.receive(session.player(), prev, self.shares.len())?;
        Ok(())
    }

    fn finalize(&mut self) -> MpcResult<Vec<T>> {
        if self.received.len() != self.shares.len() {
            return Err(MpcError::InvalidParameters(format!(
                "received {} values for a batch of {}",
                self.received.len(),
                self.shares.len()
            )));
        }
        let shares = mem::take(&mut self.shares);
        let received = mem::take(&mut self.received);
        Ok(shares.into_iter().zip(received).map(|(s, siii)| s.si + s.sii + siii).collect())
    }

    fn check(&mut self, _session: &mut Session) -> MpcResult<()> {
        Ok(())
    }
}

/// Opening that detects a party sending a wrong component.
///
/// The component received from the previous party is also held by the next party as its `sii`.
/// [Opening::check] compares the hashes of both views.
pub struct HashCheckedMC<T> {
    inner: ReplicatedMC<T>,
    context: BroadcastContext,
}

impl<T: Ring> HashCheckedMC<T> {
    pub fn new(messaging: Messaging) -> Self {
        Self { inner: ReplicatedMC::new(messaging), context: BroadcastContext::new() }
    }
}

impl<T: Ring> Opening for HashCheckedMC<T> {
    type Share = RssShare<T>;
    type Clear = T;

    fn prepare(&mut self, shares: &[RssShare<T>]) -> MpcResult<()> {
        self.inner.prepare(shares)
    }

    fn send(&mut self, session: &mut Session) -> MpcResult<()> {
        self.inner.send(session)
    }

    fn receive(&mut self, session: &mut Session) -> MpcResult<()> {
        self.inner.receive(session)
    }

    fn finalize(&mut self) -> MpcResult<Vec<T>> {
        let sii: Vec<T> = self.inner.shares.iter().map(|s| s.sii).collect();
        self.context.add_to_prev_view(&self.inner.received);
        self.context.add_to_next_view(&sii);
        self.inner.finalize()
    }

    fn check(&mut self, session: &mut Session) -> MpcResult<()> {
        let context = mem::take(&mut self.context);
        session.compare_view(context).map_err(|err| match err {
            MpcError::Broadcast => {
                warn!(party = session.i, "opened values are inconsistent");
                MpcError::MacCheckFailed
            }
            err => err,
        })
    }
}
