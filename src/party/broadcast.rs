use sha2::digest::FixedOutput;
use sha2::{Digest, Sha256};

use crate::party::error::{MpcError, MpcResult};
use crate::party::{DigestExt, Session};

/// The hashed views of a replicated-sharing protocol run.
///
/// `view_prev` collects what this party received from its previous party, `view_next` what the next
/// party must have received from the previous party. For three parties both describe the messages of
/// the same sender and [Broadcast::compare_view] checks that they agree.
pub struct BroadcastContext {
    view_next: Sha256,
    view_prev: Sha256,
}

impl Default for BroadcastContext {
    fn default() -> Self {
        BroadcastContext::new()
    }
}

impl BroadcastContext {
    pub fn new() -> Self {
        Self {
            view_next: Sha256::new(),
            view_prev: Sha256::new(),
        }
    }

    pub fn add_to_next_view<T: DigestExt>(&mut self, elements: &[T]) {
        T::update(&mut self.view_next, elements);
    }

    pub fn add_to_prev_view<T: DigestExt>(&mut self, elements: &[T]) {
        T::update(&mut self.view_prev, elements);
    }
}

/// Running hashes of all broadcast messages, one per sender.
pub struct Transcript {
    per_sender: Vec<Sha256>,
}

impl Transcript {
    pub fn new(n_parties: usize) -> Self {
        Self {
            per_sender: (0..n_parties).map(|_| Sha256::new()).collect(),
        }
    }

    pub fn record(&mut self, from: usize, message: &[u8]) {
        let hasher = &mut self.per_sender[from];
        Digest::update(hasher, (message.len() as u64).to_be_bytes());
        Digest::update(hasher, message);
    }

    /// Digest over all senders, resets the transcript.
    fn finalize_reset(&mut self) -> Vec<u8> {
        let mut combined = Sha256::new();
        for hasher in self.per_sender.iter_mut() {
            Digest::update(&mut combined, hasher.finalize_reset());
        }
        combined.finalize().to_vec()
    }
}

/// Echo broadcast over point-to-point channels.
///
/// Messages are delivered immediately. A sender that equivocates is only detected by the next
/// [Broadcast::check_broadcast].
pub trait Broadcast {
    /// Sends `message` to everybody and returns the messages of all parties, including the own.
    fn broadcast(&mut self, message: &[u8]) -> MpcResult<Vec<Vec<u8>>>;

    /// Sends a message that only this party broadcasts in this round.
    fn send_broadcast(&mut self, message: &[u8]) -> MpcResult<()>;

    /// Receives the message party `from` broadcasts in this round.
    fn receive_broadcast(&mut self, from: usize) -> MpcResult<Vec<u8>>;

    /// Compares the transcripts of all parties since the last check.
    fn check_broadcast(&mut self) -> MpcResult<()>;

    /// Compares the [BroadcastContext] with the neighbouring parties (three parties only).
    fn compare_view(&mut self, context: BroadcastContext) -> MpcResult<()>;
}

impl Broadcast for Session {
    fn broadcast(&mut self, message: &[u8]) -> MpcResult<Vec<Vec<u8>>> {
        let received = self.player.exchange_all(message)?;
        for (from, msg) in received.iter().enumerate() {
            self.transcript.record(from, msg);
        }
        Ok(received)
    }

    fn send_broadcast(&mut self, message: &[u8]) -> MpcResult<()> {
        self.player.send_all(message)?;
        self.transcript.record(self.i, message);
        Ok(())
    }

    fn receive_broadcast(&mut self, from: usize) -> MpcResult<Vec<u8>> {
        let msg = self.player.receive_from(from)?;
        self.transcript.record(from, &msg);
        Ok(msg)
    }

    fn check_broadcast(&mut self) -> MpcResult<()> {
        let digest = self.transcript.finalize_reset();
        let views = self.player.exchange_all(&digest)?;
        if views.iter().any(|view| *view != digest) {
            return Err(MpcError::Broadcast);
        }
        Ok(())
    }

    fn compare_view(&mut self, context: BroadcastContext) -> MpcResult<()> {
        // send my view of P-1 to P+1
        let view = context.view_prev.finalize_fixed();
        let next = self.player.next();
        let prev = self.player.prev();
        self.player.send_to(next, &view)?;
        // receive P-1's view of P+1
        let view_next = self.player.receive_from(prev)?;
        let check_next = context.view_next.finalize_fixed();
        if view_next[..] != check_next[..] {
            return Err(MpcError::Broadcast);
        }
        Ok(())
    }
}
