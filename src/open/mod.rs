//! Opening protocols turn shares back into clear values.
//!
//! Every opener follows the same phases: [Opening::prepare] computes the messages of a batch,
//! [Opening::send] and [Opening::receive] exchange them and [Opening::finalize] reconstructs the
//! clear values in input order. Malicious openers additionally accumulate what they have seen and
//! verify it in [Opening::check].
pub mod field;
pub mod mac_check;
pub mod replicated;
pub mod shamir;

use serde::Deserialize;

use crate::network::{NetSerializable, Player, PlayerExt};
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;

pub use field::{FieldOpener, FieldScheme, FieldShares};
pub use mac_check::MacCheckMC;
pub use replicated::{HashCheckedMC, ReplicatedMC};
pub use shamir::{MaliciousShamirMC, ShamirMC};

/// How the messages of an opening are put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningMode {
    /// The batch is split into messages of at most `max_broadcast` elements.
    #[default]
    Indirect,
    /// One message per batch.
    Direct,
    /// Openings overlapping with computation (not available).
    Parallel,
}

/// Sends and receives the element vectors of one opening according to an [OpeningMode].
#[derive(Clone, Copy, Debug)]
pub struct Messaging {
    mode: OpeningMode,
    max_broadcast: usize,
}

impl Messaging {
    pub fn new(mode: OpeningMode, max_broadcast: usize) -> MpcResult<Self> {
        match mode {
            OpeningMode::Parallel => Err(MpcError::NotImplemented("parallel opening".to_string())),
            OpeningMode::Indirect if max_broadcast == 0 => {
                Err(MpcError::InvalidParameters("max_broadcast must be positive".to_string()))
            }
            _ => Ok(Self { mode, max_broadcast }),
        }
    }

    pub fn direct() -> Self {
        Self { mode: OpeningMode::Direct, max_broadcast: usize::MAX }
    }

    fn chunk_len(&self, len: usize) -> usize {
        match self.mode {
            OpeningMode::Indirect => self.max_broadcast,
            _ => len.max(1),
        }
    }

    pub fn send<T: NetSerializable>(&self, player: &mut dyn Player, to: usize, elements: &[T]) -> MpcResult<()> {
        if elements.is_empty() {
            return player.send_elements::<T>(to, &[]);
        }
        for chunk in elements.chunks(self.chunk_len(elements.len())) {
            player.send_elements(to, chunk)?;
        }
        Ok(())
    }

    /// Receives exactly `len` elements, a message of a different size is an error.
    pub fn receive<T: NetSerializable>(&self, player: &mut dyn Player, from: usize, len: usize) -> MpcResult<Vec<T>> {
        if len == 0 {
            return player.receive_elements(from, 0);
        }
        let chunk = self.chunk_len(len);
        let mut res = Vec::with_capacity(len);
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(chunk);
            res.extend(player.receive_elements::<T>(from, n)?);
            remaining -= n;
        }
        Ok(res)
    }
}

/// A strategy to open shares of type `Share` to clear values of type `Clear`.
pub trait Opening {
    type Share;
    type Clear;

    /// Computes the outgoing messages of the batch `shares`.
    fn prepare(&mut self, shares: &[Self::Share]) -> MpcResult<()>;

    fn send(&mut self, session: &mut Session) -> MpcResult<()>;

    fn receive(&mut self, session: &mut Session) -> MpcResult<()>;

    /// Reconstructs the prepared batch, in the order it was prepared.
    fn finalize(&mut self) -> MpcResult<Vec<Self::Clear>>;

    /// Verifies all openings since the last check.
    fn check(&mut self, session: &mut Session) -> MpcResult<()>;

    fn exchange(&mut self, session: &mut Session) -> MpcResult<()> {
        self.send(session)?;
        self.receive(session)
    }

    fn popen_begin(&mut self, session: &mut Session, shares: &[Self::Share]) -> MpcResult<()> {
        self.prepare(shares)?;
        self.send(session)
    }

    fn popen_end(&mut self, session: &mut Session) -> MpcResult<Vec<Self::Clear>> {
        self.receive(session)?;
        self.finalize()
    }

    /// Opens `shares` in one round.
    fn popen(&mut self, session: &mut Session, shares: &[Self::Share]) -> MpcResult<Vec<Self::Clear>> {
        self.popen_begin(session, shares)?;
        self.popen_end(session)
    }
}
