//! In-memory preprocessing material and per-thread cursors into it.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::party::error::{MpcError, MpcResult};
use crate::share::{BitVec, RssShare};

use super::{DataKind, DataPositions, Dabit, Edabit, Triple};

/// The streams of all kinds of material.
#[derive(Default)]
pub struct Streams {
    triples: Vec<Triple>,
    bits: Vec<RssShare<BitVec>>,
    dabits: Vec<Dabit>,
    edabits: BTreeMap<usize, Vec<Edabit>>,
    personal_triples: BTreeMap<usize, Vec<Triple>>,
}

/// Types that are stored as preprocessing material.
pub trait Material: Clone + Send + Sync {
    /// Size of one item in bytes.
    const BYTES: usize;

    fn stream(streams: &Streams, kind: DataKind) -> Option<&Vec<Self>>;

    fn stream_mut(streams: &mut Streams, kind: DataKind) -> Option<&mut Vec<Self>>;
}

impl Material for Triple {
    const BYTES: usize = 6 * 8;

    fn stream(streams: &Streams, kind: DataKind) -> Option<&Vec<Self>> {
        match kind {
            DataKind::Triple => Some(&streams.triples),
            DataKind::PersonalTriple(owner) => streams.personal_triples.get(&owner),
            _ => None,
        }
    }

    fn stream_mut(streams: &mut Streams, kind: DataKind) -> Option<&mut Vec<Self>> {
        match kind {
            DataKind::Triple => Some(&mut streams.triples),
            DataKind::PersonalTriple(owner) => Some(streams.personal_triples.entry(owner).or_default()),
            _ => None,
        }
    }
}

impl Material for RssShare<BitVec> {
    const BYTES: usize = 2 * 8;

    fn stream(streams: &Streams, kind: DataKind) -> Option<&Vec<Self>> {
        match kind {
            DataKind::Bit => Some(&streams.bits),
            _ => None,
        }
    }

    fn stream_mut(streams: &mut Streams, kind: DataKind) -> Option<&mut Vec<Self>> {
        match kind {
            DataKind::Bit => Some(&mut streams.bits),
            _ => None,
        }
    }
}

impl Material for Dabit {
    const BYTES: usize = 4 * 8;

    fn stream(streams: &Streams, kind: DataKind) -> Option<&Vec<Self>> {
        match kind {
            DataKind::Dabit => Some(&streams.dabits),
            _ => None,
        }
    }

    fn stream_mut(streams: &mut Streams, kind: DataKind) -> Option<&mut Vec<Self>> {
        match kind {
            DataKind::Dabit => Some(&mut streams.dabits),
            _ => None,
        }
    }
}

impl Material for Edabit {
    const BYTES: usize = 4 * 8;

    fn stream(streams: &Streams, kind: DataKind) -> Option<&Vec<Self>> {
        match kind {
            DataKind::Edabit(length) => streams.edabits.get(&length),
            _ => None,
        }
    }

    fn stream_mut(streams: &mut Streams, kind: DataKind) -> Option<&mut Vec<Self>> {
        match kind {
            DataKind::Edabit(length) => Some(streams.edabits.entry(length).or_default()),
            _ => None,
        }
    }
}

/// Append-only sequences of preprocessing material, one per [DataKind].
///
/// Once purged, or marked compromised, the store refuses every further access.
#[derive(Default)]
pub struct MaterialStore {
    streams: RwLock<Streams>,
    purged: AtomicBool,
    compromised: AtomicBool,
}

impl MaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn usable(&self) -> MpcResult<()> {
        if self.compromised.load(Ordering::SeqCst) {
            return Err(MpcError::UnrecoverableSecurityFailure);
        }
        if self.purged.load(Ordering::SeqCst) {
            return Err(MpcError::Purged);
        }
        Ok(())
    }

    fn read_streams(&self) -> MpcResult<RwLockReadGuard<'_, Streams>> {
        self.usable()?;
        self.streams.read().map_err(|_| MpcError::UnrecoverableSecurityFailure)
    }

    fn write_streams(&self) -> MpcResult<RwLockWriteGuard<'_, Streams>> {
        self.usable()?;
        self.streams.write().map_err(|_| MpcError::UnrecoverableSecurityFailure)
    }

    /// Appends `items` to the stream of `kind`.
    pub fn append<M: Material>(&self, kind: DataKind, items: Vec<M>) -> MpcResult<()> {
        let mut streams = self.write_streams()?;
        let stream = M::stream_mut(&mut streams, kind)
            .ok_or_else(|| MpcError::InvalidParameters(format!("{} cannot be stored as {}", std::any::type_name::<M>(), kind)))?;
        stream.extend(items);
        Ok(())
    }

    /// Appends edabits, each to the stream of its length.
    pub fn append_edabits(&self, edabits: Vec<Edabit>) -> MpcResult<()> {
        let mut streams = self.write_streams()?;
        for e in edabits {
            streams.edabits.entry(e.length).or_default().push(e);
        }
        Ok(())
    }

    /// Number of items of `kind` stored so far.
    pub fn available(&self, kind: DataKind) -> MpcResult<usize> {
        let streams = self.read_streams()?;
        Ok(match kind {
            DataKind::Triple | DataKind::PersonalTriple(_) => Triple::stream(&streams, kind).map_or(0, Vec::len),
            DataKind::Bit => streams.bits.len(),
            DataKind::Dabit => streams.dabits.len(),
            DataKind::Edabit(_) => Edabit::stream(&streams, kind).map_or(0, Vec::len),
        })
    }

    /// The positions behind everything stored so far.
    pub fn end_positions(&self) -> MpcResult<DataPositions> {
        let streams = self.read_streams()?;
        let mut end = DataPositions::new();
        end.increase(DataKind::Triple, streams.triples.len());
        end.increase(DataKind::Bit, streams.bits.len());
        end.increase(DataKind::Dabit, streams.dabits.len());
        for (length, edabits) in &streams.edabits {
            end.increase(DataKind::Edabit(*length), edabits.len());
        }
        for (owner, triples) in &streams.personal_triples {
            end.increase(DataKind::PersonalTriple(*owner), triples.len());
        }
        Ok(end)
    }

    /// Reads `n` items of `kind` starting at `pos`.
    pub fn read<M: Material>(&self, kind: DataKind, pos: usize, n: usize) -> MpcResult<Vec<M>> {
        let streams = self.read_streams()?;
        let stream = M::stream(&streams, kind).map_or(&[][..], Vec::as_slice);
        let available = stream.len().saturating_sub(pos);
        if available < n {
            return Err(MpcError::InsufficientPreprocessing { kind, requested: n, available });
        }
        Ok(stream[pos..pos + n].to_vec())
    }

    /// Deletes all material, any later access fails with [MpcError::Purged].
    pub fn purge(&self) -> MpcResult<()> {
        let mut streams = self.streams.write().map_err(|_| MpcError::UnrecoverableSecurityFailure)?;
        *streams = Streams::default();
        self.purged.store(true, Ordering::SeqCst);
        warn!("purged all preprocessed material");
        Ok(())
    }

    /// Marks the store as unusable after a failed purge.
    pub fn mark_compromised(&self) {
        self.compromised.store(true, Ordering::SeqCst);
    }

    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::SeqCst)
    }

    pub fn is_compromised(&self) -> bool {
        self.compromised.load(Ordering::SeqCst)
    }

    /// Leaves the stream lock poisoned, so that a later purge fails.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _streams = self.streams.write();
            panic!("poisoning the material store");
        }));
    }
}

/// A worker's cursor into the [MaterialStore].
///
/// A program run seeks to the positions the coordinator assigned, reads sequentially and reports
/// the usage since [DataFiles::reset_usage].
pub struct DataFiles {
    store: Arc<MaterialStore>,
    positions: DataPositions,
    usage: DataPositions,
    transferred: u64,
}

impl DataFiles {
    pub fn new(store: Arc<MaterialStore>) -> Self {
        Self { store, positions: DataPositions::new(), usage: DataPositions::new(), transferred: 0 }
    }

    pub fn seek(&mut self, positions: &DataPositions) {
        self.positions = positions.clone();
    }

    pub fn positions(&self) -> &DataPositions {
        &self.positions
    }

    pub fn reset_usage(&mut self) {
        self.usage = DataPositions::new();
    }

    pub fn get_usage(&self) -> DataPositions {
        self.usage.clone()
    }

    /// Bytes of material read through this cursor.
    pub fn data_transferred(&self) -> u64 {
        self.transferred
    }

    pub fn store(&self) -> &Arc<MaterialStore> {
        &self.store
    }

    fn get<M: Material>(&mut self, kind: DataKind, n: usize) -> MpcResult<Vec<M>> {
        let items = self.store.read(kind, self.positions.get(kind), n)?;
        self.positions.increase(kind, n);
        self.usage.increase(kind, n);
        self.transferred += (n * M::BYTES) as u64;
        Ok(items)
    }

    pub fn get_triples(&mut self, n: usize) -> MpcResult<Vec<Triple>> {
        self.get(DataKind::Triple, n)
    }

    pub fn get_bits(&mut self, n: usize) -> MpcResult<Vec<RssShare<BitVec>>> {
        self.get(DataKind::Bit, n)
    }

    pub fn get_dabits(&mut self, n: usize) -> MpcResult<Vec<Dabit>> {
        self.get(DataKind::Dabit, n)
    }

    pub fn get_edabits(&mut self, length: usize, n: usize) -> MpcResult<Vec<Edabit>> {
        self.get(DataKind::Edabit(length), n)
    }

    pub fn get_personal_triples(&mut self, owner: usize, n: usize) -> MpcResult<Vec<Triple>> {
        self.get(DataKind::PersonalTriple(owner), n)
    }

    pub fn purge(&mut self) -> MpcResult<()> {
        debug!(positions = %self.positions, "purging from cursor");
        self.store.purge()
    }
}
