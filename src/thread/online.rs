//! The loop of one online worker thread.
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::input::InputSource;
use crate::network::Player;
use crate::open::{FieldOpener, HashCheckedMC, Messaging, ReplicatedMC};
use crate::party::broadcast::Broadcast;
use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::prep::jobs::{self, ArithOpener, BinaryOpener};
use crate::prep::{DataFiles, DataPositions, MaterialStore};
use crate::processor::Processor;
use crate::protocol::beaver::BeaverAnd;
use crate::protocol::{Multiplier, SecurityModel};
use crate::share::{BitVec, GF2p64, SchemeDescriptor, Z64};

use super::{Job, JobKind, JobQueue};

/// When a failing worker purges the preprocessed material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgePolicy {
    /// On every error.
    #[default]
    Always,
    /// Only on errors a deviating party can cause, see [MpcError::is_security_relevant].
    SecurityRelevant,
}

impl PurgePolicy {
    pub fn should_purge(&self, err: &MpcError) -> bool {
        match self {
            PurgePolicy::Always => true,
            PurgePolicy::SecurityRelevant => err.is_security_relevant(),
        }
    }
}

/// The private inputs of one worker.
pub struct InputSources {
    pub inputs: Box<dyn InputSource>,
    /// read for interactive inputs
    pub prompt: Box<dyn InputSource>,
}

/// Everything a worker thread needs before it connects.
pub struct Worker {
    pub thread: usize,
    pub config: EngineConfig,
    pub store: Arc<MaterialStore>,
    pub sources: InputSources,
}

/// The openers of replicated shares follow the security model, the field opener the field scheme.
fn openers(
    config: &EngineConfig,
    scheme: &SchemeDescriptor,
) -> MpcResult<(Box<BinaryOpener>, Box<ArithOpener>, FieldOpener)> {
    let messaging = Messaging::new(config.opening, config.max_broadcast)?;
    let field = FieldOpener::new(config.field, config.security, messaging, scheme, config.mac_key_share.map(GF2p64))?;
    Ok(match config.security {
        SecurityModel::SemiHonest => (
            Box::new(ReplicatedMC::<BitVec>::new(messaging)),
            Box::new(ReplicatedMC::<Z64>::new(messaging)),
            field,
        ),
        SecurityModel::Malicious => (
            Box::new(HashCheckedMC::<BitVec>::new(messaging)),
            Box::new(HashCheckedMC::<Z64>::new(messaging)),
            field,
        ),
    })
}

pub struct OnlineThread {
    thread: usize,
    session: Session,
    files: DataFiles,
    scheme: SchemeDescriptor,
    bin_opener: Box<BinaryOpener>,
    arith_opener: Box<ArithOpener>,
    field_opener: FieldOpener,
    arith_mult: Multiplier<Z64>,
    bin_mult: Multiplier<BitVec>,
    sources: InputSources,
    actual_usage: DataPositions,
}

impl OnlineThread {
    pub fn new(worker: Worker, player: Box<dyn Player>) -> MpcResult<Self> {
        let scheme = worker.config.scheme()?;
        let (bin_opener, arith_opener, field_opener) = openers(&worker.config, &scheme)?;
        let session = Session::setup(player, Some(worker.config.protocol_string()))?;
        Ok(Self {
            thread: worker.thread,
            session,
            files: DataFiles::new(worker.store),
            scheme,
            bin_opener,
            arith_opener,
            field_opener,
            arith_mult: Multiplier::new(worker.config.security),
            bin_mult: Multiplier::new(worker.config.security),
            sources: worker.sources,
            actual_usage: DataPositions::new(),
        })
    }

    /// Processes jobs until [JobKind::Terminate].
    pub fn run(&mut self, queue: &mut JobQueue) -> MpcResult<()> {
        loop {
            let mut job = queue.next()?;
            debug!(thread = self.thread, kind = job.kind.name(), range = ?job.range, "starting job");
            let terminate = matches!(job.kind, JobKind::Terminate { .. });
            self.handle(&mut job)?;
            queue.finished(job)?;
            if terminate {
                return Ok(());
            }
        }
    }

    fn check_openers(&mut self) -> MpcResult<()> {
        self.bin_opener.check(&mut self.session)?;
        self.arith_opener.check(&mut self.session)?;
        self.field_opener.check(&mut self.session)?;
        self.session.check_broadcast()
    }

    fn handle(&mut self, job: &mut Job) -> MpcResult<()> {
        let n = job.len();
        let session = &mut self.session;
        match &mut job.kind {
            JobKind::RunProgram { program, pos, usage, clear } => {
                program.validate(session.num_players())?;
                self.files.seek(pos);
                self.files.reset_usage();
                let mut processor = Processor::new(
                    session,
                    self.bin_opener.as_mut(),
                    &mut self.files,
                    self.sources.inputs.as_mut(),
                    self.sources.prompt.as_mut(),
                    self.scheme,
                )
                .with_clear(mem::take(clear));
                program.execute(&mut processor)?;
                *clear = processor.into_clear();
                *usage = self.files.get_usage();
                self.actual_usage += &*usage;
                if program.usage_unknown() {
                    *pos += &*usage;
                }
                self.check_openers()?;
            }
            JobKind::OpenField { shares, output } => {
                *output = self.field_opener.popen(session, shares)?;
            }
            JobKind::Mult { x, y, output } => {
                *output = jobs::mult(session, &mut self.arith_mult, x, y)?;
            }
            JobKind::Triples { output } => {
                *output = jobs::triples(session, &mut self.bin_mult, n)?;
            }
            JobKind::Bits { output } => {
                *output = jobs::bits(session, n);
            }
            JobKind::Dabits { output } => {
                *output = jobs::dabits(session, &mut self.arith_mult, n)?;
            }
            JobKind::Edabits { length, supply, output } => {
                let files = match supply {
                    Some(pos) => {
                        self.files.seek(pos);
                        Some(&mut self.files)
                    }
                    None => None,
                };
                *output = jobs::edabits(session, &mut self.arith_mult, files, n, *length)?;
            }
            JobKind::PersonalEdabits { owner, length, output } => {
                *output = jobs::personal_edabits(session, *owner, n, *length)?;
            }
            JobKind::Sanitize { length, edabits } => {
                jobs::sanitize(session, &mut self.arith_mult, self.bin_opener.as_mut(), edabits, *length)?;
            }
            JobKind::EdabitSacrifice { length, bucket_size, supply, edabits } => {
                let n_sacrificial = edabits.len() * bucket_size.saturating_sub(1);
                let sacrificial = match supply {
                    Some(pos) => {
                        self.files.seek(pos);
                        self.files.get_edabits(*length, n_sacrificial)?
                    }
                    None => jobs::edabits(session, &mut self.arith_mult, None, n_sacrificial, *length)?,
                };
                *edabits = jobs::edabit_sacrifice(
                    session,
                    &mut self.bin_mult,
                    self.arith_opener.as_mut(),
                    self.bin_opener.as_mut(),
                    mem::take(edabits),
                    &sacrificial,
                    *bucket_size,
                )?;
            }
            JobKind::PersonalTriples { owner, output } => {
                *output = jobs::personal_triples(session, *owner, n)?;
            }
            JobKind::BitAdd { summands, owner, supply, output } => {
                *output = match (owner, supply) {
                    (Some(owner), None) => {
                        return Err(MpcError::InvalidParameters(format!(
                            "bit addition for party {} needs supplied triples",
                            owner
                        )))
                    }
                    (Some(_), Some(triples)) => {
                        let mut and = BeaverAnd::new(self.bin_opener.as_mut(), mem::take(triples));
                        jobs::bit_add(session, &mut and, summands)?
                    }
                    (None, _) => jobs::bit_add(session, &mut self.bin_mult, summands)?,
                };
            }
            JobKind::Terminate { usage, bytes_sent, data_transferred } => {
                self.arith_mult.check(session)?;
                self.bin_mult.check(session)?;
                self.check_openers()?;
                *usage = self.actual_usage.clone();
                *bytes_sent = self.session.bytes_sent();
                *data_transferred = self.files.data_transferred();
                info!(
                    thread = self.thread,
                    party = self.session.i,
                    usage = %usage,
                    bytes_sent = *bytes_sent,
                    data_transferred = *data_transferred,
                    "worker finished"
                );
                self.session.teardown()?;
            }
        }
        Ok(())
    }
}

/// Runs one worker from connecting to [JobKind::Terminate].
///
/// An error purges the preprocessed material, subject to the configured [PurgePolicy], and is
/// returned afterwards. A panic counts as an error. If the purge fails the store is marked compromised.
pub fn main_func(
    worker: Worker,
    connect: impl FnOnce() -> MpcResult<Box<dyn Player>>,
    mut queue: JobQueue,
    ready: oneshot::Sender<()>,
) -> MpcResult<()> {
    let thread = worker.thread;
    let store = worker.store.clone();
    let policy = worker.config.purge_policy;
    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        connect().and_then(|player| {
            let mut online = OnlineThread::new(worker, player)?;
            info!(thread, party = online.session.i, "worker ready");
            // the coordinator only stops waiting if it failed itself
            let _ = ready.send(());
            online.run(&mut queue)
        })
    }));
    let err = match res {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => err,
        Err(_) => MpcError::Panicked(thread),
    };
    error!(thread, error = %err, "worker failed");
    if !policy.should_purge(&err) {
        return Err(err);
    }
    purge_or_give_up(thread, &store, err)
}

/// Purges `store` after `err`, returns [MpcError::UnrecoverableSecurityFailure] if that fails.
fn purge_or_give_up(thread: usize, store: &MaterialStore, err: MpcError) -> MpcResult<()> {
    match store.purge() {
        Ok(()) => {
            error!(thread, "preprocessed data was purged");
            Err(err)
        }
        Err(purge_err) => {
            error!(thread, error = %purge_err, "SECURITY FAILURE; YOU ARE ON YOUR OWN NOW!");
            store.mark_compromised();
            Err(MpcError::UnrecoverableSecurityFailure)
        }
    }
}
