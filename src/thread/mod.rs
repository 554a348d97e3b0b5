//! Worker threads and the jobs they process.
//!
//! The coordinator ([machine::Machine]) hands [Job]s to the workers through one [JobQueue] each.
//! A worker takes a job with [JobQueue::next], processes it and sends it back with its outputs
//! filled in through [JobQueue::finished].
pub mod machine;
pub mod online;

use std::fmt;
use std::ops::Range;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use crate::open::FieldShares;
use crate::party::error::{MpcError, MpcResult};
use crate::prep::{Dabit, DataPositions, Edabit, Triple};
use crate::processor::Program;
use crate::share::{BitVec, GF2p64, RssShareVec, Z64};

/// What a worker is asked to do, together with the buffers it reads and fills.
pub enum JobKind {
    /// Runs a program reading material from `pos`, `usage` holds what it consumed afterwards.
    RunProgram { program: Arc<dyn Program>, pos: DataPositions, usage: DataPositions, clear: Vec<BitVec> },
    /// Opens field shares with the worker's field opener, verified at its next check.
    OpenField { shares: FieldShares, output: Vec<GF2p64> },
    Mult { x: RssShareVec<Z64>, y: RssShareVec<Z64>, output: RssShareVec<Z64> },
    Triples { output: Vec<Triple> },
    Bits { output: RssShareVec<BitVec> },
    Dabits { output: Vec<Dabit> },
    /// Edabits from fresh dabits, or from the stocked ones at `supply`.
    Edabits { length: usize, supply: Option<DataPositions>, output: Vec<Edabit> },
    PersonalEdabits { owner: usize, length: usize, output: Vec<Edabit> },
    Sanitize { length: usize, edabits: Vec<Edabit> },
    /// Checks `edabits` in place with fresh sacrificial edabits, or with the stocked ones at `supply`.
    EdabitSacrifice { length: usize, bucket_size: usize, supply: Option<DataPositions>, edabits: Vec<Edabit> },
    PersonalTriples { owner: usize, output: Vec<Triple> },
    /// Adds the summands of every item. Items of an `owner` are added with the supplied triples.
    BitAdd {
        summands: Vec<Vec<RssShareVec<BitVec>>>,
        owner: Option<usize>,
        supply: Option<Vec<Triple>>,
        output: Vec<RssShareVec<BitVec>>,
    },
    /// The last job of every worker, which reports its totals.
    Terminate { usage: DataPositions, bytes_sent: u64, data_transferred: u64 },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::RunProgram { .. } => "run-program",
            JobKind::OpenField { .. } => "open-field",
            JobKind::Mult { .. } => "mult",
            JobKind::Triples { .. } => "triples",
            JobKind::Bits { .. } => "bits",
            JobKind::Dabits { .. } => "dabits",
            JobKind::Edabits { .. } => "edabits",
            JobKind::PersonalEdabits { .. } => "personal-edabits",
            JobKind::Sanitize { .. } => "sanitize",
            JobKind::EdabitSacrifice { .. } => "edabit-sacrifice",
            JobKind::PersonalTriples { .. } => "personal-triples",
            JobKind::BitAdd { .. } => "bit-add",
            JobKind::Terminate { .. } => "terminate",
        }
    }
}

/// A batch `[range.start, range.end)` of one request.
///
/// For generating jobs the range length is the number of items to produce, for jobs with input
/// buffers the buffers hold exactly the items of the range.
pub struct Job {
    pub range: Range<usize>,
    pub kind: JobKind,
}

impl Job {
    pub fn new(range: Range<usize>, kind: JobKind) -> Self {
        Self { range, kind }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn terminate() -> Self {
        Self::new(0..0, JobKind::Terminate { usage: DataPositions::new(), bytes_sent: 0, data_transferred: 0 })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("range", &self.range).field("kind", &self.kind.name()).finish()
    }
}

type Envelope = (Job, oneshot::Sender<Job>);

/// The worker's end of a job queue.
pub struct JobQueue {
    jobs: Receiver<Envelope>,
    mailback: Option<oneshot::Sender<Job>>,
}

/// The coordinator's end of a job queue.
#[derive(Clone)]
pub struct JobSender {
    jobs: Sender<Envelope>,
}

/// Receives the job a worker finished.
pub struct JobHandle {
    pub thread: usize,
    result: oneshot::Receiver<Job>,
}

pub fn job_queue() -> (JobSender, JobQueue) {
    let (jobs, receiver) = channel();
    (JobSender { jobs }, JobQueue { jobs: receiver, mailback: None })
}

impl JobQueue {
    /// Blocks until the next job arrives.
    pub fn next(&mut self) -> MpcResult<Job> {
        let (job, mailback) = self.jobs.recv()?;
        self.mailback = Some(mailback);
        Ok(job)
    }

    /// Returns the job taken by the last [JobQueue::next] to the coordinator.
    pub fn finished(&mut self, job: Job) -> MpcResult<()> {
        let mailback = self
            .mailback
            .take()
            .ok_or_else(|| MpcError::InvalidParameters("no job in progress".to_string()))?;
        // the coordinator may have given up on this job already
        let _ = mailback.send(job);
        Ok(())
    }
}

impl JobSender {
    pub fn submit(&self, thread: usize, job: Job) -> MpcResult<JobHandle> {
        let (mailback, result) = oneshot::channel();
        self.jobs.send((job, mailback)).map_err(|_| MpcError::Receive)?;
        Ok(JobHandle { thread, result })
    }
}

impl JobHandle {
    /// Blocks until the job is finished, fails if the worker dropped it.
    pub fn wait(self) -> MpcResult<Job> {
        Ok(self.result.recv()?)
    }
}
