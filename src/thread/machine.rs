//! The coordinator that distributes requests over the worker threads of one party.
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::network::{connect_player, Config, LocalNetwork, LocalPlayer, Player};
use crate::party::error::{MpcError, MpcResult};
use crate::prep::{Dabit, DataKind, DataPositions, Edabit, MaterialStore, Triple};
use crate::open::FieldShares;
use crate::processor::Program;
use crate::share::{BitVec, GF2p64, RssShare, RssShareVec, Z64};
use crate::util::split_range_equally;

use super::online::{main_func, InputSources, Worker};
use super::{job_queue, Job, JobHandle, JobKind, JobSender};

/// Opens the connection of one worker thread.
pub trait Connector: Send + Sync {
    fn connect(&self, thread: usize) -> MpcResult<Box<dyn Player>>;
}

/// Connects over the network, thread `t` of every party uses its base port plus `t`.
pub struct NetworkConnector {
    pub my_index: usize,
    pub config: Config,
    pub timeout: Option<Duration>,
}

impl Connector for NetworkConnector {
    fn connect(&self, thread: usize) -> MpcResult<Box<dyn Player>> {
        connect_player(self.my_index, &self.config, thread, self.timeout)
    }
}

/// Connects the parties of one process through in-memory channels.
pub struct LocalConnector {
    players: Mutex<Vec<Option<LocalPlayer>>>,
}

impl LocalConnector {
    /// One connector per party, each holding a player for every thread.
    pub fn meshes(n_parties: usize, n_threads: usize) -> Vec<Arc<LocalConnector>> {
        let mut per_party: Vec<Vec<Option<LocalPlayer>>> = (0..n_parties).map(|_| Vec::new()).collect();
        for _ in 0..n_threads {
            for (party, player) in LocalNetwork::mesh(n_parties).into_iter().enumerate() {
                per_party[party].push(Some(player));
            }
        }
        per_party.into_iter().map(|players| Arc::new(LocalConnector { players: Mutex::new(players) })).collect()
    }
}

impl Connector for LocalConnector {
    fn connect(&self, thread: usize) -> MpcResult<Box<dyn Player>> {
        let mut players = self
            .players
            .lock()
            .map_err(|_| MpcError::InvalidParameters("local connector is poisoned".to_string()))?;
        let player = players
            .get_mut(thread)
            .and_then(Option::take)
            .ok_or_else(|| MpcError::InvalidParameters(format!("no local player for thread {}", thread)))?;
        Ok(Box::new(player))
    }
}

/// The totals the workers report when they terminate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub usage: DataPositions,
    pub bytes_sent: u64,
    pub data_transferred: u64,
}

struct WorkerHandle {
    sender: JobSender,
    join: Option<JoinHandle<MpcResult<()>>>,
}

/// Schedules jobs on the worker threads and keeps the global usage.
///
/// Dropping a machine without [Machine::terminate] makes the workers fail, which purges the
/// preprocessed material.
pub struct Machine {
    config: EngineConfig,
    store: Arc<MaterialStore>,
    workers: Vec<WorkerHandle>,
    /// where the next program reads each kind of material
    positions: DataPositions,
    /// the material consumed by programs so far
    usage: DataPositions,
    running: usize,
    exclusive: bool,
}

impl Machine {
    /// Spawns `config.threads` workers and waits until all of them are connected.
    pub fn start(
        config: EngineConfig,
        store: Arc<MaterialStore>,
        connector: Arc<dyn Connector>,
        mut sources: impl FnMut(usize) -> InputSources,
    ) -> MpcResult<Self> {
        config.validate()?;
        let mut workers = Vec::with_capacity(config.threads);
        let mut ready = Vec::with_capacity(config.threads);
        for thread in 0..config.threads {
            let (sender, queue) = job_queue();
            let (ready_sender, ready_receiver) = oneshot::channel();
            let worker = Worker { thread, config, store: store.clone(), sources: sources(thread) };
            let connector = connector.clone();
            let join = thread::Builder::new()
                .name(format!("worker{}", thread))
                .spawn(move || main_func(worker, || connector.connect(thread), queue, ready_sender))?;
            workers.push(WorkerHandle { sender, join: Some(join) });
            ready.push(ready_receiver);
        }
        let mut machine = Self {
            config,
            store,
            workers,
            positions: DataPositions::new(),
            usage: DataPositions::new(),
            running: 0,
            exclusive: false,
        };
        for (thread, ready) in ready.into_iter().enumerate() {
            if ready.recv().is_err() {
                return Err(machine.worker_error(thread));
            }
        }
        info!(threads = machine.config.threads, "all workers ready");
        Ok(machine)
    }

    pub fn n_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn store(&self) -> &Arc<MaterialStore> {
        &self.store
    }

    /// The material consumed by all finished programs.
    pub fn usage(&self) -> &DataPositions {
        &self.usage
    }

    pub fn positions(&self) -> &DataPositions {
        &self.positions
    }

    pub fn submit(&mut self, thread: usize, job: Job) -> MpcResult<JobHandle> {
        let worker = self
            .workers
            .get(thread)
            .ok_or_else(|| MpcError::InvalidParameters(format!("no worker thread {}", thread)))?;
        debug!(thread, ?job, "submitting");
        match worker.sender.submit(thread, job) {
            Ok(handle) => Ok(handle),
            Err(_) => Err(self.worker_error(thread)),
        }
    }

    /// Waits for a submitted job. If the worker dropped it, the worker's error is returned.
    pub fn wait(&mut self, handle: JobHandle) -> MpcResult<Job> {
        let thread = handle.thread;
        handle.wait().map_err(|_| self.worker_error(thread))
    }

    fn worker_error(&mut self, thread: usize) -> MpcError {
        let join = self.workers.get_mut(thread).and_then(|w| w.join.take());
        let err = match join.map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Ok(Ok(()))) | None => MpcError::Receive,
            Some(Err(_)) => MpcError::Panicked(thread),
        };
        error!(thread, error = %err, "worker failed");
        err
    }

    /// Starts `program` on `thread`, reading material behind everything dispatched so far.
    ///
    /// Programs whose usage is only known at run time must run alone.
    pub fn start_program(
        &mut self,
        thread: usize,
        program: Arc<dyn Program>,
        clear: Vec<BitVec>,
    ) -> MpcResult<JobHandle> {
        program.validate(self.config.scheme()?.n_parties)?;
        if self.exclusive || (program.usage_unknown() && self.running > 0) {
            return Err(MpcError::InvalidParameters(format!(
                "program {} cannot run concurrently with a program of unknown usage",
                program.name()
            )));
        }
        let pos = self.positions.clone();
        if program.usage_unknown() {
            self.exclusive = true;
        } else {
            self.positions += &program.static_usage();
        }
        let kind = JobKind::RunProgram { program, pos, usage: DataPositions::new(), clear };
        let handle = self.submit(thread, Job::new(0..0, kind))?;
        self.running += 1;
        Ok(handle)
    }

    /// Waits for a program and returns its clear registers.
    ///
    /// If a program of unknown usage fails, later programs read behind everything in the store.
    pub fn stop_program(&mut self, handle: JobHandle) -> MpcResult<Vec<BitVec>> {
        self.running = self.running.saturating_sub(1);
        let job = match self.wait(handle) {
            Ok(job) => job,
            Err(err) => {
                if self.exclusive {
                    self.exclusive = false;
                    if let Ok(end) = self.store.end_positions() {
                        self.positions.raise_to(&end);
                    }
                }
                return Err(err);
            }
        };
        match job.kind {
            JobKind::RunProgram { program, usage, clear, .. } => {
                self.usage += &usage;
                if program.usage_unknown() {
                    self.positions += &usage;
                    self.exclusive = false;
                }
                debug!(program = program.name(), usage = %usage, "program finished");
                Ok(clear)
            }
            other => Err(unexpected("run-program", &other)),
        }
    }

    pub fn run_program(&mut self, thread: usize, program: Arc<dyn Program>, clear: Vec<BitVec>) -> MpcResult<Vec<BitVec>> {
        let handle = self.start_program(thread, program, clear)?;
        self.stop_program(handle)
    }

    /// Splits `0..n` over all threads, and returns the finished jobs in range order.
    pub fn run_parallel(&mut self, n: usize, mut kind: impl FnMut(Range<usize>) -> JobKind) -> MpcResult<Vec<Job>> {
        let ranges = split_range_equally(n, self.n_threads());
        let mut handles = Vec::with_capacity(ranges.len());
        for (thread, range) in ranges.into_iter().enumerate().filter(|(_, r)| !r.is_empty()) {
            let job = Job::new(range.clone(), kind(range));
            handles.push(self.submit(thread, job)?);
        }
        handles.into_iter().map(|handle| self.wait(handle)).collect()
    }

    /// Positions for a stocked read of `per_item` items of `kind` per job item, then advances them.
    fn reserve(&mut self, kind: DataKind, n: usize, per_item: usize) -> MpcResult<impl Fn(&Range<usize>) -> DataPositions> {
        if self.exclusive {
            return Err(MpcError::InvalidParameters(format!(
                "cannot read stocked {} while a program of unknown usage runs",
                kind
            )));
        }
        let base = self.positions.clone();
        let available = self.store.available(kind)?;
        let requested = n * per_item;
        if available < base.get(kind) + requested {
            return Err(MpcError::InsufficientPreprocessing {
                kind,
                requested,
                available: available.saturating_sub(base.get(kind)),
            });
        }
        self.positions.increase(kind, requested);
        Ok(move |range: &Range<usize>| {
            let mut pos = base.clone();
            pos.increase(kind, range.start * per_item);
            pos
        })
    }

    /// Opens field shares with the configured field scheme, verified at the next checkpoint.
    pub fn open_field(&mut self, shares: &FieldShares) -> MpcResult<Vec<GF2p64>> {
        let jobs = self.run_parallel(shares.len(), |r| JobKind::OpenField { shares: shares.slice(r), output: Vec::new() })?;
        collect(jobs, "open-field", |kind| match kind {
            JobKind::OpenField { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    pub fn mult(&mut self, x: &[RssShare<Z64>], y: &[RssShare<Z64>]) -> MpcResult<RssShareVec<Z64>> {
        if x.len() != y.len() {
            return Err(MpcError::InvalidParameters(format!("cannot multiply {} by {} factors", x.len(), y.len())));
        }
        let jobs = self.run_parallel(x.len(), |r| JobKind::Mult {
            x: x[r.clone()].to_vec(),
            y: y[r].to_vec(),
            output: Vec::new(),
        })?;
        collect(jobs, "mult", |kind| match kind {
            JobKind::Mult { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    pub fn triples(&mut self, n: usize) -> MpcResult<Vec<Triple>> {
        let jobs = self.run_parallel(n, |_| JobKind::Triples { output: Vec::new() })?;
        collect(jobs, "triples", |kind| match kind {
            JobKind::Triples { output } => Ok(output),
            other => Err(other),
        })
    }

    pub fn bits(&mut self, n: usize) -> MpcResult<RssShareVec<BitVec>> {
        let jobs = self.run_parallel(n, |_| JobKind::Bits { output: Vec::new() })?;
        collect(jobs, "bits", |kind| match kind {
            JobKind::Bits { output } => Ok(output),
            other => Err(other),
        })
    }

    pub fn dabits(&mut self, n: usize) -> MpcResult<Vec<Dabit>> {
        let jobs = self.run_parallel(n, |_| JobKind::Dabits { output: Vec::new() })?;
        collect(jobs, "dabits", |kind| match kind {
            JobKind::Dabits { output } => Ok(output),
            other => Err(other),
        })
    }

    /// Edabits of `length` bits, composed from the stocked dabits if `supply` is set.
    pub fn edabits(&mut self, n: usize, length: usize, supply: bool) -> MpcResult<Vec<Edabit>> {
        let jobs = if supply {
            let pos = self.reserve(DataKind::Dabit, n, length)?;
            self.run_parallel(n, |r| JobKind::Edabits { length, supply: Some(pos(&r)), output: Vec::new() })?
        } else {
            self.run_parallel(n, |_| JobKind::Edabits { length, supply: None, output: Vec::new() })?
        };
        collect(jobs, "edabits", |kind| match kind {
            JobKind::Edabits { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    pub fn personal_edabits(&mut self, owner: usize, n: usize, length: usize) -> MpcResult<Vec<Edabit>> {
        let jobs = self.run_parallel(n, |_| JobKind::PersonalEdabits { owner, length, output: Vec::new() })?;
        collect(jobs, "personal-edabits", |kind| match kind {
            JobKind::PersonalEdabits { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    pub fn personal_triples(&mut self, owner: usize, n: usize) -> MpcResult<Vec<Triple>> {
        let jobs = self.run_parallel(n, |_| JobKind::PersonalTriples { owner, output: Vec::new() })?;
        collect(jobs, "personal-triples", |kind| match kind {
            JobKind::PersonalTriples { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    pub fn sanitize(&mut self, edabits: Vec<Edabit>, length: usize) -> MpcResult<Vec<Edabit>> {
        let jobs = self.run_parallel(edabits.len(), |r| JobKind::Sanitize { length, edabits: edabits[r].to_vec() })?;
        collect(jobs, "sanitize", |kind| match kind {
            JobKind::Sanitize { edabits, .. } => Ok(edabits),
            other => Err(other),
        })
    }

    /// Checks edabits of `length` bits, sacrificing stocked edabits if `supply` is set.
    pub fn edabit_sacrifice(
        &mut self,
        edabits: Vec<Edabit>,
        length: usize,
        bucket_size: usize,
        supply: bool,
    ) -> MpcResult<Vec<Edabit>> {
        let n = edabits.len();
        let per_item = bucket_size.saturating_sub(1);
        let jobs = if supply {
            let pos = self.reserve(DataKind::Edabit(length), n, per_item)?;
            self.run_parallel(n, |r| JobKind::EdabitSacrifice {
                length,
                bucket_size,
                supply: Some(pos(&r)),
                edabits: edabits[r].to_vec(),
            })?
        } else {
            self.run_parallel(n, |r| JobKind::EdabitSacrifice {
                length,
                bucket_size,
                supply: None,
                edabits: edabits[r].to_vec(),
            })?
        };
        collect(jobs, "edabit-sacrifice", |kind| match kind {
            JobKind::EdabitSacrifice { edabits, .. } => Ok(edabits),
            other => Err(other),
        })
    }

    /// Adds the summands of every item, with Beaver AND gates on `supply` if an `owner` is given.
    ///
    /// The supplied triples are split over the threads in proportion to the items.
    pub fn bit_add(
        &mut self,
        summands: Vec<Vec<RssShareVec<BitVec>>>,
        owner: Option<usize>,
        supply: Option<Vec<Triple>>,
    ) -> MpcResult<Vec<RssShareVec<BitVec>>> {
        let n = summands.len();
        let per_item = match &supply {
            Some(triples) if n > 0 => {
                if triples.len() % n != 0 {
                    return Err(MpcError::InvalidParameters(format!(
                        "cannot split {} triples evenly over {} items",
                        triples.len(),
                        n
                    )));
                }
                triples.len() / n
            }
            Some(triples) if !triples.is_empty() => {
                return Err(MpcError::InvalidParameters(format!("{} triples for no items", triples.len())));
            }
            _ => 0,
        };
        let jobs = self.run_parallel(n, |r| JobKind::BitAdd {
            summands: summands[r.clone()].to_vec(),
            owner,
            supply: supply.as_ref().map(|t| t[r.start * per_item..r.end * per_item].to_vec()),
            output: Vec::new(),
        })?;
        collect(jobs, "bit-add", |kind| match kind {
            JobKind::BitAdd { output, .. } => Ok(output),
            other => Err(other),
        })
    }

    /// Sends [JobKind::Terminate] to every worker and joins them.
    pub fn terminate(mut self) -> MpcResult<Report> {
        let handles = (0..self.n_threads())
            .map(|thread| self.submit(thread, Job::terminate()))
            .collect::<MpcResult<Vec<_>>>()?;
        let mut report = Report::default();
        for handle in handles {
            let thread = handle.thread;
            match self.wait(handle)?.kind {
                JobKind::Terminate { usage, bytes_sent, data_transferred } => {
                    report.usage += &usage;
                    report.bytes_sent += bytes_sent;
                    report.data_transferred += data_transferred;
                }
                other => return Err(unexpected("terminate", &other)),
            }
            if let Some(join) = self.workers[thread].join.take() {
                join.join().map_err(|_| MpcError::Panicked(thread))??;
            }
        }
        info!(usage = %report.usage, bytes_sent = report.bytes_sent, "all workers terminated");
        Ok(report)
    }
}

fn unexpected(expected: &str, got: &JobKind) -> MpcError {
    MpcError::InvalidParameters(format!("expected a {} job back, got {}", expected, got.name()))
}

/// Concatenates the outputs of the jobs of one request.
fn collect<T>(jobs: Vec<Job>, expected: &str, output: impl Fn(JobKind) -> Result<Vec<T>, JobKind>) -> MpcResult<Vec<T>> {
    let mut res = Vec::new();
    for job in jobs {
        res.extend(output(job.kind).map_err(|other| unexpected(expected, &other))?);
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use itertools::izip;
    use rand::thread_rng;

    use crate::config::EngineConfig;
    use crate::input::VecInputSource;
    use crate::open::{FieldScheme, FieldShares, OpeningMode};
    use crate::party::error::{MpcError, MpcResult};
    use crate::party::RngExt;
    use crate::prep::{DataKind, DataPositions, MaterialStore};
    use crate::processor::{InputSpec, Instruction, InstructionProgram, Processor, Program};
    use crate::share::auth::AuthShare;
    use crate::share::test::consistent;
    use crate::share::{BitVec, GF2p64};
    use crate::thread::online::{InputSources, PurgePolicy};

    use super::{LocalConnector, Machine};

    fn no_inputs(_thread: usize) -> InputSources {
        InputSources { inputs: Box::new(VecInputSource::default()), prompt: Box::new(VecInputSource::default()) }
    }

    /// Runs `f` on a machine of each of three parties.
    fn local_machines<T: Send>(
        config: EngineConfig,
        f: impl Fn(usize, MpcResult<Machine>) -> T + Send + Sync,
    ) -> (T, T, T) {
        local_machines_with(|_| config, f)
    }

    /// Like [local_machines], with a configuration per party.
    fn local_machines_with<T: Send>(
        configs: impl Fn(usize) -> EngineConfig + Send + Sync,
        f: impl Fn(usize, MpcResult<Machine>) -> T + Send + Sync,
    ) -> (T, T, T) {
        let connectors = LocalConnector::meshes(3, configs(0).threads);
        let (f, configs) = (&f, &configs);
        let mut res: Vec<T> = thread::scope(|scope| {
            let handles: Vec<_> = connectors
                .into_iter()
                .enumerate()
                .map(|(party, connector)| {
                    scope.spawn(move || {
                        let store = Arc::new(MaterialStore::new());
                        let machine = Machine::start(configs(party), store, connector, no_inputs);
                        f(party, machine)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let r3 = res.pop().unwrap();
        let r2 = res.pop().unwrap();
        let r1 = res.pop().unwrap();
        (r1, r2, r3)
    }

    fn config(threads: usize) -> EngineConfig {
        EngineConfig { threads, ..EngineConfig::default() }
    }

    fn and_program() -> Arc<dyn Program> {
        Arc::new(InstructionProgram::new(
            "and",
            vec![
                Instruction::LoadClear { dest: 0, n_bits: 4, value: 0b1100 },
                Instruction::LoadClear { dest: 1, n_bits: 4, value: 0b1010 },
                Instruction::And(vec![(2, 0, 1), (3, 0, 0)]),
                Instruction::Reveal(vec![(4, 0, 2), (4, 1, 3)]),
            ],
        ))
    }

    #[test]
    fn triples_are_split_over_threads() {
        let (t1, t2, t3) = local_machines(config(3), |_, machine| {
            let mut machine = machine.unwrap();
            let triples = machine.triples(100).unwrap();
            machine.terminate().unwrap();
            triples
        });
        assert_eq!(t1.len(), 100);
        for (t1, t2, t3) in izip!(&t1, &t2, &t3) {
            consistent(&t1.a, &t2.a, &t3.a);
            consistent(&t1.c, &t2.c, &t3.c);
            let a = t1.a.si + t2.a.si + t3.a.si;
            let b = t1.b.si + t2.b.si + t3.b.si;
            let c = t1.c.si + t2.c.si + t3.c.si;
            assert_eq!(a * b, c);
        }
    }

    #[test]
    fn usage_is_accounted() {
        let (r1, r2, r3) = local_machines(config(2), |_, machine| {
            let mut machine = machine.unwrap();
            let triples = machine.triples(10).unwrap();
            machine.store().append(DataKind::Triple, triples).unwrap();
            let h0 = machine.start_program(0, and_program(), vec![]).unwrap();
            let h1 = machine.start_program(1, and_program(), vec![]).unwrap();
            let c0 = machine.stop_program(h0).unwrap();
            let c1 = machine.stop_program(h1).unwrap();
            assert_eq!(c0, vec![BitVec(0b1000), BitVec(0b1100)]);
            assert_eq!(c1, c0);
            let aggregate = machine.usage().clone();
            let report = machine.terminate().unwrap();
            (aggregate, report)
        });
        for (aggregate, report) in [r1, r2, r3] {
            assert_eq!(aggregate.get(DataKind::Triple), 4);
            assert_eq!(report.usage, aggregate);
            assert_eq!(report.data_transferred, 4 * 48);
        }
    }

    fn loop_program() -> Arc<dyn Program> {
        Arc::new(InstructionProgram::new(
            "loop",
            vec![Instruction::Repeat {
                count: 0,
                body: vec![Instruction::RandomBit { dest: 0 }, Instruction::Reveal(vec![(1, 1, 0)])],
            }],
        ))
    }

    #[test]
    fn unknown_usage_runs_alone() {
        let program = loop_program();
        let (r1, _, _) = local_machines(config(2), |_, machine| {
            let mut machine = machine.unwrap();
            let bits = machine.bits(8).unwrap();
            machine.store().append(DataKind::Bit, bits).unwrap();
            let dabits = machine.dabits(4).unwrap();
            machine.store().append(DataKind::Dabit, dabits).unwrap();
            let h = machine.start_program(0, program.clone(), vec![BitVec(3)]).unwrap();
            assert!(matches!(
                machine.start_program(1, and_program(), vec![]),
                Err(MpcError::InvalidParameters(_))
            ));
            assert!(matches!(machine.edabits(1, 2, true), Err(MpcError::InvalidParameters(_))));
            assert_eq!(machine.positions(), &DataPositions::new());
            machine.stop_program(h).unwrap();
            assert_eq!(machine.positions().get(DataKind::Bit), 3);
            assert_eq!(machine.positions().get(DataKind::Dabit), 0);
            machine.run_program(1, program.clone(), vec![BitVec(2)]).unwrap();
            let positions = machine.positions().clone();
            machine.terminate().unwrap();
            positions
        });
        assert_eq!(r1.get(DataKind::Bit), 5);
    }

    #[test]
    fn failing_program_purges() {
        let (r1, r2, r3) = local_machines(config(1), |_, machine| {
            let mut machine = machine.unwrap();
            let store = machine.store().clone();
            let res = machine.run_program(0, and_program(), vec![]);
            (res.map(|_| ()), store.is_purged())
        });
        for (res, purged) in [r1, r2, r3] {
            assert!(matches!(res, Err(MpcError::InsufficientPreprocessing { kind: DataKind::Triple, .. })));
            assert!(purged);
        }
    }

    #[test]
    fn failed_unknown_usage_program_releases_the_machine() {
        let failing: Arc<dyn Program> = Arc::new(InstructionProgram::new(
            "failing-loop",
            vec![
                Instruction::Repeat { count: 0, body: vec![Instruction::RandomBit { dest: 0 }] },
                Instruction::InputB(vec![InputSpec { player: 0, n_bits: 0, dest: 1, interactive: false }]),
            ],
        ));
        let relaxed = EngineConfig { purge_policy: PurgePolicy::SecurityRelevant, ..config(2) };
        let (r1, r2, r3) = local_machines(relaxed, |_, machine| {
            let mut machine = machine.unwrap();
            let bits = machine.bits(8).unwrap();
            machine.store().append(DataKind::Bit, bits).unwrap();
            let res = machine.run_program(0, failing.clone(), vec![BitVec(3)]);
            assert!(matches!(res, Err(MpcError::InvalidParameters(_))));
            let positions = machine.positions().clone();
            machine.run_program(1, loop_program(), vec![BitVec(0)]).unwrap();
            (positions, machine.positions().clone(), machine.store().is_purged())
        });
        for (failed, after, purged) in [r1, r2, r3] {
            assert_eq!(failed.get(DataKind::Bit), 8);
            assert_eq!(after, failed);
            assert!(!purged);
        }
    }

    #[test]
    fn programs_are_validated_before_dispatch() {
        let wide: Arc<dyn Program> = Arc::new(InstructionProgram::new(
            "wide",
            vec![Instruction::Trans { dest: (0..65).collect(), src: vec![0] }],
        ));
        let (r1, _, _) = local_machines(config(1), |_, machine| {
            let mut machine = machine.unwrap();
            let res = machine.start_program(0, wide.clone(), vec![]).map(|_| ());
            let clear = machine.run_program(0, load_program(), vec![]).unwrap();
            machine.terminate().unwrap();
            (res, clear)
        });
        assert!(matches!(r1.0, Err(MpcError::InvalidParameters(_))));
        assert_eq!(r1.1, vec![BitVec(0b1100)]);
    }

    fn load_program() -> Arc<dyn Program> {
        Arc::new(InstructionProgram::new(
            "load",
            vec![Instruction::LoadClear { dest: 0, n_bits: 4, value: 0b1100 }, Instruction::Reveal(vec![(4, 0, 0)])],
        ))
    }

    struct Panicking;

    impl Program for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn usage_unknown(&self) -> bool {
            false
        }

        fn static_usage(&self) -> DataPositions {
            DataPositions::new()
        }

        fn execute(&self, _processor: &mut Processor<'_>) -> MpcResult<()> {
            panic!("register file exhausted")
        }
    }

    #[test]
    fn panicking_program_purges() {
        let (r1, r2, r3) = local_machines(config(1), |_, machine| {
            let mut machine = machine.unwrap();
            let bits = machine.bits(2).unwrap();
            machine.store().append(DataKind::Bit, bits).unwrap();
            let store = machine.store().clone();
            let res = machine.run_program(0, Arc::new(Panicking), vec![]);
            (res.map(|_| ()), store.is_purged())
        });
        for (res, purged) in [r1, r2, r3] {
            assert!(matches!(res, Err(MpcError::Panicked(0))));
            assert!(purged);
        }
    }

    #[test]
    fn bit_add_supply_must_split_evenly() {
        let (r1, _, _) = local_machines(config(1), |_, machine| {
            let mut machine = machine.unwrap();
            let triples = machine.triples(3).unwrap();
            let res = machine.bit_add(vec![vec![vec![], vec![]]; 2], Some(0), Some(triples));
            let store = machine.store().clone();
            machine.terminate().unwrap();
            (res.map(|_| ()), store.is_purged())
        });
        assert!(matches!(r1.0, Err(MpcError::InvalidParameters(_))));
        assert!(!r1.1);
    }

    fn mac_configs(alphas: &[GF2p64]) -> impl Fn(usize) -> EngineConfig + Send + Sync + '_ {
        move |party| EngineConfig { field: FieldScheme::Mac, mac_key_share: Some(alphas[party].0), ..config(2) }
    }

    fn authenticated(secrets: &[u64], alphas: &[GF2p64]) -> Vec<Vec<AuthShare<GF2p64>>> {
        let mut rng = thread_rng();
        let mut per_party = vec![Vec::new(); 3];
        for s in secrets {
            for (j, share) in AuthShare::deal(&mut rng, GF2p64(*s), alphas).into_iter().enumerate() {
                per_party[j].push(share);
            }
        }
        per_party
    }

    #[test]
    fn field_openings_use_the_mac_scheme() {
        let alphas = GF2p64::generate(&mut thread_rng(), 3);
        let shares = authenticated(&[11, 12], &alphas);
        let (r1, r2, r3) = local_machines_with(mac_configs(&alphas), |party, machine| {
            let mut machine = machine.unwrap();
            let opened = machine.open_field(&FieldShares::Authenticated(shares[party].clone())).unwrap();
            machine.terminate().unwrap();
            opened
        });
        for opened in [r1, r2, r3] {
            assert_eq!(opened, vec![GF2p64(11), GF2p64(12)]);
        }
    }

    #[test]
    fn tampered_field_share_fails_the_mac_check() {
        let alphas = GF2p64::generate(&mut thread_rng(), 3);
        let mut shares = authenticated(&[11, 12], &alphas);
        shares[1][0].value += GF2p64(1);
        let (r1, r2, r3) = local_machines_with(mac_configs(&alphas), |party, machine| {
            let mut machine = machine.unwrap();
            let bits = machine.bits(2).unwrap();
            machine.store().append(DataKind::Bit, bits).unwrap();
            let store = machine.store().clone();
            machine.open_field(&FieldShares::Authenticated(shares[party].clone())).unwrap();
            (machine.terminate().map(|_| ()), store.is_purged())
        });
        for (res, purged) in [r1, r2, r3] {
            assert!(matches!(res, Err(MpcError::MacCheckFailed)));
            assert!(purged);
        }
    }

    #[test]
    fn configuration_errors_keep_material_under_relaxed_policy() {
        let relaxed = EngineConfig { purge_policy: PurgePolicy::SecurityRelevant, ..config(1) };
        let (r1, _, _) = local_machines(relaxed, |_, machine| {
            let mut machine = machine.unwrap();
            let bits = machine.bits(4).unwrap();
            machine.store().append(DataKind::Bit, bits).unwrap();
            let store = machine.store().clone();
            let res = machine.bit_add(vec![vec![vec![], vec![]]], Some(0), None);
            (res.map(|_| ()), store.is_purged(), store.available(DataKind::Bit).unwrap())
        });
        assert!(matches!(r1.0, Err(MpcError::InvalidParameters(_))));
        assert!(!r1.1);
        assert_eq!(r1.2, 4);
    }

    #[test]
    fn parallel_opening_fails_at_start() {
        let parallel = EngineConfig { opening: OpeningMode::Parallel, ..config(2) };
        let (r1, r2, r3) = local_machines(parallel, |_, machine| machine.map(|_| ()));
        for r in [r1, r2, r3] {
            assert!(matches!(r, Err(MpcError::NotImplemented(_))));
        }
    }

    #[test]
    fn inputs_reach_the_program() {
        let program: Arc<dyn Program> = Arc::new(InstructionProgram::new(
            "inputs",
            vec![
                Instruction::InputB(vec![
                    InputSpec { player: 0, n_bits: 4, dest: 0, interactive: false },
                    InputSpec { player: 1, n_bits: 4, dest: 1, interactive: false },
                ]),
                Instruction::Xor { dest: 2, a: 0, b: 1 },
                Instruction::Reveal(vec![(4, 0, 2)]),
            ],
        ));
        let connectors = LocalConnector::meshes(3, 1);
        let res: Vec<Vec<BitVec>> = thread::scope(|scope| {
            let handles: Vec<_> = connectors
                .into_iter()
                .enumerate()
                .map(|(party, connector)| {
                    let program = program.clone();
                    scope.spawn(move || {
                        let sources = move |_: usize| InputSources {
                            inputs: Box::new(VecInputSource::new([5 + party as i128])),
                            prompt: Box::new(VecInputSource::default()),
                        };
                        let mut machine =
                            Machine::start(config(1), Arc::new(MaterialStore::new()), connector, sources).unwrap();
                        let clear = machine.run_program(0, program, vec![]).unwrap();
                        machine.terminate().unwrap();
                        clear
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        // 5 ^ 6
        assert!(res.iter().all(|clear| clear == &vec![BitVec(3)]));
    }
}
