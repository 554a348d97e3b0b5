use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tutti::config::EngineConfig;
use tutti::input::{PromptInputSource, VecInputSource};
use tutti::network::Config;
use tutti::party::error::{MpcError, MpcResult};
use tutti::prep::{DataKind, MaterialStore};
use tutti::processor::{InputSpec, Instruction, InstructionProgram};
use tutti::thread::machine::{Machine, NetworkConnector};
use tutti::thread::online::InputSources;

#[derive(Parser)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Network configuration, optionally with an [engine] table")]
    config: PathBuf,

    #[arg(long, value_name = "N_THREADS", help = "Overrides the number of worker threads of the configuration")]
    threads: Option<usize>,

    #[arg(long, value_name = "SECONDS", help = "Gives up connecting to the other parties after this many seconds")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generates binary multiplication triples.
    Triples {
        #[arg(long)]
        n: usize,
    },
    /// Generates edabits and checks them by sacrifice.
    Edabits {
        #[arg(long)]
        n: usize,
        #[arg(long, default_value_t = 32)]
        length: usize,
        #[arg(long, default_value_t = 3)]
        bucket_size: usize,
    },
    /// Reads an integer at the first two parties and reveals their bitwise AND.
    And {
        #[arg(long, default_value_t = 64)]
        bits: usize,
    },
}

fn run(cli: Cli) -> MpcResult<()> {
    let (my_index, network) = Config::from_file(&cli.config)?;
    let mut config = EngineConfig::from_file(&cli.config)?;
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    let connector = Arc::new(NetworkConnector {
        my_index,
        config: network,
        timeout: cli.timeout.map(Duration::from_secs),
    });
    let store = Arc::new(MaterialStore::new());
    let mut machine = Machine::start(config, store, connector, |thread| InputSources {
        inputs: Box::new(VecInputSource::default()),
        prompt: if thread == 0 {
            Box::new(PromptInputSource::stdin())
        } else {
            Box::new(VecInputSource::default())
        },
    })?;

    match cli.command {
        Command::Triples { n } => {
            let triples = machine.triples(n)?;
            info!(n = triples.len(), "generated triples");
        }
        Command::Edabits { n, length, bucket_size } => {
            let edabits = machine.edabits(n, length, false)?;
            let checked = machine.edabit_sacrifice(edabits, length, bucket_size, false)?;
            info!(n = checked.len(), length, "generated edabits");
        }
        Command::And { bits } => {
            if bits == 0 || bits > 64 {
                return Err(MpcError::InvalidParameters(format!("cannot AND {}-bit integers", bits)));
            }
            let triples = machine.triples(1)?;
            machine.store().append(DataKind::Triple, triples)?;
            let input = |player| InputSpec { player, n_bits: bits, dest: player, interactive: true };
            let instructions = vec![
                Instruction::InputB(vec![input(0), input(1)]),
                Instruction::And(vec![(2, 0, 1)]),
                Instruction::Reveal(vec![(bits, 0, 2)]),
            ];
            let clear = machine.run_program(0, Arc::new(InstructionProgram::new("and", instructions)), Vec::new())?;
            if let Some(result) = clear.first() {
                println!("Result: {}", result.as_u64());
            }
        }
    }

    let report = machine.terminate()?;
    info!(
        usage = %report.usage,
        bytes_sent = report.bytes_sent,
        data_transferred = report.data_transferred,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "aborting");
            ExitCode::FAILURE
        }
    }
}
