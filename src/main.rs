use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::{ensure, Result};
use clap::{Parser, ValueEnum};

use one_brc::{run, IoStrategy, DEFAULT_READ_BUFFER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Memory map the file
    Mmap,
    /// Positioned reads into a per-thread buffer
    Read,
}

// positioned reads on Windows, a mapping elsewhere
#[cfg(windows)]
const DEFAULT_STRATEGY: Strategy = Strategy::Read;
#[cfg(not(windows))]
const DEFAULT_STRATEGY: Strategy = Strategy::Mmap;

#[derive(Debug, Parser)]
#[command(version, about = "Min/mean/max temperature per station", long_about = None)]
struct Args {
    #[arg(default_value = "measurements.txt")]
    path: PathBuf,
    #[arg(short, long, help = "Worker threads [default: available parallelism]")]
    threads: Option<usize>,
    #[arg(short, long, value_enum, default_value_t = DEFAULT_STRATEGY)]
    strategy: Strategy,
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER_SIZE, help = "Read buffer bytes for --strategy read")]
    buffer_size: usize,
    #[arg(long, help = "Print the time spent in each stage to stderr")]
    timings: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let start = Instant::now();

    let threads = args.threads.unwrap_or_else(|| {
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    });
    ensure!(threads > 0, "expected at least one thread");

    let strategy = match args.strategy {
        Strategy::Mmap => IoStrategy::MemoryMapped,
        Strategy::Read => IoStrategy::PositionedReads {
            buffer_size: args.buffer_size,
        },
    };

    let (result, timings) = run(&args.path, threads, strategy)?;

    let mut out = io::stdout().lock();
    out.write_all(result.as_bytes())?;
    out.flush()?;

    if args.timings {
        eprintln!("{timings}");
        eprintln!("in main {:.3} ms", start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(())
}
