//! Open, segment, parse in parallel, merge, parse the EOF segment, render.

use std::fmt;
use std::fs::File;
use std::panic;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::accumulator::Accumulator;
use crate::segment::{segment_file, Segment, Segmentation};
use crate::source::{pad_rows, MappedSource, PositionedSource, SegmentSource};

/// How segment bytes reach the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoStrategy {
    #[default]
    MemoryMapped,
    PositionedReads { buffer_size: usize },
}

/// Wall time of each stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub open_file: Duration,
    pub segment: Duration,
    pub map_or_setup: Duration,
    pub parse_and_aggregate: Duration,
    pub merge: Duration,
    pub eof: Duration,
    pub format: Duration,
}

impl Timings {
    pub fn total(&self) -> Duration {
        self.open_file
            + self.segment
            + self.map_or_setup
            + self.parse_and_aggregate
            + self.merge
            + self.eof
            + self.format
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        write!(
            f,
            "open {:.3} ms, segment {:.3} ms, map/setup {:.3} ms, parse {:.3} ms, \
             merge {:.3} ms, eof {:.3} ms, format {:.3} ms, total {:.3} ms",
            ms(self.open_file),
            ms(self.segment),
            ms(self.map_or_setup),
            ms(self.parse_and_aggregate),
            ms(self.merge),
            ms(self.eof),
            ms(self.format),
            ms(self.total()),
        )
    }
}

/// Stopwatch that hands out the time since the previous lap.
struct Laps(Instant);

impl Laps {
    fn start() -> Self {
        Laps(Instant::now())
    }

    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.0;
        self.0 = now;
        elapsed
    }
}

pub fn run_memory_mapped(path: impl AsRef<Path>, thread_count: usize) -> Result<(String, Timings)> {
    run(path, thread_count, IoStrategy::MemoryMapped)
}

pub fn run_positioned_reads(
    path: impl AsRef<Path>,
    thread_count: usize,
    buffer_size: usize,
) -> Result<(String, Timings)> {
    run(path, thread_count, IoStrategy::PositionedReads { buffer_size })
}

/// Aggregates the file at `path` with up to `thread_count` worker threads and
/// returns the rendered result and the time spent in each stage.
///
/// Worker panics are re-raised on the calling thread.
pub fn run(
    path: impl AsRef<Path>,
    thread_count: usize,
    strategy: IoStrategy,
) -> Result<(String, Timings)> {
    let path = path.as_ref();
    let mut laps = Laps::start();
    let mut timings = Timings::default();

    let file = File::open(path).with_context(|| format!("couldn't open file {path:?}"))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("couldn't read metadata of {path:?}"))?
        .len();
    timings.open_file = laps.lap();

    let segmentation = segment_file(&file, file_len, thread_count)
        .with_context(|| format!("couldn't segment {path:?}"))?;
    timings.segment = laps.lap();

    match strategy {
        IoStrategy::MemoryMapped => {
            let source = MappedSource::map(&file, file_len)
                .with_context(|| format!("couldn't map {path:?}"))?;
            timings.map_or_setup = laps.lap();
            aggregate(Arc::new(source), segmentation, laps, timings)
        }
        IoStrategy::PositionedReads { buffer_size } => {
            let source = PositionedSource::new(path, file, buffer_size)?;
            timings.map_or_setup = laps.lap();
            aggregate(Arc::new(source), segmentation, laps, timings)
        }
    }
}

fn aggregate<S: SegmentSource + 'static>(
    source: Arc<S>,
    segmentation: Segmentation,
    mut laps: Laps,
    mut timings: Timings,
) -> Result<(String, Timings)> {
    let Segmentation { segments, eof, .. } = segmentation;

    let mut main: Accumulator = match segments.as_slice() {
        [] => {
            timings.parse_and_aggregate = laps.lap();
            Accumulator::new()
        }
        [segment] => {
            let mut main: Accumulator = Accumulator::new();
            source
                .aggregate_segment(&mut main, *segment)
                .with_context(|| format!("failed to aggregate segment {segment}"))?;
            timings.parse_and_aggregate = laps.lap();
            main
        }
        segments => {
            let mut accumulators = aggregate_in_parallel(&source, segments)?.into_iter();
            timings.parse_and_aggregate = laps.lap();
            let mut main = accumulators
                .next()
                .ok_or_else(|| anyhow!("no accumulator for the first segment"))?;
            for accumulator in accumulators {
                main.merge_from(&accumulator);
            }
            timings.merge = laps.lap();
            main
        }
    };

    if !eof.is_empty() {
        let (rows, len) = pad_rows(source.read_segment(eof)?);
        main.parse_and_aggregate(&rows, len)
            .with_context(|| format!("failed to aggregate end of file segment {eof}"))?;
    }
    timings.eof = laps.lap();

    let result = main.render()?;
    timings.format = laps.lap();

    Ok((result, timings))
}

/// One fresh thread per segment. Returns the accumulators in segment order
/// once every worker has finished.
fn aggregate_in_parallel<S: SegmentSource + 'static>(
    source: &Arc<S>,
    segments: &[Segment],
) -> Result<Vec<Accumulator>> {
    let mut handles = Vec::with_capacity(segments.len());
    for (index, &segment) in segments.iter().enumerate() {
        let source = Arc::clone(source);
        let handle = thread::Builder::new()
            .name(format!("segment-{index}"))
            .spawn(move || -> Result<Accumulator> {
                let mut accumulator = Accumulator::new();
                source.aggregate_segment(&mut accumulator, segment)?;
                Ok(accumulator)
            })
            .context("failed to spawn worker thread")?;
        handles.push(handle);
    }

    // join every worker before looking at any result
    let results: Vec<thread::Result<Result<Accumulator>>> =
        handles.into_iter().map(|handle| handle.join()).collect();

    results
        .into_iter()
        .zip(segments)
        .map(|(joined, segment)| {
            joined
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
                .with_context(|| format!("failed to aggregate segment {segment}"))
        })
        .collect()
}
