//! Per-station min/mean/max over a large `<station>;<temperature>\n` file.
//!
//! The file is cut into line-aligned segments, each segment is parsed on its
//! own thread into a private [`AggregateMap`], the maps are merged into the
//! first one and the trailing end-of-file segment is parsed last, from a
//! padded copy, so no row parse ever reads past readable memory.
//!
//! ```no_run
//! let (result, timings) = one_brc::run_memory_mapped("measurements.txt", 8)?;
//! print!("{result}");
//! eprintln!("{timings}");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod accumulator;
pub mod lane;
pub mod map;
pub mod measurement;
pub mod pipeline;
pub mod prime;
pub mod segment;
pub mod source;

pub use accumulator::Accumulator;
pub use map::{Aggregate, AggregateMap, Fnv1a, KeyHash, KeyWords, PrimeMultiply, StationEntry};
pub use pipeline::{run, run_memory_mapped, run_positioned_reads, IoStrategy, Timings};
pub use segment::{find_segments, segment_file, ReadAt, Segment, Segmentation};

pub const CACHE_LINE_SIZE: usize = 64;
/// Readable bytes guaranteed after the end of every parsed region.
pub const VECTOR_SIZE_MAX: usize = CACHE_LINE_SIZE;
pub const SEGMENT_LENGTH_THRESHOLD: u64 = VECTOR_SIZE_MAX as u64 * 4;
pub const SEGMENT_LENGTH_MIN: u64 = 32 * 1024 - CACHE_LINE_SIZE as u64;
/// Must be long enough to always contain a line feed.
pub const SEGMENT_NEW_LINE_SEARCH_LENGTH: usize = 256;
pub const STATION_COUNT_MAX: u32 = 10_000;
pub const MAX_STATION_NAME_LEN: usize = 100;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128 * 1024;
pub const MIN_READ_BUFFER_SIZE: usize = 4 * CACHE_LINE_SIZE;

pub const SEPARATOR: u8 = b';';
pub const LINE_FEED: u8 = b'\n';
