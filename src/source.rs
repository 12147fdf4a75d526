//! The two ways of getting segment bytes to a worker.
//!
//! A [`MappedSource`] hands out slices of one shared read-only mapping. A
//! [`PositionedSource`] has every worker open its own handle and stream its
//! segment through a private buffer; sharing one handle between threads
//! serializes their reads.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use memmap2::Mmap;

use crate::accumulator::Accumulator;
use crate::map::KeyHash;
use crate::segment::{ReadAt, Segment};
use crate::{LINE_FEED, MIN_READ_BUFFER_SIZE, VECTOR_SIZE_MAX};

/// Somewhere segments can be parsed from, safe to share between workers.
pub trait SegmentSource: Send + Sync {
    fn aggregate_segment<H: KeyHash>(
        &self,
        accumulator: &mut Accumulator<H>,
        segment: Segment,
    ) -> Result<()>;

    /// A copy of the bytes of `segment`.
    fn read_segment(&self, segment: Segment) -> Result<Vec<u8>>;
}

/// `bytes` followed by a line feed if the last row lacks one, then
/// [`VECTOR_SIZE_MAX`] zero bytes. Returns the buffer and the length of its rows.
pub fn pad_rows(mut bytes: Vec<u8>) -> (Vec<u8>, usize) {
    if bytes.last().is_some_and(|&last| last != LINE_FEED) {
        bytes.push(LINE_FEED);
    }
    let len = bytes.len();
    bytes.resize(len + VECTOR_SIZE_MAX, 0);
    (bytes, len)
}

pub struct MappedSource {
    // empty files cannot be mapped on every platform
    mmap: Option<Mmap>,
}

impl MappedSource {
    pub fn map(file: &File, file_len: u64) -> Result<Self> {
        if file_len == 0 {
            return Ok(Self { mmap: None });
        }
        // SAFETY: the mapping is read-only and the input is assumed not to be
        // modified while it is being aggregated.
        let mmap = unsafe { Mmap::map(file) }.context("failed to memory map file")?;
        #[cfg(unix)]
        mmap.advise(memmap2::Advice::Sequential)
            .context("failed to advise sequential access")?;
        Ok(Self { mmap: Some(mmap) })
    }

    pub fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl SegmentSource for MappedSource {
    fn aggregate_segment<H: KeyHash>(
        &self,
        accumulator: &mut Accumulator<H>,
        segment: Segment,
    ) -> Result<()> {
        let bytes = self.bytes();
        let start = segment.offset as usize;
        let end = segment.end() as usize;
        ensure!(
            end <= bytes.len(),
            "segment {segment} lies outside the {} byte mapping",
            bytes.len()
        );
        if end + VECTOR_SIZE_MAX <= bytes.len() {
            accumulator.parse_and_aggregate(&bytes[start..end + VECTOR_SIZE_MAX], end - start)
        } else {
            let (rows, len) = pad_rows(bytes[start..end].to_vec());
            accumulator.parse_and_aggregate(&rows, len)
        }
    }

    fn read_segment(&self, segment: Segment) -> Result<Vec<u8>> {
        let bytes = self.bytes();
        let range = segment.offset as usize..segment.end() as usize;
        bytes
            .get(range)
            .map(<[u8]>::to_vec)
            .with_context(|| format!("segment {segment} lies outside the {} byte mapping", bytes.len()))
    }
}

pub struct PositionedSource {
    path: PathBuf,
    file: File,
    buffer_size: usize,
}

impl PositionedSource {
    /// `file` serves [`SegmentSource::read_segment`]; each parallel segment
    /// reopens `path`.
    pub fn new(path: &Path, file: File, buffer_size: usize) -> Result<Self> {
        ensure!(
            buffer_size >= MIN_READ_BUFFER_SIZE,
            "read buffer size {buffer_size} is below the minimum of {MIN_READ_BUFFER_SIZE}"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            buffer_size,
        })
    }
}

impl SegmentSource for PositionedSource {
    fn aggregate_segment<H: KeyHash>(
        &self,
        accumulator: &mut Accumulator<H>,
        segment: Segment,
    ) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("couldn't open file {:?}", self.path))?;
        let buffer_size = self
            .buffer_size
            .min(segment.length as usize + VECTOR_SIZE_MAX)
            .max(MIN_READ_BUFFER_SIZE);
        let mut buffer = vec![0u8; buffer_size];
        accumulator.parse_and_aggregate_reads(&file, segment, &mut buffer)
    }

    fn read_segment(&self, segment: Segment) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; segment.length as usize];
        let read = self
            .file
            .read_full_at(&mut bytes, segment.offset)
            .with_context(|| format!("failed to read segment {segment} of {:?}", self.path))?;
        ensure!(
            read == bytes.len(),
            "file {:?} ended after {read} of the {} bytes of segment {segment}",
            self.path,
            bytes.len()
        );
        Ok(bytes)
    }
}
