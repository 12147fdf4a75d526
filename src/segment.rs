//! Splitting a file into line-aligned segments.

use std::fmt;
use std::fs::File;
use std::io;

use memchr::{memchr, memrchr};

use crate::{
    LINE_FEED, SEGMENT_LENGTH_MIN, SEGMENT_LENGTH_THRESHOLD, SEGMENT_NEW_LINE_SEARCH_LENGTH,
    VECTOR_SIZE_MAX,
};

/// Half-open byte range `[offset, offset + length)` of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Reads at an absolute offset without moving a shared cursor, so one
/// handle can serve many readers.
pub trait ReadAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Reads until `buf` is full or the end of input, returning the bytes read.
    fn read_full_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl ReadAt for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = (offset as usize).min(self.len());
        let read = buf.len().min(self.len() - start);
        buf[..read].copy_from_slice(&self[start..start + read]);
        Ok(read)
    }
}

/// Line-aligned segments for the parallel phase plus the tail that is parsed
/// last from a padded copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    pub eof: Segment,
    pub file_len: u64,
}

/// Near-equal raw ranges covering `[0, file_len)`, not yet line-aligned.
///
/// Returns nothing when the per-thread length would be below
/// [`SEGMENT_LENGTH_THRESHOLD`]; such files are handled as one EOF segment.
pub fn find_segments(file_len: u64, thread_count: usize) -> Vec<Segment> {
    let thread_count = thread_count.max(1) as u64;
    let segment_length = (file_len / thread_count)
        .max(SEGMENT_LENGTH_MIN)
        .min(file_len);
    if segment_length < SEGMENT_LENGTH_THRESHOLD {
        return Vec::new();
    }

    let segment_count = file_len / segment_length;
    let mut segments: Vec<Segment> = (0..segment_count)
        .map(|i| Segment::new(i * segment_length, segment_length))
        .collect();
    if let Some(last) = segments.last_mut() {
        last.length = file_len - last.offset;
    }
    segments
}

/// Splits `source` into at most `thread_count` segments ending right after a
/// line feed, and an EOF segment with at least [`VECTOR_SIZE_MAX`] bytes.
///
/// Segments and EOF segment together cover `[0, file_len)` exactly once.
pub fn segment_file<R: ReadAt + ?Sized>(
    source: &R,
    file_len: u64,
    thread_count: usize,
) -> io::Result<Segmentation> {
    let raw = find_segments(file_len, thread_count);
    if raw.is_empty() {
        return Ok(Segmentation {
            segments: raw,
            eof: Segment::new(0, file_len),
            file_len,
        });
    }

    let eof_start = find_eof_start(source, file_len)?;

    let mut segments = Vec::with_capacity(raw.len());
    let mut previous_end = 0;
    for raw_segment in &raw[..raw.len() - 1] {
        let end = match find_line_feed_from(source, raw_segment.end(), file_len)? {
            Some(line_feed) => (line_feed + 1).min(eof_start),
            None => eof_start,
        };
        if end > previous_end {
            segments.push(Segment::new(previous_end, end - previous_end));
            previous_end = end;
        }
    }
    if eof_start > previous_end {
        segments.push(Segment::new(previous_end, eof_start - previous_end));
    }

    Ok(Segmentation {
        segments,
        eof: Segment::new(eof_start, file_len - eof_start),
        file_len,
    })
}

/// Position of the first line feed at or after `position`.
fn find_line_feed_from<R: ReadAt + ?Sized>(
    source: &R,
    mut position: u64,
    file_len: u64,
) -> io::Result<Option<u64>> {
    let mut window = [0u8; SEGMENT_NEW_LINE_SEARCH_LENGTH];
    while position < file_len {
        let read = source.read_full_at(&mut window, position)?;
        if read == 0 {
            break;
        }
        if let Some(index) = memchr(LINE_FEED, &window[..read]) {
            return Ok(Some(position + index as u64));
        }
        position += read as u64;
    }
    Ok(None)
}

/// Start of the EOF segment: just after the last line feed lying at least
/// [`VECTOR_SIZE_MAX`] bytes before the end of the file.
fn find_eof_start<R: ReadAt + ?Sized>(source: &R, file_len: u64) -> io::Result<u64> {
    let search_end = file_len - VECTOR_SIZE_MAX as u64;
    let search_start = file_len.saturating_sub(SEGMENT_NEW_LINE_SEARCH_LENGTH as u64);
    let mut window = [0u8; SEGMENT_NEW_LINE_SEARCH_LENGTH];
    let window = &mut window[..(search_end - search_start) as usize];
    let read = source.read_full_at(window, search_start)?;
    match memrchr(LINE_FEED, &window[..read]) {
        Some(index) => Ok(search_start + index as u64 + 1),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "no line feed in bytes [{search_start}, {search_end}) near the end of the file"
            ),
        )),
    }
}
