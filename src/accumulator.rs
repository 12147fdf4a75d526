//! Parses rows of one segment into a privately owned [`AggregateMap`].

use std::fmt::Write as _;
use std::str;

use anyhow::{bail, ensure, Context, Result};
use memchr::memrchr;

use crate::lane::{
    find_byte, load_lane, mask_lane, words_for, Lane, LANE_BYTES, LANE_WORDS, MAX_KEY_LANES,
};
use crate::map::{AggregateMap, Fnv1a, KeyHash, KeyWords, KEY_MAX_WORDS};
use crate::measurement::parse_measurement;
use crate::segment::{ReadAt, Segment};
use crate::{LINE_FEED, MAX_STATION_NAME_LEN, SEPARATOR, STATION_COUNT_MAX, VECTOR_SIZE_MAX};

pub struct Accumulator<H = Fnv1a> {
    map: AggregateMap<H>,
}

impl<H: KeyHash> Default for Accumulator<H> {
    fn default() -> Self {
        Self::with_capacity(STATION_COUNT_MAX)
    }
}

impl<H: KeyHash> Accumulator<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(station_count: u32) -> Self {
        Self {
            map: AggregateMap::with_capacity(station_count),
        }
    }

    pub fn map(&self) -> &AggregateMap<H> {
        &self.map
    }

    /// Parses the whole rows in `rows[..len]`.
    ///
    /// Row scanning loads whole lanes and eight byte words, so `rows` must
    /// extend at least [`VECTOR_SIZE_MAX`] bytes past `len`. What those bytes
    /// hold does not matter.
    pub fn parse_and_aggregate(&mut self, rows: &[u8], len: usize) -> Result<()> {
        ensure!(
            rows.len() >= len + VECTOR_SIZE_MAX,
            "{} bytes of rows need {VECTOR_SIZE_MAX} readable bytes after them, have {}",
            len,
            rows.len() - len.min(rows.len())
        );
        let mut row_start = 0;
        while row_start < len {
            row_start = self.parse_row(rows, row_start)?;
        }
        Ok(())
    }

    /// Parses one row and returns where the next one starts.
    #[inline(always)]
    fn parse_row(&mut self, rows: &[u8], row_start: usize) -> Result<usize> {
        let mut lane = load_lane(rows, row_start);
        let Some(name_len) = find_byte(&lane, SEPARATOR) else {
            return self.parse_long_row(rows, row_start, lane);
        };
        if find_byte(&lane, LINE_FEED).is_some_and(|line_feed| line_feed < name_len) {
            bail!("missing separator in row at offset {row_start}");
        }
        mask_lane(&mut lane, name_len);
        let value_start = row_start + name_len + 1;
        let (consumed, value) = parse_value(rows, row_start, value_start)?;
        self.map
            .add_or_aggregate(&lane[..words_for(name_len)], name_len, value);
        finish_row(rows, row_start, value_start + consumed)
    }

    /// Rows whose name does not fit in the first lane.
    #[cold]
    fn parse_long_row(&mut self, rows: &[u8], row_start: usize, first: Lane) -> Result<usize> {
        ensure!(
            find_byte(&first, LINE_FEED).is_none(),
            "missing separator in row at offset {row_start}"
        );
        let mut words = [0u64; KEY_MAX_WORDS];
        words[..LANE_WORDS].copy_from_slice(&first);
        for lane_index in 1..MAX_KEY_LANES {
            if row_start + (lane_index + 1) * LANE_BYTES > rows.len() {
                break;
            }
            let mut lane = load_lane(rows, row_start + lane_index * LANE_BYTES);
            let found = find_byte(&lane, SEPARATOR);
            if let Some(line_feed) = find_byte(&lane, LINE_FEED) {
                ensure!(
                    found.is_some_and(|position| position < line_feed),
                    "missing separator in row at offset {row_start}"
                );
            }
            if let Some(position) = found {
                mask_lane(&mut lane, position);
            }
            let at = lane_index * LANE_WORDS;
            words[at..at + LANE_WORDS].copy_from_slice(&lane);
            let Some(position) = found else {
                continue;
            };

            let name_len = lane_index * LANE_BYTES + position;
            ensure!(
                name_len <= MAX_STATION_NAME_LEN,
                "station name of {name_len} bytes at row offset {row_start} is longer than {MAX_STATION_NAME_LEN}"
            );
            let value_start = row_start + name_len + 1;
            ensure!(
                value_start + 8 <= rows.len(),
                "malformed measurement in row at offset {row_start}"
            );
            let (consumed, value) = parse_value(rows, row_start, value_start)?;
            self.map
                .add_or_aggregate_key(&KeyWords::from_lanes(words, name_len), value);
            return finish_row(rows, row_start, value_start + consumed);
        }
        bail!(
            "no separator within {} bytes of row offset {row_start}",
            MAX_KEY_LANES * LANE_BYTES
        )
    }

    /// Parses `segment` through repeated positioned reads into `buffer`.
    ///
    /// Each read is parsed up to its last line feed; the partial row after it
    /// is moved to the front of the buffer and completed by the next read. The
    /// last [`VECTOR_SIZE_MAX`] bytes of `buffer` are never filled, they are
    /// slack for the row scanner.
    pub fn parse_and_aggregate_reads<R: ReadAt + ?Sized>(
        &mut self,
        source: &R,
        segment: Segment,
        buffer: &mut [u8],
    ) -> Result<()> {
        ensure!(
            buffer.len() > VECTOR_SIZE_MAX,
            "read buffer of {} bytes leaves no room past the {VECTOR_SIZE_MAX} bytes of slack",
            buffer.len()
        );
        let data_capacity = buffer.len() - VECTOR_SIZE_MAX;
        let end = segment.end();
        let mut offset = segment.offset;
        let mut carried = 0;
        while offset < end {
            let wanted = (end - offset).min((data_capacity - carried) as u64) as usize;
            let read = source
                .read_at(&mut buffer[carried..carried + wanted], offset)
                .with_context(|| format!("failed to read at byte {offset}"))?;
            if read == 0 {
                bail!("unexpected end of file at byte {offset} inside segment {segment}");
            }
            let filled = carried + read;
            let parse_len = memrchr(LINE_FEED, &buffer[..filled]).map_or(0, |index| index + 1);
            self.parse_and_aggregate(buffer, parse_len)
                .with_context(|| format!("in rows read before byte {}", offset + read as u64))?;
            buffer.copy_within(parse_len..filled, 0);
            carried = filled - parse_len;
            offset += read as u64;
            ensure!(
                carried < data_capacity,
                "row at byte {} does not fit a {} byte read buffer",
                offset - carried as u64,
                buffer.len()
            );
        }
        ensure!(
            carried == 0,
            "segment {segment} does not end with a line feed"
        );
        Ok(())
    }

    /// Folds everything `other` has aggregated into `self`.
    pub fn merge_from(&mut self, other: &Accumulator<H>) {
        self.map.merge_from(&other.map);
    }

    /// `{name=min/mean/max, ...}\n` with names in byte order.
    pub fn render(&self) -> Result<String> {
        let mut entries = self.map.list_entries();
        entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::with_capacity(16 * 1024);
        out.push('{');
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let name = str::from_utf8(&entry.name).with_context(|| {
                format!("station name {:?} is not valid UTF-8", entry.name)
            })?;
            write!(out, "{name}={}", entry.aggregate)?;
        }
        out.push_str("}\n");
        Ok(out)
    }
}

#[inline(always)]
fn parse_value(rows: &[u8], row_start: usize, value_start: usize) -> Result<(usize, i16)> {
    match parse_measurement(&rows[value_start..]) {
        Some(parsed) => Ok(parsed),
        None => bail!("malformed measurement in row at offset {row_start}"),
    }
}

/// Checks the row really ended in a line feed before moving on.
#[inline(always)]
fn finish_row(rows: &[u8], row_start: usize, next_row_start: usize) -> Result<usize> {
    match rows.get(next_row_start - 1) {
        Some(&LINE_FEED) => Ok(next_row_start),
        _ => bail!("malformed measurement in row at offset {row_start}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Aggregate, PrimeMultiply};

    fn padded(text: &str) -> (Vec<u8>, usize) {
        let mut rows = text.as_bytes().to_vec();
        let len = rows.len();
        rows.resize(len + VECTOR_SIZE_MAX, 0);
        (rows, len)
    }

    fn aggregate_text(text: &str) -> Result<Accumulator> {
        let (rows, len) = padded(text);
        let mut accumulator = Accumulator::new();
        accumulator.parse_and_aggregate(&rows, len)?;
        Ok(accumulator)
    }

    #[test]
    fn aggregates_rows() {
        let accumulator =
            aggregate_text("Hamburg;12.0\nBulawayo;8.9\nHamburg;-3.4\nPalembang;38.8\n").unwrap();
        let map = accumulator.map();
        assert_eq!(map.len(), 3);
        assert_eq!(
            map.get(b"Hamburg"),
            Some(Aggregate {
                sum: 86,
                count: 2,
                min: -34,
                max: 120
            })
        );
        assert_eq!(map.get(b"Palembang").map(|a| a.max), Some(388));
    }

    #[test]
    fn renders_sorted_output() {
        let accumulator =
            aggregate_text("b;1.0\na;-1.0\nc;0.5\na;2.0\nb;1.1\nB;0.0\n").unwrap();
        assert_eq!(
            accumulator.render().unwrap(),
            "{B=0.0/0.0/0.0, a=-1.0/0.5/2.0, b=1.0/1.1/1.1, c=0.5/0.5/0.5}\n"
        );
    }

    #[test]
    fn empty_input_renders_empty_braces() {
        let accumulator = aggregate_text("").unwrap();
        assert_eq!(accumulator.render().unwrap(), "{}\n");
    }

    #[test]
    fn names_of_every_supported_length() {
        let mut text = String::new();
        for len in 1..=MAX_STATION_NAME_LEN {
            let name: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
            text.push_str(&format!("{name};{}.{}\n", len % 100, len % 10));
            text.push_str(&format!("{name};-{}.{}\n", len % 100, len % 10));
        }
        let accumulator = aggregate_text(&text).unwrap();
        assert_eq!(accumulator.map().len(), MAX_STATION_NAME_LEN);
        for entry in accumulator.map().list_entries() {
            let len = entry.name.len() as i16;
            let tenths = (len % 100) * 10 + len % 10;
            assert_eq!(entry.aggregate.count, 2);
            assert_eq!(entry.aggregate.sum, 0);
            assert_eq!(entry.aggregate.max, tenths);
            assert_eq!(entry.aggregate.min, -tenths);
        }
    }

    #[test]
    fn multibyte_names() {
        let accumulator = aggregate_text("İzmir;17.9\nZürich;9.3\n東京;25.0\nZürich;-0.3\n").unwrap();
        assert_eq!(
            accumulator.render().unwrap(),
            "{Zürich=-0.3/4.5/9.3, İzmir=17.9/17.9/17.9, 東京=25.0/25.0/25.0}\n"
        );
    }

    #[test]
    fn name_longer_than_supported_fails() {
        let name = "n".repeat(MAX_STATION_NAME_LEN + 1);
        let err = aggregate_text(&format!("{name};1.0\n")).err().unwrap();
        assert!(err.to_string().contains("is longer than"), "{err}");

        let name = "n".repeat(200);
        let err = aggregate_text(&format!("{name};1.0\n")).err().unwrap();
        assert!(err.to_string().contains("no separator"), "{err}");
    }

    #[test]
    fn two_fraction_digits_fail() {
        let err = aggregate_text("Oslo;1.25\nOslo;1.0\n").err().unwrap();
        assert!(err.to_string().contains("malformed"), "{err}");
    }

    #[test]
    fn foreign_bytes_in_measurement_fail() {
        for text in ["Oslo;1.x\n", "Oslo;a.b\n", "Oslo;1,5\n", "Oslo;+1.0\n", "Oslo;.5\n"] {
            let err = aggregate_text(text).err().unwrap();
            assert!(err.to_string().contains("malformed"), "{text:?}: {err}");
        }
    }

    #[test]
    fn three_integer_digits_fail() {
        for text in ["Oslo;123.4\n", "Oslo;-123.4\n", "Lima;1.0\nOslo;100.0\n"] {
            let err = aggregate_text(text).err().unwrap();
            assert!(err.to_string().contains("malformed"), "{text:?}: {err}");
        }
    }

    #[test]
    fn row_without_separator_fails() {
        let err = aggregate_text("Oslo 1.0\nLima;2.0\n").err().unwrap();
        assert!(err.to_string().contains("missing separator"), "{err}");

        let err = aggregate_text("Lima;2.0\nOslo\n").err().unwrap();
        assert!(err.to_string().contains("missing separator"), "{err}");

        // the next row's separator lies past the first lane
        let long = "L".repeat(40);
        let err = aggregate_text(&format!("Oslo 1.0\n{long};2.0\n")).err().unwrap();
        assert!(err.to_string().contains("missing separator"), "{err}");

        let err = aggregate_text(&format!("{long} 1.0\nLima;2.0\n")).err().unwrap();
        assert!(err.to_string().contains("missing separator"), "{err}");
    }

    #[test]
    fn missing_slack_is_rejected() {
        let mut accumulator = Accumulator::<Fnv1a>::new();
        let rows = b"a;1.0\n";
        assert!(accumulator.parse_and_aggregate(rows, rows.len()).is_err());
    }

    #[test]
    fn merges_accumulators() {
        let mut main = aggregate_text("a;1.0\nb;2.0\n").unwrap();
        let other = aggregate_text("b;4.0\nc;-1.0\n").unwrap();
        main.merge_from(&other);
        assert_eq!(
            main.render().unwrap(),
            "{a=1.0/1.0/1.0, b=2.0/3.0/4.0, c=-1.0/-1.0/-1.0}\n"
        );
    }

    #[test]
    fn positioned_reads_match_in_memory() {
        let mut text = String::new();
        for i in 0..3_000 {
            let name = format!("{}{}", "Station".repeat(1 + i % 9), i % 113);
            text.push_str(&format!("{name};{}{}.{}\n", if i % 3 == 0 { "-" } else { "" }, i % 57, i % 10));
        }
        let bytes = text.as_bytes();
        let expected = aggregate_text(&text).unwrap().render().unwrap();

        for buffer_size in [256, 300, 1024, 4096, 1 << 20] {
            let mut accumulator = Accumulator::<PrimeMultiply>::new();
            let mut buffer = vec![0u8; buffer_size];
            accumulator
                .parse_and_aggregate_reads(bytes, Segment::new(0, bytes.len() as u64), &mut buffer)
                .unwrap();
            assert_eq!(accumulator.render().unwrap(), expected, "buffer {buffer_size}");
        }
    }

    #[test]
    fn positioned_reads_respect_segment_bounds() {
        let bytes = b"skip;9.9\nkeep;1.0\nkeep;2.0\nskip;9.9\n";
        let mut accumulator = Accumulator::<Fnv1a>::new();
        let mut buffer = vec![0u8; 256];
        accumulator
            .parse_and_aggregate_reads(&bytes[..], Segment::new(9, 18), &mut buffer)
            .unwrap();
        assert_eq!(accumulator.render().unwrap(), "{keep=1.0/1.5/2.0}\n");
    }

    #[test]
    fn positioned_reads_reject_unterminated_segment() {
        let bytes = b"a;1.0\nb;2.0";
        let mut accumulator = Accumulator::<Fnv1a>::new();
        let mut buffer = vec![0u8; 256];
        let err = accumulator
            .parse_and_aggregate_reads(&bytes[..], Segment::new(0, bytes.len() as u64), &mut buffer)
            .unwrap_err();
        assert!(err.to_string().contains("does not end with a line feed"), "{err}");
    }
}
