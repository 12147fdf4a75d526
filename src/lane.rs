//! Fixed-width chunk operations used by the row scanner.
//!
//! A lane is 32 input bytes held as four little-endian words. Searching a
//! lane for a byte is done a word at a time with the classic zero-byte
//! bit trick, so every byte of a lane is compared without a per-byte branch.

pub const LANE_BYTES: usize = 32;
pub const LANE_WORDS: usize = LANE_BYTES / 8;
/// Lanes searched for the separator before a row is rejected.
pub const MAX_KEY_LANES: usize = 4;

pub type Lane = [u64; LANE_WORDS];

const ONES: u64 = 0x0101_0101_0101_0101;
const HIGHS: u64 = 0x8080_8080_8080_8080;

/// `PREFIX_MASKS[n]` keeps the low `n` bytes of a word.
const PREFIX_MASKS: [u64; 9] = [
    0,
    0xFF,
    0xFFFF,
    0xFF_FFFF,
    0xFFFF_FFFF,
    0xFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF,
    0xFF_FFFF_FFFF_FFFF,
    u64::MAX,
];

#[inline(always)]
pub fn load_u64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

#[inline(always)]
pub fn load_lane(bytes: &[u8], at: usize) -> Lane {
    let chunk = &bytes[at..at + LANE_BYTES];
    [
        load_u64(chunk, 0),
        load_u64(chunk, 8),
        load_u64(chunk, 16),
        load_u64(chunk, 24),
    ]
}

/// High bit set in each byte of `word` equal to `byte`.
///
/// Only the lowest set bit is exact; a borrow can flag bytes above a match.
#[inline(always)]
fn byte_matches(word: u64, byte: u8) -> u64 {
    let x = word ^ (ONES * byte as u64);
    x.wrapping_sub(ONES) & !x & HIGHS
}

/// Index of the first `byte` in `lane`.
#[inline(always)]
pub fn find_byte(lane: &Lane, byte: u8) -> Option<usize> {
    for (i, &word) in lane.iter().enumerate() {
        let matches = byte_matches(word, byte);
        if matches != 0 {
            return Some(i * 8 + (matches.trailing_zeros() / 8) as usize);
        }
    }
    None
}

/// Zeroes every byte of `lane` at index `len` or later.
#[inline(always)]
pub fn mask_lane(lane: &mut Lane, len: usize) {
    for (i, word) in lane.iter_mut().enumerate() {
        *word &= PREFIX_MASKS[len.saturating_sub(i * 8).min(8)];
    }
}

/// Words needed to hold `len` key bytes.
#[inline(always)]
pub const fn words_for(len: usize) -> usize {
    len.div_ceil(8)
}
