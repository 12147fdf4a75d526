//! Temperatures as integer tenths of a degree.

use std::fmt;

use crate::lane::load_u64;

/// Bit 4 of bytes 1..=3. Set in every ASCII digit, clear in `.` and `-`.
const DOT_BITS: i64 = 0x1010_1000;
const MAGIC_MULTIPLIER: i64 = 100 * 0x100_0000 + 10 * 0x1_0000 + 1;

const HIGH_NIBBLES: u64 = 0xF0F0_F0F0_F0F0_F0F0;
const LOW_NIBBLES: u64 = 0x0F0F_0F0F_0F0F_0F0F;
const ZEROS: u64 = 0x3030_3030_3030_3030;
/// Added to a low nibble, carries into bit 4 iff the nibble is above 9.
const SIXES: u64 = 0x0606_0606_0606_0606;
const FOURS: u64 = 0x1010_1010_1010_1010;

/// Decodes `-?\d{1,2}\.\d\n` at the start of `bytes`.
///
/// Returns the number of bytes up to and including the line feed, and the
/// value in tenths, or `None` if the sign, digits or dot are out of place.
/// Reads exactly eight bytes regardless of the field width, so `bytes` must
/// hold at least eight. The line feed itself is not checked: callers check
/// that the byte before the returned offset is one.
#[inline(always)]
pub fn parse_measurement(bytes: &[u8]) -> Option<(usize, i16)> {
    let word = load_u64(bytes, 0) as i64;
    let inverted = !word;
    let dot_position = (inverted & DOT_BITS).trailing_zeros();
    // all ones for a leading '-', zero otherwise
    let signed = (inverted << 59) >> 63;
    if !is_well_formed(word as u64, dot_position, signed != 0) {
        return None;
    }
    let sign_mask = !(signed & 0xFF);
    let digits = (word & sign_mask).wrapping_shl(28u32.wrapping_sub(dot_position)) & 0x0F_000F_0F00;
    let magnitude = ((digits.wrapping_mul(MAGIC_MULTIPLIER) as u64) >> 32) & 0x3FF;
    let value = ((magnitude as i64) ^ signed) - signed;
    Some(((dot_position >> 3) as usize + 3, value as i16))
}

/// One or two integer digits after an optional `-`, the dot where
/// `dot_position` says, and one fraction digit after it.
#[inline(always)]
fn is_well_formed(word: u64, dot_position: u32, negative: bool) -> bool {
    // `dot_position` is 64 when bytes 1..=3 hold no dot
    let dot = (dot_position >> 3) as usize;
    let sign_len = usize::from(negative);
    if dot > 3 || dot <= sign_len || dot - sign_len > 2 {
        return false;
    }
    if (negative && word as u8 != b'-') || (word >> (8 * dot)) as u8 != b'.' {
        return false;
    }
    let integer_bytes = ((1u64 << (8 * dot)) - 1) & !((1u64 << (8 * sign_len)) - 1);
    let digit_bytes = integer_bytes | (0xFFu64 << (8 * (dot + 1)));
    let high_nibbles_ok = (word & digit_bytes & HIGH_NIBBLES) == (ZEROS & digit_bytes);
    let low_nibbles_ok = (((word & LOW_NIBBLES) + SIXES) & FOURS & digit_bytes) == 0;
    high_nibbles_ok && low_nibbles_ok
}

/// `sum / count` rounded half away from zero, in tenths.
pub fn mean_tenths(sum: i64, count: i32) -> i64 {
    let count = i64::from(count);
    let magnitude = (sum.abs() * 2 + count) / (count * 2);
    if sum < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Displays a tenths value with exactly one fractional digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenths(pub i64);

impl fmt::Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{}", abs / 10, abs % 10)
    }
}
