//! Prime table sizes with magic-number division constants.
//!
//! Each entry lets a hash be reduced modulo the prime with a multiply and a
//! shift instead of a divide (Hacker's Delight, 10.9). The primes grow roughly
//! by a factor of two and were picked to have 32-bit magic numbers.

/// A tabulated prime together with the constants for dividing by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeInfo {
    pub prime: u32,
    pub magic: u32,
    pub shift: u32,
}

impl PrimeInfo {
    const fn new(prime: u32, magic: u32, shift: u32) -> Self {
        Self {
            prime,
            magic,
            shift,
        }
    }

    /// `hash % prime`, computed without a division instruction.
    #[inline(always)]
    pub fn index_for_hash(&self, hash: u32) -> u32 {
        let quotient = self.divide(hash);
        let rem = hash - quotient * self.prime;
        debug_assert_eq!(rem, hash % self.prime);
        rem
    }

    #[inline(always)]
    fn divide(&self, numerator: u32) -> u32 {
        ((numerator as u64 * self.magic as u64) >> (32 + self.shift)) as u32
    }
}

static PRIME_INFOS: [PrimeInfo; 27] = [
    PrimeInfo::new(9, 0x38e38e39, 1),
    PrimeInfo::new(23, 0xb21642c9, 4),
    PrimeInfo::new(59, 0x22b63cbf, 3),
    PrimeInfo::new(131, 0xfa232cf3, 7),
    PrimeInfo::new(239, 0x891ac73b, 7),
    PrimeInfo::new(433, 0x0975a751, 4),
    PrimeInfo::new(761, 0x561e46a5, 8),
    PrimeInfo::new(1399, 0xbb612aa3, 10),
    PrimeInfo::new(2473, 0x6a009f01, 10),
    PrimeInfo::new(4327, 0xf2555049, 12),
    PrimeInfo::new(7499, 0x45ea155f, 11),
    PrimeInfo::new(12973, 0x1434f6d3, 10),
    PrimeInfo::new(22433, 0x2ebe18db, 12),
    PrimeInfo::new(46559, 0xb42bebd5, 15),
    PrimeInfo::new(96581, 0xadb61b1b, 16),
    PrimeInfo::new(200341, 0x29df2461, 15),
    PrimeInfo::new(415517, 0xa181c46d, 18),
    PrimeInfo::new(861719, 0x4de0bde5, 18),
    PrimeInfo::new(1787021, 0x9636c46f, 20),
    PrimeInfo::new(3705617, 0x4870adc1, 20),
    PrimeInfo::new(7684087, 0x8bbc5b83, 22),
    PrimeInfo::new(15933877, 0x86c65361, 23),
    PrimeInfo::new(33040633, 0x40fec79b, 23),
    PrimeInfo::new(68513161, 0x7d605cd1, 25),
    PrimeInfo::new(142069021, 0xf1da390b, 27),
    PrimeInfo::new(294594427, 0x74a2507d, 27),
    PrimeInfo::new(733045421, 0x5dbec447, 28),
];

/// Smallest tabulated prime `>= n`.
///
/// # Panics
/// If `n` is larger than the biggest prime in the table. Table sizes are a
/// fixed design limit, far above the supported station count.
pub fn next_prime(n: u32) -> PrimeInfo {
    match PRIME_INFOS.iter().find(|info| info.prime >= n) {
        Some(info) => *info,
        None => panic!(
            "{n} exceeds the largest supported table size {}",
            PRIME_INFOS[PRIME_INFOS.len() - 1].prime
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_prime_picks_smallest_not_below() {
        assert_eq!(next_prime(0).prime, 9);
        assert_eq!(next_prime(9).prime, 9);
        assert_eq!(next_prime(10).prime, 23);
        assert_eq!(next_prime(10_000).prime, 12973);
        assert_eq!(next_prime(733045421).prime, 733045421);
    }

    #[test]
    #[should_panic(expected = "exceeds the largest supported table size")]
    fn next_prime_beyond_table_panics() {
        next_prime(733045422);
    }

    #[test]
    fn magic_remainder_matches_modulo() {
        let samples = [
            0u32,
            1,
            8,
            9,
            10,
            12972,
            12973,
            12974,
            0x7fff_ffff,
            0x8000_0000,
            0xdead_beef,
            u32::MAX - 1,
            u32::MAX,
        ];
        for info in PRIME_INFOS.iter() {
            for &hash in &samples {
                assert_eq!(
                    info.index_for_hash(hash),
                    hash % info.prime,
                    "prime {} hash {hash:#x}",
                    info.prime
                );
            }
            // a deterministic spread of pseudo random hashes
            let mut x = 0x9e37_79b9u32;
            for _ in 0..1000 {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                assert_eq!(info.index_for_hash(x), x % info.prime);
            }
        }
    }
}
