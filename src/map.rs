//! Chained hash table from station name to running [`Aggregate`].
//!
//! Entries live in a preallocated arena and are addressed by `u32` index.
//! Each bucket holds the index of the most recently inserted entry of its
//! chain, and every entry links to the one inserted before it. Keys are stored
//! as zero padded little-endian words in a separate arena so comparing two
//! keys is a comparison of a few `u64`s.
//!
//! The arenas are sized once from the table capacity and never grow. Adding
//! more distinct keys than the capacity is a broken assumption about the
//! input, so it panics instead of dropping data.

use std::fmt;
use std::marker::PhantomData;

use crate::lane::{words_for, LANE_WORDS, MAX_KEY_LANES};
use crate::measurement::{mean_tenths, Tenths};
use crate::prime::{next_prime, PrimeInfo};

pub const KEY_MAX_BYTES: usize = KEY_MAX_WORDS * 8;
pub const KEY_MAX_WORDS: usize = MAX_KEY_LANES * LANE_WORDS;

const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub sum: i64,
    pub count: i32,
    pub min: i16,
    pub max: i16,
}

impl Aggregate {
    pub fn new(value: i16) -> Self {
        Self {
            sum: i64::from(value),
            count: 1,
            min: value,
            max: value,
        }
    }

    #[inline(always)]
    pub fn add(&mut self, value: i16) {
        self.sum += i64::from(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: &Aggregate) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn mean_tenths(&self) -> i64 {
        mean_tenths(self.sum, self.count)
    }
}

/// `min/mean/max`, each with one fractional digit.
impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            Tenths(i64::from(self.min)),
            Tenths(self.mean_tenths()),
            Tenths(i64::from(self.max))
        )
    }
}

/// 32-bit hash over the words of a key.
pub trait KeyHash {
    fn hash(words: &[u64]) -> u32;
}

/// FNV-1a applied a whole word at a time, folded to 32 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1a;

impl KeyHash for Fnv1a {
    #[inline(always)]
    fn hash(words: &[u64]) -> u32 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &word in words {
            hash ^= word;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash ^ (hash >> 32)) as u32
    }
}

/// Multiplies each 32-bit half of the key by its own small prime and sums.
/// Cheaper than [`Fnv1a`] but collides more on similar names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimeMultiply;

impl KeyHash for PrimeMultiply {
    #[inline(always)]
    fn hash(words: &[u64]) -> u32 {
        const PRIMES: [u32; 8] = [17, 19, 23, 29, 31, 37, 41, 43];
        let mut hash = 0u32;
        for (i, &word) in words.iter().enumerate() {
            let low = (word as u32).wrapping_mul(PRIMES[(2 * i) % 8]);
            let high = ((word >> 32) as u32).wrapping_mul(PRIMES[(2 * i + 1) % 8]);
            hash = hash.wrapping_add(low ^ high);
        }
        hash
    }
}

/// A station name packed into zero padded words, the shape the map takes keys in.
#[derive(Clone, Copy)]
pub struct KeyWords {
    words: [u64; KEY_MAX_WORDS],
    len: usize,
}

impl KeyWords {
    /// # Panics
    /// If `name` is longer than [`KEY_MAX_BYTES`].
    pub fn from_name(name: &[u8]) -> Self {
        assert!(
            name.len() <= KEY_MAX_BYTES,
            "station name of {} bytes exceeds {KEY_MAX_BYTES}",
            name.len()
        );
        let mut words = [0u64; KEY_MAX_WORDS];
        for (word, chunk) in words.iter_mut().zip(name.chunks(8)) {
            let mut bytes = [0u8; 8];
            bytes[..chunk.len()].copy_from_slice(chunk);
            *word = u64::from_le_bytes(bytes);
        }
        Self {
            words,
            len: name.len(),
        }
    }

    pub(crate) fn from_lanes(words: [u64; KEY_MAX_WORDS], len: usize) -> Self {
        Self { words, len }
    }

    pub fn words(&self) -> &[u64] {
        &self.words[..words_for(self.len)]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A station and its aggregate, as listed by [`AggregateMap::list_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationEntry {
    pub name: Vec<u8>,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    aggregate: Aggregate,
    next: u32,
    /// Key length in the low half, hash in the high half.
    signature: u64,
    key_start: u32,
}

impl Entry {
    fn key_len(&self) -> usize {
        (self.signature & 0xFFFF_FFFF) as usize
    }

    fn hash(&self) -> u32 {
        (self.signature >> 32) as u32
    }
}

#[inline(always)]
fn signature(len: usize, hash: u32) -> u64 {
    (u64::from(hash) << 32) | len as u64
}

pub struct AggregateMap<H = Fnv1a> {
    prime: PrimeInfo,
    buckets: Box<[u32]>,
    entries: Vec<Entry>,
    keys: Vec<u64>,
    hasher: PhantomData<H>,
}

impl<H: KeyHash> AggregateMap<H> {
    /// A table whose capacity is the smallest tabulated prime `>= min_capacity`.
    pub fn with_capacity(min_capacity: u32) -> Self {
        let prime = next_prime(min_capacity);
        let capacity = prime.prime as usize;
        Self {
            prime,
            buckets: vec![NONE; capacity].into_boxed_slice(),
            entries: Vec::with_capacity(capacity),
            keys: Vec::with_capacity(capacity * KEY_MAX_WORDS),
            hasher: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.prime.prime as usize
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Folds `value` into the aggregate of the key given by `words` and `len`.
    ///
    /// `words` must hold exactly `words_for(len)` words with every byte past
    /// `len` zeroed; two keys are equal iff their lengths and words are.
    #[inline(always)]
    pub fn add_or_aggregate(&mut self, words: &[u64], len: usize, value: i16) {
        debug_assert_eq!(words.len(), words_for(len));
        let hash = H::hash(words);
        let signature = signature(len, hash);
        let bucket = self.prime.index_for_hash(hash) as usize;
        match self.find(bucket, signature, words) {
            Some(index) => self.entries[index].aggregate.add(value),
            None => self.insert(bucket, signature, words, Aggregate::new(value)),
        }
    }

    pub fn add_or_aggregate_key(&mut self, key: &KeyWords, value: i16) {
        self.add_or_aggregate(key.words(), key.len(), value);
    }

    /// Combines every entry of `other` into `self`.
    ///
    /// Stored hashes are reused, so both tables must hash with `H`, which the
    /// type guarantees.
    pub fn merge_from(&mut self, other: &AggregateMap<H>) {
        for entry in &other.entries {
            let words = other.key_words(entry);
            let bucket = self.prime.index_for_hash(entry.hash()) as usize;
            match self.find(bucket, entry.signature, words) {
                Some(index) => self.entries[index].aggregate.merge(&entry.aggregate),
                None => self.insert(bucket, entry.signature, words, entry.aggregate),
            }
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<Aggregate> {
        if name.len() > KEY_MAX_BYTES {
            return None;
        }
        let key = KeyWords::from_name(name);
        let hash = H::hash(key.words());
        let bucket = self.prime.index_for_hash(hash) as usize;
        self.find(bucket, signature(key.len(), hash), key.words())
            .map(|index| self.entries[index].aggregate)
    }

    /// All entries in insertion order.
    pub fn list_entries(&self) -> Vec<StationEntry> {
        self.entries
            .iter()
            .map(|entry| {
                let mut name: Vec<u8> = self
                    .key_words(entry)
                    .iter()
                    .flat_map(|word| word.to_le_bytes())
                    .collect();
                name.truncate(entry.key_len());
                StationEntry {
                    name,
                    aggregate: entry.aggregate,
                }
            })
            .collect()
    }

    /// Longest collision chain, for judging hash quality.
    pub fn max_chain_len(&self) -> usize {
        self.buckets
            .iter()
            .map(|&head| {
                let mut len = 0;
                let mut index = head;
                while index != NONE {
                    len += 1;
                    index = self.entries[index as usize].next;
                }
                len
            })
            .max()
            .unwrap_or(0)
    }

    #[inline(always)]
    fn key_words(&self, entry: &Entry) -> &[u64] {
        let start = entry.key_start as usize;
        &self.keys[start..start + words_for(entry.key_len())]
    }

    #[inline(always)]
    fn find(&self, bucket: usize, signature: u64, words: &[u64]) -> Option<usize> {
        let mut index = self.buckets[bucket];
        while index != NONE {
            let entry = &self.entries[index as usize];
            if entry.signature == signature && self.key_words(entry) == words {
                return Some(index as usize);
            }
            index = entry.next;
        }
        None
    }

    fn insert(&mut self, bucket: usize, signature: u64, words: &[u64], aggregate: Aggregate) {
        assert!(
            self.entries.len() < self.capacity(),
            "more than {} distinct stations",
            self.capacity()
        );
        debug_assert!(words.len() <= KEY_MAX_WORDS);
        let key_start = self.keys.len() as u32;
        self.keys.extend_from_slice(words);
        self.entries.push(Entry {
            aggregate,
            next: self.buckets[bucket],
            signature,
            key_start,
        });
        self.buckets[bucket] = (self.entries.len() - 1) as u32;
    }
}

impl<H> fmt::Debug for AggregateMap<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateMap")
            .field("capacity", &self.prime.prime)
            .field("len", &self.entries.len())
            .finish()
    }
}
