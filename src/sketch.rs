//! TinyLFU frequency sketch: a count-min sketch of 4-bit saturating
//! counters with periodic halving.
//!
//! Grounded on the teacher's `memory/buffer_pool/eviction_policies.rs`
//! atomics-first style (plain `AtomicU64` fields, `Ordering::Relaxed`
//! throughout except where a stronger ordering is load-bearing) rather than
//! a `parking_lot::Mutex<Vec<u8>>`, since this structure is on the hot
//! `get`/`put` path and must never block.

use std::sync::atomic::{AtomicU64, Ordering};

/// Masks a 64-bit word's sixteen 4-bit counters down to their top three
/// bits, used by `reset` to halve every counter in the word in one shot.
const RESET_MASK: u64 = 0x7777_7777_7777_7777;

/// Four distinct odd multipliers used to derive four independent indices
/// from one key hash, matching §4.2's "four independent hash indices".
const SEEDS: [u64; 4] = [
    0xff51_afd7_ed55_8ccd,
    0xc4ce_b9fe_1a85_ec53,
    0x2545_f491_4f6c_dd1d,
    0x9e37_79b9_7f4a_7c15,
];

pub(crate) struct FrequencySketch {
    table: Vec<AtomicU64>,
    table_mask: u64,
    sample_size: u64,
    size: AtomicU64,
}

impl FrequencySketch {
    /// `maximum_size` is the cache's configured maximum weight (or entry
    /// count if unweighted); table length is the next power of two ≥ it,
    /// per §4.2's sizing rule.
    pub fn new(maximum_size: u64) -> Self {
        let maximum = maximum_size.max(1);
        let table_len = maximum.next_power_of_two().max(8);
        let table = (0..table_len).map(|_| AtomicU64::new(0)).collect();
        FrequencySketch {
            table,
            table_mask: table_len - 1,
            sample_size: 10 * maximum,
            size: AtomicU64::new(0),
        }
    }

    fn locate(&self, hash: u64, seed: u64) -> (usize, u32) {
        let mixed = hash.wrapping_mul(seed);
        let spread = mixed ^ (mixed >> 32);
        let word = (spread as usize) & (self.table_mask as usize);
        // last bits of the index select the sub-counter inside the word
        let counter = ((spread >> 20) & 0xF) as u32;
        (word, counter)
    }

    /// Adds 1 to each of the four counters for `key_hash`, saturating at 15.
    /// Halves the whole table once the sample counter reaches
    /// `10 * maximumSize`.
    pub fn increment(&self, key_hash: u64) {
        let mut added = false;
        for &seed in &SEEDS {
            let (word, counter) = self.locate(key_hash, seed);
            added |= Self::try_increment(&self.table[word], counter);
        }
        if added && self.size.fetch_add(1, Ordering::Relaxed) + 1 >= self.sample_size {
            self.reset();
        }
    }

    fn try_increment(word: &AtomicU64, counter: u32) -> bool {
        let shift = counter * 4;
        let mask = 0xFu64 << shift;
        let mut current = word.load(Ordering::Relaxed);
        loop {
            if (current & mask) >> shift >= 15 {
                return false;
            }
            let updated = current + (1u64 << shift);
            match word.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Minimum of the four counters, range `0..=15`.
    pub fn frequency(&self, key_hash: u64) -> u8 {
        let mut min = 15u8;
        for &seed in &SEEDS {
            let (word, counter) = self.locate(key_hash, seed);
            let shift = counter * 4;
            let value = ((self.table[word].load(Ordering::Relaxed) >> shift) & 0xF) as u8;
            min = min.min(value);
        }
        min
    }

    /// Halves every counter in the table. Not required to be atomic with
    /// concurrent `increment` calls; a lost increment during halving is an
    /// acceptable approximation per Design Notes §9.
    fn reset(&self) {
        for word in &self.table {
            let mut current = word.load(Ordering::Relaxed);
            loop {
                let halved = (current >> 1) & RESET_MASK;
                match word.compare_exchange_weak(current, halved, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
        self.size.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn sample_size(&self) -> u64 {
        self.sample_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_starts_at_zero() {
        let sketch = FrequencySketch::new(100);
        assert_eq!(sketch.frequency(0xdead_beef), 0);
    }

    #[test]
    fn increments_raise_frequency_and_saturate() {
        let sketch = FrequencySketch::new(100);
        for _ in 0..20 {
            sketch.increment(42);
        }
        assert_eq!(sketch.frequency(42), 15);
    }

    #[test]
    fn unrelated_keys_rarely_share_full_frequency() {
        let sketch = FrequencySketch::new(1000);
        for _ in 0..10 {
            sketch.increment(1);
        }
        assert!(sketch.frequency(1) >= sketch.frequency(999_999));
    }

    #[test]
    fn halving_occurs_after_sample_size_increments() {
        let sketch = FrequencySketch::new(8);
        let sample_size = sketch.sample_size();
        for i in 0..sample_size {
            sketch.increment(i);
        }
        // every key incremented exactly once before the reset tripped;
        // post-halving frequencies must stay within range.
        for i in 0..sample_size {
            assert!(sketch.frequency(i) <= 15);
        }
    }
}
