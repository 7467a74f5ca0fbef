use super::{
    branch_opt_util,
    error::TwinPIRError,
    serialization::{read_u32_le, read_u64_le},
};
use std::f64::consts::LN_2;
use turboshake::TurboShake128;

const BLOOM_FILTER_HASH_DOMAIN_SEPARATOR: u8 = 0x0b;
const HEADER_BYTE_LEN: usize = std::mem::size_of::<u32>() + 2 * std::mem::size_of::<u64>();
/// Enough for error rates down to ~2^-64. Also bounds the work a received filter can force on every membership test.
pub const MAX_NUM_HASHES: u32 = 64;

/// Bloom filter over opaque byte-strings, sized for a fixed capacity and false-positive rate.
#[derive(Clone, Debug, PartialEq)]
pub struct BloomFilter {
    num_hashes: u32,
    num_bits: u64,
    num_items: u64,
    words: Vec<u64>,
}

/// Derives two 64 -bit words from the item, which seed the double hashing scheme `h1 + i * h2`.
fn hash_item(item: &[u8]) -> (u64, u64) {
    let mut hasher = TurboShake128::default();
    hasher.absorb(item);
    hasher.finalize::<{ BLOOM_FILTER_HASH_DOMAIN_SEPARATOR }>();

    let mut digest = [0u8; 16];
    hasher.squeeze(&mut digest);

    let h1 = u64::from_le_bytes([digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7]]);
    let h2 = u64::from_le_bytes([digest[8], digest[9], digest[10], digest[11], digest[12], digest[13], digest[14], digest[15]]);

    // Odd step never collapses to probing a single bit.
    (h1, h2 | 1)
}

impl BloomFilter {
    /// Creates an empty filter, with `m = ceil(n * ln(1/ε) / ln(2)^2)` bits and `k = round(m/n * ln(2))` hash functions, with k
    /// clamped to [1, MAX_NUM_HASHES].
    ///
    /// # Arguments
    ///
    /// * `capacity` - Expected number of items `n`, values below 1 are treated as 1.
    /// * `error_rate` - Target false-positive rate `ε`, must be in (0, 1).
    pub fn with_capacity(capacity: usize, error_rate: f64) -> Result<BloomFilter, TwinPIRError> {
        if branch_opt_util::unlikely(!(error_rate > 0.0 && error_rate < 1.0)) {
            return Err(TwinPIRError::InvalidProtocolParameter("Bloom filter error rate must be in (0, 1)"));
        }

        let capacity = capacity.max(1) as f64;

        let num_bits = ((capacity * (1.0 / error_rate).ln()) / (LN_2 * LN_2)).ceil().max(1.0) as u64;
        let num_hashes = ((num_bits as f64 / capacity) * LN_2).round().clamp(1.0, MAX_NUM_HASHES as f64) as u32;

        Ok(BloomFilter {
            num_hashes,
            num_bits,
            num_items: 0,
            words: vec![0u64; num_bits.div_ceil(u64::BITS as u64) as usize],
        })
    }

    #[inline(always)]
    pub const fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
    #[inline(always)]
    pub const fn num_bits(&self) -> u64 {
        self.num_bits
    }
    #[inline(always)]
    pub const fn num_items(&self) -> u64 {
        self.num_items
    }

    fn bit_indices(&self, item: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = hash_item(item);
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, item: &[u8]) {
        let indices = self.bit_indices(item).collect::<Vec<u64>>();

        indices.into_iter().for_each(|bit_idx| {
            self.words[(bit_idx / u64::BITS as u64) as usize] |= 1u64 << (bit_idx % u64::BITS as u64);
        });
        self.num_items += 1;
    }

    /// Never returns false for an inserted item. Returns true for an item never inserted with probability close to the error rate.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.bit_indices(item)
            .all(|bit_idx| (self.words[(bit_idx / u64::BITS as u64) as usize] >> (bit_idx % u64::BITS as u64)) & 1 == 1)
    }

    /// Serializes as `num_hashes (u32 LE) || num_bits (u64 LE) || num_items (u64 LE) || words (u64 LE)*`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTE_LEN + self.words.len() * std::mem::size_of::<u64>());

        bytes.extend_from_slice(&self.num_hashes.to_le_bytes());
        bytes.extend_from_slice(&self.num_bits.to_le_bytes());
        bytes.extend_from_slice(&self.num_items.to_le_bytes());
        self.words.iter().for_each(|word| bytes.extend_from_slice(&word.to_le_bytes()));

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<BloomFilter, TwinPIRError> {
        let num_hashes = read_u32_le(bytes, 0).ok_or(TwinPIRError::FailedToDeserializeBloomFilter)?;
        let num_bits = read_u64_le(bytes, 4).ok_or(TwinPIRError::FailedToDeserializeBloomFilter)?;
        let num_items = read_u64_le(bytes, 12).ok_or(TwinPIRError::FailedToDeserializeBloomFilter)?;

        if branch_opt_util::unlikely(num_hashes == 0 || num_hashes > MAX_NUM_HASHES || num_bits == 0 || num_hashes as u64 > num_bits) {
            return Err(TwinPIRError::FailedToDeserializeBloomFilter);
        }

        let word_bytes = &bytes[HEADER_BYTE_LEN..];
        let num_words = num_bits.div_ceil(u64::BITS as u64);

        if branch_opt_util::unlikely(word_bytes.len() as u64 != num_words.saturating_mul(std::mem::size_of::<u64>() as u64)) {
            return Err(TwinPIRError::FailedToDeserializeBloomFilter);
        }

        let words = word_bytes
            .chunks_exact(std::mem::size_of::<u64>())
            .map(|word| u64::from_le_bytes([word[0], word[1], word[2], word[3], word[4], word[5], word[6], word[7]]))
            .collect::<Vec<u64>>();

        Ok(BloomFilter {
            num_hashes,
            num_bits,
            num_items,
            words,
        })
    }
}
