use super::{branch_opt_util, error::TwinPIRError};
use std::time::Duration;

pub const LWE_DIMENSION: u32 = 1024;
pub const PLAINTEXT_MODULUS_BIT_LEN: u32 = 8;
pub const PLAINTEXT_MODULUS: u32 = 1 << PLAINTEXT_MODULUS_BIT_LEN;
/// Δ = q / p, where q = 2^32 is implicit in wrapping `u32` arithmetic.
pub const SCALING_FACTOR: u32 = 1 << (u32::BITS - PLAINTEXT_MODULUS_BIT_LEN);
pub const SEED_BYTE_LEN: usize = 32;
pub const DIGEST_BYTE_LEN: usize = 32;
pub const PREFIX_BYTE_LEN: usize = 2;
pub const NOISE_HAMMING_WEIGHT: u32 = 64;
pub const NOISE_MAX_MAGNITUDE: u32 = 2;
pub const MAT_MUL_CHUNK_NUM_COLS: usize = 256;
pub const OPRF_GROUP_MODULUS: u64 = 65521;
pub const BLOOM_FILTER_ERROR_RATE: f64 = 1e-9;
pub const TRANSACTION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Runtime protocol parameters, shared by all three roles. Both servers and the client must agree on them.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolParams {
    /// Length of the LWE secret vector `s`, i.e. number of rows of public matrix A.
    pub lwe_dimension: u32,
    pub digest_byte_len: usize,
    pub prefix_byte_len: usize,
    /// Number of non-zero entries in the noise vector `e`.
    pub noise_hamming_weight: u32,
    /// Non-zero noise entries are sampled uniformly from {-m, .., -1, 1, .., m}.
    pub noise_max_magnitude: u32,
    /// Width of the column blocks processed at once by hint precomputation and answer computation.
    pub chunk_num_cols: usize,
    pub bloom_filter_error_rate: f64,
    pub transaction_idle_timeout: Duration,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        ProtocolParams {
            lwe_dimension: LWE_DIMENSION,
            digest_byte_len: DIGEST_BYTE_LEN,
            prefix_byte_len: PREFIX_BYTE_LEN,
            noise_hamming_weight: NOISE_HAMMING_WEIGHT,
            noise_max_magnitude: NOISE_MAX_MAGNITUDE,
            chunk_num_cols: MAT_MUL_CHUNK_NUM_COLS,
            bloom_filter_error_rate: BLOOM_FILTER_ERROR_RATE,
            transaction_idle_timeout: TRANSACTION_IDLE_TIMEOUT,
        }
    }
}

impl ProtocolParams {
    /// Checks that parameters are usable and that decryption is guaranteed to be correct.
    ///
    /// The noise term `e·D` has magnitude at most `hamming_weight * max_magnitude * (p - 1)`, which must stay below `Δ / 2`,
    /// otherwise rounding may flip a recovered plaintext.
    ///
    /// # Returns
    ///
    /// * `Result<(), TwinPIRError>` - `Ok` if all parameters are valid, otherwise `InvalidProtocolParameter` naming the offending parameter.
    pub fn validate(&self) -> Result<(), TwinPIRError> {
        if branch_opt_util::unlikely(self.lwe_dimension == 0) {
            return Err(TwinPIRError::InvalidProtocolParameter("LWE dimension must be non-zero"));
        }
        if branch_opt_util::unlikely(self.digest_byte_len == 0) {
            return Err(TwinPIRError::InvalidProtocolParameter("digest length must be non-zero"));
        }
        if branch_opt_util::unlikely(self.prefix_byte_len == 0 || self.prefix_byte_len > self.digest_byte_len) {
            return Err(TwinPIRError::InvalidProtocolParameter("prefix length must be in [1, digest length]"));
        }
        if branch_opt_util::unlikely(self.chunk_num_cols == 0) {
            return Err(TwinPIRError::InvalidProtocolParameter("chunk width must be non-zero"));
        }
        if branch_opt_util::unlikely(!(self.bloom_filter_error_rate > 0.0 && self.bloom_filter_error_rate < 1.0)) {
            return Err(TwinPIRError::InvalidProtocolParameter("Bloom filter error rate must be in (0, 1)"));
        }
        if branch_opt_util::unlikely(self.noise_hamming_weight == 0 || self.noise_max_magnitude == 0) {
            return Err(TwinPIRError::InvalidProtocolParameter("noise weight and magnitude must be non-zero"));
        }

        let noise_bound = (self.noise_hamming_weight as u64) * (self.noise_max_magnitude as u64) * ((PLAINTEXT_MODULUS - 1) as u64);
        if branch_opt_util::unlikely(noise_bound >= (SCALING_FACTOR / 2) as u64) {
            return Err(TwinPIRError::InvalidProtocolParameter("noise bound must stay below half of the scaling factor"));
        }

        Ok(())
    }

    /// Number of non-zero noise entries actually sampled for a database with `num_rows` rows.
    #[inline(always)]
    pub fn effective_hamming_weight(&self, num_rows: u32) -> u32 {
        self.noise_hamming_weight.min(num_rows)
    }

    /// Largest magnitude the accumulated noise `e·D` can reach in a single column.
    #[inline(always)]
    pub fn noise_bound(&self, num_rows: u32) -> u64 {
        (self.effective_hamming_weight(num_rows) as u64) * (self.noise_max_magnitude as u64) * ((PLAINTEXT_MODULUS - 1) as u64)
    }
}
