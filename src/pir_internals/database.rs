use super::{
    branch_opt_util,
    error::TwinPIRError,
    matrix::Matrix,
    params::{PLAINTEXT_MODULUS, ProtocolParams},
    serialization::{encode_digest_into_row, read_u32_le, read_u64_le},
};
use rand::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Shape of the encoded database, derived once at encode time and shared verbatim with the client and the verifying server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DbParams {
    /// Number of distinct prefixes, i.e. rows of the encoded matrix.
    pub num_rows: u32,
    /// Row width, `max_cols_per_row * entry_vec_len`.
    pub num_cols: u32,
    /// Number of digests in the largest bucket.
    pub max_cols_per_row: u32,
    /// Number of matrix elements a single digest occupies.
    pub entry_vec_len: u32,
    /// Number of unique digests encoded.
    pub num_entries: u64,
}

impl DbParams {
    pub const BYTE_LEN: usize = 4 * std::mem::size_of::<u32>() + std::mem::size_of::<u64>();

    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];

        bytes[0..4].copy_from_slice(&self.num_rows.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.num_cols.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.max_cols_per_row.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.entry_vec_len.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.num_entries.to_le_bytes());

        bytes
    }

    /// Deserializes database parameters, rejecting any combination `encode` could never have produced.
    pub fn from_bytes(bytes: &[u8]) -> Result<DbParams, TwinPIRError> {
        if branch_opt_util::unlikely(bytes.len() != Self::BYTE_LEN) {
            return Err(TwinPIRError::FailedToDeserializeDbParams);
        }

        let read_u32 = |offset| read_u32_le(bytes, offset).ok_or(TwinPIRError::FailedToDeserializeDbParams);

        let db_params = DbParams {
            num_rows: read_u32(0)?,
            num_cols: read_u32(4)?,
            max_cols_per_row: read_u32(8)?,
            entry_vec_len: read_u32(12)?,
            num_entries: read_u64_le(bytes, 16).ok_or(TwinPIRError::FailedToDeserializeDbParams)?,
        };

        let is_consistent = db_params.num_rows > 0
            && db_params.max_cols_per_row > 0
            && db_params.entry_vec_len > 0
            && db_params.max_cols_per_row.checked_mul(db_params.entry_vec_len) == Some(db_params.num_cols)
            && db_params.num_entries >= db_params.num_rows as u64
            && db_params.num_entries <= (db_params.num_rows as u64) * (db_params.max_cols_per_row as u64);

        if branch_opt_util::likely(is_consistent) {
            Ok(db_params)
        } else {
            Err(TwinPIRError::FailedToDeserializeDbParams)
        }
    }
}

/// Database of digests, encoded as an LWE-queryable matrix D over Z_p.
///
/// Row `i` holds all digests sharing the `i`-th smallest prefix, concatenated in ascending order, right-padded with uniform
/// random elements of [0, p) to the common row width. Only the transpose of D is kept, because both the hint and the answer
/// are computed as products with D, given in its transposed form.
#[derive(Clone, Debug)]
pub struct EncodedDatabase {
    pub transposed_mat_d: Matrix,
    /// Distinct prefixes in ascending order. Prefix at index `i` labels row `i`.
    pub prefixes: Vec<Vec<u8>>,
    pub db_params: DbParams,
}

impl EncodedDatabase {
    /// Groups digests by prefix and encodes them as matrix D.
    ///
    /// Digests may arrive in any order and may repeat, duplicates are dropped. Same set of digests and same padding RNG state
    /// always produce a byte-identical matrix.
    ///
    /// # Arguments
    ///
    /// * `digests` - Database of digests, each `params.digest_byte_len` bytes long.
    /// * `params` - Protocol parameters, supplying digest and prefix lengths.
    /// * `rng` - Source of padding randomness.
    ///
    /// # Returns
    ///
    /// * `Result<EncodedDatabase, TwinPIRError>` - Encoded database, or an error if the database is empty, a digest has unexpected
    ///   length or the database shape doesn't fit in 32 -bit dimensions.
    pub fn encode<T: AsRef<[u8]>, R: RngCore + ?Sized>(digests: &[T], params: &ProtocolParams, rng: &mut R) -> Result<EncodedDatabase, TwinPIRError> {
        params.validate()?;

        if branch_opt_util::unlikely(digests.is_empty()) {
            return Err(TwinPIRError::EmptyDatabase);
        }

        let mut buckets = BTreeMap::<&[u8], BTreeSet<&[u8]>>::new();
        for digest in digests {
            let digest = digest.as_ref();

            if branch_opt_util::unlikely(digest.len() != params.digest_byte_len) {
                return Err(TwinPIRError::InconsistentDigestLength {
                    expected: params.digest_byte_len,
                    found: digest.len(),
                });
            }

            buckets.entry(&digest[..params.prefix_byte_len]).or_default().insert(digest);
        }

        let too_large = || TwinPIRError::InvalidProtocolParameter("database shape exceeds 32 -bit matrix dimensions");

        let num_rows = u32::try_from(buckets.len()).map_err(|_| too_large())?;
        let max_cols_per_row = u32::try_from(buckets.values().map(|bucket| bucket.len()).max().unwrap_or_default()).map_err(|_| too_large())?;
        let entry_vec_len = u32::try_from(params.digest_byte_len).map_err(|_| too_large())?;
        let num_cols = max_cols_per_row.checked_mul(entry_vec_len).ok_or_else(too_large)?;
        let num_entries = buckets.values().map(|bucket| bucket.len() as u64).sum::<u64>();

        let mut mat_d = Matrix::new(num_rows, num_cols)?;
        let mut row = vec![0u32; num_cols as usize];

        for (ridx, bucket) in buckets.values().enumerate() {
            bucket.iter().enumerate().for_each(|(idx, digest)| {
                let offset = idx * params.digest_byte_len;
                encode_digest_into_row(digest, &mut row[offset..offset + params.digest_byte_len]);
            });

            row[bucket.len() * params.digest_byte_len..].iter_mut().for_each(|elem| {
                *elem = rng.random_range(0..PLAINTEXT_MODULUS);
            });

            row.iter().enumerate().for_each(|(cidx, &elem)| {
                mat_d[(ridx, cidx)] = elem;
            });
        }

        let prefixes = buckets.keys().map(|prefix| prefix.to_vec()).collect::<Vec<Vec<u8>>>();

        Ok(EncodedDatabase {
            transposed_mat_d: mat_d.transpose(),
            prefixes,
            db_params: DbParams {
                num_rows,
                num_cols,
                max_cols_per_row,
                entry_vec_len,
                num_entries,
            },
        })
    }

    /// Returns `ridx`-th row of D, reassembled from its transpose.
    #[cfg(test)]
    pub fn row(&self, ridx: usize) -> Vec<u32> {
        (0..self.db_params.num_cols as usize).map(|cidx| self.transposed_mat_d[(cidx, ridx)]).collect()
    }
}
