use crate::pir_internals::{
    bloom_filter::BloomFilter,
    branch_opt_util,
    database::DbParams,
    directory::PrefixDirectory,
    error::TwinPIRError,
    lwe::generate_query,
    matrix::Matrix,
    messages::{QueryHalf, SecretHalf},
    oprf::OprfGroup,
    params::{ProtocolParams, SEED_BYTE_LEN},
    transaction::TransactionId,
};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// A query, ready to be split and sent. LWE secret `s` goes to the verifying server, query vector `qu` goes to the answering
/// server, never both to the same one.
#[derive(Clone, Debug)]
pub struct PreparedQuery {
    id: TransactionId,
    row_index: u32,
    secret: SecretHalf,
    query: QueryHalf,
    lookup_time: Duration,
    generation_time: Duration,
}

impl PreparedQuery {
    pub const fn id(&self) -> TransactionId {
        self.id
    }
    /// Row of the encoded database selected by this query. Must never leave the client.
    pub const fn row_index(&self) -> u32 {
        self.row_index
    }
    pub const fn lookup_time(&self) -> Duration {
        self.lookup_time
    }
    pub const fn generation_time(&self) -> Duration {
        self.generation_time
    }

    pub fn split(self) -> (SecretHalf, QueryHalf) {
        (self.secret, self.query)
    }
}

/// Client of the two-server membership lookup protocol.
///
/// It regenerates public matrix A from the seed published by the answering server, keeps the prefix directory, and
/// remembers the blinding factor of every transaction awaiting OPRF evaluation.
pub struct Client<G: OprfGroup> {
    params: ProtocolParams,
    group: G,
    db_params: DbParams,
    /// Kept in transposed form, so that computing `s * A` walks over contiguous memory.
    transposed_pub_mat_a: Matrix,
    directory: PrefixDirectory,
    pending_verifications: HashMap<TransactionId, G::Scalar>,
    rng: ChaCha20Rng,
}

impl<G: OprfGroup> Client<G> {
    /// Sets up the client from the seed of public matrix A, database parameters and prefix directory, all published by the
    /// answering server.
    ///
    /// # Returns
    ///
    /// * `Result<Client<G>, TwinPIRError>` - The client, or a configuration error if any input is malformed or inconsistent with
    ///   the protocol parameters.
    pub fn setup(params: &ProtocolParams, group: G, seed: &[u8; SEED_BYTE_LEN], db_params_bytes: &[u8], directory_bytes: &[u8]) -> Result<Client<G>, TwinPIRError> {
        params.validate()?;

        let db_params = DbParams::from_bytes(db_params_bytes)?;
        if branch_opt_util::unlikely(db_params.entry_vec_len as usize != params.digest_byte_len) {
            return Err(TwinPIRError::InvalidProtocolParameter("database entry length doesn't match digest length"));
        }

        let directory = PrefixDirectory::from_bytes(directory_bytes)?;
        if branch_opt_util::unlikely(directory.num_entries() != db_params.num_rows as usize) {
            return Err(TwinPIRError::FailedToDeserializeDirectory);
        }

        let transposed_pub_mat_a = Matrix::generate_from_seed(params.lwe_dimension, db_params.num_rows, seed)?.transpose();

        Ok(Client {
            params: params.clone(),
            group,
            db_params,
            transposed_pub_mat_a,
            directory,
            pending_verifications: HashMap::new(),
            rng: ChaCha20Rng::from_os_rng(),
        })
    }

    pub const fn db_params(&self) -> &DbParams {
        &self.db_params
    }

    /// Finds the row of the encoded database holding digests with the same prefix as `digest`.
    ///
    /// # Returns
    ///
    /// * `Result<u32, TwinPIRError>` - Row index, or `PrefixNotFoundInDirectory` if no digest with this prefix is in the
    ///   database, in which case `digest` is definitely absent and no query needs to be sent.
    pub fn lookup_row(&self, digest: &[u8]) -> Result<u32, TwinPIRError> {
        if branch_opt_util::unlikely(digest.len() != self.params.digest_byte_len) {
            return Err(TwinPIRError::InconsistentDigestLength {
                expected: self.params.digest_byte_len,
                found: digest.len(),
            });
        }

        let row_index = self.directory.lookup_row(&digest[..self.params.prefix_byte_len])?;
        if branch_opt_util::likely(row_index < self.db_params.num_rows) {
            Ok(row_index)
        } else {
            Err(TwinPIRError::FailedToDeserializeDirectory)
        }
    }

    /// Opens a new transaction for `digest`: resolves its row in the directory and generates the LWE query selecting it.
    pub fn query(&mut self, digest: &[u8]) -> Result<PreparedQuery, TwinPIRError> {
        let lookup_start = Instant::now();
        let row_index = self.lookup_row(digest)?;
        let lookup_time = lookup_start.elapsed();

        let generation_start = Instant::now();
        let (secret_vec_s, query_vec_qu) = generate_query(row_index, &self.transposed_pub_mat_a, &self.params, &mut self.rng)?;
        let generation_time = generation_start.elapsed();

        let id = TransactionId::random(&mut self.rng);

        Ok(PreparedQuery {
            id,
            row_index,
            secret: SecretHalf { id, secret_vec_s },
            query: QueryHalf { id, query_vec_qu },
            lookup_time,
            generation_time,
        })
    }

    /// Blinds the OPRF input of `digest`, keeping the blinding factor until `verify` is called for the same transaction.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>, TwinPIRError>` - Serialized blinded element, to be sent to the verifying server. Fails with
    ///   `PendingQueryExistsForTransaction` if this transaction already awaits verification.
    pub fn blind(&mut self, id: TransactionId, digest: &[u8]) -> Result<Vec<u8>, TwinPIRError> {
        if branch_opt_util::unlikely(self.pending_verifications.contains_key(&id)) {
            return Err(TwinPIRError::PendingQueryExistsForTransaction);
        }

        let element = self.group.hash_to_element(digest);
        let (blinded, blinding_factor) = self.group.blind(&element, &mut self.rng);
        self.pending_verifications.insert(id, blinding_factor);

        Ok(self.group.element_to_bytes(&blinded))
    }

    /// Unblinds the verifying server's evaluation and tests it against the Bloom filter of the transaction.
    ///
    /// Pending state of the transaction is consumed, whatever the outcome. Any error means the membership test is inconclusive,
    /// and must be retried as a new transaction, it never means "absent".
    ///
    /// # Returns
    ///
    /// * `Result<bool, TwinPIRError>` - `false` if the digest is definitely absent, `true` if it is present, up to the configured
    ///   false-positive rate of the Bloom filter.
    pub fn verify(&mut self, id: TransactionId, evaluated: &[u8], bloom_filter_bytes: &[u8]) -> Result<bool, TwinPIRError> {
        let blinding_factor = self.pending_verifications.remove(&id).ok_or(TwinPIRError::PendingQueryDoesNotExistForTransaction)?;

        let evaluated = self.group.element_from_bytes(evaluated)?;
        let unblinded = self.group.unblind(&evaluated, &blinding_factor)?;
        let filter = BloomFilter::from_bytes(bloom_filter_bytes)?;

        Ok(filter.contains(&self.group.element_to_bytes(&unblinded)))
    }

    pub fn has_pending_verification(&self, id: TransactionId) -> bool {
        self.pending_verifications.contains_key(&id)
    }

    /// Drops pending state of a transaction which will never be verified, e.g. because a server failed or timed out.
    /// Returns whether any pending state existed.
    pub fn abandon(&mut self, id: TransactionId) -> bool {
        self.pending_verifications.remove(&id).is_some()
    }

    pub fn num_pending_verifications(&self) -> usize {
        self.pending_verifications.len()
    }
}
