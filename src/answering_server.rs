use crate::pir_internals::{
    database::EncodedDatabase,
    directory::PrefixDirectory,
    error::TwinPIRError,
    hint::precompute_hint,
    lwe::compute_answer,
    matrix::Matrix,
    messages::{AnswerHalf, QueryHalf},
    params::{ProtocolParams, SEED_BYTE_LEN},
};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything produced at setup that must leave the answering server.
///
/// Hint and database parameters are addressed to the verifying server. Database parameters and the prefix directory are
/// addressed to every client, along with the seed of public matrix A.
#[derive(Clone, Debug)]
pub struct SetupArtifacts {
    pub hint_bytes: Vec<u8>,
    pub db_params_bytes: Vec<u8>,
    pub directory_bytes: Vec<u8>,
    pub setup_time: Duration,
}

/// Server holding the encoded database D. It answers query vectors without learning which row they select.
///
/// The encoded database matrix is kept in transposed form, so that computing `qu * D` walks over contiguous memory.
/// The hint matrix H is never kept by this server, it only leaves setup in serialized form.
#[derive(Clone, Debug)]
pub struct AnsweringServer {
    params: ProtocolParams,
    transposed_mat_d: Matrix,
}

impl AnsweringServer {
    /// Sets up the answering server over a database of digests.
    ///
    /// Runs the whole offline phase:
    /// 1. **Encoding:** Digests are grouped by prefix into rows of D, padded to a common width with uniform random elements.
    /// 2. **Hint Precomputation:** Public matrix A is derived from `seed`, then H = A * D is computed in column blocks.
    /// 3. **Directory:** Row index of every prefix is encrypted under a key derived from the prefix itself.
    ///
    /// # Arguments
    ///
    /// * `params` - Protocol parameters, shared with the client and the verifying server.
    /// * `seed` - Seed of public matrix A, shared with every client.
    /// * `digests` - Database of fixed-length digests, in any order, possibly with duplicates.
    ///
    /// # Returns
    ///
    /// * `Result<(AnsweringServer, SetupArtifacts), TwinPIRError>` - The server and the artifacts to distribute, or a
    ///   configuration error if the database is empty, malformed or the parameters are invalid.
    pub fn setup<T: AsRef<[u8]>>(params: &ProtocolParams, seed: &[u8; SEED_BYTE_LEN], digests: &[T]) -> Result<(AnsweringServer, SetupArtifacts), TwinPIRError> {
        let start = Instant::now();
        let mut rng = ChaCha20Rng::from_os_rng();

        let db = EncodedDatabase::encode(digests, params, &mut rng)?;
        info!(
            num_entries = db.db_params.num_entries,
            num_rows = db.db_params.num_rows,
            num_cols = db.db_params.num_cols,
            max_cols_per_row = db.db_params.max_cols_per_row,
            "Encoded database"
        );

        let (_, hint_mat_h) = precompute_hint(&db, params.lwe_dimension, seed, params.chunk_num_cols)?;
        let hint_bytes = hint_mat_h.to_bytes();
        drop(hint_mat_h);

        let directory = PrefixDirectory::build(&db.prefixes, &mut rng)?;
        info!(num_entries = directory.num_entries(), "Built prefix directory");

        let artifacts = SetupArtifacts {
            hint_bytes,
            db_params_bytes: db.db_params.to_bytes().to_vec(),
            directory_bytes: directory.to_bytes(),
            setup_time: start.elapsed(),
        };
        info!(setup_time = ?artifacts.setup_time, hint_byte_len = artifacts.hint_bytes.len(), "Answering server setup complete");

        Ok((
            AnsweringServer {
                params: params.clone(),
                transposed_mat_d: db.transposed_mat_d,
            },
            artifacts,
        ))
    }

    /// Computes the answer `qu * D`, in column blocks, along with the time it took.
    ///
    /// # Returns
    ///
    /// * `Result<AnswerHalf, TwinPIRError>` - Answer addressed to the verifying server, or an error if the query vector doesn't have
    ///   one element per database row.
    pub fn respond(&self, query: &QueryHalf) -> Result<AnswerHalf, TwinPIRError> {
        let start = Instant::now();
        let answer_vec = compute_answer(&query.query_vec_qu, &self.transposed_mat_d, self.params.chunk_num_cols)?;
        let compute_time = start.elapsed();

        debug!(transaction = %query.id, ?compute_time, "Computed answer");

        Ok(AnswerHalf {
            id: query.id,
            answer_vec,
            compute_time,
        })
    }
}
