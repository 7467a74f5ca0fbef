use crate::pir_internals::{
    bloom_filter::BloomFilter,
    branch_opt_util,
    database::DbParams,
    error::{ErrorKind, TwinPIRError},
    hint::hint_from_bytes,
    lwe::decrypt_row,
    matrix::Matrix,
    messages::{AnswerHalf, SecretHalf},
    oprf::OprfGroup,
    params::ProtocolParams,
    serialization::decode_row_into_candidates,
    transaction::{TransactionId, TransactionMetrics, TransactionState, TransactionStore},
};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Reply to a blinded OPRF evaluation request, closing a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationResponse {
    pub evaluated: Vec<u8>,
    pub metrics: TransactionMetrics,
}

/// Server holding the hint matrix H and the OPRF secret key.
///
/// For every transaction it collects the LWE secret `s` from the client and the answer from the answering server, decrypts
/// the selected row, and lets the client test membership of its digest, through a Bloom filter over PRF-transformed row
/// candidates. It never sees the query vector or the encoded database.
pub struct VerifyingServer<G: OprfGroup> {
    params: ProtocolParams,
    group: G,
    secret_key: G::Scalar,
    db_params: DbParams,
    /// Kept in transposed form, so that computing `s * H` walks over contiguous memory.
    transposed_hint_h: Matrix,
    transactions: TransactionStore,
}

impl<G: OprfGroup> VerifyingServer<G> {
    /// Sets up the verifying server from hint and database parameters, received from the answering server. A fresh OPRF secret
    /// key is generated, which lives as long as the returned object and never leaves it.
    pub fn setup(params: &ProtocolParams, group: G, hint_bytes: &[u8], db_params_bytes: &[u8]) -> Result<VerifyingServer<G>, TwinPIRError> {
        params.validate()?;

        let db_params = DbParams::from_bytes(db_params_bytes)?;
        if branch_opt_util::unlikely(db_params.entry_vec_len as usize != params.digest_byte_len) {
            return Err(TwinPIRError::InvalidProtocolParameter("database entry length doesn't match digest length"));
        }

        let transposed_hint_h = hint_from_bytes(hint_bytes, params.lwe_dimension, &db_params)?.transpose();
        let secret_key = group.generate_secret_key(&mut ChaCha20Rng::from_os_rng());

        info!(
            num_rows = db_params.num_rows,
            num_cols = db_params.num_cols,
            lwe_dimension = params.lwe_dimension,
            "Verifying server setup complete"
        );

        Ok(VerifyingServer {
            params: params.clone(),
            group,
            secret_key,
            db_params,
            transposed_hint_h,
            transactions: TransactionStore::new(params.transaction_idle_timeout),
        })
    }

    pub fn receive_secret(&self, secret: SecretHalf) -> Result<(), TwinPIRError> {
        if branch_opt_util::unlikely(!secret.secret_vec_s.is_row_vector_of_len(self.params.lwe_dimension)) {
            return Err(TwinPIRError::InvalidSecretVector);
        }

        let id = secret.id;
        self.transactions.with_or_create(id, Instant::now(), |tx| tx.receive_secret(secret.secret_vec_s))?;
        debug!(transaction = %id, "Received LWE secret");

        Ok(())
    }

    pub fn receive_answer(&self, answer: AnswerHalf) -> Result<(), TwinPIRError> {
        if branch_opt_util::unlikely(!answer.answer_vec.is_row_vector_of_len(self.db_params.num_cols)) {
            return Err(TwinPIRError::InvalidAnswerVector);
        }

        let id = answer.id;
        self.transactions
            .with_or_create(id, Instant::now(), |tx| tx.receive_answer(answer.answer_vec, answer.compute_time))?;
        debug!(transaction = %id, compute_time = ?answer.compute_time, "Received answer");

        Ok(())
    }

    /// Decrypts the row selected by the transaction's query and builds a Bloom filter over the OPRF evaluation of every
    /// row candidate.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>, TwinPIRError>` - Serialized Bloom filter, to be sent to the client. Fails with `IncompleteTransaction`
    ///   if either query half is still missing, the transaction remains open then. An integrity violation during decryption closes
    ///   the transaction.
    pub fn prepare_verification(&self, id: TransactionId) -> Result<Vec<u8>, TwinPIRError> {
        let result = self.transactions.with_existing(id, Instant::now(), |tx| {
            let (secret_vec_s, answer_vec) = tx.halves()?;

            let decryption_start = Instant::now();
            let row = decrypt_row(secret_vec_s, answer_vec, &self.transposed_hint_h, &self.db_params, &self.params)?;
            let candidates = decode_row_into_candidates(&row, self.db_params.entry_vec_len as usize);
            let decryption_time = decryption_start.elapsed();

            let bloom_gen_start = Instant::now();
            let mut filter = BloomFilter::with_capacity(candidates.len(), self.params.bloom_filter_error_rate)?;
            candidates.iter().for_each(|candidate| {
                let evaluated = self.group.server_eval_on_item(candidate, &self.secret_key);
                filter.insert(&self.group.element_to_bytes(&evaluated));
            });
            let filter_bytes = filter.to_bytes();
            let bloom_gen_time = bloom_gen_start.elapsed();

            debug!(
                transaction = %id,
                num_candidates = filter.num_items(),
                bloom_filter_num_bits = filter.num_bits(),
                bloom_filter_num_hashes = filter.num_hashes(),
                ?decryption_time,
                ?bloom_gen_time,
                "Decrypted row and built Bloom filter"
            );

            tx.mark_decrypted(candidates, decryption_time, bloom_gen_time)?;
            Ok(filter_bytes)
        })
        .map_err(|err| match err {
            // Neither half has arrived yet, which is no different from one half missing.
            TwinPIRError::TransactionNotFound => TwinPIRError::IncompleteTransaction,
            err => err,
        });

        if let Err(err) = &result {
            if err.kind() == ErrorKind::DecryptionIntegrity {
                warn!(transaction = %id, error = %err, "Closing transaction after failed decryption");
                self.transactions.remove(id);
            }
        }

        result
    }

    /// Row candidates recovered for this transaction, available from decryption until verification completes.
    pub fn recovered_candidates(&self, id: TransactionId) -> Result<Vec<Vec<u8>>, TwinPIRError> {
        self.transactions.with_existing(id, Instant::now(), |tx| {
            if tx.state() == TransactionState::Decrypted {
                Ok(tx.candidates().to_vec())
            } else {
                Err(TwinPIRError::InvalidTransactionState("transaction is not decrypted yet"))
            }
        })
    }

    /// Evaluates the OPRF over the client's blinded element and closes the transaction.
    ///
    /// # Returns
    ///
    /// * `Result<EvaluationResponse, TwinPIRError>` - Serialized evaluated element, along with the time spent on every server-side
    ///   step of the transaction.
    pub fn evaluate_blinded(&self, id: TransactionId, blinded: &[u8]) -> Result<EvaluationResponse, TwinPIRError> {
        let blinded = self.group.element_from_bytes(blinded)?;

        let response = self.transactions.with_existing(id, Instant::now(), |tx| {
            let start = Instant::now();
            let evaluated = self.group.evaluate(&blinded, &self.secret_key);
            let oprf_eval_time = start.elapsed();

            tx.mark_verified(oprf_eval_time)?;

            Ok(EvaluationResponse {
                evaluated: self.group.element_to_bytes(&evaluated),
                metrics: tx.metrics(),
            })
        })?;

        self.transactions.remove(id);
        debug!(transaction = %id, oprf_eval_time = ?response.metrics.oprf_eval_time, "Evaluated blinded element, transaction closed");

        Ok(response)
    }

    /// State of an open transaction, `None` if it's unknown, already verified, failed or evicted.
    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        self.transactions.state_of(id)
    }

    pub fn num_open_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Drops every transaction idle for longer than the configured timeout, returning how many were dropped.
    pub fn evict_idle_transactions(&self) -> usize {
        self.evict_idle_transactions_at(Instant::now())
    }

    pub(crate) fn evict_idle_transactions_at(&self, now: Instant) -> usize {
        let evicted = self.transactions.evict_idle(now);
        evicted.iter().for_each(|id| warn!(transaction = %id, "Evicted idle transaction"));

        evicted.len()
    }
}
