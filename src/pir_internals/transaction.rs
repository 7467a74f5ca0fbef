use super::{branch_opt_util, error::TwinPIRError, matrix::Matrix};
use rand::prelude::*;
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

pub const TRANSACTION_ID_BYTE_LEN: usize = 16;

/// Identifies one query round, across the client and both servers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId([u8; TRANSACTION_ID_BYTE_LEN]);

impl TransactionId {
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> TransactionId {
        let mut bytes = [0u8; TRANSACTION_ID_BYTE_LEN];
        rng.fill_bytes(&mut bytes);

        TransactionId(bytes)
    }

    pub const fn from_bytes(bytes: [u8; TRANSACTION_ID_BYTE_LEN]) -> TransactionId {
        TransactionId(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; TRANSACTION_ID_BYTE_LEN] {
        &self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    SecretReceived,
    AnswerReceived,
    BothReceived,
    Decrypted,
    Verified,
}

/// Time spent by the verifying server on each step of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// As reported by the answering server, along with its answer.
    pub answer_compute_time: Duration,
    pub decryption_time: Duration,
    pub bloom_gen_time: Duration,
    pub oprf_eval_time: Duration,
}

/// Per-query state held by the verifying server.
#[derive(Debug)]
pub struct Transaction {
    state: TransactionState,
    secret_vec_s: Option<Matrix>,
    answer_vec: Option<Matrix>,
    candidates: Vec<Vec<u8>>,
    metrics: TransactionMetrics,
    last_touched: Instant,
}

impl Transaction {
    fn new(now: Instant) -> Transaction {
        Transaction {
            state: TransactionState::Created,
            secret_vec_s: None,
            answer_vec: None,
            candidates: Vec::new(),
            metrics: TransactionMetrics::default(),
            last_touched: now,
        }
    }

    #[inline(always)]
    pub const fn state(&self) -> TransactionState {
        self.state
    }
    #[inline(always)]
    pub const fn metrics(&self) -> TransactionMetrics {
        self.metrics
    }
    #[inline(always)]
    pub fn candidates(&self) -> &[Vec<u8>] {
        &self.candidates
    }

    #[inline(always)]
    pub fn touch(&mut self, now: Instant) {
        self.last_touched = now;
    }

    pub fn receive_secret(&mut self, secret_vec_s: Matrix) -> Result<(), TwinPIRError> {
        self.state = match self.state {
            TransactionState::Created => TransactionState::SecretReceived,
            TransactionState::AnswerReceived => TransactionState::BothReceived,
            _ => return Err(TwinPIRError::InvalidTransactionState("secret already received")),
        };
        self.secret_vec_s = Some(secret_vec_s);

        Ok(())
    }

    pub fn receive_answer(&mut self, answer_vec: Matrix, answer_compute_time: Duration) -> Result<(), TwinPIRError> {
        self.state = match self.state {
            TransactionState::Created => TransactionState::AnswerReceived,
            TransactionState::SecretReceived => TransactionState::BothReceived,
            _ => return Err(TwinPIRError::InvalidTransactionState("answer already received")),
        };
        self.answer_vec = Some(answer_vec);
        self.metrics.answer_compute_time = answer_compute_time;

        Ok(())
    }

    /// Returns both query halves, if the transaction is ready to be decrypted.
    pub fn halves(&self) -> Result<(&Matrix, &Matrix), TwinPIRError> {
        match (self.state, &self.secret_vec_s, &self.answer_vec) {
            (TransactionState::BothReceived, Some(secret_vec_s), Some(answer_vec)) => Ok((secret_vec_s, answer_vec)),
            (TransactionState::Created | TransactionState::SecretReceived | TransactionState::AnswerReceived, _, _) => Err(TwinPIRError::IncompleteTransaction),
            _ => Err(TwinPIRError::InvalidTransactionState("transaction already decrypted")),
        }
    }

    /// Records recovered row candidates. Query halves are dropped, they are of no use anymore.
    pub fn mark_decrypted(&mut self, candidates: Vec<Vec<u8>>, decryption_time: Duration, bloom_gen_time: Duration) -> Result<(), TwinPIRError> {
        if self.state != TransactionState::BothReceived {
            return Err(TwinPIRError::InvalidTransactionState("transaction is not ready for decryption"));
        }

        self.state = TransactionState::Decrypted;
        self.secret_vec_s = None;
        self.answer_vec = None;
        self.candidates = candidates;
        self.metrics.decryption_time = decryption_time;
        self.metrics.bloom_gen_time = bloom_gen_time;

        Ok(())
    }

    pub fn mark_verified(&mut self, oprf_eval_time: Duration) -> Result<(), TwinPIRError> {
        if self.state != TransactionState::Decrypted {
            return Err(TwinPIRError::InvalidTransactionState("transaction is not decrypted yet"));
        }

        self.state = TransactionState::Verified;
        self.candidates.clear();
        self.metrics.oprf_eval_time = oprf_eval_time;

        Ok(())
    }
}

/// Concurrent store of in-flight transactions.
///
/// Outer lock only guards the map itself, so operations on distinct transactions proceed concurrently, while the per-entry
/// lock serializes all operations on the same transaction.
#[derive(Debug)]
pub struct TransactionStore {
    transactions: Mutex<HashMap<TransactionId, Arc<Mutex<Transaction>>>>,
    idle_timeout: Duration,
}

impl TransactionStore {
    pub fn new(idle_timeout: Duration) -> TransactionStore {
        TransactionStore {
            transactions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    #[inline(always)]
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<TransactionId, Arc<Mutex<Transaction>>>> {
        self.transactions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Runs `f` on the transaction, creating it first if it doesn't exist yet.
    pub fn with_or_create<T>(&self, id: TransactionId, now: Instant, f: impl FnOnce(&mut Transaction) -> Result<T, TwinPIRError>) -> Result<T, TwinPIRError> {
        loop {
            let entry = self.map().entry(id).or_insert_with(|| Arc::new(Mutex::new(Transaction::new(now)))).clone();

            let mut transaction = entry.lock().unwrap_or_else(PoisonError::into_inner);
            if branch_opt_util::unlikely(!self.is_current(id, &entry)) {
                // Evicted after lookup, but before being locked. Start over with whatever is in the map now.
                continue;
            }

            transaction.touch(now);
            return f(&mut transaction);
        }
    }

    /// Runs `f` on an existing transaction.
    pub fn with_existing<T>(&self, id: TransactionId, now: Instant, f: impl FnOnce(&mut Transaction) -> Result<T, TwinPIRError>) -> Result<T, TwinPIRError> {
        loop {
            let entry = self.map().get(&id).cloned().ok_or(TwinPIRError::TransactionNotFound)?;

            let mut transaction = entry.lock().unwrap_or_else(PoisonError::into_inner);
            if branch_opt_util::unlikely(!self.is_current(id, &entry)) {
                continue;
            }

            transaction.touch(now);
            return f(&mut transaction);
        }
    }

    /// Whether `entry` is still the one stored under `id`. Must be called with `entry` locked, so that it can't be evicted
    /// concurrently, as eviction skips locked entries.
    fn is_current(&self, id: TransactionId, entry: &Arc<Mutex<Transaction>>) -> bool {
        self.map().get(&id).is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    pub fn state_of(&self, id: TransactionId) -> Option<TransactionState> {
        let entry = self.map().get(&id).cloned()?;
        let transaction = entry.lock().unwrap_or_else(PoisonError::into_inner);

        Some(transaction.state())
    }

    pub fn remove(&self, id: TransactionId) -> bool {
        self.map().remove(&id).is_some()
    }

    /// Drops every transaction not touched for longer than the idle timeout.
    ///
    /// # Returns
    ///
    /// Identifiers of the evicted transactions.
    pub fn evict_idle(&self, now: Instant) -> Vec<TransactionId> {
        let mut map = self.map();

        let idle = map
            .iter()
            .filter(|(_, entry)| {
                // A transaction being worked on right now is clearly not idle.
                entry
                    .try_lock()
                    .map(|transaction| now.saturating_duration_since(transaction.last_touched) > self.idle_timeout)
                    .unwrap_or(false)
            })
            .map(|(&id, _)| id)
            .collect::<Vec<TransactionId>>();

        idle.iter().for_each(|id| {
            map.remove(id);
        });

        idle
    }
}

#[cfg(test)]
mod test {
    use crate::pir_internals::{
        error::TwinPIRError,
        matrix::Matrix,
        transaction::{TransactionId, TransactionState, TransactionStore},
    };
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::{
        sync::{Arc, Barrier},
        time::{Duration, Instant},
    };

    fn vector(len: u32) -> Matrix {
        Matrix::new(1, len).expect("Vector must be created")
    }

    #[test]
    fn transaction_id_is_hex_displayed() {
        let id = TransactionId::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));

        let mut rng = ChaCha8Rng::from_os_rng();
        assert_ne!(TransactionId::random(&mut rng), TransactionId::random(&mut rng));
    }

    #[test]
    fn halves_can_arrive_in_either_order() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let store = TransactionStore::new(Duration::from_secs(60));
        let now = Instant::now();

        let secret_first = TransactionId::random(&mut rng);
        store.with_or_create(secret_first, now, |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");
        assert_eq!(store.state_of(secret_first), Some(TransactionState::SecretReceived));
        store.with_or_create(secret_first, now, |tx| tx.receive_answer(vector(8), Duration::ZERO)).expect("Answer must be accepted");
        assert_eq!(store.state_of(secret_first), Some(TransactionState::BothReceived));

        let answer_first = TransactionId::random(&mut rng);
        store.with_or_create(answer_first, now, |tx| tx.receive_answer(vector(8), Duration::ZERO)).expect("Answer must be accepted");
        assert_eq!(store.state_of(answer_first), Some(TransactionState::AnswerReceived));
        store.with_or_create(answer_first, now, |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");
        assert_eq!(store.state_of(answer_first), Some(TransactionState::BothReceived));

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn out_of_order_steps_are_rejected() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let store = TransactionStore::new(Duration::from_secs(60));
        let now = Instant::now();
        let id = TransactionId::random(&mut rng);

        assert_eq!(store.with_existing(id, now, |_| Ok(())), Err(TwinPIRError::TransactionNotFound));

        store.with_or_create(id, now, |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");
        assert!(matches!(store.with_or_create(id, now, |tx| tx.receive_secret(vector(4))), Err(TwinPIRError::InvalidTransactionState(_))));

        assert_eq!(store.with_existing(id, now, |tx| tx.halves().map(|_| ())), Err(TwinPIRError::IncompleteTransaction));
        assert!(matches!(store.with_existing(id, now, |tx| tx.mark_verified(Duration::ZERO)), Err(TwinPIRError::InvalidTransactionState(_))));

        store.with_existing(id, now, |tx| tx.receive_answer(vector(8), Duration::ZERO)).expect("Answer must be accepted");
        store
            .with_existing(id, now, |tx| {
                let (secret_vec_s, answer_vec) = tx.halves()?;
                assert_eq!((secret_vec_s.num_cols(), answer_vec.num_cols()), (4, 8));

                tx.mark_decrypted(vec![vec![1, 2, 3]], Duration::from_millis(1), Duration::from_millis(2))
            })
            .expect("Transaction must be decrypted");

        assert_eq!(store.state_of(id), Some(TransactionState::Decrypted));
        assert!(matches!(store.with_existing(id, now, |tx| tx.halves().map(|_| ())), Err(TwinPIRError::InvalidTransactionState(_))));
        assert!(matches!(store.with_existing(id, now, |tx| tx.receive_answer(vector(8), Duration::ZERO)), Err(TwinPIRError::InvalidTransactionState(_))));

        let metrics = store
            .with_existing(id, now, |tx| {
                tx.mark_verified(Duration::from_millis(3))?;
                Ok(tx.metrics())
            })
            .expect("Transaction must be verified");

        assert_eq!(metrics.decryption_time, Duration::from_millis(1));
        assert_eq!(metrics.bloom_gen_time, Duration::from_millis(2));
        assert_eq!(metrics.oprf_eval_time, Duration::from_millis(3));
        assert_eq!(store.state_of(id), Some(TransactionState::Verified));
    }

    #[test]
    fn idle_transactions_are_evicted() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let store = TransactionStore::new(Duration::from_secs(60));
        let start = Instant::now();

        let stale = TransactionId::random(&mut rng);
        let fresh = TransactionId::random(&mut rng);

        store.with_or_create(stale, start, |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");
        store.with_or_create(fresh, start + Duration::from_secs(50), |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");

        assert!(store.evict_idle(start + Duration::from_secs(30)).is_empty());
        assert_eq!(store.evict_idle(start + Duration::from_secs(90)), vec![stale]);

        assert_eq!(store.state_of(stale), None);
        assert_eq!(store.state_of(fresh), Some(TransactionState::SecretReceived));
        assert!(store.remove(fresh));
        assert!(store.is_empty());
    }

    #[test]
    fn accepted_half_is_never_lost_to_concurrent_eviction() {
        const NUM_ROUNDS: usize = 2_000;

        let mut rng = ChaCha8Rng::from_os_rng();
        let store = TransactionStore::new(Duration::from_secs(10));
        let start = Instant::now();

        for _ in 0..NUM_ROUNDS {
            let id = TransactionId::random(&mut rng);
            store.with_or_create(id, start, |tx| tx.receive_answer(vector(8), Duration::ZERO)).expect("Answer must be accepted");

            let barrier = Barrier::new(2);
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    store.evict_idle(start + Duration::from_secs(15));
                });
                scope.spawn(|| {
                    barrier.wait();
                    store
                        .with_or_create(id, start + Duration::from_secs(20), |tx| tx.receive_secret(vector(4)))
                        .expect("Secret must be accepted");
                });
            });

            // Either the secret joined the stale answer, or the answer got evicted first and the secret opened a new transaction.
            assert!(matches!(store.state_of(id), Some(TransactionState::BothReceived | TransactionState::SecretReceived)));
            assert!(store.remove(id));
        }
    }

    #[test]
    fn distinct_transactions_proceed_concurrently() {
        const NUM_THREADS: usize = 8;
        const NUM_TRANSACTIONS_PER_THREAD: usize = 64;

        let store = Arc::new(TransactionStore::new(Duration::from_secs(60)));

        let handles = (0..NUM_THREADS)
            .map(|_| {
                let store = store.clone();

                std::thread::spawn(move || {
                    let mut rng = ChaCha8Rng::from_os_rng();

                    for _ in 0..NUM_TRANSACTIONS_PER_THREAD {
                        let id = TransactionId::random(&mut rng);
                        let now = Instant::now();

                        store.with_or_create(id, now, |tx| tx.receive_answer(vector(8), Duration::ZERO)).expect("Answer must be accepted");
                        store.with_or_create(id, now, |tx| tx.receive_secret(vector(4))).expect("Secret must be accepted");
                        assert_eq!(store.state_of(id), Some(TransactionState::BothReceived));
                    }
                })
            })
            .collect::<Vec<_>>();

        handles.into_iter().for_each(|handle| handle.join().expect("Thread must not panic"));
        assert_eq!(store.len(), NUM_THREADS * NUM_TRANSACTIONS_PER_THREAD);
    }
}
