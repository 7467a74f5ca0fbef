#![cfg(test)]

use crate::{
    ErrorKind, ModularGroup, OprfGroup, ProtocolParams, RistrettoGroup, SEED_BYTE_LEN, TransactionState, TwinPIRError,
    answering_server::{AnsweringServer, SetupArtifacts},
    client::Client,
    pir_internals::database::test::{generate_digest_with_prefix, generate_random_digest_database},
    verifying_server::VerifyingServer,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};
use test_case::test_case;

/// Small LWE dimension keeps end-to-end tests fast, it has no effect on correctness.
const TEST_LWE_DIMENSION: u32 = 128;

fn test_params() -> ProtocolParams {
    ProtocolParams {
        lwe_dimension: TEST_LWE_DIMENSION,
        ..Default::default()
    }
}

struct Deployment<G: OprfGroup> {
    answering: AnsweringServer,
    verifying: VerifyingServer<G>,
    client: Client<G>,
    artifacts: SetupArtifacts,
}

fn deploy<G: OprfGroup + Clone, T: AsRef<[u8]>>(params: &ProtocolParams, group: G, digests: &[T]) -> Deployment<G> {
    let mut rng = ChaCha8Rng::from_os_rng();

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);

    let (answering, artifacts) = AnsweringServer::setup(params, &seed, digests).expect("Answering server setup failed");
    let verifying = VerifyingServer::setup(params, group.clone(), &artifacts.hint_bytes, &artifacts.db_params_bytes).expect("Verifying server setup failed");
    let client = Client::setup(params, group, &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes).expect("Client setup failed");

    Deployment {
        answering,
        verifying,
        client,
        artifacts,
    }
}

/// Runs one full membership test. Query halves and the answer cross the wire in serialized form.
fn is_member<G: OprfGroup>(deployment: &mut Deployment<G>, digest: &[u8]) -> Result<bool, TwinPIRError> {
    let prepared = deployment.client.query(digest)?;
    let id = prepared.id();
    let (secret, query) = prepared.split();

    let secret = crate::SecretHalf::from_bytes(&secret.to_bytes())?;
    let query = crate::QueryHalf::from_bytes(&query.to_bytes())?;

    deployment.verifying.receive_secret(secret)?;
    let answer = deployment.answering.respond(&query)?;
    deployment.verifying.receive_answer(crate::AnswerHalf::from_bytes(&answer.to_bytes())?)?;

    let bloom_filter_bytes = deployment.verifying.prepare_verification(id)?;
    let blinded = deployment.client.blind(id, digest)?;
    let response = deployment.verifying.evaluate_blinded(id, &blinded)?;

    deployment.client.verify(id, &response.evaluated, &bloom_filter_bytes)
}

#[test_case(1; "Single digest")]
#[test_case(100; "Sparse prefixes")]
#[test_case(1 << 12; "Some prefixes shared by many digests")]
fn every_digest_in_database_is_found(num_digests: usize) {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(num_digests, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    // Checking every digest of a large database takes long, a random sample of them is enough.
    let sampled = digests.choose_multiple(&mut rng, 64).collect::<Vec<_>>();
    for digest in sampled {
        assert_eq!(is_member(&mut deployment, digest), Ok(true));
    }

    assert_eq!(deployment.verifying.num_open_transactions(), 0);
}

#[test]
fn every_digest_is_recovered_from_its_row() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(1 << 10, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, RistrettoGroup, &digests);

    for digest in &digests {
        let prepared = deployment.client.query(digest).expect("Query must be generated");
        let id = prepared.id();
        let (secret, query) = prepared.split();

        deployment.verifying.receive_secret(secret).expect("Secret must be accepted");
        deployment
            .verifying
            .receive_answer(deployment.answering.respond(&query).expect("Answer must be computed"))
            .expect("Answer must be accepted");
        deployment.verifying.prepare_verification(id).expect("Row must be decrypted");

        let candidates = deployment.verifying.recovered_candidates(id).expect("Candidates must be available");
        assert!(candidates.contains(digest));
    }
}

#[test]
fn digest_with_unknown_prefix_is_absent_without_querying() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = (0..16)
        .map(|i| generate_digest_with_prefix(&[0x00, i as u8], params.digest_byte_len, &mut rng))
        .collect::<Vec<_>>();
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    let absent = generate_digest_with_prefix(&[0xff, 0xff], params.digest_byte_len, &mut rng);
    let result = deployment.client.query(&absent);

    assert_eq!(result.as_ref().map_err(TwinPIRError::kind).err(), Some(ErrorKind::Lookup));
    assert_eq!(deployment.client.lookup_row(&absent), Err(TwinPIRError::PrefixNotFoundInDirectory));
    assert_eq!(deployment.verifying.num_open_transactions(), 0);
}

fn shared_prefix_scenario<G: OprfGroup + Clone>(group: G) {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let present = generate_digest_with_prefix(&[0xaa, 0xbb], params.digest_byte_len, &mut rng);
    let absent = loop {
        let candidate = generate_digest_with_prefix(&[0xaa, 0xbb], params.digest_byte_len, &mut rng);
        if group.hash_to_element(&candidate) != group.hash_to_element(&present) {
            break candidate;
        }
    };

    let mut deployment = deploy(&params, group, &[present.clone()]);
    assert_eq!(deployment.client.db_params().num_rows, 1);
    assert_eq!(deployment.client.lookup_row(&present), Ok(0));
    assert_eq!(deployment.client.lookup_row(&absent), Ok(0));

    assert_eq!(is_member(&mut deployment, &present), Ok(true));

    // Absent digest lands in the very same row, which still decrypts to the present digest only.
    let prepared = deployment.client.query(&absent).expect("Query must be generated");
    let id = prepared.id();
    let (secret, query) = prepared.split();

    deployment
        .verifying
        .receive_answer(deployment.answering.respond(&query).expect("Answer must be computed"))
        .expect("Answer must be accepted");
    deployment.verifying.receive_secret(secret).expect("Secret must be accepted");

    let bloom_filter_bytes = deployment.verifying.prepare_verification(id).expect("Row must be decrypted");
    assert_eq!(deployment.verifying.recovered_candidates(id), Ok(vec![present.clone()]));

    let blinded = deployment.client.blind(id, &absent).expect("Blinding must succeed");
    let response = deployment.verifying.evaluate_blinded(id, &blinded).expect("OPRF evaluation must succeed");

    assert_eq!(deployment.client.verify(id, &response.evaluated, &bloom_filter_bytes), Ok(false));
}

#[test]
fn digest_sharing_prefix_with_member_is_reported_absent_over_modular_group() {
    shared_prefix_scenario(ModularGroup::default());
}

#[test]
fn digest_sharing_prefix_with_member_is_reported_absent_over_ristretto_group() {
    shared_prefix_scenario(RistrettoGroup);
}

#[test]
fn query_halves_may_arrive_in_any_order() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(32, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, RistrettoGroup, &digests);

    let prepared = deployment.client.query(&digests[0]).expect("Query must be generated");
    let id = prepared.id();
    let (secret, query) = prepared.split();
    let answer = deployment.answering.respond(&query).expect("Answer must be computed");

    // Nothing can be decrypted before both halves are in, and that is worth retrying even when neither half arrived yet.
    let nothing_received = deployment.verifying.prepare_verification(id);
    assert_eq!(nothing_received, Err(TwinPIRError::IncompleteTransaction));
    assert_eq!(nothing_received.map_err(|err| err.kind()).err(), Some(ErrorKind::IncompleteTransaction));
    assert_eq!(deployment.verifying.transaction_state(id), None);

    deployment.verifying.receive_answer(answer.clone()).expect("Answer must be accepted");
    assert_eq!(deployment.verifying.transaction_state(id), Some(TransactionState::AnswerReceived));

    let incomplete = deployment.verifying.prepare_verification(id);
    assert_eq!(incomplete, Err(TwinPIRError::IncompleteTransaction));
    assert_eq!(incomplete.map_err(|err| err.kind()).err(), Some(ErrorKind::IncompleteTransaction));
    assert_eq!(deployment.verifying.transaction_state(id), Some(TransactionState::AnswerReceived));

    assert!(matches!(deployment.verifying.receive_answer(answer), Err(TwinPIRError::InvalidTransactionState(_))));

    deployment.verifying.receive_secret(secret).expect("Secret must be accepted");
    assert_eq!(deployment.verifying.transaction_state(id), Some(TransactionState::BothReceived));

    let bloom_filter_bytes = deployment.verifying.prepare_verification(id).expect("Row must be decrypted");
    assert_eq!(deployment.verifying.transaction_state(id), Some(TransactionState::Decrypted));
    assert!(matches!(deployment.verifying.prepare_verification(id), Err(TwinPIRError::InvalidTransactionState(_))));

    let blinded = deployment.client.blind(id, &digests[0]).expect("Blinding must succeed");
    let response = deployment.verifying.evaluate_blinded(id, &blinded).expect("OPRF evaluation must succeed");

    assert_eq!(deployment.verifying.transaction_state(id), None);
    assert!(response.metrics.decryption_time > Duration::ZERO || response.metrics.bloom_gen_time > Duration::ZERO);
    assert_eq!(deployment.client.verify(id, &response.evaluated, &bloom_filter_bytes), Ok(true));
}

#[test]
fn tampered_answer_closes_transaction() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(64, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    // Secret of one transaction, paired with the answer to another one.
    let first = deployment.client.query(&digests[0]).expect("Query must be generated");
    let second = deployment.client.query(&digests[1]).expect("Query must be generated");
    let id = first.id();

    let (secret, _) = first.split();
    let (_, other_query) = second.split();
    let mut answer_bytes = deployment.answering.respond(&other_query).expect("Answer must be computed").to_bytes();
    answer_bytes[..id.as_bytes().len()].copy_from_slice(id.as_bytes());

    deployment.verifying.receive_secret(secret).expect("Secret must be accepted");
    deployment
        .verifying
        .receive_answer(crate::AnswerHalf::from_bytes(&answer_bytes).expect("Answer must be deserialized"))
        .expect("Answer must be accepted");

    let result = deployment.verifying.prepare_verification(id);
    assert_eq!(result.map_err(|err| err.kind()).err(), Some(ErrorKind::DecryptionIntegrity));
    assert_eq!(deployment.verifying.transaction_state(id), None);
}

#[test]
fn malformed_query_halves_are_rejected() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(64, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    let prepared = deployment.client.query(&digests[0]).expect("Query must be generated");
    let (secret, query) = prepared.split();

    // Secret vector presented as a query vector, and the other way around, have wrong lengths.
    let secret_as_query = crate::QueryHalf::from_bytes(&secret.to_bytes()).expect("Vector must be deserialized");
    let query_as_secret = crate::SecretHalf::from_bytes(&query.to_bytes()).expect("Vector must be deserialized");

    assert_eq!(deployment.answering.respond(&secret_as_query).map(|_| ()), Err(TwinPIRError::InvalidQueryVector));
    assert_eq!(deployment.verifying.receive_secret(query_as_secret), Err(TwinPIRError::InvalidSecretVector));
    assert_eq!(deployment.verifying.num_open_transactions(), 0);
}

#[test]
fn client_pending_verification_state_is_per_transaction() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(16, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, RistrettoGroup, &digests);

    let id = deployment.client.query(&digests[0]).expect("Query must be generated").id();

    assert_eq!(deployment.client.verify(id, &[0u8; 32], &[]), Err(TwinPIRError::PendingQueryDoesNotExistForTransaction));

    deployment.client.blind(id, &digests[0]).expect("Blinding must succeed");
    assert!(deployment.client.has_pending_verification(id));
    assert_eq!(deployment.client.blind(id, &digests[0]), Err(TwinPIRError::PendingQueryExistsForTransaction));

    // Pending state is consumed even if verification fails.
    assert_eq!(deployment.client.verify(id, &[0xffu8; 7], &[]), Err(TwinPIRError::InvalidOprfElement));
    assert!(!deployment.client.has_pending_verification(id));
}

#[test]
fn abandoned_transactions_leave_no_pending_state() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(16, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    let ids = digests
        .iter()
        .take(4)
        .map(|digest| {
            let id = deployment.client.query(digest).expect("Query must be generated").id();
            deployment.client.blind(id, digest).expect("Blinding must succeed");

            id
        })
        .collect::<Vec<_>>();
    assert_eq!(deployment.client.num_pending_verifications(), ids.len());

    assert!(ids.iter().all(|&id| deployment.client.abandon(id)));
    assert!(!deployment.client.abandon(ids[0]));
    assert_eq!(deployment.client.num_pending_verifications(), 0);

    // Abandoned transaction can't be verified anymore, but its digest can be blinded again.
    assert_eq!(deployment.client.verify(ids[0], &[0u8; 8], &[]), Err(TwinPIRError::PendingQueryDoesNotExistForTransaction));
    assert!(deployment.client.blind(ids[0], &digests[0]).is_ok());
}

#[test]
fn idle_transactions_are_evicted() {
    let params = ProtocolParams {
        transaction_idle_timeout: Duration::from_secs(60),
        ..test_params()
    };
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(16, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, ModularGroup::default(), &digests);

    let ids = digests
        .iter()
        .take(4)
        .map(|digest| {
            let prepared = deployment.client.query(digest).expect("Query must be generated");
            let id = prepared.id();
            deployment.verifying.receive_secret(prepared.split().0).expect("Secret must be accepted");

            id
        })
        .collect::<Vec<_>>();

    assert_eq!(deployment.verifying.num_open_transactions(), ids.len());
    assert_eq!(deployment.verifying.evict_idle_transactions(), 0);

    let later = Instant::now() + Duration::from_secs(61);
    assert_eq!(deployment.verifying.evict_idle_transactions_at(later), ids.len());

    assert_eq!(deployment.verifying.num_open_transactions(), 0);
    assert!(ids.iter().all(|&id| deployment.verifying.transaction_state(id).is_none()));
}

#[test]
fn concurrent_transactions_are_served_independently() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(256, params.digest_byte_len, &mut rng);
    let mut deployment = deploy(&params, RistrettoGroup, &digests);

    let prepared = digests.iter().take(16).map(|digest| deployment.client.query(digest).expect("Query must be generated")).collect::<Vec<_>>();
    let ids = prepared.iter().map(|query| query.id()).collect::<Vec<_>>();

    let verifying = &deployment.verifying;
    let answering = &deployment.answering;

    std::thread::scope(|scope| {
        prepared.into_iter().for_each(|query| {
            scope.spawn(move || {
                let (secret, query) = query.split();
                verifying.receive_answer(answering.respond(&query).expect("Answer must be computed")).expect("Answer must be accepted");
                verifying.receive_secret(secret).expect("Secret must be accepted");
                verifying.prepare_verification(query.id()).expect("Row must be decrypted")
            });
        });
    });

    for (id, digest) in ids.into_iter().zip(digests.iter()) {
        assert_eq!(deployment.verifying.transaction_state(id), Some(TransactionState::Decrypted));
        assert!(deployment.verifying.recovered_candidates(id).expect("Candidates must be available").contains(digest));
    }
}

#[test]
fn mismatched_setup_artifacts_are_rejected() {
    let params = test_params();
    let mut rng = ChaCha8Rng::from_os_rng();

    let digests = generate_random_digest_database(64, params.digest_byte_len, &mut rng);
    let deployment = deploy(&params, ModularGroup::default(), &digests);
    let artifacts = &deployment.artifacts;

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);

    let other_lwe_dimension = ProtocolParams {
        lwe_dimension: TEST_LWE_DIMENSION * 2,
        ..params.clone()
    };
    assert_eq!(
        VerifyingServer::setup(&other_lwe_dimension, ModularGroup::default(), &artifacts.hint_bytes, &artifacts.db_params_bytes).map(|_| ()),
        Err(TwinPIRError::InvalidHintMatrix)
    );

    let other_digest_len = ProtocolParams {
        digest_byte_len: params.digest_byte_len + 1,
        ..params.clone()
    };
    assert!(matches!(
        Client::setup(&other_digest_len, ModularGroup::default(), &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes).map(|_| ()),
        Err(TwinPIRError::InvalidProtocolParameter(_))
    ));

    assert_eq!(
        Client::setup(&params, ModularGroup::default(), &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes[..4]).map(|_| ()),
        Err(TwinPIRError::FailedToDeserializeDirectory)
    );
    assert_eq!(
        Client::setup(&params, ModularGroup::default(), &seed, &artifacts.db_params_bytes[1..], &artifacts.directory_bytes).map(|_| ()),
        Err(TwinPIRError::FailedToDeserializeDbParams)
    );
}

#[test]
fn invalid_databases_are_rejected_at_setup() {
    let params = test_params();
    let seed = [0u8; SEED_BYTE_LEN];

    let empty: Vec<Vec<u8>> = vec![];
    assert_eq!(AnsweringServer::setup(&params, &seed, &empty).map(|_| ()), Err(TwinPIRError::EmptyDatabase));

    let short = vec![vec![0xaau8; params.digest_byte_len], vec![0xbbu8; params.digest_byte_len - 1]];
    assert_eq!(
        AnsweringServer::setup(&params, &seed, &short).map(|_| ()),
        Err(TwinPIRError::InconsistentDigestLength {
            expected: params.digest_byte_len,
            found: params.digest_byte_len - 1
        })
    );
}
