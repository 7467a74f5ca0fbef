use divan;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use twin_pir::{
    ProtocolParams, RistrettoGroup, SEED_BYTE_LEN,
    answering_server::{AnsweringServer, SetupArtifacts},
    client::Client,
    verifying_server::VerifyingServer,
};

fn main() {
    divan::main();
}

fn generate_random_digest_database(rng: &mut ChaCha8Rng, num_digests: usize, digest_byte_len: usize) -> Vec<Vec<u8>> {
    assert!(digest_byte_len > 0);

    (0..num_digests)
        .map(|_| {
            let mut digest = vec![0u8; digest_byte_len];
            rng.fill_bytes(&mut digest);

            digest
        })
        .collect()
}

#[derive(Debug)]
struct DBConfig {
    db_entry_count: usize,
    lwe_dimension: u32,
}

const ARGS: &[DBConfig] = &[
    DBConfig {
        db_entry_count: 1usize << 12,
        lwe_dimension: 1024,
    },
    DBConfig {
        db_entry_count: 1usize << 14,
        lwe_dimension: 1024,
    },
];

struct Deployment {
    digests: Vec<Vec<u8>>,
    answering: AnsweringServer,
    verifying: VerifyingServer<RistrettoGroup>,
    client: Client<RistrettoGroup>,
}

fn deploy(db_config: &DBConfig) -> Deployment {
    let mut rng = ChaCha8Rng::from_os_rng();
    let params = ProtocolParams {
        lwe_dimension: db_config.lwe_dimension,
        ..Default::default()
    };

    let digests = generate_random_digest_database(&mut rng, db_config.db_entry_count, params.digest_byte_len);

    let mut seed = [0u8; SEED_BYTE_LEN];
    rng.fill_bytes(&mut seed);

    let (answering, artifacts): (AnsweringServer, SetupArtifacts) = AnsweringServer::setup(&params, &seed, &digests).unwrap();
    let verifying = VerifyingServer::setup(&params, RistrettoGroup, &artifacts.hint_bytes, &artifacts.db_params_bytes).unwrap();
    let client = Client::setup(&params, RistrettoGroup, &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes).unwrap();

    Deployment {
        digests,
        answering,
        verifying,
        client,
    }
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(100), skip_ext_time = true)]
fn client_query(bencher: divan::Bencher, db_config: &DBConfig) {
    let Deployment { digests, mut client, .. } = deploy(db_config);
    let digest = digests.last().unwrap();

    bencher.bench_local(|| divan::black_box(&mut client).query(divan::black_box(digest)));
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(100), skip_ext_time = true)]
fn answering_server_respond(bencher: divan::Bencher, db_config: &DBConfig) {
    let Deployment {
        digests, answering, mut client, ..
    } = deploy(db_config);

    let (_, query) = client.query(digests.last().unwrap()).unwrap().split();

    bencher.bench(|| divan::black_box(&answering).respond(divan::black_box(&query)));
}

#[divan::bench(args = ARGS, max_time = Duration::from_secs(100), skip_ext_time = true)]
fn verifying_server_prepare_verification(bencher: divan::Bencher, db_config: &DBConfig) {
    let Deployment {
        digests,
        answering,
        verifying,
        mut client,
    } = deploy(db_config);
    let digest = digests.last().unwrap();

    // Every iteration closes a transaction, so each one gets a fresh one, with both halves already delivered.
    bencher
        .with_inputs(|| {
            let prepared = client.query(digest).unwrap();
            let id = prepared.id();
            let (secret, query) = prepared.split();

            verifying.receive_secret(secret).unwrap();
            verifying.receive_answer(answering.respond(&query).unwrap()).unwrap();

            id
        })
        .bench_local_values(|id| divan::black_box(&verifying).prepare_verification(divan::black_box(id)));
}
