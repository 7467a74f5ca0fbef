// This program demonstrates a private membership lookup, over a toy database of password digests.
// It uses the `twin_pir` crate, wiring the client and both servers together in a single process.
// The program hashes a few thousand toy passwords, sets up the answering server, the verifying server and a client,
// then checks membership of a handful of passwords, some in the database and some not, printing each outcome.
// Set `RUST_LOG=debug` to follow every transaction step.

use rand::prelude::*;
use sha2::{Digest, Sha256};
use std::time::Instant;
use twin_pir::{
    ErrorKind, ProtocolParams, RistrettoGroup, SEED_BYTE_LEN, TwinPIRError, answering_server::AnsweringServer, client::Client,
    verifying_server::VerifyingServer,
};

/// Computes the 32 -bytes digest of a password, the form in which it is stored in the database.
fn password_digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// Generates a toy database of digests of passwords `password0`, `password1`, ...
fn make_toy_password_db() -> Vec<[u8; 32]> {
    const NUM_DB_ENTRIES: usize = 1usize << 14;

    (0..NUM_DB_ENTRIES).map(|idx| password_digest(&format!("password{}", idx))).collect()
}

/// Runs one full membership test, passing every message between roles as bytes.
fn is_member(client: &mut Client<RistrettoGroup>, answering: &AnsweringServer, verifying: &VerifyingServer<RistrettoGroup>, digest: &[u8]) -> Result<bool, TwinPIRError> {
    let prepared = client.query(digest)?;
    let id = prepared.id();
    let (secret, query) = prepared.split();

    // `secret` only ever goes to the verifying server, `query` only ever goes to the answering server.
    verifying.receive_secret(twin_pir::SecretHalf::from_bytes(&secret.to_bytes())?)?;
    let answer = answering.respond(&twin_pir::QueryHalf::from_bytes(&query.to_bytes())?)?;
    verifying.receive_answer(twin_pir::AnswerHalf::from_bytes(&answer.to_bytes())?)?;

    let bloom_filter_bytes = verifying.prepare_verification(id)?;
    let blinded = client.blind(id, digest)?;
    let response = verifying.evaluate_blinded(id, &blinded)?;

    client.verify(id, &response.evaluated, &bloom_filter_bytes)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let params = ProtocolParams::default();
    let db = make_toy_password_db();

    // Sample seed for producing public LWE matrix A.
    let mut seed = [0u8; SEED_BYTE_LEN];
    rand::rng().fill_bytes(&mut seed);

    // Setup answering server over the digest database. Hint goes to the verifying server, directory goes to clients.
    let (answering, artifacts) = AnsweringServer::setup(&params, &seed, &db).expect("Answering server setup failed");
    let verifying = VerifyingServer::setup(&params, RistrettoGroup, &artifacts.hint_bytes, &artifacts.db_params_bytes).expect("Verifying server setup failed");
    let mut client = Client::setup(&params, RistrettoGroup, &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes).expect("Client setup failed");

    let passwords = ["password0", "password42", "password16383", "password16384", "hunter2", "correct horse battery staple"];

    for password in passwords {
        let digest = password_digest(password);

        let begin = Instant::now();
        let outcome = is_member(&mut client, &answering, &verifying, &digest);
        let elapsed = begin.elapsed();

        match outcome {
            Ok(true) => println!("✅ '{}' is in the database, found in {:?}", password, elapsed),
            Ok(false) => println!("❎ '{}' is not in the database, checked in {:?}", password, elapsed),
            Err(err) if err.kind() == ErrorKind::Lookup => println!("❎ '{}' is not in the database, no row with its prefix, checked in {:?}", password, elapsed),
            Err(err) => println!("⛔ Membership test of '{}' is inconclusive: {}", password, err),
        }
    }

    verifying.evict_idle_transactions();
}
