//! TwinPIR: A Rust library implementation of a two-server **P**rivate **I**nformation **R**etrieval (PIR) based membership lookup protocol.
//!
//! A client holding a fixed-length digest (say, a password hash) learns whether that digest is present in a server-side database,
//! while neither server learns the digest, nor the row of the database it selects, nor the outcome of the test. It relies on two
//! non-colluding servers:
//!
//! * **Answering server:** Holds the encoded database D, where digests sharing a prefix are grouped into the same row. It answers
//!   LWE query vectors `qu * D`, without learning which row was selected.
//! * **Verifying server:** Holds the hint matrix H = A * D and an OPRF secret key. Given the client's LWE secret `s` and the answering
//!   server's answer, it decrypts the selected row, then lets the client test membership through a Bloom filter over PRF-transformed
//!   row candidates, so the client never sees the raw row either.
//!
//! ## Features
//!
//! * **Oblivious Prefix Directory:** Row index of every prefix is encrypted under a key derived from the prefix itself, so a client
//!   learns row indices of the prefixes it already knows, and nothing else.
//! * **Decryption Integrity Check:** Noise left after decryption is checked against the bound implied by protocol parameters, so
//!   a tampered answer is detected, instead of yielding garbage.
//! * **Pluggable OPRF Group:** Either a toy multiplicative group modulo a small prime, or the Ristretto group, for real deployments.
//! * **Concurrent Transactions:** Verifying server keeps per-transaction state behind fine-grained locks, with idle eviction.
//!
//! ## Usage
//!
//! This crate doesn't provide any transport. It is designed to be used in conjunction with other crates which provide a communication
//! mechanism between the client and both servers. Every message crossing a trust boundary has a byte serialization.
//!
//! Add TwinPIR as dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! twin_pir = "=0.1.0"
//! rand = "=0.9.0"
//! ```
//!
//! Then, you can use it in your code:
//!
//! ```rust
//! use twin_pir::{
//!     answering_server::AnsweringServer, client::Client, verifying_server::VerifyingServer, ProtocolParams, RistrettoGroup, SEED_BYTE_LEN,
//! };
//! use rand::prelude::*;
//!
//! fn main() {
//!     let params = ProtocolParams::default();
//!
//!     // Example database of 32 -bytes digests (replace with your own)
//!     let mut rng = rand::rng();
//!     let digests: Vec<[u8; 32]> = (0..64).map(|_| rng.random()).collect();
//!
//!     // Answering server setup (offline phase)
//!     let mut seed = [0u8; SEED_BYTE_LEN]; // Must be sampled from a cryptographically secure source
//!     rng.fill_bytes(&mut seed);
//!
//!     let (answering, artifacts) = AnsweringServer::setup(&params, &seed, &digests).expect("Answering server setup failed");
//!
//!     // Verifying server and client setup (offline phase)
//!     let verifying = VerifyingServer::setup(&params, RistrettoGroup, &artifacts.hint_bytes, &artifacts.db_params_bytes).expect("Verifying server setup failed");
//!     let mut client = Client::setup(&params, RistrettoGroup, &seed, &artifacts.db_params_bytes, &artifacts.directory_bytes).expect("Client setup failed");
//!
//!     // Client query (online phase). An error from `query` with `ErrorKind::Lookup` means the digest is definitely absent.
//!     let digest = digests[7];
//!     let prepared = client.query(&digest).expect("Prefix must be in directory");
//!     let id = prepared.id();
//!     let (secret, query) = prepared.split();
//!
//!     // `secret` goes to the verifying server, `query` goes to the answering server
//!     verifying.receive_secret(secret).expect("Secret must be accepted");
//!     let answer = answering.respond(&query).expect("Answering server failed to respond");
//!     verifying.receive_answer(answer).expect("Answer must be accepted");
//!
//!     // Verification (online phase)
//!     let bloom_filter = verifying.prepare_verification(id).expect("Decryption must succeed");
//!     let blinded = client.blind(id, &digest).expect("Blinding must succeed");
//!     let response = verifying.evaluate_blinded(id, &blinded).expect("OPRF evaluation must succeed");
//!
//!     let is_present = client.verify(id, &response.evaluated, &bloom_filter).expect("Verification must succeed");
//!     assert!(is_present);
//! }
//! ```
//!
//! ## Modules
//!
//! * `answering_server`: Contains the `AnsweringServer` struct, which encodes the database, precomputes the hint and answers query vectors.
//! * `verifying_server`: Contains the `VerifyingServer` struct, which decrypts answers and serves OPRF-backed Bloom filter verification.
//! * `client`: Contains the `Client` struct, which resolves prefixes, generates queries and verifies membership.

pub use pir_internals::database::DbParams;
pub use pir_internals::error::{ErrorKind, TwinPIRError};
pub use pir_internals::messages::{AnswerHalf, QueryHalf, SecretHalf};
pub use pir_internals::oprf::{ModularGroup, OprfGroup, RistrettoGroup};
pub use pir_internals::params::{ProtocolParams, SEED_BYTE_LEN};
pub use pir_internals::transaction::{TransactionId, TransactionMetrics, TransactionState};

pub mod answering_server;
pub mod client;
pub mod verifying_server;

mod pir_internals;

mod test_pir;
