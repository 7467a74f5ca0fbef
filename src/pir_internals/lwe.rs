use super::{
    branch_opt_util,
    database::DbParams,
    error::TwinPIRError,
    matrix::Matrix,
    params::{PLAINTEXT_MODULUS, ProtocolParams, SCALING_FACTOR},
};
use rand::prelude::*;
use rayon::prelude::*;

/// Generates a query for row `target_row` of the encoded database.
///
/// Samples a uniform secret `s` of length `lwe_dimension` and a sparse noise vector `e` of length `num_rows`, then computes
/// `qu = s * A + e + Δ * u`, where `u` is the one-hot selector of `target_row`. Note, `s` and `qu` must never be sent to the
/// same party.
///
/// # Arguments
///
/// * `target_row` - Row to retrieve, must be < number of rows of the database.
/// * `transposed_pub_mat_a` - Transpose of public matrix A, i.e. `num_rows x lwe_dimension`.
/// * `params` - Protocol parameters.
/// * `rng` - Source of randomness for `s` and `e`.
///
/// # Returns
///
/// * `Result<(Matrix, Matrix), TwinPIRError>` - The pair (`s`, `qu`), both as row vectors.
pub fn generate_query<R: RngCore + ?Sized>(
    target_row: u32,
    transposed_pub_mat_a: &Matrix,
    params: &ProtocolParams,
    rng: &mut R,
) -> Result<(Matrix, Matrix), TwinPIRError> {
    let num_rows = transposed_pub_mat_a.num_rows();

    if branch_opt_util::unlikely(transposed_pub_mat_a.num_cols() != params.lwe_dimension) {
        return Err(TwinPIRError::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication);
    }
    if branch_opt_util::unlikely(target_row >= num_rows) {
        return Err(TwinPIRError::InvalidDimensionForVector);
    }

    let secret_vec_s = Matrix::sample_uniform_vector(params.lwe_dimension, rng)?;
    let noise_vec_e = Matrix::sample_sparse_noise_vector(num_rows, params.effective_hamming_weight(num_rows), params.noise_max_magnitude, rng)?;

    let s_x_a = secret_vec_s.mul_transposed_chunked(transposed_pub_mat_a, params.chunk_num_cols)?;
    let mut query_vec_qu = (&s_x_a + &noise_vec_e)?;

    let selected = &mut query_vec_qu[(0, target_row as usize)];
    *selected = selected.wrapping_add(SCALING_FACTOR);

    Ok((secret_vec_s, query_vec_qu))
}

/// Computes the answer `qu * D`, without learning anything about the selected row.
///
/// # Arguments
///
/// * `query_vec_qu` - Query row vector, one element per row of the encoded database.
/// * `transposed_mat_d` - Transpose of the encoded database matrix D.
/// * `chunk_num_cols` - Number of answer elements computed per block.
pub fn compute_answer(query_vec_qu: &Matrix, transposed_mat_d: &Matrix, chunk_num_cols: usize) -> Result<Matrix, TwinPIRError> {
    if branch_opt_util::unlikely(!query_vec_qu.is_row_vector_of_len(transposed_mat_d.num_cols())) {
        return Err(TwinPIRError::InvalidQueryVector);
    }

    query_vec_qu.mul_transposed_chunked(transposed_mat_d, chunk_num_cols)
}

/// Decrypts the answer into the plaintext row selected by the query, one byte per column.
///
/// Computes `ans - s * H`, maps every element into the centered range, and rounds it to the nearest multiple of Δ. For a
/// well-formed transaction, what remains after rounding is exactly `e * D`, so the residual of each column is checked against
/// the noise bound. A residual exceeding it means the secret, the answer and the hint don't belong together, or noise overflowed.
///
/// # Arguments
///
/// * `secret_vec_s` - Secret row vector, received from the client.
/// * `answer_vec` - Answer row vector, received from the answering server.
/// * `transposed_hint_h` - Transpose of hint matrix H, i.e. `num_cols x lwe_dimension`.
/// * `db_params` - Shape of the encoded database.
/// * `params` - Protocol parameters.
///
/// # Returns
///
/// * `Result<Vec<u8>, TwinPIRError>` - Recovered row, of `num_cols` bytes.
pub fn decrypt_row(secret_vec_s: &Matrix, answer_vec: &Matrix, transposed_hint_h: &Matrix, db_params: &DbParams, params: &ProtocolParams) -> Result<Vec<u8>, TwinPIRError> {
    if branch_opt_util::unlikely(!secret_vec_s.is_row_vector_of_len(params.lwe_dimension)) {
        return Err(TwinPIRError::InvalidSecretVector);
    }
    if branch_opt_util::unlikely(!answer_vec.is_row_vector_of_len(db_params.num_cols)) {
        return Err(TwinPIRError::InvalidAnswerVector);
    }
    if branch_opt_util::unlikely(!(transposed_hint_h.num_rows() == db_params.num_cols && transposed_hint_h.num_cols() == params.lwe_dimension)) {
        return Err(TwinPIRError::InvalidHintMatrix);
    }

    let s_x_h = secret_vec_s.mul_transposed_chunked(transposed_hint_h, params.chunk_num_cols)?;

    let scaling_factor = SCALING_FACTOR as i64;
    let noise_bound = params.noise_bound(db_params.num_rows) as i64;

    answer_vec
        .elems()
        .par_iter()
        .zip(s_x_h.elems().par_iter())
        .enumerate()
        .map(|(column, (&ans, &s_h))| {
            let centered = ans.wrapping_sub(s_h) as i32 as i64;

            let rounded = (centered + scaling_factor / 2).div_euclid(scaling_factor);
            let residual = centered - rounded * scaling_factor;

            if branch_opt_util::unlikely(residual.abs() > noise_bound) {
                return Err(TwinPIRError::DecryptionIntegrityViolation { column });
            }

            Ok(rounded.rem_euclid(PLAINTEXT_MODULUS as i64) as u8)
        })
        .collect::<Result<Vec<u8>, TwinPIRError>>()
}

#[cfg(test)]
mod test {
    use crate::pir_internals::{
        database::{EncodedDatabase, test::generate_random_digest_database},
        error::TwinPIRError,
        hint::precompute_hint,
        lwe::{compute_answer, decrypt_row, generate_query},
        matrix::Matrix,
        params::{ProtocolParams, SEED_BYTE_LEN},
    };
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    struct Fixture {
        params: ProtocolParams,
        db: EncodedDatabase,
        transposed_pub_mat_a: Matrix,
        transposed_hint_h: Matrix,
    }

    fn setup_fixture(num_digests: usize, lwe_dimension: u32, rng: &mut ChaCha8Rng) -> Fixture {
        let params = ProtocolParams {
            lwe_dimension,
            ..Default::default()
        };

        let digests = generate_random_digest_database(num_digests, params.digest_byte_len, rng);
        let db = EncodedDatabase::encode(&digests, &params, rng).expect("Database must be encoded");

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        let (pub_mat_a, hint_mat_h) = precompute_hint(&db, params.lwe_dimension, &seed, params.chunk_num_cols).expect("Hint must be computed");

        Fixture {
            params,
            db,
            transposed_pub_mat_a: pub_mat_a.transpose(),
            transposed_hint_h: hint_mat_h.transpose(),
        }
    }

    #[test]
    fn decryption_recovers_every_row() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let fixture = setup_fixture(500, 128, &mut rng);

        for target_row in 0..fixture.db.db_params.num_rows {
            let (secret_vec_s, query_vec_qu) = generate_query(target_row, &fixture.transposed_pub_mat_a, &fixture.params, &mut rng).expect("Query must be generated");
            let answer_vec = compute_answer(&query_vec_qu, &fixture.db.transposed_mat_d, fixture.params.chunk_num_cols).expect("Answer must be computed");
            let row = decrypt_row(&secret_vec_s, &answer_vec, &fixture.transposed_hint_h, &fixture.db.db_params, &fixture.params).expect("Row must be decrypted");

            let expected = fixture.db.row(target_row as usize).iter().map(|&elem| elem as u8).collect::<Vec<u8>>();
            assert_eq!(row, expected);
        }
    }

    #[test_case(2; "Default noise magnitude")]
    #[test_case(512; "Largest noise magnitude allowed for default Hamming weight")]
    fn decryption_is_exact_over_many_random_queries(noise_max_magnitude: u32) {
        const NUM_QUERIES: usize = 10_000;

        let mut rng = ChaCha8Rng::from_os_rng();
        let fixture = setup_fixture(256, 32, &mut rng);

        let params = ProtocolParams {
            noise_max_magnitude,
            ..fixture.params.clone()
        };
        assert_eq!(params.validate(), Ok(()));

        let num_rows = fixture.db.db_params.num_rows;
        for _ in 0..NUM_QUERIES {
            let target_row = rng.random_range(0..num_rows);

            let (secret_vec_s, query_vec_qu) = generate_query(target_row, &fixture.transposed_pub_mat_a, &params, &mut rng).expect("Query must be generated");
            let answer_vec = compute_answer(&query_vec_qu, &fixture.db.transposed_mat_d, params.chunk_num_cols).expect("Answer must be computed");
            let row = decrypt_row(&secret_vec_s, &answer_vec, &fixture.transposed_hint_h, &fixture.db.db_params, &params).expect("Row must be decrypted");

            let expected = fixture.db.row(target_row as usize).iter().map(|&elem| elem as u8).collect::<Vec<u8>>();
            assert_eq!(row, expected);
        }
    }

    #[test]
    fn decryption_with_wrong_secret_violates_integrity() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let fixture = setup_fixture(64, 64, &mut rng);

        let (_, query_vec_qu) = generate_query(0, &fixture.transposed_pub_mat_a, &fixture.params, &mut rng).expect("Query must be generated");
        let answer_vec = compute_answer(&query_vec_qu, &fixture.db.transposed_mat_d, fixture.params.chunk_num_cols).expect("Answer must be computed");
        let wrong_secret_vec_s = Matrix::sample_uniform_vector(fixture.params.lwe_dimension, &mut rng).expect("Secret must be sampled");

        let result = decrypt_row(&wrong_secret_vec_s, &answer_vec, &fixture.transposed_hint_h, &fixture.db.db_params, &fixture.params);
        assert!(matches!(result, Err(TwinPIRError::DecryptionIntegrityViolation { .. })));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let fixture = setup_fixture(32, 64, &mut rng);

        let (secret_vec_s, query_vec_qu) = generate_query(0, &fixture.transposed_pub_mat_a, &fixture.params, &mut rng).expect("Query must be generated");
        let answer_vec = compute_answer(&query_vec_qu, &fixture.db.transposed_mat_d, fixture.params.chunk_num_cols).expect("Answer must be computed");
        let num_cols = fixture.db.db_params.num_cols;

        assert_eq!(
            generate_query(fixture.db.db_params.num_rows, &fixture.transposed_pub_mat_a, &fixture.params, &mut rng),
            Err(TwinPIRError::InvalidDimensionForVector)
        );
        assert_eq!(
            compute_answer(&secret_vec_s, &fixture.db.transposed_mat_d, fixture.params.chunk_num_cols),
            Err(TwinPIRError::InvalidQueryVector)
        );
        assert_eq!(
            decrypt_row(&query_vec_qu, &answer_vec, &fixture.transposed_hint_h, &fixture.db.db_params, &fixture.params),
            Err(TwinPIRError::InvalidSecretVector)
        );
        assert_eq!(
            decrypt_row(&secret_vec_s, &Matrix::new(1, num_cols + 1).expect("Vector must be created"), &fixture.transposed_hint_h, &fixture.db.db_params, &fixture.params),
            Err(TwinPIRError::InvalidAnswerVector)
        );
        assert_eq!(
            decrypt_row(
                &secret_vec_s,
                &answer_vec,
                &Matrix::new(num_cols + 1, fixture.params.lwe_dimension).expect("Matrix must be created"),
                &fixture.db.db_params,
                &fixture.params
            ),
            Err(TwinPIRError::InvalidHintMatrix)
        );
    }
}
