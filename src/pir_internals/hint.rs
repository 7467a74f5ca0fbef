use super::{branch_opt_util, database::DbParams, database::EncodedDatabase, error::TwinPIRError, matrix::Matrix, params::SEED_BYTE_LEN};
use tracing::info;

/// Derives public matrix A, of dimension `lwe_dimension x num_rows`, from the seed, and computes hint matrix H = A * D,
/// of dimension `lwe_dimension x num_cols`.
///
/// This is the dominant cost of setup. For a fixed seed and a fixed encoded database, the resulting pair is always the same.
///
/// # Arguments
///
/// * `db` - Encoded database, holding the transpose of D.
/// * `lwe_dimension` - Number of rows of A.
/// * `seed` - Seed of A, shared with the client.
/// * `chunk_num_cols` - Number of columns of H computed per block.
///
/// # Returns
///
/// * `Result<(Matrix, Matrix), TwinPIRError>` - (A, H) pair.
pub fn precompute_hint(db: &EncodedDatabase, lwe_dimension: u32, seed: &[u8; SEED_BYTE_LEN], chunk_num_cols: usize) -> Result<(Matrix, Matrix), TwinPIRError> {
    let pub_mat_a = Matrix::generate_from_seed(lwe_dimension, db.db_params.num_rows, seed)?;
    let hint_mat_h = pub_mat_a.mul_transposed_chunked(&db.transposed_mat_d, chunk_num_cols)?;

    info!(
        lwe_dimension,
        num_rows = db.db_params.num_rows,
        num_cols = db.db_params.num_cols,
        "Precomputed hint matrix of {} x {}",
        hint_mat_h.num_rows(),
        hint_mat_h.num_cols()
    );

    Ok((pub_mat_a, hint_mat_h))
}

/// Deserializes hint matrix H and checks that its shape matches the LWE dimension and the database it was computed over.
pub fn hint_from_bytes(bytes: &[u8], lwe_dimension: u32, db_params: &DbParams) -> Result<Matrix, TwinPIRError> {
    let hint_mat_h = Matrix::from_bytes(bytes).map_err(|_| TwinPIRError::InvalidHintMatrix)?;

    if branch_opt_util::likely(hint_mat_h.num_rows() == lwe_dimension && hint_mat_h.num_cols() == db_params.num_cols) {
        Ok(hint_mat_h)
    } else {
        Err(TwinPIRError::InvalidHintMatrix)
    }
}
