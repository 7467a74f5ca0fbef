use super::{branch_opt_util, error::TwinPIRError, params::SEED_BYTE_LEN};
use rand::prelude::*;
use rayon::prelude::*;
use std::ops::{Add, Index, IndexMut};
use turboshake::TurboShake128;

#[cfg(test)]
use std::ops::{Mul, Neg};

/// Row-major matrix over Z_q with q = 2^32. All arithmetic is wrapping `u32` arithmetic, so reduction modulo q is implicit.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: u32,
    cols: u32,
    elems: Vec<u32>,
}

#[inline(always)]
fn dot_product(lhs: &[u32], rhs: &[u32]) -> u32 {
    lhs.iter().zip(rhs).fold(0u32, |acc, (&l, &r)| acc.wrapping_add(l.wrapping_mul(r)))
}

impl Matrix {
    /// Creates a new matrix with the given number of rows and columns, s.t. all elements are zero-initialized.
    ///
    /// # Arguments
    ///
    /// * `rows` - The number of rows in the matrix.
    /// * `cols` - The number of columns in the matrix.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - A new matrix if the input is valid (rows and cols are positive).
    ///   Returns an error if either rows or cols is zero.
    pub fn new(rows: u32, cols: u32) -> Result<Matrix, TwinPIRError> {
        if branch_opt_util::likely((rows > 0) && (cols > 0)) {
            Ok(Matrix {
                rows,
                cols,
                elems: vec![0; rows as usize * cols as usize],
            })
        } else {
            Err(TwinPIRError::InvalidMatrixDimension)
        }
    }

    /// Creates a new matrix with the given number of rows and columns, s.t. elements are initialized with the given values.
    ///
    /// # Arguments
    ///
    /// * `rows` - The number of rows in the matrix.
    /// * `cols` - The number of columns in the matrix.
    /// * `values` - The values to initialize the matrix with, in row-major order.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - A new matrix if rows and cols are positive and the number of values matches `rows * cols`.
    pub fn from_values(rows: u32, cols: u32, values: Vec<u32>) -> Result<Matrix, TwinPIRError> {
        if branch_opt_util::likely((rows > 0) && (cols > 0)) {
            if branch_opt_util::likely(rows as usize * cols as usize == values.len()) {
                Ok(Matrix { rows, cols, elems: values })
            } else {
                Err(TwinPIRError::InvalidNumberOfElementsInMatrix)
            }
        } else {
            Err(TwinPIRError::InvalidMatrixDimension)
        }
    }

    #[inline(always)]
    pub const fn num_rows(&self) -> u32 {
        self.rows
    }
    #[inline(always)]
    pub const fn num_cols(&self) -> u32 {
        self.cols
    }
    #[inline(always)]
    pub fn num_elems(&self) -> usize {
        self.elems.len()
    }
    #[inline(always)]
    pub fn elems(&self) -> &[u32] {
        &self.elems
    }
    #[inline(always)]
    pub const fn is_row_vector_of_len(&self, len: u32) -> bool {
        self.rows == 1 && self.cols == len
    }

    /// Returns `ridx`-th row of the matrix as a slice.
    #[inline(always)]
    pub fn row(&self, ridx: usize) -> &[u32] {
        let begin = ridx * self.cols as usize;
        &self.elems[begin..begin + self.cols as usize]
    }

    /// Transposes the matrix.
    ///
    /// # Returns
    ///
    /// * `Matrix` - The transposed matrix.
    pub fn transpose(&self) -> Matrix {
        let mut elems = vec![0u32; self.num_elems()];

        elems.par_chunks_mut(self.rows as usize).enumerate().for_each(|(ridx, res_row)| {
            res_row.iter_mut().enumerate().for_each(|(cidx, v)| {
                *v = self[(cidx, ridx)];
            });
        });

        Matrix {
            rows: self.cols,
            cols: self.rows,
            elems,
        }
    }

    /// Computes `self * rhs`, given `rhs` in its transposed form, processing `chunk_num_cols` columns of the result at a time.
    ///
    /// Keeping `rhs` transposed makes every inner product run over two contiguous slices. Column blocks of the result are
    /// computed in parallel, each one touching only `chunk_num_cols` rows of `transposed_rhs`, so a single row vector times
    /// a wide matrix is parallelized just as well as a full matrix product.
    ///
    /// # Arguments
    ///
    /// * `transposed_rhs` - Transpose of the right-hand side matrix (i.e. NxK, for a KxN right-hand side).
    /// * `chunk_num_cols` - Number of result columns computed per block. Must be non-zero.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - The resulting (rows x N) matrix, or an error if dimensions are incompatible.
    pub fn mul_transposed_chunked(&self, transposed_rhs: &Matrix, chunk_num_cols: usize) -> Result<Matrix, TwinPIRError> {
        if branch_opt_util::unlikely(self.cols != transposed_rhs.cols) {
            return Err(TwinPIRError::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication);
        }
        if branch_opt_util::unlikely(chunk_num_cols == 0) {
            return Err(TwinPIRError::InvalidMatrixDimension);
        }

        let res_num_rows = self.rows;
        let res_num_cols = transposed_rhs.rows;

        // Result is first laid out column-major, so that every column block is one contiguous, independently writable slice.
        let mut transposed_res_elems = vec![0u32; res_num_rows as usize * res_num_cols as usize];

        transposed_res_elems
            .par_chunks_mut(chunk_num_cols.saturating_mul(res_num_rows as usize))
            .enumerate()
            .for_each(|(block_idx, res_block)| {
                let col_begin = block_idx * chunk_num_cols;

                res_block.chunks_exact_mut(res_num_rows as usize).enumerate().for_each(|(off, res_col)| {
                    let rhs_col = transposed_rhs.row(col_begin + off);

                    res_col.iter_mut().enumerate().for_each(|(ridx, v)| {
                        *v = dot_product(self.row(ridx), rhs_col);
                    });
                });
            });

        if res_num_rows == 1 {
            Matrix::from_values(res_num_rows, res_num_cols, transposed_res_elems)
        } else {
            Ok(Matrix::from_values(res_num_cols, res_num_rows, transposed_res_elems)?.transpose())
        }
    }

    /// Generates a matrix with the given dimensions from a SEED_BYTE_LEN -byte seed using TurboSHAKE128 xof.
    /// Same seed always yields the same matrix, on every platform.
    ///
    /// # Arguments
    ///
    /// * `rows` - The number of rows in the matrix.
    /// * `cols` - The number of columns in the matrix.
    /// * `seed` - The SEED_BYTE_LEN -byte seed to use for generation.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - A new matrix if the input is valid (rows and cols are positive).
    pub fn generate_from_seed(rows: u32, cols: u32, seed: &[u8; SEED_BYTE_LEN]) -> Result<Matrix, TwinPIRError> {
        const ELEMS_PER_SQUEEZE: usize = 1024;

        let mut mat = Matrix::new(rows, cols)?;

        let mut hasher = TurboShake128::default();
        hasher.absorb(seed);
        hasher.finalize::<{ TurboShake128::DEFAULT_DOMAIN_SEPARATOR }>();

        let mut buffer = [0u8; ELEMS_PER_SQUEEZE * std::mem::size_of::<u32>()];

        mat.elems.chunks_mut(ELEMS_PER_SQUEEZE).for_each(|chunk| {
            let squeezed = &mut buffer[..chunk.len() * std::mem::size_of::<u32>()];
            hasher.squeeze(squeezed);

            chunk.iter_mut().zip(squeezed.chunks_exact(std::mem::size_of::<u32>())).for_each(|(elem, word)| {
                *elem = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            });
        });

        Ok(mat)
    }

    /// Samples a row vector of length `cols`, with each element uniformly distributed over Z_q.
    pub fn sample_uniform_vector<R: RngCore + ?Sized>(cols: u32, rng: &mut R) -> Result<Matrix, TwinPIRError> {
        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        Matrix::generate_from_seed(1, cols, &seed)
    }

    /// Samples a sparse row vector of length `cols` with exactly `min(hamming_weight, cols)` non-zero entries, at uniformly random
    /// positions. Each non-zero entry is sampled uniformly from {-m, .., -1, 1, .., m}. Note, negative values are represented in
    /// two's complement i.e. -1 is u32::MAX.
    ///
    /// # Arguments
    ///
    /// * `cols` - Length of the row vector.
    /// * `hamming_weight` - Number of non-zero entries.
    /// * `max_magnitude` - Largest absolute value `m` of a non-zero entry. Must be non-zero.
    /// * `rng` - Source of randomness.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - The sampled noise vector.
    pub fn sample_sparse_noise_vector<R: RngCore + ?Sized>(cols: u32, hamming_weight: u32, max_magnitude: u32, rng: &mut R) -> Result<Matrix, TwinPIRError> {
        if branch_opt_util::unlikely(max_magnitude == 0) {
            return Err(TwinPIRError::InvalidProtocolParameter("noise magnitude must be non-zero"));
        }

        let mut vec = Matrix::new(1, cols)?;
        let num_non_zero = hamming_weight.min(cols) as usize;

        for idx in rand::seq::index::sample(rng, cols as usize, num_non_zero) {
            let magnitude = rng.random_range(1..=max_magnitude);
            vec.elems[idx] = if rng.random::<bool>() { magnitude.wrapping_neg() } else { magnitude };
        }

        Ok(vec)
    }

    /// Serializes the matrix as `rows (u32 LE) || cols (u32 LE) || elements (u32 LE, row-major)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * std::mem::size_of::<u32>() + self.num_elems() * std::mem::size_of::<u32>());

        bytes.extend_from_slice(&self.rows.to_le_bytes());
        bytes.extend_from_slice(&self.cols.to_le_bytes());
        self.elems.iter().for_each(|elem| bytes.extend_from_slice(&elem.to_le_bytes()));

        bytes
    }

    /// Deserializes a matrix from bytes produced by `to_bytes`.
    ///
    /// # Returns
    ///
    /// * `Result<Matrix, TwinPIRError>` - Deserialized matrix. Returns an error if the header encodes a zero dimension or if
    ///   number of remaining bytes doesn't match `4 * rows * cols`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Matrix, TwinPIRError> {
        const OFFSET0: usize = 0;
        const OFFSET1: usize = OFFSET0 + std::mem::size_of::<u32>();
        const OFFSET2: usize = OFFSET1 + std::mem::size_of::<u32>();

        if branch_opt_util::unlikely(bytes.len() <= OFFSET2) {
            return Err(TwinPIRError::FailedToDeserializeMatrixFromBytes);
        }

        let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let cols = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let num_elems = rows as usize * cols as usize;

        if branch_opt_util::unlikely(num_elems == 0) {
            return Err(TwinPIRError::FailedToDeserializeMatrixFromBytes);
        }

        let elem_bytes = &bytes[OFFSET2..];
        if branch_opt_util::unlikely(elem_bytes.len() != num_elems * std::mem::size_of::<u32>()) {
            return Err(TwinPIRError::FailedToDeserializeMatrixFromBytes);
        }

        let elems = elem_bytes
            .chunks_exact(std::mem::size_of::<u32>())
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect::<Vec<u32>>();

        Ok(Matrix { rows, cols, elems })
    }

    /// Creates a new identity matrix of requested dimension.
    #[cfg(test)]
    pub fn identity(rows: u32) -> Result<Matrix, TwinPIRError> {
        let mut mat = Matrix::new(rows, rows)?;

        (0..mat.rows as usize).for_each(|idx| {
            mat[(idx, idx)] = 1;
        });

        Ok(mat)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = u32;

    #[inline(always)]
    fn index(&self, index: (usize, usize)) -> &Self::Output {
        let (ridx, cidx) = index;
        &self.elems[ridx * self.cols as usize + cidx]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline(always)]
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let (ridx, cidx) = index;
        &mut self.elems[ridx * self.cols as usize + cidx]
    }
}

#[cfg(test)]
impl Mul for Matrix {
    type Output = Result<Matrix, TwinPIRError>;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        &self * &rhs
    }
}

#[cfg(test)]
impl<'b> Mul<&'b Matrix> for &Matrix {
    type Output = Result<Matrix, TwinPIRError>;

    fn mul(self, rhs: &'b Matrix) -> Self::Output {
        if branch_opt_util::unlikely(self.cols != rhs.rows) {
            return Err(TwinPIRError::IncompatibleDimensionForMatrixMultiplication);
        }

        let mut res_elems = vec![0u32; self.rows as usize * rhs.cols as usize];

        res_elems.par_chunks_mut(rhs.cols as usize).enumerate().for_each(|(r_idx, res_row)| {
            // Accumulating row-wise walks `rhs` sequentially, instead of striding down its columns.
            self.row(r_idx).iter().enumerate().for_each(|(k, &lhs_elem)| {
                res_row.iter_mut().zip(rhs.row(k)).for_each(|(v, &rhs_elem)| {
                    *v = v.wrapping_add(lhs_elem.wrapping_mul(rhs_elem));
                });
            });
        });

        Matrix::from_values(self.rows, rhs.cols, res_elems)
    }
}

impl Add for Matrix {
    type Output = Result<Matrix, TwinPIRError>;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        &self + &rhs
    }
}

impl<'b> Add<&'b Matrix> for &Matrix {
    type Output = Result<Matrix, TwinPIRError>;

    fn add(self, rhs: &'b Matrix) -> Self::Output {
        if branch_opt_util::unlikely(!(self.rows == rhs.rows && self.cols == rhs.cols)) {
            return Err(TwinPIRError::IncompatibleDimensionForMatrixAddition);
        }

        let res_elems = self.elems.par_iter().zip(rhs.elems.par_iter()).map(|(&l, &r)| l.wrapping_add(r)).collect::<Vec<u32>>();

        Matrix::from_values(self.rows, rhs.cols, res_elems)
    }
}

#[cfg(test)]
impl Neg for &Matrix {
    type Output = Result<Matrix, TwinPIRError>;

    fn neg(self) -> Self::Output {
        Matrix::from_values(self.rows, self.cols, self.elems.iter().map(|v| v.wrapping_neg()).collect())
    }
}

#[cfg(test)]
pub mod test {
    use crate::pir_internals::{error::TwinPIRError, matrix::Matrix, params::SEED_BYTE_LEN};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    #[test_case(1024, 1024 => matches Ok(_);  "Non-zero number of rows and columns are valid")]
    #[test_case(0, 1024 => matches Err(TwinPIRError::InvalidMatrixDimension);  "Number of rows must be greater than zero")]
    #[test_case(1024, 0 => matches Err(TwinPIRError::InvalidMatrixDimension);  "Number of columns must be greater than zero")]
    #[test_case(0, 0 => matches Err(TwinPIRError::InvalidMatrixDimension);  "Both number of rows and columns must be greater than zero")]
    fn new_empty_matrix_constructor_api(num_rows: u32, num_cols: u32) -> Result<Matrix, TwinPIRError> {
        Matrix::new(num_rows, num_cols)
    }

    #[test_case(16, 16, vec![0u32; 16 * 16] => matches Ok(_);  "Non-zero number of rows and columns are valid")]
    #[test_case(0, 16, vec![] => matches Err(TwinPIRError::InvalidMatrixDimension);  "Number of rows must be greater than zero")]
    #[test_case(16, 16, vec![0u32; 16 * 16 - 1] => matches Err(TwinPIRError::InvalidNumberOfElementsInMatrix);  "Number of elements must be equal to number of rows times number of columns")]
    fn from_values_matrix_constructor_api(num_rows: u32, num_cols: u32, elems: Vec<u32>) -> Result<Matrix, TwinPIRError> {
        Matrix::from_values(num_rows, num_cols, elems)
    }

    #[test_case((64, 1), (1, 64) => matches Ok(_); "Matrix multiplication should work for valid dimensions")]
    #[test_case((64, 1), (64, 1) => matches Err(TwinPIRError::IncompatibleDimensionForMatrixMultiplication); "Matrix multiplication should not work for incompatible dimensions")]
    fn matrix_multiplication_failures(lhs_mat_dim: (u32, u32), rhs_mat_dim: (u32, u32)) -> Result<Matrix, TwinPIRError> {
        let lhs_mat = Matrix::new(lhs_mat_dim.0, lhs_mat_dim.1)?;
        let rhs_mat = Matrix::new(rhs_mat_dim.0, rhs_mat_dim.1)?;

        lhs_mat * rhs_mat
    }

    #[test_case((64, 1), (64, 1) => matches Ok(_); "Matrix addition should work for valid dimensions")]
    #[test_case((64, 1), (1, 64) => matches Err(TwinPIRError::IncompatibleDimensionForMatrixAddition); "Matrix addition should not work for incompatible dimensions")]
    fn matrix_addition_failures(lhs_mat_dim: (u32, u32), rhs_mat_dim: (u32, u32)) -> Result<Matrix, TwinPIRError> {
        let lhs_mat = Matrix::new(lhs_mat_dim.0, lhs_mat_dim.1)?;
        let rhs_mat = Matrix::new(rhs_mat_dim.0, rhs_mat_dim.1)?;

        lhs_mat + rhs_mat
    }

    #[test]
    fn matrix_multiplication_is_correct() {
        const NUM_ATTEMPT_MATRIX_MULTIPLICATIONS: usize = 20;
        const MIN_MATRIX_DIM: u32 = 1;
        const MAX_MATRIX_DIM: u32 = 256;

        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        for _ in 0..NUM_ATTEMPT_MATRIX_MULTIPLICATIONS {
            let num_rows = rng.random_range(MIN_MATRIX_DIM..=MAX_MATRIX_DIM);
            let num_cols = rng.random_range(MIN_MATRIX_DIM..=MAX_MATRIX_DIM);

            let matrix_a = Matrix::generate_from_seed(num_rows, num_cols, &seed).expect("Matrix must be generated from seed");
            let matrix_i = Matrix::identity(num_cols).expect("Identity matrix must be created");
            let matrix_i_prime = Matrix::identity(num_rows).expect("Identity matrix must be created");

            let matrix_ai = (&matrix_a * &matrix_i).expect("Matrix multiplication must pass");
            assert_eq!(matrix_a, matrix_ai);

            let matrix_ia = (&matrix_i_prime * &matrix_a).expect("Matrix multiplication must pass");
            assert_eq!(matrix_a, matrix_ia);
        }
    }

    #[test_case(1; "Single column per chunk")]
    #[test_case(7; "Chunk width not dividing number of columns")]
    #[test_case(256; "Default chunk width")]
    #[test_case(100_000; "Chunk wider than the whole matrix")]
    fn chunked_multiplication_with_transposed_rhs_matches_plain_multiplication(chunk_num_cols: usize) {
        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        let lhs = Matrix::generate_from_seed(33, 57, &seed).expect("Matrix must be generated from seed");
        rng.fill_bytes(&mut seed);
        let rhs = Matrix::generate_from_seed(57, 129, &seed).expect("Matrix must be generated from seed");

        let expected = (&lhs * &rhs).expect("Matrix multiplication must pass");
        let computed = lhs.mul_transposed_chunked(&rhs.transpose(), chunk_num_cols).expect("Chunked multiplication must pass");

        assert_eq!(expected, computed);
    }

    #[test]
    fn chunked_multiplication_rejects_incompatible_dimensions() {
        let lhs = Matrix::new(1, 10).expect("Row vector must be created");
        let transposed_rhs = Matrix::new(4, 11).expect("Matrix must be created");

        assert_eq!(
            lhs.mul_transposed_chunked(&transposed_rhs, 256),
            Err(TwinPIRError::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication)
        );
    }

    #[test]
    fn matrix_addition_is_correct() {
        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        let matrix_a = Matrix::generate_from_seed(97, 31, &seed).expect("Matrix must be generated from seed");
        let matrix_neg_a = (-&matrix_a).expect("Must be able to negate matrix");

        let matrix_a_plus_neg_a = (&matrix_a + &matrix_neg_a).expect("Matrix addition must pass");
        let matrix_zero = Matrix::new(97, 31).expect("Must be able to create zero matrix");

        assert_eq!(matrix_a_plus_neg_a, matrix_zero);
    }

    #[test]
    fn transposing_twice_is_identity() {
        let seed = [7u8; SEED_BYTE_LEN];
        let matrix_a = Matrix::generate_from_seed(13, 29, &seed).expect("Matrix must be generated from seed");
        let matrix_at = matrix_a.transpose();

        assert_eq!(matrix_at.num_rows(), 29);
        assert_eq!(matrix_at[(3, 11)], matrix_a[(11, 3)]);
        assert_eq!(matrix_at.transpose(), matrix_a);
    }

    #[test]
    fn generation_from_seed_is_deterministic() {
        let seed = [42u8; SEED_BYTE_LEN];

        let matrix_a = Matrix::generate_from_seed(64, 3000, &seed).expect("Matrix must be generated from seed");
        let matrix_b = Matrix::generate_from_seed(64, 3000, &seed).expect("Matrix must be generated from seed");
        let matrix_c = Matrix::generate_from_seed(64, 3000, &[43u8; SEED_BYTE_LEN]).expect("Matrix must be generated from seed");

        assert_eq!(matrix_a, matrix_b);
        assert_ne!(matrix_a, matrix_c);
    }

    #[test_case(1, 1024, 64, 2 => matches Ok(_); "Can sample row vector")]
    #[test_case(1, 16, 64, 2 => matches Ok(_); "Hamming weight larger than vector length is clamped")]
    #[test_case(1, 0, 64, 2 => matches Err(TwinPIRError::InvalidMatrixDimension); "Vector must be non-empty")]
    #[test_case(1, 16, 4, 0 => matches Err(TwinPIRError::InvalidProtocolParameter(_)); "Magnitude must be non-zero")]
    fn sampling_sparse_noise_vector(_rows: u32, cols: u32, hamming_weight: u32, max_magnitude: u32) -> Result<Matrix, TwinPIRError> {
        let mut rng = ChaCha8Rng::from_os_rng();
        Matrix::sample_sparse_noise_vector(cols, hamming_weight, max_magnitude, &mut rng)
    }

    #[test]
    fn sparse_noise_vector_has_exact_weight_and_bounded_values() {
        const NUM_TEST_ITERATIONS: usize = 100;
        const VECTOR_LEN: u32 = 4096;
        const HAMMING_WEIGHT: u32 = 64;
        const MAX_MAGNITUDE: u32 = 2;

        let mut rng = ChaCha8Rng::from_os_rng();
        let mut seen = [false; 5];

        for _ in 0..NUM_TEST_ITERATIONS {
            let noise = Matrix::sample_sparse_noise_vector(VECTOR_LEN, HAMMING_WEIGHT, MAX_MAGNITUDE, &mut rng).expect("Noise vector must be sampled");

            let non_zero = noise.elems().iter().filter(|&&v| v != 0).collect::<Vec<_>>();
            assert_eq!(non_zero.len(), HAMMING_WEIGHT as usize);

            non_zero.iter().for_each(|&&v| {
                let signed = v as i32;
                assert!(signed != 0 && signed.unsigned_abs() <= MAX_MAGNITUDE);
                seen[(signed + 2) as usize] = true;
            });
        }

        assert!(seen[0] && seen[1] && seen[3] && seen[4]);
        assert!(!seen[2]);
    }

    #[test]
    fn serialized_matrix_can_be_deserialized() {
        let mut rng = ChaCha8Rng::from_os_rng();

        let mut seed = [0u8; SEED_BYTE_LEN];
        rng.fill_bytes(&mut seed);

        let num_rows = rng.random_range(1..=128);
        let num_cols = rng.random_range(1..=128);

        let matrix_a = Matrix::generate_from_seed(num_rows, num_cols, &seed).expect("Matrix must be generated from seed");
        let matrix_a_bytes = matrix_a.to_bytes();

        assert_eq!(matrix_a_bytes.len(), 8 + 4 * (num_rows * num_cols) as usize);
        assert_eq!(Matrix::from_bytes(&matrix_a_bytes), Ok(matrix_a));
    }

    #[test_case(vec![] => matches Err(TwinPIRError::FailedToDeserializeMatrixFromBytes); "Empty byte string")]
    #[test_case(vec![1, 0, 0, 0, 0, 0, 0, 0] => matches Err(TwinPIRError::FailedToDeserializeMatrixFromBytes); "Header only")]
    #[test_case(vec![1, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0] => matches Err(TwinPIRError::FailedToDeserializeMatrixFromBytes); "Too few element bytes")]
    #[test_case(vec![1, 0, 0, 0, 1, 0, 0, 0, 9, 0, 0, 0] => matches Ok(_); "Single element matrix")]
    fn deserializing_malformed_matrix_bytes(bytes: Vec<u8>) -> Result<Matrix, TwinPIRError> {
        Matrix::from_bytes(&bytes)
    }
}
