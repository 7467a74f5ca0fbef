use super::{
    branch_opt_util,
    error::TwinPIRError,
    matrix::Matrix,
    serialization::read_u64_le,
    transaction::{TRANSACTION_ID_BYTE_LEN, TransactionId},
};
use std::time::Duration;

fn read_transaction_id(bytes: &[u8]) -> Option<TransactionId> {
    let id_bytes: [u8; TRANSACTION_ID_BYTE_LEN] = bytes.get(..TRANSACTION_ID_BYTE_LEN)?.try_into().ok()?;
    Some(TransactionId::from_bytes(id_bytes))
}

fn id_then_matrix_to_bytes(id: &TransactionId, mat: &Matrix) -> Vec<u8> {
    let mut bytes = id.as_bytes().to_vec();
    bytes.extend_from_slice(&mat.to_bytes());

    bytes
}

fn id_then_row_vector_from_bytes(bytes: &[u8]) -> Result<(TransactionId, Matrix), TwinPIRError> {
    let id = read_transaction_id(bytes).ok_or(TwinPIRError::FailedToDeserializeMatrixFromBytes)?;
    let vec = Matrix::from_bytes(&bytes[TRANSACTION_ID_BYTE_LEN..])?;

    if branch_opt_util::likely(vec.num_rows() == 1) {
        Ok((id, vec))
    } else {
        Err(TwinPIRError::InvalidDimensionForVector)
    }
}

/// LWE secret `s` of a query. Only the verifying server accepts it.
#[derive(Clone, Debug, PartialEq)]
pub struct SecretHalf {
    pub(crate) id: TransactionId,
    pub(crate) secret_vec_s: Matrix,
}

/// LWE query vector `qu`. Only the answering server accepts it.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryHalf {
    pub(crate) id: TransactionId,
    pub(crate) query_vec_qu: Matrix,
}

/// Answer `qu * D`, computed by the answering server, addressed to the verifying server.
#[derive(Clone, Debug, PartialEq)]
pub struct AnswerHalf {
    pub(crate) id: TransactionId,
    pub(crate) answer_vec: Matrix,
    pub(crate) compute_time: Duration,
}

impl SecretHalf {
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Serializes as `transaction id (16 bytes) || s (matrix bytes)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        id_then_matrix_to_bytes(&self.id, &self.secret_vec_s)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SecretHalf, TwinPIRError> {
        let (id, secret_vec_s) = id_then_row_vector_from_bytes(bytes)?;
        Ok(SecretHalf { id, secret_vec_s })
    }
}

impl QueryHalf {
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Serializes as `transaction id (16 bytes) || qu (matrix bytes)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        id_then_matrix_to_bytes(&self.id, &self.query_vec_qu)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<QueryHalf, TwinPIRError> {
        let (id, query_vec_qu) = id_then_row_vector_from_bytes(bytes)?;
        Ok(QueryHalf { id, query_vec_qu })
    }
}

impl AnswerHalf {
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Time the answering server spent computing this answer.
    pub const fn compute_time(&self) -> Duration {
        self.compute_time
    }

    /// Serializes as `transaction id (16 bytes) || compute time in nanoseconds (u64 LE) || ans (matrix bytes)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.id.as_bytes().to_vec();
        bytes.extend_from_slice(&(self.compute_time.as_nanos().min(u64::MAX as u128) as u64).to_le_bytes());
        bytes.extend_from_slice(&self.answer_vec.to_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<AnswerHalf, TwinPIRError> {
        const OFFSET: usize = TRANSACTION_ID_BYTE_LEN + std::mem::size_of::<u64>();

        let id = read_transaction_id(bytes).ok_or(TwinPIRError::FailedToDeserializeMatrixFromBytes)?;
        let compute_nanos = read_u64_le(bytes, TRANSACTION_ID_BYTE_LEN).ok_or(TwinPIRError::FailedToDeserializeMatrixFromBytes)?;
        let answer_vec = Matrix::from_bytes(&bytes[OFFSET..])?;

        if branch_opt_util::unlikely(answer_vec.num_rows() != 1) {
            return Err(TwinPIRError::InvalidDimensionForVector);
        }

        Ok(AnswerHalf {
            id,
            answer_vec,
            compute_time: Duration::from_nanos(compute_nanos),
        })
    }
}
