use std::{error::Error, fmt::Display};

/// Coarse classification of every failure, matching how a caller is expected to react to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed matrix dimensions or serialized matrix bytes.
    Matrix,
    /// Empty/ invalid database or protocol parameters. Setup must be aborted.
    Configuration,
    /// Prefix of the queried digest is absent from the directory, so the digest is definitely not in the database.
    Lookup,
    /// Decryption attempted before both query halves arrived. Retry once the missing half is delivered.
    IncompleteTransaction,
    /// Recovered row doesn't satisfy the noise bound. Fatal to the transaction, not the process.
    DecryptionIntegrity,
    /// Malformed query half or answer, unknown transaction, or failed OPRF/ Bloom filter exchange. The query is inconclusive and
    /// must be retried as a fresh transaction.
    Verification,
}

#[derive(Debug, PartialEq)]
pub enum TwinPIRError {
    // Matrix
    InvalidMatrixDimension,
    IncompatibleDimensionForMatrixMultiplication,
    IncompatibleDimensionForMatrixAddition,
    InvalidNumberOfElementsInMatrix,
    IncompatibleDimensionForRowVectorTransposedMatrixMultiplication,
    InvalidDimensionForVector,
    FailedToDeserializeMatrixFromBytes,

    // Configuration
    EmptyDatabase,
    InconsistentDigestLength { expected: usize, found: usize },
    InvalidProtocolParameter(&'static str),
    FailedToDeserializeDbParams,
    InvalidHintMatrix,
    FailedToEncryptDirectoryEntry,
    FailedToDeserializeDirectory,

    // Lookup
    PrefixNotFoundInDirectory,

    // Transaction
    IncompleteTransaction,
    TransactionNotFound,
    InvalidTransactionState(&'static str),

    // Decryption
    InvalidSecretVector,
    InvalidQueryVector,
    InvalidAnswerVector,
    DecryptionIntegrityViolation { column: usize },

    // Verification
    FailedToDeserializeBloomFilter,
    InvalidOprfElement,
    PendingQueryExistsForTransaction,
    PendingQueryDoesNotExistForTransaction,
}

impl TwinPIRError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMatrixDimension
            | Self::IncompatibleDimensionForMatrixMultiplication
            | Self::IncompatibleDimensionForMatrixAddition
            | Self::InvalidNumberOfElementsInMatrix
            | Self::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication
            | Self::InvalidDimensionForVector
            | Self::FailedToDeserializeMatrixFromBytes => ErrorKind::Matrix,

            Self::EmptyDatabase
            | Self::InconsistentDigestLength { .. }
            | Self::InvalidProtocolParameter(_)
            | Self::FailedToDeserializeDbParams
            | Self::InvalidHintMatrix
            | Self::FailedToEncryptDirectoryEntry
            | Self::FailedToDeserializeDirectory => ErrorKind::Configuration,

            Self::PrefixNotFoundInDirectory => ErrorKind::Lookup,

            Self::IncompleteTransaction => ErrorKind::IncompleteTransaction,

            Self::DecryptionIntegrityViolation { .. } => ErrorKind::DecryptionIntegrity,

            Self::InvalidSecretVector
            | Self::InvalidQueryVector
            | Self::InvalidAnswerVector
            | Self::TransactionNotFound
            | Self::InvalidTransactionState(_)
            | Self::FailedToDeserializeBloomFilter
            | Self::InvalidOprfElement
            | Self::PendingQueryExistsForTransaction
            | Self::PendingQueryDoesNotExistForTransaction => ErrorKind::Verification,
        }
    }
}

impl Display for TwinPIRError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMatrixDimension => write!(f, "The number of rows and columns in the matrix must be non-zero."),
            Self::IncompatibleDimensionForMatrixMultiplication => write!(f, "The matrix dimensions do not allow multiplication."),
            Self::IncompatibleDimensionForMatrixAddition => write!(f, "The matrix dimensions do not allow addition."),
            Self::InvalidNumberOfElementsInMatrix => write!(f, "The matrix must have 'rows * columns' elements."),
            Self::IncompatibleDimensionForRowVectorTransposedMatrixMultiplication => {
                write!(f, "The dimensions are incompatible for multiplication with a transposed matrix.")
            }
            Self::InvalidDimensionForVector => write!(f, "A vector must have either one row or one column."),
            Self::FailedToDeserializeMatrixFromBytes => write!(f, "Failed to deserialize matrix from bytes."),

            Self::EmptyDatabase => write!(f, "Can not encode empty database of digests."),
            Self::InconsistentDigestLength { expected, found } => {
                write!(f, "Every digest must be {} bytes long, found one of {} bytes.", expected, found)
            }
            Self::InvalidProtocolParameter(reason) => write!(f, "Invalid protocol parameter: {}", reason),
            Self::FailedToDeserializeDbParams => write!(f, "Failed to deserialize database parameters from bytes."),
            Self::InvalidHintMatrix => write!(f, "Hint matrix dimensions don't match LWE dimension and database parameters."),
            Self::FailedToEncryptDirectoryEntry => write!(f, "Failed to encrypt row index of prefix directory entry."),
            Self::FailedToDeserializeDirectory => write!(f, "Failed to deserialize prefix directory from bytes."),

            Self::PrefixNotFoundInDirectory => write!(f, "Prefix not found in directory, queried digest is definitely absent."),

            Self::IncompleteTransaction => write!(f, "Both the LWE secret and the linear answer must be received before decryption."),
            Self::TransactionNotFound => write!(f, "No transaction exists for this identifier."),
            Self::InvalidTransactionState(reason) => write!(f, "Invalid transaction state: {}", reason),

            Self::InvalidSecretVector => write!(f, "Unexpected dimension of LWE secret vector."),
            Self::InvalidQueryVector => write!(f, "Unexpected dimension of query vector."),
            Self::InvalidAnswerVector => write!(f, "Unexpected dimension of answer vector."),
            Self::DecryptionIntegrityViolation { column } => {
                write!(f, "Decryption noise exceeds bound at column {}, parameters or inputs are inconsistent.", column)
            }

            Self::FailedToDeserializeBloomFilter => write!(f, "Failed to deserialize Bloom filter from bytes."),
            Self::InvalidOprfElement => write!(f, "Bytes don't encode a valid OPRF group element."),
            Self::PendingQueryExistsForTransaction => write!(f, "Pending verification for this transaction found in internal client state."),
            Self::PendingQueryDoesNotExistForTransaction => write!(f, "No pending verification for this transaction in internal client state."),
        }
    }
}

impl Error for TwinPIRError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
