use super::{
    branch_opt_util,
    error::TwinPIRError,
    serialization::read_u32_le,
};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::prelude::*;
use rayon::prelude::*;
use turboshake::TurboShake128;

const DIRECTORY_KEY_LABEL: &[u8] = b"twin_pir.prefix_directory.key";
const DIRECTORY_KEY_DOMAIN_SEPARATOR: u8 = 0x0d;
const DIRECTORY_KEY_BYTE_LEN: usize = 32;
const NONCE_BYTE_LEN: usize = 12;

/// Derives the symmetric key of a prefix. Anyone knowing the prefix can derive it, there is no other secret involved.
fn derive_prefix_key(prefix: &[u8]) -> [u8; DIRECTORY_KEY_BYTE_LEN] {
    let mut hasher = TurboShake128::default();
    hasher.absorb(DIRECTORY_KEY_LABEL);
    hasher.absorb(prefix);
    hasher.finalize::<{ DIRECTORY_KEY_DOMAIN_SEPARATOR }>();

    let mut key = [0u8; DIRECTORY_KEY_BYTE_LEN];
    hasher.squeeze(&mut key);

    key
}

#[inline(always)]
fn cipher_for_prefix(prefix: &[u8]) -> Aes256Gcm {
    let key = derive_prefix_key(prefix);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

/// Maps every prefix to its row index in the encoded database, as a list of tokens, each one decryptable only with the key
/// derived from its own prefix. A token is `nonce (12 bytes) || AES-256-GCM(row index as 4 -byte big-endian)`.
///
/// Whole list is published to every client, so the directory holder can't tell which token a client managed to open.
/// It still sees the number of buckets, and as keys are derived from the prefix alone, it can recover every prefix by trying
/// all of them offline. This is a keyed lookup table, not a 1-out-of-N oblivious transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct PrefixDirectory {
    tokens: Vec<Vec<u8>>,
}

impl PrefixDirectory {
    /// Encrypts row index `i` under the key of `prefixes[i]`, for all prefixes. Token order is shuffled, so a token's position
    /// doesn't reveal its row index.
    pub fn build<R: RngCore + ?Sized>(prefixes: &[Vec<u8>], rng: &mut R) -> Result<PrefixDirectory, TwinPIRError> {
        let mut entries = prefixes
            .iter()
            .enumerate()
            .map(|(ridx, prefix)| {
                let row_index = u32::try_from(ridx).map_err(|_| TwinPIRError::FailedToEncryptDirectoryEntry)?;

                let mut nonce = [0u8; NONCE_BYTE_LEN];
                rng.fill_bytes(&mut nonce);

                Ok((prefix.as_slice(), row_index, nonce))
            })
            .collect::<Result<Vec<_>, TwinPIRError>>()?;
        entries.shuffle(rng);

        let tokens = entries
            .par_iter()
            .map(|(prefix, row_index, nonce)| {
                let ciphertext = cipher_for_prefix(prefix)
                    .encrypt(Nonce::from_slice(nonce), row_index.to_be_bytes().as_ref())
                    .map_err(|_| TwinPIRError::FailedToEncryptDirectoryEntry)?;

                let mut token = Vec::with_capacity(NONCE_BYTE_LEN + ciphertext.len());
                token.extend_from_slice(nonce);
                token.extend_from_slice(&ciphertext);

                Ok(token)
            })
            .collect::<Result<Vec<Vec<u8>>, TwinPIRError>>()?;

        Ok(PrefixDirectory { tokens })
    }

    #[inline(always)]
    pub fn num_entries(&self) -> usize {
        self.tokens.len()
    }

    /// Tries to open every token with the key derived from `prefix`.
    ///
    /// # Returns
    ///
    /// * `Result<u32, TwinPIRError>` - Row index of the bucket holding `prefix`, or `PrefixNotFoundInDirectory` if no token opens,
    ///   meaning no digest with this prefix is in the database.
    pub fn lookup_row(&self, prefix: &[u8]) -> Result<u32, TwinPIRError> {
        let cipher = cipher_for_prefix(prefix);

        self.tokens
            .par_iter()
            .find_map_any(|token| {
                if branch_opt_util::unlikely(token.len() <= NONCE_BYTE_LEN) {
                    return None;
                }

                let (nonce, ciphertext) = token.split_at(NONCE_BYTE_LEN);
                let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;
                let row_index: [u8; 4] = plaintext.as_slice().try_into().ok()?;

                Some(u32::from_be_bytes(row_index))
            })
            .ok_or(TwinPIRError::PrefixNotFoundInDirectory)
    }

    /// Serializes the directory as `count (u32 LE) || (token length (u32 LE) || token)*`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total_byte_len = std::mem::size_of::<u32>() + self.tokens.iter().map(|token| std::mem::size_of::<u32>() + token.len()).sum::<usize>();
        let mut bytes = Vec::with_capacity(total_byte_len);

        bytes.extend_from_slice(&(self.tokens.len() as u32).to_le_bytes());
        self.tokens.iter().for_each(|token| {
            bytes.extend_from_slice(&(token.len() as u32).to_le_bytes());
            bytes.extend_from_slice(token);
        });

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<PrefixDirectory, TwinPIRError> {
        let count = read_u32_le(bytes, 0).ok_or(TwinPIRError::FailedToDeserializeDirectory)? as usize;
        let mut offset = std::mem::size_of::<u32>();

        // Every token takes at least its length prefix, so a bogus count can't force a huge allocation.
        if branch_opt_util::unlikely(count > (bytes.len() - offset) / std::mem::size_of::<u32>()) {
            return Err(TwinPIRError::FailedToDeserializeDirectory);
        }

        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            let token_len = read_u32_le(bytes, offset).ok_or(TwinPIRError::FailedToDeserializeDirectory)? as usize;
            offset += std::mem::size_of::<u32>();

            let token = bytes.get(offset..offset + token_len).ok_or(TwinPIRError::FailedToDeserializeDirectory)?;
            tokens.push(token.to_vec());
            offset += token_len;
        }

        if branch_opt_util::likely(offset == bytes.len()) {
            Ok(PrefixDirectory { tokens })
        } else {
            Err(TwinPIRError::FailedToDeserializeDirectory)
        }
    }
}

#[cfg(test)]
mod test {
    use crate::pir_internals::{directory::PrefixDirectory, error::TwinPIRError};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use test_case::test_case;

    fn all_two_byte_prefixes_with_step(step: usize) -> Vec<Vec<u8>> {
        (0..=u16::MAX as usize).step_by(step).map(|prefix| (prefix as u16).to_be_bytes().to_vec()).collect()
    }

    #[test]
    fn every_prefix_resolves_to_its_row() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let prefixes = all_two_byte_prefixes_with_step(97);

        let directory = PrefixDirectory::build(&prefixes, &mut rng).expect("Directory must be built");
        assert_eq!(directory.num_entries(), prefixes.len());

        prefixes.iter().enumerate().for_each(|(ridx, prefix)| {
            assert_eq!(directory.lookup_row(prefix), Ok(ridx as u32));
        });
    }

    #[test]
    fn absent_prefix_is_reported_deterministically() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let prefixes = vec![vec![0xaa, 0xbb], vec![0xaa, 0xbc]];

        let directory = PrefixDirectory::build(&prefixes, &mut rng).expect("Directory must be built");

        for _ in 0..8 {
            assert_eq!(directory.lookup_row(&[0xaa, 0xbd]), Err(TwinPIRError::PrefixNotFoundInDirectory));
        }
    }

    #[test]
    fn serialized_directory_can_be_deserialized_and_queried() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let prefixes = all_two_byte_prefixes_with_step(1013);

        let directory = PrefixDirectory::build(&prefixes, &mut rng).expect("Directory must be built");
        let directory_bytes = directory.to_bytes();

        let deserialized = PrefixDirectory::from_bytes(&directory_bytes).expect("Directory must be deserialized");
        assert_eq!(deserialized, directory);
        assert_eq!(deserialized.lookup_row(&prefixes[3]), Ok(3));
    }

    #[test_case(vec![]; "Empty byte string")]
    #[test_case(vec![1, 0, 0, 0]; "Missing token")]
    #[test_case(vec![1, 0, 0, 0, 4, 0, 0, 0, 1, 2]; "Truncated token")]
    #[test_case(vec![0, 0, 0, 0, 7]; "Trailing bytes")]
    #[test_case(vec![255, 255, 255, 255, 0, 0, 0, 0]; "Bogus token count")]
    fn malformed_directory_bytes_are_rejected(bytes: Vec<u8>) {
        assert_eq!(PrefixDirectory::from_bytes(&bytes), Err(TwinPIRError::FailedToDeserializeDirectory));
    }

    #[test]
    fn tampered_tokens_are_non_matches() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let prefixes = vec![vec![0x01, 0x02]];

        let directory = PrefixDirectory::build(&prefixes, &mut rng).expect("Directory must be built");
        let mut directory_bytes = directory.to_bytes();

        let last_idx = directory_bytes.len() - 1;
        directory_bytes[last_idx] ^= 1;

        let tampered = PrefixDirectory::from_bytes(&directory_bytes).expect("Directory must be deserialized");
        assert_eq!(tampered.lookup_row(&[0x01, 0x02]), Err(TwinPIRError::PrefixNotFoundInDirectory));
    }
}
