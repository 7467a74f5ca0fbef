use std::cmp::min;

/// Writes a digest into a row slice of the encoded matrix, one byte per matrix element.
///
/// With plaintext modulus p = 2^8, every byte of the digest is already a valid plaintext element, so no bit-packing is needed.
#[inline(always)]
pub fn encode_digest_into_row(digest: &[u8], row: &mut [u32]) {
    row.iter_mut().zip(digest).for_each(|(elem, &byte)| {
        *elem = byte as u32;
    });
}

/// Splits a recovered row of plaintext elements into `max_cols_per_row` sub-vectors of `entry_vec_len` elements each, returning
/// every sub-vector which is not all-zero, as a byte-string.
///
/// # Arguments
///
/// * `row` - Recovered plaintext row, every element in [0, p).
/// * `entry_vec_len` - Number of elements in each sub-vector, i.e. digest length in bytes.
///
/// # Returns
///
/// Candidate items, in the order they appear in the row. Trailing elements, not filling a whole sub-vector, are ignored.
pub fn decode_row_into_candidates(row: &[u8], entry_vec_len: usize) -> Vec<Vec<u8>> {
    if entry_vec_len == 0 {
        return Vec::new();
    }

    row.chunks_exact(entry_vec_len)
        .filter(|sub_vec| sub_vec.iter().any(|&byte| byte != 0))
        .map(|sub_vec| sub_vec.to_vec())
        .collect()
}

/// Converts a slice of bytes into a u64 in little-endian byte order.
///
/// Reads at most 8 bytes from the input slice. If the slice is shorter than 8 bytes, it reads only the available bytes,
/// while setting other bytes to 0.
#[inline(always)]
pub fn u64_from_le_bytes(bytes: &[u8]) -> u64 {
    let mut word = 0;
    let readable_num_bytes = min(bytes.len(), std::mem::size_of::<u64>());

    for (idx, &byte) in bytes.iter().enumerate().take(readable_num_bytes) {
        word |= (byte as u64) << (idx * 8);
    }

    word
}

/// Reads a little-endian u32 at `offset`, if the slice is long enough.
#[inline(always)]
pub fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset.checked_add(std::mem::size_of::<u32>())?)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

/// Reads a little-endian u64 at `offset`, if the slice is long enough.
#[inline(always)]
pub fn read_u64_le(bytes: &[u8], offset: usize) -> Option<u64> {
    let word = bytes.get(offset..offset.checked_add(std::mem::size_of::<u64>())?)?;
    Some(u64_from_le_bytes(word))
}
