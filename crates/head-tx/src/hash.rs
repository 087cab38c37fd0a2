//! Ledger hash functions

use blake2::digest::consts::{U28, U32};
use blake2::{Blake2b, Digest};
use head_types::{KeyHash, TxId};

type Blake2b224 = Blake2b<U28>;
type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 (transaction ids, script data hashes)
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Blake2b-224 (key and script hashes)
pub fn blake2b_224(data: &[u8]) -> KeyHash {
    let mut hasher = Blake2b224::new();
    hasher.update(data);
    let mut out = [0u8; 28];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Transaction id of an encoded transaction body
pub fn tx_id(body: &[u8]) -> TxId {
    TxId(blake2b_256(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2b_256_empty() {
        assert_eq!(
            hex::encode(blake2b_256(&[])),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn test_hash_widths_differ() {
        let long = blake2b_256(b"head");
        let short = blake2b_224(b"head");
        // Different output lengths are different parameterisations, not truncations
        assert_ne!(&long[..28], &short[..]);
    }
}
