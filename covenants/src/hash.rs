//! Hash functions used by scripts and transactions

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// The length of a sha256 digest
pub const SHA256_LEN: usize = 32;
/// The length of a hash160 digest
pub const HASH160_LEN: usize = 20;

/// A single sha256
pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    Sha256::digest(data).into()
}

/// sha256(sha256(data)), used for txids and sighashes
pub fn sha256d(data: &[u8]) -> [u8; SHA256_LEN] {
    sha256(&sha256(data))
}

/// ripemd160(sha256(data)), used for P2PKH and P2SH addresses
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    Ripemd160::digest(sha256(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(hex::encode(hash160(b"")), "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb");
    }
}
