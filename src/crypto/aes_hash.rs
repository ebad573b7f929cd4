//! Correlation robust AES hash and the keyed digest compression built on it.
//!
//! The hash is the Matyas-Meyer-Oseas construction `π(x) ^ x` over a fixed-key
//! AES-128 permutation `π`, following <https://eprint.iacr.org/2019/074>.
use std::sync::LazyLock;

use aes::{
    Aes128,
    cipher::{Array, BlockCipherEncrypt, KeyInit},
};

/// Number of bytes in a compression input block.
pub const BLOCK_LEN: usize = 16;
/// Number of bytes in a compression output (digest).
pub const DIGEST_LEN: usize = 32;

/// AES accelerated hashing of 16-byte blocks.
#[derive(Clone)]
pub(crate) struct AesHash {
    aes: Aes128,
}

impl AesHash {
    /// Create a new `AesHash` with the given key.
    pub(crate) fn new(key: [u8; 16]) -> Self {
        Self {
            aes: Aes128::new(&Array(key)),
        }
    }

    /// Compute the correlation robust hash of a block.
    ///
    /// Calculates `π(x) ^ x`.
    ///
    /// # Warning: only secure in semi-honest setting!
    /// See <https://eprint.iacr.org/2019/074> for details.
    pub(crate) fn cr_hash_block(&self, x: &[u8; 16]) -> [u8; 16] {
        let mut x_enc: aes::Block = Array(*x);
        self.aes.encrypt_block(&mut x_enc);
        let mut out = x_enc.0;
        out.iter_mut().zip(x).for_each(|(o, x)| *o ^= x);
        out
    }
}

/// A deterministic, stateless compression of a 16-byte block into a 32-byte digest.
///
/// Both parties must use compressors constructed from the same key, otherwise
/// equal inputs produce unequal digests.
pub trait Compressor {
    /// Compresses `block` into a digest. Identical blocks always give identical digests.
    fn compress(&self, block: &[u8; BLOCK_LEN]) -> [u8; DIGEST_LEN];
}

/// [`Compressor`] built from two independently keyed [`AesHash`] instances.
///
/// `compress(x) = (π₀(x) ^ x) || (π₁(x) ^ x)`, where the two AES keys are derived from a
/// single 16-byte key using BLAKE3 in key derivation mode.
#[derive(Clone)]
pub struct AesCompressor {
    halves: [AesHash; 2],
}

impl AesCompressor {
    /// Creates a compressor for the given key.
    pub fn new(key: [u8; 16]) -> Self {
        let derive = |context: &str| {
            let derived = blake3::derive_key(context, &key);
            let mut half = [0u8; 16];
            half.copy_from_slice(&derived[..16]);
            AesHash::new(half)
        };
        Self {
            halves: [
                derive("exact-pm 2024 digest compression, lower half"),
                derive("exact-pm 2024 digest compression, upper half"),
            ],
        }
    }
}

impl Default for AesCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_DIGEST_KEY)
    }
}

impl Compressor for AesCompressor {
    fn compress(&self, block: &[u8; BLOCK_LEN]) -> [u8; DIGEST_LEN] {
        let mut digest = [0u8; DIGEST_LEN];
        for (half, out) in self.halves.iter().zip(digest.chunks_exact_mut(BLOCK_LEN)) {
            out.copy_from_slice(&half.cr_hash_block(block));
        }
        digest
    }
}

/// The public key used by [`AesCompressor::default`].
///
/// The key was randomly chosen. Any key would be okay as long as both parties use it.
pub const DEFAULT_DIGEST_KEY: [u8; 16] = 0x3f41_e7c2_9a0d_5b86_11f4_c3d8_62ae_907b_u128.to_le_bytes();

/// Fixed-key hashes used as the length-doubling PRG of the point function keys.
pub(crate) static PRG_HASHES: LazyLock<[AesHash; 2]> = LazyLock::new(|| {
    [
        AesHash::new(0x9e37_79b9_7f4a_7c15_f39c_c060_5ced_c834_u128.to_le_bytes()),
        AesHash::new(0x0c8d_4b5a_12e9_f6a3_7b21_d0c4_e58f_3a96_u128.to_le_bytes()),
    ]
});
