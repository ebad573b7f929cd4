//! Symmetric primitives: the keyed digest compression and the zero-test point function.
mod aes_hash;
pub(crate) mod dpf;

pub use aes_hash::{AesCompressor, BLOCK_LEN, Compressor, DEFAULT_DIGEST_KEY, DIGEST_LEN};
