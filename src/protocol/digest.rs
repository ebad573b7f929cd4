//! Local compression of the masked differences and re-sharing of the resulting digests.
use crate::{
    backend::{Backend, Byte, PeerId, Wire},
    channel::Channel,
    crypto::{BLOCK_LEN, Compressor, DIGEST_LEN},
    protocol::{Error, Phase},
};

/// Folds a vector of any length into a single block.
///
/// Shorter vectors are zero-padded, the bytes of longer ones are XORed into position `i % 16`.
pub fn fold_block(bytes: &[u8]) -> [u8; BLOCK_LEN] {
    let mut block = [0; BLOCK_LEN];
    for (i, b) in bytes.iter().enumerate() {
        block[i % BLOCK_LEN] ^= b;
    }
    block
}

/// The digest of every window's masked-difference vector.
pub(crate) fn compute_digests(
    compressor: &impl Compressor,
    masked_diffs: &[Vec<u8>],
) -> Vec<[u8; DIGEST_LEN]> {
    masked_diffs
        .iter()
        .map(|diff| compressor.compress(&fold_block(diff)))
        .collect()
}

/// Shares of both parties' digests of a single window.
#[derive(Debug)]
pub(crate) struct SharedDigest {
    /// Per digest byte, the share of the byte owned by each party, indexed by [`PeerId::index`].
    pub(crate) bytes: Vec<[Wire<Byte>; 2]>,
}

impl SharedDigest {
    /// The share of byte `b` of the digest owned by `owner`.
    pub(crate) fn byte(&self, b: usize, owner: PeerId) -> Wire<Byte> {
        self.bytes[b][owner.index()]
    }
}

/// Registers the sharing of the own digests and the receipt of the peer's digests.
///
/// For every window and digest byte, the input owned by [`PeerId::First`] is registered before
/// the one owned by [`PeerId::Second`], regardless of which party is local. This makes the
/// sequence of registered gates identical on both sides.
pub(crate) fn share_digests<C: Channel>(
    backend: &mut Backend<'_, C>,
    digests: &[[u8; DIGEST_LEN]],
) -> Result<Vec<SharedDigest>, Error> {
    let me = backend.party();
    let mut shared = Vec::with_capacity(digests.len());
    for (w, digest) in digests.iter().enumerate() {
        let mut bytes = Vec::with_capacity(DIGEST_LEN);
        for (b, &value) in digest.iter().enumerate() {
            let mut pair = Vec::with_capacity(2);
            for owner in PeerId::ALL {
                let wire = if owner == me {
                    backend.provide_own_byte(value)
                } else {
                    backend
                        .receive_other_byte(owner)
                        .map_err(Error::backend_at(Phase::ShareDigests, Some(w), Some(b)))?
                };
                pair.push(wire);
            }
            bytes.push([pair[0], pair[1]]);
        }
        shared.push(SharedDigest { bytes });
    }
    Ok(shared)
}
