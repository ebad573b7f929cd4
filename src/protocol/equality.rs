//! The secure equality test of the two digests of every window.
use crate::{
    backend::{Backend, Bit, PeerId, Wire},
    channel::Channel,
    protocol::{Error, digest::SharedDigest},
};

/// Registers one shared match bit per window, true iff both parties' digests are equal.
///
/// Per byte, the difference of the digest owned by [`PeerId::First`] and the digest owned by
/// [`PeerId::Second`] is masked, zero-tested and the resulting bits are AND-ed in byte order.
/// The orientation of the difference does not depend on the local party, so both parties
/// register the same circuit. The `i`-th bit always belongs to the `i`-th window.
pub(crate) fn build_equality_circuit<C: Channel>(
    backend: &mut Backend<'_, C>,
    digests: &[SharedDigest],
) -> Result<Vec<Wire<Bit>>, Error> {
    digests
        .iter()
        .enumerate()
        .map(|(window, digest)| {
            let mut acc: Option<Wire<Bit>> = None;
            for b in 0..digest.bytes.len() {
                let neg = backend.negate(&digest.byte(b, PeerId::Second));
                let diff = backend.add(&digest.byte(b, PeerId::First), &neg);
                let masked = backend.masked_reduce(&diff);
                let equal = backend.zero_test(&masked);
                acc = Some(match acc {
                    None => equal,
                    Some(acc) => backend.and(&acc, &equal),
                });
            }
            acc.ok_or(Error::EmptyDigest { window })
        })
        .collect()
}
