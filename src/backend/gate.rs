//! Gates registered between two barriers and the messages exchanged while evaluating them.
use serde::{Deserialize, Serialize};

use crate::backend::PeerId;

/// Index of a wire in the backend's wire table.
pub(crate) type WireId = usize;

/// A gate waiting for the next barrier.
///
/// Every gate produces exactly one output wire; operands always refer to wires created earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Additive sharing of a byte owned by `owner`. `value` is only known to the owner.
    Input { owner: PeerId, value: Option<u8> },
    /// `-a` over Z_256.
    Neg(WireId),
    /// `a + b` over Z_256.
    Add(WireId, WireId),
    /// Opens `a + r` for a dealer mask `r` (HAM).
    MaskedReduce(WireId),
    /// XOR share of `[a == 0]` from a masked value (DPF).
    ZeroTest(WireId),
    /// `a & b` over XOR shares.
    And(WireId, WireId),
    /// Reconstructs a bit for both parties.
    Open(WireId),
}

impl Gate {
    /// Whether evaluating the gate needs a message exchange with the peer.
    pub(crate) fn is_interactive(&self) -> bool {
        !matches!(self, Gate::Neg(_) | Gate::Add(..) | Gate::ZeroTest(_))
    }

    pub(crate) fn operands(&self) -> impl Iterator<Item = WireId> {
        let (a, b) = match *self {
            Gate::Input { .. } => (None, None),
            Gate::Neg(a) | Gate::MaskedReduce(a) | Gate::ZeroTest(a) | Gate::Open(a) => {
                (Some(a), None)
            }
            Gate::Add(a, b) | Gate::And(a, b) => (Some(a), Some(b)),
        };
        a.into_iter().chain(b)
    }

    /// Feeds the structure of the gate (never the private input value) into `hasher`.
    ///
    /// An input looks the same whether it is issued by its owner or by the receiver, so both
    /// parties arrive at the same fingerprint iff they issued structurally identical sequences.
    fn fingerprint(&self, wire: WireId, hasher: &mut blake3::Hasher) {
        hasher.update(&(wire as u64).to_le_bytes());
        let (tag, operands): (u8, [Option<WireId>; 2]) = match *self {
            Gate::Input { owner, .. } => (owner.index() as u8, [None, None]),
            Gate::Neg(a) => (2, [Some(a), None]),
            Gate::Add(a, b) => (3, [Some(a), Some(b)]),
            Gate::MaskedReduce(a) => (4, [Some(a), None]),
            Gate::ZeroTest(a) => (5, [Some(a), None]),
            Gate::And(a, b) => (6, [Some(a), Some(b)]),
            Gate::Open(a) => (7, [Some(a), None]),
        };
        hasher.update(&[tag]);
        for operand in operands.into_iter().flatten() {
            hasher.update(&(operand as u64).to_le_bytes());
        }
    }
}

/// BLAKE3 fingerprint of the structure of a gate sequence.
pub(crate) fn fingerprint<'a>(gates: impl IntoIterator<Item = (WireId, &'a Gate)>) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for (wire, gate) in gates {
        gate.fingerprint(wire, &mut hasher);
    }
    hasher.finalize().into()
}

/// Everything a party sends to its peer in one round, each vector in gate order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RoundMsg {
    /// The receiver's share of every input owned by the sender.
    pub(crate) inputs: Vec<u8>,
    /// The sender's share of `a + r` for every masked reduction.
    pub(crate) masked: Vec<u8>,
    /// The sender's shares of `(d, e)` for every AND gate.
    pub(crate) ands: Vec<(bool, bool)>,
    /// The sender's share of every opened bit.
    pub(crate) opens: Vec<bool>,
}
