//! The secret-sharing backend: a two-party engine over additive (Z_256) and XOR shares.
//!
//! Gates are only *registered* by the caller; nothing is computed until [`Backend::execute`]
//! is called. Every handle returned by a gate constructor is a [`Wire`] whose value becomes
//! readable once the barrier that evaluates it has completed. Both parties must register
//! structurally identical gate sequences between two barriers because gates are matched across
//! the parties by creation order; [`Backend::execute`] verifies this before evaluating anything.
//!
//! Evaluation proceeds in rounds. A forward pass over the pending gates resolves every local
//! gate whose operands are available, and all interactive gates that are ready are batched into
//! a single message exchange with the peer. Correlated randomness for masked reductions and AND
//! gates is fetched from a [`dealer`] before the first round.
use std::{collections::VecDeque, fmt, marker::PhantomData, time::Instant};

use futures::future::try_join;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use crate::{
    backend::{
        dealer::{DealerRequest, DealerResponse, MaskShare, Triple},
        gate::{Gate, RoundMsg, WireId, fingerprint},
    },
    channel::{self, Channel, recv_from, recv_vec_from, send_to},
    crypto::dpf::{self, DpfKey},
    stats::{BarrierStats, RepetitionStats},
};

pub mod dealer;
mod gate;

/// Channel index of the dealer, the two parties use the indices of their [`PeerId`].
pub const DEALER: usize = 2;

/// Identifier of one of the two parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerId {
    /// The party at channel index 0.
    First,
    /// The party at channel index 1.
    Second,
}

impl PeerId {
    /// Both parties, in channel index order.
    pub const ALL: [PeerId; 2] = [PeerId::First, PeerId::Second];

    /// The channel index of the party.
    pub fn index(self) -> usize {
        match self {
            PeerId::First => 0,
            PeerId::Second => 1,
        }
    }

    /// The other party.
    pub fn peer(self) -> PeerId {
        match self {
            PeerId::First => PeerId::Second,
            PeerId::Second => PeerId::First,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// A party index that is neither 0 nor 1.
#[derive(Debug, thiserror::Error)]
#[error("invalid party id {0}, expected 0 or 1")]
pub struct InvalidPeerId(
    /// The rejected index.
    pub usize,
);

impl TryFrom<usize> for PeerId {
    type Error = InvalidPeerId;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PeerId::First),
            1 => Ok(PeerId::Second),
            other => Err(InvalidPeerId(other)),
        }
    }
}

/// Errors raised by the backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A wire was read before the barrier that resolves it.
    #[error("wire {wire} is read before the barrier that resolves it")]
    NotReady {
        /// The wire that was read.
        wire: usize,
    },
    /// An input slot was fulfilled after the barrier it belonged to.
    #[error("input slot of wire {wire} is fulfilled after its barrier")]
    StaleSlot {
        /// The input wire of the slot.
        wire: usize,
    },
    /// A barrier was reached while an own input was still missing its value.
    #[error("own input wire {wire} was never fulfilled")]
    Unfulfilled {
        /// The input wire without value.
        wire: usize,
    },
    /// A party tried to receive an input from itself.
    #[error("party {0} cannot receive an input from itself")]
    SelfPeer(PeerId),
    /// The parties registered different gate sequences since the last barrier.
    #[error("gate sequences of both parties differ ({gates} gates registered locally)")]
    Desynchronized {
        /// Number of gates registered by this party.
        gates: usize,
    },
    /// The peer sent a round message that does not fit the pending gates.
    #[error("the peer sent {actual} {what} values in a round, expected {expected}")]
    RoundMismatch {
        /// Which part of the round message was wrong.
        what: &'static str,
        /// Number of values this party expected.
        expected: usize,
        /// Number of values the peer sent.
        actual: usize,
    },
    /// The dealer refused to hand out correlations.
    #[error("the dealer aborted: {0}")]
    Dealer(String),
    /// The dealer sent a different number of correlations than requested.
    #[error("the dealer sent {actual} correlations, expected {expected}")]
    DealerMismatch {
        /// Requested number.
        expected: usize,
        /// Received number.
        actual: usize,
    },
    /// A message was sent, but it contained no data.
    #[error("the message sent by the other party was empty")]
    EmptyMsg,
    /// A wire holds a value of a different kind than its handle claims.
    #[error("wire {wire} holds a value of an unexpected kind")]
    UnexpectedValue {
        /// The wire with the unexpected value.
        wire: usize,
    },
    /// Some gates can never be evaluated because their operands never resolve.
    #[error("{0} pending gates cannot be evaluated")]
    Unresolvable(usize),
}

/// The value stored on a resolved wire.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// Additive share over Z_256.
    Byte(u8),
    /// XOR share of a bit.
    Bit(bool),
    /// Public masked value and the index of the private point function key.
    Masked(u8, usize),
    /// Reconstructed plaintext bit.
    Opened(bool),
}

mod sealed {
    pub trait Sealed {}
}

/// The kind of value a [`Wire`] carries.
pub trait Kind: sealed::Sealed {
    /// What [`Backend::read_share`] returns for wires of this kind.
    type Value: Copy + fmt::Debug;

    /// Extracts the value of a resolved wire of this kind.
    #[doc(hidden)]
    fn extract(value: Resolved) -> Option<Self::Value>;
}

/// An additive share of a byte, modulo 256.
#[derive(Debug)]
pub enum Byte {}
/// An XOR share of a boolean.
#[derive(Debug)]
pub enum Bit {}
/// A publicly known masked value `x + r` together with a private zero-test key for `r`.
#[derive(Debug)]
pub enum Masked {}
/// A bit that has been reconstructed for both parties.
#[derive(Debug)]
pub enum Opened {}

impl sealed::Sealed for Byte {}
impl sealed::Sealed for Bit {}
impl sealed::Sealed for Masked {}
impl sealed::Sealed for Opened {}

impl Kind for Byte {
    type Value = u8;

    fn extract(value: Resolved) -> Option<u8> {
        match value {
            Resolved::Byte(v) => Some(v),
            _ => None,
        }
    }
}

impl Kind for Bit {
    type Value = bool;

    fn extract(value: Resolved) -> Option<bool> {
        match value {
            Resolved::Bit(v) => Some(v),
            _ => None,
        }
    }
}

impl Kind for Masked {
    type Value = u8;

    fn extract(value: Resolved) -> Option<u8> {
        match value {
            Resolved::Masked(v, _) => Some(v),
            _ => None,
        }
    }
}

impl Kind for Opened {
    type Value = bool;

    fn extract(value: Resolved) -> Option<bool> {
        match value {
            Resolved::Opened(v) => Some(v),
            _ => None,
        }
    }
}

/// An opaque handle to a (future) value held by the backend.
pub struct Wire<K: Kind> {
    id: WireId,
    kind: PhantomData<fn() -> K>,
}

impl<K: Kind> Wire<K> {
    fn new(id: WireId) -> Self {
        Self {
            id,
            kind: PhantomData,
        }
    }
}

impl<K: Kind> Clone for Wire<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Kind> Copy for Wire<K> {}

impl<K: Kind> fmt::Debug for Wire<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wire<{}>({})", std::any::type_name::<K>(), self.id)
    }
}

/// The deferred value of an own input, see [`Backend::request_slot`].
///
/// The slot is consumed by [`Backend::fulfill`], so it can be fulfilled at most once.
#[derive(Debug)]
#[must_use = "an input slot must be fulfilled before the next barrier"]
pub struct InputSlot {
    wire: WireId,
    generation: usize,
}

/// An interactive gate whose outgoing share has been sent and which waits for the peer.
#[derive(Debug)]
enum InFlight {
    OwnInput { wire: WireId, share: u8 },
    PeerInput { wire: WireId },
    MaskedReduce { wire: WireId, share: u8, key: usize },
    And { wire: WireId, d: bool, e: bool, triple: Triple },
    Open { wire: WireId, share: bool },
}

/// One party's view of the two-party backend.
///
/// A backend is meant to be used for a single protocol repetition and then dropped.
pub struct Backend<'ch, C: Channel> {
    channel: &'ch C,
    party: PeerId,
    dealer: usize,
    rng: ChaCha20Rng,
    wires: Vec<Option<Resolved>>,
    pending: Vec<(WireId, Gate)>,
    keys: Vec<DpfKey>,
    generation: usize,
    stats: RepetitionStats,
}

impl<'ch, C: Channel> Backend<'ch, C> {
    /// Creates a backend for `party`, fetching correlated randomness from channel index `dealer`.
    pub fn new(channel: &'ch C, party: PeerId, dealer: usize) -> Self {
        Self {
            channel,
            party,
            dealer,
            rng: ChaCha20Rng::from_rng(&mut rand::rng()),
            wires: vec![],
            pending: vec![],
            keys: vec![],
            generation: 0,
            stats: RepetitionStats::default(),
        }
    }

    /// The local party.
    pub fn party(&self) -> PeerId {
        self.party
    }

    /// Consumes the backend, returning its statistics.
    pub fn into_stats(self) -> RepetitionStats {
        self.stats
    }

    fn register<K: Kind>(&mut self, gate: Gate) -> Wire<K> {
        let id = self.wires.len();
        self.wires.push(None);
        self.pending.push((id, gate));
        Wire::new(id)
    }

    /// Registers an own input whose value is supplied later via [`Backend::fulfill`].
    pub fn request_slot(&mut self) -> (Wire<Byte>, InputSlot) {
        let wire = self.register(Gate::Input {
            owner: self.party,
            value: None,
        });
        let slot = InputSlot {
            wire: wire.id,
            generation: self.generation,
        };
        (wire, slot)
    }

    /// Supplies the value of an own input, must happen before the next barrier.
    pub fn fulfill(&mut self, slot: InputSlot, value: u8) -> Result<(), Error> {
        if slot.generation != self.generation {
            return Err(Error::StaleSlot { wire: slot.wire });
        }
        match self.pending.iter_mut().find(|(id, _)| *id == slot.wire) {
            Some((_, Gate::Input { value: v, .. })) => {
                *v = Some(value);
                Ok(())
            }
            _ => Err(Error::StaleSlot { wire: slot.wire }),
        }
    }

    /// Registers an own input with a known value.
    pub fn provide_own_byte(&mut self, value: u8) -> Wire<Byte> {
        self.register(Gate::Input {
            owner: self.party,
            value: Some(value),
        })
    }

    /// Registers the receiving side of an input owned by `peer`.
    pub fn receive_other_byte(&mut self, peer: PeerId) -> Result<Wire<Byte>, Error> {
        if peer == self.party {
            return Err(Error::SelfPeer(peer));
        }
        Ok(self.register(Gate::Input {
            owner: peer,
            value: None,
        }))
    }

    /// `-a` (mod 256), local.
    pub fn negate(&mut self, a: &Wire<Byte>) -> Wire<Byte> {
        self.register(Gate::Neg(a.id))
    }

    /// `a + b` (mod 256), local.
    pub fn add(&mut self, a: &Wire<Byte>, b: &Wire<Byte>) -> Wire<Byte> {
        self.register(Gate::Add(a.id, b.id))
    }

    /// Masked reduction (HAM): publishes `a + r` for a fresh dealer mask `r`.
    ///
    /// The result reveals nothing about `a` and is the input of [`Backend::zero_test`].
    pub fn masked_reduce(&mut self, a: &Wire<Byte>) -> Wire<Masked> {
        self.register(Gate::MaskedReduce(a.id))
    }

    /// Zero test (DPF): an XOR share of `[a == 0]` for the value `a` behind the masked wire.
    pub fn zero_test(&mut self, m: &Wire<Masked>) -> Wire<Bit> {
        self.register(Gate::ZeroTest(m.id))
    }

    /// `a & b` over XOR shares, one round using a dealer triple.
    pub fn and(&mut self, a: &Wire<Bit>, b: &Wire<Bit>) -> Wire<Bit> {
        self.register(Gate::And(a.id, b.id))
    }

    /// Reconstructs a shared bit for both parties.
    pub fn open(&mut self, a: &Wire<Bit>) -> Wire<Opened> {
        self.register(Gate::Open(a.id))
    }

    /// Returns the locally held value of a wire.
    ///
    /// Fails with [`Error::NotReady`] if the barrier evaluating the wire has not completed.
    pub fn read_share<K: Kind>(&self, wire: &Wire<K>) -> Result<K::Value, Error> {
        let value = self.resolved(wire.id)?;
        K::extract(value).ok_or(Error::UnexpectedValue { wire: wire.id })
    }

    fn resolved(&self, wire: WireId) -> Result<Resolved, Error> {
        self.wires
            .get(wire)
            .copied()
            .flatten()
            .ok_or(Error::NotReady { wire })
    }

    fn byte(&self, wire: WireId) -> Result<u8, Error> {
        Byte::extract(self.resolved(wire)?).ok_or(Error::UnexpectedValue { wire })
    }

    fn bit(&self, wire: WireId) -> Result<bool, Error> {
        Bit::extract(self.resolved(wire)?).ok_or(Error::UnexpectedValue { wire })
    }

    /// Evaluates all gates registered since the previous barrier.
    pub async fn execute(&mut self) -> Result<(), Error> {
        let label = format!("barrier {}", self.generation + 1);
        self.execute_as(&label).await
    }

    /// Like [`Backend::execute`], recording the statistics of the barrier under `label`.
    #[instrument(level = Level::DEBUG, skip(self), fields(party = %self.party), err)]
    pub async fn execute_as(&mut self, label: &str) -> Result<(), Error> {
        let start = Instant::now();
        let gates = std::mem::take(&mut self.pending);
        self.generation += 1;
        let mut barrier = BarrierStats {
            label: label.to_string(),
            gates: gates.len(),
            ..Default::default()
        };

        if let Some((wire, _)) = gates.iter().find(|(_, g)| {
            matches!(g, Gate::Input { owner, value: None } if *owner == self.party)
        }) {
            return Err(Error::Unfulfilled { wire: *wire });
        }

        let peer = self.party.peer().index();
        let local = fingerprint(gates.iter().map(|(id, g)| (*id, g)));
        let (sent, remote) = try_join(
            send_to(self.channel, peer, "gate fingerprint", &[local]),
            recv_from::<[u8; 32]>(self.channel, peer, "gate fingerprint"),
        )
        .await?;
        barrier.bytes_sent += sent;
        barrier.messages_sent += 1;
        if remote.first() != Some(&local) {
            return Err(Error::Desynchronized { gates: gates.len() });
        }

        debug!(
            gates = gates.len(),
            interactive = gates.iter().filter(|(_, g)| g.is_interactive()).count(),
            "fingerprints agree"
        );
        let num_masks = gates
            .iter()
            .filter(|(_, g)| matches!(g, Gate::MaskedReduce(_)))
            .count();
        let num_triples = gates
            .iter()
            .filter(|(_, g)| matches!(g, Gate::And(..)))
            .count();
        let (mut masks, mut triples) = if num_masks + num_triples > 0 {
            self.fetch_correlations(num_masks, num_triples, &mut barrier)
                .await?
        } else {
            (VecDeque::new(), VecDeque::new())
        };

        let mut todo = gates;
        while !todo.is_empty() {
            let mut outgoing = RoundMsg::default();
            let mut in_flight = vec![];
            let mut blocked = vec![];
            for (wire, gate) in todo {
                if gate.operands().any(|op| self.wires[op].is_none()) {
                    blocked.push((wire, gate));
                    continue;
                }
                self.step(wire, gate, &mut outgoing, &mut in_flight, &mut masks, &mut triples)?;
            }
            if in_flight.is_empty() {
                if blocked.is_empty() {
                    break;
                }
                return Err(Error::Unresolvable(blocked.len()));
            }
            let incoming = self.exchange(&outgoing, &mut barrier).await?;
            self.land(in_flight, incoming)?;
            todo = blocked;
        }

        barrier.duration = start.elapsed();
        debug!(
            label,
            gates = barrier.gates,
            rounds = barrier.rounds,
            bytes = barrier.bytes_sent,
            "barrier done"
        );
        self.stats.barriers.push(barrier);
        Ok(())
    }

    /// Ends the current barrier without evaluating it, recording only the number of gates.
    ///
    /// Nothing is sent, the wires of the dropped gates never resolve and input slots of the
    /// barrier become stale.
    pub fn skip_as(&mut self, label: &str) {
        let gates = std::mem::take(&mut self.pending);
        self.generation += 1;
        debug!(label, gates = gates.len(), "barrier built, not executed");
        self.stats.barriers.push(BarrierStats {
            label: label.to_string(),
            gates: gates.len(),
            ..Default::default()
        });
    }

    /// Evaluates a ready gate: local gates are resolved, interactive ones are queued for the round.
    fn step(
        &mut self,
        wire: WireId,
        gate: Gate,
        outgoing: &mut RoundMsg,
        in_flight: &mut Vec<InFlight>,
        masks: &mut VecDeque<MaskShare>,
        triples: &mut VecDeque<Triple>,
    ) -> Result<(), Error> {
        let resolved = match gate {
            Gate::Input {
                owner,
                value: Some(value),
            } if owner == self.party => {
                let share: u8 = self.rng.random();
                outgoing.inputs.push(value.wrapping_sub(share));
                in_flight.push(InFlight::OwnInput { wire, share });
                return Ok(());
            }
            Gate::Input { owner, .. } if owner == self.party => {
                return Err(Error::Unfulfilled { wire });
            }
            Gate::Input { .. } => {
                in_flight.push(InFlight::PeerInput { wire });
                return Ok(());
            }
            Gate::Neg(a) => Resolved::Byte(self.byte(a)?.wrapping_neg()),
            Gate::Add(a, b) => Resolved::Byte(self.byte(a)?.wrapping_add(self.byte(b)?)),
            Gate::MaskedReduce(a) => {
                let mask = masks.pop_front().ok_or(Error::DealerMismatch {
                    expected: 1,
                    actual: 0,
                })?;
                let share = self.byte(a)?.wrapping_add(mask.r);
                outgoing.masked.push(share);
                self.keys.push(mask.key);
                in_flight.push(InFlight::MaskedReduce {
                    wire,
                    share,
                    key: self.keys.len() - 1,
                });
                return Ok(());
            }
            Gate::ZeroTest(m) => match self.resolved(m)? {
                Resolved::Masked(value, key) => Resolved::Bit(dpf::eval(
                    self.party == PeerId::Second,
                    &self.keys[key],
                    value,
                )),
                _ => return Err(Error::UnexpectedValue { wire: m }),
            },
            Gate::And(a, b) => {
                let triple = triples.pop_front().ok_or(Error::DealerMismatch {
                    expected: 1,
                    actual: 0,
                })?;
                let d = self.bit(a)? ^ triple.a;
                let e = self.bit(b)? ^ triple.b;
                outgoing.ands.push((d, e));
                in_flight.push(InFlight::And { wire, d, e, triple });
                return Ok(());
            }
            Gate::Open(a) => {
                let share = self.bit(a)?;
                outgoing.opens.push(share);
                in_flight.push(InFlight::Open { wire, share });
                return Ok(());
            }
        };
        self.wires[wire] = Some(resolved);
        Ok(())
    }

    async fn exchange(
        &mut self,
        outgoing: &RoundMsg,
        barrier: &mut BarrierStats,
    ) -> Result<RoundMsg, Error> {
        let peer = self.party.peer().index();
        let (sent, mut incoming) = try_join(
            send_to(self.channel, peer, "round", std::slice::from_ref(outgoing)),
            recv_from::<RoundMsg>(self.channel, peer, "round"),
        )
        .await?;
        barrier.rounds += 1;
        barrier.bytes_sent += sent;
        barrier.messages_sent += 1;
        incoming.pop().ok_or(Error::EmptyMsg)
    }

    /// Resolves the in-flight gates of a round using the peer's message.
    fn land(&mut self, in_flight: Vec<InFlight>, incoming: RoundMsg) -> Result<(), Error> {
        let expect = |what, expected: usize, actual: usize| {
            if expected == actual {
                Ok(())
            } else {
                Err(Error::RoundMismatch {
                    what,
                    expected,
                    actual,
                })
            }
        };
        let count = |f: fn(&InFlight) -> bool| in_flight.iter().filter(|g| f(g)).count();
        expect(
            "input",
            count(|g| matches!(g, InFlight::PeerInput { .. })),
            incoming.inputs.len(),
        )?;
        expect(
            "masked",
            count(|g| matches!(g, InFlight::MaskedReduce { .. })),
            incoming.masked.len(),
        )?;
        expect(
            "AND",
            count(|g| matches!(g, InFlight::And { .. })),
            incoming.ands.len(),
        )?;
        expect(
            "open",
            count(|g| matches!(g, InFlight::Open { .. })),
            incoming.opens.len(),
        )?;

        let mut inputs = incoming.inputs.into_iter();
        let mut masked = incoming.masked.into_iter();
        let mut ands = incoming.ands.into_iter();
        let mut opens = incoming.opens.into_iter();
        let is_first = self.party == PeerId::First;
        for g in in_flight {
            let (wire, value) = match g {
                InFlight::OwnInput { wire, share } => (wire, Resolved::Byte(share)),
                InFlight::PeerInput { wire } => (wire, Resolved::Byte(next(&mut inputs)?)),
                InFlight::MaskedReduce { wire, share, key } => {
                    let value = share.wrapping_add(next(&mut masked)?);
                    (wire, Resolved::Masked(value, key))
                }
                InFlight::And { wire, d, e, triple } => {
                    let (peer_d, peer_e) = next(&mut ands)?;
                    let (d, e) = (d ^ peer_d, e ^ peer_e);
                    let z = triple.c ^ (d & triple.b) ^ (e & triple.a) ^ (is_first & d & e);
                    (wire, Resolved::Bit(z))
                }
                InFlight::Open { wire, share } => {
                    (wire, Resolved::Opened(share ^ next(&mut opens)?))
                }
            };
            self.wires[wire] = Some(value);
        }
        Ok(())
    }

    async fn fetch_correlations(
        &mut self,
        masks: usize,
        triples: usize,
        barrier: &mut BarrierStats,
    ) -> Result<(VecDeque<MaskShare>, VecDeque<Triple>), Error> {
        let request = DealerRequest::Correlations {
            masks: masks as u32,
            triples: triples as u32,
        };
        barrier.bytes_sent += send_to(self.channel, self.dealer, "dealer request", &[request]).await?;
        barrier.messages_sent += 1;
        let response = recv_vec_from::<DealerResponse>(self.channel, self.dealer, "dealer response", 1)
            .await?
            .pop()
            .ok_or(Error::EmptyMsg)?;
        match response {
            DealerResponse::Correlations {
                masks: m,
                triples: t,
            } => {
                if m.len() != masks {
                    return Err(Error::DealerMismatch {
                        expected: masks,
                        actual: m.len(),
                    });
                }
                if t.len() != triples {
                    return Err(Error::DealerMismatch {
                        expected: triples,
                        actual: t.len(),
                    });
                }
                Ok((m.into(), t.into()))
            }
            DealerResponse::Abort(reason) => Err(Error::Dealer(reason)),
        }
    }
}

fn next<T>(values: &mut impl Iterator<Item = T>) -> Result<T, Error> {
    values.next().ok_or(Error::EmptyMsg)
}

/// Tells the dealer at channel index `dealer` that this party is done.
pub async fn finish(channel: &impl Channel, dealer: usize) -> Result<(), Error> {
    send_to(channel, dealer, "dealer request", &[DealerRequest::Finish]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec, prelude::*};

    use super::*;
    use crate::channel::SimpleChannel;

    fn pair() -> (SimpleChannel, SimpleChannel) {
        let [a, b]: [SimpleChannel; 2] = SimpleChannel::channels(2)
            .try_into()
            .expect("parties is 2");
        (a, b)
    }

    fn with_dealer() -> (SimpleChannel, SimpleChannel, tokio::task::JoinHandle<()>) {
        let [a, b, d]: [SimpleChannel; 3] = SimpleChannel::channels(3)
            .try_into()
            .expect("parties is 3");
        let dealer = tokio::spawn(async move {
            dealer::dealer(&d).await.expect("dealer succeeds");
        });
        (a, b, dealer)
    }

    async fn done(a: &SimpleChannel, b: &SimpleChannel, dealer: tokio::task::JoinHandle<()>) {
        finish(a, DEALER).await.unwrap();
        finish(b, DEALER).await.unwrap();
        dealer.await.unwrap();
    }

    /// Registers `[x_i - y_i == 0]` for every pair and the AND of all of them, opening everything.
    fn equalities(
        be: &mut Backend<'_, SimpleChannel>,
        pairs: &[(u8, u8)],
    ) -> Result<Vec<Wire<Opened>>, Error> {
        let mut eqs = vec![];
        for &(x, y) in pairs {
            let (wx, wy) = match be.party() {
                PeerId::First => (be.provide_own_byte(x), be.receive_other_byte(PeerId::Second)?),
                PeerId::Second => (be.receive_other_byte(PeerId::First)?, be.provide_own_byte(y)),
            };
            let neg = be.negate(&wy);
            let diff = be.add(&wx, &neg);
            let masked = be.masked_reduce(&diff);
            eqs.push(be.zero_test(&masked));
        }
        let mut acc = eqs[0];
        for eq in &eqs[1..] {
            acc = be.and(&acc, eq);
        }
        eqs.push(acc);
        Ok(eqs.iter().map(|w| be.open(w)).collect())
    }

    proptest! {
        #[test]
        fn shares_sum_to_secret(secrets in vec(any::<u8>(), 1..16), late in any::<u8>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let (opened, opened_late, rounds) = rt
                .block_on(async {
                    let (ch_a, ch_b) = pair();
                    let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
                    let mut b = Backend::new(&ch_b, PeerId::Second, DEALER);
                    let mut wires = vec![];
                    for &s in &secrets {
                        wires.push((a.provide_own_byte(s), b.receive_other_byte(PeerId::First)?));
                    }
                    let (slot_wire, slot) = b.request_slot();
                    let a_slot = a.receive_other_byte(PeerId::Second)?;
                    b.fulfill(slot, late)?;
                    try_join(a.execute(), b.execute()).await?;
                    let mut opened = vec![];
                    for (wa, wb) in &wires {
                        opened.push(a.read_share(wa)?.wrapping_add(b.read_share(wb)?));
                    }
                    let opened_late = a.read_share(&a_slot)?.wrapping_add(b.read_share(&slot_wire)?);
                    let stats = a.into_stats();
                    Ok::<_, Error>((opened, opened_late, stats.barriers[0].rounds))
                })
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(opened, secrets);
            prop_assert_eq!(opened_late, late);
            prop_assert_eq!(rounds, 1);
        }
    }

    #[tokio::test]
    async fn zero_tests_and_and_chain() -> Result<(), Error> {
        let (ch_a, ch_b, d) = with_dealer();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        let mut b = Backend::new(&ch_b, PeerId::Second, DEALER);
        let pairs = [(5u8, 5u8), (0, 0), (7, 8), (255, 255)];
        let outs_a = equalities(&mut a, &pairs)?;
        let outs_b = equalities(&mut b, &pairs)?;
        try_join(a.execute(), b.execute()).await?;
        let expected = [true, true, false, true, false];
        for ((wa, wb), e) in outs_a.iter().zip(&outs_b).zip(expected) {
            assert_eq!(a.read_share(wa)?, e);
            assert_eq!(b.read_share(wb)?, e);
        }

        let outs_a = equalities(&mut a, &[(1, 1), (2, 2)])?;
        let outs_b = equalities(&mut b, &[(1, 1), (2, 2)])?;
        try_join(a.execute(), b.execute()).await?;
        assert!(a.read_share(&outs_a[2])?);
        assert!(b.read_share(&outs_b[2])?);
        done(&ch_a, &ch_b, d).await;
        Ok(())
    }

    #[tokio::test]
    async fn read_before_barrier_is_not_ready() {
        let (ch_a, _ch_b) = pair();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        let w = a.provide_own_byte(1);
        assert!(matches!(a.read_share(&w), Err(Error::NotReady { wire: 0 })));
    }

    #[tokio::test]
    async fn slots_must_be_fulfilled_before_their_barrier() {
        let (ch_a, _ch_b) = pair();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        assert!(matches!(
            a.receive_other_byte(PeerId::First),
            Err(Error::SelfPeer(PeerId::First))
        ));
        let (_, slot) = a.request_slot();
        assert!(matches!(a.execute().await, Err(Error::Unfulfilled { wire: 0 })));
        assert!(matches!(a.fulfill(slot, 1), Err(Error::StaleSlot { wire: 0 })));
    }

    #[tokio::test]
    async fn mismatching_gate_sequences_are_detected() {
        let (ch_a, ch_b) = pair();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        let mut b = Backend::new(&ch_b, PeerId::Second, DEALER);
        a.provide_own_byte(1);
        a.provide_own_byte(2);
        b.receive_other_byte(PeerId::First).unwrap();
        let (ra, rb) = tokio::join!(a.execute(), b.execute());
        assert!(matches!(ra, Err(Error::Desynchronized { gates: 2 })));
        assert!(matches!(rb, Err(Error::Desynchronized { gates: 1 })));
    }

    #[tokio::test]
    async fn local_gates_need_no_round() -> Result<(), Error> {
        let (ch_a, ch_b) = pair();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        let mut b = Backend::new(&ch_b, PeerId::Second, DEALER);
        let wa = a.provide_own_byte(10);
        let wb = b.receive_other_byte(PeerId::First)?;
        try_join(a.execute(), b.execute()).await?;
        let na = a.negate(&wa);
        let sa = a.add(&na, &wa);
        let nb = b.negate(&wb);
        let sb = b.add(&nb, &wb);
        try_join(a.execute_as("local"), b.execute_as("local")).await?;
        assert_eq!(a.read_share(&sa)?.wrapping_add(b.read_share(&sb)?), 0);
        let stats = a.into_stats();
        assert_eq!(stats.barriers[1].label, "local");
        assert_eq!(stats.barriers[1].rounds, 0);
        Ok(())
    }

    #[tokio::test]
    async fn skipped_barriers_only_count_gates() {
        let (ch_a, _ch_b) = pair();
        let mut a = Backend::new(&ch_a, PeerId::First, DEALER);
        let (w, slot) = a.request_slot();
        let n = a.negate(&w);
        a.masked_reduce(&n);
        a.skip_as("dry");
        assert!(matches!(a.read_share(&w), Err(Error::NotReady { .. })));
        assert!(matches!(a.fulfill(slot, 1), Err(Error::StaleSlot { wire: 0 })));
        let stats = a.into_stats();
        assert_eq!(stats.barriers.len(), 1);
        assert_eq!(stats.barriers[0].label, "dry");
        assert_eq!(stats.barriers[0].gates, 3);
        assert_eq!(stats.bytes_sent(), 0);
    }
}
