//! A (semi-)trusted dealer providing the correlated randomness of the online gates.
//!
//! The dealer never sees any input. Before each barrier both parties announce how many
//! zero-test masks and AND triples they are about to consume; the dealer only answers if both
//! announcements agree.
use futures::future::try_join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use crate::{
    backend::PeerId,
    channel::{self, Channel, recv_from, send_to},
    crypto::dpf::{self, DpfKey},
};

/// Errors that can occur while executing the dealer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The two parties asked for different correlations.
    #[error("parties requested different correlations: {0:?} vs {1:?}")]
    RequestMismatch(DealerRequest, DealerRequest),
    /// An error occurred while trying to communicate over the channel.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// A message was sent, but it contained no data.
    #[error("the message sent by a party was empty")]
    EmptyMsg,
}

/// What a party asks the dealer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealerRequest {
    /// Correlations for the next barrier.
    Correlations {
        /// Number of zero-test masks.
        masks: u32,
        /// Number of AND triples.
        triples: u32,
    },
    /// The party will not ask for anything else.
    Finish,
}

/// One party's half of a zero-test mask `r`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MaskShare {
    /// Additive share of `r`.
    pub(crate) r: u8,
    /// Key for the point function that is `1` exactly at `r`.
    pub(crate) key: DpfKey,
}

/// One party's XOR shares of a triple `(a, b, a & b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Triple {
    pub(crate) a: bool,
    pub(crate) b: bool,
    pub(crate) c: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum DealerResponse {
    Correlations {
        masks: Vec<MaskShare>,
        triples: Vec<Triple>,
    },
    Abort(String),
}

/// Runs the dealer for both parties until both send [`DealerRequest::Finish`].
#[instrument(level = Level::DEBUG, skip_all, err)]
pub async fn dealer(channel: &impl Channel) -> Result<(), Error> {
    let mut rng = ChaCha20Rng::from_rng(&mut rand::rng());
    loop {
        let requests = try_join_all(PeerId::ALL.map(async |p| {
            recv_from::<DealerRequest>(channel, p.index(), "dealer request")
                .await?
                .pop()
                .ok_or(Error::EmptyMsg)
        }))
        .await?;
        let (first, second) = (requests[0], requests[1]);
        match (first, second) {
            (DealerRequest::Finish, DealerRequest::Finish) => {
                debug!("dealer finished");
                return Ok(());
            }
            (DealerRequest::Correlations { masks, triples }, _) if first == second => {
                debug!(masks, triples, "dealing correlations");
                let [m0, m1] = deal_masks(masks as usize, &mut rng);
                let [t0, t1] = deal_triples(triples as usize, &mut rng);
                try_join_all([(PeerId::First, m0, t0), (PeerId::Second, m1, t1)].map(
                    async |(p, masks, triples)| {
                        let response = DealerResponse::Correlations { masks, triples };
                        send_to(channel, p.index(), "dealer response", &[response]).await
                    },
                ))
                .await?;
            }
            _ => {
                let e = Error::RequestMismatch(first, second);
                try_join_all(PeerId::ALL.map(async |p| {
                    let response = DealerResponse::Abort(e.to_string());
                    send_to(channel, p.index(), "dealer response", &[response]).await
                }))
                .await?;
                return Err(e);
            }
        }
    }
}

fn deal_masks(n: usize, rng: &mut ChaCha20Rng) -> [Vec<MaskShare>; 2] {
    let mut shares = [Vec::with_capacity(n), Vec::with_capacity(n)];
    for _ in 0..n {
        let r: u8 = rng.random();
        let r0: u8 = rng.random();
        let [k0, k1] = dpf::generate(r, true, rng);
        shares[0].push(MaskShare { r: r0, key: k0 });
        shares[1].push(MaskShare {
            r: r.wrapping_sub(r0),
            key: k1,
        });
    }
    shares
}

fn deal_triples(n: usize, rng: &mut ChaCha20Rng) -> [Vec<Triple>; 2] {
    let mut shares = [Vec::with_capacity(n), Vec::with_capacity(n)];
    for _ in 0..n {
        let (a, b): (bool, bool) = (rng.random(), rng.random());
        let first = Triple {
            a: rng.random(),
            b: rng.random(),
            c: rng.random(),
        };
        let second = Triple {
            a: a ^ first.a,
            b: b ^ first.b,
            c: (a & b) ^ first.c,
        };
        shares[0].push(first);
        shares[1].push(second);
    }
    shares
}
