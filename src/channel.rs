//! A communication channel used to send/receive messages to/from another party.

use std::{fmt, future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during {phase}: {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("receive failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be serialized (before sending it out).
    #[error("(de-)serialization failed: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("expected a message of length {expected}, got {actual}")]
    InvalidLength {
        /// Number of elements the receiver expected.
        expected: usize,
        /// Number of elements that were actually received.
        actual: usize,
    },
}

/// A communication channel used to send/receive messages to/from another party.
///
/// Both methods take `&self` so that a party can send and receive concurrently.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index.
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a message from the party with the given index.
    fn recv_bytes_from(
        &self,
        party: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the given party, returning the number of bytes sent.
pub(crate) async fn send_to<S: Serialize>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &[S],
) -> Result<usize, Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    let len = msg.len();
    trace!(party, phase, bytes = len, "send");
    channel.send_bytes_to(party, msg).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })?;
    Ok(len)
}

/// Receives and deserializes a message from the given party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Vec<T>, Error> {
    let msg = channel.recv_bytes_from(party).await.map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    trace!(party, phase, bytes = msg.len(), "recv");
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec from the given party (while checking the length).
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength {
                expected: len,
                actual: v.len(),
            },
        })
    }
}

/// A simple in-memory channel using tokio's [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
    recv_timeout: Duration,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        Self::channels_with_timeout(parties, Duration::from_secs(10 * 60))
    }

    /// Creates channels for N parties whose `recv` gives up after `recv_timeout`.
    pub fn channels_with_timeout(parties: usize, recv_timeout: Duration) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels: Vec<SimpleChannel> = (0..parties)
            .map(|_| SimpleChannel {
                s: (0..parties).map(|_| None).collect(),
                r: (0..parties).map(|_| None).collect(),
                recv_timeout,
            })
            .collect();
        for a in 0..parties {
            for b in (a + 1)..parties {
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(Mutex::new(recv_b_to_a));
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncSendError {
    /// There is no link from this party to the requested one.
    NoSuchParty(usize),
    /// The receiving half has been dropped.
    Closed(SendError<Vec<u8>>),
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// There is no link from the requested party to this one.
    NoSuchParty(usize),
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), AsyncSendError> {
        let sender = self
            .s
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncSendError::NoSuchParty(p))?;
        sender.send(msg).await.map_err(AsyncSendError::Closed)
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let receiver = self
            .r
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncRecvError::NoSuchParty(p))?;
        let mut receiver = receiver.lock().await;
        match timeout(self.recv_timeout, receiver.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_arrive_in_order() -> Result<(), Error> {
        let [a, b]: [SimpleChannel; 2] = SimpleChannel::channels(2)
            .try_into()
            .expect("parties is 2");
        send_to(&a, 1, "first", &[1u8, 2, 3]).await?;
        send_to(&a, 1, "second", &[4u8]).await?;
        assert_eq!(recv_vec_from::<u8>(&b, 0, "first", 3).await?, vec![1, 2, 3]);
        assert_eq!(recv_from::<u8>(&b, 0, "second").await?, vec![4]);
        Ok(())
    }

    #[tokio::test]
    async fn unexpected_length_is_rejected() -> Result<(), Error> {
        let [a, b]: [SimpleChannel; 2] = SimpleChannel::channels(2)
            .try_into()
            .expect("parties is 2");
        send_to(&a, 1, "short", &[true]).await?;
        let err = recv_vec_from::<bool>(&b, 0, "short", 2)
            .await
            .expect_err("length differs");
        assert!(matches!(
            err.reason,
            ErrorKind::InvalidLength {
                expected: 2,
                actual: 1
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn recv_times_out() {
        let [_a, b]: [SimpleChannel; 2] =
            SimpleChannel::channels_with_timeout(2, Duration::from_millis(10))
                .try_into()
                .expect("parties is 2");
        let err = recv_from::<u8>(&b, 0, "nothing").await.expect_err("no sender");
        assert!(matches!(err.reason, ErrorKind::RecvError(_)));
    }

    #[tokio::test]
    async fn unknown_party_is_an_error() {
        let [a, _b]: [SimpleChannel; 2] = SimpleChannel::channels(2)
            .try_into()
            .expect("parties is 2");
        let err = send_to(&a, 5, "nowhere", &[0u8]).await.expect_err("no party 5");
        assert!(matches!(err.reason, ErrorKind::SendError(_)));
    }
}
