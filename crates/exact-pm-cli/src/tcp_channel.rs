//! A [`Channel`] over TCP connections, one per remote party.
//!
//! Messages are framed with a 4-byte big-endian length prefix.
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use exact_pm::{
    backend::{DEALER, PeerId},
    channel::Channel,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::sleep,
};
use tracing::{debug, info, warn};

/// Messages larger than this are rejected instead of allocated.
const MAX_MSG_LEN: u32 = 1 << 30;

/// How long a party keeps trying to reach a peer that is not up yet.
const CONNECT_RETRIES: usize = 10 * 60;

struct Link {
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<OwnedReadHalf>,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("could not disable Nagle's algorithm: {e}");
        }
        let (reader, writer) = stream.into_split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

pub struct TcpChannel {
    links: Vec<Option<Link>>,
}

impl TcpChannel {
    /// Connects a party to its peer and to the dealer.
    ///
    /// The party with the lower id listens on `own_addr`, the other one connects to `peer_addr`.
    pub async fn party(
        me: PeerId,
        own_addr: &str,
        peer_addr: &str,
        dealer_addr: &str,
    ) -> anyhow::Result<Self> {
        let peer = match me {
            PeerId::First => {
                let listener = TcpListener::bind(own_addr)
                    .await
                    .with_context(|| format!("could not listen on {own_addr}"))?;
                info!("waiting for party {} on {own_addr}", me.peer());
                let (stream, addr) = listener.accept().await?;
                debug!(%addr, "peer connected");
                stream
            }
            PeerId::Second => connect(peer_addr).await?,
        };
        let mut dealer = connect(dealer_addr).await?;
        dealer.write_u32(me.index() as u32).await?;

        let mut links: Vec<Option<Link>> = (0..=DEALER).map(|_| None).collect();
        links[me.peer().index()] = Some(Link::new(peer));
        links[DEALER] = Some(Link::new(dealer));
        Ok(Self { links })
    }

    /// Accepts both parties on `addr`, each of them identifies itself by its id.
    pub async fn dealer(addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("could not listen on {addr}"))?;
        info!("dealer listening on {addr}");
        let mut links: Vec<Option<Link>> = PeerId::ALL.iter().map(|_| None).collect();
        while links.iter().any(Option::is_none) {
            let (mut stream, remote) = listener.accept().await?;
            let id = stream.read_u32().await? as usize;
            let party = PeerId::try_from(id)?;
            if links[party.index()].is_some() {
                bail!("party {party} connected twice (from {remote})");
            }
            info!(%remote, "party {party} connected");
            links[party.index()] = Some(Link::new(stream));
        }
        Ok(Self { links })
    }

    fn link(&self, p: usize) -> anyhow::Result<&Link> {
        self.links
            .get(p)
            .and_then(Option::as_ref)
            .ok_or_else(|| anyhow!("no connection to party {p}"))
    }
}

async fn connect(addr: &str) -> anyhow::Result<TcpStream> {
    let mut retries = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if retries < CONNECT_RETRIES => {
                retries += 1;
                warn!("could not reach {addr} ({e}), retrying...");
                sleep(Duration::from_millis(1000)).await;
            }
            Err(e) => return Err(e).with_context(|| format!("could not connect to {addr}")),
        }
    }
}

impl Channel for TcpChannel {
    type SendError = anyhow::Error;
    type RecvError = anyhow::Error;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>) -> Result<(), Self::SendError> {
        let len = u32::try_from(msg.len())
            .ok()
            .filter(|len| *len <= MAX_MSG_LEN)
            .ok_or_else(|| anyhow!("message of {} bytes is too large", msg.len()))?;
        let mut w = self.link(p)?.writer.lock().await;
        w.write_u32(len).await?;
        w.write_all(&msg).await?;
        w.flush().await?;
        Ok(())
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, Self::RecvError> {
        let mut r = self.link(p)?.reader.lock().await;
        let len = r.read_u32().await.context("connection closed")?;
        if len > MAX_MSG_LEN {
            bail!("party {p} announced a message of {len} bytes");
        }
        let mut msg = vec![0; len as usize];
        r.read_exact(&mut msg).await?;
        Ok(msg)
    }
}
