//! Host identity, peer addressing and stream setup over plain TCP.
//!
//! A host is named by a [`PeerId`] and reachable at a [`PeerAddr`] written
//! as `/ip4/<ip>/tcp/<port>/p2p/<peer-id>`. Opening a stream exchanges one
//! hello line in each direction carrying the protocol id and the sender's
//! peer id. After that the stream belongs to the replication session.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use rand::{RngCore, SeedableRng, rngs::OsRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{
    io::BufReader,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tracing::debug;

use crate::frame::{FrameError, read_frame, write_frame};

/// Protocol id both ends must agree on.
pub const PROTOCOL_ID: &str = "/p2p/1.0.0";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PEER_ID_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("malformed peer address '{0}'")]
    Malformed(String),
    #[error("unsupported address component '{0}'")]
    Unsupported(String),
    #[error("undecodable peer id '{0}'")]
    InvalidPeerId(String),
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake frame: {0}")]
    Frame(#[from] FrameError),
    #[error("peer closed the stream during handshake")]
    Closed,
    #[error("handshake timed out")]
    TimedOut,
    #[error("peer speaks protocol '{found}', expected '{expected}'")]
    ProtocolMismatch { expected: String, found: String },
    #[error("dialed peer {expected} but reached {found}")]
    PeerMismatch { expected: PeerId, found: PeerId },
    #[error(transparent)]
    BadPeerId(#[from] AddrError),
}

/// Stable name of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Derives an identity from fresh key material. Seed 0 draws from the
    /// OS generator; any other seed is reproducible.
    pub fn from_seed(seed: u64) -> Self {
        let mut key = [0u8; 32];
        if seed == 0 {
            OsRng.fill_bytes(&mut key);
        } else {
            StdRng::seed_from_u64(seed).fill_bytes(&mut key);
        }
        Self::from_key(&key)
    }

    fn from_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut id = [0u8; PEER_ID_LEN];
        id.copy_from_slice(&digest[..PEER_ID_LEN]);
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PeerId {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| AddrError::InvalidPeerId(s.to_string()))?;
        let id: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| AddrError::InvalidPeerId(s.to_string()))?;
        Ok(Self(id))
    }
}

/// Full address of a peer: where to connect and who should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub socket: SocketAddr,
    pub peer_id: PeerId,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.socket.ip() {
            IpAddr::V4(_) => "ip4",
            IpAddr::V6(_) => "ip6",
        };
        write!(
            f,
            "/{family}/{}/tcp/{}/p2p/{}",
            self.socket.ip(),
            self.socket.port(),
            self.peer_id
        )
    }
}

impl FromStr for PeerAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddrError::Malformed(s.to_string());
        let parts: Vec<&str> = s.trim().split('/').collect();
        let [empty, family, ip, transport, port, tag, id] = parts.as_slice() else {
            return Err(malformed());
        };
        if !empty.is_empty() {
            return Err(malformed());
        }

        let ip: IpAddr = match *family {
            "ip4" => ip.parse::<std::net::Ipv4Addr>().map_err(|_| malformed())?.into(),
            "ip6" => ip.parse::<std::net::Ipv6Addr>().map_err(|_| malformed())?.into(),
            other => return Err(AddrError::Unsupported(other.to_string())),
        };
        if *transport != "tcp" {
            return Err(AddrError::Unsupported(transport.to_string()));
        }
        let port: u16 = port.parse().map_err(|_| malformed())?;
        if !matches!(*tag, "p2p" | "ipfs") {
            return Err(AddrError::Unsupported(tag.to_string()));
        }

        Ok(Self {
            socket: SocketAddr::new(ip, port),
            peer_id: id.parse()?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    protocol: String,
    peer_id: String,
}

/// One negotiated byte stream to a single peer.
pub struct PeerStream {
    pub peer: PeerId,
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

/// A connection accepted by [`Host::accept`] that has not been negotiated.
pub struct Incoming {
    stream: TcpStream,
    remote: SocketAddr,
    local_id: PeerId,
}

impl Incoming {
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub async fn negotiate(self) -> Result<PeerStream, HandshakeError> {
        negotiate(self.stream, self.local_id, None).await
    }
}

/// Addressable identity listening for streams.
pub struct Host {
    peer_id: PeerId,
    listener: TcpListener,
}

impl Host {
    pub async fn bind(addr: SocketAddr, seed: u64) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            peer_id: PeerId::from_seed(seed),
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The address other nodes pass to `--dial`.
    pub fn address(&self) -> std::io::Result<PeerAddr> {
        Ok(PeerAddr {
            socket: self.local_addr()?,
            peer_id: self.peer_id,
        })
    }

    pub async fn accept(&self) -> std::io::Result<Incoming> {
        let (stream, remote) = self.listener.accept().await?;
        Ok(Incoming {
            stream,
            remote,
            local_id: self.peer_id,
        })
    }

    /// Opens a stream to `target` and checks that the expected peer answered.
    pub async fn dial(&self, target: &PeerAddr) -> Result<PeerStream, HandshakeError> {
        let stream = TcpStream::connect(target.socket).await?;
        negotiate(stream, self.peer_id, Some(target.peer_id)).await
    }
}

async fn negotiate(
    stream: TcpStream,
    local_id: PeerId,
    expected: Option<PeerId>,
) -> Result<PeerStream, HandshakeError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let hello = Hello {
        protocol: PROTOCOL_ID.to_string(),
        peer_id: local_id.to_string(),
    };
    let exchange = async {
        write_frame(&mut writer, &hello).await?;
        let remote = read_frame::<_, Hello>(&mut reader).await?;
        Ok::<_, HandshakeError>(remote)
    };
    let remote = timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| HandshakeError::TimedOut)??
        .ok_or(HandshakeError::Closed)?;

    if remote.protocol != PROTOCOL_ID {
        return Err(HandshakeError::ProtocolMismatch {
            expected: PROTOCOL_ID.to_string(),
            found: remote.protocol,
        });
    }
    let peer: PeerId = remote.peer_id.parse()?;
    if let Some(expected) = expected {
        if expected != peer {
            return Err(HandshakeError::PeerMismatch {
                expected,
                found: peer,
            });
        }
    }

    debug!(%peer, "stream negotiated");
    Ok(PeerStream {
        peer,
        reader,
        writer,
    })
}
