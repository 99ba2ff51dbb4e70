//! Peer selection and retries on top of [`PeerSession`].
//!
//! A [`Client`] takes a list of candidate peers and works through them: each
//! address gets up to [`SessionConfig::max_retries`] attempts with
//! [`SessionConfig::retry_delay`] between them before the next address is
//! tried. Peers that break the protocol (wrong torrent, missing piece, no
//! metadata support) are skipped without further attempts.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::metainfo::{InfoHash, TorrentInfo};
use crate::peer::{ErrorKind, PeerError, PeerId, PeerSession, Phase};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no peers to try")]
    NoPeers,

    #[error("piece {index} is out of range ({count} pieces)")]
    InvalidPiece { index: u32, count: u32 },

    /// Every attempt on every peer failed; `last` is the final failure.
    #[error("all peers failed after {attempts} attempts, last error: {last}")]
    PeersExhausted {
        attempts: u32,
        #[source]
        last: PeerError,
    },
}

/// Opens byte streams to peers.
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<TcpStream>> + Send {
        TcpStream::connect(addr)
    }
}

/// Downloads pieces and metadata from a list of peers.
///
/// ```no_run
/// use btwire::metainfo::Metainfo;
/// use btwire::{Client, SessionConfig};
///
/// # async fn example(torrent: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
/// let metainfo = Metainfo::from_bytes(torrent)?;
/// let peers = ["10.0.0.2:6881".parse()?, "10.0.0.3:51413".parse()?];
///
/// let client = Client::new(SessionConfig::default());
/// let piece = client.download_piece(&metainfo.info, &peers, 0).await?;
/// println!("piece 0: {} bytes", piece.len());
/// # Ok(())
/// # }
/// ```
pub struct Client<C = TcpConnector> {
    connector: C,
    config: SessionConfig,
    peer_id: PeerId,
}

impl Client<TcpConnector> {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }
}

impl Default for Client<TcpConnector> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<C: Connector> Client<C> {
    /// Uses `connector` to open peer streams. A fresh peer id is generated
    /// and shared by every session this client opens.
    pub fn with_connector(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            peer_id: PeerId::generate(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Downloads and verifies piece `index` from the first peer that
    /// delivers it.
    pub async fn download_piece(
        &self,
        info: &TorrentInfo,
        peers: &[SocketAddr],
        index: u32,
    ) -> Result<Bytes, ClientError> {
        let count = info.piece_count();
        if index >= count {
            return Err(ClientError::InvalidPiece { index, count });
        }

        let mut attempts = self.attempts(peers)?;
        while let Some(addr) = attempts.next().await {
            match self.piece_from(addr, info, index).await {
                Ok(piece) => return Ok(piece),
                Err(e) => attempts.failed(addr, e),
            }
        }
        Err(attempts.exhausted())
    }

    /// Fetches the info dictionary for `info_hash` via ut_metadata.
    pub async fn download_torrent_metadata(
        &self,
        info_hash: InfoHash,
        peers: &[SocketAddr],
    ) -> Result<TorrentInfo, ClientError> {
        let mut attempts = self.attempts(peers)?;
        while let Some(addr) = attempts.next().await {
            match self.metadata_from(addr, info_hash).await {
                Ok(info) => {
                    info!("metadata for {} ({}) from {}", info_hash, info.name, addr);
                    return Ok(info);
                }
                Err(e) => attempts.failed(addr, e),
            }
        }
        Err(attempts.exhausted())
    }

    /// Downloads every piece in order and returns the whole content.
    ///
    /// Pieces are fetched one after another over a single session. When a
    /// session fails, the next attempt resumes at the first missing piece.
    pub async fn download(
        &self,
        info: &TorrentInfo,
        peers: &[SocketAddr],
    ) -> Result<Bytes, ClientError> {
        let mut pieces: Vec<Option<Bytes>> = vec![None; info.piece_count() as usize];
        if pieces.is_empty() {
            return Ok(Bytes::new());
        }

        let mut attempts = self.attempts(peers)?;
        while let Some(addr) = attempts.next().await {
            match self.fill_from(addr, info, &mut pieces).await {
                Ok(()) => {
                    let mut out = BytesMut::with_capacity(info.total_length as usize);
                    for piece in pieces.iter().flatten() {
                        out.extend_from_slice(piece);
                    }
                    info!("downloaded {} ({} bytes)", info.name, out.len());
                    return Ok(out.freeze());
                }
                Err(e) => attempts.failed(addr, e),
            }
        }
        Err(attempts.exhausted())
    }

    fn attempts<'a>(&self, peers: &'a [SocketAddr]) -> Result<Attempts<'a>, ClientError> {
        if peers.is_empty() {
            return Err(ClientError::NoPeers);
        }
        Ok(Attempts::new(
            peers,
            self.config.max_retries,
            self.config.retry_delay,
        ))
    }

    /// Connects and completes the handshake.
    async fn open(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
    ) -> Result<PeerSession<C::Stream>, PeerError> {
        debug!("connecting to {}", addr);
        let stream = timeout(self.config.connect_timeout, self.connector.connect(addr))
            .await
            .map_err(|_| PeerError::Timeout(Phase::Connect))??;

        let mut session =
            PeerSession::new(stream, addr, info_hash, self.peer_id, self.config.clone());
        session.handshake().await?;
        Ok(session)
    }

    async fn piece_from(
        &self,
        addr: SocketAddr,
        info: &TorrentInfo,
        index: u32,
    ) -> Result<Bytes, PeerError> {
        let mut session = self.open(addr, info.info_hash).await?;
        let piece = session.download_piece(info, index).await?;
        finish(&mut session).await;
        Ok(piece)
    }

    async fn metadata_from(
        &self,
        addr: SocketAddr,
        info_hash: InfoHash,
    ) -> Result<TorrentInfo, PeerError> {
        let mut session = self.open(addr, info_hash).await?;
        let info = session.fetch_metadata().await?;
        finish(&mut session).await;
        Ok(info)
    }

    async fn fill_from(
        &self,
        addr: SocketAddr,
        info: &TorrentInfo,
        pieces: &mut [Option<Bytes>],
    ) -> Result<(), PeerError> {
        let mut session = self.open(addr, info.info_hash).await?;
        for (index, slot) in pieces.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            *slot = Some(session.download_piece(info, index as u32).await?);
        }
        finish(&mut session).await;
        Ok(())
    }
}

/// Closes a session whose work is done. A failed shutdown does not undo the
/// result, so it is only logged.
async fn finish<S: AsyncRead + AsyncWrite + Unpin>(session: &mut PeerSession<S>) {
    if let Err(e) = session.close().await {
        debug!("closing session with {}: {}", session.addr(), e);
    }
}

/// Walks the peer list, handing out one address per attempt.
struct Attempts<'a> {
    peers: &'a [SocketAddr],
    max_retries: u32,
    retry_delay: Duration,
    current: usize,
    tries: u32,
    made: u32,
    last: Option<PeerError>,
}

impl<'a> Attempts<'a> {
    fn new(peers: &'a [SocketAddr], max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            peers,
            max_retries: max_retries.max(1),
            retry_delay,
            current: 0,
            tries: 0,
            made: 0,
            last: None,
        }
    }

    /// The address for the next attempt, after the retry delay if it
    /// repeats the previous one. `None` once every peer is used up.
    async fn next(&mut self) -> Option<SocketAddr> {
        if self.tries >= self.max_retries {
            self.current += 1;
            self.tries = 0;
        }
        let addr = *self.peers.get(self.current)?;
        if self.tries > 0 {
            sleep(self.retry_delay).await;
        }
        self.tries += 1;
        self.made += 1;
        Some(addr)
    }

    fn failed(&mut self, addr: SocketAddr, err: PeerError) {
        warn!(
            "attempt {}/{} with {} failed: {}",
            self.tries, self.max_retries, addr, err
        );
        if err.kind() == ErrorKind::ProtocolViolation {
            // Asking the same peer again gets the same answer.
            self.tries = self.max_retries;
        }
        self.last = Some(err);
    }

    fn exhausted(self) -> ClientError {
        match self.last {
            Some(last) => ClientError::PeersExhausted {
                attempts: self.made,
                last,
            },
            None => ClientError::NoPeers,
        }
    }
}
