use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, trace};

use super::assembler::{BlockOutcome, PieceAssembler};
use super::bitfield::Bitfield;
use super::error::{PeerError, Phase};
use super::framer::{Frame, MessageFramer};
use super::handshake::Handshake;
use super::message::Message;
use super::metadata::{MetadataExchange, MetadataStep};
use super::peer_id::PeerId;
use super::scheduler::{BlockScheduler, RequestPipeline};
use crate::config::SessionConfig;
use crate::constants::MAX_METADATA_SIZE;
use crate::metainfo::{InfoHash, TorrentInfo};

/// Upper bound on the piece count before the info dictionary is known: a
/// metadata blob of at most `MAX_METADATA_SIZE` cannot carry more hashes.
const MAX_METADATA_PIECES: u32 = (MAX_METADATA_SIZE / 20) as u32;

/// Where a session is in its lifecycle.
///
/// States only move forward, except that any error moves the session to
/// `Failed` and a finished piece leaves it ready for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    HandshakeSent,
    HandshakeReceived,
    InterestedSent,
    Unchoked,
    Requesting,
    PieceComplete,
    Done,
    Failed,
}

/// What the remote side has shown us so far. Never goes backwards, even
/// when the peer chokes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Pending,
    HandshakeReceived,
    UnchokeReceived,
}

/// One conversation with one remote peer over an established stream.
///
/// The session owns the stream, a [`MessageFramer`] fed from it, and the
/// piece assembler for this connection. Every read is bounded by the
/// deadline of the phase it serves, taken from [`SessionConfig`].
///
/// Works over any byte stream, so tests can drive it with an in-memory
/// pipe:
///
/// ```no_run
/// use btwire::peer::{PeerId, PeerSession};
/// use btwire::metainfo::TorrentInfo;
/// use btwire::SessionConfig;
/// use tokio::net::TcpStream;
///
/// # async fn example(info: TorrentInfo) -> Result<(), Box<dyn std::error::Error>> {
/// let addr = "192.168.1.100:6881".parse()?;
/// let stream = TcpStream::connect(addr).await?;
/// let mut session = PeerSession::new(
///     stream,
///     addr,
///     info.info_hash,
///     PeerId::generate(),
///     SessionConfig::default(),
/// );
///
/// session.handshake().await?;
/// let piece = session.download_piece(&info, 0).await?;
/// assert_eq!(piece.len() as u32, info.piece_length);
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct PeerSession<S> {
    stream: S,
    addr: SocketAddr,
    info_hash: InfoHash,
    peer_id: PeerId,
    config: SessionConfig,
    framer: MessageFramer,
    state: SessionState,
    connection: ConnectionState,
    am_interested: bool,
    peer_choking: bool,
    remote: Option<Handshake>,
    availability: Option<Bitfield>,
    piece_limit: u32,
    assembler: PieceAssembler,
    downloaded: u64,
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        info_hash: InfoHash,
        peer_id: PeerId,
        config: SessionConfig,
    ) -> Self {
        let framer = MessageFramer::new().with_max_len(config.max_message_len);
        Self {
            stream,
            addr,
            info_hash,
            peer_id,
            config,
            framer,
            state: SessionState::Connecting,
            connection: ConnectionState::Pending,
            am_interested: false,
            peer_choking: true,
            remote: None,
            availability: None,
            piece_limit: MAX_METADATA_PIECES,
            assembler: PieceAssembler::new(),
            downloaded: 0,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// The peer's handshake, once received.
    pub fn remote_handshake(&self) -> Option<&Handshake> {
        self.remote.as_ref()
    }

    pub fn is_choked(&self) -> bool {
        self.peer_choking
    }

    /// Pieces the peer has declared through BITFIELD or HAVE, if any.
    pub fn availability(&self) -> Option<&Bitfield> {
        self.availability.as_ref()
    }

    /// Piece bytes received and verified on this session.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Sends our handshake and waits for the peer's.
    ///
    /// # Errors
    ///
    /// [`PeerError::InfoHashMismatch`] if the peer serves another torrent,
    /// [`PeerError::InvalidHandshake`] if its first bytes are not a
    /// handshake, and [`PeerError::Timeout`] after the handshake timeout.
    #[instrument(skip(self), fields(peer = %self.addr))]
    pub async fn handshake(&mut self) -> Result<Handshake, PeerError> {
        let result = self.exchange_handshakes().await;
        self.track(result)
    }

    /// Sends INTERESTED.
    #[instrument(skip(self), fields(peer = %self.addr))]
    pub async fn express_interest(&mut self) -> Result<(), PeerError> {
        let result = self.send_interested().await;
        self.track(result)
    }

    /// Reads messages until the peer unchokes us.
    #[instrument(skip(self), fields(peer = %self.addr))]
    pub async fn wait_for_unchoke(&mut self) -> Result<(), PeerError> {
        let result = self.await_unchoke().await;
        self.track(result)
    }

    /// Downloads piece `index` and returns it once its hash verifies.
    ///
    /// Sends INTERESTED and waits for an unchoke first if that has not
    /// happened yet. Block requests are kept at most
    /// [`SessionConfig::max_in_flight`] deep and written in batches of
    /// [`SessionConfig::request_batch`]. If the peer chokes us mid-piece the
    /// outstanding requests are re-sent after the next unchoke.
    ///
    /// # Errors
    ///
    /// - [`PeerError::PieceUnavailable`] if the peer declared its pieces and
    ///   this one is not among them.
    /// - [`PeerError::VerificationFailed`] if the assembled piece does not
    ///   match its hash. The data is dropped.
    /// - [`PeerError::Timeout`] if the piece is not complete within the
    ///   piece timeout.
    #[instrument(skip(self, info), fields(peer = %self.addr))]
    pub async fn download_piece(
        &mut self,
        info: &TorrentInfo,
        index: u32,
    ) -> Result<Bytes, PeerError> {
        let result = self.fetch_piece(info, index).await;
        if result.is_err() {
            self.assembler.forget(index);
        }
        self.track(result)
    }

    /// Fetches the info dictionary from the peer with `ut_metadata`.
    ///
    /// Requires a completed handshake in which the peer set the extension
    /// protocol bit. The returned metadata has been checked against the
    /// session's info hash.
    #[instrument(skip(self), fields(peer = %self.addr))]
    pub async fn fetch_metadata(&mut self) -> Result<TorrentInfo, PeerError> {
        let result = self.exchange_metadata().await;
        self.track(result)
    }

    /// Shuts down the write half of the stream and ends the session.
    pub async fn close(&mut self) -> Result<(), PeerError> {
        if self.state != SessionState::Failed {
            self.state = SessionState::Done;
        }
        self.stream.shutdown().await?;
        debug!("closed session with {}", self.addr);
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T, PeerError>) -> Result<T, PeerError> {
        if let Err(e) = &result {
            debug!("session with {} failed in {:?}: {}", self.addr, self.state, e);
            self.state = SessionState::Failed;
        }
        result
    }

    fn ensure_usable(&self) -> Result<(), PeerError> {
        match self.state {
            SessionState::Failed => Err(PeerError::ProtocolViolation(
                "session has already failed".into(),
            )),
            SessionState::Done => Err(PeerError::ProtocolViolation("session is closed".into())),
            _ => Ok(()),
        }
    }

    fn ensure_handshaken(&self, what: &str) -> Result<(), PeerError> {
        self.ensure_usable()?;
        if self.state < SessionState::HandshakeReceived {
            return Err(PeerError::ProtocolViolation(format!(
                "{what} before handshake"
            )));
        }
        Ok(())
    }

    async fn exchange_handshakes(&mut self) -> Result<Handshake, PeerError> {
        self.ensure_usable()?;
        if self.state != SessionState::Connecting {
            return Err(PeerError::ProtocolViolation("handshake already sent".into()));
        }

        let deadline = Instant::now() + self.config.handshake_timeout;
        let ours = Handshake::new(self.info_hash, self.peer_id);
        self.write_within(&ours.encode(), deadline, Phase::Handshake)
            .await?;
        self.state = SessionState::HandshakeSent;

        let theirs = loop {
            match self.framer.next_frame()? {
                Some(Frame::Handshake(hs)) => break hs,
                Some(Frame::Message(msg)) => {
                    return Err(PeerError::ProtocolViolation(format!(
                        "{} before handshake",
                        msg.name()
                    )))
                }
                None => self.fill(deadline, Phase::Handshake).await?,
            }
        };

        if theirs.info_hash != self.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        debug!(
            "handshake with {} complete, peer id {}, extensions: {}",
            self.addr,
            theirs.peer_id,
            theirs.supports_extension_protocol()
        );
        self.state = SessionState::HandshakeReceived;
        self.advance_connection(ConnectionState::HandshakeReceived);
        self.remote = Some(theirs.clone());
        Ok(theirs)
    }

    async fn send_interested(&mut self) -> Result<(), PeerError> {
        self.ensure_handshaken("INTERESTED")?;
        let deadline = Instant::now() + self.config.unchoke_timeout;
        self.write_within(&Message::Interested.encode(), deadline, Phase::Unchoke)
            .await?;
        self.am_interested = true;
        if self.state == SessionState::HandshakeReceived {
            self.state = SessionState::InterestedSent;
        }
        Ok(())
    }

    async fn await_unchoke(&mut self) -> Result<(), PeerError> {
        self.ensure_handshaken("unchoke wait")?;
        if !self.am_interested {
            return Err(PeerError::ProtocolViolation(
                "waiting for unchoke without INTERESTED".into(),
            ));
        }

        let deadline = Instant::now() + self.config.unchoke_timeout;
        while self.peer_choking {
            let msg = self.next_message(deadline, Phase::Unchoke).await?;
            if let Message::Piece(block) = msg {
                debug!(
                    "ignoring block for piece {} while choked",
                    block.piece
                );
            }
        }
        Ok(())
    }

    async fn fetch_piece(&mut self, info: &TorrentInfo, index: u32) -> Result<Bytes, PeerError> {
        self.ensure_handshaken("REQUEST")?;
        if info.info_hash != self.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        let (length, hash) = match (info.piece_size(index), info.piece_hash(index)) {
            (Some(length), Some(hash)) => (length, *hash),
            _ => {
                return Err(PeerError::ProtocolViolation(format!(
                    "piece {index} is out of range"
                )))
            }
        };
        self.piece_limit = info.piece_count();

        if !self.am_interested {
            self.send_interested().await?;
        }
        if self.peer_choking {
            self.await_unchoke().await?;
        }
        if let Some(bits) = &self.availability {
            if !bits.has_piece(index) {
                return Err(PeerError::PieceUnavailable { piece: index });
            }
        }

        let mut scheduler = BlockScheduler::new(index, length);
        let mut pipeline = RequestPipeline::new(self.config.request_batch);
        let max_in_flight = self.config.max_in_flight.max(1);
        self.assembler.expect(index, length, hash);
        self.state = SessionState::Requesting;
        debug!(
            "requesting piece {} ({} bytes, {} blocks)",
            index,
            length,
            scheduler.block_count()
        );

        let deadline = Instant::now() + self.config.piece_timeout;
        loop {
            if !self.peer_choking {
                while scheduler.in_flight() < max_in_flight {
                    let Some(req) = scheduler.next_request() else {
                        break;
                    };
                    if pipeline.push(req) {
                        self.flush(&mut pipeline, deadline).await?;
                    }
                }
                self.flush(&mut pipeline, deadline).await?;
            }

            match self.next_message(deadline, Phase::Piece).await? {
                Message::Piece(block) => {
                    if block.piece != index || !scheduler.complete(&block) {
                        debug!(
                            "unsolicited block for piece {} at offset {}",
                            block.piece, block.offset
                        );
                        continue;
                    }
                    match self.assembler.add_block(block)? {
                        BlockOutcome::Complete(data) => {
                            self.downloaded += data.len() as u64;
                            self.state = SessionState::PieceComplete;
                            info!("piece {} verified from {}", index, self.addr);
                            return Ok(data);
                        }
                        outcome => trace!("block stored: {:?}", outcome),
                    }
                }
                Message::Choke => {
                    let requeued = scheduler.requeue_in_flight();
                    debug!("choked mid-piece, {} requests requeued", requeued);
                }
                _ => {}
            }
        }
    }

    async fn exchange_metadata(&mut self) -> Result<TorrentInfo, PeerError> {
        self.ensure_handshaken("metadata request")?;
        let supported = self
            .remote
            .as_ref()
            .is_some_and(Handshake::supports_extension_protocol);
        if !supported {
            return Err(PeerError::MetadataUnsupported);
        }

        let deadline = Instant::now() + self.config.metadata_timeout;
        let mut exchange = MetadataExchange::new(self.info_hash);
        let hello = exchange.handshake_message();
        self.write_within(&hello.encode(), deadline, Phase::Metadata)
            .await?;

        loop {
            let Message::Extended { id, payload } =
                self.next_message(deadline, Phase::Metadata).await?
            else {
                continue;
            };

            match exchange.on_extended(id, &payload)? {
                MetadataStep::Wait => {}
                MetadataStep::Send(messages) => {
                    let mut buf = BytesMut::new();
                    for msg in &messages {
                        msg.encode_into(&mut buf);
                    }
                    self.write_within(&buf, deadline, Phase::Metadata).await?;
                }
                MetadataStep::Complete(info) => {
                    self.piece_limit = info.piece_count();
                    return Ok(info);
                }
            }
        }
    }

    async fn flush(
        &mut self,
        pipeline: &mut RequestPipeline,
        deadline: Instant,
    ) -> Result<(), PeerError> {
        if let Some(batch) = pipeline.take() {
            trace!("writing {} bytes of requests", batch.len());
            self.write_within(&batch, deadline, Phase::Piece).await?;
        }
        Ok(())
    }

    /// Returns the next message, after applying its effect on choke state
    /// and availability.
    async fn next_message(&mut self, deadline: Instant, phase: Phase) -> Result<Message, PeerError> {
        loop {
            match self.framer.next_frame()? {
                Some(Frame::Message(msg)) => {
                    trace!("received {} from {}", msg.name(), self.addr);
                    self.observe(&msg);
                    return Ok(msg);
                }
                Some(Frame::Handshake(_)) => {
                    return Err(PeerError::ProtocolViolation("second handshake".into()))
                }
                None => self.fill(deadline, phase).await?,
            }
        }
    }

    async fn fill(&mut self, deadline: Instant, phase: Phase) -> Result<(), PeerError> {
        let n = timeout_at(deadline, self.stream.read_buf(self.framer.buffer_mut()))
            .await
            .map_err(|_| PeerError::Timeout(phase))??;
        if n == 0 {
            return Err(PeerError::ConnectionClosed);
        }
        Ok(())
    }

    async fn write_within(
        &mut self,
        bytes: &[u8],
        deadline: Instant,
        phase: Phase,
    ) -> Result<(), PeerError> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        timeout_at(deadline, write)
            .await
            .map_err(|_| PeerError::Timeout(phase))??;
        Ok(())
    }

    fn observe(&mut self, msg: &Message) {
        match msg {
            Message::Choke => self.on_choke(),
            Message::Unchoke => self.on_unchoke(),
            Message::Have { piece } => self.on_have(*piece),
            Message::Bitfield(bits) => self.on_bitfield(bits),
            Message::Request(req) => {
                trace!("ignoring request for piece {} (not seeding)", req.piece)
            }
            Message::Unknown { id, payload } => {
                debug!("discarding unknown message id {} ({} bytes)", id, payload.len())
            }
            _ => {}
        }
    }

    fn on_choke(&mut self) {
        self.peer_choking = true;
        if self.state == SessionState::Unchoked {
            self.state = if self.am_interested {
                SessionState::InterestedSent
            } else {
                SessionState::HandshakeReceived
            };
        }
    }

    fn on_unchoke(&mut self) {
        self.peer_choking = false;
        self.advance_connection(ConnectionState::UnchokeReceived);
        if matches!(
            self.state,
            SessionState::HandshakeReceived | SessionState::InterestedSent
        ) {
            self.state = SessionState::Unchoked;
        }
    }

    fn on_have(&mut self, piece: u32) {
        let limit = self.piece_limit;
        if piece >= limit {
            debug!("dropping HAVE for piece {} (limit {})", piece, limit);
            return;
        }
        self.availability
            .get_or_insert_with(Bitfield::default)
            .set_piece(piece, limit);
    }

    fn on_bitfield(&mut self, bits: &Bytes) {
        let bitfield = Bitfield::from_bytes(bits);
        debug!("peer {} has {} pieces", self.addr, bitfield.count());
        self.availability = Some(bitfield);
    }

    fn advance_connection(&mut self, to: ConnectionState) {
        self.connection = self.connection.max(to);
    }
}
