use super::*;
use crate::bencode::Value;
use crate::config::SessionConfig;
use crate::constants::BLOCK_SIZE;
use crate::metainfo::{sha1_digest, InfoHash, TorrentInfo};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1, id2);
    assert_eq!(id1.client_id(), Some("BW0001"));
    assert!(PeerId::from_bytes(&[0u8; 19]).is_none());
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::default();
    assert!(bf.is_empty());
    assert!(!bf.has_piece(9));

    assert!(bf.set_piece(9, 10));
    assert_eq!(bf.as_bytes().len(), 2);
    assert!(bf.has_piece(9));
    assert_eq!(bf.count(), 1);

    assert!(bf.set_piece(20, 21));
    assert_eq!(bf.as_bytes().len(), 3);
    assert!(bf.has_piece(20));
    assert!(!bf.has_piece(100));

    assert!(!bf.set_piece(21, 21));
    assert!(!bf.set_piece(u32::MAX, 21));
    assert_eq!(bf.as_bytes().len(), 3);
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_bitfield_from_bytes() {
    let bf = Bitfield::from_bytes(&Bytes::from_static(&[0x80, 0x01]));
    assert!(bf.has_piece(0));
    assert!(!bf.has_piece(1));
    assert!(bf.has_piece(15));
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_handshake_encode_decode() {
    let info_hash = InfoHash::from([1u8; 20]);
    let peer_id = PeerId([2u8; 20]);

    let handshake = Handshake::new(info_hash, peer_id);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), 68);
    assert_eq!(encoded[25] & 0x10, 0x10);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded, handshake);
    assert!(decoded.supports_extension_protocol());
}

#[test]
fn test_handshake_recognition() {
    let encoded = Handshake::new(InfoHash::from([1u8; 20]), PeerId([2u8; 20])).encode();
    assert!(Handshake::recognize(&encoded));
    assert!(!Handshake::recognize(&encoded[..67]));

    let mut wrong_case = encoded.to_vec();
    wrong_case[1] = b'b';
    assert!(!Handshake::recognize(&wrong_case));
    assert!(!Handshake::could_become(&wrong_case[..5]));

    let mut wrong_length = encoded.to_vec();
    wrong_length[0] = 18;
    assert!(!Handshake::recognize(&wrong_length));
    assert!(!Handshake::could_become(&wrong_length[..1]));
    assert!(Handshake::decode(&wrong_length).is_err());

    assert!(Handshake::could_become(&[]));
    assert!(Handshake::could_become(&encoded[..10]));
    assert!(!Handshake::could_become(b"GET / HTTP/1.1"));

    let mut long = encoded.to_vec();
    long.extend_from_slice(&[0, 0, 0, 1, 1]);
    assert_eq!(Handshake::decode(&long).unwrap().info_hash, InfoHash::from([1u8; 20]));
}

#[test]
fn test_message_decode() {
    let have = Message::Have { piece: 42 }.encode();
    assert_eq!(&have[..], &[0, 0, 0, 5, 4, 0, 0, 0, 42]);
    assert_eq!(
        Message::decode(have.slice(4..)).unwrap(),
        Message::Have { piece: 42 }
    );

    let req = Message::Request(BlockRequest::new(1, BLOCK_SIZE, BLOCK_SIZE)).encode();
    assert_eq!(req.len(), REQUEST_FRAME_LEN);

    let piece = Message::Piece(Block::new(3, 0, Bytes::from_static(b"data")));
    assert_eq!(Message::decode(piece.encode().slice(4..)).unwrap(), piece);

    assert_eq!(Message::decode(Bytes::new()).unwrap(), Message::KeepAlive);
}

#[test]
fn test_message_decode_rejects_bad_lengths() {
    for body in [
        &[4u8, 0, 0, 1][..],
        &[6, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0][..],
        &[0, 1][..],
        &[7, 0, 0, 0, 1][..],
        &[20][..],
    ] {
        let err = Message::decode(Bytes::copy_from_slice(body)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode, "body {body:?}");
    }
}

#[test]
fn test_unknown_message_id() {
    let msg = Message::decode(Bytes::from_static(&[99, 1, 2])).unwrap();
    assert_eq!(
        msg,
        Message::Unknown {
            id: 99,
            payload: Bytes::from_static(&[1, 2])
        }
    );
}

fn sample_stream() -> (Vec<u8>, Vec<Frame>) {
    let hs = Handshake::new(InfoHash::from([7u8; 20]), PeerId([8u8; 20]));
    let messages = vec![
        Message::Bitfield(Bytes::from_static(&[0xff, 0x80])),
        Message::Unchoke,
        Message::KeepAlive,
        Message::Unknown {
            id: 99,
            payload: Bytes::from_static(b"xyz"),
        },
        Message::Piece(Block::new(1, BLOCK_SIZE, Bytes::from_static(b"hello"))),
        Message::KeepAlive,
        Message::Have { piece: 3 },
    ];

    let mut stream = hs.encode().to_vec();
    for m in &messages {
        stream.extend_from_slice(&m.encode());
    }

    let expected = std::iter::once(Frame::Handshake(hs))
        .chain(
            messages
                .into_iter()
                .filter(|m| *m != Message::KeepAlive)
                .map(Frame::Message),
        )
        .collect();
    (stream, expected)
}

#[test]
fn test_framer_reassembles_fixed_chunks() {
    let (stream, expected) = sample_stream();

    for chunk in [1, 2, 3, 5, 67, 68, 69, stream.len()] {
        let mut framer = MessageFramer::new();
        let mut got = Vec::new();
        for part in stream.chunks(chunk) {
            framer.extend(part);
            while let Some(frame) = framer.next_frame().unwrap() {
                got.push(frame);
            }
        }
        assert_eq!(got, expected, "chunk size {chunk}");
        assert_eq!(framer.buffered(), 0);
    }
}

#[test]
fn test_framer_reassembles_every_split_point() {
    let (stream, expected) = sample_stream();

    for split in 0..=stream.len() {
        let mut framer = MessageFramer::new();
        framer.extend(&stream[..split]);
        let mut got: Vec<Frame> = framer.frames().collect::<Result<_, _>>().unwrap();
        framer.extend(&stream[split..]);
        got.extend(framer.frames().map(Result::unwrap));
        assert_eq!(got, expected, "split at {split}");
    }
}

#[test]
fn test_framer_handshake_and_message_in_one_delivery() {
    let hs = Handshake::new(InfoHash::from([3u8; 20]), PeerId([4u8; 20]));
    let mut bytes = hs.encode().to_vec();
    bytes.extend_from_slice(&Message::Unchoke.encode());

    let mut framer = MessageFramer::new();
    framer.extend(&bytes);
    assert!(framer.is_awaiting_handshake());
    assert_eq!(framer.next_frame().unwrap(), Some(Frame::Handshake(hs)));
    assert!(!framer.is_awaiting_handshake());
    assert_eq!(
        framer.next_frame().unwrap(),
        Some(Frame::Message(Message::Unchoke))
    );
    assert_eq!(framer.next_frame().unwrap(), None);
}

#[test]
fn test_framer_rejects_non_handshake() {
    let mut framer = MessageFramer::new();
    framer.extend(&[19]);
    framer.extend(b"BitTorrent");
    assert_eq!(framer.next_frame().unwrap(), None);

    let mut framer = MessageFramer::new();
    framer.extend(b"HTTP/1.1 200 OK\r\n");
    assert!(matches!(
        framer.next_frame(),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_framer_without_handshake() {
    let mut framer = MessageFramer::without_handshake();
    assert!(!framer.is_awaiting_handshake());

    framer.extend(&Message::Interested.encode());
    framer.extend(&Message::Have { piece: 9 }.encode());
    let got: Vec<Frame> = framer.frames().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        got,
        vec![
            Frame::Message(Message::Interested),
            Frame::Message(Message::Have { piece: 9 }),
        ]
    );
}

#[test]
fn test_framer_rejects_oversized_frame() {
    let mut framer = MessageFramer::without_handshake().with_max_len(1024);
    framer.extend(&2048u32.to_be_bytes());
    assert!(matches!(
        framer.next_frame(),
        Err(PeerError::MessageTooLarge {
            len: 2048,
            max: 1024
        })
    ));
}

#[test]
fn test_framer_only_keep_alives() {
    let mut framer = MessageFramer::without_handshake();
    framer.extend(&[0; 12]);
    assert_eq!(framer.next_frame().unwrap(), None);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn test_error_kinds() {
    assert_eq!(PeerError::ConnectionClosed.kind(), ErrorKind::Transport);
    assert_eq!(PeerError::InvalidHandshake.kind(), ErrorKind::Decode);
    assert_eq!(PeerError::InfoHashMismatch.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(
        PeerError::PieceUnavailable { piece: 1 }.kind(),
        ErrorKind::ProtocolViolation
    );
    assert_eq!(
        PeerError::VerificationFailed { piece: 1 }.kind(),
        ErrorKind::Verification
    );
    assert_eq!(PeerError::Timeout(Phase::Piece).kind(), ErrorKind::Timeout);
    assert_eq!(PeerError::Timeout(Phase::Unchoke).to_string(), "timed out waiting for unchoke");
}

// In-memory sessions. The test body plays the remote peer over the other
// half of a duplex pipe.

const EXTENSIONS: [u8; 8] = [0, 0, 0, 0, 0, 0x10, 0, 0];

struct FakePeer {
    stream: DuplexStream,
    framer: MessageFramer,
}

impl FakePeer {
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.framer.next_frame().unwrap() {
                return Some(frame);
            }
            match self.stream.read_buf(self.framer.buffer_mut()).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn recv_message(&mut self) -> Message {
        match self.recv().await {
            Some(Frame::Message(msg)) => msg,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes).await;
    }

    async fn send_message(&mut self, msg: Message) {
        self.send(&msg.encode()).await;
    }

    /// Reads the session's handshake and answers with `info_hash`.
    async fn accept(&mut self, info_hash: InfoHash, reserved: [u8; 8]) -> Handshake {
        let theirs = match self.recv().await {
            Some(Frame::Handshake(hs)) => hs,
            other => panic!("expected handshake, got {other:?}"),
        };
        let mut reply = Handshake::new(info_hash, PeerId([9u8; 20]));
        reply.reserved = reserved;
        self.send(&reply.encode()).await;
        theirs
    }

    fn block(&self, data: &[u8], piece_length: u32, req: BlockRequest) -> Message {
        let start = req.piece as usize * piece_length as usize + req.offset as usize;
        let end = start + req.length as usize;
        Message::Piece(Block::new(
            req.piece,
            req.offset,
            Bytes::copy_from_slice(&data[start..end]),
        ))
    }

    /// Unchokes on INTERESTED and answers every request until the session
    /// hangs up.
    async fn serve(mut self, data: Vec<u8>, piece_length: u32) {
        while let Some(frame) = self.recv().await {
            match frame {
                Frame::Message(Message::Interested) => self.send_message(Message::Unchoke).await,
                Frame::Message(Message::Request(req)) => {
                    let msg = self.block(&data, piece_length, req);
                    self.send_message(msg).await;
                }
                _ => {}
            }
        }
    }
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

fn torrent_for(data: &[u8], piece_length: u32) -> TorrentInfo {
    let pieces: Vec<u8> = data
        .chunks(piece_length as usize)
        .flat_map(sha1_digest)
        .collect();
    let info = Value::dict([
        ("name", Value::string("sample.bin")),
        ("length", Value::Integer(data.len() as i64)),
        ("piece length", Value::Integer(piece_length as i64)),
        ("pieces", Value::Bytes(Bytes::from(pieces))),
    ]);
    TorrentInfo::from_info_value(&info).unwrap()
}

fn session_pair(
    info_hash: InfoHash,
    config: SessionConfig,
) -> (PeerSession<DuplexStream>, FakePeer) {
    let (ours, theirs) = tokio::io::duplex(1 << 20);
    let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
    let session = PeerSession::new(ours, addr, info_hash, PeerId::generate(), config);
    let peer = FakePeer {
        stream: theirs,
        framer: MessageFramer::new(),
    };
    (session, peer)
}

#[tokio::test]
async fn test_session_handshake() {
    let info_hash = InfoHash::from([5u8; 20]);
    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    assert_eq!(session.state(), SessionState::Connecting);

    let remote = tokio::spawn(async move { peer.accept(info_hash, EXTENSIONS).await });
    let theirs = session.handshake().await.unwrap();
    let ours = remote.await.unwrap();

    assert_eq!(ours.info_hash, info_hash);
    assert!(ours.supports_extension_protocol());
    assert_eq!(theirs.peer_id, PeerId([9u8; 20]));
    assert_eq!(session.state(), SessionState::HandshakeReceived);
    assert_eq!(session.connection_state(), ConnectionState::HandshakeReceived);
    assert!(session.is_choked());
}

#[tokio::test]
async fn test_session_info_hash_mismatch() {
    let (mut session, mut peer) = session_pair(InfoHash::from([5u8; 20]), SessionConfig::default());

    tokio::spawn(async move {
        peer.accept(InfoHash::from([6u8; 20]), EXTENSIONS).await;
        peer
    });
    let err = session.handshake().await.unwrap_err();
    assert!(matches!(err, PeerError::InfoHashMismatch));
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_session_rejects_garbage_handshake() {
    let (mut session, mut peer) = session_pair(InfoHash::from([5u8; 20]), SessionConfig::default());

    tokio::spawn(async move {
        peer.send(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        peer
    });
    let err = session.handshake().await.unwrap_err();
    assert!(matches!(err, PeerError::InvalidHandshake));
}

#[tokio::test]
async fn test_session_interest_before_handshake() {
    let (mut session, _peer) = session_pair(InfoHash::from([5u8; 20]), SessionConfig::default());
    let err = session.express_interest().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_session_downloads_pieces() {
    // Two pieces: 4 full blocks, then a short piece of 20,000 bytes.
    let piece_length = 4 * BLOCK_SIZE;
    let data = sample_data(piece_length as usize + 20_000);
    let info = torrent_for(&data, piece_length);
    assert_eq!(info.piece_size(1), Some(20_000));

    let (mut session, mut peer) = session_pair(info.info_hash, SessionConfig::default());
    let info_hash = info.info_hash;
    let served = data.clone();
    let remote = tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        peer.send_message(Message::Unknown {
            id: 77,
            payload: Bytes::from_static(b"future"),
        })
        .await;
        peer.send_message(Message::KeepAlive).await;
        peer.serve(served, piece_length).await;
    });

    session.handshake().await.unwrap();
    let first = session.download_piece(&info, 0).await.unwrap();
    assert_eq!(&first[..], &data[..piece_length as usize]);
    assert_eq!(session.state(), SessionState::PieceComplete);
    assert_eq!(session.connection_state(), ConnectionState::UnchokeReceived);

    let second = session.download_piece(&info, 1).await.unwrap();
    assert_eq!(&second[..], &data[piece_length as usize..]);
    assert_eq!(session.downloaded(), data.len() as u64);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Done);
    remote.await.unwrap();
}

#[tokio::test]
async fn test_session_tolerates_stray_blocks() {
    let piece_length = 2 * BLOCK_SIZE;
    let data = sample_data(2 * piece_length as usize);
    let info = torrent_for(&data, piece_length);

    let (mut session, mut peer) = session_pair(info.info_hash, SessionConfig::default());
    let info_hash = info.info_hash;
    let served = data.clone();
    let remote = tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        let mut strays = true;
        while let Some(frame) = peer.recv().await {
            match frame {
                Frame::Message(Message::Interested) => {
                    // Garbage for the wanted block while still choked.
                    let junk = Bytes::from(vec![0xaau8; BLOCK_SIZE as usize]);
                    peer.send_message(Message::Piece(Block::new(0, 0, junk))).await;
                    peer.send_message(Message::Unchoke).await;
                }
                Frame::Message(Message::Request(req)) => {
                    if std::mem::take(&mut strays) {
                        let next_piece = BlockRequest::new(1, 0, BLOCK_SIZE);
                        let other = peer.block(&served, piece_length, next_piece);
                        peer.send_message(other).await;
                        let short = Bytes::from_static(b"short");
                        let short = Block::new(req.piece, req.offset, short);
                        peer.send_message(Message::Piece(short)).await;
                    }
                    let msg = peer.block(&served, piece_length, req);
                    peer.send_message(msg).await;
                }
                _ => {}
            }
        }
    });

    session.handshake().await.unwrap();
    let piece = session.download_piece(&info, 0).await.unwrap();
    assert_eq!(&piece[..], &data[..piece_length as usize]);
    assert_eq!(session.state(), SessionState::PieceComplete);
    assert_eq!(session.downloaded(), u64::from(piece_length));

    session.close().await.unwrap();
    remote.await.unwrap();
}

#[tokio::test]
async fn test_session_drops_out_of_range_have() {
    let piece_length = BLOCK_SIZE;
    let data = sample_data(piece_length as usize);
    let info = torrent_for(&data, piece_length);

    let (mut session, mut peer) = session_pair(info.info_hash, SessionConfig::default());
    let info_hash = info.info_hash;
    let served = data.clone();
    tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        peer.send_message(Message::Have { piece: u32::MAX }).await;
        peer.send_message(Message::Have { piece: 1 }).await;
        peer.send_message(Message::Have { piece: 0 }).await;
        peer.serve(served, piece_length).await;
    });

    session.handshake().await.unwrap();
    let piece = session.download_piece(&info, 0).await.unwrap();
    assert_eq!(&piece[..], &data[..]);

    let bits = session.availability().unwrap();
    assert_eq!(bits.as_bytes().len(), 1);
    assert_eq!(bits.count(), 1);
    assert!(bits.has_piece(0));
    assert!(!bits.has_piece(1));
}

#[tokio::test(start_paused = true)]
async fn test_session_bounds_requests_in_flight() {
    let piece_length = 12 * BLOCK_SIZE;
    let data = sample_data(piece_length as usize);
    let info = torrent_for(&data, piece_length);
    let info_hash = info.info_hash;

    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    let download = tokio::spawn(async move {
        session.handshake().await?;
        session.download_piece(&info, 0).await
    });

    peer.accept(info_hash, EXTENSIONS).await;
    assert_eq!(peer.recv_message().await, Message::Interested);
    peer.send_message(Message::Unchoke).await;

    let mut requests = Vec::new();
    for _ in 0..10 {
        match peer.recv_message().await {
            Message::Request(req) => requests.push(req),
            other => panic!("expected request, got {other:?}"),
        }
    }
    assert!(tokio::time::timeout(Duration::from_secs(1), peer.recv())
        .await
        .is_err());

    for req in requests {
        let msg = peer.block(&data, piece_length, req);
        peer.send_message(msg).await;
    }
    for _ in 0..2 {
        match peer.recv_message().await {
            Message::Request(req) => {
                let msg = peer.block(&data, piece_length, req);
                peer.send_message(msg).await;
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    let piece = download.await.unwrap().unwrap();
    assert_eq!(&piece[..], &data[..]);
}

#[tokio::test]
async fn test_session_requeues_on_choke() {
    let piece_length = 4 * BLOCK_SIZE;
    let data = sample_data(piece_length as usize);
    let info = torrent_for(&data, piece_length);
    let info_hash = info.info_hash;

    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    let download = tokio::spawn(async move {
        session.handshake().await?;
        session.download_piece(&info, 0).await
    });

    peer.accept(info_hash, EXTENSIONS).await;
    assert_eq!(peer.recv_message().await, Message::Interested);
    peer.send_message(Message::Unchoke).await;

    let mut first_round = Vec::new();
    for _ in 0..4 {
        if let Message::Request(req) = peer.recv_message().await {
            first_round.push(req);
        }
    }
    assert_eq!(first_round.len(), 4);

    let msg = peer.block(&data, piece_length, first_round[0]);
    peer.send_message(msg).await;
    peer.send_message(Message::Choke).await;
    peer.send_message(Message::Unchoke).await;

    let mut offsets = Vec::new();
    for _ in 0..3 {
        match peer.recv_message().await {
            Message::Request(req) => {
                offsets.push(req.offset);
                let msg = peer.block(&data, piece_length, req);
                peer.send_message(msg).await;
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
    assert_eq!(offsets, [BLOCK_SIZE, 2 * BLOCK_SIZE, 3 * BLOCK_SIZE]);

    let piece = download.await.unwrap().unwrap();
    assert_eq!(&piece[..], &data[..]);
}

#[tokio::test]
async fn test_session_verification_failure() {
    let piece_length = 2 * BLOCK_SIZE;
    let data = sample_data(piece_length as usize);
    let info = torrent_for(&data, piece_length);

    let mut corrupt = data.clone();
    corrupt[BLOCK_SIZE as usize + 5] ^= 0xff;

    let (mut session, mut peer) = session_pair(info.info_hash, SessionConfig::default());
    let info_hash = info.info_hash;
    tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        peer.serve(corrupt, piece_length).await;
    });

    session.handshake().await.unwrap();
    let err = session.download_piece(&info, 0).await.unwrap_err();
    assert!(matches!(err, PeerError::VerificationFailed { piece: 0 }));
    assert_eq!(err.kind(), ErrorKind::Verification);
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.downloaded(), 0);
}

#[tokio::test]
async fn test_session_piece_unavailable() {
    let piece_length = BLOCK_SIZE;
    let data = sample_data(2 * piece_length as usize);
    let info = torrent_for(&data, piece_length);

    let (mut session, mut peer) = session_pair(info.info_hash, SessionConfig::default());
    let info_hash = info.info_hash;
    tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        peer.send_message(Message::Bitfield(Bytes::from_static(&[0b0100_0000])))
            .await;
        peer.serve(data, piece_length).await;
    });

    session.handshake().await.unwrap();
    let err = session.download_piece(&info, 0).await.unwrap_err();
    assert!(matches!(err, PeerError::PieceUnavailable { piece: 0 }));
    assert!(session.availability().unwrap().has_piece(1));
}

#[tokio::test(start_paused = true)]
async fn test_session_unchoke_timeout() {
    let config = SessionConfig {
        unchoke_timeout: Duration::from_secs(5),
        ..SessionConfig::default()
    };
    let info_hash = InfoHash::from([5u8; 20]);
    let (mut session, mut peer) = session_pair(info_hash, config);
    tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        // Never unchoke; keep reading until the session goes away.
        while peer.recv().await.is_some() {}
    });

    session.handshake().await.unwrap();
    session.express_interest().await.unwrap();
    assert_eq!(session.state(), SessionState::InterestedSent);
    let err = session.wait_for_unchoke().await.unwrap_err();
    assert!(matches!(err, PeerError::Timeout(Phase::Unchoke)));
}

#[tokio::test]
async fn test_session_peer_hangs_up() {
    let info_hash = InfoHash::from([5u8; 20]);
    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    tokio::spawn(async move {
        peer.accept(info_hash, EXTENSIONS).await;
        peer.recv_message().await;
    });

    session.handshake().await.unwrap();
    session.express_interest().await.unwrap();
    let err = session.wait_for_unchoke().await.unwrap_err();
    assert!(matches!(err, PeerError::ConnectionClosed));
    assert_eq!(err.kind(), ErrorKind::Transport);
}

fn metadata_only_torrent() -> TorrentInfo {
    // 1,000 piece hashes make the info dictionary span two metadata pieces.
    let info = Value::dict([
        ("name", Value::string("remote.iso")),
        ("length", Value::Integer(1_000 * 16_384)),
        ("piece length", Value::Integer(16_384)),
        (
            "pieces",
            Value::Bytes(Bytes::from(
                (0..20_000).map(|i| (i % 241) as u8).collect::<Vec<_>>(),
            )),
        ),
    ]);
    TorrentInfo::from_info_value(&info).unwrap()
}

#[tokio::test]
async fn test_session_fetches_metadata() {
    let expected = metadata_only_torrent();
    let raw = expected.raw_info.clone();
    assert!(raw.len() > 16_384);
    let info_hash = expected.info_hash;

    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    let fetch = tokio::spawn(async move {
        session.handshake().await?;
        session.fetch_metadata().await
    });

    peer.accept(info_hash, EXTENSIONS).await;
    let our_id = match peer.recv_message().await {
        Message::Extended { id: 0, payload } => ExtensionHandshake::decode(&payload)
            .unwrap()
            .get_extension_id(UT_METADATA)
            .unwrap(),
        other => panic!("expected extension handshake, got {other:?}"),
    };

    let mut reply = ExtensionHandshake::with_extensions(&[(UT_METADATA, 3)]);
    reply.metadata_size = Some(raw.len() as i64);
    peer.send_message(reply.to_message()).await;

    for _ in 0..metadata_piece_count(raw.len()) {
        let request = match peer.recv_message().await {
            Message::Extended { id: 3, payload } => MetadataMessage::decode(&payload).unwrap(),
            other => panic!("expected metadata request, got {other:?}"),
        };
        assert_eq!(request.msg_type, MetadataMessageType::Request);

        let start = request.piece as usize * 16_384;
        let end = start + metadata_piece_size(request.piece, raw.len());
        let data = MetadataMessage::data(request.piece, raw.len() as u32, raw.slice(start..end));
        peer.send_message(Message::Extended {
            id: our_id,
            payload: data.encode(),
        })
        .await;
    }

    let info = fetch.await.unwrap().unwrap();
    assert_eq!(info.info_hash, info_hash);
    assert_eq!(info.raw_info, raw);
    assert_eq!(info.piece_count(), 1_000);
}

#[tokio::test]
async fn test_session_metadata_requires_extension_bit() {
    let info_hash = InfoHash::from([5u8; 20]);
    let (mut session, mut peer) = session_pair(info_hash, SessionConfig::default());
    tokio::spawn(async move {
        peer.accept(info_hash, [0; 8]).await;
        peer
    });

    session.handshake().await.unwrap();
    let err = session.fetch_metadata().await.unwrap_err();
    assert!(matches!(err, PeerError::MetadataUnsupported));
}
