//! btwire - BitTorrent peer wire engine
//!
//! Downloads verified pieces and torrent metadata directly from peers,
//! following BEP (BitTorrent Enhancement Proposals) specifications.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`metainfo`] - BEP-3/9 Torrent metainfo, info hashes, magnet links
//! - [`peer`] - BEP-3/9/10 Peer wire protocol, metadata exchange, piece download
//! - [`tracker`] - BEP-3/23 Announce URLs and response parsing
//! - [`client`] - Multi-peer downloads with retries

pub mod bencode;
pub mod client;
pub mod config;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use client::{Client, ClientError, Connector, TcpConnector};
pub use config::SessionConfig;
pub use metainfo::{File, InfoHash, MagnetLink, Metainfo, MetainfoError, TorrentInfo};
pub use peer::{
    Bitfield, Block, BlockRequest, ErrorKind, ExtensionHandshake, Handshake, Message,
    MessageFramer, PeerError, PeerId, PeerSession,
};
pub use tracker::{AnnounceRequest, AnnounceResponse, TrackerError, TrackerEvent};
