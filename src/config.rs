//! Per-session tuning.

use std::time::Duration;

use crate::constants::{
    CONNECTION_TIMEOUT, HANDSHAKE_TIMEOUT, MAX_IN_FLIGHT, MAX_MESSAGE_SIZE,
    MAX_PEER_RETRY_ATTEMPTS, METADATA_FETCH_TIMEOUT, PEER_RETRY_DELAY, PIECE_TIMEOUT,
    REQUEST_BATCH, UNCHOKE_TIMEOUT,
};

/// Timeouts, pipelining limits and retry policy for peer sessions.
///
/// Every wait a [`PeerSession`](crate::peer::PeerSession) performs has its
/// own deadline here; the retry fields are only read by [`Client`](crate::Client).
///
/// ```
/// use std::time::Duration;
/// use btwire::SessionConfig;
///
/// let config = SessionConfig {
///     piece_timeout: Duration::from_secs(10),
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.request_batch, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub unchoke_timeout: Duration,
    /// Deadline for all blocks of one piece, measured from the first request.
    pub piece_timeout: Duration,
    /// Deadline for the whole metadata exchange.
    pub metadata_timeout: Duration,
    /// REQUEST messages encoded locally before they are written out.
    pub request_batch: usize,
    /// Block requests outstanding at once.
    pub max_in_flight: usize,
    /// Largest frame accepted from a peer.
    pub max_message_len: usize,
    /// Attempts per peer address.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECTION_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            unchoke_timeout: UNCHOKE_TIMEOUT,
            piece_timeout: PIECE_TIMEOUT,
            metadata_timeout: METADATA_FETCH_TIMEOUT,
            request_batch: REQUEST_BATCH,
            max_in_flight: MAX_IN_FLIGHT,
            max_message_len: MAX_MESSAGE_SIZE,
            max_retries: MAX_PEER_RETRY_ATTEMPTS,
            retry_delay: PEER_RETRY_DELAY,
        }
    }
}
