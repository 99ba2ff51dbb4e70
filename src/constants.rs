//! Protocol constants and tuning parameters.
//!
//! Wire-level values come from BEP-3, BEP-9 and BEP-10. Timeouts and
//! pipelining limits are the defaults used by [`SessionConfig`](crate::SessionConfig).

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-BW0001-";

/// Default BitTorrent listen port, reported to trackers
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the fixed handshake
pub const HANDSHAKE_LEN: usize = 68;

/// Extension protocol bit (BEP-10), set in reserved byte 5
pub const EXTENSION_BIT: u8 = 0x10;

/// Extension handshake message ID
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The id we advertise for ut_metadata in our extension handshake
pub const UT_METADATA_ID: u8 = 1;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// Metadata piece size (BEP-9)
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum metadata size (1MB)
pub const MAX_METADATA_SIZE: usize = 1024 * 1024;

// ============================================================================
// Request pipelining
// ============================================================================

/// REQUEST messages buffered locally before a flush (5 * 17 = 85 bytes)
pub const REQUEST_BATCH: usize = 5;

/// Outstanding block requests per peer
pub const MAX_IN_FLIGHT: usize = 10;

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connection timeout
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Handshake timeout after TCP connect
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the peer to unchoke us after we declare interest
pub const UNCHOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for every block of one piece to arrive
pub const PIECE_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata fetch timeout
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Retries
// ============================================================================

/// Attempts per peer address before moving on to the next one
pub const MAX_PEER_RETRY_ATTEMPTS: u32 = 3;

/// Pause between two attempts
pub const PEER_RETRY_DELAY: Duration = Duration::from_secs(2);
