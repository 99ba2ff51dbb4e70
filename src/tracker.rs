//! Tracker announce helpers (BEP-3, BEP-23)
//!
//! Builds announce URLs and parses announce responses. Performing the HTTP
//! request is left to the caller.

mod announce;
mod error;
mod response;

pub use announce::{AnnounceRequest, TrackerEvent};
pub use error::TrackerError;
pub use response::{parse_compact_peers, AnnounceResponse};
