use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tracing::debug;

use super::error::TrackerError;
use crate::bencode::{decode, Value};

/// Decoded body of an announce response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub min_interval: Option<u32>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
    pub warning_message: Option<String>,
}

impl AnnounceResponse {
    /// Parses a bencoded announce response.
    ///
    /// Peers may be given in compact form (6 bytes each) or as a list of
    /// `{ip, port}` dictionaries; entries that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Failure`] if the tracker sent a `failure reason`, and
    /// [`TrackerError::InvalidResponse`] if the body is not a dictionary or
    /// lacks an interval.
    pub fn from_bytes(body: &[u8]) -> Result<Self, TrackerError> {
        let value = decode(body)?;
        if value.as_dict().is_none() {
            return Err(TrackerError::InvalidResponse("expected dict"));
        }

        if let Some(failure) = value.get(b"failure reason") {
            let reason = failure
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            return Err(TrackerError::Failure(reason));
        }

        let interval = value
            .get_integer(b"interval")
            .and_then(to_u32)
            .ok_or(TrackerError::InvalidResponse("missing interval"))?;

        let peers = match value.get(b"peers") {
            Some(Value::Bytes(compact)) => parse_compact_peers(compact),
            Some(Value::List(list)) => list.iter().filter_map(dict_peer).collect(),
            Some(_) => return Err(TrackerError::InvalidResponse("peers has wrong type")),
            None => Vec::new(),
        };

        Ok(Self {
            interval,
            min_interval: value.get_integer(b"min interval").and_then(to_u32),
            complete: value.get_integer(b"complete").and_then(to_u32),
            incomplete: value.get_integer(b"incomplete").and_then(to_u32),
            peers,
            warning_message: value
                .get(b"warning message")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

fn to_u32(v: i64) -> Option<u32> {
    u32::try_from(v).ok()
}

fn dict_peer(peer: &Value) -> Option<SocketAddr> {
    let ip: IpAddr = peer.get(b"ip")?.as_str()?.parse().ok()?;
    let port = u16::try_from(peer.get_integer(b"port")?).ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Splits a compact peer string into addresses: 4 bytes of IPv4 address and
/// a big-endian port per peer. A trailing partial entry is ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    if data.len() % 6 != 0 {
        debug!("compact peer list has {} stray bytes", data.len() % 6);
    }
    data.chunks_exact(6)
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([c[4], c[5]]))
        })
        .collect()
}
