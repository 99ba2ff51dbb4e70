use super::error::MetainfoError;
use super::info_hash::InfoHash;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

/// A parsed `magnet:` URI.
///
/// Only the info hash is mandatory; the metadata itself has to be fetched
/// from a peer before any piece can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    /// `dn`: suggested name.
    pub display_name: Option<String>,
    /// `tr`: tracker URLs, in order of appearance.
    pub trackers: Vec<String>,
    /// `x.pe`: peers to contact directly.
    pub peer_addresses: Vec<SocketAddr>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// The `xt` parameter must be `urn:btih:` followed by a 40-character hex
    /// or a 32-character base32 info hash. Unknown parameters are ignored.
    ///
    /// ```
    /// use btwire::metainfo::MagnetLink;
    ///
    /// let magnet = MagnetLink::parse(
    ///     "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a\
    ///      &dn=Example%20File&tr=http%3A%2F%2Ftracker.example.com%2Fannounce",
    /// )
    /// .unwrap();
    /// assert_eq!(magnet.display_name.as_deref(), Some("Example File"));
    /// assert_eq!(magnet.trackers, ["http://tracker.example.com/announce"]);
    /// ```
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri.strip_prefix("magnet:?").ok_or_else(|| {
            MetainfoError::InvalidMagnetLink("missing magnet:? prefix".into())
        })?;
        let params = parse_query_string(query);

        let xt = params
            .get("xt")
            .and_then(|v| v.first())
            .ok_or_else(|| MetainfoError::InvalidMagnetLink("missing xt parameter".into()))?;

        let hash = xt.strip_prefix("urn:btih:").ok_or_else(|| {
            MetainfoError::InvalidMagnetLink("unsupported xt format".into())
        })?;

        let info_hash = match hash.len() {
            40 => InfoHash::from_hex(hash)?,
            32 => {
                let decoded = base32_decode(hash)
                    .ok_or_else(|| MetainfoError::InvalidMagnetLink("invalid base32".into()))?;
                InfoHash::from_bytes(&decoded)?
            }
            _ => {
                return Err(MetainfoError::InvalidMagnetLink(
                    "invalid info hash length".into(),
                ))
            }
        };

        let display_name = params
            .get("dn")
            .and_then(|v| v.first())
            .map(|s| url_decode(s));

        let trackers = params
            .get("tr")
            .map(|v| v.iter().map(|s| url_decode(s)).collect())
            .unwrap_or_default();

        let peer_addresses = params
            .get("x.pe")
            .map(|v| {
                v.iter()
                    .filter_map(|s| {
                        let addr = url_decode(s);
                        match addr.parse() {
                            Ok(addr) => Some(addr),
                            Err(_) => {
                                debug!(%addr, "ignoring unparsable x.pe peer");
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            info_hash,
            display_name,
            trackers,
            peer_addresses,
        })
    }

    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash.to_hex());

        if let Some(ref name) = self.display_name {
            uri.push_str(&format!("&dn={}", percent_encode(name.as_bytes())));
        }

        for tracker in &self.trackers {
            uri.push_str(&format!("&tr={}", percent_encode(tracker.as_bytes())));
        }

        for peer in &self.peer_addresses {
            uri.push_str(&format!("&x.pe={}", percent_encode(peer.to_string().as_bytes())));
        }

        uri
    }
}

fn parse_query_string(query: &str) -> HashMap<&str, Vec<&str>> {
    let mut params: HashMap<&str, Vec<&str>> = HashMap::new();

    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params.entry(key).or_default().push(value);
        }
    }

    params
}

fn url_decode(s: &str) -> String {
    let input = s.as_bytes();
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'%' => {
                let decoded = input
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub(crate) fn percent_encode(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len() * 3);

    for &byte in bytes {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }

    result
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let input = input.to_ascii_uppercase();
    let input = input.trim_end_matches('=');

    let mut output = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for c in input.bytes() {
        let value = ALPHABET.iter().position(|&x| x == c)? as u64;
        buffer = (buffer << 5) | value;
        bits_in_buffer += 5;

        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            output.push((buffer >> bits_in_buffer) as u8);
            buffer &= (1 << bits_in_buffer) - 1;
        }
    }

    Some(output)
}
