use super::error::PeerError;
use super::message::Message;
use crate::bencode::{decode, encode, Value};
use crate::constants::EXTENSION_HANDSHAKE_ID;
use bytes::Bytes;
use std::collections::BTreeMap;

pub const UT_METADATA: &str = "ut_metadata";

/// The BEP-10 extension handshake: EXTENDED sub-id 0 carrying a bencoded
/// dictionary whose `m` entry maps extension names to the ids the sender
/// wants to *receive* them under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub client: Option<String>,
    pub reqq: Option<i64>,
    /// Size of the info dictionary, when the sender has it.
    pub metadata_size: Option<i64>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(extensions: &[(&str, u8)]) -> Self {
        let mut hs = Self::new();
        for (name, id) in extensions {
            hs.extensions.insert((*name).to_string(), *id);
        }
        hs
    }

    pub fn encode(&self) -> Bytes {
        let mut dict = BTreeMap::new();

        let m = self
            .extensions
            .iter()
            .map(|(name, id)| {
                (
                    Bytes::copy_from_slice(name.as_bytes()),
                    Value::Integer(i64::from(*id)),
                )
            })
            .collect();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));

        if let Some(ref client) = self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        if let Some(reqq) = self.reqq {
            dict.insert(Bytes::from_static(b"reqq"), Value::Integer(reqq));
        }

        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }

        Bytes::from(encode(&Value::Dict(dict)))
    }

    /// Decodes a handshake payload. Extensions mapped to 0 (disabled) or to
    /// an id that does not fit a byte are left out.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::InvalidMessage("extension handshake is not a dict".into()))?;

        let mut hs = Self::new();

        if let Some(m) = dict.get(b"m".as_slice()).and_then(|v| v.as_dict()) {
            for (key, val) in m {
                let id = val.as_integer().and_then(|id| u8::try_from(id).ok());
                if let (Ok(name), Some(id)) = (std::str::from_utf8(key), id) {
                    if id > 0 {
                        hs.extensions.insert(name.to_string(), id);
                    }
                }
            }
        }

        hs.client = dict
            .get(b"v".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        hs.reqq = dict.get(b"reqq".as_slice()).and_then(|v| v.as_integer());

        hs.metadata_size = dict
            .get(b"metadata_size".as_slice())
            .and_then(|v| v.as_integer());

        Ok(hs)
    }

    pub fn get_extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }

    /// Wraps the handshake in an EXTENDED message.
    pub fn to_message(&self) -> Message {
        Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: self.encode(),
        }
    }
}
