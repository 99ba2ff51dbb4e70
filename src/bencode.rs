//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the self-describing format used for `.torrent` files, tracker
//! responses and the payloads of extension messages.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! # Examples
//!
//! ```
//! use btwire::bencode::{decode, decode_prefix, encode, Value};
//!
//! let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
//! assert_eq!(value.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
//!
//! // A value followed by raw bytes, as in ut_metadata data messages.
//! let (value, consumed) = decode_prefix(b"d5:piecei0eeRAW").unwrap();
//! assert_eq!(consumed, 12);
//! assert_eq!(value.get(b"piece").and_then(|v| v.as_integer()), Some(0));
//!
//! // Dictionaries always encode with their keys in ascending byte order.
//! let dict = Value::dict([("b", Value::Integer(2)), ("a", Value::Integer(1))]);
//! assert_eq!(encode(&dict), b"d1:ai1e1:bi2ee");
//! ```
//!
//! # Error Handling
//!
//! Every [`BencodeError`] names the byte offset where decoding failed.
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::{encode, encode_into};
pub use error::BencodeError;
pub use value::Value;
