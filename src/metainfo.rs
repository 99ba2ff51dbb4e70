//! Torrent metainfo handling ([BEP-3], [BEP-9]).
//!
//! A torrent is identified by its [`InfoHash`], the SHA-1 of the bencoded
//! `info` dictionary. That dictionary, decoded into a [`TorrentInfo`],
//! carries everything the peer wire needs: the piece length, the total
//! length and one SHA-1 per piece. It arrives either inside a `.torrent`
//! file ([`Metainfo`]) or, for a [`MagnetLink`], from a peer through the
//! `ut_metadata` extension.
//!
//! # Examples
//!
//! ## Parsing a magnet link
//!
//! ```
//! use btwire::metainfo::MagnetLink;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let magnet = MagnetLink::parse(
//!     "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=Example%20File"
//! )?;
//!
//! assert_eq!(magnet.info_hash.to_hex(), "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");
//! assert_eq!(magnet.display_name.as_deref(), Some("Example File"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Working with info hashes
//!
//! ```
//! use btwire::metainfo::InfoHash;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a")?;
//! assert_eq!(hash.as_bytes().len(), 20);
//! assert_eq!(hash.url_encoded(), "%C1%2F%E1%C0k%BA%25J%9D%C9%F5%19%B35%AA%7C%13g%A8%8A");
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-9]: http://bittorrent.org/beps/bep_0009.html

mod error;
mod info_hash;
mod magnet;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use magnet::MagnetLink;
pub use torrent::{File, Metainfo, TorrentInfo};

pub(crate) use info_hash::sha1_digest;
pub(crate) use magnet::percent_encode;
