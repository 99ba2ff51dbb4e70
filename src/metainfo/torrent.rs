use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::path::PathBuf;

/// A parsed torrent file.
///
/// # Examples
///
/// ```no_run
/// use btwire::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Size: {} bytes", metainfo.info.total_length);
/// println!("Info hash: {}", metainfo.info_hash());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary containing file and piece information.
    pub info: TorrentInfo,
    /// Primary tracker URL.
    pub announce: Option<String>,
    /// Multi-tier tracker list ([BEP-12](http://bittorrent.org/beps/bep_0012.html)).
    pub announce_list: Vec<Vec<String>>,
    /// Unix timestamp when the torrent was created.
    pub creation_date: Option<i64>,
    /// Optional comment about the torrent.
    pub comment: Option<String>,
    /// Name/version of the program that created the torrent.
    pub created_by: Option<String>,
}

/// The decoded `info` dictionary of a torrent.
///
/// The number of piece hashes always matches the number of pieces implied
/// by `total_length` and `piece_length`; construction fails otherwise.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece (the final piece may be shorter).
    pub piece_length: u32,
    /// Total size of all files combined.
    pub total_length: u64,
    /// SHA-1 hash of each piece.
    pub piece_hashes: Vec<[u8; 20]>,
    /// Files in content order. Single-file torrents have exactly one.
    pub files: Vec<File>,
    /// The bencoded info dictionary that `info_hash` was computed over.
    pub raw_info: Bytes,
    pub info_hash: InfoHash,
}

/// A file within a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Path relative to the download directory, starting with the torrent name.
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of the file within the concatenated piece data.
    pub offset: u64,
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid bencode, if required fields
    /// are missing, or if the piece hashes do not cover the content.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;
        let info = TorrentInfo::from_info_value(info_value)?;

        let announce = dict
            .get(b"announce".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        let announce_list = dict
            .get(b"announce-list".as_slice())
            .and_then(|v| v.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let creation_date = dict
            .get(b"creation date".as_slice())
            .and_then(|v| v.as_integer());

        let comment = dict
            .get(b"comment".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        let created_by = dict
            .get(b"created by".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            info,
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
        })
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info.info_hash
    }

    /// Returns all tracker URLs from both `announce` and `announce-list`,
    /// primary first, without duplicates.
    pub fn trackers(&self) -> Vec<String> {
        let mut trackers = Vec::new();

        if let Some(ref announce) = self.announce {
            trackers.push(announce.clone());
        }

        for tier in &self.announce_list {
            for tracker in tier {
                if !trackers.contains(tracker) {
                    trackers.push(tracker.clone());
                }
            }
        }

        trackers
    }
}

impl TorrentInfo {
    /// Builds the info from an already-decoded `info` dictionary.
    ///
    /// The info hash is taken over the canonical re-encoding of `value`.
    pub fn from_info_value(value: &Value) -> Result<Self, MetainfoError> {
        let raw_info = Bytes::from(encode(value));
        parse_info(value, raw_info)
    }

    /// Builds the info from the raw bencoded dictionary, as recovered through
    /// `ut_metadata`. The info hash is taken over `raw_info` exactly.
    pub fn from_info_bytes(raw_info: Bytes) -> Result<Self, MetainfoError> {
        let value = decode(&raw_info)?;
        parse_info(&value, raw_info)
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Length of piece `index` in bytes.
    ///
    /// Every piece is `piece_length` long except the final one, which holds
    /// whatever remains: `total_length - piece_length * (count - 1)`.
    ///
    /// ```
    /// # use btwire::metainfo::TorrentInfo;
    /// # use btwire::bencode::Value;
    /// let info = Value::dict([
    ///     ("name", Value::string("f")),
    ///     ("piece length", Value::Integer(262_144)),
    ///     ("length", Value::Integer(1_000_000)),
    ///     ("pieces", Value::Bytes(vec![0u8; 80].into())),
    /// ]);
    /// let info = TorrentInfo::from_info_value(&info).unwrap();
    /// assert_eq!(info.piece_size(0), Some(262_144));
    /// assert_eq!(info.piece_size(3), Some(213_568));
    /// assert_eq!(info.piece_size(4), None);
    /// ```
    pub fn piece_size(&self, index: u32) -> Option<u32> {
        let count = self.piece_count();
        if index >= count {
            return None;
        }
        if index + 1 < count {
            return Some(self.piece_length);
        }
        let preceding = u64::from(self.piece_length) * u64::from(count - 1);
        Some((self.total_length - preceding) as u32)
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index as usize)
    }
}

fn parse_info(value: &Value, raw_info: Bytes) -> Result<TorrentInfo, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

    let name = dict
        .get(b"name".as_slice())
        .and_then(|v| v.as_str())
        .ok_or(MetainfoError::MissingField("name"))?
        .to_string();

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(|v| v.as_integer())
        .ok_or(MetainfoError::MissingField("piece length"))?;
    let piece_length = u32::try_from(piece_length)
        .ok()
        .filter(|&len| len > 0)
        .ok_or(MetainfoError::InvalidField("piece length"))?;

    let pieces_bytes = dict
        .get(b"pieces".as_slice())
        .and_then(|v| v.as_bytes())
        .ok_or(MetainfoError::MissingField("pieces"))?;

    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let piece_hashes: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let (files, total_length) = if let Some(length) = dict.get(b"length".as_slice()) {
        let length = non_negative(length, "length")?;
        let file = File {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length)
    } else if let Some(files_list) = dict.get(b"files".as_slice()).and_then(|v| v.as_list()) {
        let mut files = Vec::with_capacity(files_list.len());
        let mut offset = 0u64;

        for file_value in files_list {
            let length = file_value
                .get(b"length")
                .ok_or(MetainfoError::MissingField("file length"))
                .and_then(|v| non_negative(v, "file length"))?;

            let path_list = file_value
                .get(b"path")
                .and_then(|v| v.as_list())
                .ok_or(MetainfoError::MissingField("file path"))?;

            let path: PathBuf = std::iter::once(name.clone())
                .chain(path_list.iter().filter_map(|p| p.as_str().map(String::from)))
                .collect();

            files.push(File {
                path,
                length,
                offset,
            });

            offset = offset
                .checked_add(length)
                .ok_or(MetainfoError::InvalidField("file length"))?;
        }

        (files, offset)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    let expected = total_length.div_ceil(u64::from(piece_length));
    if expected != piece_hashes.len() as u64 {
        return Err(MetainfoError::PieceCountMismatch {
            expected,
            actual: piece_hashes.len(),
        });
    }

    let info_hash = InfoHash::from_info_bytes(&raw_info);

    Ok(TorrentInfo {
        name,
        piece_length,
        total_length,
        piece_hashes,
        files,
        raw_info,
        info_hash,
    })
}

fn non_negative(value: &Value, field: &'static str) -> Result<u64, MetainfoError> {
    value
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(MetainfoError::InvalidField(field))
}
