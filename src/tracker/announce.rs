use crate::constants::DEFAULT_PORT;
use crate::metainfo::{percent_encode, InfoHash};
use crate::peer::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerEvent {
    #[default]
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// Query parameters of an HTTP announce.
///
/// ```
/// use btwire::metainfo::InfoHash;
/// use btwire::peer::PeerId;
/// use btwire::tracker::AnnounceRequest;
///
/// let hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
/// let request = AnnounceRequest::new(hash, PeerId([b'a'; 20]), 1_000);
/// let url = request.url("http://tracker.example.com/announce");
///
/// assert!(url.starts_with("http://tracker.example.com/announce?info_hash=%C1%2F"));
/// assert!(url.contains("&left=1000&compact=1"));
/// ```
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub compact: bool,
    pub event: TrackerEvent,
}

impl AnnounceRequest {
    /// A fresh download: nothing transferred, `left` bytes to go.
    pub fn new(info_hash: InfoHash, peer_id: PeerId, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port: DEFAULT_PORT,
            uploaded: 0,
            downloaded: 0,
            left,
            compact: true,
            event: TrackerEvent::None,
        }
    }

    /// Appends the query to `announce`, keeping any query the URL already has.
    pub fn url(&self, announce: &str) -> String {
        let separator = if announce.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            announce,
            separator,
            self.info_hash.url_encoded(),
            percent_encode(self.peer_id.as_bytes()),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            u8::from(self.compact)
        );

        let event = self.event.as_str();
        if !event.is_empty() {
            url.push_str("&event=");
            url.push_str(event);
        }
        url
    }
}
