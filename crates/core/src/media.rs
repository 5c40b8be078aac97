//! Media resources, tracks, and the packets that flow between them.
//!
//! A [`Resource`] is one demuxed entity (a file or a live feed) holding one
//! or more [`Track`]s. Each track owns the write half of a buffer queue;
//! the demuxer thread pushes [`MediaPacket`]s into it and every RTP session
//! playing the track holds its own [`Consumer`](crate::queue::Consumer).

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::queue::{Consumer, Producer};

/// Where a resource's data comes from. Liveness checking treats live
/// sources specially: an idle live track gets a soft RTCP BYE before the
/// hard timeout kicks the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Stored on disk; packets are produced on demand.
    Stored,
    /// Fed in real time by an upstream producer.
    Live,
}

/// One RTP-ready media packet as produced by a demuxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Payload bytes, already packetized for the wire.
    pub data: Vec<u8>,
    /// RTP timestamp in the track's clock rate.
    pub timestamp: u32,
    /// Marker bit: set on the last packet of an access unit.
    pub marker: bool,
}

/// A single elementary stream within a resource.
pub struct Track {
    name: String,
    producer: Producer<MediaPacket>,
    parent: Weak<Resource>,
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source kind of the owning resource. Falls back to `Stored` if
    /// the resource is already gone; nothing live can be idle-notified then.
    pub fn source(&self) -> SourceKind {
        self.parent
            .upgrade()
            .map(|resource| resource.source())
            .unwrap_or(SourceKind::Stored)
    }

    /// Enqueue a packet for every subscribed session.
    pub fn push_packet(&self, packet: MediaPacket) {
        self.producer.put(packet);
    }

    /// Attach a new reader; it observes only packets pushed from now on.
    pub fn subscribe(&self) -> Consumer<MediaPacket> {
        self.producer.subscribe()
    }

    /// Packets currently retained for slow readers.
    pub fn backlog(&self) -> usize {
        self.producer.pending()
    }
}

/// A demuxed media entity: source kind plus its tracks.
pub struct Resource {
    source: SourceKind,
    tracks: RwLock<Vec<Arc<Track>>>,
}

impl Resource {
    pub fn new(source: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            source,
            tracks: RwLock::new(Vec::new()),
        })
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Create a track on this resource. Called by demuxer `init`.
    pub fn add_track(self: &Arc<Self>, name: &str) -> Arc<Track> {
        let track = Arc::new(Track {
            name: name.to_string(),
            producer: Producer::new(),
            parent: Arc::downgrade(self),
        });
        self.tracks.write().push(Arc::clone(&track));
        tracing::debug!(track = name, "track added");
        track
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().clone()
    }

    pub fn track(&self, name: &str) -> Option<Arc<Track>> {
        self.tracks.read().iter().find(|t| t.name() == name).cloned()
    }
}

/// An input handed to demuxer probing: the resource path plus a sniff of
/// its leading bytes.
#[derive(Debug, Clone)]
pub struct InputStream {
    pub path: String,
    pub head: Vec<u8>,
}

impl InputStream {
    pub fn new(path: &str, head: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            head,
        }
    }

    /// File extension of the path, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }
}
