//! Demuxer plugin interface.
//!
//! A demuxer turns an input container into [`Resource`] tracks and feeds
//! their buffer queues. Concrete format parsers live outside this crate;
//! here is the seam they implement and the registry the server probes to
//! pick one for a resource.

use std::sync::Arc;

use crate::media::{InputStream, Resource};

/// Static description of a demuxer plugin.
#[derive(Debug, Clone)]
pub struct DemuxerInfo {
    pub name: &'static str,
    pub short_name: &'static str,
    pub author: &'static str,
    pub description: &'static str,
    /// File extensions this demuxer claims (without the dot).
    pub extensions: &'static [&'static str],
}

/// Resource-level failure codes for demuxer operations.
///
/// These are statuses surfaced to the caller asking for a resource, not
/// server faults: a failed probe means "not mine", a damaged resource gets
/// a protocol-level error response and the server keeps running.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DemuxerError {
    /// The input is not recognized by this demuxer.
    #[error("resource not found")]
    ResourceNotFound,

    /// The input was recognized but its structure is unusable.
    #[error("resource damaged")]
    ResourceDamaged,

    /// A packet could not be parsed out of the stream.
    #[error("resource not parseable")]
    NotParseable,

    /// The resource does not support seeking (e.g. a live feed).
    #[error("resource not seekable")]
    NotSeekable,
}

/// Outcome of a successful [`Demuxer::read_packet`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// One or more packets were enqueued on the relevant track's queue.
    Packet,
    /// The stream is exhausted.
    Eof,
}

/// A container format parser.
///
/// `init` populates the resource's tracks; `read_packet` advances the
/// stream, pushing [`MediaPacket`](crate::media::MediaPacket)s onto track
/// queues as it goes.
pub trait Demuxer: Send + Sync {
    fn info(&self) -> &DemuxerInfo;

    /// Cheap recognition test: does this input belong to this demuxer?
    fn probe(&self, input: &InputStream) -> Result<(), DemuxerError>;

    /// Open the resource and create its tracks.
    fn init(&self, resource: &Arc<Resource>) -> Result<(), DemuxerError>;

    /// Parse forward, enqueueing packets on track queues.
    fn read_packet(&self, resource: &Arc<Resource>) -> Result<ReadStatus, DemuxerError>;

    /// Reposition the stream to `seconds` from the start.
    fn seek(&self, resource: &Arc<Resource>, seconds: f64) -> Result<(), DemuxerError>;

    /// Release parser state for the resource.
    fn uninit(&self, resource: &Arc<Resource>) -> Result<(), DemuxerError>;
}

/// Ordered set of registered demuxers, probed first-match.
#[derive(Default)]
pub struct DemuxerRegistry {
    demuxers: Vec<Arc<dyn Demuxer>>,
}

impl DemuxerRegistry {
    pub fn new() -> Self {
        Self {
            demuxers: Vec::new(),
        }
    }

    pub fn register(&mut self, demuxer: Arc<dyn Demuxer>) {
        tracing::info!(demuxer = demuxer.info().short_name, "demuxer registered");
        self.demuxers.push(demuxer);
    }

    /// Probe registered demuxers in registration order; the first one that
    /// recognizes the input wins.
    pub fn find(&self, input: &InputStream) -> Option<Arc<dyn Demuxer>> {
        for demuxer in &self.demuxers {
            match demuxer.probe(input) {
                Ok(()) => {
                    tracing::debug!(
                        demuxer = demuxer.info().short_name,
                        path = %input.path,
                        "probe matched"
                    );
                    return Some(Arc::clone(demuxer));
                }
                Err(DemuxerError::ResourceNotFound) => continue,
                Err(e) => {
                    tracing::warn!(
                        demuxer = demuxer.info().short_name,
                        path = %input.path,
                        error = %e,
                        "probe failed"
                    );
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.demuxers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demuxers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaPacket, SourceKind};

    /// Minimal demuxer claiming a fixed extension and emitting one packet
    /// per read until a fixed length is reached.
    struct FixtureDemuxer {
        info: DemuxerInfo,
        extension: &'static str,
        packets: u32,
    }

    impl FixtureDemuxer {
        fn new(extension: &'static str, packets: u32) -> Self {
            Self {
                info: DemuxerInfo {
                    name: "Fixture demuxer",
                    short_name: "fix",
                    author: "tests",
                    description: "emits canned packets",
                    extensions: &[],
                },
                extension,
                packets,
            }
        }
    }

    impl Demuxer for FixtureDemuxer {
        fn info(&self) -> &DemuxerInfo {
            &self.info
        }

        fn probe(&self, input: &InputStream) -> Result<(), DemuxerError> {
            if input.extension() == Some(self.extension) {
                Ok(())
            } else {
                Err(DemuxerError::ResourceNotFound)
            }
        }

        fn init(&self, resource: &Arc<Resource>) -> Result<(), DemuxerError> {
            resource.add_track("video");
            Ok(())
        }

        fn read_packet(&self, resource: &Arc<Resource>) -> Result<ReadStatus, DemuxerError> {
            let track = resource.track("video").ok_or(DemuxerError::ResourceDamaged)?;
            if track.backlog() as u32 >= self.packets {
                return Ok(ReadStatus::Eof);
            }
            track.push_packet(MediaPacket {
                data: vec![0xAB; 4],
                timestamp: 0,
                marker: true,
            });
            Ok(ReadStatus::Packet)
        }

        fn seek(&self, _resource: &Arc<Resource>, _seconds: f64) -> Result<(), DemuxerError> {
            Err(DemuxerError::NotSeekable)
        }

        fn uninit(&self, _resource: &Arc<Resource>) -> Result<(), DemuxerError> {
            Ok(())
        }
    }

    #[test]
    fn registry_probes_in_order() {
        let mut registry = DemuxerRegistry::new();
        registry.register(Arc::new(FixtureDemuxer::new("avi", 1)));
        registry.register(Arc::new(FixtureDemuxer::new("mkv", 1)));

        let input = InputStream::new("/media/clip.mkv", vec![]);
        let found = registry.find(&input).expect("mkv demuxer");
        assert_eq!(found.info().short_name, "fix");

        assert!(registry.find(&InputStream::new("/media/clip.ts", vec![])).is_none());
    }

    #[test]
    fn read_packet_feeds_track_queue() {
        let demuxer = FixtureDemuxer::new("mkv", 2);
        let resource = Resource::new(SourceKind::Stored);
        demuxer.init(&resource).unwrap();

        let track = resource.track("video").unwrap();
        let mut reader = track.subscribe();

        assert_eq!(demuxer.read_packet(&resource).unwrap(), ReadStatus::Packet);
        assert_eq!(demuxer.read_packet(&resource).unwrap(), ReadStatus::Packet);
        assert_eq!(demuxer.read_packet(&resource).unwrap(), ReadStatus::Eof);

        assert_eq!(reader.unseen(), 2);
        assert_eq!(reader.get().unwrap().data, vec![0xAB; 4]);
        assert_eq!(demuxer.seek(&resource, 1.5), Err(DemuxerError::NotSeekable));
    }
}
