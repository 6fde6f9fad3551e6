use crate::types::NonZeroStreamId;
use bytes::Bytes;

/// One received DATA payload, queued until the application reads it.
///
/// `original_length` is the payload length on the wire, including the
/// pad-length byte and the padding itself; window accounting must use it
/// rather than `data.len()`, or the peer slowly loses credit it never gets
/// back.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub stream_id: NonZeroStreamId,
    pub original_length: u32,
    pub data: Bytes,
    acked: bool,
}

impl Chunk {
    pub(crate) fn new(stream_id: NonZeroStreamId, original_length: u32, data: Bytes) -> Self {
        Self {
            stream_id,
            original_length,
            data,
            acked: false,
        }
    }

    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Both the read path and `shutdown` acknowledge chunks; the flag makes
    /// sure a chunk's window credit is returned at most once.
    pub(crate) fn mark_acked(&mut self) {
        assert!(
            !self.acked,
            "chunk on stream {} acknowledged twice",
            self.stream_id
        );
        self.acked = true;
    }
}
