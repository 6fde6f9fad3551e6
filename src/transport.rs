//! The framing boundary: everything below the 9-byte frame header.
//!
//! The dispatcher only ever sees de-framed payloads, so anything that can
//! move whole frames works as a transport, including the scripted in-memory
//! one the tests use.

use crate::codec::STREAM_ID_MASK;
use crate::settings::MIN_MAX_FRAME_SIZE;
use crate::types::StreamId;
use log::trace;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// https://httpwg.org/specs/rfc7540.html#FrameHeader
///
/// `ty` stays raw: unknown frame types must survive framing so the dispatcher
/// can ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub ty: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

pub trait Transport {
    /// Writes one frame. A `timeout` of `None` means block as long as needed.
    fn write_frame(
        &mut self,
        ty: u8,
        flags: u8,
        stream_id: StreamId,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> io::Result<()>;

    /// Reads one frame, or `None` if nothing arrived within `timeout`.
    fn read_frame(
        &mut self,
        timeout: Option<Duration>,
    ) -> io::Result<Option<(FrameHeader, Vec<u8>)>>;
}

/// Frame codec over any byte stream.
///
/// Read timeouts are the stream's business: configure them on the underlying
/// socket (e.g. `TcpStream::set_read_timeout`); a `WouldBlock`/`TimedOut`
/// while waiting for a header surfaces as `Ok(None)`.
///
/// Inbound frame lengths are capped at the MAX_FRAME_SIZE we advertise
/// (RFC 7540 §4.2); a longer frame is rejected before its payload is
/// allocated or read.
#[derive(Debug)]
pub struct FramedStream<S> {
    inner: S,
    max_frame_size: u32,
}

impl<S: Read + Write> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_frame_size: MIN_MAX_FRAME_SIZE,
        }
    }

    /// Raises the inbound length cap to match a larger MAX_FRAME_SIZE once
    /// it has been advertised to the peer.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read + Write> Transport for FramedStream<S> {
    fn write_frame(
        &mut self,
        ty: u8,
        flags: u8,
        stream_id: StreamId,
        payload: &[u8],
        _timeout: Option<Duration>,
    ) -> io::Result<()> {
        debug_assert!(payload.len() < 1 << 24, "payload does not fit a frame");
        self.inner
            .write_all(&(payload.len() as u32).to_be_bytes()[1..])?;
        self.inner.write_all(&[ty, flags])?;
        self.inner
            .write_all(&(stream_id & STREAM_ID_MASK).to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.flush()
    }

    fn read_frame(
        &mut self,
        _timeout: Option<Duration>,
    ) -> io::Result<Option<(FrameHeader, Vec<u8>)>> {
        let mut header = [0u8; 9];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        let length =
            u32::from(header[0]) << 16 | u32::from(header[1]) << 8 | u32::from(header[2]);
        let ty = header[3];
        let flags = header[4];
        let stream_id = (u32::from(header[5]) << 24
            | u32::from(header[6]) << 16
            | u32::from(header[7]) << 8
            | u32::from(header[8]))
            & STREAM_ID_MASK;
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} byte frame exceeds the advertised {} byte maximum",
                    length, self.max_frame_size
                ),
            ));
        }
        let mut payload = vec![0u8; length as usize];
        self.inner.read_exact(&mut payload)?;
        trace!(
            "framed read: type {:#x} flags {:#x} stream {} length {}",
            ty,
            flags,
            stream_id,
            length
        );
        Ok(Some((
            FrameHeader {
                length,
                ty,
                flags,
                stream_id,
            },
            payload,
        )))
    }
}

/// An in-memory transport for driving a connection without a socket: queue
/// the frames the peer "sends", then inspect what the endpoint wrote.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    incoming: VecDeque<(FrameHeader, Vec<u8>)>,
    written: Vec<(FrameHeader, Vec<u8>)>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame for the endpoint to read.
    pub fn push_frame(
        &mut self,
        ty: impl Into<u8>,
        flags: u8,
        stream_id: StreamId,
        payload: impl Into<Vec<u8>>,
    ) {
        let payload = payload.into();
        self.incoming.push_back((
            FrameHeader {
                length: payload.len() as u32,
                ty: ty.into(),
                flags,
                stream_id,
            },
            payload,
        ));
    }

    #[must_use]
    pub fn written(&self) -> &[(FrameHeader, Vec<u8>)] {
        &self.written
    }

    pub fn take_written(&mut self) -> Vec<(FrameHeader, Vec<u8>)> {
        std::mem::take(&mut self.written)
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        self.incoming.len()
    }
}

impl Transport for ScriptedTransport {
    fn write_frame(
        &mut self,
        ty: u8,
        flags: u8,
        stream_id: StreamId,
        payload: &[u8],
        _timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.written.push((
            FrameHeader {
                length: payload.len() as u32,
                ty,
                flags,
                stream_id: stream_id & STREAM_ID_MASK,
            },
            payload.to_vec(),
        ));
        Ok(())
    }

    fn read_frame(
        &mut self,
        _timeout: Option<Duration>,
    ) -> io::Result<Option<(FrameHeader, Vec<u8>)>> {
        Ok(self.incoming.pop_front())
    }
}
