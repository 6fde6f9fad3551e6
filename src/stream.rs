use crate::chunk::Chunk;
use crate::error::{H2Error, H2Result};
use crate::flags::{DataFlags, Flags, HeadersFlags};
use crate::types::{FrameType, Headers, NonZeroStreamId, MAX_HEADER_BUFFER_SIZE};
use bytes::{Bytes, BytesMut};
use derivative::Derivative;
use log::trace;
use std::collections::VecDeque;

/// https://httpwg.org/specs/rfc7540.html#StreamStates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Header-block fragments collected between a HEADERS frame and the
/// CONTINUATION frame that carries END_HEADERS.
#[derive(Debug, Default)]
pub(crate) struct HeaderAccumulator {
    fragments: Vec<Bytes>,
    length: usize,
    padding: u8,
}

impl HeaderAccumulator {
    pub(crate) fn new(fragment: Bytes, padding: u8) -> Self {
        let length = fragment.len();
        Self {
            fragments: vec![fragment],
            length,
            padding,
        }
    }

    pub(crate) fn append(&mut self, fragment: Bytes) -> H2Result<()> {
        self.length += fragment.len();
        if self.length > MAX_HEADER_BUFFER_SIZE {
            return Err(H2Error::protocol(format!(
                "header block grew past {} bytes",
                MAX_HEADER_BUFFER_SIZE
            )));
        }
        self.fragments.push(fragment);
        Ok(())
    }

    /// Concatenates the fragments and strips the padding recorded from the
    /// initial frame. Pad bytes must exist and must all be zero.
    pub(crate) fn into_block(self) -> H2Result<Bytes> {
        let mut block = BytesMut::with_capacity(self.length);
        for fragment in &self.fragments {
            block.extend_from_slice(fragment);
        }
        let pad = usize::from(self.padding);
        if pad > block.len() {
            return Err(H2Error::protocol(format!(
                "pad length {} exceeds the {} byte header block",
                pad,
                block.len()
            )));
        }
        if block[block.len() - pad..].iter().any(|&byte| byte != 0) {
            return Err(H2Error::protocol("header block padding is not zero"));
        }
        block.truncate(block.len() - pad);
        Ok(block.freeze())
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Stream {
    pub id: NonZeroStreamId,
    state: StreamState,
    /// How many DATA payload bytes the peer will still accept from us.
    /// Goes negative when the peer shrinks INITIAL_WINDOW_SIZE mid-stream.
    pub(crate) peer_flow_credits: i32,
    pub(crate) rst_stream_error: Option<H2Error>,
    pub(crate) stats_sent: u64,
    #[derivative(Debug = "ignore")]
    pub(crate) recv_headers_queue: VecDeque<Headers>,
    #[derivative(Debug = "ignore")]
    pub(crate) chunk_queue: VecDeque<Option<Chunk>>,
    pub(crate) recv_headers: Option<HeaderAccumulator>,
}

impl Stream {
    #[must_use]
    pub(crate) fn new(id: NonZeroStreamId, peer_flow_credits: i32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            peer_flow_credits,
            rst_stream_error: None,
            stats_sent: 0,
            recv_headers_queue: VecDeque::new(),
            chunk_queue: VecDeque::new(),
            recv_headers: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn stats_sent(&self) -> u64 {
        self.stats_sent
    }

    #[must_use]
    pub fn rst_stream_error(&self) -> Option<&H2Error> {
        self.rst_stream_error.as_ref()
    }

    pub(crate) fn begin_header_block(&mut self, fragment: Bytes, padding: u8) {
        self.recv_headers = Some(HeaderAccumulator::new(fragment, padding));
    }

    pub(crate) fn header_block_mut(&mut self) -> Option<&mut HeaderAccumulator> {
        self.recv_headers.as_mut()
    }

    pub(crate) fn take_header_block(&mut self) -> Option<HeaderAccumulator> {
        self.recv_headers.take()
    }

    /// Applies the transition a sent (`recv == false`) or received frame
    /// induces. Compound moves fall out of the ordering: a HEADERS with
    /// END_STREAM first opens an idle stream, then half-closes it.
    pub(crate) fn transition(&mut self, recv: bool, ty: FrameType, flags: Flags) {
        let send = !recv;
        let original_state = self.state;

        if matches!(ty, FrameType::ResetStream) {
            self.state = StreamState::Closed;
        } else {
            let h = matches!(ty, FrameType::Headers);
            let pp = matches!(ty, FrameType::PushPromise);
            let es = match flags {
                Flags::Data(flags) => flags.contains(DataFlags::END_STREAM),
                Flags::Headers(flags) => flags.contains(HeadersFlags::END_STREAM),
                _ => false,
            };

            if self.state == StreamState::Idle {
                if send && pp {
                    self.state = StreamState::ReservedLocal;
                } else if recv && pp {
                    self.state = StreamState::ReservedRemote;
                } else if h {
                    self.state = StreamState::Open;
                }
            }

            if self.state == StreamState::ReservedLocal && send && h {
                self.state = StreamState::HalfClosedRemote;
            }

            if self.state == StreamState::ReservedRemote && recv && h {
                self.state = StreamState::HalfClosedLocal;
            }

            if self.state == StreamState::Open && send && es {
                self.state = StreamState::HalfClosedLocal;
            }

            if self.state == StreamState::Open && recv && es {
                self.state = StreamState::HalfClosedRemote;
            }

            if self.state == StreamState::HalfClosedRemote && send && es {
                self.state = StreamState::Closed;
            }

            if self.state == StreamState::HalfClosedLocal && recv && es {
                self.state = StreamState::Closed;
            }
        }

        if self.state != original_state {
            trace!(
                "stream {} {:?} -> {:?}",
                self.id,
                original_state,
                self.state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{ContinuationFlags, PushPromiseFlags};

    fn stream() -> Stream {
        Stream::new(NonZeroStreamId::new(1).unwrap(), 65_535)
    }

    fn headers(flags: HeadersFlags) -> (FrameType, Flags) {
        (FrameType::Headers, Flags::Headers(flags))
    }

    fn data(flags: DataFlags) -> (FrameType, Flags) {
        (FrameType::Data, Flags::Data(flags))
    }

    #[test]
    fn recv_headers_opens() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS);
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::Open);
    }

    #[test]
    fn recv_headers_with_end_stream_half_closes_remote() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS | HeadersFlags::END_STREAM);
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn send_headers_with_end_stream_half_closes_local() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS | HeadersFlags::END_STREAM);
        stream.transition(false, ty, flags);
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn data_end_stream_closes_from_half_closed() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS | HeadersFlags::END_STREAM);
        stream.transition(false, ty, flags);
        let (ty, flags) = data(DataFlags::END_STREAM);
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn both_sides_finishing_closes() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS);
        stream.transition(false, ty, flags);
        assert_eq!(stream.state(), StreamState::Open);
        let (ty, flags) = data(DataFlags::END_STREAM);
        stream.transition(false, ty, flags);
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
        let (ty, flags) = headers(HeadersFlags::END_HEADERS | HeadersFlags::END_STREAM);
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn reset_closes_immediately() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::END_HEADERS);
        stream.transition(true, ty, flags);
        stream.transition(true, FrameType::ResetStream, Flags::None);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn push_promise_reserves() {
        let mut stream = stream();
        stream.transition(
            true,
            FrameType::PushPromise,
            Flags::PushPromise(PushPromiseFlags::END_HEADERS),
        );
        assert_eq!(stream.state(), StreamState::ReservedRemote);
        let (ty, flags) = headers(HeadersFlags::END_HEADERS);
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn continuation_does_not_transition() {
        let mut stream = stream();
        let (ty, flags) = headers(HeadersFlags::empty());
        stream.transition(true, ty, flags);
        assert_eq!(stream.state(), StreamState::Open);
        stream.transition(
            true,
            FrameType::Continuation,
            Flags::Continuation(ContinuationFlags::END_HEADERS),
        );
        assert_eq!(stream.state(), StreamState::Open);
    }

    #[test]
    fn accumulator_concatenates_and_strips_padding() {
        let mut acc = HeaderAccumulator::new(Bytes::from_static(b"ab"), 2);
        acc.append(Bytes::from_static(b"cd\0\0")).unwrap();
        assert_eq!(acc.into_block().unwrap(), Bytes::from_static(b"abcd"));
    }

    #[test]
    fn accumulator_rejects_nonzero_padding() {
        let acc = HeaderAccumulator::new(Bytes::from_static(b"ab\x01"), 1);
        assert!(acc.into_block().is_err());
    }

    #[test]
    fn accumulator_rejects_oversized_padding() {
        let acc = HeaderAccumulator::new(Bytes::from_static(b"ab"), 3);
        assert!(acc.into_block().is_err());
    }

    #[test]
    fn accumulator_enforces_the_size_cap() {
        let mut acc = HeaderAccumulator::new(Bytes::from(vec![0; MAX_HEADER_BUFFER_SIZE]), 0);
        assert!(acc.append(Bytes::from_static(b"x")).is_err());
    }
}
