//! The connection object and the per-stream frame machinery: the inbound
//! dispatcher, the outbound writers, and the blocking stream API.
//!
//! Everything runs on one cooperative scheduler. Blocking operations are
//! loops that re-check their predicate and pump [`Connection::step`] with
//! whatever time remains of the caller's deadline; inbound handlers run
//! atomically within a single `step` and return protocol errors as values so
//! the connection owner can pick the GOAWAY code.

use crate::chunk::Chunk;
use crate::codec::{self, EXCLUSIVE_BIT, STREAM_ID_MASK};
use crate::error::{H2Error, H2Result, StreamError, StreamResult};
use crate::flags::{
    ContinuationFlags, DataFlags, Flags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags,
};
use crate::hpack::{check_pseudo_header_order, DecodingContext, EncodingContext};
use crate::priority::PriorityTree;
use crate::settings::{decode_settings, encode_settings};
use crate::stream::{Stream, StreamState};
use crate::transport::{FrameHeader, Transport};
use crate::types::{
    ErrorType, FrameType, Headers, NonZeroStreamId, Role, SettingsParameter, StreamId,
    MAX_HEADER_BUFFER_SIZE, MAX_WINDOW_SIZE,
};
use bytes::Bytes;
use derivative::Derivative;
use enum_map::{enum_map, EnumMap};
use log::{debug, trace, warn};
use num_traits::FromPrimitive;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

fn default_settings() -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => 4096,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => u32::MAX,
        SettingsParameter::InitialWindowSize => 65_535,
        SettingsParameter::MaxFrameSize => 16_384,
        SettingsParameter::MaxHeaderListSize => u32::MAX,
    }
}

/// Deadline computed once when a blocking call enters; every pump gets the
/// remainder.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    fn remaining(&self) -> StreamResult<Option<Duration>> {
        match self.at {
            None => Ok(None),
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    Err(StreamError::TimedOut)
                } else {
                    Ok(Some(at - now))
                }
            }
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Connection<T> {
    role: Role,
    #[derivative(Debug = "ignore")]
    transport: T,
    pub(crate) streams: HashMap<NonZeroStreamId, Stream>,
    pub(crate) priority: PriorityTree,
    next_local_id: StreamId,
    last_remote_id: StreamId,
    #[derivative(Debug = "ignore")]
    encoding_context: EncodingContext,
    #[derivative(Debug = "ignore")]
    decoding_context: DecodingContext,
    peer_settings: EnumMap<SettingsParameter, u32>,
    acked_settings: EnumMap<SettingsParameter, u32>,
    sent_settings: VecDeque<Vec<(SettingsParameter, u32)>>,
    /// How many DATA payload bytes the peer will still accept, across all
    /// streams.
    peer_flow_credits: i32,
    /// Opaque PING payloads in flight; flipped to `true` when the pong lands.
    pongs: HashMap<[u8; 8], bool>,
    next_ping_payload: u64,
    recv_goaway_lowest: Option<StreamId>,
    /// Stream with an unterminated header block; while set, only CONTINUATION
    /// frames for that stream may arrive.
    continuation_stream: Option<NonZeroStreamId>,
}

impl<T: Transport> Connection<T> {
    #[must_use]
    pub fn new(role: Role, transport: T) -> Self {
        // a client of this layer keeps push off unless the application
        // advertises ENABLE_PUSH = 1 and the peer acknowledges it
        let mut acked_settings = default_settings();
        if role == Role::Client {
            acked_settings[SettingsParameter::EnablePush] = 0;
        }
        Self {
            role,
            transport,
            streams: HashMap::new(),
            priority: PriorityTree::default(),
            next_local_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            last_remote_id: 0,
            encoding_context: EncodingContext::default(),
            decoding_context: DecodingContext::default(),
            peer_settings: default_settings(),
            acked_settings,
            sent_settings: VecDeque::new(),
            peer_flow_credits: 65_535,
            pongs: HashMap::new(),
            next_ping_payload: 0,
            recv_goaway_lowest: None,
            continuation_stream: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn peer_flow_credits(&self) -> i32 {
        self.peer_flow_credits
    }

    #[must_use]
    pub fn peer_setting(&self, param: SettingsParameter) -> u32 {
        self.peer_settings[param]
    }

    /// Lowest last-stream-id seen in a GOAWAY, if any arrived.
    #[must_use]
    pub fn recv_goaway_lowest(&self) -> Option<StreamId> {
        self.recv_goaway_lowest
    }

    #[must_use]
    pub fn priority(&self) -> &PriorityTree {
        &self.priority
    }

    /// Allocates the next locally-initiated stream id and registers it.
    pub fn open_stream(&mut self) -> NonZeroStreamId {
        let id = NonZeroStreamId::new(self.next_local_id).expect("stream id space exhausted");
        self.next_local_id += 2;
        self.stream_entry(id);
        id
    }

    /// Borrows a stream for the blocking operations, creating it on first
    /// reference.
    pub fn stream(&mut self, id: NonZeroStreamId) -> StreamHandle<'_, T> {
        self.stream_entry(id);
        StreamHandle { conn: self, id }
    }

    fn stream_entry(&mut self, id: NonZeroStreamId) -> &mut Stream {
        if id.get() % 2 != self.next_local_id % 2 {
            self.last_remote_id = self.last_remote_id.max(id.get());
        }
        self.priority.ensure(id.get());
        let initial = self.peer_settings[SettingsParameter::InitialWindowSize] as i32;
        self.streams
            .entry(id)
            .or_insert_with(|| Stream::new(id, initial))
    }

    /// Pumps one inbound frame. `Ok(false)` means the transport produced
    /// nothing within `timeout`.
    pub fn step(&mut self, timeout: Option<Duration>) -> StreamResult<bool> {
        let Some((header, payload)) = self.transport.read_frame(timeout)? else {
            return Ok(false);
        };
        self.handle_frame(header, payload)?;
        Ok(true)
    }

    /// Dispatches one de-framed payload. Unknown frame types are ignored.
    pub fn handle_frame(&mut self, header: FrameHeader, payload: Vec<u8>) -> H2Result<()> {
        if let Some(expected) = self.continuation_stream {
            if header.ty != FrameType::Continuation as u8 || header.stream_id != expected.get() {
                return Err(H2Error::protocol(format!(
                    "header block on stream {} interrupted by frame type {:#x} on stream {}",
                    expected, header.ty, header.stream_id
                )));
            }
        }
        let Some(ty) = FrameType::from_u8(header.ty) else {
            trace!("ignoring unknown frame type {:#x}", header.ty);
            return Ok(());
        };
        trace!(
            "recv {:?} flags {:#x} stream {} length {}",
            ty,
            header.flags,
            header.stream_id,
            payload.len()
        );
        match ty {
            FrameType::Data => self.handle_data(&header, payload),
            FrameType::Headers => self.handle_headers(&header, payload),
            FrameType::Priority => self.handle_priority(&header, &payload),
            FrameType::ResetStream => self.handle_rst_stream(&header, &payload),
            FrameType::Settings => self.handle_settings(&header, &payload),
            FrameType::PushPromise => self.handle_push_promise(&header, &payload),
            FrameType::Ping => self.handle_ping(&header, &payload),
            FrameType::GoAway => self.handle_goaway(&header, &payload),
            FrameType::WindowUpdate => self.handle_window_update(&header, &payload),
            FrameType::Continuation => self.handle_continuation(&header, payload),
        }
    }

    fn handle_data(&mut self, header: &FrameHeader, payload: Vec<u8>) -> H2Result<()> {
        let id = require_stream_id(header.stream_id)?;
        let flags = DataFlags::from_bits_truncate(header.flags);
        let original_length = payload.len() as u32;
        {
            let stream = self.stream_entry(id);
            if !matches!(
                stream.state(),
                StreamState::Open | StreamState::HalfClosedLocal
            ) {
                return Err(H2Error::stream_closed(format!(
                    "DATA on stream {} in state {:?}",
                    id,
                    stream.state()
                )));
            }
        }
        let data = strip_padding(payload, flags.contains(DataFlags::PADDED))?;
        let stream = self.stream_entry(id);
        stream.transition(true, FrameType::Data, Flags::Data(flags));
        stream
            .chunk_queue
            .push_back(Some(Chunk::new(id, original_length, Bytes::from(data))));
        if flags.contains(DataFlags::END_STREAM) {
            stream.chunk_queue.push_back(None);
        }
        Ok(())
    }

    fn handle_headers(&mut self, header: &FrameHeader, payload: Vec<u8>) -> H2Result<()> {
        let id = require_stream_id(header.stream_id)?;
        let flags = HeadersFlags::from_bits_truncate(header.flags);
        {
            let stream = self.stream_entry(id);
            if !matches!(
                stream.state(),
                StreamState::Idle | StreamState::Open | StreamState::HalfClosedLocal
            ) {
                return Err(H2Error::stream_closed(format!(
                    "HEADERS on stream {} in state {:?}",
                    id,
                    stream.state()
                )));
            }
        }

        let mut buf: &[u8] = &payload;
        let mut padding = 0;
        if flags.contains(HeadersFlags::PADDED) {
            padding = codec::read_u8(buf, 0)?;
            buf = &buf[1..];
        }
        if flags.contains(HeadersFlags::PRIORITY) {
            let word = codec::read_u32(buf, 0)?;
            let weight_raw = codec::read_u8(buf, 4)?;
            buf = &buf[5..];
            let exclusive = word & EXCLUSIVE_BIT != 0;
            let dependency = word & STREAM_ID_MASK;
            self.priority
                .reprioritise(id.get(), dependency, exclusive)?;
            self.priority
                .set_weight(id.get(), u16::from(weight_raw) + 1);
        }
        if buf.len() > MAX_HEADER_BUFFER_SIZE {
            return Err(H2Error::protocol(format!(
                "{} byte header fragment exceeds the {} byte cap",
                buf.len(),
                MAX_HEADER_BUFFER_SIZE
            )));
        }

        let fragment = Bytes::copy_from_slice(buf);
        self.stream_entry(id).begin_header_block(fragment, padding);
        if flags.contains(HeadersFlags::END_HEADERS) {
            self.finish_header_block(id)?;
        } else {
            self.continuation_stream = Some(id);
        }

        let stream = self.stream_entry(id);
        stream.transition(true, FrameType::Headers, Flags::Headers(flags));
        if flags.contains(HeadersFlags::END_STREAM) {
            stream.chunk_queue.push_back(None);
        }
        Ok(())
    }

    fn handle_priority(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        let id = require_stream_id(header.stream_id)?;
        if payload.len() != 5 {
            return Err(H2Error::frame_size(format!(
                "PRIORITY payload must be 5 bytes, got {}",
                payload.len()
            )));
        }
        self.stream_entry(id);
        let word = codec::read_u32(payload, 0)?;
        let weight_raw = codec::read_u8(payload, 4)?;
        self.priority.reprioritise(
            id.get(),
            word & STREAM_ID_MASK,
            word & EXCLUSIVE_BIT != 0,
        )?;
        self.priority
            .set_weight(id.get(), u16::from(weight_raw) + 1);
        Ok(())
    }

    fn handle_rst_stream(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        let id = require_stream_id(header.stream_id)?;
        if payload.len() != 4 {
            return Err(H2Error::frame_size(format!(
                "RST_STREAM payload must be 4 bytes, got {}",
                payload.len()
            )));
        }
        let code = codec::read_u32(payload, 0)?;
        let error = ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError);
        let stream = self.stream_entry(id);
        if stream.state() == StreamState::Idle {
            return Err(H2Error::protocol(format!(
                "RST_STREAM on idle stream {}",
                id
            )));
        }
        warn!("stream {} reset by peer: {:?}", id, error);
        stream.rst_stream_error = Some(H2Error::new(
            error,
            format!("stream {} reset by peer", id),
        ));
        stream.transition(true, FrameType::ResetStream, Flags::None);
        Ok(())
    }

    fn handle_settings(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        if header.stream_id != 0 {
            return Err(H2Error::protocol("SETTINGS on a non-zero stream"));
        }
        let flags = SettingsFlags::from_bits_truncate(header.flags);
        if flags.contains(SettingsFlags::ACK) {
            if !payload.is_empty() {
                return Err(H2Error::frame_size("SETTINGS ACK with a payload"));
            }
            self.ack_settings();
            return Ok(());
        }
        let params = decode_settings(payload, self.role)?;
        self.set_peer_settings(&params)?;
        self.write_frame(
            FrameType::Settings,
            SettingsFlags::ACK.bits(),
            0,
            &[],
            None,
        )
        .map_err(io_to_h2)?;
        Ok(())
    }

    /// The peer acknowledged our oldest unacknowledged SETTINGS frame.
    fn ack_settings(&mut self) {
        match self.sent_settings.pop_front() {
            Some(params) => {
                for (param, value) in params {
                    self.acked_settings[param] = value;
                }
            }
            None => warn!("SETTINGS ACK without settings in flight"),
        }
    }

    /// Applies validated peer settings. An INITIAL_WINDOW_SIZE change moves
    /// every open stream window by the difference.
    fn set_peer_settings(&mut self, params: &[(SettingsParameter, u32)]) -> H2Result<()> {
        for &(param, value) in params {
            match param {
                SettingsParameter::HeaderTableSize => {
                    self.encoding_context.set_max_table_size(value);
                }
                SettingsParameter::InitialWindowSize => {
                    let previous =
                        i64::from(self.peer_settings[SettingsParameter::InitialWindowSize]);
                    let delta = i64::from(value) - previous;
                    for stream in self.streams.values_mut() {
                        let next = i64::from(stream.peer_flow_credits) + delta;
                        if next > i64::from(MAX_WINDOW_SIZE) {
                            return Err(H2Error::flow_control(format!(
                                "INITIAL_WINDOW_SIZE change overflows stream {}",
                                stream.id
                            )));
                        }
                        stream.peer_flow_credits = next as i32;
                    }
                }
                _ => {}
            }
            self.peer_settings[param] = value;
            trace!("peer setting {:?} = {}", param, value);
        }
        Ok(())
    }

    fn handle_push_promise(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        require_stream_id(header.stream_id)?;
        if self.role == Role::Server {
            return Err(H2Error::protocol("PUSH_PROMISE sent to a server"));
        }
        if self.acked_settings[SettingsParameter::EnablePush] == 0 {
            return Err(H2Error::protocol("PUSH_PROMISE although push is disabled"));
        }
        let flags = PushPromiseFlags::from_bits_truncate(header.flags);
        let mut buf: &[u8] = payload;
        if flags.contains(PushPromiseFlags::PADDED) {
            codec::read_u8(buf, 0)?;
            buf = &buf[1..];
        }
        let promised = codec::read_stream_id(buf, 0)?;
        // promised streams are deliberately unsupported; fail before touching
        // any stream state
        Err(H2Error::new(
            ErrorType::InternalError,
            format!(
                "PUSH_PROMISE for stream {} is not implemented",
                promised
            ),
        ))
    }

    fn handle_ping(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        if header.stream_id != 0 {
            return Err(H2Error::protocol("PING on a non-zero stream"));
        }
        if payload.len() != 8 {
            return Err(H2Error::frame_size(format!(
                "PING payload must be 8 bytes, got {}",
                payload.len()
            )));
        }
        let flags = PingFlags::from_bits_truncate(header.flags);
        // unwrap: the length of the slice is always 8
        let opaque: [u8; 8] = payload.try_into().unwrap();
        if flags.contains(PingFlags::ACK) {
            match self.pongs.get_mut(&opaque) {
                Some(landed) => *landed = true,
                None => trace!("ignoring pong nobody is waiting for"),
            }
        } else {
            self.write_frame(FrameType::Ping, PingFlags::ACK.bits(), 0, &opaque, None)
                .map_err(io_to_h2)?;
        }
        Ok(())
    }

    fn handle_goaway(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        if header.stream_id != 0 {
            return Err(H2Error::protocol("GOAWAY on a non-zero stream"));
        }
        if payload.len() < 8 {
            return Err(H2Error::frame_size(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                payload.len()
            )));
        }
        let last_stream = codec::read_stream_id(payload, 0)?;
        let code = codec::read_u32(payload, 4)?;
        let error = ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError);
        warn!("received GOAWAY: {:?}, last stream {}", error, last_stream);
        if payload.len() > 8 {
            debug!(
                "GOAWAY debug data: {}",
                String::from_utf8_lossy(&payload[8..])
            );
        }
        if self
            .recv_goaway_lowest
            .map_or(true, |lowest| last_stream < lowest)
        {
            self.recv_goaway_lowest = Some(last_stream);
        }
        Ok(())
    }

    fn handle_window_update(&mut self, header: &FrameHeader, payload: &[u8]) -> H2Result<()> {
        if payload.len() != 4 {
            return Err(H2Error::frame_size(format!(
                "WINDOW_UPDATE payload must be 4 bytes, got {}",
                payload.len()
            )));
        }
        let increment = codec::read_u32(payload, 0)? & STREAM_ID_MASK;
        if increment == 0 {
            return Err(H2Error::protocol("WINDOW_UPDATE with increment 0"));
        }
        match NonZeroStreamId::new(header.stream_id) {
            None => {
                self.peer_flow_credits = add_credits(self.peer_flow_credits, increment)?;
            }
            Some(id) => {
                let stream = self.stream_entry(id);
                stream.peer_flow_credits = add_credits(stream.peer_flow_credits, increment)?;
            }
        }
        Ok(())
    }

    fn handle_continuation(&mut self, header: &FrameHeader, payload: Vec<u8>) -> H2Result<()> {
        let id = require_stream_id(header.stream_id)?;
        let flags = ContinuationFlags::from_bits_truncate(header.flags);
        match self.streams.get_mut(&id).and_then(Stream::header_block_mut) {
            Some(accumulator) => accumulator.append(Bytes::from(payload))?,
            None => {
                return Err(H2Error::protocol(format!(
                    "CONTINUATION on stream {} without an open header block",
                    id
                )));
            }
        }
        if flags.contains(ContinuationFlags::END_HEADERS) {
            self.finish_header_block(id)?;
        }
        Ok(())
    }

    /// END_HEADERS: concatenate, strip padding, decode, and deliver.
    ///
    /// Decoding happens unconditionally and in arrival order; skipping a
    /// block would desynchronise the shared dynamic table.
    fn finish_header_block(&mut self, id: NonZeroStreamId) -> H2Result<()> {
        self.continuation_stream = None;
        let accumulator = self
            .streams
            .get_mut(&id)
            .and_then(Stream::take_header_block)
            .ok_or_else(|| H2Error::protocol("END_HEADERS without an open header block"))?;
        let block = accumulator.into_block()?;
        let headers = self.decoding_context.decode(&block)?;
        check_pseudo_header_order(&headers)?;
        let stream = self.stream_entry(id);
        stream.recv_headers_queue.push_back(headers);
        Ok(())
    }

    fn write_frame(
        &mut self,
        ty: FrameType,
        flags: u8,
        stream_id: StreamId,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        trace!(
            "send {:?} flags {:#x} stream {} length {}",
            ty,
            flags,
            stream_id,
            payload.len()
        );
        self.transport
            .write_frame(ty as u8, flags, stream_id, payload, timeout)
    }

    /// Sends a SETTINGS frame; the values take effect locally once the peer
    /// acknowledges them.
    pub fn send_settings(
        &mut self,
        params: &[(SettingsParameter, u32)],
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        let payload = encode_settings(params);
        self.write_frame(FrameType::Settings, 0, 0, &payload, timeout)?;
        self.sent_settings.push_back(params.to_vec());
        Ok(())
    }

    /// Sends a PING and blocks until the matching pong arrives.
    pub fn ping(&mut self, timeout: Option<Duration>) -> StreamResult<()> {
        let deadline = Deadline::new(timeout);
        let opaque = self.next_ping_payload.to_be_bytes();
        self.next_ping_payload += 1;
        self.pongs.insert(opaque, false);
        let sent = deadline
            .remaining()
            .and_then(|left| Ok(self.write_frame(FrameType::Ping, 0, 0, &opaque, left)?));
        if let Err(err) = sent {
            self.pongs.remove(&opaque);
            return Err(err);
        }
        loop {
            if self.pongs.get(&opaque).copied().unwrap_or(false) {
                self.pongs.remove(&opaque);
                return Ok(());
            }
            let pumped = deadline.remaining().and_then(|left| self.step(left));
            match pumped {
                Ok(true) => {}
                Ok(false) => {
                    self.pongs.remove(&opaque);
                    return Err(StreamError::TimedOut);
                }
                Err(err) => {
                    self.pongs.remove(&opaque);
                    return Err(err);
                }
            }
        }
    }

    /// Sends GOAWAY with the highest remote stream id we processed.
    pub fn close(
        &mut self,
        error: ErrorType,
        debug_data: &[u8],
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        let mut payload = Vec::with_capacity(8 + debug_data.len());
        codec::put_u32(&mut payload, self.last_remote_id & STREAM_ID_MASK);
        codec::put_u32(&mut payload, error as u32);
        payload.extend_from_slice(debug_data);
        self.write_frame(FrameType::GoAway, 0, 0, &payload, timeout)?;
        Ok(())
    }

    /// Sends a WINDOW_UPDATE for a stream, or for the connection when
    /// `stream` is `None`.
    ///
    /// # Panics
    /// An increment outside `1..=2^31-1` is a caller bug.
    pub fn write_window_update(
        &mut self,
        stream: Option<NonZeroStreamId>,
        increment: u32,
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        assert!(
            (1..=MAX_WINDOW_SIZE).contains(&increment),
            "window increment {} out of range",
            increment
        );
        let mut payload = Vec::with_capacity(4);
        codec::put_u32(&mut payload, increment);
        self.write_frame(
            FrameType::WindowUpdate,
            0,
            stream.map_or(0, NonZeroStreamId::get),
            &payload,
            timeout,
        )?;
        Ok(())
    }

    /// Returns a chunk's flow-control credit to the peer: one WINDOW_UPDATE
    /// for the stream, then one for the connection, each carrying the wire
    /// length including padding.
    pub fn ack_chunk(&mut self, chunk: &mut Chunk, no_window_update: bool) -> StreamResult<()> {
        chunk.mark_acked();
        if no_window_update || chunk.original_length == 0 {
            return Ok(());
        }
        self.write_window_update(Some(chunk.stream_id), chunk.original_length, None)?;
        self.write_window_update(None, chunk.original_length, None)?;
        Ok(())
    }

    fn debit(&mut self, id: NonZeroStreamId, amount: i32) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.peer_flow_credits -= amount;
        }
        self.peer_flow_credits -= amount;
    }

    fn refund(&mut self, id: NonZeroStreamId, amount: i32) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.peer_flow_credits += amount;
        }
        self.peer_flow_credits += amount;
    }
}

/// One stream's view of the connection; all blocking operations live here.
#[derive(Debug)]
pub struct StreamHandle<'a, T> {
    conn: &'a mut Connection<T>,
    id: NonZeroStreamId,
}

impl<T: Transport> StreamHandle<'_, T> {
    #[must_use]
    pub fn id(&self) -> NonZeroStreamId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.conn.streams[&self.id].state()
    }

    #[must_use]
    pub fn stats_sent(&self) -> u64 {
        self.conn.streams[&self.id].stats_sent()
    }

    #[must_use]
    pub fn rst_stream_error(&self) -> Option<H2Error> {
        self.conn.streams[&self.id].rst_stream_error().cloned()
    }

    fn stream_mut(&mut self) -> &mut Stream {
        self.conn
            .streams
            .get_mut(&self.id)
            .expect("stream evicted while handle alive")
    }

    /// The error a closed stream should surface: its reset error if it has
    /// one, a broken pipe otherwise.
    fn closed_error(&self) -> StreamError {
        match self.conn.streams[&self.id].rst_stream_error() {
            Some(err) => StreamError::Protocol(err.clone()),
            None => StreamError::BrokenPipe,
        }
    }

    /// Waits for the next decoded header list.
    pub fn get_headers(&mut self, timeout: Option<Duration>) -> StreamResult<Headers> {
        let deadline = Deadline::new(timeout);
        loop {
            if let Some(headers) = self.stream_mut().recv_headers_queue.pop_front() {
                return Ok(headers);
            }
            if self.state() == StreamState::Closed {
                return Err(self.closed_error());
            }
            if !self.conn.step(deadline.remaining()?)? {
                return Err(StreamError::TimedOut);
            }
        }
    }

    /// Waits for the next DATA chunk. `Ok(None)` is a clean end of stream.
    ///
    /// A delivered chunk is acknowledged immediately, emitting the pair of
    /// WINDOW_UPDATE frames that lets the peer keep sending.
    pub fn get_next_chunk(&mut self, timeout: Option<Duration>) -> StreamResult<Option<Bytes>> {
        let deadline = Deadline::new(timeout);
        loop {
            match self.stream_mut().chunk_queue.pop_front() {
                Some(Some(mut chunk)) => {
                    self.conn.ack_chunk(&mut chunk, false)?;
                    return Ok(Some(chunk.data));
                }
                Some(None) => return Ok(None),
                None => {
                    match self.state() {
                        StreamState::Closed | StreamState::HalfClosedRemote => {
                            return match self.conn.streams[&self.id].rst_stream_error() {
                                Some(err) => Err(StreamError::Protocol(err.clone())),
                                None => Ok(None),
                            };
                        }
                        _ => {}
                    }
                    if !self.conn.step(deadline.remaining()?)? {
                        return Err(StreamError::TimedOut);
                    }
                }
            }
        }
    }

    /// Encodes and sends a header block, fragmenting into CONTINUATION
    /// frames at the peer's MAX_FRAME_SIZE. END_STREAM rides on the first
    /// frame, END_HEADERS on the last.
    pub fn write_headers(
        &mut self,
        headers: &Headers,
        end_stream: bool,
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        let deadline = Deadline::new(timeout);
        match self.state() {
            StreamState::Closed | StreamState::HalfClosedLocal => return Err(self.closed_error()),
            _ => {}
        }
        let block = self.conn.encoding_context.encode(headers);
        let max_frame = self.conn.peer_settings[SettingsParameter::MaxFrameSize] as usize;
        let pieces: Vec<&[u8]> = if block.is_empty() {
            vec![&[]]
        } else {
            block.chunks(max_frame).collect()
        };
        let last = pieces.len() - 1;
        for (index, piece) in pieces.iter().enumerate() {
            if index == 0 {
                let mut flags = HeadersFlags::empty();
                if end_stream {
                    flags |= HeadersFlags::END_STREAM;
                }
                if index == last {
                    flags |= HeadersFlags::END_HEADERS;
                }
                self.conn.write_frame(
                    FrameType::Headers,
                    flags.bits(),
                    self.id.get(),
                    piece,
                    deadline.remaining()?,
                )?;
            } else {
                let mut flags = ContinuationFlags::empty();
                if index == last {
                    flags |= ContinuationFlags::END_HEADERS;
                }
                self.conn.write_frame(
                    FrameType::Continuation,
                    flags.bits(),
                    self.id.get(),
                    piece,
                    deadline.remaining()?,
                )?;
            }
        }
        let mut flags = HeadersFlags::END_HEADERS;
        if end_stream {
            flags |= HeadersFlags::END_STREAM;
        }
        self.stream_mut()
            .transition(false, FrameType::Headers, Flags::Headers(flags));
        Ok(())
    }

    /// Sends a body, splitting at whatever the stream window, the connection
    /// window, and the peer's MAX_FRAME_SIZE allow, and pumping the
    /// connection while both windows are empty. END_STREAM rides on the
    /// final frame.
    pub fn write_chunk(
        &mut self,
        payload: &[u8],
        end_stream: bool,
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        let deadline = Deadline::new(timeout);
        match self.state() {
            StreamState::Open | StreamState::HalfClosedRemote => {}
            _ => return Err(self.closed_error()),
        }
        let mut offset = 0;
        loop {
            let remaining = payload.len() - offset;
            let max_frame = self.conn.peer_settings[SettingsParameter::MaxFrameSize] as usize;
            let stream_credits = self.conn.streams[&self.id].peer_flow_credits;
            let window = stream_credits.min(self.conn.peer_flow_credits).max(0) as usize;
            let len = remaining.min(window).min(max_frame);
            if remaining > 0 && len == 0 {
                // blocked on flow control until the peer opens a window
                if !self.conn.step(deadline.remaining()?)? {
                    return Err(StreamError::TimedOut);
                }
                if self.state() == StreamState::Closed {
                    return Err(self.closed_error());
                }
                continue;
            }
            let is_last = len == remaining;
            let mut flags = DataFlags::empty();
            if end_stream && is_last {
                flags |= DataFlags::END_STREAM;
            }
            self.conn.debit(self.id, len as i32);
            let left = match deadline.remaining() {
                Ok(left) => left,
                Err(err) => {
                    self.conn.refund(self.id, len as i32);
                    return Err(err);
                }
            };
            if let Err(err) = self.conn.write_frame(
                FrameType::Data,
                flags.bits(),
                self.id.get(),
                &payload[offset..offset + len],
                left,
            ) {
                self.conn.refund(self.id, len as i32);
                return Err(err.into());
            }
            self.stream_mut().stats_sent += len as u64;
            offset += len;
            if is_last {
                if end_stream {
                    self.stream_mut().transition(
                        false,
                        FrameType::Data,
                        Flags::Data(DataFlags::END_STREAM),
                    );
                }
                return Ok(());
            }
        }
    }

    /// Sends RST_STREAM and closes the stream.
    ///
    /// # Panics
    /// Resetting an idle stream is a caller bug.
    pub fn send_rst_stream(
        &mut self,
        error: ErrorType,
        timeout: Option<Duration>,
    ) -> StreamResult<()> {
        assert!(
            self.state() != StreamState::Idle,
            "RST_STREAM on idle stream {}",
            self.id
        );
        let mut payload = Vec::with_capacity(4);
        codec::put_u32(&mut payload, error as u32);
        self.conn.write_frame(
            FrameType::ResetStream,
            0,
            self.id.get(),
            &payload,
            timeout,
        )?;
        self.stream_mut()
            .transition(false, FrameType::ResetStream, Flags::None);
        Ok(())
    }

    /// Tears the stream down: resets it if it is still live, then drains the
    /// chunk queue and hands the unread credit back to the peer in one
    /// connection-level WINDOW_UPDATE.
    pub fn shutdown(&mut self) -> StreamResult<()> {
        if !matches!(self.state(), StreamState::Idle | StreamState::Closed) {
            self.send_rst_stream(ErrorType::NoError, None)?;
        }
        let mut recovered: u32 = 0;
        while let Some(item) = self.stream_mut().chunk_queue.pop_front() {
            if let Some(mut chunk) = item {
                recovered = recovered.saturating_add(chunk.original_length);
                self.conn.ack_chunk(&mut chunk, true)?;
            }
        }
        if recovered > 0 {
            self.conn
                .write_window_update(None, recovered.min(MAX_WINDOW_SIZE), None)?;
        }
        self.conn.priority.retire(self.id.get());
        Ok(())
    }
}

fn require_stream_id(id: StreamId) -> H2Result<NonZeroStreamId> {
    NonZeroStreamId::new(id)
        .ok_or_else(|| H2Error::protocol("frame requires a non-zero stream id"))
}

fn io_to_h2(err: io::Error) -> H2Error {
    H2Error::new(
        ErrorType::InternalError,
        format!("frame write failed: {}", err),
    )
}

fn add_credits(current: i32, increment: u32) -> H2Result<i32> {
    let next = i64::from(current) + i64::from(increment);
    if next > i64::from(MAX_WINDOW_SIZE) {
        return Err(H2Error::flow_control(format!(
            "window of {} grew past the cap",
            current
        )));
    }
    Ok(next as i32)
}

/// Strips the pad-length byte and padding off a DATA payload. The pad length
/// must leave at least one byte of payload and the padding must be zero.
fn strip_padding(mut payload: Vec<u8>, padded: bool) -> H2Result<Vec<u8>> {
    if !padded {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(H2Error::protocol("padded frame without a pad length"));
    }
    let pad = payload[0] as usize;
    let body = payload.len() - 1;
    if pad >= body {
        return Err(H2Error::protocol(format!(
            "pad length {} not smaller than the {} byte payload",
            pad, body
        )));
    }
    if payload[payload.len() - pad..].iter().any(|&byte| byte != 0) {
        return Err(H2Error::protocol("padding contains non-zero bytes"));
    }
    payload.truncate(payload.len() - pad);
    payload.remove(0);
    Ok(payload)
}
