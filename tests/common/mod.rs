//! Shared plumbing for the integration tests: a client connection over the
//! scripted transport, and hand-built frames for the peer side.
#![allow(dead_code)]

use h2stream::{Connection, FrameHeader, FrameType, Role, ScriptedTransport, StreamId};

pub fn client() -> Connection<ScriptedTransport> {
    let _ = env_logger::builder().is_test(true).try_init();
    Connection::new(Role::Client, ScriptedTransport::new())
}

/// Builds a de-framed inbound frame for `Connection::handle_frame`.
pub fn frame(
    ty: FrameType,
    flags: u8,
    stream_id: StreamId,
    payload: &[u8],
) -> (FrameHeader, Vec<u8>) {
    (
        FrameHeader {
            length: payload.len() as u32,
            ty: ty as u8,
            flags,
            stream_id,
        },
        payload.to_vec(),
    )
}

/// Encodes a header block the way a peer would. A fresh encoder only refers
/// to the static table and to entries it adds itself, so a long-lived
/// decoder on the other side stays in sync.
pub fn encode_block(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = hpack::Encoder::new();
    encoder.encode(headers.iter().map(|&(key, value)| (key.as_bytes(), value.as_bytes())))
}

pub fn owned(headers: &[(&str, &str)]) -> h2stream::Headers {
    headers
        .iter()
        .map(|&(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
