#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
)]

mod chunk;
mod codec;
mod connection;
mod error;
mod flags;
mod hpack;
mod priority;
mod settings;
mod stream;
mod transport;
mod types;

pub use bytes::Bytes;
pub use chunk::Chunk;
pub use connection::{Connection, StreamHandle};
pub use error::{H2Error, H2Result, StreamError, StreamResult};
pub use flags::{
    ContinuationFlags, DataFlags, Flags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags,
};
pub use hpack::{check_pseudo_header_order, DecodingContext, EncodingContext};
pub use priority::PriorityTree;
pub use settings::{decode_settings, encode_settings, MAX_MAX_FRAME_SIZE, MIN_MAX_FRAME_SIZE};
pub use stream::{Stream, StreamState};
pub use transport::{FrameHeader, FramedStream, ScriptedTransport, Transport};
pub use types::{
    ErrorType, FrameType, Headers, NonZeroStreamId, Role, SettingsParameter, StreamId,
    MAX_HEADER_BUFFER_SIZE, MAX_WINDOW_SIZE,
};
