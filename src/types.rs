use num_derive::{FromPrimitive, ToPrimitive};

pub type StreamId = u32;
pub type NonZeroStreamId = std::num::NonZeroU32;

/// Decoded header list, in wire order. Order matters: pseudo-headers must
/// precede regular headers and the check happens on this representation.
pub type Headers = Vec<(String, String)>;

/// Largest value a 31-bit field can carry; also the flow-control window cap.
pub const MAX_WINDOW_SIZE: u32 = u32::MAX >> 1;

/// Upper bound on a header block accumulated across CONTINUATION frames.
pub const MAX_HEADER_BUFFER_SIZE: usize = 409_600;

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// The associated condition is not a result of an error. For example, a GOAWAY might include this code to indicate graceful shutdown of a connection.
    NoError = 0x0,
    /// The endpoint detected an unspecific protocol error. This error is for use when a more specific error code is not available.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// The endpoint sent a SETTINGS frame but did not receive a response in a timely manner.
    SettingsTimeout = 0x4,
    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x5,
    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x6,
    /// The endpoint refused the stream prior to performing any application processing.
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate that the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context for the connection.
    CompressionError = 0x9,
    /// The connection established in response to a CONNECT request was reset or abnormally closed.
    ConnectError = 0xa,
    /// The endpoint detected that its peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport has properties that do not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http11Required = 0xd,
}

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    enum_map::Enum,
)]
#[repr(u16)]
#[non_exhaustive]
pub enum SettingsParameter {
    /// Maximum size of the header compression table used to decode header blocks we send, in octets. The initial value is 4,096 octets.
    HeaderTableSize = 0x1,
    /// 0 disables server push; the initial value is 1. Any other value is a connection error of type PROTOCOL_ERROR.
    EnablePush = 0x2,
    /// Maximum number of concurrent streams the sender will allow. Initially unlimited.
    MaxConcurrentStreams = 0x3,
    /// The sender's initial window size for stream-level flow control. The initial value is 2^16-1 (65,535) octets; values above 2^31-1 are a FLOW_CONTROL_ERROR.
    InitialWindowSize = 0x4,
    /// Largest frame payload the sender is willing to receive, in octets. Must stay within [2^14, 2^24-1].
    MaxFrameSize = 0x5,
    /// Advisory maximum size of the header list the sender is prepared to accept, in octets.
    MaxHeaderListSize = 0x6,
}
