//! Thin contexts around the `hpack` crate.
//!
//! Both contexts own dynamic-table state that only stays correct if every
//! header block on the connection passes through them in frame-arrival order,
//! including blocks for streams that are about to be discarded.

use crate::error::{H2Error, H2Result};
use crate::types::{ErrorType, Headers};
use std::fmt;

/// Initial dynamic-table budget on both sides (RFC 7541 §4.2).
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

pub struct EncodingContext {
    encoder: hpack::Encoder<'static>,
    pending_table_size: Option<u32>,
}

impl fmt::Debug for EncodingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingContext")
            .field("pending_table_size", &self.pending_table_size)
            .finish()
    }
}

impl Default for EncodingContext {
    fn default() -> Self {
        Self {
            encoder: hpack::Encoder::new(),
            pending_table_size: None,
        }
    }
}

impl EncodingContext {
    /// Records a peer-announced HEADER_TABLE_SIZE. The matching
    /// dynamic-table-size update is emitted at the front of the next block.
    /// The size is clamped to the table budget the encoder actually uses, so
    /// the two sides cannot drift apart.
    pub fn set_max_table_size(&mut self, size: u32) {
        self.pending_table_size = Some(size.min(DEFAULT_HEADER_TABLE_SIZE));
    }

    pub fn encode(&mut self, headers: &Headers) -> Vec<u8> {
        let mut block = Vec::new();
        if let Some(size) = self.pending_table_size.take() {
            put_size_update(&mut block, size as usize);
        }
        block.extend(
            self.encoder
                .encode(headers.iter().map(|(key, value)| (key.as_bytes(), value.as_bytes()))),
        );
        block
    }
}

pub struct DecodingContext {
    decoder: hpack::Decoder<'static>,
}

impl fmt::Debug for DecodingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodingContext").finish()
    }
}

impl Default for DecodingContext {
    fn default() -> Self {
        Self {
            decoder: hpack::Decoder::new(),
        }
    }
}

impl DecodingContext {
    pub fn decode(&mut self, block: &[u8]) -> H2Result<Headers> {
        let mut headers = Headers::new();
        self.decoder
            .decode_with_cb(block, |key, value| {
                headers.push((
                    String::from_utf8_lossy(&key).to_string(),
                    String::from_utf8_lossy(&value).to_string(),
                ));
            })
            .map_err(|err| {
                H2Error::new(
                    ErrorType::CompressionError,
                    format!("header block does not decode: {:?}", err),
                )
            })?;
        Ok(headers)
    }
}

/// Every pseudo-header must precede every regular header in a decoded block.
pub fn check_pseudo_header_order(headers: &Headers) -> H2Result<()> {
    let mut seen_regular = false;
    for (name, _) in headers {
        if name.starts_with(':') {
            if seen_regular {
                return Err(H2Error::protocol(format!(
                    "pseudo-header {} after regular headers",
                    name
                )));
            }
        } else {
            seen_regular = true;
        }
    }
    Ok(())
}

/// Dynamic-table-size update: `001` followed by a 5-bit-prefix integer
/// (RFC 7541 §6.3 and §5.1).
fn put_size_update(out: &mut Vec<u8>, value: usize) {
    const PREFIX_MAX: usize = (1 << 5) - 1;
    if value < PREFIX_MAX {
        out.push(0x20 | value as u8);
        return;
    }
    out.push(0x20 | PREFIX_MAX as u8);
    let mut rest = value - PREFIX_MAX;
    while rest >= 128 {
        out.push((rest % 128 + 128) as u8);
        rest /= 128;
    }
    out.push(rest as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut encoding = EncodingContext::default();
        let mut decoding = DecodingContext::default();
        let headers: Headers = vec![
            (":method".to_owned(), "GET".to_owned()),
            (":path".to_owned(), "/".to_owned()),
            ("accept".to_owned(), "*/*".to_owned()),
        ];
        let block = encoding.encode(&headers);
        assert_eq!(decoding.decode(&block).unwrap(), headers);
    }

    #[test]
    fn pending_size_update_prefixes_next_block() {
        let mut encoding = EncodingContext::default();
        encoding.set_max_table_size(0);
        let block = encoding.encode(&vec![(":method".to_owned(), "GET".to_owned())]);
        assert_eq!(block[0], 0x20);
        // consumed: the update must not repeat
        let next = encoding.encode(&vec![(":method".to_owned(), "GET".to_owned())]);
        assert_ne!(next[0], 0x20);
    }

    #[test]
    fn size_update_integer_encoding() {
        let mut out = Vec::new();
        put_size_update(&mut out, 30);
        assert_eq!(out, [0x3e]);
        out.clear();
        put_size_update(&mut out, 31);
        assert_eq!(out, [0x3f, 0x00]);
        out.clear();
        put_size_update(&mut out, 4096);
        assert_eq!(out, [0x3f, 0xe1, 0x1f]);
    }

    #[test]
    fn pseudo_headers_must_lead() {
        let good: Headers = vec![
            (":status".to_owned(), "200".to_owned()),
            ("server".to_owned(), "x".to_owned()),
        ];
        assert!(check_pseudo_header_order(&good).is_ok());

        let bad: Headers = vec![
            ("server".to_owned(), "x".to_owned()),
            (":status".to_owned(), "200".to_owned()),
        ];
        assert!(check_pseudo_header_order(&bad).is_err());
    }

    #[test]
    fn garbage_does_not_decode() {
        let mut decoding = DecodingContext::default();
        // index 0 is not a valid indexed header field
        assert!(decoding.decode(&[0x80]).is_err());
    }
}
