//! Wire codec for the SETTINGS payload: repeated `(id: u16, value: u32)`
//! records, validated per https://httpwg.org/specs/rfc7540.html#SettingValues.

use crate::codec::{put_u16, put_u32, read_u16, read_u32};
use crate::error::{H2Error, H2Result};
use crate::types::{Role, SettingsParameter, MAX_WINDOW_SIZE};
use num_traits::FromPrimitive;

const RECORD_LEN: usize = 2 + 4;

/// Smallest value SETTINGS_MAX_FRAME_SIZE may take (also its initial value).
pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;
/// Largest value SETTINGS_MAX_FRAME_SIZE may take (2^24 - 1).
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Decodes a SETTINGS payload into `(parameter, value)` pairs in wire order.
///
/// Unknown parameter ids are skipped, as the protocol requires. Recognized
/// parameters are validated from the point of view of `role`: a client treats
/// a peer enabling push as a protocol error.
pub fn decode_settings(payload: &[u8], role: Role) -> H2Result<Vec<(SettingsParameter, u32)>> {
    if payload.len() % RECORD_LEN != 0 {
        return Err(H2Error::frame_size(format!(
            "SETTINGS payload of {} bytes is not a multiple of {}",
            payload.len(),
            RECORD_LEN
        )));
    }

    let mut params = Vec::with_capacity(payload.len() / RECORD_LEN);
    for record in payload.chunks_exact(RECORD_LEN) {
        let id = read_u16(record, 0)?;
        let value = read_u32(record, 2)?;
        // the protocol says to ignore unknown settings
        let Some(param) = SettingsParameter::from_u16(id) else {
            continue;
        };
        validate(param, value, role)?;
        params.push((param, value));
    }
    Ok(params)
}

fn validate(param: SettingsParameter, value: u32, role: Role) -> H2Result<()> {
    match param {
        SettingsParameter::EnablePush if value > 1 => Err(H2Error::protocol(format!(
            "ENABLE_PUSH must be 0 or 1, got {}",
            value
        ))),
        SettingsParameter::EnablePush if value == 1 && role == Role::Client => Err(
            H2Error::protocol("a server may not advertise ENABLE_PUSH = 1"),
        ),
        SettingsParameter::InitialWindowSize if value > MAX_WINDOW_SIZE => {
            Err(H2Error::flow_control(format!(
                "INITIAL_WINDOW_SIZE {} exceeds the window cap",
                value
            )))
        }
        SettingsParameter::MaxFrameSize
            if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) =>
        {
            Err(H2Error::protocol(format!(
                "MAX_FRAME_SIZE {} outside [{}, {}]",
                value, MIN_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE
            )))
        }
        _ => Ok(()),
    }
}

/// Encodes `(parameter, value)` pairs into the SETTINGS wire form, preserving
/// their order.
pub fn encode_settings<'a>(
    params: impl IntoIterator<Item = &'a (SettingsParameter, u32)>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    for &(param, value) in params {
        put_u16(&mut payload, param as u16);
        put_u32(&mut payload, value);
    }
    payload
}
