//! Window accounting on the send path: stream and connection credits,
//! blocking, and INITIAL_WINDOW_SIZE changes.

mod common;

use common::{client, owned};
use h2stream::{
    encode_settings, DataFlags, FrameType, SettingsParameter, StreamError, StreamState,
};
use std::time::Duration;

#[test]
fn write_chunk_blocks_until_the_peer_opens_the_window() -> anyhow::Result<()> {
    let mut conn = client();

    // the peer starts every stream with a 100 byte window
    conn.transport_mut().push_frame(
        FrameType::Settings as u8,
        0,
        0,
        encode_settings(&[(SettingsParameter::InitialWindowSize, 100)]),
    );
    conn.step(None)?;

    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;
    conn.transport_mut().take_written();

    // credit that only becomes visible once write_chunk pumps the connection
    for _ in 0..2 {
        conn.transport_mut().push_frame(
            FrameType::WindowUpdate as u8,
            0,
            id.get(),
            100u32.to_be_bytes().to_vec(),
        );
    }

    let body = vec![0x2a; 250];
    conn.stream(id).write_chunk(&body, true, None)?;

    let written = conn.transport_mut().take_written();
    assert_eq!(written.len(), 3);
    for (header, _) in &written {
        assert_eq!(header.ty, FrameType::Data as u8);
        assert_eq!(header.stream_id, id.get());
    }
    assert_eq!(written[0].1.len(), 100);
    assert_eq!(written[0].0.flags, 0);
    assert_eq!(written[1].1.len(), 100);
    assert_eq!(written[1].0.flags, 0);
    assert_eq!(written[2].1.len(), 50);
    assert_eq!(written[2].0.flags, DataFlags::END_STREAM.bits());

    assert_eq!(conn.stream(id).state(), StreamState::HalfClosedLocal);
    assert_eq!(conn.stream(id).stats_sent(), 250);
    assert_eq!(conn.peer_flow_credits(), 65_535 - 250);
    Ok(())
}

#[test]
fn write_chunk_times_out_while_starved() -> anyhow::Result<()> {
    let mut conn = client();
    conn.transport_mut().push_frame(
        FrameType::Settings as u8,
        0,
        0,
        encode_settings(&[(SettingsParameter::InitialWindowSize, 10)]),
    );
    conn.step(None)?;

    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;
    conn.transport_mut().take_written();

    let err = conn
        .stream(id)
        .write_chunk(&[0; 64], true, Some(Duration::from_millis(10)))
        .unwrap_err();
    assert!(matches!(err, StreamError::TimedOut));

    // the first 10 bytes went out before the window starved
    let written = conn.transport_mut().take_written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].1.len(), 10);
    assert_eq!(written[0].0.flags, 0);
    Ok(())
}

#[test]
fn outbound_data_debits_both_windows() -> anyhow::Result<()> {
    let mut conn = client();
    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;

    conn.stream(id).write_chunk(b"0123456789", false, None)?;
    assert_eq!(conn.peer_flow_credits(), 65_535 - 10);
    // and the stream window shrank in step: a second full-window write
    // would block, so only 65_525 more bytes flow without new credit
    conn.stream(id).write_chunk(&vec![0; 65_525], true, None)?;
    assert_eq!(conn.peer_flow_credits(), 0);
    Ok(())
}

#[test]
fn connection_window_limits_across_streams() -> anyhow::Result<()> {
    let mut conn = client();

    // per-stream windows far beyond the 65 535 byte connection window
    conn.transport_mut().push_frame(
        FrameType::Settings as u8,
        0,
        0,
        encode_settings(&[(SettingsParameter::InitialWindowSize, 1_000_000)]),
    );
    conn.step(None)?;

    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;
    conn.transport_mut().take_written();

    conn.transport_mut().push_frame(
        FrameType::WindowUpdate as u8,
        0,
        0,
        100u32.to_be_bytes().to_vec(),
    );

    let body = vec![0; 65_635];
    conn.stream(id).write_chunk(&body, true, None)?;

    let written = conn.transport_mut().take_written();
    let total: usize = written.iter().map(|(_, payload)| payload.len()).sum();
    assert_eq!(total, 65_635);
    let (last_header, _) = written.last().unwrap();
    assert_eq!(last_header.flags, DataFlags::END_STREAM.bits());
    assert_eq!(conn.peer_flow_credits(), 0);
    Ok(())
}

#[test]
fn initial_window_size_change_moves_open_streams() -> anyhow::Result<()> {
    let mut conn = client();
    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;
    conn.stream(id).write_chunk(&[0; 35], false, None)?;

    conn.transport_mut().push_frame(
        FrameType::Settings as u8,
        0,
        0,
        encode_settings(&[(SettingsParameter::InitialWindowSize, 100)]),
    );
    conn.step(None)?;

    // 65_535 - 35 spent, shifted down by the 65_435 delta
    conn.transport_mut().take_written();
    conn.stream(id).write_chunk(&[0; 65], true, None)?;
    let written = conn.transport_mut().take_written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].1.len(), 65);
    Ok(())
}

#[test]
fn window_updates_credit_stream_and_connection_separately() -> anyhow::Result<()> {
    let mut conn = client();
    let id = conn.open_stream();
    conn.stream(id)
        .write_headers(&owned(&[(":method", "POST")]), false, None)?;
    conn.stream(id).write_chunk(&[0; 100], false, None)?;
    assert_eq!(conn.peer_flow_credits(), 65_435);

    conn.transport_mut().push_frame(
        FrameType::WindowUpdate as u8,
        0,
        0,
        40u32.to_be_bytes().to_vec(),
    );
    conn.step(None)?;
    assert_eq!(conn.peer_flow_credits(), 65_475);

    conn.transport_mut().push_frame(
        FrameType::WindowUpdate as u8,
        0,
        id.get(),
        40u32.to_be_bytes().to_vec(),
    );
    conn.step(None)?;
    // the stream window moved, the connection window did not
    assert_eq!(conn.peer_flow_credits(), 65_475);
    conn.transport_mut().take_written();
    conn.stream(id).write_chunk(&[0; 65_475], true, None)?;
    let written = conn.transport_mut().take_written();
    let total: usize = written.iter().map(|(_, payload)| payload.len()).sum();
    assert_eq!(total, 65_475);
    Ok(())
}
