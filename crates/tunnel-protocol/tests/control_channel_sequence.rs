//! Exercises a realistic sequence of frames across the wire boundary: a
//! `register`, a `connect`/`connected`/`data`/`disconnect` session, and a
//! keepalive pair, the way they'd actually appear back-to-back on one
//! control channel.

use std::collections::BTreeMap;

use tunnel_protocol::{codec, Forward, Message, DEFAULT_MAX_FRAME_SIZE};

fn roundtrip(msg: &Message) -> Message {
    let text = codec::encode(msg, DEFAULT_MAX_FRAME_SIZE).unwrap();
    codec::decode(&text, DEFAULT_MAX_FRAME_SIZE).unwrap()
}

#[test]
fn a_full_session_sequence_survives_the_wire() {
    let mut forwarders = BTreeMap::new();
    forwarders.insert("web".to_string(), "webapp:80".to_string());
    forwarders.insert("ssh".to_string(), "sshbox:22".to_string());

    let sequence = vec![
        Message::Register {
            agent_id: "a-web".into(),
            forwarders,
        },
        Message::Registered {
            agent_id: "a-web".into(),
        },
        Message::forward(Forward::Connect {
            session_id: "s1".into(),
            target: "web".into(),
        }),
        Message::forward(Forward::Connected {
            session_id: "s1".into(),
        }),
        Message::forward(Forward::Data {
            session_id: "s1".into(),
            data: tunnel_protocol::payload::encode(b"GET / HTTP/1.1\r\n\r\n"),
        }),
        Message::forward(Forward::Disconnect {
            session_id: "s1".into(),
        }),
        Message::Ping,
        Message::Pong,
    ];

    for msg in &sequence {
        assert_eq!(&roundtrip(msg), msg, "frame did not survive the wire: {msg:?}");
    }
}

#[test]
fn a_data_frames_payload_survives_alongside_its_envelope() {
    let body = (0u8..=255).cycle().take(4096).collect::<Vec<u8>>();
    let msg = Message::forward(Forward::Data {
        session_id: "s1".into(),
        data: tunnel_protocol::payload::encode(&body),
    });

    let back = roundtrip(&msg);
    let Message::Forward {
        data: Forward::Data { data, .. },
    } = back
    else {
        panic!("expected a data frame");
    };
    assert_eq!(tunnel_protocol::payload::decode(&data).unwrap(), body);
}

#[test]
fn an_oversize_session_in_the_sequence_is_rejected_without_corrupting_the_channel() {
    let huge = Message::forward(Forward::Data {
        session_id: "s1".into(),
        data: "x".repeat(DEFAULT_MAX_FRAME_SIZE),
    });
    assert!(codec::encode(&huge, DEFAULT_MAX_FRAME_SIZE).is_err());

    // the channel itself keeps working for the next, well-sized frame
    let ping = roundtrip(&Message::Ping);
    assert_eq!(ping, Message::Ping);
}
