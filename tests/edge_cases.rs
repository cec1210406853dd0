#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions, malformed input and concurrent use

use packetwire::config::NetworkConfig;
use packetwire::core::element::Tag;
use packetwire::core::packet::MIN_PACKET_LEN;
use packetwire::error::ProtocolError;
use packetwire::protocol::opcodes;
use packetwire::transport::Cipher;
use packetwire::utils::crypto::{Crypto, KEY_LEN, NONCE_LEN, TAG_LEN};
use packetwire::utils::timeout::with_timeout_error;
use packetwire::{Connection, ConnectionRegistry, Dispatcher, Packet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_body() {
    let bytes = Packet::new(7, 7).build();
    assert_eq!(bytes.len(), MIN_PACKET_LEN);

    let decoded = Packet::parse(&bytes).expect("empty body parses");
    assert_eq!(decoded.element_count(), 0);
    assert_eq!(decoded.peek().unwrap(), Tag::None);
}

#[test]
fn test_packet_empty_buffer() {
    assert!(matches!(
        Packet::parse(&[]),
        Err(ProtocolError::InvalidHeader(_))
    ));
}

#[test]
fn test_packet_truncated_header() {
    let bytes = Packet::new(1, 1).build();
    for len in 0..bytes.len() {
        assert!(Packet::parse(&bytes[..len]).is_err(), "prefix of {len} bytes");
    }
}

#[test]
fn test_packet_missing_terminator() {
    let mut bytes = Packet::new(1, 1).build();
    bytes[12] = 0x01;
    assert!(matches!(
        Packet::parse(&bytes),
        Err(ProtocolError::InvalidHeader(_))
    ));
}

#[test]
fn test_packet_overlong_varint() {
    let mut bytes = vec![0u8; 10];
    bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x00]);
    assert!(matches!(
        Packet::parse(&bytes),
        Err(ProtocolError::MalformedVarint)
    ));
}

#[test]
fn test_packet_extreme_header_values() {
    let packet = Packet::new(u16::MAX, i64::MIN);
    let decoded = Packet::parse(&packet.build()).unwrap();
    assert_eq!(decoded.opcode(), u16::MAX);
    assert_eq!(decoded.id(), i64::MIN);
}

#[test]
fn test_packet_unknown_tag_in_body() {
    let mut bytes = Packet::new(1, 1).with(1u8).unwrap().build();
    let tag_at = bytes.len() - 2;
    bytes[tag_at] = 0x20;

    let err = Packet::parse(&bytes).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidTag(0x20)));
    assert!(err.is_protocol_violation());
}

#[test]
fn test_packet_string_length_past_body() {
    // String tag claiming 10 bytes with only 2 present
    let mut bytes = Packet::new(1, 1).with("ab").unwrap().build();
    let len_at = bytes.len() - 4;
    bytes[len_at] = 10;

    assert!(matches!(
        Packet::parse(&bytes),
        Err(ProtocolError::UnexpectedEof { .. })
    ));
}

#[test]
fn test_packet_element_count_overstated() {
    let mut bytes = Packet::new(1, 1).with(9u8).unwrap().build();
    // element count varint sits right after the one-byte body length
    bytes[11] = 5;

    let err = Packet::parse(&bytes).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidHeader(_)));
    assert!(err.is_protocol_violation());
}

#[test]
fn test_packet_element_count_understated() {
    let mut bytes = Packet::new(1, 1)
        .with(1u8)
        .and_then(|p| p.with(2u8))
        .unwrap()
        .build();
    bytes[11] = 1;
    assert!(matches!(
        Packet::parse(&bytes),
        Err(ProtocolError::InvalidHeader(_))
    ));
}

#[test]
fn test_packet_skip_past_end_stops_at_end() {
    let packet = Packet::new(1, 1).with(1u8).unwrap();
    packet.skip(5).unwrap();
    assert_eq!(packet.peek().unwrap(), Tag::None);
    assert_eq!(packet.read::<u8>().unwrap(), 0);
}

#[test]
fn test_packet_bool_nonzero_is_true() {
    let mut bytes = Packet::new(1, 1).with(true).unwrap().build();
    let last = bytes.len() - 1;
    bytes[last] = 0x02;

    let decoded = Packet::parse(&bytes).unwrap();
    assert!(decoded.read::<bool>().unwrap());
}

#[test]
fn test_packet_oversized_bin_rejected() {
    let packet = Packet::new(1, 1);
    let blob = vec![0u8; usize::from(u16::MAX) + 1];
    assert!(matches!(
        packet.write(blob.as_slice()),
        Err(ProtocolError::ElementTooLarge(_))
    ));
    assert_eq!(packet.element_count(), 0);
}

#[test]
fn test_packet_nan_survives() {
    let packet = Packet::new(1, 1).with(f64::NAN).unwrap();
    let decoded = Packet::parse(&packet.build()).unwrap();
    assert!(decoded.read::<f64>().unwrap().is_nan());
}

// ============================================================================
// CRYPTOGRAPHY EDGE CASES
// ============================================================================

#[test]
fn test_crypto_encode_empty_frame() {
    let mut crypto = Crypto::new(&[7; KEY_LEN]);
    let mut data = Vec::new();
    crypto.encode(&mut data).unwrap();
    assert_eq!(data.len(), NONCE_LEN + TAG_LEN);

    crypto.decode(&mut data).unwrap();
    assert!(data.is_empty());
}

#[test]
fn test_crypto_same_plaintext_different_output() {
    let mut crypto = Crypto::new(&[7; KEY_LEN]);
    let mut a = b"same".to_vec();
    let mut b = b"same".to_vec();
    crypto.encode(&mut a).unwrap();
    crypto.encode(&mut b).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_crypto_corrupted_frame() {
    let mut crypto = Crypto::new(&[7; KEY_LEN]);
    let mut data = b"payload".to_vec();
    crypto.encode(&mut data).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0x01;
    assert!(matches!(
        crypto.decode(&mut data),
        Err(ProtocolError::DecryptionFailure)
    ));
}

#[test]
fn test_crypto_frame_shorter_than_nonce() {
    let mut crypto = Crypto::new(&[7; KEY_LEN]);
    let mut data = vec![0u8; NONCE_LEN - 1];
    assert!(crypto.decode(&mut data).is_err());
}

#[test]
fn test_crypto_disposed_refuses_work() {
    let mut crypto = Crypto::new(&[7; KEY_LEN]);
    crypto.dispose();
    assert!(crypto.is_disposed());

    let mut data = b"x".to_vec();
    assert!(matches!(
        crypto.encode(&mut data),
        Err(ProtocolError::EncryptionFailure)
    ));
}

#[test]
fn test_crypto_nonce_generation_uniqueness() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(Crypto::generate_nonce().unwrap()));
    }
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

#[test]
fn test_dispatcher_handler_override() {
    let dispatcher: Dispatcher<AtomicUsize> = Dispatcher::new();
    dispatcher.register(opcodes::LOGIN, |ctx: &AtomicUsize, _: &Packet| {
        ctx.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    dispatcher.register(opcodes::LOGIN, |ctx: &AtomicUsize, _: &Packet| {
        ctx.fetch_add(100, Ordering::SeqCst);
        Ok(())
    });
    assert_eq!(dispatcher.len(), 1);

    let ctx = AtomicUsize::new(0);
    dispatcher.handle(&ctx, Packet::new(opcodes::LOGIN, 1)).unwrap();
    assert_eq!(ctx.load(Ordering::SeqCst), 100);
}

#[test]
fn test_dispatcher_handler_error_is_returned() {
    let dispatcher: Dispatcher<()> = Dispatcher::new();
    dispatcher.register(opcodes::HANDSHAKE, |_: &(), p: &Packet| {
        let _: i32 = p.read()?;
        Ok(())
    });

    let err = dispatcher
        .handle(&(), Packet::new(opcodes::HANDSHAKE, 1).with("nope").unwrap())
        .unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_dispatcher_handler_may_register_more_handlers() {
    let dispatcher = Arc::new(Dispatcher::<()>::new());
    let inner = Arc::clone(&dispatcher);
    dispatcher.register(opcodes::HANDSHAKE, move |_: &(), _: &Packet| {
        inner.register(opcodes::LOGIN, |_: &(), _: &Packet| Ok(()));
        Ok(())
    });

    dispatcher
        .handle(&(), Packet::new(opcodes::HANDSHAKE, 1))
        .unwrap();
    assert!(dispatcher.is_registered(opcodes::LOGIN));
}

// ============================================================================
// TIMEOUT EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_timeout_zero_duration() {
    let result: packetwire::Result<()> = with_timeout_error(
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        },
        Duration::ZERO,
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_timeout_inner_error_passes_through() {
    let result: packetwire::Result<()> =
        with_timeout_error(async { Err(ProtocolError::NotConnected) }, Duration::from_secs(1))
            .await;
    assert!(matches!(result, Err(ProtocolError::NotConnected)));
}

// ============================================================================
// CONCURRENT EDGE CASES
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_shared_packet() {
    let packet = Arc::new(Packet::new(1, 1));
    let mut handles = Vec::new();
    for task in 0..8u32 {
        let packet = Arc::clone(&packet);
        handles.push(tokio::spawn(async move {
            for i in 0..100u32 {
                packet.write(task * 1000 + i).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(packet.element_count(), 800);
    // every element stays intact
    let decoded = Packet::parse(&packet.build()).unwrap();
    let mut values: Vec<u32> = (0..800).map(|_| decoded.read().unwrap()).collect();
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 800);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registry_updates() {
    let registry = Arc::new(ConnectionRegistry::new());
    let config = NetworkConfig::default();
    let connections: Vec<Arc<Connection>> = (0..64).map(|_| Connection::new(&config)).collect();

    let mut handles = Vec::new();
    for chunk in connections.chunks(8) {
        let registry = Arc::clone(&registry);
        let chunk = chunk.to_vec();
        handles.push(tokio::spawn(async move {
            for conn in &chunk {
                assert!(registry.add(conn));
                assert!(!registry.add(conn));
            }
            for conn in chunk.iter().step_by(2) {
                assert!(registry.remove(conn.id()).is_some());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.len(), 32);
    assert!(registry.remove(connections[0].id()).is_none());
    assert!(registry.contains(connections[1].id()));
}

// ============================================================================
// ERROR PROPAGATION EDGE CASES
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let err = ProtocolError::TypeMismatch {
        expected: Tag::String,
        found: Tag::Int,
    };
    assert_eq!(err.to_string(), "Type mismatch: expected String, got Int");
    assert_eq!(
        ProtocolError::OversizedFrame(99).to_string(),
        "Frame too large: 99 bytes"
    );
}

#[test]
fn test_error_classification() {
    assert!(ProtocolError::InvalidFrameLength(2).is_protocol_violation());
    assert!(!ProtocolError::InvalidFrameLength(2).is_transport());
    assert!(ProtocolError::Timeout.is_transport());
    assert!(!ProtocolError::Custom("app".into()).is_protocol_violation());
    assert!(!ProtocolError::Custom("app".into()).is_transport());
}

// ============================================================================
// RESOURCE CLEANUP EDGE CASES
// ============================================================================

#[test]
fn test_unattached_connection_is_inert() {
    let conn = Connection::new(&NetworkConfig::default());
    assert!(!conn.is_connected());
    conn.send(vec![1, 2, 3]);
    assert!(!conn.disconnect());
    assert_eq!(conn.address(), "<unknown>");
}

#[test]
fn test_connection_ids_are_unique() {
    let config = NetworkConfig::default();
    let a = Connection::new(&config);
    let b = Connection::new(&config);
    assert_ne!(a.id(), b.id());
}
