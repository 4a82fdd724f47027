//! Property tests for the primitive codec and representative messages.

use bytes::Bytes;
use kafwire::protocol::kafka::messages::{ApiMessage, HeartbeatRequest, JoinGroupRequest};
use kafwire::protocol::kafka::records::{Record, RecordBatch};
use kafwire::{PacketDecoder, PacketEncoder};
use proptest::prelude::*;

fn group_protocol() -> impl Strategy<Value = (String, Vec<u8>)> {
    ("[a-z]{1,12}", proptest::collection::vec(any::<u8>(), 0..32))
}

proptest! {
    #[test]
    fn varint_round_trip(value in any::<i32>()) {
        let mut enc = PacketEncoder::new();
        enc.put_varint(value);
        let bytes = enc.finish().unwrap();
        prop_assert!(bytes.len() <= 5);
        let mut dec = PacketDecoder::new(&bytes);
        prop_assert_eq!(dec.get_varint().unwrap(), value);
        prop_assert!(dec.is_empty());
    }

    #[test]
    fn varlong_round_trip(value in any::<i64>()) {
        let mut enc = PacketEncoder::new();
        enc.put_varlong(value);
        let bytes = enc.finish().unwrap();
        let mut dec = PacketDecoder::new(&bytes);
        prop_assert_eq!(dec.get_varlong().unwrap(), value);
        prop_assert!(dec.is_empty());
    }

    #[test]
    fn nullable_string_keeps_absent_empty_and_populated_apart(value in proptest::option::of(".{0,40}")) {
        let mut enc = PacketEncoder::new();
        enc.put_nullable_string(value.as_deref()).unwrap();
        let bytes = enc.finish().unwrap();
        let mut dec = PacketDecoder::new(&bytes);
        prop_assert_eq!(dec.get_nullable_string().unwrap(), value);
    }

    #[test]
    fn heartbeat_round_trip_at_every_version(
        version in 0i16..=3,
        group_id in "[a-zA-Z0-9._-]{0,24}",
        generation_id in any::<i32>(),
        member_id in "[a-z0-9-]{0,36}",
        group_instance_id in proptest::option::of("[a-z0-9]{0,12}"),
    ) {
        let mut request = HeartbeatRequest::new(version);
        request.group_id = group_id;
        request.generation_id = generation_id;
        request.member_id = member_id;
        request.group_instance_id = group_instance_id;

        let bytes = request.to_bytes().unwrap();
        let decoded = HeartbeatRequest::from_bytes(&bytes, version).unwrap();

        // the instance id only survives where the version carries it
        let mut expected = request.clone();
        if version < 3 {
            expected.group_instance_id = None;
        }
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn join_group_round_trip_preserves_protocol_order(
        version in 0i16..=5,
        session_timeout_ms in 0i32..=300_000,
        rebalance_timeout_ms in 0i32..=300_000,
        protocols in proptest::collection::vec(group_protocol(), 0..5),
    ) {
        let mut request = JoinGroupRequest::new(version);
        request.group_id = "group".to_string();
        request.session_timeout_ms = session_timeout_ms;
        request.rebalance_timeout_ms = rebalance_timeout_ms;
        request.protocol_type = "consumer".to_string();
        for (name, metadata) in &protocols {
            request.add_group_protocol(name.clone(), metadata.clone());
        }

        let bytes = request.to_bytes().unwrap();
        let decoded = JoinGroupRequest::from_bytes(&bytes, version).unwrap();
        let names: Vec<&str> = decoded.protocols.iter().map(|p| p.name.as_str()).collect();
        let expected: Vec<&str> = protocols.iter().map(|(n, _)| n.as_str()).collect();
        prop_assert_eq!(names, expected);
        let expected_rebalance = if version >= 1 { rebalance_timeout_ms } else { 0 };
        prop_assert_eq!(decoded.rebalance_timeout_ms, expected_rebalance);
    }

    #[test]
    fn record_batch_round_trip(
        first_timestamp in 0i64..=4_102_444_800_000,
        values in proptest::collection::vec(proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)), 1..8),
    ) {
        let mut batch = RecordBatch::new(first_timestamp);
        for (i, value) in values.into_iter().enumerate() {
            let key = Bytes::from(format!("key-{}", i));
            batch.push(Record::new(Some(key), value.map(Bytes::from)));
        }

        let bytes = batch.encode_to_bytes().unwrap();
        let decoded = RecordBatch::decode_all(&bytes).unwrap();
        prop_assert_eq!(decoded, vec![batch]);
    }

    #[test]
    fn arbitrary_input_never_panics(input in proptest::collection::vec(any::<u8>(), 0..128), version in 0i16..=5) {
        let _ = JoinGroupRequest::from_bytes(&input, version);
        let _ = RecordBatch::decode_all(&input);
    }
}
