use super::*;
use proptest::prelude::*;

fn decode_all(decoder: &mut FrameDecoder, packets: &[Vec<u8>]) -> Vec<Vec<u8>> {
    packets.iter().filter_map(|p| decoder.push(p)).collect()
}

#[test]
fn test_empty_message_is_single_solo_packet() {
    let encoder = FrameEncoder::default();
    let packets = encoder.encode(&[]);

    assert_eq!(packets, vec![vec![0b1100_0000]]);

    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.push(&packets[0]), Some(Vec::new()));
}

#[test]
fn test_exactly_one_packet_payload_is_solo() {
    let encoder = FrameEncoder::new(20).unwrap();
    let message: Vec<u8> = (0..19).collect();

    let packets = encoder.encode(&message);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0][0], 0b1100_0000 | 19);
    assert_eq!(packets[0].len(), 20);
}

#[test]
fn test_one_byte_over_splits_into_start_and_end() {
    let encoder = FrameEncoder::new(20).unwrap();
    let message: Vec<u8> = (0..20).collect();

    let packets = encoder.encode(&message);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0][0], 0b1000_0000 | 19);
    assert_eq!(packets[1][0], 0b0100_0000 | 1);

    let mut decoder = FrameDecoder::new();
    assert_eq!(decode_all(&mut decoder, &packets), vec![message]);
}

#[test]
fn test_middle_packets_are_continue() {
    let encoder = FrameEncoder::new(4).unwrap();
    let packets = encoder.encode(b"abcdefghij");

    let states: Vec<u8> = packets.iter().map(|p| p[0] >> 6).collect();
    assert_eq!(states, vec![0b10, 0b00, 0b00, 0b01]);
}

#[test]
fn test_invalid_packet_sizes_rejected() {
    assert!(FrameEncoder::new(1).is_err());
    assert!(FrameEncoder::new(65).is_err());
    assert!(FrameEncoder::new(2).is_ok());
    assert!(FrameEncoder::new(64).is_ok());
}

#[test]
fn test_size_mismatch_dropped_silently() {
    let mut decoder = FrameDecoder::new();

    // header claims 5 bytes, carries 3
    assert_eq!(decoder.push(&[0b1100_0101, 1, 2, 3]), None);
    assert_eq!(decoder.dropped_packets(), 1);
    assert!(!decoder.is_mid_message());

    assert_eq!(decoder.push(&[]), None);
    assert_eq!(decoder.dropped_packets(), 2);
}

#[test]
fn test_continue_while_idle_dropped() {
    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.push(&[0b0000_0001, 9]), None);
    assert_eq!(decoder.push(&[0b0100_0001, 9]), None);
    assert_eq!(decoder.dropped_packets(), 2);
}

#[test]
fn test_solo_mid_message_dropped_and_partial_kept() {
    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.push(&[0b1000_0001, 1]), None);
    assert_eq!(decoder.push(&[0b1100_0001, 7]), None);
    assert!(decoder.is_mid_message());

    assert_eq!(decoder.push(&[0b0100_0001, 2]), Some(vec![1, 2]));
}

#[test]
fn test_restart_discards_partial() {
    let mut decoder = FrameDecoder::new();
    decoder.push(&[0b1000_0010, 1, 1]);
    decoder.push(&[0b1000_0001, 5]);
    assert_eq!(decoder.push(&[0b0100_0001, 6]), Some(vec![5, 6]));
    assert_eq!(decoder.dropped_packets(), 1);
}

#[test]
fn test_lost_end_recovers_on_next_message() {
    let encoder = FrameEncoder::new(4).unwrap();
    let mut decoder = FrameDecoder::new();

    let first = encoder.encode(b"abcdefgh");
    for packet in &first[..first.len() - 1] {
        assert_eq!(decoder.push(packet), None);
    }

    let second = encoder.encode(b"ijklmnop");
    assert_eq!(decode_all(&mut decoder, &second), vec![b"ijklmnop".to_vec()]);
}

#[test]
fn test_reset_clears_state() {
    let mut decoder = FrameDecoder::new();
    decoder.push(&[0b1000_0001, 1]);
    decoder.reset();
    assert!(!decoder.is_mid_message());
    assert_eq!(decoder.push(&[0b1100_0001, 2]), Some(vec![2]));
}

proptest! {
    #[test]
    fn prop_roundtrip(message in proptest::collection::vec(any::<u8>(), 0..400), size in 2usize..=64) {
        let encoder = FrameEncoder::new(size).unwrap();
        let packets = encoder.encode(&message);

        for packet in &packets {
            prop_assert!(packet.len() <= size);
        }

        let mut decoder = FrameDecoder::new();
        let decoded = decode_all(&mut decoder, &packets);
        prop_assert_eq!(decoded, vec![message]);
        prop_assert!(!decoder.is_mid_message());
    }

    #[test]
    fn prop_boundary_lengths(size in 2usize..=64, extra in 0usize..3) {
        let encoder = FrameEncoder::new(size).unwrap();
        let message = vec![0xA5u8; (size - 1) * (extra + 1)];
        let packets = encoder.encode(&message);
        prop_assert_eq!(packets.len(), extra + 1);

        let mut decoder = FrameDecoder::new();
        prop_assert_eq!(decode_all(&mut decoder, &packets), vec![message]);
    }
}
