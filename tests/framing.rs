use grpc_core::{codec_for, decoder_for, Bytes, Code, Deframer, Encoding, Framer};

const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

fn deframe_all(deframer: &mut Deframer) -> Vec<Bytes> {
    let mut messages = Vec::new();
    while let Some(message) = deframer.next_message().unwrap() {
        messages.push(message);
    }
    messages
}

#[test]
fn round_trip() {
    let mut framer = Framer::new(None);
    framer.push(Bytes::from_static(b"hello"), false);
    framer.push(Bytes::new(), false);
    framer.push(Bytes::from(vec![0xab; 1000]), false);
    let chunk = framer.next_chunk().unwrap();

    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&chunk);
    let messages = deframe_all(&mut deframer);
    assert_eq!(
        messages,
        vec![
            Bytes::from_static(b"hello"),
            Bytes::new(),
            Bytes::from(vec![0xab; 1000]),
        ]
    );
    deframer.finish().unwrap();
}

#[test]
fn round_trip_any_split_point() {
    let mut framer = Framer::new(None);
    framer.push(Bytes::from_static(b"first message"), false);
    framer.push(Bytes::from_static(b"second"), false);
    let chunk = framer.next_chunk().unwrap();

    for split in 0..=chunk.len() {
        let mut deframer = Deframer::new(MAX_PAYLOAD, None);
        let mut messages = Vec::new();
        deframer.push(&chunk[..split]);
        messages.extend(deframe_all(&mut deframer));
        deframer.push(&chunk[split..]);
        messages.extend(deframe_all(&mut deframer));
        assert_eq!(
            messages,
            vec![Bytes::from_static(b"first message"), Bytes::from_static(b"second")],
            "split at {split}"
        );
        deframer.finish().unwrap();
    }
}

#[test]
fn length_cap() {
    // Prefix declaring 100 MiB; the payload never needs to arrive.
    let mut prefix = vec![0u8];
    prefix.extend_from_slice(&(100u32 * 1024 * 1024).to_be_bytes());

    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&prefix);
    let err = deframer.next_message().unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
}

#[test]
fn need_more_data_keeps_cursor() {
    let mut framer = Framer::new(None);
    framer.push(Bytes::from_static(b"payload"), false);
    let chunk = framer.next_chunk().unwrap();

    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&chunk[..3]);
    assert!(deframer.next_message().unwrap().is_none());
    deframer.push(&chunk[3..chunk.len() - 1]);
    assert!(deframer.next_message().unwrap().is_none());
    deframer.push(&chunk[chunk.len() - 1..]);
    assert_eq!(
        deframer.next_message().unwrap().unwrap(),
        Bytes::from_static(b"payload")
    );
}

#[test]
fn compressed_frame_without_decompressor() {
    let mut frame = vec![1u8];
    frame.extend_from_slice(&3u32.to_be_bytes());
    frame.extend_from_slice(&[1, 2, 3]);

    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&frame);
    let err = deframer.next_message().unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[test]
fn invalid_compression_flag() {
    let mut frame = vec![7u8];
    frame.extend_from_slice(&0u32.to_be_bytes());

    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&frame);
    assert_eq!(deframer.next_message().unwrap_err().code(), Code::Internal);
}

#[test]
fn gzip_round_trip() {
    let message = Bytes::from(vec![b'z'; 10_000]);
    let mut framer = Framer::new(codec_for(Encoding::Gzip));
    framer.push(message.clone(), true);
    let chunk = framer.next_chunk().unwrap();
    // Compressible input must actually have shrunk on the wire.
    assert!(chunk.len() < message.len());
    assert_eq!(chunk[0], 1);

    let mut deframer = Deframer::new(MAX_PAYLOAD, decoder_for(Encoding::Gzip));
    deframer.push(&chunk);
    assert_eq!(deframer.next_message().unwrap().unwrap(), message);
}

#[test]
fn compression_not_requested_stays_raw() {
    let mut framer = Framer::new(codec_for(Encoding::Gzip));
    framer.push(Bytes::from_static(b"plain"), false);
    let chunk = framer.next_chunk().unwrap();
    assert_eq!(chunk[0], 0);
    assert_eq!(&chunk[5..], b"plain");
}

#[test]
fn chunk_coalesces_under_soft_cap() {
    let mut framer = Framer::new(None);
    for _ in 0..10 {
        framer.push(Bytes::from(vec![1u8; 1000]), false);
    }
    let chunk = framer.next_chunk().unwrap();
    // All ten messages fit well under the cap and coalesce.
    assert_eq!(chunk.len(), 10 * (5 + 1000));
    assert!(framer.next_chunk().is_none());
}

#[test]
fn oversized_message_is_not_split() {
    let big = Bytes::from(vec![2u8; 100_000]);
    let mut framer = Framer::new(None);
    framer.push(Bytes::from_static(b"small"), false);
    framer.push(big.clone(), false);
    framer.push(Bytes::from_static(b"after"), false);

    // First chunk carries only the small message; the oversized one would
    // have pushed it past the cap.
    let first = framer.next_chunk().unwrap();
    assert_eq!(first.len(), 5 + 5);
    // The oversized message goes out whole in its own chunk, with the
    // following message refused by the cap.
    let second = framer.next_chunk().unwrap();
    assert_eq!(second.len(), 5 + big.len());
    let third = framer.next_chunk().unwrap();
    assert_eq!(third.len(), 5 + 5);

    let mut deframer = Deframer::new(1024 * 1024, None);
    deframer.push(&first);
    deframer.push(&second);
    deframer.push(&third);
    let messages = deframe_all(&mut deframer);
    assert_eq!(messages[1], big);
    assert_eq!(messages.len(), 3);
}

#[test]
fn finish_with_partial_frame() {
    let mut deframer = Deframer::new(MAX_PAYLOAD, None);
    deframer.push(&[0, 0, 0]);
    assert!(deframer.next_message().unwrap().is_none());
    let err = deframer.finish().unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}
