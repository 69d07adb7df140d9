// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Replay tests: a producer crash mid-stream followed by recovery from the
//! last checkpoint reproduces the bundle sequence exactly.

use std::sync::Arc;

use prost::Message;

use tidal_common::id::ChannelID;
use tidal_streaming::checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use tidal_streaming::reader::DataReader;
use tidal_streaming::writer::DataWriter;
use tidal_streaming::Reliability;
use tidal_proto::streaming::{MessageBundle, StreamingEnvelope, StreamingMessageKind};

const BUNDLE_MESSAGES: usize = 100;
const BARRIER_EVERY: u64 = 1000;

fn payload_for(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn make_writer(channel: ChannelID, store: Arc<dyn CheckpointStore>) -> DataWriter {
    DataWriter::new(
        channel,
        vec![1; 16],
        vec![2; 16],
        Reliability::ExactlySame,
        64 * 1024 * 1024,
        BUNDLE_MESSAGES,
        store,
    )
}

/// Write messages `from..=to`, emitting a barrier after every
/// `BARRIER_EVERY`th message id; collect the Data bundles in order and feed
/// barrier envelopes through the reader/ack loop.
fn run_producer(
    writer: &mut DataWriter,
    reader: &mut DataReader,
    channel: &ChannelID,
    from: u64,
    to: u64,
    observed: &mut Vec<MessageBundle>,
) {
    for id in from..=to {
        writer.write_message(payload_for(id)).unwrap();
        if id % BARRIER_EVERY == 0 {
            writer.broadcast_barrier().unwrap();
        }
        for envelope in writer.take_outgoing() {
            consume(writer, reader, channel, &envelope, observed);
        }
    }
    // Flush whatever is still queued.
    for envelope in writer.take_outgoing() {
        consume(writer, reader, channel, &envelope, observed);
    }
}

fn consume(
    writer: &mut DataWriter,
    reader: &mut DataReader,
    channel: &ChannelID,
    envelope: &StreamingEnvelope,
    observed: &mut Vec<MessageBundle>,
) {
    let event = reader.on_envelope(envelope).unwrap();
    if envelope.kind == StreamingMessageKind::Data as i32 {
        observed.push(envelope.bundle.clone().unwrap());
    }
    if let Some(barrier_id) = event.barrier_aligned {
        let ack = reader.make_ack(channel, barrier_id);
        writer.handle_envelope(&ack).unwrap();
    }
}

#[test]
fn test_exactly_same_replay_after_crash() {
    // Ten thousand messages, a barrier every thousand; the producer dies
    // after message 5500 and recovers from checkpoint 5 (covering 1..5000).
    // The bundle sequence the consumer observes beyond 5000 is identical.
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let channel = ChannelID::from_random();

    // First incarnation: messages 1..=5500.
    let mut observed_before = Vec::new();
    {
        let mut writer = make_writer(channel, Arc::clone(&store));
        let mut reader = DataReader::new(vec![2; 16], Reliability::ExactlySame);
        reader.add_channel(channel, 0);
        run_producer(
            &mut writer,
            &mut reader,
            &channel,
            1,
            5500,
            &mut observed_before,
        );
        // The writer is dropped here: the crash.
    }

    // Recovery resumes numbering right after checkpoint 5.
    let mut writer = DataWriter::restore(
        channel,
        vec![1; 16],
        vec![2; 16],
        Reliability::ExactlySame,
        64 * 1024 * 1024,
        BUNDLE_MESSAGES,
        Arc::clone(&store),
    )
    .unwrap();
    assert_eq!(writer.next_message_id(), 5001);
    assert_eq!(writer.last_barrier_id(), 5);

    // The consumer replays from checkpoint 5 as well.
    let mut reader = DataReader::new(vec![2; 16], Reliability::ExactlySame);
    reader.add_channel(channel, 5000);

    let mut observed_after = Vec::new();
    run_producer(
        &mut writer,
        &mut reader,
        &channel,
        5001,
        10_000,
        &mut observed_after,
    );

    // Everything the first incarnation produced past the checkpoint shows
    // up again, byte for byte: ids, boundaries, timestamps.
    let before_tail: Vec<&MessageBundle> = observed_before
        .iter()
        .filter(|b| b.first_message_id > 5000)
        .collect();
    assert_eq!(before_tail.len(), 5); // 5001..5500 in bundles of 100
    for (before, after) in before_tail.iter().zip(observed_after.iter()) {
        assert_eq!(before.encode_to_vec(), after.encode_to_vec());
    }

    // The full resumed stream covers 5001..10000 contiguously.
    assert_eq!(reader.last_received_id(&channel), 10_000);
    let total_messages: usize = observed_after.iter().map(|b| b.messages.len()).sum();
    assert_eq!(total_messages, 5000);
}

#[test]
fn test_consumer_pull_replays_unacked_bundles() {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let channel = ChannelID::from_random();
    let mut writer = make_writer(channel, store);

    for id in 1..=250u64 {
        writer.write_message(payload_for(id)).unwrap();
    }
    let sent = writer.take_outgoing();
    assert_eq!(sent.len(), 2); // bundles 1..100 and 101..200

    // The consumer got nothing; it pulls from scratch.
    let mut reader = DataReader::new(vec![2; 16], Reliability::AtLeastOnce);
    reader.add_channel(channel, 0);
    let pull = reader.make_pull_request(&channel);
    let replies = writer.handle_envelope(&pull).unwrap();
    assert_eq!(replies.len(), 2);

    let mut delivered = 0;
    for reply in &replies {
        let event = reader.on_envelope(reply).unwrap();
        delivered += event.delivered.len();
    }
    assert_eq!(delivered, 200);
    assert_eq!(reader.last_received_id(&channel), 200);
}

#[test]
fn test_at_least_once_duplicates_are_dropped() {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let channel = ChannelID::from_random();
    let mut writer = make_writer(channel, store);

    for id in 1..=100u64 {
        writer.write_message(payload_for(id)).unwrap();
    }
    let sent = writer.take_outgoing();
    let mut reader = DataReader::new(vec![2; 16], Reliability::AtLeastOnce);
    reader.add_channel(channel, 0);

    // Delivered twice: once normally, once as a retransmission.
    let first = reader.on_envelope(&sent[0]).unwrap();
    let second = reader.on_envelope(&sent[0]).unwrap();
    assert_eq!(first.delivered.len(), 100);
    assert!(second.delivered.is_empty());
}
