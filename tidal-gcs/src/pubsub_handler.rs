// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Control-service pub/sub.
//!
//! Every table write is followed by a publish on its channel. In-process
//! subscribers use broadcast receivers; remote subscribers long-poll with
//! their highest processed sequence id and receive everything newer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use tidal_proto::gcs::PubMessage;
use tidal_pubsub::{Publisher, Topic};

/// Channel identifiers; values are stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ChannelType {
    Actor = 1,
    Job = 2,
    Node = 3,
    Worker = 4,
    PlacementGroup = 5,
    ObjectLocation = 6,
}

pub const ALL_CHANNELS: [ChannelType; 6] = [
    ChannelType::Actor,
    ChannelType::Job,
    ChannelType::Node,
    ChannelType::Worker,
    ChannelType::PlacementGroup,
    ChannelType::ObjectLocation,
];

struct SubscriberState {
    pending: Vec<PubMessage>,
    next_sequence_id: i64,
    /// channel → subscribed key ids (empty = every key on the channel).
    subscriptions: HashMap<i32, Vec<Vec<u8>>>,
}

/// The pub/sub hub of the control service.
pub struct PubSubHandler {
    channels: Publisher<PubMessage>,
    subscribers: Mutex<HashMap<Vec<u8>, SubscriberState>>,
    notify: Notify,
    sequence_counter: AtomicI64,
}

fn topic_for(channel_type: i32) -> Topic {
    Topic(format!("channel:{channel_type}"))
}

impl PubSubHandler {
    pub fn new() -> Self {
        Self {
            channels: Publisher::new(1024),
            subscribers: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            sequence_counter: AtomicI64::new(1),
        }
    }

    /// Publish a message to broadcast listeners and long-poll subscribers.
    pub fn publish(&self, mut message: PubMessage) {
        self.channels
            .publish(&topic_for(message.channel_type), message.clone());

        let mut subscribers = self.subscribers.lock();
        for state in subscribers.values_mut() {
            if let Some(keys) = state.subscriptions.get(&message.channel_type) {
                if keys.is_empty() || keys.contains(&message.key_id) {
                    message.sequence_id = state.next_sequence_id;
                    state.next_sequence_id += 1;
                    state.pending.push(message.clone());
                }
            }
        }
        drop(subscribers);

        self.notify.notify_waiters();
    }

    /// In-process subscription to one channel.
    pub fn subscribe(&self, channel: ChannelType) -> broadcast::Receiver<PubMessage> {
        self.channels.subscribe(topic_for(channel as i32))
    }

    /// Register a long-poll subscriber for a channel and key. An empty
    /// `key_id` subscribes to every key on the channel.
    pub fn handle_subscribe(&self, subscriber_id: Vec<u8>, channel: i32, key_id: Vec<u8>) {
        let mut subscribers = self.subscribers.lock();
        let state = subscribers
            .entry(subscriber_id)
            .or_insert_with(|| SubscriberState {
                pending: Vec::new(),
                next_sequence_id: self.sequence_counter.fetch_add(1, Ordering::Relaxed),
                subscriptions: HashMap::new(),
            });
        let keys = state.subscriptions.entry(channel).or_default();
        if !key_id.is_empty() && !keys.contains(&key_id) {
            keys.push(key_id);
        }
    }

    /// Drop a long-poll subscriber entirely.
    pub fn handle_unsubscribe(&self, subscriber_id: &[u8]) {
        self.subscribers.lock().remove(subscriber_id);
    }

    /// Long poll: return messages newer than `max_processed_sequence_id`,
    /// waiting for the next publish when nothing is pending.
    pub async fn handle_poll(
        &self,
        subscriber_id: &[u8],
        max_processed_sequence_id: i64,
    ) -> Vec<PubMessage> {
        {
            let mut subscribers = self.subscribers.lock();
            if let Some(state) = subscribers.get_mut(subscriber_id) {
                state
                    .pending
                    .retain(|m| m.sequence_id > max_processed_sequence_id);
                if !state.pending.is_empty() {
                    return std::mem::take(&mut state.pending);
                }
            }
        }

        self.notify.notified().await;

        let mut subscribers = self.subscribers.lock();
        match subscribers.get_mut(subscriber_id) {
            Some(state) => {
                state
                    .pending
                    .retain(|m| m.sequence_id > max_processed_sequence_id);
                std::mem::take(&mut state.pending)
            }
            None => Vec::new(),
        }
    }
}

impl Default for PubSubHandler {
    fn default() -> Self {
        Self::new()
    }
}
