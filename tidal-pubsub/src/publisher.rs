// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Publisher side.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A pub/sub topic identifier.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Topic(pub String);

/// Manages one broadcast channel per topic.
pub struct Publisher<T: Clone + Send + 'static> {
    channels: Arc<DashMap<Topic, broadcast::Sender<T>>>,
    channel_capacity: usize,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            channel_capacity,
        }
    }

    /// Publish to a topic. Returns false when nobody ever subscribed or no
    /// receiver is alive.
    pub fn publish(&self, topic: &Topic, message: T) -> bool {
        match self.channels.get(topic) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get or create the topic channel and return a new receiver.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<T> {
        let entry = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        entry.subscribe()
    }

    /// Drop the topic channel entirely.
    pub fn remove_topic(&self, topic: &Topic) {
        self.channels.remove(topic);
    }

    pub fn num_topics(&self) -> usize {
        self.channels.len()
    }
}
