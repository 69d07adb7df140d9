// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Subscriber side.

use tokio::sync::broadcast;

/// Receives messages from one topic channel.
pub struct Subscriber<T: Clone> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscriber<T> {
    pub fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<T, SubscribeError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => SubscribeError::ChannelClosed,
            broadcast::error::RecvError::Lagged(n) => SubscribeError::Lagged(n),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("subscriber lagged by {0} messages")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{Publisher, Topic};

    #[tokio::test]
    async fn test_lag_is_reported() {
        let publisher: Publisher<Vec<u8>> = Publisher::new(2);
        let topic = Topic("t".to_string());
        let mut sub = Subscriber::new(publisher.subscribe(topic.clone()));

        for i in 0u8..5 {
            publisher.publish(&topic, vec![i]);
        }
        match sub.recv().await {
            Err(SubscribeError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
