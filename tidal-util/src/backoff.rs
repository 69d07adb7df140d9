// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Exponential backoff with optional jitter.

use std::time::Duration;

/// Exponential backoff calculator.
///
/// Delays grow by `multiplier` per attempt, capped at `max_delay`. `reset`
/// returns the calculator to the initial delay after a success.
pub struct ExponentialBackoff {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            current_delay: initial_delay,
        }
    }

    /// Returns the current delay and advances the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        let grown = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = grown.min(self.max_delay);
        delay
    }

    /// Like [`next_delay`](Self::next_delay) but with up to +50% random jitter.
    pub fn next_delay_with_jitter(&mut self) -> Duration {
        let delay = self.next_delay();
        let jitter = 1.0 + rand::random::<f64>() * 0.5;
        Duration::from_secs_f64(delay.as_secs_f64() * jitter).min(self.max_delay)
    }

    /// Reset to the initial delay.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
    }

    /// The current delay without advancing.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(50), 2.0, Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(4), 3.0, Duration::from_secs(6));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
    }

    #[test]
    fn test_reset() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(10), 2.0, Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(800), 2.0, Duration::from_secs(1));
        for _ in 0..10 {
            assert!(backoff.next_delay_with_jitter() <= Duration::from_secs(1));
        }
    }
}
