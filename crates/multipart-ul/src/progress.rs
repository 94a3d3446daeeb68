//! Aggregate per-part progress into overall progress, speed and ETA

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::PartProgress;

#[derive(Debug, Clone, Copy)]
struct PartSample {
    bytes_sent: u64,
    at: Instant,
    speed: f64,
}

/// Point-in-time view of an upload's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_sent: u64,
    /// In `[0, 1]`
    pub fraction: f64,
    /// Bytes per second since the session started
    pub speed: f64,
    pub elapsed: Duration,
    /// Zero when unknown
    pub remaining: Duration,
}

/// Reducer over progress events for a fixed `total_bytes`.
///
/// Keeps each part's latest `bytes_sent` rather than summing deltas, so duplicate or stale events
/// cannot move the total backwards.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    total_bytes: u64,
    started_at: Instant,
    parts: HashMap<u32, PartSample>,
    bytes_sent: u64,
}

impl ProgressAggregator {
    pub fn new(total_bytes: u64, started_at: Instant) -> Self {
        Self {
            total_bytes,
            started_at,
            parts: HashMap::new(),
            bytes_sent: 0,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Record a progress event. Returns the part's instantaneous speed (bytes/s) when the event
    /// was accepted, or `None` when it reported fewer bytes than already recorded for that part.
    pub fn record(&mut self, event: &PartProgress) -> Option<f64> {
        let bytes_sent = event.bytes_sent.min(event.bytes_total);
        match self.parts.get_mut(&event.part_number) {
            Some(sample) => {
                if bytes_sent < sample.bytes_sent {
                    return None;
                }
                let delta_bytes = bytes_sent - sample.bytes_sent;
                let delta_secs = event.at.saturating_duration_since(sample.at).as_secs_f64();
                if delta_secs > 0.0 {
                    sample.speed = delta_bytes as f64 / delta_secs;
                    sample.at = event.at;
                }
                self.bytes_sent += delta_bytes;
                sample.bytes_sent = bytes_sent;
                Some(sample.speed)
            }
            None => {
                self.parts.insert(
                    event.part_number,
                    PartSample {
                        bytes_sent,
                        at: event.at,
                        speed: 0.0,
                    },
                );
                self.bytes_sent += bytes_sent;
                Some(0.0)
            }
        }
    }

    pub fn part_bytes(&self, part_number: u32) -> u64 {
        self.parts
            .get(&part_number)
            .map(|sample| sample.bytes_sent)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, now: Instant) -> ProgressSnapshot {
        let bytes_sent = self.bytes_sent.min(self.total_bytes);
        let fraction = if self.total_bytes > 0 {
            (bytes_sent as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let elapsed = now.saturating_duration_since(self.started_at);
        let elapsed_secs = elapsed.as_secs_f64();
        let speed = if elapsed_secs > 0.0 {
            bytes_sent as f64 / elapsed_secs
        } else {
            0.0
        };
        let remaining = if speed > 0.0 {
            let secs = (self.total_bytes - bytes_sent) as f64 / speed;
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        ProgressSnapshot {
            bytes_sent,
            fraction,
            speed,
            elapsed,
            remaining,
        }
    }
}
