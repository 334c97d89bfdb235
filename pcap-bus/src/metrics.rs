use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

/// Monotonic counter; `update` adds.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.update(1);
    }

    pub fn update(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge; `update` overwrites.
#[derive(Debug, Default)]
pub struct Value(AtomicU64);

impl Value {
    pub fn update(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metrics shared by every stage of a converter. All fields are safe to update from any
/// task.
#[derive(Debug)]
pub struct Metrics {
    pub packet_queue: Value,
    pub decode_queue: Value,
    pub incoming_data: Counter,
    pub incoming_packet_count: Counter,
    pub outgoing_data: Counter,
    pub outgoing_packet_count: Counter,
    pub dropped_packet_count: Counter,
    start_time: SystemTime,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            packet_queue: Value::default(),
            decode_queue: Value::default(),
            incoming_data: Counter::default(),
            incoming_packet_count: Counter::default(),
            outgoing_data: Counter::default(),
            outgoing_packet_count: Counter::default(),
            dropped_packet_count: Counter::default(),
            start_time: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packet_queue: self.packet_queue.get(),
            decode_queue: self.decode_queue.get(),
            incoming_data: self.incoming_data.get(),
            incoming_packet_count: self.incoming_packet_count.get(),
            outgoing_data: self.outgoing_data.get(),
            outgoing_packet_count: self.outgoing_packet_count.get(),
            dropped_packet_count: self.dropped_packet_count.get(),
            start_time: self
                .start_time
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub packet_queue: u64,
    pub decode_queue: u64,
    pub incoming_data: u64,
    pub incoming_packet_count: u64,
    pub outgoing_data: u64,
    pub outgoing_packet_count: u64,
    pub dropped_packet_count: u64,
    /// Milliseconds since the unix epoch.
    pub start_time: u64,
    pub uptime_seconds: f64,
}
