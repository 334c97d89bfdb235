use std::path::PathBuf;

use crate::{dispatch::DEFAULT_MAX_CONCURRENT_DECODERS, segment::RotationPolicy};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Converter configuration, read-only once the converter is built.
#[derive(Clone, Debug)]
pub struct ConverterConfig {
    /// Directory for segment files; `None` = platform temp dir
    pub temp_dir: Option<PathBuf>,
    /// Bound on queued packets; `None` or `Some(0)` = unbounded
    pub max_packet_queue_size: Option<usize>,
    pub max_concurrent_decoders: usize,
    pub rotation: RotationPolicy,
    /// Bound on undelivered consumer events
    pub event_capacity: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_packet_queue_size: None,
            max_concurrent_decoders: DEFAULT_MAX_CONCURRENT_DECODERS,
            rotation: RotationPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConverterConfig {
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder::default()
    }

    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Default)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    /// 0 leaves the queue unbounded
    pub fn max_packet_queue_size(mut self, size: usize) -> Self {
        self.config.max_packet_queue_size = (size > 0).then_some(size);
        self
    }

    pub fn max_concurrent_decoders(mut self, limit: usize) -> Self {
        self.config.max_concurrent_decoders = limit.max(1);
        self
    }

    pub fn rotation(mut self, rotation: RotationPolicy) -> Self {
        self.config.rotation = rotation;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> ConverterConfig {
        self.config
    }
}
