//! Streaming pcap to JSON conversion.
//!
//! Packets are buffered in a bounded queue, written into short-lived pcap segment files
//! and each closed segment is handed to an external decoder whose line-oriented output is
//! forwarded to the consumer.

pub mod config;
pub mod controller;
pub mod converter;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod header;
pub mod input;
pub mod metrics;
pub mod queue;
pub mod segment;

#[cfg(test)]
mod test_utils;

pub use config::{ConverterConfig, ConverterConfigBuilder};
pub use controller::{ConversionController, ConversionState};
pub use converter::Converter;
pub use decoder::{DecodeOutputStream, Decoder, DecoderOutput, ProcessDecoder};
pub use error::ConvertError;
pub use event::{ConvertEvent, ConvertEvents};
pub use header::{GlobalHeader, PacketRecord};
pub use input::SourceEvent;
pub use metrics::{Metrics, MetricsSnapshot};
pub use queue::PacketQueue;
pub use segment::{ClosedSegment, RotationContext, RotationPolicy};
