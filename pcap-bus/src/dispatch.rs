use std::{collections::VecDeque, sync::Arc};

use tokio::task::JoinSet;

use crate::{
    decoder::DecoderInvoker, error::ConvertError, metrics::Metrics, segment::ClosedSegment,
};

/// Default number of decode runs allowed in flight per pipeline.
pub const DEFAULT_MAX_CONCURRENT_DECODERS: usize = 10;

/// FIFO of closed segments with a ceiling on concurrent decode runs.
///
/// Segments are admitted in the order they were pushed; completion order is whatever order
/// the decode runs finish in.
pub struct DecodeDispatchQueue {
    invoker: Arc<DecoderInvoker>,
    metrics: Arc<Metrics>,
    limit: usize,
    pending: VecDeque<ClosedSegment>,
    running: JoinSet<Result<(), ConvertError>>,
}

impl DecodeDispatchQueue {
    pub fn new(invoker: DecoderInvoker, limit: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            invoker: Arc::new(invoker),
            metrics,
            limit: limit.max(1),
            pending: VecDeque::new(),
            running: JoinSet::new(),
        }
    }

    pub fn push(&mut self, segment: ClosedSegment) {
        log::debug!(
            "segment queued for decode: {} ({} packets)",
            segment.path().display(),
            segment.packet_count()
        );
        self.pending.push_back(segment);
        self.admit();
    }

    /// Waits for the next decode run to finish and admits the next queued segment.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn next_completed(&mut self) -> Option<Result<(), ConvertError>> {
        let joined = self.running.join_next().await?;
        self.admit();
        Some(joined.unwrap_or_else(|e| Err(e.into())))
    }

    /// Queued plus in-flight segments.
    pub fn len(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    fn admit(&mut self) {
        while self.running.len() < self.limit {
            let Some(segment) = self.pending.pop_front() else {
                break;
            };
            let invoker = Arc::clone(&self.invoker);
            self.running
                .spawn(async move { invoker.invoke(segment).await });
        }
        self.metrics.decode_queue.update(self.len() as u64);
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
