use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::mpsc;

use crate::{
    header::{GlobalHeader, PacketRecord},
    metrics::Metrics,
};

/// Items travelling from the producer to the single pipeline consumer. Only packets count
/// towards the queue length; header and end-of-stream markers are never dropped.
#[derive(Debug)]
pub(crate) enum Intake {
    Header(GlobalHeader),
    Packet(PacketRecord),
    End,
}

/// Producer side of the packet intake buffer.
///
/// `offer` never blocks: it is called from inside the upstream parser's callbacks, so when
/// the buffer is full the packet is dropped and counted instead.
pub struct PacketQueue {
    tx: mpsc::UnboundedSender<Intake>,
    len: Arc<AtomicUsize>,
    max_len: usize,
    metrics: Arc<Metrics>,
}

pub struct PacketQueueReceiver {
    rx: mpsc::UnboundedReceiver<Intake>,
    len: Arc<AtomicUsize>,
    metrics: Arc<Metrics>,
}

/// `max_len` of `None` or `Some(0)` leaves the queue unbounded.
pub fn packet_queue(
    max_len: Option<usize>,
    metrics: Arc<Metrics>,
) -> (PacketQueue, PacketQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let len = Arc::new(AtomicUsize::new(0));
    let max_len = match max_len {
        Some(0) | None => usize::MAX,
        Some(n) => n,
    };
    (
        PacketQueue {
            tx,
            len: Arc::clone(&len),
            max_len,
            metrics: Arc::clone(&metrics),
        },
        PacketQueueReceiver { rx, len, metrics },
    )
}

impl PacketQueue {
    pub fn set_global_header(&self, header: GlobalHeader) {
        if self.tx.send(Intake::Header(header)).is_err() {
            log::debug!("packet queue closed, global header ignored");
        }
    }

    /// Returns `false` when the packet was dropped.
    pub fn offer(&self, packet: PacketRecord) -> bool {
        let max_len = self.max_len;
        let admitted = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_len).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            self.metrics.dropped_packet_count.increment();
            return false;
        }

        let captured = packet.captured_length() as u64;
        if self.tx.send(Intake::Packet(packet)).is_err() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            self.metrics.dropped_packet_count.increment();
            return false;
        }
        self.metrics.packet_queue.update(self.len() as u64);
        self.metrics.incoming_data.update(captured);
        self.metrics.incoming_packet_count.increment();
        true
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signals end-of-stream. Dropping the queue has the same effect.
    pub fn finish(self) {
        if self.tx.send(Intake::End).is_err() {
            log::debug!("packet queue closed, end of stream ignored");
        }
    }
}

impl PacketQueueReceiver {
    /// `None` once every producer handle is gone.
    pub(crate) async fn recv(&mut self) -> Option<Intake> {
        let item = self.rx.recv().await?;
        if let Intake::Packet(_) = item {
            let remaining = self.len.fetch_sub(1, Ordering::AcqRel) - 1;
            self.metrics.packet_queue.update(remaining as u64);
        }
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
