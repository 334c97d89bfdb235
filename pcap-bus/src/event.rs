use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::ConvertError;

/// What a consumer observes from a conversion.
///
/// `Error` events are advisory: only `End` terminates the conversion, and it is delivered
/// exactly once.
#[derive(Debug)]
pub enum ConvertEvent {
    /// One decoded record, forwarded verbatim from the decoder's output.
    Packet(String),
    Error(ConvertError),
    End,
}

pub(crate) type EventSender = mpsc::Sender<ConvertEvent>;

pub(crate) fn event_channel(capacity: usize) -> (EventSender, ConvertEvents) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ConvertEvents { rx })
}

/// Receiving half of a conversion. Also usable as a `Stream`.
pub struct ConvertEvents {
    rx: mpsc::Receiver<ConvertEvent>,
}

impl ConvertEvents {
    pub async fn recv(&mut self) -> Option<ConvertEvent> {
        self.rx.recv().await
    }
}

impl Stream for ConvertEvents {
    type Item = ConvertEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Sends an error event, logging it when the consumer is gone.
pub(crate) async fn emit_error(events: &EventSender, err: ConvertError) {
    log::warn!("conversion error: {}", err);
    if events.send(ConvertEvent::Error(err)).await.is_err() {
        log::debug!("event consumer dropped");
    }
}
