//! Conversion entry points and the per-stream pipeline actor.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{Stream, StreamExt};
use tokio::time::Instant;

use crate::{
    config::ConverterConfig,
    controller::ConversionController,
    decoder::{Decoder, DecoderInvoker},
    dispatch::DecodeDispatchQueue,
    error::ConvertError,
    event::{ConvertEvent, ConvertEvents, EventSender, emit_error, event_channel},
    input::{SourceEvent, discover_captures, read_capture},
    metrics::Metrics,
    queue::{Intake, PacketQueue, PacketQueueReceiver, packet_queue},
    segment::{ClosedSegment, RotationContext, SegmentWriter},
};

/// Turns pcap input into a stream of decoded records.
///
/// Every conversion gets its own packet queue, segment writer and decode queue; the
/// decoder and the metrics are shared by all conversions started from one converter.
#[derive(Clone)]
pub struct Converter {
    config: ConverterConfig,
    decoder: Arc<dyn Decoder>,
    metrics: Arc<Metrics>,
}

impl Converter {
    pub fn new(config: ConverterConfig, decoder: impl Decoder) -> Self {
        Self::with_shared_decoder(config, Arc::new(decoder))
    }

    pub fn with_shared_decoder(config: ConverterConfig, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            config,
            decoder,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Starts a conversion fed by hand. Hand the global header and packets to the returned
    /// queue and call `finish` once the input is exhausted.
    pub fn open_stream(&self) -> (PacketQueue, ConvertEvents) {
        let (events_tx, events) = event_channel(self.config.event_capacity);
        let (queue, pipeline) = self.pipeline(events_tx.clone());
        tokio::spawn(run_to_end(pipeline, events_tx));
        (queue, events)
    }

    /// Converts an already parsed capture.
    pub fn convert_stream<S>(&self, source: S) -> ConvertEvents
    where
        S: Stream<Item = SourceEvent> + Send + 'static,
    {
        let (events_tx, events) = event_channel(self.config.event_capacity);
        let (queue, pipeline) = self.pipeline(events_tx.clone());
        tokio::spawn(feed(source, queue, events_tx.clone()));
        tokio::spawn(run_to_end(pipeline, events_tx));
        events
    }

    /// Converts a pcap byte stream, e.g. stdin. `name` labels parse errors.
    pub fn convert_reader<R>(&self, name: impl Into<PathBuf>, reader: R) -> ConvertEvents
    where
        R: std::io::Read + Send + 'static,
    {
        self.convert_stream(read_capture(name, reader))
    }

    /// Converts a capture file, or every `.pcap` file below a directory, one file after the
    /// other. Fails without emitting anything when `path` itself cannot be inspected.
    pub async fn convert_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<ConvertEvents, ConvertError> {
        let root = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|source| ConvertError::SourceRead {
                path: root.clone(),
                source,
            })?;

        let (events_tx, events) = event_channel(self.config.event_capacity);
        let converter = self.clone();
        tokio::spawn(async move {
            let controller = ConversionController::new();
            let files = if metadata.is_dir() {
                let walk = discover_captures(&root).await;
                for err in walk.errors {
                    emit_error(&events_tx, err).await;
                }
                walk.files
            } else {
                vec![root]
            };

            log::info!("converting {} capture file(s)", files.len());
            for file in files {
                controller.start();
                converter.convert_file(&file, events_tx.clone()).await;
            }

            controller.drain();
            if controller.complete() {
                let _ = events_tx.send(ConvertEvent::End).await;
            }
        });
        Ok(events)
    }

    async fn convert_file(&self, path: &Path, events: EventSender) {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file.into_std().await,
            Err(source) => {
                let err = ConvertError::SourceRead {
                    path: path.to_path_buf(),
                    source,
                };
                emit_error(&events, err).await;
                return;
            }
        };

        log::info!("converting {}", path.display());
        let (queue, pipeline) = self.pipeline(events.clone());
        let feeder = tokio::spawn(feed(read_capture(path, file), queue, events));
        pipeline.run().await;
        if let Err(e) = feeder.await {
            log::error!("capture feeder for {} failed: {}", path.display(), e);
        }
    }

    fn pipeline(&self, events: EventSender) -> (PacketQueue, Pipeline) {
        let (queue, intake) = packet_queue(
            self.config.max_packet_queue_size,
            Arc::clone(&self.metrics),
        );
        let invoker = DecoderInvoker::new(
            Arc::clone(&self.decoder),
            events.clone(),
            Arc::clone(&self.metrics),
        );
        let pipeline = Pipeline {
            intake,
            writer: SegmentWriter::new(self.config.resolved_temp_dir(), self.config.rotation),
            dispatch: DecodeDispatchQueue::new(
                invoker,
                self.config.max_concurrent_decoders,
                Arc::clone(&self.metrics),
            ),
            controller: ConversionController::new(),
            events,
            input_closed: false,
        };
        (queue, pipeline)
    }
}

async fn run_to_end(pipeline: Pipeline, events: EventSender) {
    pipeline.run().await;
    if events.send(ConvertEvent::End).await.is_err() {
        log::debug!("event consumer dropped before end of conversion");
    }
}

/// Forwards parser output into a packet queue.
async fn feed<S>(source: S, queue: PacketQueue, events: EventSender)
where
    S: Stream<Item = SourceEvent>,
{
    futures::pin_mut!(source);
    while let Some(event) = source.next().await {
        match event {
            SourceEvent::GlobalHeader(header) => queue.set_global_header(header),
            SourceEvent::Packet(packet) => {
                queue.offer(packet);
            }
            SourceEvent::Error(err) => emit_error(&events, err).await,
        }
    }
    queue.finish();
}

/// Single owner of the segment writer and the decode queue of one stream. Packets, decode
/// completions and the rotation deadline are handled one at a time, so the writer never
/// needs a lock.
struct Pipeline {
    intake: PacketQueueReceiver,
    writer: SegmentWriter,
    dispatch: DecodeDispatchQueue,
    controller: ConversionController,
    events: EventSender,
    input_closed: bool,
}

impl Pipeline {
    /// Returns once input ended and every segment was decoded.
    async fn run(mut self) {
        self.check_done();
        while !self.controller.is_done() {
            let deadline = self.writer.rotation_deadline();
            let rotation_timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(result) = self.dispatch.next_completed(), if !self.dispatch.is_empty() => {
                    if let Err(e) = result {
                        emit_error(&self.events, e).await;
                    }
                }
                item = self.intake.recv(), if !self.input_closed => {
                    self.on_intake(item).await;
                }
                _ = rotation_timer => {
                    log::trace!("segment age limit reached at {:?}", Instant::now());
                }
            }

            let rotated = self.writer.rotate_if_due(self.rotation_context()).await;
            self.on_rotation(rotated).await;
            self.check_done();
        }
        log::debug!("pipeline finished");
    }

    async fn on_intake(&mut self, item: Option<Intake>) {
        match item {
            Some(Intake::Header(header)) => self.writer.set_global_header(header),
            Some(Intake::Packet(packet)) => {
                self.controller.start();
                // a segment past its age limit must not take this packet
                let expired = self.writer.rotate_if_due(self.rotation_context()).await;
                self.on_rotation(expired).await;
                let accepted = self.writer.accept(packet, self.rotation_context()).await;
                self.on_rotation(accepted).await;
            }
            Some(Intake::End) | None => {
                self.input_closed = true;
                self.controller.drain();
            }
        }
    }

    async fn on_rotation(&mut self, result: Result<Option<ClosedSegment>, ConvertError>) {
        match result {
            Ok(Some(segment)) => {
                log::debug!(
                    "segment ready: {} ({} packets)",
                    segment.path().display(),
                    segment.packet_count()
                );
                self.dispatch.push(segment);
            }
            Ok(None) => {}
            Err(e) => emit_error(&self.events, e).await,
        }
    }

    fn rotation_context(&self) -> RotationContext {
        RotationContext {
            end_of_input: self.input_closed,
            queue_empty: self.intake.is_empty(),
        }
    }

    fn check_done(&self) {
        if self.input_closed
            && !self.writer.has_open_segment()
            && self.intake.is_empty()
            && self.dispatch.is_empty()
        {
            self.controller.complete();
        }
    }
}

#[cfg(test)]
#[path = "converter_test.rs"]
mod converter_test;
