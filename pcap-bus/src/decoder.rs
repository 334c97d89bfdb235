use std::{
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::Arc,
};

use bytes::BytesMut;
use futures::{Stream, StreamExt, future};
use tokio::{io::AsyncRead, process::Command};
use tokio_util::codec::{self, Decoder as _, FramedRead, LinesCodec, LinesCodecError};

use crate::{
    error::ConvertError,
    event::{ConvertEvent, EventSender},
    metrics::Metrics,
    segment::ClosedSegment,
};

/// Default executable used by [`ProcessDecoder`].
pub const DEFAULT_DECODER_PROGRAM: &str = "tshark-json";
/// Longest accepted output line; longer lines are discarded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Output of one decode run: zero or more lines, then exactly one `Exited` as the last item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecoderOutput {
    Line(String),
    /// Exit code; `None` when the process was terminated by a signal.
    Exited(Option<i32>),
}

pub type DecodeOutputStream = Pin<Box<dyn Stream<Item = DecoderOutput> + Send>>;

/// Turns a segment file into decoded records.
pub trait Decoder: Send + Sync + 'static {
    fn invoke(&self, segment: &Path) -> std::io::Result<DecodeOutputStream>;
}

/// Runs an external program as `[program, args..., "--infile", segment]` and reads its
/// standard output line by line.
#[derive(Clone, Debug)]
pub struct ProcessDecoder {
    program: PathBuf,
    args: Vec<String>,
    max_line_length: usize,
}

impl ProcessDecoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length.max(1);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for ProcessDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODER_PROGRAM)
    }
}

impl Decoder for ProcessDecoder {
    fn invoke(&self, segment: &Path) -> std::io::Result<DecodeOutputStream> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--infile")
            .arg(segment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("decoder stdout not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, segment.display().to_string()));
        }

        let name = segment.display().to_string();
        let lines = FramedRead::new(stdout, OutputLines::new(self.max_line_length, &name))
            .filter_map(move |line| {
                future::ready(match line {
                    Ok(line) => Some(DecoderOutput::Line(line)),
                    Err(e) => {
                        log::warn!("reading decoder output for {} failed: {}", name, e);
                        None
                    }
                })
            });

        let exit = futures::stream::once(async move {
            match child.wait().await {
                Ok(status) => DecoderOutput::Exited(status.code()),
                Err(e) => {
                    log::error!("waiting for decoder failed: {}", e);
                    DecoderOutput::Exited(None)
                }
            }
        });

        Ok(Box::pin(lines.chain(exit)))
    }
}

/// Newline-delimited decoder output. Overlong or non-UTF-8 lines are skipped with a
/// warning instead of ending the stream, so the child never blocks on a full pipe.
struct OutputLines {
    inner: LinesCodec,
    segment: String,
}

impl OutputLines {
    fn new(max_line_length: usize, segment: &str) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
            segment: segment.to_string(),
        }
    }
}

impl codec::Decoder for OutputLines {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        loop {
            match self.inner.decode(buf) {
                Err(e) => log::warn!("decoder output for {} skipped: {}", self.segment, e),
                other => return other,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        loop {
            match self.inner.decode_eof(buf) {
                Err(e) => log::warn!("decoder output for {} skipped: {}", self.segment, e),
                other => return other,
            }
        }
    }
}

async fn log_stderr<R: AsyncRead + Unpin>(stderr: R, segment: String) {
    let mut lines = FramedRead::new(stderr, OutputLines::new(64 * 1024, &segment));
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => log::warn!("decoder stderr [{}]: {}", segment, line),
            Err(e) => {
                log::debug!("decoder stderr [{}] unreadable: {}", segment, e);
                break;
            }
        }
    }
}

/// Runs the decoder for one segment, forwards its records to the consumer and cleans up.
pub struct DecoderInvoker {
    decoder: Arc<dyn Decoder>,
    events: EventSender,
    metrics: Arc<Metrics>,
}

impl DecoderInvoker {
    pub(crate) fn new(
        decoder: Arc<dyn Decoder>,
        events: EventSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            decoder,
            events,
            metrics,
        }
    }

    /// On success the segment file is deleted. On a non-zero exit it stays on disk for
    /// inspection.
    pub async fn invoke(&self, segment: ClosedSegment) -> Result<(), ConvertError> {
        let path = segment.path().to_path_buf();
        log::debug!("decoding {}", path.display());

        let mut output = self
            .decoder
            .invoke(&path)
            .map_err(|source| ConvertError::DecoderSpawn {
                path: path.clone(),
                source,
            })?;

        let mut exit = None;
        while let Some(item) = output.next().await {
            match item {
                DecoderOutput::Line(line) => {
                    if self.events.send(ConvertEvent::Packet(line)).await.is_err() {
                        log::debug!("event consumer dropped, discarding decoder output");
                    }
                }
                DecoderOutput::Exited(code) => {
                    exit = code;
                    break;
                }
            }
        }

        if exit != Some(0) {
            return Err(ConvertError::DecodeProcess { path, code: exit });
        }

        self.metrics
            .outgoing_data
            .update(segment.captured_length_sum());
        self.metrics
            .outgoing_packet_count
            .update(segment.packet_count());

        tokio::fs::remove_file(&path).await?;
        log::debug!("segment removed: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
