use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    time::Instant,
};

use crate::{
    error::ConvertError,
    header::{GlobalHeader, PacketRecord},
};

const TEMP_PREFIX: &str = "pcap-tshark-";
const TEMP_SUFFIX: &str = ".pcap";

/// When an open segment gets closed and handed to the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_age: Duration,
    pub max_packets: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_millis(5000),
            max_packets: 1000,
        }
    }
}

impl RotationPolicy {
    pub fn should_rotate(&self, packet_count: u64, age: Duration, ctx: RotationContext) -> bool {
        (age >= self.max_age && packet_count > 0)
            || packet_count >= self.max_packets
            || (ctx.end_of_input && ctx.queue_empty && packet_count > 0)
    }
}

/// Pipeline state the rotation decision depends on besides the segment itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct RotationContext {
    pub end_of_input: bool,
    pub queue_empty: bool,
}

/// The single open segment of a pipeline.
struct Segment {
    writer: BufWriter<File>,
    path: PathBuf,
    packet_count: u64,
    captured_length_sum: u64,
    created_at: Instant,
}

impl Segment {
    async fn create(dir: &Path, header: &GlobalHeader) -> std::io::Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;

        let mut writer = BufWriter::new(File::from_std(file));
        writer.write_all(&header.encode()).await?;
        log::debug!("segment opened: {}", path.display());

        Ok(Self {
            writer,
            path,
            packet_count: 0,
            captured_length_sum: 0,
            created_at: Instant::now(),
        })
    }

    async fn append(&mut self, packet: &PacketRecord) -> std::io::Result<()> {
        self.writer.write_all(&packet.encode_header()).await?;
        self.writer.write_all(packet.data()).await?;
        self.packet_count += 1;
        self.captured_length_sum += packet.captured_length() as u64;
        Ok(())
    }

    /// Flushes and releases the file descriptor.
    async fn close(mut self) -> std::io::Result<ClosedSegment> {
        self.writer.flush().await?;
        let file = self.writer.into_inner().into_std().await;
        drop(file);
        log::debug!(
            "segment closed: {} ({} packets, {} bytes)",
            self.path.display(),
            self.packet_count,
            self.captured_length_sum
        );
        Ok(ClosedSegment {
            path: self.path,
            packet_count: self.packet_count,
            captured_length_sum: self.captured_length_sum,
        })
    }
}

/// A finished segment file waiting for, or undergoing, decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedSegment {
    path: PathBuf,
    packet_count: u64,
    captured_length_sum: u64,
}

impl ClosedSegment {
    pub(crate) fn new(path: PathBuf, packet_count: u64, captured_length_sum: u64) -> Self {
        Self {
            path,
            packet_count,
            captured_length_sum,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn captured_length_sum(&self) -> u64 {
        self.captured_length_sum
    }
}

/// Accumulates packets into at most one open segment and decides when to rotate it.
pub struct SegmentWriter {
    temp_dir: PathBuf,
    policy: RotationPolicy,
    global_header: Option<GlobalHeader>,
    open: Option<Segment>,
}

impl SegmentWriter {
    pub fn new(temp_dir: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            policy,
            global_header: None,
            open: None,
        }
    }

    pub fn set_global_header(&mut self, header: GlobalHeader) {
        self.global_header = Some(header);
    }

    pub fn has_open_segment(&self) -> bool {
        self.open.is_some()
    }

    /// Instant at which the open segment becomes due for time-based rotation.
    pub fn rotation_deadline(&self) -> Option<Instant> {
        self.open
            .as_ref()
            .filter(|s| s.packet_count > 0)
            .map(|s| s.created_at + self.policy.max_age)
    }

    /// Appends `packet` to the open segment, opening one first if needed, then applies
    /// the rotation policy.
    pub async fn accept(
        &mut self,
        packet: PacketRecord,
        ctx: RotationContext,
    ) -> Result<Option<ClosedSegment>, ConvertError> {
        let header = self.global_header.ok_or(ConvertError::MissingHeader)?;

        let mut segment = match self.open.take() {
            Some(segment) => segment,
            None => Segment::create(&self.temp_dir, &header).await?,
        };

        if let Err(e) = segment.append(&packet).await {
            log::error!(
                "segment write failed, abandoning {}: {}",
                segment.path.display(),
                e
            );
            return Err(e.into());
        }

        self.open = Some(segment);
        self.rotate_if_due(ctx).await
    }

    /// Closes the open segment if the policy says so.
    pub async fn rotate_if_due(
        &mut self,
        ctx: RotationContext,
    ) -> Result<Option<ClosedSegment>, ConvertError> {
        match self.open.take() {
            Some(segment)
                if self.policy.should_rotate(
                    segment.packet_count,
                    segment.created_at.elapsed(),
                    ctx,
                ) =>
            {
                Ok(Some(segment.close().await?))
            }
            other => {
                self.open = other;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;
