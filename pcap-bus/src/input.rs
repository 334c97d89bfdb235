//! Capture sources: the pcap parser adapter and capture-file discovery.

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, traits::PcapReaderIterator};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::ConvertError,
    header::{GlobalHeader, PacketRecord},
};

const READ_BUFFER_SIZE: usize = 256 * 1024;
const SOURCE_CHANNEL_CAPACITY: usize = 1024;

/// Events produced by a capture parser, in stream order. The end of the stream is the end
/// of the capture.
#[derive(Debug)]
pub enum SourceEvent {
    GlobalHeader(GlobalHeader),
    Packet(PacketRecord),
    /// Parsing stopped early; reported and treated as end of input
    Error(ConvertError),
}

/// Parses a classic pcap byte stream on a blocking thread.
pub fn read_capture<R>(name: impl Into<PathBuf>, reader: R) -> ReceiverStream<SourceEvent>
where
    R: Read + Send + 'static,
{
    let name = name.into();
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = parse_capture(&name, reader, &tx) {
            let _ = tx.blocking_send(SourceEvent::Error(e));
        }
        log::debug!("end of capture input {}", name.display());
    });
    ReceiverStream::new(rx)
}

fn parse_capture<R: Read>(
    name: &Path,
    reader: R,
    tx: &mpsc::Sender<SourceEvent>,
) -> Result<(), ConvertError> {
    let parse_error = |reason: String| ConvertError::Parse {
        path: name.to_path_buf(),
        reason,
    };

    let mut reader =
        LegacyPcapReader::new(READ_BUFFER_SIZE, reader).map_err(|e| parse_error(e.to_string()))?;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                let event = match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        Some(SourceEvent::GlobalHeader(GlobalHeader {
                            magic_number: header.magic_number,
                            major_version: header.version_major,
                            minor_version: header.version_minor,
                            gmt_offset: header.thiszone,
                            timestamp_accuracy: header.sigfigs,
                            snapshot_length: header.snaplen,
                            link_layer_type: header.network.0 as u32,
                        }))
                    }
                    PcapBlockOwned::Legacy(packet) => Some(SourceEvent::Packet(PacketRecord::new(
                        packet.ts_sec,
                        packet.ts_usec,
                        packet.origlen,
                        Bytes::copy_from_slice(packet.data),
                    ))),
                    _ => None,
                };
                reader.consume(offset);

                if let Some(event) = event {
                    if tx.blocking_send(event).is_err() {
                        // consumer gone, stop reading
                        return Ok(());
                    }
                }
            }
            Err(PcapError::Eof) => return Ok(()),
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(|e| parse_error(e.to_string()))?;
            }
            Err(e) => return Err(parse_error(e.to_string())),
        }
    }
}

/// Capture files found under a directory, plus whatever could not be read on the way.
#[derive(Debug, Default)]
pub struct CaptureWalk {
    pub files: Vec<PathBuf>,
    pub errors: Vec<ConvertError>,
}

pub fn is_capture_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "pcap")
}

/// Depth-first walk with an explicit work list. Entries are visited in name order and
/// symbolic links are not followed.
pub async fn discover_captures(root: &Path) -> CaptureWalk {
    let mut walk = CaptureWalk::default();
    let mut work = vec![root.to_path_buf()];

    while let Some(dir) = work.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(source) => {
                walk.errors.push(ConvertError::SourceRead { path: dir, source });
                continue;
            }
        };

        let mut children = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => children.push(entry),
                Ok(None) => break,
                Err(source) => {
                    walk.errors.push(ConvertError::SourceRead {
                        path: dir.clone(),
                        source,
                    });
                    break;
                }
            }
        }
        children.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in children {
            let path = entry.path();
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => subdirs.push(path),
                Ok(kind) if kind.is_file() && is_capture_file(&path) => walk.files.push(path),
                Ok(_) => {}
                Err(source) => walk.errors.push(ConvertError::SourceRead { path, source }),
            }
        }
        work.extend(subdirs.into_iter().rev());
    }

    walk
}

#[cfg(test)]
#[path = "input_test.rs"]
mod input_test;
