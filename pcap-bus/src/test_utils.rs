//! Shared helpers for unit tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream};

use crate::{
    decoder::{DecodeOutputStream, Decoder, DecoderOutput},
    header::{GLOBAL_HEADER_LEN, GlobalHeader, PacketRecord},
};

/// In-process decoder: emits one line per packet found in the segment after an optional
/// delay, and records how many runs overlapped.
pub(crate) struct MockDecoder {
    state: Arc<MockState>,
    delay: Duration,
    exit_code: Option<i32>,
    remove_segment: bool,
}

#[derive(Default)]
pub(crate) struct MockState {
    active: AtomicUsize,
    peak: AtomicUsize,
    invocations: Mutex<Vec<(PathBuf, u64)>>,
}

impl MockState {
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn packet_counts(&self) -> Vec<u64> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(_, n)| *n)
            .collect()
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl MockDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            delay: Duration::ZERO,
            exit_code: Some(0),
            remove_segment: false,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Deletes the segment while decoding it, so the cleanup afterwards fails.
    pub(crate) fn with_removed_segment(mut self) -> Self {
        self.remove_segment = true;
        self
    }

    pub(crate) fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Decoder for MockDecoder {
    fn invoke(&self, segment: &Path) -> std::io::Result<DecodeOutputStream> {
        let bytes = std::fs::read(segment)?;
        let packets = count_packets(&bytes);
        if self.remove_segment {
            std::fs::remove_file(segment)?;
        }
        self.state
            .invocations
            .lock()
            .unwrap()
            .push((segment.to_path_buf(), packets));

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        let exit_code = self.exit_code;
        let run = async move {
            let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak.fetch_max(now, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            state.active.fetch_sub(1, Ordering::SeqCst);

            let mut output: Vec<DecoderOutput> = (0..packets)
                .map(|i| DecoderOutput::Line(format!("{{\"frame\":{}}}", i + 1)))
                .collect();
            output.push(DecoderOutput::Exited(exit_code));
            stream::iter(output)
        };
        Ok(Box::pin(stream::once(run).flatten()))
    }
}

/// Number of packet records in a segment file.
pub(crate) fn count_packets(bytes: &[u8]) -> u64 {
    let mut offset = GLOBAL_HEADER_LEN;
    let mut count = 0;
    while let Some((_, used)) = bytes.get(offset..).and_then(PacketRecord::decode) {
        offset += used;
        count += 1;
    }
    count
}

pub(crate) fn packet(seq: u32, len: usize) -> PacketRecord {
    PacketRecord::new(seq, 0, len as u32, vec![(seq % 251) as u8; len])
}

/// Writes a classic pcap file holding `packets` records.
pub(crate) fn write_capture(path: &Path, packets: u32) -> std::io::Result<()> {
    let mut bytes = GlobalHeader::ethernet(65535).encode().to_vec();
    for seq in 0..packets {
        let record = packet(seq, 60);
        bytes.extend_from_slice(&record.encode_header());
        bytes.extend_from_slice(record.data());
    }
    std::fs::write(path, bytes)
}
