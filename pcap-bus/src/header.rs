use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the classic pcap global header.
pub const GLOBAL_HEADER_LEN: usize = 24;
/// Size of the per-packet record header.
pub const PACKET_HEADER_LEN: usize = 16;

/// Capture-wide header, shared read-only by every segment cut from one input stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalHeader {
    pub magic_number: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub gmt_offset: i32,
    pub timestamp_accuracy: u32,
    pub snapshot_length: u32,
    pub link_layer_type: u32,
}

impl GlobalHeader {
    /// Microsecond-resolution little-endian capture, pcap 2.4.
    pub fn ethernet(snapshot_length: u32) -> Self {
        Self {
            magic_number: 0xa1b2_c3d4,
            major_version: 2,
            minor_version: 4,
            gmt_offset: 0,
            timestamp_accuracy: 0,
            snapshot_length,
            link_layer_type: 1,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(GLOBAL_HEADER_LEN);
        buf.put_u32_le(self.magic_number);
        buf.put_u16_le(self.major_version);
        buf.put_u16_le(self.minor_version);
        buf.put_i32_le(self.gmt_offset);
        buf.put_u32_le(self.timestamp_accuracy);
        buf.put_u32_le(self.snapshot_length);
        buf.put_u32_le(self.link_layer_type);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Option<Self> {
        if data.len() < GLOBAL_HEADER_LEN {
            return None;
        }
        Some(Self {
            magic_number: data.get_u32_le(),
            major_version: data.get_u16_le(),
            minor_version: data.get_u16_le(),
            gmt_offset: data.get_i32_le(),
            timestamp_accuracy: data.get_u32_le(),
            snapshot_length: data.get_u32_le(),
            link_layer_type: data.get_u32_le(),
        })
    }
}

/// One captured packet as emitted by the upstream parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketRecord {
    timestamp_seconds: u32,
    timestamp_microseconds: u32,
    original_length: u32,
    data: Bytes,
}

impl PacketRecord {
    pub fn new(
        timestamp_seconds: u32,
        timestamp_microseconds: u32,
        original_length: u32,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            timestamp_seconds,
            timestamp_microseconds,
            original_length,
            data: data.into(),
        }
    }

    pub fn timestamp_seconds(&self) -> u32 {
        self.timestamp_seconds
    }

    pub fn timestamp_microseconds(&self) -> u32 {
        self.timestamp_microseconds
    }

    /// Always equal to the payload length.
    pub fn captured_length(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn original_length(&self) -> u32 {
        self.original_length
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Record header that precedes the payload inside a segment.
    pub fn encode_header(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut header = [0u8; PACKET_HEADER_LEN];
        let mut buf = &mut header[..];
        buf.put_u32_le(self.timestamp_seconds);
        buf.put_u32_le(self.timestamp_microseconds);
        buf.put_u32_le(self.captured_length());
        buf.put_u32_le(self.original_length);
        header
    }

    /// Parses one record (header + payload) from the front of `data`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < PACKET_HEADER_LEN {
            return None;
        }
        let mut header = &data[..PACKET_HEADER_LEN];
        let timestamp_seconds = header.get_u32_le();
        let timestamp_microseconds = header.get_u32_le();
        let captured_length = header.get_u32_le() as usize;
        let original_length = header.get_u32_le();

        let end = PACKET_HEADER_LEN.checked_add(captured_length)?;
        if data.len() < end {
            return None;
        }
        let payload = Bytes::copy_from_slice(&data[PACKET_HEADER_LEN..end]);
        Some((
            Self::new(
                timestamp_seconds,
                timestamp_microseconds,
                original_length,
                payload,
            ),
            end,
        ))
    }
}

#[cfg(test)]
#[path = "header_test.rs"]
mod header_test;
