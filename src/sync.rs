//! Framing of a raw byte stream into transport stream packets.
//!
//! The [`Synchronizer`](struct.Synchronizer.html) buffers bytes pushed by the caller, works out
//! which of the common packet sizes the stream uses, and then hands out one 188-byte packet at a
//! time, re-establishing alignment if the sync bytes stop appearing where expected.

use crate::packet::Packet;
use log::{debug, trace, warn};

/// The framing variants in which 188-byte transport stream packets are commonly carried.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketSize {
    /// Plain 188 byte packets
    Normal,
    /// 192 byte packets, each preceded by a 4-byte _TP_extra_header_ (Blu-ray, AVCHD)
    M2ts,
    /// 204 byte packets, each followed by 16 bytes of Reed-Solomon parity (DVB-ASI)
    DvbAsi,
    /// 208 byte packets, each followed by 20 bytes of parity (ATSC)
    Atsc,
}

impl PacketSize {
    /// All variants, in the order in which discovery tries them.
    pub const ALL: [PacketSize; 4] = [
        PacketSize::Normal,
        PacketSize::M2ts,
        PacketSize::DvbAsi,
        PacketSize::Atsc,
    ];

    const MAX: usize = 208;

    /// The number of bytes each packet occupies in the stream
    pub fn len(self) -> usize {
        match self {
            PacketSize::Normal => 188,
            PacketSize::M2ts => 192,
            PacketSize::DvbAsi => 204,
            PacketSize::Atsc => 208,
        }
    }

    /// Position of the sync byte relative to the start of each packet
    pub fn sync_offset(self) -> usize {
        match self {
            PacketSize::M2ts => 4,
            _ => 0,
        }
    }
}

/// A 188-byte packet located by the `Synchronizer`.
#[derive(Debug)]
pub struct RawPacket<'buf> {
    /// Stream offset of the first byte of this packet's framing (for M2TS, the extra header)
    pub offset: u64,
    /// Exactly `Packet::SIZE` bytes, starting with the sync byte
    pub data: &'buf [u8],
}

/// Splits pushed bytes into packets.  See the module documentation.
#[derive(Default)]
pub struct Synchronizer {
    buf: Vec<u8>,
    pos: usize,
    offset: u64,
    empty: bool,
    packet_size: Option<PacketSize>,
    need_sync: bool,
}

impl Synchronizer {
    /// The minimum number of consecutive sync bytes required to detect the packet size
    const DISCOVERY_RUN: usize = 4;
    /// The number of consecutive sync bytes required to regain lost sync
    const RESYNC_RUN: usize = 3;

    /// Creates a synchronizer that has not yet detected the packet size
    pub fn new() -> Synchronizer {
        Synchronizer {
            empty: true,
            ..Default::default()
        }
    }

    /// Append bytes to the buffer.  `offset` is the position of `data` within the whole stream,
    /// if known; only the offset of the first chunk pushed after creation or `flush()` is used,
    /// after which offsets are derived by counting bytes.
    pub fn push(&mut self, data: &[u8], offset: Option<u64>) {
        if self.empty {
            self.empty = false;
            if let Some(offset) = offset {
                self.offset = offset;
            }
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// The detected packet size, if detection has completed
    pub fn packet_size(&self) -> Option<PacketSize> {
        self.packet_size
    }

    /// The stream offset of the next unconsumed byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The number of buffered bytes not yet consumed
    pub fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// true if a complete packet is buffered.  Attempts packet size discovery first, if needed.
    pub fn has_packets(&mut self) -> bool {
        if self.packet_size.is_none() && !self.discover_packet_size() {
            return false;
        }
        self.packet_size
            .map(|size| self.available() >= size.len())
            .unwrap_or(false)
    }

    /// Discard buffered data, keeping the detected packet size.  The next `push()` establishes a
    /// new stream offset.
    pub fn flush(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.offset = 0;
        self.empty = true;
        self.need_sync = false;
    }

    /// Discard buffered data and forget the detected packet size.
    pub fn reset(&mut self) {
        self.flush();
        self.packet_size = None;
    }

    fn skip(&mut self, count: usize) {
        if count > 0 {
            trace!("skipping {} bytes at offset {}", count, self.offset);
        }
        self.pos += count;
        self.offset += count as u64;
    }

    fn is_sync(&self, idx: usize) -> bool {
        self.buf
            .get(self.pos + idx)
            .map(|b| Packet::is_sync_byte(*b))
            .unwrap_or(false)
    }

    fn discover_packet_size(&mut self) -> bool {
        let avail = self.available();
        if avail < Self::DISCOVERY_RUN * PacketSize::Normal.len() {
            return false;
        }
        let last_run = Self::DISCOVERY_RUN - 1;
        let mut i = 0;
        while i + last_run * PacketSize::Normal.len() < avail {
            if self.is_sync(i) {
                let mut undecided = false;
                for size in PacketSize::ALL {
                    let len = size.len();
                    if i + last_run * len >= avail {
                        undecided = true;
                        continue;
                    }
                    if (1..=last_run).all(|n| self.is_sync(i + n * len)) {
                        debug!("packet size detected: {:?} ({} bytes)", size, len);
                        self.packet_size = Some(size);
                        let start = if size.sync_offset() == 0 || i >= size.sync_offset() {
                            i - size.sync_offset()
                        } else {
                            // the extra header of this first packet is missing; start at the
                            // next one
                            i + len - size.sync_offset()
                        };
                        self.skip(start);
                        return true;
                    }
                }
                if undecided {
                    // a larger packet size might still match here once more data arrives
                    self.skip(i);
                    return false;
                }
            }
            i += 1;
        }
        let discard = avail.saturating_sub(last_run * PacketSize::MAX);
        debug!(
            "could not determine packet size in {} bytes, discarding {}",
            avail, discard
        );
        self.skip(discard);
        false
    }

    fn resync(&mut self, size: PacketSize) -> bool {
        let len = size.len();
        let avail = self.available();
        if avail < Self::RESYNC_RUN * len {
            return false;
        }
        let last_run = Self::RESYNC_RUN - 1;
        let mut i = size.sync_offset();
        while i + last_run * len < avail {
            if (0..=last_run).all(|n| self.is_sync(i + n * len)) {
                debug!("regained sync at offset {}", self.offset + i as u64);
                self.skip(i - size.sync_offset());
                return true;
            }
            i += 1;
        }
        self.skip(i - size.sync_offset());
        false
    }

    /// Returns the next packet, or `None` if more data is needed.
    pub fn next_packet(&mut self) -> Option<RawPacket<'_>> {
        if self.packet_size.is_none() && !self.discover_packet_size() {
            return None;
        }
        let size = self.packet_size?;
        let len = size.len();
        let sync_off = size.sync_offset();
        let start = loop {
            if self.need_sync {
                if !self.resync(size) {
                    return None;
                }
                self.need_sync = false;
            }
            if self.available() < len {
                return None;
            }
            if self.is_sync(sync_off) {
                break self.pos + sync_off;
            }
            // the sync byte of this packet is wrong; see if the following ones are too
            if self.available() < Self::RESYNC_RUN * len {
                return None;
            }
            let misses = (1..Self::RESYNC_RUN)
                .filter(|n| !self.is_sync(sync_off + n * len))
                .count();
            if misses == Self::RESYNC_RUN - 1 {
                debug!("lost sync at offset {}", self.offset);
                self.need_sync = true;
            } else {
                warn!(
                    "bad sync byte {:#04x} at offset {}, skipping packet",
                    self.buf[self.pos + sync_off],
                    self.offset
                );
                self.skip(len);
            }
        };
        let offset = self.offset;
        self.pos += len;
        self.offset += len as u64;
        Some(RawPacket {
            offset,
            data: &self.buf[start..start + Packet::SIZE],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_stream(size: PacketSize, count: usize, garbage: usize) -> Vec<u8> {
        let mut data = vec![0u8; garbage];
        for n in 0..count {
            let mut pk = vec![0u8; size.len()];
            pk[size.sync_offset()] = Packet::SYNC_BYTE;
            pk[size.sync_offset() + 3] = 0x10 | (n as u8 & 0xf);
            data.extend_from_slice(&pk);
        }
        data
    }

    #[test]
    fn discovers_each_size() {
        for size in PacketSize::ALL {
            for garbage in [0, 1, 5, 100, size.len()] {
                let data = make_stream(size, 4, garbage);
                let mut sync = Synchronizer::new();
                sync.push(&data, Some(0));
                let pk = sync.next_packet().expect("packet");
                assert_eq!(pk.data.len(), Packet::SIZE);
                assert_eq!(pk.data[0], Packet::SYNC_BYTE);
                assert_eq!(sync.packet_size(), Some(size), "garbage {}", garbage);
            }
        }
    }

    #[test]
    fn offsets() {
        let size = PacketSize::M2ts;
        let data = make_stream(size, 6, 10);
        let mut sync = Synchronizer::new();
        sync.push(&data, Some(1000));
        let mut offsets = vec![];
        while let Some(pk) = sync.next_packet() {
            assert_eq!(pk.data[3] & 0x10, 0x10);
            offsets.push(pk.offset);
        }
        assert_eq!(offsets, vec![1010, 1202, 1394, 1586, 1778, 1970]);
        assert_eq!(sync.offset(), 1000 + data.len() as u64);
    }

    #[test]
    fn need_more_data() {
        let data = make_stream(PacketSize::Normal, 3, 0);
        let mut sync = Synchronizer::new();
        sync.push(&data, None);
        assert!(sync.next_packet().is_none());
        assert!(!sync.has_packets());
        sync.push(&make_stream(PacketSize::Normal, 1, 0), None);
        assert!(sync.has_packets());
        assert_eq!(sync.next_packet().map(|p| p.offset), Some(0));
    }

    #[test]
    fn incremental_push() {
        let data = make_stream(PacketSize::Normal, 8, 0);
        let mut sync = Synchronizer::new();
        let mut count = 0;
        for chunk in data.chunks(100) {
            sync.push(chunk, None);
            while sync.next_packet().is_some() {
                count += 1;
            }
        }
        assert_eq!(count, 8);
    }

    #[test]
    fn single_corrupt_packet_is_skipped() {
        let mut data = make_stream(PacketSize::Normal, 8, 0);
        data[188 * 5] = 0x00;
        let mut sync = Synchronizer::new();
        sync.push(&data, None);
        let mut ccs = vec![];
        while let Some(pk) = sync.next_packet() {
            ccs.push(pk.data[3] & 0xf);
        }
        assert_eq!(ccs, vec![0, 1, 2, 3, 4, 6, 7]);
    }

    #[test]
    fn resync_after_lost_bytes() {
        let data = make_stream(PacketSize::Normal, 10, 0);
        let mut spliced = data[..188 * 3].to_vec();
        // drop 50 bytes from the middle of the fourth packet; its header survives, but the
        // packet that follows is lost while sync is regained
        spliced.extend_from_slice(&data[188 * 3..188 * 3 + 100]);
        spliced.extend_from_slice(&data[188 * 3 + 150..]);
        let mut sync = Synchronizer::new();
        sync.push(&spliced, None);
        let mut ccs = vec![];
        while let Some(pk) = sync.next_packet() {
            assert_eq!(pk.data[0], Packet::SYNC_BYTE);
            ccs.push(pk.data[3] & 0xf);
        }
        assert_eq!(ccs, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn garbage_only_is_discarded() {
        let mut sync = Synchronizer::new();
        sync.push(&[0u8; 4000], Some(0));
        assert!(sync.next_packet().is_none());
        assert_eq!(sync.available(), 3 * 208);
        assert_eq!(sync.offset(), 4000 - 3 * 208);
    }

    #[test]
    fn flush_keeps_size() {
        let mut sync = Synchronizer::new();
        sync.push(&make_stream(PacketSize::DvbAsi, 4, 0), Some(0));
        assert!(sync.next_packet().is_some());
        sync.flush();
        assert_eq!(sync.packet_size(), Some(PacketSize::DvbAsi));
        sync.push(&make_stream(PacketSize::DvbAsi, 1, 0), Some(5000));
        assert_eq!(sync.next_packet().map(|p| p.offset), Some(5000));
        sync.reset();
        assert_eq!(sync.packet_size(), None);
    }
}
