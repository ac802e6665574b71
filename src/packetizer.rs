//! Top-level processing: bytes in, packets, sections and PCR timing out.
//!
//! ```no_run
//! use mpeg2ts_packetizer::packetizer::{ChunkInfo, Packetizer, PacketizerConfig, PacketizerConsumer};
//! use mpeg2ts_packetizer::packet::{Packet, Pid};
//! use mpeg2ts_packetizer::psi::Section;
//!
//! struct PatPrinter;
//! impl PacketizerConsumer for PatPrinter {
//!     fn packet(&mut self, _packet: &Packet<'_>, _offset: u64) {}
//!     fn wants_sections(&mut self, pid: Pid) -> bool {
//!         pid == Pid::new(0)
//!     }
//!     fn section(&mut self, section: Section) {
//!         println!("{:?}", section);
//!     }
//! }
//!
//! let mut packetizer = Packetizer::new(PacketizerConfig::default());
//! let data = std::fs::read("stream.ts").unwrap();
//! packetizer.push(&data, ChunkInfo::default());
//! packetizer.process(&mut PatPrinter);
//! ```

use crate::offset::GroupHeuristics;
use crate::packet::{ClockRef, Packet, PacketError, Pid};
use crate::psi::{Section, SectionReassembler};
use crate::sync::{PacketSize, Synchronizer};
use crate::timeline::Timeline;
use log::{trace, warn};
use std::sync::Arc;
use std::time::Duration;

/// Settings for a [`Packetizer`](struct.Packetizer.html).
///
/// All of these except `check_crc` can also be changed later via the packetizer's
/// [`Timeline`](../timeline/struct.Timeline.html).
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Run the clock-skew estimator on PCR values, using chunk arrival times
    pub calculate_skew: bool,
    /// Track the correspondence between PCR values and byte offsets
    pub calculate_offset: bool,
    /// Largest jump in observed clock skew tolerated without starting the estimate again
    pub pcr_discont_threshold: Duration,
    /// Added to every timestamp converted while clock skew is being estimated
    pub extra_shift: Duration,
    /// Drop sections whose CRC does not verify
    pub check_crc: bool,
    /// Thresholds used when grouping PCR observations
    pub heuristics: GroupHeuristics,
}

impl Default for PacketizerConfig {
    fn default() -> PacketizerConfig {
        PacketizerConfig {
            calculate_skew: false,
            calculate_offset: false,
            pcr_discont_threshold: Duration::from_secs(1),
            extra_shift: Duration::ZERO,
            check_crc: false,
            heuristics: GroupHeuristics::default(),
        }
    }
}

impl PacketizerConfig {
    /// See `calculate_skew`
    pub fn with_calculate_skew(mut self, enabled: bool) -> Self {
        self.calculate_skew = enabled;
        self
    }
    /// See `calculate_offset`
    pub fn with_calculate_offset(mut self, enabled: bool) -> Self {
        self.calculate_offset = enabled;
        self
    }
    /// See `pcr_discont_threshold`
    pub fn with_pcr_discont_threshold(mut self, threshold: Duration) -> Self {
        self.pcr_discont_threshold = threshold;
        self
    }
    /// See `extra_shift`
    pub fn with_extra_shift(mut self, shift: Duration) -> Self {
        self.extra_shift = shift;
        self
    }
    /// See `check_crc`
    pub fn with_check_crc(mut self, enabled: bool) -> Self {
        self.check_crc = enabled;
        self
    }
    /// See `heuristics`
    pub fn with_heuristics(mut self, heuristics: GroupHeuristics) -> Self {
        self.heuristics = heuristics;
        self
    }
}

/// Information about a chunk of data passed to `Packetizer::push()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Position of the chunk's first byte within the whole stream.  Only used for the first chunk
    /// after creation or a flush; later positions are found by counting bytes.
    pub offset: Option<u64>,
    /// Local time at which the chunk arrived, used for clock-skew estimation
    pub arrival: Option<Duration>,
}

/// Receives the results of `Packetizer::process()`.
pub trait PacketizerConsumer {
    /// Called for every well-formed packet, with the stream offset at which it starts.
    fn packet(&mut self, packet: &Packet<'_>, offset: u64);

    /// Return `true` if the payload of the given PID carries sections which should be
    /// reassembled and passed to `section()`.
    fn wants_sections(&mut self, pid: Pid) -> bool;

    /// A complete section, delivered once per version.
    fn section(&mut self, section: Section);

    /// A PCR value was found on the given PID.  `output_time` is the smoothed time assigned to
    /// it by the clock-skew estimator, if enabled.
    fn pcr(&mut self, _pid: Pid, _pcr: ClockRef, _output_time: Option<Duration>) {}

    /// A packet failed to parse, and has been skipped.
    fn bad_packet(&mut self, _offset: u64, _err: PacketError) {}
}

/// Turns a pushed byte stream into packets and sections, feeding PCR values to a
/// [`Timeline`](../timeline/struct.Timeline.html).
pub struct Packetizer {
    sync: Synchronizer,
    sections: SectionReassembler,
    timeline: Arc<Timeline>,
}

impl Packetizer {
    /// Create a packetizer which has not seen any data.
    pub fn new(config: PacketizerConfig) -> Packetizer {
        let mut sections = SectionReassembler::new();
        sections.set_check_crc(config.check_crc);
        Packetizer {
            sync: Synchronizer::new(),
            sections,
            timeline: Arc::new(Timeline::new(&config)),
        }
    }

    /// Timing information derived from the PCRs processed so far.  The returned handle may be
    /// cloned and queried from other threads.
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Turn checking of section CRCs on or off.
    pub fn set_check_crc(&mut self, check_crc: bool) {
        self.sections.set_check_crc(check_crc);
    }

    /// Buffer the given data for processing.  Nothing is parsed until `process()`.
    pub fn push(&mut self, data: &[u8], chunk: ChunkInfo) {
        trace!("push {} bytes, {:?}", data.len(), chunk);
        self.sync.push(data, chunk.offset);
        if let Some(arrival) = chunk.arrival {
            self.timeline.set_arrival_time(arrival);
        }
    }

    /// true if at least one complete packet is buffered
    pub fn has_packets(&mut self) -> bool {
        self.sync.has_packets()
    }

    /// The detected packet size, if known yet
    pub fn packet_size(&self) -> Option<PacketSize> {
        self.sync.packet_size()
    }

    /// Stream offset of the next unprocessed byte
    pub fn offset(&self) -> u64 {
        self.sync.offset()
    }

    /// Process every complete packet buffered so far, passing results to the given consumer.
    /// Returns the number of packets that parsed successfully.
    pub fn process<C: PacketizerConsumer>(&mut self, consumer: &mut C) -> usize {
        let mut count = 0;
        while let Some(raw) = self.sync.next_packet() {
            let offset = raw.offset;
            self.timeline.set_read_offset(offset);
            let pk = match Packet::parse(raw.data) {
                Ok(pk) => pk,
                Err(e) => {
                    warn!("bad packet at offset {}: {:?}", offset, e);
                    consumer.bad_packet(offset, e);
                    continue;
                }
            };
            if let Some(pcr) = pk.pcr() {
                let output_time = self.timeline.observe(pk.pid(), pcr, offset);
                trace!("{:?} pcr {:?} output {:?}", pk.pid(), pcr, output_time);
                consumer.pcr(pk.pid(), pcr, output_time);
            }
            consumer.packet(&pk, offset);
            if consumer.wants_sections(pk.pid()) {
                for section in self.sections.push(&pk, offset) {
                    consumer.section(section);
                }
            }
            count += 1;
        }
        self.timeline.set_read_offset(self.sync.offset());
        count
    }

    /// Forget the sections state of the given PID, including which sections were already
    /// delivered.
    pub fn remove_stream(&mut self, pid: Pid) {
        self.sections.remove_stream(pid);
    }

    /// Discard buffered data and partially received sections, ready for data from a new position
    /// in the stream.  PCR observations are kept (so that, after a seek, offsets and times can
    /// still be related) unless `hard` is given.
    pub fn flush(&mut self, hard: bool) {
        self.sync.flush();
        self.sections.clear_accumulations();
        self.timeline.flush(hard);
    }

    /// As `flush(false)`, but also forgets the packet size and all section state.
    pub fn clear(&mut self) {
        self.sync.reset();
        self.sections.clear();
        self.timeline.flush(false);
    }
}
