//! Reassembly of Program Specific Information sections from transport stream packets.
//!
//! # Concepts
//!
//! * A PSI *Table* (PAT, PMT, SDT and so on) is split into one or more *Sections*
//! * A Section can be split across a small number of individual transport stream *Packets*, and
//!   one packet may carry the end of one section followed by the start of others
//! * Sections using the common 'section syntax' carry a version number and section numbers, which
//!   allow copies of a table that are re-inserted periodically into the stream to be recognised
//!   and skipped
//!
//! [`SectionReassembler`](struct.SectionReassembler.html) turns packets into complete
//! [`Section`](struct.Section.html) values.  Interpreting the content of sections is left to the
//! caller.

use crate::packet::{ContinuityCounter, Packet, Pid};
use crate::pid_table::PidTable;
use crc::{Crc, CRC_32_MPEG_2};
use fixedbitset::FixedBitSet;
use log::{debug, trace, warn};
use std::fmt;

pub(crate) const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Size of the CRC that ends every section using 'section syntax'
const CRC_SIZE: usize = 4;

/// Byte value used to pad out the remainder of a packet after the last section
const STUFFING_BYTE: u8 = 0xff;

/// Indicates if a section applies now, or will apply at some future time.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CurrentNext {
    /// The section applies now
    Current,
    /// The section is announced for future use
    Next,
}

impl CurrentNext {
    fn from(v: u8) -> CurrentNext {
        if v & 1 == 0 {
            CurrentNext::Next
        } else {
            CurrentNext::Current
        }
    }
}

/// The fields common to every PSI section, found in its first three bytes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SectionCommonHeader {
    /// Identifies the type of table to which this section belongs
    pub table_id: u8,
    /// true if the 'section syntax' fields (see [`TableSyntaxHeader`](struct.TableSyntaxHeader.html))
    /// follow this header
    pub section_syntax_indicator: bool,
    /// Meaning defined by the specification of the particular table type
    pub private_indicator: bool,
    /// The number of bytes in the section following this header
    pub section_length: usize,
}

impl SectionCommonHeader {
    /// The size of the header in bytes
    pub const SIZE: usize = 3;

    /// Panics if fewer than `SectionCommonHeader::SIZE` bytes are given.
    pub fn new(buf: &[u8]) -> SectionCommonHeader {
        assert!(buf.len() >= Self::SIZE);
        SectionCommonHeader {
            table_id: buf[0],
            section_syntax_indicator: buf[1] & 0b1000_0000 != 0,
            private_indicator: buf[1] & 0b0100_0000 != 0,
            section_length: usize::from(buf[1] & 0b0000_1111) << 8 | usize::from(buf[2]),
        }
    }

    /// The size of the whole section, including this header
    pub fn total_length(&self) -> usize {
        Self::SIZE + self.section_length
    }
}

/// The fields present in sections that use 'section syntax', immediately following the
/// [`SectionCommonHeader`](struct.SectionCommonHeader.html).
pub struct TableSyntaxHeader<'buf> {
    buf: &'buf [u8],
}

impl<'buf> TableSyntaxHeader<'buf> {
    /// The size of the header in bytes
    pub const SIZE: usize = 5;

    /// Panics if fewer than `TableSyntaxHeader::SIZE` bytes are given.
    pub fn new(buf: &'buf [u8]) -> TableSyntaxHeader<'buf> {
        assert!(buf.len() >= Self::SIZE);
        TableSyntaxHeader { buf }
    }

    /// The 16-bit _table_id_extension_ which, together with the table id, identifies a
    /// subtable.  _13818-1_ calls this `transport_stream_id` in the PAT and `program_number` in
    /// the PMT.
    pub fn id(&self) -> u16 {
        u16::from(self.buf[0]) << 8 | u16::from(self.buf[1])
    }

    /// A 5-bit value which changes whenever the content of the subtable changes.
    pub fn version(&self) -> u8 {
        (self.buf[2] >> 1) & 0b0001_1111
    }

    /// Is this section applicable now, or will it become applicable at some future time.
    pub fn current_next_indicator(&self) -> CurrentNext {
        CurrentNext::from(self.buf[2])
    }

    /// The number of this section, within a potentially multi-section subtable.
    pub fn section_number(&self) -> u8 {
        self.buf[3]
    }

    /// The `section_number()` of the final section of the subtable.
    pub fn last_section_number(&self) -> u8 {
        self.buf[4]
    }
}

impl<'buf> fmt::Debug for TableSyntaxHeader<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("TableSyntaxHeader")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("current_next_indicator", &self.current_next_indicator())
            .field("section_number", &self.section_number())
            .field("last_section_number", &self.last_section_number())
            .finish()
    }
}

/// A complete, reassembled PSI section.
pub struct Section {
    pid: Pid,
    offset: u64,
    data: Vec<u8>,
}

impl Section {
    /// The PID on which the section was carried
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Stream offset of the packet in which the section started
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The whole section, headers and (for section syntax) trailing CRC included
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the section bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The section's common header fields
    pub fn header(&self) -> SectionCommonHeader {
        SectionCommonHeader::new(&self.data)
    }

    /// Shortcut for `header().table_id`
    pub fn table_id(&self) -> u8 {
        self.data[0]
    }

    /// The 'section syntax' header fields, or `None` for sections using the short form.
    pub fn syntax_header(&self) -> Option<TableSyntaxHeader<'_>> {
        if self.header().section_syntax_indicator {
            Some(TableSyntaxHeader::new(&self.data[SectionCommonHeader::SIZE..]))
        } else {
            None
        }
    }

    /// The section content between the headers and the CRC (for the short form, everything after
    /// the common header).
    pub fn payload(&self) -> &[u8] {
        if self.header().section_syntax_indicator {
            &self.data[SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE..self.data.len() - CRC_SIZE]
        } else {
            &self.data[SectionCommonHeader::SIZE..]
        }
    }

    /// true if the CRC-32/MPEG-2 computed over the whole section, CRC field included, comes out
    /// as zero.  Always false for short-form sections, which carry no CRC.
    pub fn check_crc(&self) -> bool {
        self.header().section_syntax_indicator && CRC_MPEG.checksum(&self.data) == 0
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let mut s = f.debug_struct("Section");
        s.field("pid", &self.pid)
            .field("offset", &self.offset)
            .field("table_id", &self.table_id())
            .field("len", &self.data.len());
        if let Some(syntax) = self.syntax_header() {
            s.field("syntax", &syntax);
        }
        s.finish()
    }
}

/// Which sections of the current version of a subtable have been delivered.
struct SubtableRecord {
    table_id: u8,
    id: u16,
    version: u8,
    last_section_number: u8,
    seen: FixedBitSet,
}

impl SubtableRecord {
    fn new(table_id: u8, syntax: &TableSyntaxHeader<'_>) -> SubtableRecord {
        SubtableRecord {
            table_id,
            id: syntax.id(),
            version: syntax.version(),
            last_section_number: syntax.last_section_number(),
            seen: FixedBitSet::with_capacity(256),
        }
    }

    fn matches(&self, table_id: u8, syntax: &TableSyntaxHeader<'_>) -> bool {
        self.table_id == table_id && self.id == syntax.id()
    }

    fn has_seen(&self, syntax: &TableSyntaxHeader<'_>) -> bool {
        self.version == syntax.version()
            && self.last_section_number == syntax.last_section_number()
            && self.seen.contains(usize::from(syntax.section_number()))
    }

    fn mark_seen(&mut self, syntax: &TableSyntaxHeader<'_>) {
        if self.version != syntax.version()
            || self.last_section_number != syntax.last_section_number()
        {
            self.version = syntax.version();
            self.last_section_number = syntax.last_section_number();
            self.seen.clear();
        }
        self.seen.insert(usize::from(syntax.section_number()));
    }
}

/// A section whose bytes continue in following packets.
struct Accumulation {
    buf: Vec<u8>,
    // unknown until all of the common header has arrived
    expected: Option<usize>,
    offset: u64,
}

enum Check {
    Accept,
    Skip,
    Corrupt,
}

#[derive(Default)]
struct SectionStream {
    cc: Option<ContinuityCounter>,
    accumulation: Option<Accumulation>,
    subtables: Vec<SubtableRecord>,
}

impl SectionStream {
    /// Sections longer than this do not fit the 12-bit `section_length` field
    const SECTION_LIMIT: usize = 4093;
    /// Smallest section that can carry the section-syntax header and CRC
    const MIN_SYNTAX_SECTION: usize = SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE + CRC_SIZE;

    fn find_subtable(&self, table_id: u8, syntax: &TableSyntaxHeader<'_>) -> Option<&SubtableRecord> {
        self.subtables.iter().find(|s| s.matches(table_id, syntax))
    }

    fn check_length(&self, pid: Pid, header: &SectionCommonHeader) -> bool {
        if header.section_length > Self::SECTION_LIMIT {
            warn!(
                "{:?} section_length={} is too large (limit {})",
                pid,
                header.section_length,
                Self::SECTION_LIMIT
            );
            return false;
        }
        if header.section_syntax_indicator && header.total_length() < Self::MIN_SYNTAX_SECTION {
            warn!(
                "{:?} section_length={} too short for section syntax",
                pid, header.section_length
            );
            return false;
        }
        true
    }

    /// Decides the fate of a section-syntax section, given its first
    /// `SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE` bytes.
    fn check_syntax(&self, pid: Pid, table_id: u8, syntax: &TableSyntaxHeader<'_>) -> Check {
        if syntax.current_next_indicator() == CurrentNext::Next {
            debug!(
                "{:?} table_id={:#04x} ignoring section not yet applicable",
                pid, table_id
            );
            return Check::Skip;
        }
        if syntax.section_number() > syntax.last_section_number() {
            warn!(
                "{:?} table_id={:#04x} section_number={} > last_section_number={}",
                pid,
                table_id,
                syntax.section_number(),
                syntax.last_section_number()
            );
            return Check::Corrupt;
        }
        if self
            .find_subtable(table_id, syntax)
            .map(|s| s.has_seen(syntax))
            .unwrap_or(false)
        {
            trace!(
                "{:?} table_id={:#04x} id={} version={} section {} already seen",
                pid,
                table_id,
                syntax.id(),
                syntax.version(),
                syntax.section_number()
            );
            return Check::Skip;
        }
        Check::Accept
    }

    /// Applies the checks which need the whole section, and records it as seen.
    fn complete(&mut self, pid: Pid, offset: u64, data: Vec<u8>, check_crc: bool) -> Option<Section> {
        let header = SectionCommonHeader::new(&data);
        if !header.section_syntax_indicator {
            return Some(Section { pid, offset, data });
        }
        let syntax = TableSyntaxHeader::new(&data[SectionCommonHeader::SIZE..]);
        match self.check_syntax(pid, header.table_id, &syntax) {
            Check::Accept => (),
            Check::Skip | Check::Corrupt => return None,
        }
        if check_crc && CRC_MPEG.checksum(&data) != 0 {
            warn!(
                "{:?} section crc check failed for table_id {:#04x}",
                pid, header.table_id
            );
            return None;
        }
        match self
            .subtables
            .iter_mut()
            .find(|s| s.matches(header.table_id, &syntax))
        {
            Some(subtable) => subtable.mark_seen(&syntax),
            None => {
                let mut subtable = SubtableRecord::new(header.table_id, &syntax);
                subtable.mark_seen(&syntax);
                self.subtables.push(subtable);
            }
        }
        Some(Section { pid, offset, data })
    }

    /// Adds bytes to the in-progress section, returning the section once complete.
    fn append(&mut self, pid: Pid, mut data: &[u8], check_crc: bool) -> Option<Section> {
        let acc = self.accumulation.as_mut()?;
        if acc.expected.is_none() {
            let want = (SectionCommonHeader::SIZE - acc.buf.len()).min(data.len());
            acc.buf.extend_from_slice(&data[..want]);
            data = &data[want..];
            if acc.buf.len() < SectionCommonHeader::SIZE {
                return None;
            }
            let header = SectionCommonHeader::new(&acc.buf);
            if !self.check_length(pid, &header) {
                self.accumulation = None;
                return None;
            }
            if let Some(acc) = self.accumulation.as_mut() {
                acc.expected = Some(header.total_length());
            }
        }
        let acc = self.accumulation.as_mut()?;
        let expected = acc.expected?;
        let remaining = expected - acc.buf.len();
        if data.len() < remaining {
            acc.buf.extend_from_slice(data);
            return None;
        }
        acc.buf.extend_from_slice(&data[..remaining]);
        let acc = self.accumulation.take()?;
        self.complete(pid, acc.offset, acc.buf, check_crc)
    }

    /// Reads the sections starting within `data`, which begins at a section boundary.
    fn read_sections(
        &mut self,
        pid: Pid,
        mut data: &[u8],
        offset: u64,
        check_crc: bool,
        out: &mut Vec<Section>,
    ) {
        while !data.is_empty() && data[0] != STUFFING_BYTE {
            if data.len() < SectionCommonHeader::SIZE {
                // the rest of the header follows in the next packet
                self.accumulation = Some(Accumulation {
                    buf: data.to_vec(),
                    expected: None,
                    offset,
                });
                return;
            }
            let header = SectionCommonHeader::new(data);
            if !self.check_length(pid, &header) {
                return;
            }
            let total = header.total_length();
            if header.section_syntax_indicator
                && data.len() >= SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE
            {
                let syntax = TableSyntaxHeader::new(&data[SectionCommonHeader::SIZE..]);
                match self.check_syntax(pid, header.table_id, &syntax) {
                    Check::Accept => (),
                    Check::Skip => {
                        if total >= data.len() {
                            return;
                        }
                        data = &data[total..];
                        continue;
                    }
                    Check::Corrupt => return,
                }
            }
            if total > data.len() {
                self.accumulation = Some(Accumulation {
                    buf: data.to_vec(),
                    expected: Some(total),
                    offset,
                });
                return;
            }
            let (section, rest) = data.split_at(total);
            if let Some(section) = self.complete(pid, offset, section.to_vec(), check_crc) {
                out.push(section);
            }
            data = rest;
        }
    }

    fn push(&mut self, pk: &Packet<'_>, offset: u64, check_crc: bool) -> Vec<Section> {
        let mut out = vec![];
        let payload = match pk.payload() {
            Some(payload) => payload,
            None => return out,
        };
        let pid = pk.pid();
        let cc = pk.continuity_counter();
        let pusi = pk.payload_unit_start_indicator();
        let (pointer, data) = if pusi {
            (usize::from(payload[0]), &payload[1..])
        } else {
            (0, payload)
        };
        let prev_cc = self.cc.replace(cc);
        if pusi && pointer > data.len() {
            warn!("{:?} PSI pointer {} beyond end of packet payload", pid, pointer);
            self.accumulation = None;
            return out;
        }
        if !prev_cc.map(|prev| cc.follows(prev)).unwrap_or(false) {
            if let Some(prev) = prev_cc {
                warn!(
                    "{:?} continuity counter discontinuity ({} after {}), dropping partial section",
                    pid,
                    cc.count(),
                    prev.count()
                );
                // sections whose repeats were lost may have changed; let them through once more
                for subtable in &mut self.subtables {
                    subtable.seen.clear();
                }
            }
            self.accumulation = None;
            if pusi {
                self.read_sections(pid, &data[pointer..], offset, check_crc, &mut out);
            }
            return out;
        }
        if !pusi {
            if self.accumulation.is_some() {
                out.extend(self.append(pid, data, check_crc));
            } else {
                trace!("{:?} continuation outside of a section", pid);
            }
            return out;
        }
        let (rest, next) = data.split_at(pointer);
        if self.accumulation.is_some() {
            out.extend(self.append(pid, rest, check_crc));
            if self.accumulation.take().is_some() {
                warn!("{:?} new section started before previous one completed", pid);
            }
        }
        self.read_sections(pid, next, offset, check_crc, &mut out);
        out
    }
}

/// Turns the packets of the PIDs carrying sections into complete sections.
///
/// Per PID, the continuity counter of each packet is checked against its predecessor; a
/// discontinuity abandons any partially received section.  Sections using 'section syntax' are
/// delivered once per version: repeats of a section already delivered are suppressed, until the
/// version changes or a discontinuity occurs.
#[derive(Default)]
pub struct SectionReassembler {
    streams: PidTable<SectionStream>,
    check_crc: bool,
}

impl SectionReassembler {
    /// Create a reassembler with no per-PID state, and CRC checking off
    pub fn new() -> SectionReassembler {
        Default::default()
    }

    /// When enabled, sections using 'section syntax' whose CRC does not verify are dropped.
    pub fn set_check_crc(&mut self, check_crc: bool) {
        self.check_crc = check_crc;
    }

    /// Process the given packet, returning any sections it completes.  `offset` is the stream
    /// offset of the packet.
    pub fn push(&mut self, pk: &Packet<'_>, offset: u64) -> Vec<Section> {
        let check_crc = self.check_crc;
        self.streams
            .get_or_insert_with(pk.pid(), SectionStream::default)
            .push(pk, offset, check_crc)
    }

    /// true if part of a section has been received on the given PID
    pub fn is_accumulating(&self, pid: Pid) -> bool {
        self.streams
            .get(pid)
            .map(|s| s.accumulation.is_some())
            .unwrap_or(false)
    }

    /// Forget everything known about the given PID, including which sections were delivered.
    pub fn remove_stream(&mut self, pid: Pid) {
        self.streams.remove(pid);
    }

    /// Abandon partially received sections on all PIDs, keeping the record of delivered sections.
    pub fn clear_accumulations(&mut self) {
        for (_pid, stream) in self.streams.iter_mut() {
            stream.accumulation = None;
            stream.cc = None;
        }
    }

    /// Forget all per-PID state.
    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
